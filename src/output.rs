use log::{error, info};
use serde::Serialize;
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use tabled::{settings::Style, Table, Tabled};

pub fn write_csv<T: Serialize>(path: &Path, rows: &[T]) -> Result<(), Box<dyn Error>> {
    let mut wtr = csv::Writer::from_path(path)?;
    for r in rows {
        wtr.serialize(r)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), Box<dyn Error>> {
    let s = serde_json::to_string_pretty(value)?;
    fs::write(path, s)?;
    Ok(())
}

pub fn preview_table_rows<T>(rows: &[T], max_rows: usize)
where
    T: Tabled + Clone,
{
    let slice: Vec<T> = rows.iter().take(max_rows).cloned().collect();
    if slice.is_empty() {
        println!("(no rows)\n");
        return;
    }
    let table_str = Table::new(slice).with(Style::markdown()).to_string();
    println!("{}\n", table_str);
    if rows.len() > max_rows {
        println!("... {} more rows\n", rows.len() - max_rows);
    }
}

/// Writes one CSV per table into `out_dir` and prints a markdown preview.
/// A failed write is logged and the remaining tables still go out.
pub struct ReportWriter {
    out_dir: PathBuf,
    preview_rows: usize,
    counter: usize,
    written: Vec<PathBuf>,
}

impl ReportWriter {
    pub fn new(out_dir: &Path, preview_rows: usize) -> Result<Self, Box<dyn Error>> {
        fs::create_dir_all(out_dir)?;
        Ok(ReportWriter {
            out_dir: out_dir.to_path_buf(),
            preview_rows,
            counter: 0,
            written: Vec::new(),
        })
    }

    pub fn table<T>(&mut self, file_name: &str, title: &str, rows: &[T])
    where
        T: Serialize + Tabled + Clone,
    {
        self.counter += 1;
        let path = self.out_dir.join(file_name);
        println!("Report {}: {}\n", self.counter, title);
        preview_table_rows(rows, self.preview_rows);
        match write_csv(&path, rows) {
            Ok(()) => {
                println!("(Full table exported to {})\n", path.display());
                self.written.push(path);
            }
            Err(e) => error!("Write error on {}: {}", path.display(), e),
        }
    }

    pub fn json<T: Serialize>(&mut self, file_name: &str, value: &T) {
        let path = self.out_dir.join(file_name);
        match write_json(&path, value) {
            Ok(()) => self.written.push(path),
            Err(e) => error!("Write error on {}: {}", path.display(), e),
        }
    }

    pub fn finish(self) -> Vec<PathBuf> {
        info!(
            "{} files written to {}",
            self.written.len(),
            self.out_dir.display()
        );
        self.written
    }
}
