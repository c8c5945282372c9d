use crate::types::ActivityType;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Entomological indicators for Aedes aegypti field inspections.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// (file path, optional) JSON store with the registered housing units per facility.
    /// When missing, the built-in reference table is used.
    #[arg(long, global = true, value_name = "FILE")]
    pub facility_store: Option<PathBuf>,

    /// If passed as an argument, will turn on verbose logging. RUST_LOG takes precedence.
    #[arg(long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Compute every indicator table for a filtered view of an inspection export.
    Report(ReportArgs),

    /// List inspectors, or analyse the output of one of them.
    Inspector(InspectorArgs),

    /// Manage the facility reference store.
    Facilities {
        #[command(subcommand)]
        action: FacilityAction,
    },
}

/// Narrowing shared by the analysis commands.
#[derive(clap::Args, Debug, Clone)]
pub struct FilterArgs {
    /// (vigilancia, control_larvario or cerco) Keep only this activity type.
    #[arg(long)]
    pub activity: Option<ActivityType>,

    /// Keep only inspections of this year.
    #[arg(long)]
    pub year: Option<i32>,

    /// Keep only these facility codes (repeatable).
    #[arg(long = "facility-code")]
    pub facility_codes: Vec<String>,

    /// (column=value, repeatable) Equality filter on any column of the export.
    #[arg(long = "filter", value_parser = parse_key_value)]
    pub filters: Vec<(String, String)>,

    /// (YYYY-MM-DD) First inspection date to keep, inclusive.
    #[arg(long)]
    pub from: Option<NaiveDate>,

    /// (YYYY-MM-DD) Last inspection date to keep, inclusive.
    #[arg(long)]
    pub to: Option<NaiveDate>,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ReportArgs {
    /// (file path) The inspection export in CSV format.
    #[arg(short, long)]
    pub input: PathBuf,

    #[command(flatten)]
    pub filter: FilterArgs,

    /// Directory receiving one CSV per table and summary.json.
    #[arg(short, long, default_value = "reports")]
    pub out_dir: PathBuf,

    /// Rows shown in each console preview.
    #[arg(long, default_value_t = 5)]
    pub preview_rows: usize,
}

#[derive(clap::Args, Debug, Clone)]
pub struct InspectorArgs {
    /// (file path) The inspection export in CSV format.
    #[arg(short, long)]
    pub input: PathBuf,

    /// Inspector id (`usuario_registra`). Without it the directory is printed.
    #[arg(long)]
    pub id: Option<String>,

    #[command(flatten)]
    pub filter: FilterArgs,

    #[arg(short, long, default_value = "reports")]
    pub out_dir: PathBuf,

    #[arg(long, default_value_t = 10)]
    pub preview_rows: usize,
}

#[derive(Subcommand, Debug, Clone)]
pub enum FacilityAction {
    /// Print every registered facility.
    List,

    /// Facility codes of an export that the store does not know.
    Missing {
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Bulk load facilities from .csv, .xlsx or the .txt housing listing.
    Import {
        file: PathBuf,
        #[arg(long, default_value = "import")]
        user: String,
    },

    /// Write the store as a CSV ready for spreadsheet editing.
    Export { file: PathBuf },

    /// Register a facility, or change the housing total of a known one.
    Set {
        code: i64,
        total_houses: u64,
        /// Facility name; required for a facility the store does not have yet.
        #[arg(long)]
        name: Option<String>,
        #[arg(long, default_value = "admin")]
        user: String,
    },
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected column=value, got '{}'", s))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing column name in '{}'", s));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_flags_parse() {
        let args = Args::try_parse_from([
            "vigilancia",
            "--verbose",
            "report",
            "--input",
            "data.csv",
            "--activity",
            "control_larvario",
            "--filter",
            "distrito=Bagua Grande",
            "--facility-code",
            "5060",
            "--facility-code",
            "5044",
            "--from",
            "2024-01-01",
        ])
        .unwrap();
        assert!(args.verbose);
        let Command::Report(report) = args.command else {
            panic!("expected the report command");
        };
        assert_eq!(report.filter.activity, Some(ActivityType::ControlLarvario));
        assert_eq!(report.filter.facility_codes, vec!["5060", "5044"]);
        assert_eq!(
            report.filter.filters,
            vec![("distrito".to_string(), "Bagua Grande".to_string())]
        );
        assert_eq!(report.filter.from, NaiveDate::from_ymd_opt(2024, 1, 1));
        assert_eq!(report.preview_rows, 5);
    }

    #[test]
    fn malformed_filter_is_rejected() {
        assert!(parse_key_value("distrito").is_err());
        assert!(parse_key_value("=x").is_err());
        assert_eq!(
            parse_key_value("year=2024"),
            Ok(("year".to_string(), "2024".to_string()))
        );
    }
}
