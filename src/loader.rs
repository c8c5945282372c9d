use crate::types::{
    columns, ContainerCounts, ContainerStatus, Dataset, InspectionRecord, CONTAINER_TYPES,
};
use crate::util::{
    normalize_identifier, parse_count_safe, parse_datetime_safe, parse_f64_safe, parse_i64_safe,
};
use chrono::{Datelike, NaiveDateTime};
use csv::{ByteRecord, ReaderBuilder, StringRecord};
use encoding_rs::WINDOWS_1252;
use log::{debug, info};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::io::Read;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot open {path}: {source}")]
    Open { path: String, source: csv::Error },
    #[error("cannot read the header row: {0}")]
    Header(#[source] csv::Error),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadReport {
    pub total_rows: usize,
    /// Rows the CSV reader could not frame at all.
    pub unreadable_rows: usize,
    /// Cells that were not valid UTF-8 and were decoded as Windows-1252.
    pub recoded_cells: usize,
    /// Rows kept without a usable `fecha_inspeccion`.
    pub missing_dates: usize,
    /// Non-empty cells that failed to parse and fell back to a default.
    pub coerced_cells: usize,
    pub columns: usize,
}

pub fn load_dataset(path: &Path) -> Result<(Dataset, LoadReport), LoadError> {
    let rdr = ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|source| LoadError::Open {
            path: path.display().to_string(),
            source,
        })?;
    let (dataset, report) = read_records(rdr)?;
    info!(
        "Loaded {} ({} rows, {} columns, {} rows without inspection date)",
        path.display(),
        report.total_rows,
        report.columns,
        report.missing_dates
    );
    Ok((dataset, report))
}

pub fn read_dataset<R: Read>(reader: R) -> Result<(Dataset, LoadReport), LoadError> {
    read_records(ReaderBuilder::new().flexible(true).from_reader(reader))
}

/// Cell text as UTF-8, or as Windows-1252 when the export was saved from a
/// Latin-1 spreadsheet. Never fails.
fn decode_cell(bytes: &[u8], recoded: &mut usize) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => {
            *recoded += 1;
            let (text, _) = WINDOWS_1252.decode_without_bom_handling(bytes);
            text.into_owned()
        }
    }
}

fn decode_record(record: &ByteRecord, recoded: &mut usize) -> StringRecord {
    record
        .iter()
        .map(|cell| decode_cell(cell, recoded))
        .collect::<Vec<String>>()
        .into()
}

fn read_records<R: Read>(mut rdr: csv::Reader<R>) -> Result<(Dataset, LoadReport), LoadError> {
    let mut recoded_cells = 0usize;
    let headers: Vec<String> = decode_record(
        rdr.byte_headers().map_err(LoadError::Header)?,
        &mut recoded_cells,
    )
    .iter()
    .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
    .collect();

    let mut unreadable_rows = 0usize;
    let mut rows: Vec<StringRecord> = Vec::new();
    for result in rdr.byte_records() {
        match result {
            Ok(r) => rows.push(decode_record(&r, &mut recoded_cells)),
            Err(e) => {
                debug!("skipping unreadable row: {}", e);
                unreadable_rows += 1;
            }
        }
    }
    if recoded_cells > 0 {
        info!("{} cells were not UTF-8 and were read as Windows-1252", recoded_cells);
    }

    let (dataset, mut report) = normalize(&headers, rows.iter());
    report.total_rows += unreadable_rows;
    report.unreadable_rows = unreadable_rows;
    report.recoded_cells = recoded_cells;
    Ok((dataset, report))
}

/// A single raw row addressed by column name. Missing columns and blank
/// cells both read as `None`.
struct RawRow<'a> {
    index: &'a HashMap<&'a str, usize>,
    cells: &'a StringRecord,
    coerced: usize,
}

impl<'a> RawRow<'a> {
    fn get(&self, column: &str) -> Option<&'a str> {
        let i = *self.index.get(column)?;
        let cell = self.cells.get(i)?.trim();
        if cell.is_empty() {
            None
        } else {
            Some(cell)
        }
    }

    fn text(&self, column: &str) -> String {
        self.get(column).unwrap_or_default().to_string()
    }

    fn note<T>(&mut self, column: &str, parsed: Option<T>) -> Option<T> {
        if parsed.is_none() && self.get(column).is_some() {
            self.coerced += 1;
        }
        parsed
    }

    fn number(&mut self, column: &str) -> f64 {
        let parsed = parse_f64_safe(self.get(column)).filter(|v| *v >= 0.0);
        self.note(column, parsed).unwrap_or(0.0)
    }

    fn count(&mut self, column: &str) -> u64 {
        let parsed = parse_count_safe(self.get(column));
        self.note(column, parsed).unwrap_or(0)
    }

    fn integer(&mut self, column: &str) -> i64 {
        let parsed = parse_i64_safe(self.get(column));
        self.note(column, parsed).unwrap_or(0)
    }

    fn coordinate(&mut self, column: &str) -> Option<f64> {
        let parsed = parse_f64_safe(self.get(column));
        self.note(column, parsed)
    }

    fn timestamp(&mut self, column: &str) -> Option<NaiveDateTime> {
        let parsed = parse_datetime_safe(self.get(column));
        self.note(column, parsed)
    }
}

/// Columns mapped onto typed record fields rather than `attributes`.
fn typed_columns() -> BTreeSet<String> {
    let mut set: BTreeSet<String> = [
        columns::FACILITY_CODE,
        columns::FACILITY_NAME,
        columns::ACTIVITY_TYPE,
        columns::HOUSE_STATUS,
        columns::HOUSE_POSITIVE,
        columns::LARVICIDE,
        columns::FEBRILE,
        columns::INSPECTOR_ID,
        columns::INSPECTOR_NAME,
        columns::INSPECTION_DATE,
        columns::CREATED_AT,
        columns::ADDRESS,
        columns::GEO_X,
        columns::GEO_Y,
    ]
    .iter()
    .map(|c| c.to_string())
    .collect();
    for container in CONTAINER_TYPES.iter() {
        set.extend(container.columns());
    }
    set
}

/// Turn a raw rectangular table into the canonical dataset.
///
/// Nothing here fails on cell content: unparseable numbers become `0`,
/// unparseable dates become `None`, absent columns read as defaults. The
/// returned report counts how much had to be coerced.
pub fn normalize<'r, I>(headers: &[String], rows: I) -> (Dataset, LoadReport)
where
    I: IntoIterator<Item = &'r StringRecord>,
{
    let index: HashMap<&str, usize> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| (h.as_str(), i))
        .collect();
    let typed = typed_columns();
    let attribute_columns: Vec<&str> = headers
        .iter()
        .map(String::as_str)
        .filter(|h| !h.is_empty() && !typed.contains(*h))
        .collect();

    let mut report = LoadReport::default();
    let mut records = Vec::new();

    for cells in rows {
        report.total_rows += 1;
        let mut row = RawRow { index: &index, cells, coerced: 0 };

        let inspected_at = row.timestamp(columns::INSPECTION_DATE);
        let inspection_date = inspected_at.map(|dt| dt.date());
        if inspection_date.is_none() {
            report.missing_dates += 1;
        }

        let mut containers = [ContainerCounts::default(); 10];
        for (slot, container) in containers.iter_mut().zip(CONTAINER_TYPES.iter()) {
            for status in ContainerStatus::ALL {
                if container.has_status(status) {
                    let value = row.count(&container.column(status));
                    slot.set(status, value);
                }
            }
        }

        let facility_code = {
            let raw = row.get(columns::FACILITY_CODE).map(normalize_identifier);
            let parsed = parse_i64_safe(raw.as_deref());
            row.note(columns::FACILITY_CODE, parsed).unwrap_or(0)
        };

        let attributes = attribute_columns
            .iter()
            .filter_map(|c| row.get(c).map(|v| (c.to_string(), v.to_string())))
            .collect();

        let record = InspectionRecord {
            facility_code,
            facility_name: row.text(columns::FACILITY_NAME),
            year: inspection_date.map(|d| d.year()),
            inspection_date,
            inspected_at,
            activity_type: row.text(columns::ACTIVITY_TYPE),
            house_status: row.integer(columns::HOUSE_STATUS),
            house_is_positive: row.integer(columns::HOUSE_POSITIVE) == 1,
            larvicide_consumed: row.number(columns::LARVICIDE),
            febrile_case_count: row.count(columns::FEBRILE),
            inspector_id: normalize_identifier(&row.text(columns::INSPECTOR_ID)),
            inspector_name: row.text(columns::INSPECTOR_NAME),
            containers,
            geo_x: row.coordinate(columns::GEO_X),
            geo_y: row.coordinate(columns::GEO_Y),
            created_at: row.timestamp(columns::CREATED_AT),
            address: row.text(columns::ADDRESS),
            attributes,
        };
        report.coerced_cells += row.coerced;
        records.push(record);
    }

    let mut column_set: BTreeSet<String> = headers
        .iter()
        .filter(|h| !h.is_empty())
        .cloned()
        .collect();
    if column_set.contains(columns::INSPECTION_DATE) {
        column_set.insert(columns::YEAR.to_string());
    }
    report.columns = column_set.len();
    if report.coerced_cells > 0 {
        debug!(
            "{} cells could not be parsed and were replaced by defaults",
            report.coerced_cells
        );
    }

    (
        Dataset {
            records,
            columns: column_set,
        },
        report,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facilities::FacilityStore;
    use crate::indicators::IndicatorEngine;
    use chrono::NaiveDate;

    fn load(csv: &str) -> (Dataset, LoadReport) {
        read_dataset(csv.as_bytes()).unwrap()
    }

    #[test]
    fn typed_fields_are_parsed() {
        let (ds, report) = load(
            "cod_renipress,localidad_eess,tipoActividadInspeccion,atencion_vivienda_indicador,viv_positiva,consumo_larvicida,febriles,usuario_registra,fecha_inspeccion,tanque_alto_I,tanque_alto_P,otros_D\n\
             5060,LA LIBERTAD,Vigilancia,1,1,12.5,2,45879123.0,2024-03-07 09:15:00,3,1,4\n",
        );
        assert_eq!(report.total_rows, 1);
        assert_eq!(report.coerced_cells, 0);
        let r = &ds.records[0];
        assert_eq!(r.facility_code, 5060);
        assert_eq!(r.facility_name, "LA LIBERTAD");
        assert!(r.is_positive_house());
        assert_eq!(r.febrile_case_count, 2);
        assert_eq!(r.inspector_id, "45879123");
        assert_eq!(r.inspection_date, NaiveDate::from_ymd_opt(2024, 3, 7));
        assert_eq!(r.year, Some(2024));
        assert_eq!(r.containers[0].inspected, 3);
        assert_eq!(r.containers[0].positive, 1);
        assert_eq!(r.containers[8].discarded, 4);
        assert!(ds.has_column("year"));
    }

    #[test]
    fn malformed_cells_degrade_to_defaults() {
        let (ds, report) = load(
            "cod_renipress,atencion_vivienda_indicador,consumo_larvicida,fecha_inspeccion,llantas_P\n\
             5060,1,abc,31/02/2024,x\n\
             ,,,,\n",
        );
        assert_eq!(ds.len(), 2);
        assert_eq!(report.missing_dates, 2);
        assert_eq!(report.coerced_cells, 3);
        let r = &ds.records[0];
        assert_eq!(r.larvicide_consumed, 0.0);
        assert_eq!(r.inspection_date, None);
        assert_eq!(r.year, None);
        assert_eq!(r.containers[5].positive, 0);
        assert_eq!(ds.records[1].facility_code, 0);
        assert_eq!(ds.records[1].facility_name, "");
    }

    #[test]
    fn missing_columns_read_as_zero() {
        let (ds, _) = load("cod_renipress,localidad_eess\n7276,LA PRIMAVERA\n");
        let r = &ds.records[0];
        assert_eq!(r.container_sum(ContainerStatus::Inspected), 0);
        assert_eq!(r.febrile_case_count, 0);
        assert_eq!(r.house_status, 0);
        assert!(!ds.has_column("year"));
    }

    #[test]
    fn extra_columns_become_attributes() {
        let (ds, _) = load(
            "\u{feff}cod_renipress,distrito,departamento_x\n5060,Bagua Grande,\n",
        );
        let r = &ds.records[0];
        assert_eq!(r.attributes.get("distrito").map(String::as_str), Some("Bagua Grande"));
        assert!(!r.attributes.contains_key("departamento_x"));
        assert!(ds.has_column("cod_renipress"));
        assert!(ds.has_column("departamento_x"));
    }

    #[test]
    fn latin1_cells_are_decoded_not_dropped() {
        let mut bytes = b"cod_renipress,localidad_eess,direcci\xf3n\n".to_vec();
        bytes.extend_from_slice(b"5060,SE\xd1OR DE LOS MILAGROS,Jr. Lima\n");
        bytes.extend_from_slice(b"5044,EL PINTOR,Av. Grau\n");
        let (ds, report) = read_dataset(bytes.as_slice()).unwrap();
        assert_eq!(ds.len(), 2);
        assert_eq!(report.unreadable_rows, 0);
        assert_eq!(report.recoded_cells, 2);
        assert_eq!(ds.records[0].facility_name, "SEÑOR DE LOS MILAGROS");
        assert_eq!(ds.records[0].address, "Jr. Lima");
        assert!(ds.has_column("dirección"));
    }

    #[test]
    fn out_of_range_dates_count_as_missing() {
        let (ds, report) = load(
            "cod_renipress,atencion_vivienda_indicador,fecha_inspeccion\n\
             5060,1,+262142-12-31\n\
             5060,1,2024-03-07\n",
        );
        assert_eq!(ds.len(), 2);
        assert_eq!(report.missing_dates, 1);
        assert_eq!(report.coerced_cells, 1);
        assert_eq!(ds.records[0].inspection_date, None);

        let store = FacilityStore::new();
        let weeks = IndicatorEngine::new(&store).weekly_surveillance_days(&ds.all());
        assert_eq!(weeks.len(), 1);
        assert_eq!(weeks[0].total_inspections, 1);
    }

    #[test]
    fn timestamps_keep_time_of_day() {
        let (ds, _) = load(
            "fecha_inspeccion,_createdAt_x\n2024-05-07 01:00:00,2024-05-06T23:00:00.000Z\n",
        );
        let r = &ds.records[0];
        assert_eq!(r.inspection_date, NaiveDate::from_ymd_opt(2024, 5, 7));
        assert_eq!(
            r.inspected_at,
            NaiveDate::from_ymd_opt(2024, 5, 7).and_then(|d| d.and_hms_opt(1, 0, 0))
        );
        assert_eq!(
            r.created_at,
            NaiveDate::from_ymd_opt(2024, 5, 6).and_then(|d| d.and_hms_opt(23, 0, 0))
        );
    }
}
