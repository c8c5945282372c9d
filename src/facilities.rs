//! Reference data for health facilities: registered name and total housing
//! units per `cod_renipress`, the denominator of every coverage figure.
//!
//! The store is an explicit value handed to the indicator functions through
//! [`FacilityLookup`]. It can be seeded from the built-in table, persisted as
//! JSON, bulk-loaded from CSV, XLSX or the plain-text housing listing, and
//! exported back to CSV for offline editing.
use crate::types::{FacilityReference, InspectionRecord};
use crate::util::{normalize_identifier, parse_count_safe, parse_i64_safe};
use calamine::{open_workbook, DataType, Reader, Xlsx};
use chrono::{Local, NaiveDateTime};
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use thiserror::Error;

pub const CODE_HEADER: &str = "Código RENIPRESS";
pub const NAME_HEADER: &str = "Nombre del Establecimiento";
pub const TOTAL_HEADER: &str = "Total de Viviendas";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid facility store JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("cannot read workbook: {0}")]
    Excel(#[from] calamine::XlsxError),
    #[error("workbook has no worksheet")]
    EmptyWorkbook,
    #[error(
        "the file must contain the columns: Código RENIPRESS, Nombre del Establecimiento, Total de Viviendas"
    )]
    MissingColumns,
    #[error("row {line}: {reason}")]
    InvalidRow { line: usize, reason: String },
    #[error("facility {0} is not registered")]
    UnknownFacility(i64),
}

type StoreResult<T> = Result<T, StoreError>;

/// Read access the indicator engine needs. Implementations must answer from
/// current data on every call.
pub trait FacilityLookup {
    fn lookup(&self, facility_code: i64) -> Option<FacilityReference>;

    fn all(&self) -> Vec<FacilityReference>;

    /// Registered housing units, or 0 for an unknown facility.
    fn total_houses(&self, facility_code: i64) -> u64 {
        self.lookup(facility_code)
            .map(|f| f.total_housing_units)
            .unwrap_or(0)
    }
}

/// Persisted shape of one facility, also the JSON store format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredFacility {
    pub cod_renipress: i64,
    pub nombre_establecimiento: String,
    pub total_viviendas: u64,
    #[serde(default)]
    pub fecha_actualizacion: Option<NaiveDateTime>,
    #[serde(default)]
    pub usuario_actualizacion: String,
}

impl From<&StoredFacility> for FacilityReference {
    fn from(f: &StoredFacility) -> Self {
        FacilityReference {
            facility_code: f.cod_renipress,
            name: f.nombre_establecimiento.clone(),
            total_housing_units: f.total_viviendas,
        }
    }
}

/// Row layout of the spreadsheet used for bulk edits.
#[derive(Debug, Serialize, Deserialize)]
struct SheetRow {
    #[serde(rename = "Código RENIPRESS")]
    code: String,
    #[serde(rename = "Nombre del Establecimiento")]
    name: String,
    #[serde(rename = "Total de Viviendas")]
    total: String,
}

#[derive(Debug, Clone, Default)]
pub struct FacilityStore {
    facilities: BTreeMap<i64, StoredFacility>,
}

impl FacilityLookup for FacilityStore {
    fn lookup(&self, facility_code: i64) -> Option<FacilityReference> {
        self.facilities.get(&facility_code).map(FacilityReference::from)
    }

    fn all(&self) -> Vec<FacilityReference> {
        self.get_all()
    }
}

impl FacilityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in table, used when no store file is configured.
    pub fn fallback() -> Self {
        FALLBACK_STORE.clone()
    }

    /// Open the JSON store at `path`, or fall back to the built-in table
    /// when no path is given or the file does not exist yet.
    pub fn open(path: Option<&Path>) -> StoreResult<Self> {
        match path {
            Some(p) if p.exists() => {
                let store = Self::load_json(p)?;
                info!("Loaded {} facilities from {}", store.len(), p.display());
                Ok(store)
            }
            Some(p) => {
                warn!(
                    "Facility store {} not found, using the built-in reference table",
                    p.display()
                );
                Ok(Self::fallback())
            }
            None => Ok(Self::fallback()),
        }
    }

    pub fn len(&self) -> usize {
        self.facilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facilities.is_empty()
    }

    /// All facilities ordered by name, then code.
    pub fn get_all(&self) -> Vec<FacilityReference> {
        let mut all: Vec<FacilityReference> =
            self.facilities.values().map(FacilityReference::from).collect();
        all.sort_by(|a, b| {
            a.name
                .cmp(&b.name)
                .then(a.facility_code.cmp(&b.facility_code))
        });
        all
    }

    pub fn get(&self, facility_code: i64) -> Option<&StoredFacility> {
        self.facilities.get(&facility_code)
    }

    /// Insert or replace a facility.
    pub fn upsert(&mut self, facility_code: i64, name: &str, total_houses: u64, user: &str) {
        let entry = StoredFacility {
            cod_renipress: facility_code,
            nombre_establecimiento: name.trim().to_string(),
            total_viviendas: total_houses,
            fecha_actualizacion: Some(Local::now().naive_local()),
            usuario_actualizacion: user.to_string(),
        };
        debug!("upsert facility {} ({} houses)", facility_code, total_houses);
        self.facilities.insert(facility_code, entry);
    }

    /// Change only the housing total of an existing facility.
    pub fn update_total_houses(
        &mut self,
        facility_code: i64,
        total_houses: u64,
        user: &str,
    ) -> StoreResult<()> {
        let entry = self
            .facilities
            .get_mut(&facility_code)
            .ok_or(StoreError::UnknownFacility(facility_code))?;
        entry.total_viviendas = total_houses;
        entry.fecha_actualizacion = Some(Local::now().naive_local());
        entry.usuario_actualizacion = user.to_string();
        Ok(())
    }

    pub fn bulk_upsert<I>(&mut self, facilities: I, user: &str) -> usize
    where
        I: IntoIterator<Item = FacilityReference>,
    {
        let mut n = 0;
        for f in facilities {
            self.upsert(f.facility_code, &f.name, f.total_housing_units, user);
            n += 1;
        }
        n
    }

    pub fn load_json(path: &Path) -> StoreResult<Self> {
        let text = fs::read_to_string(path).map_err(|source| StoreError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let entries: Vec<StoredFacility> = serde_json::from_str(&text)?;
        Ok(FacilityStore {
            facilities: entries
                .into_iter()
                .map(|f| (f.cod_renipress, f))
                .collect(),
        })
    }

    pub fn save_json(&self, path: &Path) -> StoreResult<()> {
        let entries: Vec<&StoredFacility> = self.facilities.values().collect();
        let s = serde_json::to_string_pretty(&entries)?;
        fs::write(path, s).map_err(|source| StoreError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    /// Write the bulk-edit spreadsheet layout, ordered by name.
    pub fn export_csv(&self, path: &Path) -> StoreResult<()> {
        let mut wtr = csv::Writer::from_path(path)?;
        for f in self.get_all() {
            wtr.serialize(SheetRow {
                code: f.facility_code.to_string(),
                name: f.name,
                total: f.total_housing_units.to_string(),
            })?;
        }
        wtr.flush().map_err(|source| StoreError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(())
    }

    pub fn import_csv<R: Read>(&mut self, reader: R, user: &str) -> StoreResult<usize> {
        let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
        let headers: Vec<String> = rdr
            .headers()?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
            .collect();
        let positions = sheet_positions(&headers)?;
        let mut parsed = Vec::new();
        for (i, record) in rdr.records().enumerate() {
            let record = record?;
            let cell = |idx: usize| record.get(idx).unwrap_or_default().trim().to_string();
            parsed.push(parse_sheet_row(
                i + 2,
                &cell(positions.0),
                &cell(positions.1),
                &cell(positions.2),
            )?);
        }
        Ok(self.bulk_upsert(parsed, user))
    }

    pub fn import_xlsx(&mut self, path: &Path, user: &str) -> StoreResult<usize> {
        let mut workbook: Xlsx<_> = open_workbook(path)?;
        let range = workbook
            .worksheets()
            .into_iter()
            .next()
            .map(|(_, range)| range)
            .ok_or(StoreError::EmptyWorkbook)?;
        let mut rows = range.rows();
        let headers: Vec<String> = rows
            .next()
            .ok_or(StoreError::MissingColumns)?
            .iter()
            .map(cell_text)
            .collect();
        let positions = sheet_positions(&headers)?;
        let mut parsed = Vec::new();
        for (i, row) in rows.enumerate() {
            let cell = |idx: usize| row.get(idx).map(cell_text).unwrap_or_default();
            let (code, name, total) = (cell(positions.0), cell(positions.1), cell(positions.2));
            if code.is_empty() && name.is_empty() && total.is_empty() {
                continue;
            }
            parsed.push(parse_sheet_row(i + 2, &code, &name, &total)?);
        }
        Ok(self.bulk_upsert(parsed, user))
    }

    /// Load the plain-text housing listing, one facility per line. Lines
    /// that do not match are logged and skipped.
    pub fn import_housing_text<R: Read>(&mut self, reader: R, user: &str) -> StoreResult<usize> {
        let mut parsed = Vec::new();
        for (i, line) in BufReader::new(reader).lines().enumerate() {
            let line = line.map_err(|source| StoreError::Io {
                path: "<housing listing>".to_string(),
                source,
            })?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match parse_housing_line(line) {
                Some(f) => parsed.push(f),
                None => warn!("line {} does not match the housing listing format: {}", i + 1, line),
            }
        }
        Ok(self.bulk_upsert(parsed, user))
    }
}

fn cell_text(cell: &DataType) -> String {
    match cell {
        DataType::String(s) => s.trim().to_string(),
        DataType::Int(i) => i.to_string(),
        DataType::Float(f) => normalize_identifier(&f.to_string()),
        DataType::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

fn sheet_positions(headers: &[String]) -> StoreResult<(usize, usize, usize)> {
    let find = |name: &str| headers.iter().position(|h| h == name);
    match (find(CODE_HEADER), find(NAME_HEADER), find(TOTAL_HEADER)) {
        (Some(c), Some(n), Some(t)) => Ok((c, n, t)),
        _ => Err(StoreError::MissingColumns),
    }
}

fn parse_sheet_row(
    line: usize,
    code: &str,
    name: &str,
    total: &str,
) -> StoreResult<FacilityReference> {
    let facility_code = parse_i64_safe(Some(&normalize_identifier(code))).ok_or_else(|| {
        StoreError::InvalidRow {
            line,
            reason: format!("invalid {} '{}'", CODE_HEADER, code),
        }
    })?;
    let total_housing_units =
        parse_count_safe(Some(total)).ok_or_else(|| StoreError::InvalidRow {
            line,
            reason: format!("invalid {} '{}'", TOTAL_HEADER, total),
        })?;
    Ok(FacilityReference {
        facility_code,
        name: name.to_string(),
        total_housing_units,
    })
}

const LINE_PREFIX: &str = "Codigo Unico (cod_renipress) es: ";
const LINE_NAME: &str = " y su nombre de establecimiento de salud (localidad_eess) es: ";
const LINE_TOTAL: &str = " y su total de viviendas es: ";

/// `Codigo Unico (cod_renipress) es: 5060 y su nombre de establecimiento de
/// salud (localidad_eess) es: LA LIBERTAD y su total de viviendas es: 136`
pub fn parse_housing_line(line: &str) -> Option<FacilityReference> {
    let rest = line.strip_prefix(LINE_PREFIX)?;
    let (code, rest) = rest.split_once(LINE_NAME)?;
    let (name, total) = rest.split_once(LINE_TOTAL)?;
    if code.is_empty() || !code.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    if total.is_empty() || !total.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(FacilityReference {
        facility_code: code.parse().ok()?,
        name: name.trim().to_string(),
        total_housing_units: total.parse().ok()?,
    })
}

/// Facility codes present in `records` but unknown to `store`, ascending.
/// Code 0 marks an unparseable cell and is never reported.
pub fn missing_facilities(store: &dyn FacilityLookup, records: &[&InspectionRecord]) -> Vec<i64> {
    let data_codes: BTreeSet<i64> = records
        .iter()
        .map(|r| r.facility_code)
        .filter(|c| *c != 0)
        .collect();
    data_codes
        .into_iter()
        .filter(|c| store.lookup(*c).is_none())
        .collect()
}

static FALLBACK_STORE: Lazy<FacilityStore> = Lazy::new(|| FacilityStore {
    facilities: FALLBACK_TABLE
        .iter()
        .map(|(code, name, total)| {
            (
                *code,
                StoredFacility {
                    cod_renipress: *code,
                    nombre_establecimiento: name.to_string(),
                    total_viviendas: *total,
                    fecha_actualizacion: None,
                    usuario_actualizacion: "sistema".to_string(),
                },
            )
        })
        .collect(),
});

const FALLBACK_TABLE: &[(i64, &str, u64)] = &[
    (5060, "LA LIBERTAD", 136),
    (5044, "GUSTAVO LANATTA LUJAN", 4282),
    (7276, "LA PRIMAVERA", 1822),
    (7435, "MESONES MURO", 426),
    (7006, "SAN FRANCISCO", 188),
    (5126, "MIRAFLORES", 206),
    (5135, "VISTA ALEGRE", 41),
    (5136, "LA VICTORIA", 486),
    (5137, "PUEBLO LIBRE", 50),
    (7225, "MORROPON", 90),
    (7285, "SAN LUIS", 1874),
    (5095, "SAN JUAN DE LA LIBERTAD", 456),
    (5096, "JOSE OLAYA", 280),
    (7258, "SANTA ISABEL", 138),
    (7259, "LA UNION", 100),
    (5066, "EL MILAGRO", 505),
    (1720, "SAN RAFAEL", 804),
    (1744, "LA VICTORIA", 7191),
    (1659, "PROGRESO", 9674),
    (1660, "LA UNION", 4576),
    (1661, "SAN PEDRO", 11249),
    (1662, "VICTOR RAUL", 2309),
    (1663, "TUPAC AMARU", 1799),
    (1664, "LA ESPERANZA", 2004),
    (1715, "SAN JACINTO", 10725),
    (1706, "VILLA MARIA", 5568),
    (1681, "ALTO PERU", 374),
    (2664, "BELLAVISTA", 3738),
    (8828, "SAN MARTIN", 2213),
    (2570, "SANTA ROSA", 350),
    (1345, "SAN JOSE", 90),
    (1368, "SANTA ROSA", 153),
    (23961, "MIRAFLORES", 365),
    (3760, "LECHEMAYO", 716),
    (3749, "PALMAPAMPA", 1924),
    (3764, "SANTA ROSA", 3711),
    (4230, "SAN AGUSTIN", 460),
    (25858, "NUEVO HORIZONTE", 1327),
    (4261, "SANTA ROSA", 579),
    (4274, "CHIRINOS", 813),
    (7411, "BUENOS AIRES", 198),
    (10966, "VISTA FLORIDA", 62),
    (10965, "LA UNION", 275),
    (4267, "SAN IGNACIO", 6329),
    (4270, "NUEVA ESPERANZA", 330),
    (4272, "SAN MARTIN", 50),
    (4273, "SAN ANTONIO", 143),
    (6229, "JOSE OLAYA", 3391),
    (6230, "ACAPULCO", 4412),
    (6233, "JUAN PABLO II", 1855),
    (6234, "SANTA ROSA", 1728),
    (6235, "MIGUEL GRAU", 795),
    (6246, "EL ALAMO", 4059),
    (2355, "LA QUEBRADA", 689),
    (2303, "SANTA ROSA", 56),
    (2442, "PUERTO RICO", 99),
    (8283, "PUEBLO LIBRE", 185),
    (2460, "SANTA MARIA", 456),
    (7113, "NATIVIDAD", 746),
    (32211, "NUEVO PROGRESO", 1916),
    (2468, "SAN MARTIN", 60),
    (760, "LA ESPERANZA", 5637),
    (775, "ACOMAYO", 1152),
    (948, "SAN ISIDRO", 476),
    (19199, "SAN AGUSTIN", 227),
    (954, "PUEBLO NUEVO", 2865),
    (956, "LAS MERCEDES", 272),
    (958, "TUPAC AMARU", 183),
    (27772, "NUEVO PROGRESO", 200),
    (29172, "LA PRIMAVERA", 109),
    (936, "NARANJILLO", 2653),
    (940, "MARONA", 259),
    (949, "RICARDO PALMA", 363),
    (974, "LAS PALMAS", 509),
    (18569, "CONSUELO", 416),
    (28088, "LA LOMA", 220),
    (942, "HUASCAR", 154),
    (922, "SEÑOR DE LOS MILAGROS", 131),
    (11071, "EL DORADO", 233),
    (3442, "SAN AGUSTIN", 2579),
    (7015, "CRUZ BLANCA", 2110),
    (5193, "C.S. EL PARCO", 150),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_table_is_seeded() {
        let store = FacilityStore::fallback();
        assert_eq!(store.len(), 82);
        let f = store.lookup(5044).unwrap();
        assert_eq!(f.name, "GUSTAVO LANATTA LUJAN");
        assert_eq!(f.total_housing_units, 4282);
        assert_eq!(store.total_houses(999), 0);
        assert!(store.lookup(999).is_none());
    }

    #[test]
    fn upsert_and_update_are_visible_immediately() {
        let mut store = FacilityStore::new();
        store.upsert(100, " POSTA NUEVA ", 10, "test");
        assert_eq!(store.total_houses(100), 10);
        assert_eq!(store.lookup(100).unwrap().name, "POSTA NUEVA");
        store.update_total_houses(100, 25, "test").unwrap();
        assert_eq!(store.total_houses(100), 25);
        assert!(matches!(
            store.update_total_houses(7, 1, "test"),
            Err(StoreError::UnknownFacility(7))
        ));
    }

    #[test]
    fn get_all_orders_by_name() {
        let mut store = FacilityStore::new();
        store.upsert(2, "ZETA", 1, "t");
        store.upsert(1, "ALFA", 1, "t");
        store.upsert(3, "ALFA", 1, "t");
        let codes: Vec<i64> = store.get_all().iter().map(|f| f.facility_code).collect();
        assert_eq!(codes, vec![1, 3, 2]);
    }

    #[test]
    fn csv_import_reads_the_bulk_edit_layout() {
        let mut store = FacilityStore::new();
        let data = "Código RENIPRESS,Nombre del Establecimiento,Total de Viviendas\n\
                    5060.0,LA LIBERTAD,140\n\
                    1,NUEVA,0\n";
        assert_eq!(store.import_csv(data.as_bytes(), "excel_import").unwrap(), 2);
        assert_eq!(store.total_houses(5060), 140);
        assert_eq!(store.get(1).unwrap().usuario_actualizacion, "excel_import");
    }

    fn fixture(name: &str) -> std::path::PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("testdata").join(name)
    }

    #[test]
    fn xlsx_import_reads_first_sheet_and_skips_blank_rows() {
        let mut store = FacilityStore::new();
        let n = store.import_xlsx(&fixture("facilities.xlsx"), "excel_import").unwrap();
        assert_eq!(n, 2);
        assert_eq!(store.total_houses(5060), 140);
        assert_eq!(store.lookup(7276).unwrap().name, "LA PRIMAVERA");
        assert_eq!(store.total_houses(7276), 88);
        assert_eq!(store.get(5060).unwrap().usuario_actualizacion, "excel_import");
    }

    #[test]
    fn xlsx_import_requires_the_bulk_edit_headers() {
        let mut store = FacilityStore::new();
        assert!(matches!(
            store.import_xlsx(&fixture("facilities_wrong_headers.xlsx"), "t"),
            Err(StoreError::MissingColumns)
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn csv_import_rejects_wrong_layout_and_bad_numbers() {
        let mut store = FacilityStore::new();
        let wrong = "code,name\n1,A\n";
        assert!(matches!(
            store.import_csv(wrong.as_bytes(), "t"),
            Err(StoreError::MissingColumns)
        ));
        let bad = "Código RENIPRESS,Nombre del Establecimiento,Total de Viviendas\n1,A,many\n";
        assert!(matches!(
            store.import_csv(bad.as_bytes(), "t"),
            Err(StoreError::InvalidRow { line: 2, .. })
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn housing_lines_are_parsed() {
        let line = "Codigo Unico (cod_renipress) es: 5060 y su nombre de establecimiento de salud (localidad_eess) es: LA LIBERTAD y su total de viviendas es: 136";
        let f = parse_housing_line(line).unwrap();
        assert_eq!(f.facility_code, 5060);
        assert_eq!(f.name, "LA LIBERTAD");
        assert_eq!(f.total_housing_units, 136);
        assert!(parse_housing_line("Codigo Unico (cod_renipress) es: x").is_none());

        let mut store = FacilityStore::new();
        let text = format!("{}\n\nbroken line\n", line);
        assert_eq!(store.import_housing_text(text.as_bytes(), "carga_inicial").unwrap(), 1);
    }

    #[test]
    fn json_round_trip_preserves_entries() {
        let dir = std::env::temp_dir().join(format!("facility_store_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("store.json");
        let mut store = FacilityStore::new();
        store.upsert(42, "CUARENTA Y DOS", 420, "t");
        store.save_json(&path).unwrap();
        let loaded = FacilityStore::open(Some(path.as_path())).unwrap();
        assert_eq!(loaded.lookup(42), store.lookup(42));
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_facilities_is_a_set_difference() {
        let store = FacilityStore::fallback();
        let records: Vec<InspectionRecord> = [5060, 999, 0, 999, 1]
            .iter()
            .map(|c| InspectionRecord {
                facility_code: *c,
                ..Default::default()
            })
            .collect();
        let refs: Vec<&InspectionRecord> = records.iter().collect();
        assert_eq!(missing_facilities(&store, &refs), vec![1, 999]);
    }
}
