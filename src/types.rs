use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use tabled::Tabled;

/// Canonical column names of the uploaded inspection export.
pub mod columns {
    pub const FACILITY_CODE: &str = "cod_renipress";
    pub const FACILITY_NAME: &str = "localidad_eess";
    pub const ACTIVITY_TYPE: &str = "tipoActividadInspeccion";
    pub const HOUSE_STATUS: &str = "atencion_vivienda_indicador";
    pub const HOUSE_POSITIVE: &str = "viv_positiva";
    pub const LARVICIDE: &str = "consumo_larvicida";
    pub const FEBRILE: &str = "febriles";
    pub const INSPECTOR_ID: &str = "usuario_registra";
    pub const INSPECTOR_NAME: &str = "nombre_inspector";
    pub const INSPECTION_DATE: &str = "fecha_inspeccion";
    pub const CREATED_AT: &str = "_createdAt_x";
    pub const ADDRESS: &str = "dirección";
    pub const GEO_X: &str = "georeferencia_X";
    pub const GEO_Y: &str = "georeferencia_Y";
    /// Derived from `fecha_inspeccion` by the loader.
    pub const YEAR: &str = "year";

    // Cerco follow-up columns, read from `attributes`.
    pub const DEPARTMENT: &str = "departamento_x";
    pub const BLOCK: &str = "codigo_manzana";
    pub const RECOVERED: &str = "recuperada";
    pub const RECOVERY_DATE: &str = "recuperacion_fecha";
    pub const RECOVERY_USER: &str = "recuperacion_usuario_asignado";
}

/// Outcome of a house visit (`atencion_vivienda_indicador`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HouseStatus {
    Inspected,
    Closed,
    Reluctant,
    Uninhabited,
    Other(i64),
}

impl HouseStatus {
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => HouseStatus::Inspected,
            2 => HouseStatus::Closed,
            3 => HouseStatus::Reluctant,
            4 => HouseStatus::Uninhabited,
            other => HouseStatus::Other(other),
        }
    }

    pub fn code(self) -> i64 {
        match self {
            HouseStatus::Inspected => 1,
            HouseStatus::Closed => 2,
            HouseStatus::Reluctant => 3,
            HouseStatus::Uninhabited => 4,
            HouseStatus::Other(code) => code,
        }
    }

    pub fn label(self) -> Cow<'static, str> {
        match self {
            HouseStatus::Inspected => Cow::Borrowed("Vivienda Inspeccionada"),
            HouseStatus::Closed => Cow::Borrowed("Vivienda Cerrada"),
            HouseStatus::Reluctant => Cow::Borrowed("Vivienda Renuente"),
            HouseStatus::Uninhabited => Cow::Borrowed("Vivienda Deshabitada"),
            HouseStatus::Other(code) => Cow::Owned(format!("Código {}", code)),
        }
    }
}

/// Dashboard module a record belongs to (`tipoActividadInspeccion`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityType {
    Vigilancia,
    ControlLarvario,
    Cerco,
}

impl ActivityType {
    pub fn as_str(self) -> &'static str {
        match self {
            ActivityType::Vigilancia => "vigilancia",
            ActivityType::ControlLarvario => "control larvario",
            ActivityType::Cerco => "cerco",
        }
    }

    pub fn matches(self, raw: &str) -> bool {
        raw.trim().eq_ignore_ascii_case(self.as_str())
    }
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        match lowered.replace(['_', '-'], " ").as_str() {
            "vigilancia" => Ok(ActivityType::Vigilancia),
            "control larvario" => Ok(ActivityType::ControlLarvario),
            "cerco" => Ok(ActivityType::Cerco),
            _ => Err(format!(
                "unknown activity type '{}' (expected vigilancia, control larvario or cerco)",
                s
            )),
        }
    }
}

/// Sub-count suffixes of the container matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStatus {
    Inspected,
    Positive,
    ChemicalTreatment,
    PhysicalTreatment,
    Discarded,
}

impl ContainerStatus {
    pub const ALL: [ContainerStatus; 5] = [
        ContainerStatus::Inspected,
        ContainerStatus::Positive,
        ContainerStatus::ChemicalTreatment,
        ContainerStatus::PhysicalTreatment,
        ContainerStatus::Discarded,
    ];

    pub fn suffix(self) -> &'static str {
        match self {
            ContainerStatus::Inspected => "_I",
            ContainerStatus::Positive => "_P",
            ContainerStatus::ChemicalTreatment => "_TQ",
            ContainerStatus::PhysicalTreatment => "_TF",
            ContainerStatus::Discarded => "_D",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerType {
    pub label: &'static str,
    pub prefix: &'static str,
    pub has_discarded: bool,
}

impl ContainerType {
    const fn new(label: &'static str, prefix: &'static str, has_discarded: bool) -> Self {
        ContainerType { label, prefix, has_discarded }
    }

    pub fn has_status(&self, status: ContainerStatus) -> bool {
        status != ContainerStatus::Discarded || self.has_discarded
    }

    pub fn column(&self, status: ContainerStatus) -> String {
        format!("{}{}", self.prefix, status.suffix())
    }

    /// Every column this type contributes to the schema.
    pub fn columns(&self) -> Vec<String> {
        ContainerStatus::ALL
            .iter()
            .filter(|s| self.has_status(**s))
            .map(|s| self.column(*s))
            .collect()
    }
}

pub const CONTAINER_TYPES: [ContainerType; 10] = [
    ContainerType::new("Tanque Alto", "tanque_alto", false),
    ContainerType::new("Tanque Bajo", "tanque_bajo", false),
    ContainerType::new("Barril/Cilindro", "barril_cilindro", false),
    ContainerType::new("Sansón/Bidón", "sanson_bidon", false),
    ContainerType::new("Baldes/Bateas/Tinajas", "baldes_bateas_tinajas", false),
    ContainerType::new("Llantas", "llantas", false),
    ContainerType::new("Floreros/Maceteros", "floreros_maceteros", false),
    ContainerType::new("Latas/Botellas", "latas_botellas", true),
    ContainerType::new("Otros", "otros", true),
    ContainerType::new("Inservibles", "inservibles", false),
];

/// Sub-counts of one container type on one visit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContainerCounts {
    pub inspected: u64,
    pub positive: u64,
    pub chemical: u64,
    pub physical: u64,
    pub discarded: u64,
}

impl ContainerCounts {
    pub fn get(&self, status: ContainerStatus) -> u64 {
        match status {
            ContainerStatus::Inspected => self.inspected,
            ContainerStatus::Positive => self.positive,
            ContainerStatus::ChemicalTreatment => self.chemical,
            ContainerStatus::PhysicalTreatment => self.physical,
            ContainerStatus::Discarded => self.discarded,
        }
    }

    pub fn set(&mut self, status: ContainerStatus, value: u64) {
        match status {
            ContainerStatus::Inspected => self.inspected = value,
            ContainerStatus::Positive => self.positive = value,
            ContainerStatus::ChemicalTreatment => self.chemical = value,
            ContainerStatus::PhysicalTreatment => self.physical = value,
            ContainerStatus::Discarded => self.discarded = value,
        }
    }

    pub fn treated(&self) -> u64 {
        self.chemical + self.physical
    }

    pub fn total(&self) -> u64 {
        self.inspected + self.positive + self.chemical + self.physical + self.discarded
    }
}

/// One house visit after normalization. Every field is populated; missing
/// cells were already replaced by defaults in the loader.
#[derive(Debug, Clone, Default)]
pub struct InspectionRecord {
    pub facility_code: i64,
    pub facility_name: String,
    pub inspection_date: Option<NaiveDate>,
    /// Full `fecha_inspeccion` timestamp; `inspection_date` is its date.
    pub inspected_at: Option<NaiveDateTime>,
    pub year: Option<i32>,
    pub activity_type: String,
    pub house_status: i64,
    pub house_is_positive: bool,
    pub larvicide_consumed: f64,
    pub febrile_case_count: u64,
    pub inspector_id: String,
    pub inspector_name: String,
    /// Indexed like `CONTAINER_TYPES`.
    pub containers: [ContainerCounts; 10],
    pub geo_x: Option<f64>,
    pub geo_y: Option<f64>,
    pub created_at: Option<NaiveDateTime>,
    pub address: String,
    pub attributes: BTreeMap<String, String>,
}

impl InspectionRecord {
    pub fn status(&self) -> HouseStatus {
        HouseStatus::from_code(self.house_status)
    }

    pub fn is_inspected(&self) -> bool {
        self.status() == HouseStatus::Inspected
    }

    /// Positivity only counts on an inspected house.
    pub fn is_positive_house(&self) -> bool {
        self.is_inspected() && self.house_is_positive
    }

    pub fn container_sum(&self, status: ContainerStatus) -> u64 {
        self.containers.iter().map(|c| c.get(status)).sum()
    }

    pub fn treated_containers(&self) -> u64 {
        self.containers.iter().map(ContainerCounts::treated).sum()
    }

    /// Canonical text value of a column, as used by attribute filters.
    pub fn column_value(&self, column: &str) -> Option<Cow<'_, str>> {
        let value = match column {
            columns::FACILITY_CODE => Cow::Owned(self.facility_code.to_string()),
            columns::FACILITY_NAME => Cow::Borrowed(self.facility_name.as_str()),
            columns::ACTIVITY_TYPE => Cow::Borrowed(self.activity_type.as_str()),
            columns::HOUSE_STATUS => Cow::Owned(self.house_status.to_string()),
            columns::HOUSE_POSITIVE => {
                Cow::Borrowed(if self.house_is_positive { "1" } else { "0" })
            }
            columns::INSPECTOR_ID => Cow::Borrowed(self.inspector_id.as_str()),
            columns::INSPECTOR_NAME => Cow::Borrowed(self.inspector_name.as_str()),
            columns::ADDRESS => Cow::Borrowed(self.address.as_str()),
            columns::YEAR => Cow::Owned(self.year?.to_string()),
            columns::INSPECTION_DATE => Cow::Owned(self.inspection_date?.to_string()),
            other => Cow::Borrowed(self.attributes.get(other)?.as_str()),
        };
        Some(value)
    }
}

/// The canonical in-memory dataset, built once per upload.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub records: Vec<InspectionRecord>,
    /// Header names present in the upload, plus derived columns.
    pub columns: BTreeSet<String>,
}

impl Dataset {
    pub fn has_column(&self, column: &str) -> bool {
        self.columns.contains(column)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn all(&self) -> Vec<&InspectionRecord> {
        self.records.iter().collect()
    }
}

#[derive(Debug, Clone, Serialize, Tabled, PartialEq)]
pub struct FacilityReference {
    #[tabled(rename = "Código RENIPRESS")]
    pub facility_code: i64,
    #[tabled(rename = "Nombre del Establecimiento")]
    pub name: String,
    #[tabled(rename = "Total de Viviendas")]
    pub total_housing_units: u64,
}

#[derive(Debug, Serialize, Tabled, Clone, PartialEq)]
pub struct AedicIndexRow {
    #[serde(rename = "cod_renipress")]
    #[tabled(rename = "cod_renipress")]
    pub facility_code: i64,
    #[serde(rename = "localidad_eess")]
    #[tabled(rename = "localidad_eess")]
    pub facility_name: String,
    pub total_houses: u64,
    pub inspected_houses: u64,
    #[serde(rename = "viviendas_positivas")]
    #[tabled(rename = "viviendas_positivas")]
    pub positive_houses: u64,
    #[tabled(display_with = "crate::util::display_f2")]
    pub aedic_index: f64,
}

#[derive(Debug, Serialize, Tabled, Clone, PartialEq)]
pub struct ContainerIndexRow {
    #[serde(rename = "cod_renipress")]
    #[tabled(rename = "cod_renipress")]
    pub facility_code: i64,
    #[serde(rename = "localidad_eess")]
    #[tabled(rename = "localidad_eess")]
    pub facility_name: String,
    pub containers_inspected: u64,
    pub containers_positive: u64,
    #[tabled(display_with = "crate::util::display_f2")]
    pub container_index: f64,
}

#[derive(Debug, Serialize, Tabled, Clone, PartialEq)]
pub struct BreteauIndexRow {
    #[serde(rename = "cod_renipress")]
    #[tabled(rename = "cod_renipress")]
    pub facility_code: i64,
    #[serde(rename = "localidad_eess")]
    #[tabled(rename = "localidad_eess")]
    pub facility_name: String,
    pub houses_inspected: u64,
    pub containers_positive: u64,
    #[tabled(display_with = "crate::util::display_f2")]
    pub breteau_index: f64,
}

#[derive(Debug, Serialize, Tabled, Clone, PartialEq)]
pub struct CoverageRow {
    #[serde(rename = "cod_renipress")]
    #[tabled(rename = "cod_renipress")]
    pub facility_code: i64,
    #[serde(rename = "localidad_eess")]
    #[tabled(rename = "localidad_eess")]
    pub facility_name: String,
    pub total_houses: u64,
    #[serde(rename = "viv_inspeccionadas")]
    #[tabled(rename = "viv_inspeccionadas")]
    pub inspected: u64,
    #[serde(rename = "viv_cerradas")]
    #[tabled(rename = "viv_cerradas")]
    pub closed: u64,
    #[serde(rename = "viv_renuentes")]
    #[tabled(rename = "viv_renuentes")]
    pub reluctant: u64,
    #[serde(rename = "viv_deshabitadas")]
    #[tabled(rename = "viv_deshabitadas")]
    pub uninhabited: u64,
    #[serde(rename = "viv_no_intervenidas")]
    #[tabled(rename = "viv_no_intervenidas")]
    pub non_intervened: u64,
    /// Attended houses beyond the registered total; hidden by the clamp above.
    #[serde(rename = "exceso_registrado")]
    #[tabled(rename = "exceso_registrado")]
    pub excess: u64,
    #[serde(rename = "porc_inspeccionadas")]
    #[tabled(rename = "porc_inspeccionadas", display_with = "crate::util::display_f1")]
    pub pct_inspected: f64,
    #[serde(rename = "porc_cerradas")]
    #[tabled(rename = "porc_cerradas", display_with = "crate::util::display_f1")]
    pub pct_closed: f64,
    #[serde(rename = "porc_renuentes")]
    #[tabled(rename = "porc_renuentes", display_with = "crate::util::display_f1")]
    pub pct_reluctant: f64,
    #[serde(rename = "porc_deshabitadas")]
    #[tabled(rename = "porc_deshabitadas", display_with = "crate::util::display_f1")]
    pub pct_uninhabited: f64,
    #[serde(rename = "porc_no_intervenidas")]
    #[tabled(rename = "porc_no_intervenidas", display_with = "crate::util::display_f1")]
    pub pct_non_intervened: f64,
    #[serde(rename = "cobertura_total")]
    #[tabled(rename = "cobertura_total", display_with = "crate::util::display_f1")]
    pub coverage_total: f64,
}

#[derive(Debug, Serialize, Tabled, Clone, PartialEq)]
pub struct LarvicideRow {
    #[serde(rename = "cod_renipress")]
    #[tabled(rename = "cod_renipress")]
    pub facility_code: i64,
    #[serde(rename = "localidad_eess")]
    #[tabled(rename = "localidad_eess")]
    pub facility_name: String,
    #[serde(rename = "consumo_larvicida")]
    #[tabled(rename = "consumo_larvicida", display_with = "crate::util::display_f2")]
    pub larvicide: f64,
}

#[derive(Debug, Serialize, Tabled, Clone, PartialEq)]
pub struct FebrileRow {
    #[serde(rename = "cod_renipress")]
    #[tabled(rename = "cod_renipress")]
    pub facility_code: i64,
    #[serde(rename = "localidad_eess")]
    #[tabled(rename = "localidad_eess")]
    pub facility_name: String,
    #[serde(rename = "febriles")]
    #[tabled(rename = "febriles")]
    pub febrile_cases: u64,
}

#[derive(Debug, Serialize, Tabled, Clone, PartialEq)]
pub struct ContainerStatsRow {
    pub container_type: String,
    #[serde(rename = "Inspeccionado(s)")]
    #[tabled(rename = "Inspeccionado(s)")]
    pub inspected: u64,
    #[serde(rename = "Positivo(s)")]
    #[tabled(rename = "Positivo(s)")]
    pub positive: u64,
    #[serde(rename = "Tratamiento Químico")]
    #[tabled(rename = "Tratamiento Químico")]
    pub chemical: u64,
    #[serde(rename = "Tratamiento Físico")]
    #[tabled(rename = "Tratamiento Físico")]
    pub physical: u64,
    /// Only tracked for types that record disused containers.
    #[serde(rename = "Desuso(s)")]
    #[tabled(rename = "Desuso(s)", display_with = "crate::util::display_opt_u64")]
    pub discarded: Option<u64>,
}

#[derive(Debug, Serialize, Tabled, Clone, PartialEq)]
pub struct ContainerTreatmentRow {
    pub container_type: String,
    #[serde(rename = "Tratamiento Químico")]
    #[tabled(rename = "Tratamiento Químico")]
    pub chemical: u64,
    #[serde(rename = "Tratamiento Físico")]
    #[tabled(rename = "Tratamiento Físico")]
    pub physical: u64,
}

#[derive(Debug, Serialize, Tabled, Clone, PartialEq)]
pub struct ContainerFrequencyRow {
    pub container_type: String,
    pub total: u64,
}

#[derive(Debug, Serialize, Tabled, Clone, PartialEq)]
pub struct MonthlyTrendRow {
    #[serde(rename = "month_year")]
    #[tabled(rename = "month_year")]
    pub month: String,
    #[serde(rename = "atencion_vivienda_indicador")]
    #[tabled(rename = "viviendas_inspeccionadas")]
    pub inspected_houses: u64,
    #[serde(rename = "viv_positiva")]
    #[tabled(rename = "viviendas_positivas")]
    pub positive_houses: u64,
    #[serde(rename = "consumo_larvicida")]
    #[tabled(rename = "consumo_larvicida", display_with = "crate::util::display_f2")]
    pub larvicide: f64,
    #[tabled(display_with = "crate::util::display_f2")]
    pub aedic_index: f64,
}

#[derive(Debug, Serialize, Tabled, Clone, PartialEq)]
pub struct WeeklySurveillanceRow {
    #[serde(rename = "semana_inicio")]
    #[tabled(rename = "semana_inicio")]
    pub week_start: NaiveDate,
    #[serde(rename = "dias_vigilancia")]
    #[tabled(rename = "dias_vigilancia")]
    pub surveillance_days: u64,
    #[serde(rename = "inspecciones_totales")]
    #[tabled(rename = "inspecciones_totales")]
    pub total_inspections: u64,
    #[serde(rename = "viviendas_positivas")]
    #[tabled(rename = "viviendas_positivas")]
    pub positive_houses: u64,
    pub week_display: String,
    #[tabled(display_with = "crate::util::display_f2")]
    pub intensity: f64,
}

#[derive(Debug, Serialize, Tabled, Clone, PartialEq)]
pub struct FacilityMonthAedicRow {
    #[serde(rename = "establecimiento_id")]
    #[tabled(rename = "establecimiento_id")]
    pub facility_code: i64,
    #[serde(rename = "establecimiento")]
    #[tabled(rename = "establecimiento")]
    pub facility_name: String,
    #[serde(rename = "mes_year")]
    #[tabled(rename = "mes_year")]
    pub month: String,
    #[serde(rename = "viviendas_inspeccionadas")]
    #[tabled(rename = "viviendas_inspeccionadas")]
    pub inspected_houses: u64,
    #[serde(rename = "viviendas_positivas")]
    #[tabled(rename = "viviendas_positivas")]
    pub positive_houses: u64,
    #[serde(rename = "indice_aedico")]
    #[tabled(rename = "indice_aedico", display_with = "crate::util::display_f2")]
    pub aedic_index: f64,
}

#[derive(Debug, Serialize, Tabled, Clone, PartialEq)]
pub struct FacilityPerformanceRow {
    #[serde(rename = "cod_renipress")]
    #[tabled(rename = "cod_renipress")]
    pub facility_code: i64,
    #[serde(rename = "localidad_eess")]
    #[tabled(rename = "localidad_eess")]
    pub facility_name: String,
    pub total_activities: u64,
    #[tabled(display_with = "crate::util::display_f2")]
    pub larvicide_used: f64,
    pub containers_treated: u64,
    #[tabled(display_with = "crate::util::display_f1")]
    pub efficiency_rating: f64,
}

#[derive(Debug, Serialize, Tabled, Clone, PartialEq)]
pub struct CercoEffectivenessRow {
    #[serde(rename = "cod_renipress")]
    #[tabled(rename = "cod_renipress")]
    pub facility_code: i64,
    #[serde(rename = "localidad_eess")]
    #[tabled(rename = "localidad_eess")]
    pub facility_name: String,
    #[serde(rename = "total_houses")]
    #[tabled(rename = "total_houses")]
    pub attended_houses: u64,
    pub positive_houses: u64,
    #[serde(rename = "effectiveness_percentage")]
    #[tabled(rename = "effectiveness_percentage", display_with = "crate::util::display_f1")]
    pub effectiveness_pct: f64,
    #[tabled(display_with = "crate::util::display_f1")]
    pub intervention_score: f64,
}

#[derive(Debug, Serialize, Tabled, Clone, PartialEq)]
pub struct CercoMonthlyRow {
    #[serde(rename = "month_year")]
    #[tabled(rename = "month_year")]
    pub month: String,
    pub detections: u64,
    #[serde(rename = "total_houses")]
    #[tabled(rename = "total_houses")]
    pub attended_houses: u64,
    #[serde(rename = "effectiveness")]
    #[tabled(rename = "effectiveness", display_with = "crate::util::display_f1")]
    pub effectiveness_pct: f64,
    #[serde(rename = "coverage")]
    #[tabled(rename = "coverage", display_with = "crate::util::display_f1")]
    pub coverage_pct: f64,
}

#[derive(Debug, Serialize, Tabled, Clone, PartialEq)]
pub struct GeographicCoverageRow {
    #[serde(rename = "departamento_x")]
    #[tabled(rename = "departamento_x")]
    pub department: String,
    pub facilities: usize,
    #[serde(rename = "houses")]
    #[tabled(rename = "houses")]
    pub attended_houses: u64,
    pub positive_houses: u64,
    #[serde(rename = "effectiveness")]
    #[tabled(rename = "effectiveness", display_with = "crate::util::display_f1")]
    pub effectiveness_pct: f64,
}

#[derive(Debug, Serialize, Tabled, Clone, PartialEq)]
pub struct InterventionDensityRow {
    #[serde(rename = "cod_renipress")]
    #[tabled(rename = "cod_renipress")]
    pub facility_code: i64,
    #[serde(rename = "localidad_eess")]
    #[tabled(rename = "localidad_eess")]
    pub facility_name: String,
    #[serde(rename = "manzanas")]
    #[tabled(rename = "manzanas")]
    pub blocks: usize,
    #[serde(rename = "total_houses")]
    #[tabled(rename = "total_houses")]
    pub attended_houses: u64,
    #[tabled(display_with = "crate::util::display_f2")]
    pub intervention_density: f64,
    #[serde(rename = "effectiveness")]
    #[tabled(rename = "effectiveness", display_with = "crate::util::display_f1")]
    pub effectiveness_pct: f64,
}

#[derive(Debug, Serialize, Tabled, Clone, PartialEq)]
pub struct RecoveryDetailRow {
    #[serde(rename = "localidad_eess")]
    #[tabled(rename = "localidad_eess")]
    pub facility_name: String,
    #[serde(rename = "dirección")]
    #[tabled(rename = "dirección")]
    pub address: String,
    #[serde(rename = "fecha_inspeccion")]
    #[tabled(rename = "fecha_inspeccion", display_with = "crate::util::display_opt_date")]
    pub inspection_date: Option<NaiveDate>,
    #[serde(rename = "recuperacion_fecha")]
    #[tabled(rename = "recuperacion_fecha", display_with = "crate::util::display_opt_date")]
    pub recovery_date: Option<NaiveDate>,
    #[serde(rename = "recuperacion_usuario_asignado")]
    #[tabled(rename = "recuperacion_usuario_asignado")]
    pub assigned_user: String,
}

/// Follow-up of positive houses marked `recuperada`. `None` from the engine
/// when the export has no recovery column at all.
#[derive(Debug, Serialize, Clone, Default, PartialEq)]
pub struct RecoveryMetrics {
    pub recovered_houses: u64,
    pub positive_houses: u64,
    pub recovery_rate: f64,
    /// Mean whole days from inspection to recovery.
    pub avg_recovery_time: f64,
    pub details: Vec<RecoveryDetailRow>,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct InspectionSummary {
    pub inspected: u64,
    pub closed: u64,
    pub reluctant: u64,
    pub uninhabited: u64,
    pub positive_houses: u64,
    pub positivity_pct: f64,
}

/// Mean and maximum of each index across facilities; `None` with no facilities.
#[derive(Debug, Serialize, Clone, Default, PartialEq)]
pub struct EntomologicalSummary {
    pub ia_mean: Option<f64>,
    pub ia_max: Option<f64>,
    pub ic_mean: Option<f64>,
    pub ic_max: Option<f64>,
    pub ib_mean: Option<f64>,
    pub ib_max: Option<f64>,
}

#[derive(Debug, Serialize, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContainerTotals {
    pub inspected: u64,
    pub positive: u64,
}

#[derive(Debug, Serialize, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreatmentStatistics {
    pub chemical: u64,
    pub physical: u64,
}

#[derive(Debug, Serialize, Clone, Default, PartialEq)]
pub struct CercoIndicators {
    pub detection_rate: f64,
    pub coverage_rate: f64,
    pub avg_response_time: f64,
    pub reintervention_rate: f64,
}

#[derive(Debug, Serialize)]
pub struct ReportSummary {
    pub activity_type: Option<String>,
    pub total_records: usize,
    pub facilities: usize,
    pub active_inspectors: usize,
    pub total_larvicide: f64,
    pub total_febrile_cases: u64,
    pub treated_containers: u64,
    pub containers: ContainerTotals,
    pub treatment: TreatmentStatistics,
    pub inspection: InspectionSummary,
    pub entomological: EntomologicalSummary,
    pub cerco: CercoIndicators,
    pub recovery: Option<RecoveryMetrics>,
    pub missing_facilities: Vec<i64>,
}

#[derive(Debug, Serialize, Tabled, Clone, PartialEq)]
pub struct InspectorEntry {
    #[serde(rename = "usuario_registra")]
    #[tabled(rename = "usuario_registra")]
    pub id: String,
    #[serde(rename = "nombre_inspector")]
    #[tabled(rename = "nombre_inspector")]
    pub name: String,
}

/// Headline figures for one inspector over the current subset.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct InspectorSummary {
    pub id: String,
    pub name: String,
    pub total_records: usize,
    pub inspected_houses: u64,
    pub positive_houses: u64,
    pub aedic_index: f64,
    pub total_larvicide: f64,
    pub febrile_cases: u64,
    pub facilities: usize,
    /// Visits carrying both georeference coordinates.
    pub georeferenced: usize,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
}

#[derive(Debug, Serialize, Tabled, Clone, PartialEq)]
pub struct DailyInspectionRow {
    #[serde(rename = "Fecha")]
    #[tabled(rename = "Fecha")]
    pub date: NaiveDate,
    #[serde(rename = "Viviendas_Inspeccionadas")]
    #[tabled(rename = "Viviendas_Inspeccionadas")]
    pub inspected_houses: u64,
    #[serde(rename = "Viviendas_Positivas")]
    #[tabled(rename = "Viviendas_Positivas")]
    pub positive_houses: u64,
    #[serde(rename = "Consumo_Larvicida")]
    #[tabled(rename = "Consumo_Larvicida", display_with = "crate::util::display_f2")]
    pub larvicide: f64,
    #[serde(rename = "Indice_Aedico")]
    #[tabled(rename = "Indice_Aedico", display_with = "crate::util::display_f2")]
    pub aedic_index: f64,
}

#[derive(Debug, Serialize, Tabled, Clone, PartialEq)]
pub struct MonthlyProductivityRow {
    #[serde(rename = "mes")]
    #[tabled(rename = "mes")]
    pub month: String,
    #[serde(rename = "viviendas_inspeccionadas")]
    #[tabled(rename = "viviendas_inspeccionadas")]
    pub inspected_houses: u64,
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum PerformanceBand {
    Superior,
    Promedio,
    Inferior,
}

impl PerformanceBand {
    /// Band for an inspector's output relative to the per-inspector mean.
    pub fn from_ratio(ratio: f64) -> Self {
        if ratio > 1.2 {
            PerformanceBand::Superior
        } else if ratio > 0.8 {
            PerformanceBand::Promedio
        } else {
            PerformanceBand::Inferior
        }
    }
}

impl fmt::Display for PerformanceBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PerformanceBand::Superior => "Superior",
            PerformanceBand::Promedio => "Promedio",
            PerformanceBand::Inferior => "Inferior",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct Productivity {
    pub working_days: usize,
    pub inspected_houses: u64,
    pub average_per_day: f64,
    pub efficiency_pct: f64,
    pub monthly: Vec<MonthlyProductivityRow>,
    pub performance_ratio: f64,
    pub band: PerformanceBand,
}

#[derive(Debug, Serialize, Clone, Default, PartialEq)]
pub struct GeneralMetrics {
    pub inspected_houses: u64,
    pub total_larvicide: f64,
    pub treated_containers: u64,
    pub active_inspectors: usize,
    pub mean_coverage: f64,
    pub treatment_efficiency: f64,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct NetworkMetrics {
    pub network: String,
    pub districts: Vec<String>,
    pub registered_facilities: usize,
    pub total_records: usize,
    pub inspected_houses: u64,
    pub total_larvicide: f64,
    pub treated_containers: u64,
    pub active_inspectors: usize,
    pub mean_coverage: f64,
    pub positivity_index: f64,
}

#[derive(Debug, Serialize, Tabled, Clone, PartialEq)]
pub struct NetworkFacilityRow {
    #[serde(rename = "red")]
    #[tabled(rename = "red")]
    pub network: String,
    #[serde(rename = "cod_renipress")]
    #[tabled(rename = "cod_renipress")]
    pub facility_code: i64,
    #[serde(rename = "establecimiento")]
    #[tabled(rename = "establecimiento")]
    pub facility_name: String,
    #[serde(rename = "viviendas_inspeccionadas")]
    #[tabled(rename = "viviendas_inspeccionadas")]
    pub inspected_houses: u64,
    #[serde(rename = "consumo_larvicida")]
    #[tabled(rename = "consumo_larvicida", display_with = "crate::util::display_f1")]
    pub larvicide: f64,
    pub total_houses: u64,
    #[serde(rename = "cobertura")]
    #[tabled(rename = "cobertura", display_with = "crate::util::display_f1")]
    pub coverage: f64,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct NetworkReport {
    pub metrics: NetworkMetrics,
    pub facilities: Vec<NetworkFacilityRow>,
}
