//! Regional rollups by health network (`red de salud`).
use crate::facilities::FacilityLookup;
use crate::indicators::HouseTally;
use crate::types::{
    ContainerStatus, GeneralMetrics, InspectionRecord, NetworkFacilityRow, NetworkMetrics,
    NetworkReport,
};
use crate::util::{average, percentage_u64};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Network {
    pub name: &'static str,
    pub facility_codes: &'static [i64],
    pub districts: &'static [&'static str],
}

impl Network {
    pub fn contains(&self, facility_code: i64) -> bool {
        self.facility_codes.contains(&facility_code)
    }
}

pub static NETWORKS: [Network; 4] = [
    Network {
        name: "RED UTCUBAMBA",
        facility_codes: &[5060, 5044, 7276, 7435, 7006, 5126, 5135, 5136, 5137],
        districts: &["Bagua Grande", "El Milagro", "Utcubamba"],
    },
    Network {
        name: "RED BAGUA",
        facility_codes: &[7225, 7285, 5095, 5096, 7258, 7259, 5066],
        districts: &["Bagua", "Aramango", "Copallin"],
    },
    Network {
        name: "RED CONDORCANQUI",
        facility_codes: &[1720, 1744, 1659, 1660, 1661, 1662, 1663, 1664, 1715, 1706, 1681],
        districts: &["Santa María de Nieva", "Condorcanqui", "El Cenepa"],
    },
    Network {
        name: "RED CHACHAPOYAS",
        facility_codes: &[2664, 8828, 2570, 1345, 1368, 23961, 3760, 3749],
        districts: &["Chachapoyas", "Asunción", "Balsas", "Cheto"],
    },
];

pub fn network_of(facility_code: i64) -> Option<&'static Network> {
    NETWORKS.iter().find(|n| n.contains(facility_code))
}

fn container_sum(records: &[&InspectionRecord], status: ContainerStatus) -> u64 {
    records.iter().map(|r| r.container_sum(status)).sum()
}

fn active_inspectors(records: &[&InspectionRecord]) -> usize {
    records
        .iter()
        .map(|r| r.inspector_id.as_str())
        .filter(|id| !id.is_empty())
        .collect::<BTreeSet<_>>()
        .len()
}

/// Mean of inspected houses / registered houses over the facilities that
/// appear in `records` and are known to the store.
fn mean_coverage(records: &[&InspectionRecord], store: &dyn FacilityLookup) -> f64 {
    let mut by_facility: BTreeMap<i64, Vec<&InspectionRecord>> = BTreeMap::new();
    for &r in records {
        by_facility.entry(r.facility_code).or_default().push(r);
    }
    let coverages: Vec<f64> = by_facility
        .iter()
        .filter_map(|(code, group)| {
            let facility = store.lookup(*code)?;
            let inspected = HouseTally::of(group.iter().copied()).inspected;
            Some(percentage_u64(inspected, facility.total_housing_units))
        })
        .collect();
    average(&coverages)
}

pub fn general_metrics(
    records: &[&InspectionRecord],
    store: &dyn FacilityLookup,
) -> GeneralMetrics {
    let treated: u64 = records.iter().map(|r| r.treated_containers()).sum();
    GeneralMetrics {
        inspected_houses: HouseTally::of(records.iter().copied()).inspected,
        total_larvicide: records.iter().map(|r| r.larvicide_consumed).sum(),
        treated_containers: treated,
        active_inspectors: active_inspectors(records),
        mean_coverage: mean_coverage(records, store),
        treatment_efficiency: percentage_u64(
            treated,
            container_sum(records, ContainerStatus::Inspected),
        ),
    }
}

/// Metrics for the rows of `records` that belong to `network`.
pub fn network_metrics(
    records: &[&InspectionRecord],
    network: &Network,
    store: &dyn FacilityLookup,
) -> NetworkMetrics {
    let rows: Vec<&InspectionRecord> = records
        .iter()
        .copied()
        .filter(|r| network.contains(r.facility_code))
        .collect();
    NetworkMetrics {
        network: network.name.to_string(),
        districts: network.districts.iter().map(|d| d.to_string()).collect(),
        registered_facilities: network.facility_codes.len(),
        total_records: rows.len(),
        inspected_houses: HouseTally::of(rows.iter().copied()).inspected,
        total_larvicide: rows.iter().map(|r| r.larvicide_consumed).sum(),
        treated_containers: rows.iter().map(|r| r.treated_containers()).sum(),
        active_inspectors: active_inspectors(&rows),
        mean_coverage: mean_coverage(&rows, store),
        positivity_index: percentage_u64(
            container_sum(&rows, ContainerStatus::Positive),
            container_sum(&rows, ContainerStatus::Inspected),
        ),
    }
}

/// Detail lines in network table order, for facilities that are both
/// registered in the store and present in `records`.
fn facility_lines(
    records: &[&InspectionRecord],
    network: &Network,
    store: &dyn FacilityLookup,
) -> Vec<NetworkFacilityRow> {
    network
        .facility_codes
        .iter()
        .filter_map(|&code| {
            let facility = store.lookup(code)?;
            let rows: Vec<&InspectionRecord> = records
                .iter()
                .copied()
                .filter(|r| r.facility_code == code)
                .collect();
            if rows.is_empty() {
                return None;
            }
            let inspected = HouseTally::of(rows.iter().copied()).inspected;
            Some(NetworkFacilityRow {
                network: network.name.to_string(),
                facility_code: code,
                facility_name: facility.name,
                inspected_houses: inspected,
                larvicide: rows.iter().map(|r| r.larvicide_consumed).sum(),
                total_houses: facility.total_housing_units,
                coverage: percentage_u64(inspected, facility.total_housing_units),
            })
        })
        .collect()
}

/// One report per network with at least one row in `records`.
pub fn network_report(
    records: &[&InspectionRecord],
    store: &dyn FacilityLookup,
) -> Vec<NetworkReport> {
    NETWORKS
        .iter()
        .filter(|n| records.iter().any(|r| n.contains(r.facility_code)))
        .map(|n| NetworkReport {
            metrics: network_metrics(records, n, store),
            facilities: facility_lines(records, n, store),
        })
        .collect()
}
