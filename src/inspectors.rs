use crate::indicators::HouseTally;
use crate::types::{
    DailyInspectionRow, Dataset, InspectionRecord, InspectorEntry, InspectorSummary,
    MonthlyProductivityRow, PerformanceBand, Productivity,
};
use crate::util::{average, percentage_u64, YearMonth};
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// First non-empty `nombre_inspector` among `records`, else `Inspector {id}`.
fn display_name(id: &str, records: &[&InspectionRecord]) -> String {
    records
        .iter()
        .map(|r| r.inspector_name.trim())
        .find(|n| !n.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("Inspector {}", id))
}

/// Every inspector in the upload with a display name, ordered by id.
pub fn inspector_directory(dataset: &Dataset) -> Vec<InspectorEntry> {
    let mut by_id: HashMap<&str, Vec<&InspectionRecord>> = HashMap::new();
    for r in &dataset.records {
        by_id.entry(r.inspector_id.as_str()).or_default().push(r);
    }
    dataset
        .inspector_ids()
        .into_iter()
        .map(|id| {
            let records = by_id.get(id.as_str()).map(Vec::as_slice).unwrap_or_default();
            InspectorEntry {
                name: display_name(&id, records),
                id,
            }
        })
        .collect()
}

pub fn records_for<'d>(records: &[&'d InspectionRecord], id: &str) -> Vec<&'d InspectionRecord> {
    records
        .iter()
        .copied()
        .filter(|r| r.inspector_id == id)
        .collect()
}

pub fn inspector_summary(id: &str, records: &[&InspectionRecord]) -> InspectorSummary {
    let tally = HouseTally::of(records.iter().copied());
    let dates: BTreeSet<NaiveDate> = records.iter().filter_map(|r| r.inspection_date).collect();
    let facilities: BTreeSet<&str> = records
        .iter()
        .map(|r| r.facility_name.as_str())
        .filter(|n| !n.is_empty())
        .collect();
    InspectorSummary {
        id: id.to_string(),
        name: display_name(id, records),
        total_records: records.len(),
        inspected_houses: tally.inspected,
        positive_houses: tally.positive,
        aedic_index: tally.aedic_index(),
        total_larvicide: records.iter().map(|r| r.larvicide_consumed).sum(),
        febrile_cases: records.iter().map(|r| r.febrile_case_count).sum(),
        facilities: facilities.len(),
        georeferenced: records
            .iter()
            .filter(|r| r.geo_x.is_some() && r.geo_y.is_some())
            .count(),
        first_date: dates.iter().next().copied(),
        last_date: dates.iter().next_back().copied(),
    }
}

/// Inspected and positive houses, larvicide and Aedic index per field day.
pub fn daily_inspections(records: &[&InspectionRecord]) -> Vec<DailyInspectionRow> {
    let mut days: BTreeMap<NaiveDate, Vec<&InspectionRecord>> = BTreeMap::new();
    for &r in records {
        if let Some(date) = r.inspection_date {
            days.entry(date).or_default().push(r);
        }
    }
    days.into_iter()
        .map(|(date, group)| {
            let tally = HouseTally::of(group.iter().copied());
            DailyInspectionRow {
                date,
                inspected_houses: tally.inspected,
                positive_houses: tally.positive,
                larvicide: group.iter().map(|r| r.larvicide_consumed).sum(),
                aedic_index: tally.aedic_index(),
            }
        })
        .collect()
}

/// Output of one inspector (`records`) set against everyone in `everyone`.
///
/// Only dated rows count towards the inspector's figures. The comparison
/// baseline is the mean number of inspected houses per inspector id over
/// `everyone`, dated or not.
pub fn productivity(records: &[&InspectionRecord], everyone: &[&InspectionRecord]) -> Productivity {
    let dated: Vec<&InspectionRecord> = records
        .iter()
        .copied()
        .filter(|r| r.inspection_date.is_some())
        .collect();
    let working_days = dated
        .iter()
        .filter_map(|r| r.inspection_date)
        .collect::<BTreeSet<_>>()
        .len();
    let inspected = HouseTally::of(dated.iter().copied()).inspected;

    let mut months: BTreeMap<YearMonth, u64> = BTreeMap::new();
    for r in &dated {
        if let Some(date) = r.inspection_date {
            let slot = months.entry(YearMonth::of(date)).or_default();
            if r.is_inspected() {
                *slot += 1;
            }
        }
    }

    let mut per_inspector: HashMap<&str, u64> = HashMap::new();
    for r in everyone.iter().filter(|r| !r.inspector_id.is_empty()) {
        let slot = per_inspector.entry(r.inspector_id.as_str()).or_default();
        if r.is_inspected() {
            *slot += 1;
        }
    }
    let counts: Vec<f64> = per_inspector.values().map(|c| *c as f64).collect();
    let baseline = average(&counts);
    let ratio = if baseline > 0.0 {
        inspected as f64 / baseline
    } else {
        0.0
    };

    Productivity {
        working_days,
        inspected_houses: inspected,
        average_per_day: if working_days > 0 {
            inspected as f64 / working_days as f64
        } else {
            0.0
        },
        efficiency_pct: percentage_u64(inspected, dated.len() as u64),
        monthly: months
            .into_iter()
            .map(|(month, inspected_houses)| MonthlyProductivityRow {
                month: month.to_string(),
                inspected_houses,
            })
            .collect(),
        performance_ratio: ratio,
        band: PerformanceBand::from_ratio(ratio),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::tests::{on, visit};
    use crate::types::columns;
    use crate::util::assert_close;

    fn by(mut r: InspectionRecord, id: &str, name: &str) -> InspectionRecord {
        r.inspector_id = id.to_string();
        r.inspector_name = name.to_string();
        r
    }

    fn dataset(records: Vec<InspectionRecord>) -> Dataset {
        Dataset {
            records,
            columns: [columns::INSPECTOR_ID, columns::INSPECTOR_NAME]
                .iter()
                .map(|c| c.to_string())
                .collect(),
        }
    }

    #[test]
    fn directory_falls_back_to_the_id() {
        let ds = dataset(vec![
            by(visit(1, 1, false), "45879123", ""),
            by(visit(1, 1, false), "45879123", "ROSA DIAZ"),
            by(visit(1, 1, false), "7001", ""),
            by(visit(1, 1, false), "", "SIN DNI"),
        ]);
        let dir = inspector_directory(&ds);
        assert_eq!(dir.len(), 2);
        assert_eq!(dir[0].id, "7001");
        assert_eq!(dir[0].name, "Inspector 7001");
        assert_eq!(dir[1].name, "ROSA DIAZ");
    }

    #[test]
    fn daily_rows_group_by_date() {
        let records = vec![
            on(visit(1, 1, true), 2024, 6, 3),
            on(visit(1, 1, false), 2024, 6, 3),
            on(visit(1, 2, true), 2024, 6, 4),
            visit(1, 1, true),
        ];
        let rows = daily_inspections(&records.iter().collect::<Vec<_>>());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].inspected_houses, 2);
        assert_eq!(rows[0].positive_houses, 1);
        assert_close(rows[0].aedic_index, 50.0);
        assert_eq!(rows[1].inspected_houses, 0);
        assert_close(rows[1].aedic_index, 0.0);
    }

    #[test]
    fn productivity_compares_against_the_mean_inspector() {
        let records = vec![
            by(on(visit(1, 1, false), 2024, 6, 3), "a", ""),
            by(on(visit(1, 1, false), 2024, 6, 3), "a", ""),
            by(on(visit(1, 1, false), 2024, 7, 1), "a", ""),
            by(on(visit(1, 2, false), 2024, 7, 2), "a", ""),
            by(visit(1, 1, false), "a", ""),
            by(on(visit(1, 1, false), 2024, 6, 3), "b", ""),
        ];
        let everyone: Vec<&InspectionRecord> = records.iter().collect();
        let mine = records_for(&everyone, "a");
        assert_eq!(mine.len(), 5);
        let p = productivity(&mine, &everyone);
        assert_eq!(p.working_days, 3);
        assert_eq!(p.inspected_houses, 3);
        assert_close(p.average_per_day, 1.0);
        assert_close(p.efficiency_pct, 75.0);
        assert_eq!(p.monthly.len(), 2);
        assert_eq!(p.monthly[0].month, "2024-06");
        assert_eq!(p.monthly[0].inspected_houses, 2);
        // a: 4 inspected overall, b: 1, mean 2.5
        assert_close(p.performance_ratio, 3.0 / 2.5);
        assert_eq!(p.band, PerformanceBand::Promedio);

        let theirs = records_for(&everyone, "b");
        assert_eq!(productivity(&theirs, &everyone).band, PerformanceBand::Inferior);
    }

    #[test]
    fn summary_spans_the_dated_range() {
        let records = vec![
            by(on(visit(1, 1, true), 2024, 6, 3), "a", "ANA"),
            by(on(visit(2, 3, false), 2024, 6, 9), "a", "ANA"),
        ];
        let subset: Vec<&InspectionRecord> = records.iter().collect();
        let s = inspector_summary("a", &subset);
        assert_eq!(s.name, "ANA");
        assert_eq!(s.facilities, 2);
        assert_eq!(s.georeferenced, 0);
        assert_close(s.aedic_index, 100.0);
        assert_eq!(s.first_date, NaiveDate::from_ymd_opt(2024, 6, 3));
        assert_eq!(s.last_date, NaiveDate::from_ymd_opt(2024, 6, 9));
    }
}
