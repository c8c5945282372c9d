//! Entomological and operational indicators over a filtered set of visits.
//!
//! Every function is total: an empty subset yields empty tables and zero
//! scalars, and every ratio with a zero denominator is 0. Per-facility tables
//! come out in ascending `cod_renipress` order unless documented otherwise.
use crate::facilities::FacilityLookup;
use crate::types::{
    columns, AedicIndexRow, BreteauIndexRow, CercoEffectivenessRow, CercoIndicators,
    CercoMonthlyRow, ContainerFrequencyRow, ContainerIndexRow, ContainerStatsRow,
    ContainerStatus, ContainerTotals, ContainerTreatmentRow, CoverageRow, EntomologicalSummary,
    FacilityMonthAedicRow, FacilityPerformanceRow, FebrileRow, GeographicCoverageRow, HouseStatus,
    InspectionRecord, InspectionSummary, InterventionDensityRow, LarvicideRow, MonthlyTrendRow,
    RecoveryDetailRow, RecoveryMetrics, TreatmentStatistics, WeeklySurveillanceRow,
    CONTAINER_TYPES,
};
use crate::util::{
    average, elapsed_days, maximum, normalize_identifier, parse_datetime_safe, parse_f64_safe,
    percentage, percentage_u64, round2, week_label, week_start, YearMonth,
};
use chrono::NaiveDate;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// House counts by visit outcome, positivity gated on inspection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HouseTally {
    pub inspected: u64,
    pub closed: u64,
    pub reluctant: u64,
    pub uninhabited: u64,
    pub positive: u64,
}

impl HouseTally {
    pub fn of<'r, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'r InspectionRecord>,
    {
        let mut t = HouseTally::default();
        for r in records {
            match r.status() {
                HouseStatus::Inspected => t.inspected += 1,
                HouseStatus::Closed => t.closed += 1,
                HouseStatus::Reluctant => t.reluctant += 1,
                HouseStatus::Uninhabited => t.uninhabited += 1,
                HouseStatus::Other(_) => {}
            }
            if r.is_positive_house() {
                t.positive += 1;
            }
        }
        t
    }

    /// Houses with any of the four recorded outcomes.
    pub fn attended(&self) -> u64 {
        self.inspected + self.closed + self.reluctant + self.uninhabited
    }

    pub fn aedic_index(&self) -> f64 {
        percentage_u64(self.positive, self.inspected)
    }

    /// Share of attended houses that were not positive.
    pub fn effectiveness(&self) -> f64 {
        let attended = self.attended();
        percentage_u64(attended.saturating_sub(self.positive), attended)
    }
}

fn group_by_facility<'r>(
    records: &[&'r InspectionRecord],
) -> BTreeMap<i64, Vec<&'r InspectionRecord>> {
    let mut groups: BTreeMap<i64, Vec<&InspectionRecord>> = BTreeMap::new();
    for &r in records {
        groups.entry(r.facility_code).or_default().push(r);
    }
    groups
}

/// First non-empty name seen in the group. Spelling variants of one code are
/// not reconciled.
fn facility_name(group: &[&InspectionRecord]) -> String {
    group
        .iter()
        .map(|r| r.facility_name.as_str())
        .find(|n| !n.is_empty())
        .unwrap_or_default()
        .to_string()
}

fn container_sum(records: &[&InspectionRecord], status: ContainerStatus) -> u64 {
    records.iter().map(|r| r.container_sum(status)).sum()
}

fn larvicide_sum(records: &[&InspectionRecord]) -> f64 {
    records.iter().map(|r| r.larvicide_consumed).sum()
}

/// Computes indicators against an injected facility reference. Lookups go
/// to the store on every call so edits show up in the next computation.
pub struct IndicatorEngine<'a> {
    facilities: &'a dyn FacilityLookup,
}

impl<'a> IndicatorEngine<'a> {
    pub fn new(facilities: &'a dyn FacilityLookup) -> Self {
        IndicatorEngine { facilities }
    }

    /// Aedic (house) index: positive houses / inspected houses × 100.
    pub fn aedic_index(&self, records: &[&InspectionRecord]) -> Vec<AedicIndexRow> {
        group_by_facility(records)
            .into_iter()
            .map(|(code, group)| {
                let tally = HouseTally::of(group.iter().copied());
                AedicIndexRow {
                    facility_code: code,
                    facility_name: facility_name(&group),
                    total_houses: self.facilities.total_houses(code),
                    inspected_houses: tally.inspected,
                    positive_houses: tally.positive,
                    aedic_index: round2(tally.aedic_index()),
                }
            })
            .collect()
    }

    /// Container index: positive containers / inspected containers × 100.
    pub fn container_index(&self, records: &[&InspectionRecord]) -> Vec<ContainerIndexRow> {
        group_by_facility(records)
            .into_iter()
            .map(|(code, group)| {
                let inspected = container_sum(&group, ContainerStatus::Inspected);
                let positive = container_sum(&group, ContainerStatus::Positive);
                ContainerIndexRow {
                    facility_code: code,
                    facility_name: facility_name(&group),
                    containers_inspected: inspected,
                    containers_positive: positive,
                    container_index: round2(percentage_u64(positive, inspected)),
                }
            })
            .collect()
    }

    /// Breteau index: positive containers / inspected houses × 100.
    pub fn breteau_index(&self, records: &[&InspectionRecord]) -> Vec<BreteauIndexRow> {
        group_by_facility(records)
            .into_iter()
            .map(|(code, group)| {
                let houses = HouseTally::of(group.iter().copied()).inspected;
                let positive = container_sum(&group, ContainerStatus::Positive);
                BreteauIndexRow {
                    facility_code: code,
                    facility_name: facility_name(&group),
                    houses_inspected: houses,
                    containers_positive: positive,
                    breteau_index: round2(percentage_u64(positive, houses)),
                }
            })
            .collect()
    }

    /// Share of the registered houses reached by each visit outcome.
    ///
    /// `non_intervened` is clamped at zero when more houses were attended
    /// than registered; the overflow is reported in `excess`.
    pub fn coverage_percentages(&self, records: &[&InspectionRecord]) -> Vec<CoverageRow> {
        group_by_facility(records)
            .into_iter()
            .map(|(code, group)| {
                let total = self.facilities.total_houses(code);
                let tally = HouseTally::of(group.iter().copied());
                let attended = tally.attended();
                CoverageRow {
                    facility_code: code,
                    facility_name: facility_name(&group),
                    total_houses: total,
                    inspected: tally.inspected,
                    closed: tally.closed,
                    reluctant: tally.reluctant,
                    uninhabited: tally.uninhabited,
                    non_intervened: total.saturating_sub(attended),
                    excess: attended.saturating_sub(total),
                    pct_inspected: percentage_u64(tally.inspected, total),
                    pct_closed: percentage_u64(tally.closed, total),
                    pct_reluctant: percentage_u64(tally.reluctant, total),
                    pct_uninhabited: percentage_u64(tally.uninhabited, total),
                    pct_non_intervened: percentage_u64(total.saturating_sub(attended), total),
                    coverage_total: percentage_u64(attended, total),
                }
            })
            .collect()
    }

    /// Grams of larvicide per facility, largest first, and the overall total.
    pub fn larvicide_consumption(&self, records: &[&InspectionRecord]) -> (Vec<LarvicideRow>, f64) {
        let mut rows: Vec<LarvicideRow> = group_by_facility(records)
            .into_iter()
            .map(|(code, group)| LarvicideRow {
                facility_code: code,
                facility_name: facility_name(&group),
                larvicide: larvicide_sum(&group),
            })
            .collect();
        rows.sort_by(|a, b| b.larvicide.partial_cmp(&a.larvicide).unwrap_or(Ordering::Equal));
        (rows, larvicide_sum(records))
    }

    /// Febrile cases per facility, largest first, and the overall total.
    pub fn febrile_cases(&self, records: &[&InspectionRecord]) -> (Vec<FebrileRow>, u64) {
        let mut rows: Vec<FebrileRow> = group_by_facility(records)
            .into_iter()
            .map(|(code, group)| FebrileRow {
                facility_code: code,
                facility_name: facility_name(&group),
                febrile_cases: group.iter().map(|r| r.febrile_case_count).sum(),
            })
            .collect();
        rows.sort_by(|a, b| b.febrile_cases.cmp(&a.febrile_cases));
        let total: u64 = records.iter().map(|r| r.febrile_case_count).sum();
        (rows, total)
    }

    /// One row per container type with the sum of each status column.
    pub fn container_statistics(&self, records: &[&InspectionRecord]) -> Vec<ContainerStatsRow> {
        CONTAINER_TYPES
            .iter()
            .enumerate()
            .map(|(i, container)| {
                let sum = |status: ContainerStatus| -> u64 {
                    records.iter().map(|r| r.containers[i].get(status)).sum()
                };
                ContainerStatsRow {
                    container_type: container.label.to_string(),
                    inspected: sum(ContainerStatus::Inspected),
                    positive: sum(ContainerStatus::Positive),
                    chemical: sum(ContainerStatus::ChemicalTreatment),
                    physical: sum(ContainerStatus::PhysicalTreatment),
                    discarded: container
                        .has_discarded
                        .then(|| sum(ContainerStatus::Discarded)),
                }
            })
            .collect()
    }

    /// All chemically and physically treated containers.
    pub fn treated_containers(&self, records: &[&InspectionRecord]) -> u64 {
        records.iter().map(|r| r.treated_containers()).sum()
    }

    pub fn treatment_statistics(&self, records: &[&InspectionRecord]) -> TreatmentStatistics {
        TreatmentStatistics {
            chemical: container_sum(records, ContainerStatus::ChemicalTreatment),
            physical: container_sum(records, ContainerStatus::PhysicalTreatment),
        }
    }

    pub fn container_totals(&self, records: &[&InspectionRecord]) -> ContainerTotals {
        ContainerTotals {
            inspected: container_sum(records, ContainerStatus::Inspected),
            positive: container_sum(records, ContainerStatus::Positive),
        }
    }

    pub fn container_treatment_by_type(
        &self,
        records: &[&InspectionRecord],
    ) -> Vec<ContainerTreatmentRow> {
        self.container_statistics(records)
            .into_iter()
            .map(|row| ContainerTreatmentRow {
                container_type: row.container_type,
                chemical: row.chemical,
                physical: row.physical,
            })
            .collect()
    }

    /// Container types by total recorded count, most common first. Types
    /// never recorded are left out.
    pub fn container_frequency(&self, records: &[&InspectionRecord]) -> Vec<ContainerFrequencyRow> {
        let mut rows: Vec<ContainerFrequencyRow> = CONTAINER_TYPES
            .iter()
            .enumerate()
            .map(|(i, container)| ContainerFrequencyRow {
                container_type: container.label.to_string(),
                total: records.iter().map(|r| r.containers[i].total()).sum(),
            })
            .filter(|row| row.total > 0)
            .collect();
        rows.sort_by(|a, b| b.total.cmp(&a.total));
        rows
    }

    /// Houses, positives and larvicide per calendar month; undated rows are
    /// left out.
    pub fn monthly_trends(&self, records: &[&InspectionRecord]) -> Vec<MonthlyTrendRow> {
        let mut months: BTreeMap<YearMonth, Vec<&InspectionRecord>> = BTreeMap::new();
        for &r in records {
            if let Some(date) = r.inspection_date {
                months.entry(YearMonth::of(date)).or_default().push(r);
            }
        }
        months
            .into_iter()
            .map(|(month, group)| {
                let tally = HouseTally::of(group.iter().copied());
                MonthlyTrendRow {
                    month: month.to_string(),
                    inspected_houses: tally.inspected,
                    positive_houses: tally.positive,
                    larvicide: larvicide_sum(&group),
                    aedic_index: tally.aedic_index(),
                }
            })
            .collect()
    }

    /// Field days per Monday-started week and inspections per field day.
    pub fn weekly_surveillance_days(
        &self,
        records: &[&InspectionRecord],
    ) -> Vec<WeeklySurveillanceRow> {
        #[derive(Default)]
        struct Acc {
            days: BTreeSet<NaiveDate>,
            inspections: u64,
            positives: u64,
        }
        let mut weeks: BTreeMap<NaiveDate, Acc> = BTreeMap::new();
        for r in records {
            let Some(date) = r.inspection_date else {
                continue;
            };
            let Some(start) = week_start(date) else {
                continue;
            };
            let acc = weeks.entry(start).or_default();
            acc.days.insert(date);
            if r.is_inspected() {
                acc.inspections += 1;
            }
            if r.is_positive_house() {
                acc.positives += 1;
            }
        }
        weeks
            .into_iter()
            .map(|(start, acc)| {
                let days = acc.days.len() as u64;
                WeeklySurveillanceRow {
                    week_start: start,
                    surveillance_days: days,
                    total_inspections: acc.inspections,
                    positive_houses: acc.positives,
                    week_display: week_label(start),
                    intensity: acc.inspections as f64 / days.max(1) as f64,
                }
            })
            .collect()
    }

    /// Aedic index per facility and month. Names come from the reference
    /// store, falling back to `Establecimiento {code}`.
    pub fn monthly_aedic_by_facility(
        &self,
        records: &[&InspectionRecord],
    ) -> Vec<FacilityMonthAedicRow> {
        let mut groups: BTreeMap<(i64, YearMonth), Vec<&InspectionRecord>> = BTreeMap::new();
        for &r in records {
            if let Some(date) = r.inspection_date {
                groups
                    .entry((r.facility_code, YearMonth::of(date)))
                    .or_default()
                    .push(r);
            }
        }
        groups
            .into_iter()
            .map(|((code, month), group)| {
                let tally = HouseTally::of(group.iter().copied());
                let name = self
                    .facilities
                    .lookup(code)
                    .map(|f| f.name)
                    .unwrap_or_else(|| format!("Establecimiento {}", code));
                FacilityMonthAedicRow {
                    facility_code: code,
                    facility_name: name,
                    month: month.to_string(),
                    inspected_houses: tally.inspected,
                    positive_houses: tally.positive,
                    aedic_index: tally.aedic_index(),
                }
            })
            .collect()
    }

    pub fn inspection_summary(&self, records: &[&InspectionRecord]) -> InspectionSummary {
        let tally = HouseTally::of(records.iter().copied());
        InspectionSummary {
            inspected: tally.inspected,
            closed: tally.closed,
            reluctant: tally.reluctant,
            uninhabited: tally.uninhabited,
            positive_houses: tally.positive,
            positivity_pct: tally.aedic_index(),
        }
    }

    /// Mean and maximum of the three indices across facilities.
    pub fn entomological_summary(&self, records: &[&InspectionRecord]) -> EntomologicalSummary {
        let ia: Vec<f64> = self.aedic_index(records).iter().map(|r| r.aedic_index).collect();
        let ic: Vec<f64> = self
            .container_index(records)
            .iter()
            .map(|r| r.container_index)
            .collect();
        let ib: Vec<f64> = self
            .breteau_index(records)
            .iter()
            .map(|r| r.breteau_index)
            .collect();
        let mean = |v: &[f64]| (!v.is_empty()).then(|| average(v));
        EntomologicalSummary {
            ia_mean: mean(&ia),
            ia_max: maximum(&ia),
            ic_mean: mean(&ic),
            ic_max: maximum(&ic),
            ib_mean: mean(&ib),
            ib_max: maximum(&ib),
        }
    }

    /// Activity, larvicide and treated containers per facility, with a 0-10
    /// rating of treated containers per activity.
    pub fn facility_performance(
        &self,
        records: &[&InspectionRecord],
    ) -> Vec<FacilityPerformanceRow> {
        group_by_facility(records)
            .into_iter()
            .map(|(code, group)| {
                let activities = group.len() as u64;
                let treated = self.treated_containers(&group);
                FacilityPerformanceRow {
                    facility_code: code,
                    facility_name: facility_name(&group),
                    total_activities: activities,
                    larvicide_used: larvicide_sum(&group),
                    containers_treated: treated,
                    efficiency_rating: (treated as f64 / activities.max(1) as f64 * 5.0).min(10.0),
                }
            })
            .collect()
    }

    /// Share of attended houses found negative during a cerco, and a 0-10
    /// intervention score.
    pub fn cerco_effectiveness(&self, records: &[&InspectionRecord]) -> Vec<CercoEffectivenessRow> {
        group_by_facility(records)
            .into_iter()
            .map(|(code, group)| {
                let tally = HouseTally::of(group.iter().copied());
                let attended = tally.attended();
                CercoEffectivenessRow {
                    facility_code: code,
                    facility_name: facility_name(&group),
                    attended_houses: attended,
                    positive_houses: tally.positive,
                    effectiveness_pct: tally.effectiveness(),
                    intervention_score: (attended as f64 / tally.positive.max(1) as f64 * 2.0)
                        .min(10.0),
                }
            })
            .collect()
    }

    pub fn cerco_indicators(&self, records: &[&InspectionRecord]) -> CercoIndicators {
        if records.is_empty() {
            return CercoIndicators::default();
        }
        let tally = HouseTally::of(records.iter().copied());
        let response_days: Vec<f64> = records
            .iter()
            .filter_map(|r| Some(elapsed_days(r.created_at?, r.inspected_at?) as f64))
            .collect();
        let addresses: HashSet<&str> = records.iter().map(|r| r.address.as_str()).collect();
        let unique = addresses.len() as f64;
        let total = records.len() as f64;
        CercoIndicators {
            detection_rate: tally.aedic_index(),
            coverage_rate: percentage(tally.attended() as f64, total),
            avg_response_time: average(&response_days),
            reintervention_rate: percentage(total - unique, unique),
        }
    }

    /// Detections, effectiveness and coverage per calendar month. Coverage
    /// is attended houses over every visit of the month.
    pub fn cerco_monthly_trends(&self, records: &[&InspectionRecord]) -> Vec<CercoMonthlyRow> {
        let mut months: BTreeMap<YearMonth, Vec<&InspectionRecord>> = BTreeMap::new();
        for &r in records {
            if let Some(date) = r.inspection_date {
                months.entry(YearMonth::of(date)).or_default().push(r);
            }
        }
        months
            .into_iter()
            .map(|(month, group)| {
                let tally = HouseTally::of(group.iter().copied());
                CercoMonthlyRow {
                    month: month.to_string(),
                    detections: tally.positive,
                    attended_houses: tally.attended(),
                    effectiveness_pct: tally.effectiveness(),
                    coverage_pct: percentage_u64(tally.attended(), group.len() as u64),
                }
            })
            .collect()
    }

    /// Facilities, attended houses and effectiveness per `departamento_x`.
    /// Rows without a department are left out.
    pub fn geographic_coverage(&self, records: &[&InspectionRecord]) -> Vec<GeographicCoverageRow> {
        let mut departments: BTreeMap<&str, Vec<&InspectionRecord>> = BTreeMap::new();
        for &r in records {
            if let Some(dept) = r.attributes.get(columns::DEPARTMENT) {
                departments.entry(dept.as_str()).or_default().push(r);
            }
        }
        departments
            .into_iter()
            .map(|(dept, group)| {
                let tally = HouseTally::of(group.iter().copied());
                let facilities: BTreeSet<&str> = group
                    .iter()
                    .map(|r| r.facility_name.as_str())
                    .filter(|n| !n.is_empty())
                    .collect();
                GeographicCoverageRow {
                    department: dept.to_string(),
                    facilities: facilities.len(),
                    attended_houses: tally.attended(),
                    positive_houses: tally.positive,
                    effectiveness_pct: tally.effectiveness(),
                }
            })
            .collect()
    }

    /// Attended houses per city block (`codigo_manzana`) of each facility.
    pub fn intervention_density(
        &self,
        records: &[&InspectionRecord],
    ) -> Vec<InterventionDensityRow> {
        group_by_facility(records)
            .into_iter()
            .map(|(code, group)| {
                let tally = HouseTally::of(group.iter().copied());
                let blocks: BTreeSet<String> = group
                    .iter()
                    .filter_map(|r| r.attributes.get(columns::BLOCK))
                    .map(|b| normalize_identifier(b))
                    .collect();
                InterventionDensityRow {
                    facility_code: code,
                    facility_name: facility_name(&group),
                    blocks: blocks.len(),
                    attended_houses: tally.attended(),
                    intervention_density: tally.attended() as f64 / blocks.len().max(1) as f64,
                    effectiveness_pct: tally.effectiveness(),
                }
            })
            .collect()
    }

    /// Recovery of positive houses. The rate is over every row flagged
    /// `viv_positiva`, inspected or not. `None` when no row carries a
    /// `recuperada` value.
    pub fn recovery_metrics(&self, records: &[&InspectionRecord]) -> Option<RecoveryMetrics> {
        if !records.iter().any(|r| r.attributes.contains_key(columns::RECOVERED)) {
            return None;
        }
        let recovered: Vec<&InspectionRecord> =
            records.iter().copied().filter(|&r| is_recovered(r)).collect();
        let positive = records.iter().filter(|r| r.house_is_positive).count() as u64;
        let recovery_date = |r: &InspectionRecord| {
            parse_datetime_safe(r.attributes.get(columns::RECOVERY_DATE).map(String::as_str))
        };
        let recovery_days: Vec<f64> = recovered
            .iter()
            .filter_map(|&r| Some(elapsed_days(r.inspected_at?, recovery_date(r)?) as f64))
            .collect();
        Some(RecoveryMetrics {
            recovered_houses: recovered.len() as u64,
            positive_houses: positive,
            recovery_rate: percentage_u64(recovered.len() as u64, positive),
            avg_recovery_time: average(&recovery_days),
            details: recovered
                .iter()
                .map(|&r| RecoveryDetailRow {
                    facility_name: r.facility_name.clone(),
                    address: r.address.clone(),
                    inspection_date: r.inspection_date,
                    recovery_date: recovery_date(r).map(|dt| dt.date()),
                    assigned_user: r
                        .attributes
                        .get(columns::RECOVERY_USER)
                        .cloned()
                        .unwrap_or_default(),
                })
                .collect(),
        })
    }
}

/// `recuperada` holds 1/0, sometimes exported as `1.0` or `True`.
fn is_recovered(r: &InspectionRecord) -> bool {
    match r.attributes.get(columns::RECOVERED) {
        Some(v) if v.eq_ignore_ascii_case("true") => true,
        Some(v) => parse_f64_safe(Some(v)) == Some(1.0),
        None => false,
    }
}

/// A summary line appended under a table. Ratio columns are recomputed from
/// the summed counts rather than added up.
pub trait TotalRow: Sized {
    fn total_row(rows: &[Self]) -> Option<Self>;
}

pub const TOTAL_LABEL: &str = "TOTAL";

/// `rows` followed by their total line, if the table is not empty.
pub fn with_total<T: TotalRow + Clone>(rows: &[T]) -> Vec<T> {
    let mut out = rows.to_vec();
    out.extend(T::total_row(rows));
    out
}

impl TotalRow for AedicIndexRow {
    fn total_row(rows: &[Self]) -> Option<Self> {
        if rows.is_empty() {
            return None;
        }
        let inspected: u64 = rows.iter().map(|r| r.inspected_houses).sum();
        let positive: u64 = rows.iter().map(|r| r.positive_houses).sum();
        Some(AedicIndexRow {
            facility_code: 0,
            facility_name: TOTAL_LABEL.to_string(),
            total_houses: rows.iter().map(|r| r.total_houses).sum(),
            inspected_houses: inspected,
            positive_houses: positive,
            aedic_index: round2(percentage_u64(positive, inspected)),
        })
    }
}

impl TotalRow for ContainerIndexRow {
    fn total_row(rows: &[Self]) -> Option<Self> {
        if rows.is_empty() {
            return None;
        }
        let inspected: u64 = rows.iter().map(|r| r.containers_inspected).sum();
        let positive: u64 = rows.iter().map(|r| r.containers_positive).sum();
        Some(ContainerIndexRow {
            facility_code: 0,
            facility_name: TOTAL_LABEL.to_string(),
            containers_inspected: inspected,
            containers_positive: positive,
            container_index: round2(percentage_u64(positive, inspected)),
        })
    }
}

impl TotalRow for BreteauIndexRow {
    fn total_row(rows: &[Self]) -> Option<Self> {
        if rows.is_empty() {
            return None;
        }
        let houses: u64 = rows.iter().map(|r| r.houses_inspected).sum();
        let positive: u64 = rows.iter().map(|r| r.containers_positive).sum();
        Some(BreteauIndexRow {
            facility_code: 0,
            facility_name: TOTAL_LABEL.to_string(),
            houses_inspected: houses,
            containers_positive: positive,
            breteau_index: round2(percentage_u64(positive, houses)),
        })
    }
}

impl TotalRow for CoverageRow {
    fn total_row(rows: &[Self]) -> Option<Self> {
        if rows.is_empty() {
            return None;
        }
        let sum = |f: fn(&CoverageRow) -> u64| -> u64 { rows.iter().map(f).sum() };
        let total = sum(|r| r.total_houses);
        let inspected = sum(|r| r.inspected);
        let closed = sum(|r| r.closed);
        let reluctant = sum(|r| r.reluctant);
        let uninhabited = sum(|r| r.uninhabited);
        let non_intervened = sum(|r| r.non_intervened);
        Some(CoverageRow {
            facility_code: 0,
            facility_name: TOTAL_LABEL.to_string(),
            total_houses: total,
            inspected,
            closed,
            reluctant,
            uninhabited,
            non_intervened,
            excess: sum(|r| r.excess),
            pct_inspected: percentage_u64(inspected, total),
            pct_closed: percentage_u64(closed, total),
            pct_reluctant: percentage_u64(reluctant, total),
            pct_uninhabited: percentage_u64(uninhabited, total),
            pct_non_intervened: percentage_u64(non_intervened, total),
            coverage_total: percentage_u64(inspected + closed + reluctant + uninhabited, total),
        })
    }
}

impl TotalRow for LarvicideRow {
    fn total_row(rows: &[Self]) -> Option<Self> {
        (!rows.is_empty()).then(|| LarvicideRow {
            facility_code: 0,
            facility_name: TOTAL_LABEL.to_string(),
            larvicide: rows.iter().map(|r| r.larvicide).sum(),
        })
    }
}

impl TotalRow for FebrileRow {
    fn total_row(rows: &[Self]) -> Option<Self> {
        (!rows.is_empty()).then(|| FebrileRow {
            facility_code: 0,
            facility_name: TOTAL_LABEL.to_string(),
            febrile_cases: rows.iter().map(|r| r.febrile_cases).sum(),
        })
    }
}

impl TotalRow for ContainerStatsRow {
    fn total_row(rows: &[Self]) -> Option<Self> {
        if rows.is_empty() {
            return None;
        }
        let discarded: Vec<u64> = rows.iter().filter_map(|r| r.discarded).collect();
        Some(ContainerStatsRow {
            container_type: TOTAL_LABEL.to_string(),
            inspected: rows.iter().map(|r| r.inspected).sum(),
            positive: rows.iter().map(|r| r.positive).sum(),
            chemical: rows.iter().map(|r| r.chemical).sum(),
            physical: rows.iter().map(|r| r.physical).sum(),
            discarded: (!discarded.is_empty()).then(|| discarded.iter().sum()),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::facilities::FacilityStore;
    use crate::util::assert_close;
    use chrono::NaiveDateTime;

    /// One visit to `code` with the given outcome.
    pub(crate) fn visit(code: i64, status: i64, positive: bool) -> InspectionRecord {
        InspectionRecord {
            facility_code: code,
            facility_name: format!("EESS {}", code),
            house_status: status,
            house_is_positive: positive,
            ..Default::default()
        }
    }

    pub(crate) fn on(mut r: InspectionRecord, y: i32, m: u32, d: u32) -> InspectionRecord {
        r.inspection_date = NaiveDate::from_ymd_opt(y, m, d);
        r
    }

    fn with_containers(
        mut r: InspectionRecord,
        kind: usize,
        inspected: u64,
        positive: u64,
    ) -> InspectionRecord {
        r.containers[kind].inspected = inspected;
        r.containers[kind].positive = positive;
        r
    }

    fn store_with(code: i64, total: u64) -> FacilityStore {
        let mut store = FacilityStore::new();
        store.upsert(code, "REF", total, "test");
        store
    }

    fn refs(records: &[InspectionRecord]) -> Vec<&InspectionRecord> {
        records.iter().collect()
    }

    #[test]
    fn facility_example_end_to_end() {
        let store = store_with(100, 10);
        let engine = IndicatorEngine::new(&store);
        let records = vec![visit(100, 1, true), visit(100, 1, false), visit(100, 2, false)];
        let subset = refs(&records);

        let ia = engine.aedic_index(&subset);
        assert_eq!(ia.len(), 1);
        assert_eq!(ia[0].inspected_houses, 2);
        assert_eq!(ia[0].positive_houses, 1);
        assert_eq!(ia[0].total_houses, 10);
        assert_close(ia[0].aedic_index, 50.0);

        let cov = &engine.coverage_percentages(&subset)[0];
        assert_close(cov.pct_inspected, 20.0);
        assert_close(cov.pct_closed, 10.0);
        assert_close(cov.coverage_total, 30.0);
        assert_eq!(cov.non_intervened, 7);
        assert_eq!(cov.excess, 0);
    }

    #[test]
    fn positivity_requires_an_inspected_house() {
        let store = FacilityStore::new();
        let engine = IndicatorEngine::new(&store);
        let records = vec![visit(1, 2, true), visit(1, 3, true), visit(1, 4, true)];
        let ia = engine.aedic_index(&refs(&records));
        assert_eq!(ia[0].inspected_houses, 0);
        assert_eq!(ia[0].positive_houses, 0);
        assert_close(ia[0].aedic_index, 0.0);
    }

    #[test]
    fn aedic_index_stays_within_bounds() {
        let store = FacilityStore::new();
        let engine = IndicatorEngine::new(&store);
        let records = vec![
            visit(1, 1, true),
            visit(1, 1, true),
            visit(2, 1, false),
            visit(3, 1, true),
            visit(3, 1, false),
            visit(3, 1, false),
        ];
        for row in engine.aedic_index(&refs(&records)) {
            assert!((0.0..=100.0).contains(&row.aedic_index));
        }
        let ia = engine.aedic_index(&refs(&records));
        assert_close(ia[0].aedic_index, 100.0);
        assert_close(ia[2].aedic_index, 33.33);
    }

    #[test]
    fn coverage_percentages_sum_to_one_hundred() {
        let store = store_with(7, 9);
        let engine = IndicatorEngine::new(&store);
        let records = vec![
            visit(7, 1, false),
            visit(7, 2, false),
            visit(7, 3, false),
            visit(7, 4, false),
        ];
        let row = &engine.coverage_percentages(&refs(&records))[0];
        let sum = row.pct_inspected
            + row.pct_closed
            + row.pct_reluctant
            + row.pct_uninhabited
            + row.pct_non_intervened;
        assert!((sum - 100.0).abs() < 1e-9);
    }

    #[test]
    fn over_coverage_is_clamped_and_reported() {
        let store = store_with(7, 2);
        let engine = IndicatorEngine::new(&store);
        let records = vec![
            visit(7, 1, false),
            visit(7, 1, false),
            visit(7, 2, false),
            visit(7, 3, false),
        ];
        let row = &engine.coverage_percentages(&refs(&records))[0];
        assert_eq!(row.non_intervened, 0);
        assert_eq!(row.excess, 2);
        assert_close(row.pct_non_intervened, 0.0);
        assert_close(row.coverage_total, 200.0);
    }

    #[test]
    fn unknown_facility_has_zero_capacity() {
        let store = FacilityStore::fallback();
        let engine = IndicatorEngine::new(&store);
        let records = vec![visit(999, 1, true)];
        let row = &engine.coverage_percentages(&refs(&records))[0];
        assert_eq!(row.facility_code, 999);
        assert_eq!(row.total_houses, 0);
        assert_close(row.coverage_total, 0.0);
        assert_close(row.pct_inspected, 0.0);
    }

    #[test]
    fn store_edits_are_seen_on_the_next_call() {
        let mut store = store_with(5, 10);
        let records = vec![visit(5, 1, false)];
        let before = IndicatorEngine::new(&store).coverage_percentages(&refs(&records));
        store.update_total_houses(5, 20, "test").unwrap();
        let after = IndicatorEngine::new(&store).coverage_percentages(&refs(&records));
        assert_close(before[0].pct_inspected, 10.0);
        assert_close(after[0].pct_inspected, 5.0);
    }

    #[test]
    fn container_and_breteau_share_the_numerator() {
        let store = FacilityStore::new();
        let engine = IndicatorEngine::new(&store);
        let records = vec![
            with_containers(visit(1, 1, true), 0, 4, 1),
            with_containers(visit(1, 1, false), 5, 6, 2),
            with_containers(visit(1, 2, false), 7, 0, 0),
        ];
        let subset = refs(&records);
        let ic = &engine.container_index(&subset)[0];
        let ib = &engine.breteau_index(&subset)[0];
        assert_eq!(ic.containers_positive, ib.containers_positive);
        assert_eq!(ic.containers_inspected, 10);
        assert_eq!(ib.houses_inspected, 2);
        assert_close(ic.container_index, 30.0);
        assert_close(ib.breteau_index, 150.0);
        let cross =
            ic.container_index * ic.containers_inspected as f64 / ib.houses_inspected as f64;
        assert_close(cross, ib.breteau_index);
    }

    #[test]
    fn empty_subset_gives_empty_tables_and_zero_totals() {
        let store = FacilityStore::fallback();
        let engine = IndicatorEngine::new(&store);
        let subset: Vec<&InspectionRecord> = Vec::new();
        let (larvicide, total_larvicide) = engine.larvicide_consumption(&subset);
        let (febrile, total_febrile) = engine.febrile_cases(&subset);
        assert!(larvicide.is_empty());
        assert!(febrile.is_empty());
        assert_close(total_larvicide, 0.0);
        assert_eq!(total_febrile, 0);
        assert!(engine.aedic_index(&subset).is_empty());
        assert!(engine.coverage_percentages(&subset).is_empty());
        assert!(engine.monthly_trends(&subset).is_empty());
        assert!(engine.weekly_surveillance_days(&subset).is_empty());
        assert_eq!(engine.container_statistics(&subset).len(), 10);
        assert_eq!(engine.treated_containers(&subset), 0);
        assert_eq!(engine.entomological_summary(&subset), EntomologicalSummary::default());
        assert_eq!(engine.cerco_indicators(&subset), CercoIndicators::default());
        assert_close(engine.inspection_summary(&subset).positivity_pct, 0.0);
    }

    #[test]
    fn larvicide_and_febrile_sort_descending() {
        let store = FacilityStore::new();
        let engine = IndicatorEngine::new(&store);
        let mut records = vec![visit(1, 1, false), visit(2, 1, false), visit(2, 1, false)];
        records[0].larvicide_consumed = 10.0;
        records[1].larvicide_consumed = 4.0;
        records[2].larvicide_consumed = 8.0;
        records[0].febrile_case_count = 1;
        records[2].febrile_case_count = 3;
        let (rows, total) = engine.larvicide_consumption(&refs(&records));
        assert_eq!(rows[0].facility_code, 2);
        assert_close(rows[0].larvicide, 12.0);
        assert_close(total, 22.0);
        let (rows, total) = engine.febrile_cases(&refs(&records));
        assert_eq!(rows[0].facility_code, 2);
        assert_eq!(total, 4);
    }

    #[test]
    fn container_statistics_reshape_by_type() {
        let store = FacilityStore::new();
        let engine = IndicatorEngine::new(&store);
        let mut r = visit(1, 1, false);
        r.containers[7].inspected = 5;
        r.containers[7].discarded = 2;
        r.containers[7].chemical = 1;
        r.containers[0].physical = 3;
        let records = vec![r.clone(), r];
        let stats = engine.container_statistics(&refs(&records));
        assert_eq!(stats[7].container_type, "Latas/Botellas");
        assert_eq!(stats[7].inspected, 10);
        assert_eq!(stats[7].discarded, Some(4));
        assert_eq!(stats[0].discarded, None);
        assert_eq!(stats[0].physical, 6);
        assert_eq!(engine.treated_containers(&refs(&records)), 8);
        let treatment = engine.treatment_statistics(&refs(&records));
        assert_eq!((treatment.chemical, treatment.physical), (2, 6));
        let freq = engine.container_frequency(&refs(&records));
        assert_eq!(freq.len(), 2);
        assert_eq!(freq[0].container_type, "Latas/Botellas");
        assert_eq!(freq[0].total, 16);
        let total = ContainerStatsRow::total_row(&stats).unwrap();
        assert_eq!(total.discarded, Some(4));
        assert_eq!(total.inspected, 10);
    }

    #[test]
    fn monthly_trends_add_up_to_the_ungrouped_count() {
        let store = FacilityStore::new();
        let engine = IndicatorEngine::new(&store);
        let records = vec![
            on(visit(1, 1, true), 2024, 1, 15),
            on(visit(1, 1, false), 2024, 1, 31),
            on(visit(2, 1, false), 2024, 2, 1),
            on(visit(2, 2, false), 2024, 3, 9),
            on(visit(2, 1, true), 2023, 12, 30),
        ];
        let subset = refs(&records);
        let months = engine.monthly_trends(&subset);
        let months_keys: Vec<&str> = months.iter().map(|m| m.month.as_str()).collect();
        assert_eq!(months_keys, vec!["2023-12", "2024-01", "2024-02", "2024-03"]);
        let summed: u64 = months.iter().map(|m| m.inspected_houses).sum();
        assert_eq!(summed, engine.inspection_summary(&subset).inspected);
        assert_close(months[1].aedic_index, 50.0);
        assert_close(months[3].aedic_index, 0.0);
    }

    #[test]
    fn weekly_days_count_distinct_dates() {
        let store = FacilityStore::new();
        let engine = IndicatorEngine::new(&store);
        // 2024-03-04 is a Monday.
        let records = vec![
            on(visit(1, 1, true), 2024, 3, 4),
            on(visit(1, 1, false), 2024, 3, 4),
            on(visit(1, 2, false), 2024, 3, 6),
            on(visit(1, 1, false), 2024, 3, 10),
            on(visit(1, 1, false), 2024, 3, 11),
            visit(1, 1, false),
        ];
        let weeks = engine.weekly_surveillance_days(&refs(&records));
        assert_eq!(weeks.len(), 2);
        let first = &weeks[0];
        assert_eq!(first.week_start, NaiveDate::from_ymd_opt(2024, 3, 4).unwrap());
        assert_eq!(first.surveillance_days, 3);
        assert!(first.surveillance_days <= 7);
        assert_eq!(first.total_inspections, 3);
        assert_eq!(first.positive_houses, 1);
        assert_eq!(first.week_display, "04/03/2024 - 10/03/2024");
        assert_close(first.intensity, 1.0);
        assert_eq!(weeks[1].surveillance_days, 1);
    }

    #[test]
    fn monthly_aedic_per_facility_uses_reference_names() {
        let store = store_with(1, 10);
        let engine = IndicatorEngine::new(&store);
        let records = vec![
            on(visit(1, 1, true), 2024, 1, 2),
            on(visit(1, 1, false), 2024, 2, 2),
            on(visit(2, 1, true), 2024, 1, 3),
            visit(2, 1, true),
        ];
        let rows = engine.monthly_aedic_by_facility(&refs(&records));
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].facility_name, "REF");
        assert_eq!(rows[0].month, "2024-01");
        assert_close(rows[0].aedic_index, 100.0);
        assert_close(rows[1].aedic_index, 0.0);
        assert_eq!(rows[2].facility_name, "Establecimiento 2");
    }

    #[test]
    fn facility_name_is_first_non_empty() {
        let store = FacilityStore::new();
        let engine = IndicatorEngine::new(&store);
        let mut records = vec![visit(3, 1, false), visit(3, 1, false), visit(3, 1, false)];
        records[0].facility_name.clear();
        records[1].facility_name = "SAN LUIS".into();
        records[2].facility_name = "S. LUIS".into();
        assert_eq!(engine.aedic_index(&refs(&records))[0].facility_name, "SAN LUIS");
    }

    #[test]
    fn entomological_summary_averages_facilities() {
        let store = FacilityStore::new();
        let engine = IndicatorEngine::new(&store);
        let records = vec![visit(1, 1, true), visit(2, 1, false)];
        let summary = engine.entomological_summary(&refs(&records));
        assert_eq!(summary.ia_mean, Some(50.0));
        assert_eq!(summary.ia_max, Some(100.0));
        assert_eq!(summary.ic_max, Some(0.0));
    }

    #[test]
    fn performance_and_cerco_scores_are_capped() {
        let store = FacilityStore::new();
        let engine = IndicatorEngine::new(&store);
        let mut r = visit(1, 1, false);
        r.containers[0].chemical = 9;
        let records = vec![r, visit(1, 2, false), visit(1, 1, true), visit(1, 9, false)];
        let perf = &engine.facility_performance(&refs(&records))[0];
        assert_eq!(perf.total_activities, 4);
        assert_eq!(perf.containers_treated, 9);
        assert_close(perf.efficiency_rating, 10.0);

        let cerco = &engine.cerco_effectiveness(&refs(&records))[0];
        assert_eq!(cerco.attended_houses, 3);
        assert_eq!(cerco.positive_houses, 1);
        assert_close(cerco.effectiveness_pct, 200.0 / 3.0);
        assert_close(cerco.intervention_score, 6.0);
    }

    fn at(y: i32, m: u32, d: u32, h: u32) -> Option<NaiveDateTime> {
        NaiveDate::from_ymd_opt(y, m, d).and_then(|d| d.and_hms_opt(h, 0, 0))
    }

    fn inspected_at(mut r: InspectionRecord, when: Option<NaiveDateTime>) -> InspectionRecord {
        r.inspected_at = when;
        r.inspection_date = when.map(|dt| dt.date());
        r
    }

    fn with_attr(mut r: InspectionRecord, column: &str, value: &str) -> InspectionRecord {
        r.attributes.insert(column.to_string(), value.to_string());
        r
    }

    #[test]
    fn cerco_indicators_use_timestamps_and_addresses() {
        let store = FacilityStore::new();
        let engine = IndicatorEngine::new(&store);
        let mut a = inspected_at(visit(1, 1, true), at(2024, 5, 10, 9));
        a.created_at = at(2024, 5, 6, 8);
        a.address = "Jr. Lima 123".into();
        // 23:00 to 01:00 the next day is under a full day
        let mut b = inspected_at(visit(1, 1, false), at(2024, 5, 11, 1));
        b.created_at = at(2024, 5, 10, 23);
        b.address = "Jr. Lima 123".into();
        let mut c = visit(1, 5, false);
        c.address = "Av. Grau 4".into();
        let records = vec![a, b, c];
        let ind = engine.cerco_indicators(&refs(&records));
        assert_close(ind.detection_rate, 50.0);
        assert_close(ind.coverage_rate, 200.0 / 3.0);
        assert_close(ind.avg_response_time, 2.0);
        assert_close(ind.reintervention_rate, 50.0);
    }

    #[test]
    fn cerco_monthly_trends_skip_undated_rows() {
        let store = FacilityStore::new();
        let engine = IndicatorEngine::new(&store);
        let records = vec![
            on(visit(1, 1, true), 2024, 5, 2),
            on(visit(1, 2, false), 2024, 5, 20),
            on(visit(1, 7, false), 2024, 5, 21),
            on(visit(2, 1, false), 2024, 6, 1),
            visit(2, 1, true),
        ];
        let rows = engine.cerco_monthly_trends(&refs(&records));
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].month, "2024-05");
        assert_eq!(rows[0].detections, 1);
        assert_eq!(rows[0].attended_houses, 2);
        assert_close(rows[0].effectiveness_pct, 50.0);
        assert_close(rows[0].coverage_pct, 200.0 / 3.0);
        assert_eq!(rows[1].detections, 0);
        assert_close(rows[1].effectiveness_pct, 100.0);
    }

    #[test]
    fn geographic_coverage_groups_by_department() {
        let store = FacilityStore::new();
        let engine = IndicatorEngine::new(&store);
        let records = vec![
            with_attr(visit(1, 1, true), columns::DEPARTMENT, "AMAZONAS"),
            with_attr(visit(2, 3, false), columns::DEPARTMENT, "AMAZONAS"),
            with_attr(visit(2, 1, false), columns::DEPARTMENT, "AMAZONAS"),
            with_attr(visit(3, 1, false), columns::DEPARTMENT, "CAJAMARCA"),
            visit(4, 1, true),
        ];
        let rows = engine.geographic_coverage(&refs(&records));
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].department, "AMAZONAS");
        assert_eq!(rows[0].facilities, 2);
        assert_eq!(rows[0].attended_houses, 3);
        assert_close(rows[0].effectiveness_pct, 200.0 / 3.0);
        assert_eq!(rows[1].department, "CAJAMARCA");
        assert_close(rows[1].effectiveness_pct, 100.0);
    }

    #[test]
    fn intervention_density_counts_distinct_blocks() {
        let store = FacilityStore::new();
        let engine = IndicatorEngine::new(&store);
        let records = vec![
            with_attr(visit(1, 1, true), columns::BLOCK, "12"),
            with_attr(visit(1, 1, false), columns::BLOCK, "12.0"),
            with_attr(visit(1, 2, false), columns::BLOCK, "13"),
            visit(1, 4, false),
            visit(2, 1, false),
        ];
        let rows = engine.intervention_density(&refs(&records));
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].blocks, 2);
        assert_eq!(rows[0].attended_houses, 4);
        assert_close(rows[0].intervention_density, 2.0);
        assert_close(rows[0].effectiveness_pct, 75.0);
        assert_eq!(rows[1].blocks, 0);
        assert_close(rows[1].intervention_density, 1.0);
    }

    #[test]
    fn recovery_metrics_follow_flagged_houses() {
        let store = FacilityStore::new();
        let engine = IndicatorEngine::new(&store);
        assert_eq!(engine.recovery_metrics(&refs(&[visit(1, 1, true)])), None);

        let recovered = with_attr(
            with_attr(
                with_attr(
                    inspected_at(visit(1, 1, true), at(2024, 5, 6, 10)),
                    columns::RECOVERED,
                    "1.0",
                ),
                columns::RECOVERY_DATE,
                "2024-05-09 12:00:00",
            ),
            columns::RECOVERY_USER,
            "jlopez",
        );
        let records = vec![
            recovered,
            with_attr(visit(1, 1, true), columns::RECOVERED, "0"),
            with_attr(visit(1, 2, true), columns::RECOVERED, "True"),
            visit(1, 1, true),
        ];
        let m = engine.recovery_metrics(&refs(&records)).unwrap();
        assert_eq!(m.recovered_houses, 2);
        assert_eq!(m.positive_houses, 4);
        assert_close(m.recovery_rate, 50.0);
        assert_close(m.avg_recovery_time, 3.0);
        assert_eq!(m.details.len(), 2);
        assert_eq!(m.details[0].recovery_date, NaiveDate::from_ymd_opt(2024, 5, 9));
        assert_eq!(m.details[0].assigned_user, "jlopez");
        assert_eq!(m.details[1].recovery_date, None);
    }

    #[test]
    fn total_rows_recompute_ratios() {
        let store = FacilityStore::new();
        let engine = IndicatorEngine::new(&store);
        let records = vec![
            visit(1, 1, true),
            visit(2, 1, false),
            visit(2, 1, false),
            visit(2, 1, false),
        ];
        let rows = engine.aedic_index(&refs(&records));
        let table = with_total(&rows);
        assert_eq!(table.len(), 3);
        let total = table.last().unwrap();
        assert_eq!(total.facility_name, TOTAL_LABEL);
        assert_eq!(total.inspected_houses, 4);
        assert_close(total.aedic_index, 25.0);
        assert!(with_total::<AedicIndexRow>(&[]).is_empty());
    }
}
