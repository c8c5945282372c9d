use crate::types::{columns, ActivityType, Dataset, InspectionRecord};
use crate::util::{normalize_identifier, parse_f64_safe};
use chrono::NaiveDate;
use log::debug;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterValue {
    One(String),
    AnyOf(Vec<String>),
}

impl FilterValue {
    /// An empty selection means "all" and does not narrow anything.
    fn is_empty(&self) -> bool {
        match self {
            FilterValue::One(v) => v.trim().is_empty(),
            FilterValue::AnyOf(vs) => vs.is_empty(),
        }
    }

    fn accepts(&self, value: &str) -> bool {
        let value = normalize_identifier(value);
        match self {
            FilterValue::One(v) => normalize_identifier(v) == value,
            FilterValue::AnyOf(vs) => vs.iter().any(|v| normalize_identifier(v) == value),
        }
    }
}

/// User-selected narrowing for one analysis view.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterSpec {
    pub activity_type: Option<ActivityType>,
    pub attributes: BTreeMap<String, FilterValue>,
    /// Inclusive calendar range over `fecha_inspeccion`.
    pub date_range: Option<(NaiveDate, NaiveDate)>,
}

impl FilterSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn activity(mut self, activity: ActivityType) -> Self {
        self.activity_type = Some(activity);
        self
    }

    pub fn with(mut self, column: &str, value: impl Into<String>) -> Self {
        self.attributes
            .insert(column.to_string(), FilterValue::One(value.into()));
        self
    }

    pub fn any_of<I, S>(mut self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.attributes
            .insert(column.to_string(), FilterValue::AnyOf(values));
        self
    }

    pub fn between(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.date_range = Some((start, end));
        self
    }
}

/// Narrow `dataset` to the rows selected by `spec`.
///
/// Activity type and attribute filters are applied first, the date range
/// last. Filters on columns the upload does not have are ignored.
pub fn filter<'d>(dataset: &'d Dataset, spec: &FilterSpec) -> Vec<&'d InspectionRecord> {
    let active: Vec<(&str, &FilterValue)> = spec
        .attributes
        .iter()
        .filter(|(column, value)| {
            if value.is_empty() {
                return false;
            }
            let known = dataset.has_column(column);
            if !known {
                debug!("ignoring filter on unknown column '{}'", column);
            }
            known
        })
        .map(|(column, value)| (column.as_str(), value))
        .collect();

    let subset: Vec<&InspectionRecord> = dataset
        .records
        .iter()
        .filter(|r| match spec.activity_type {
            Some(activity) => activity.matches(&r.activity_type),
            None => true,
        })
        .filter(|r| {
            active.iter().all(|(column, value)| {
                r.column_value(column)
                    .map(|v| value.accepts(&v))
                    .unwrap_or(false)
            })
        })
        .collect();

    match spec.date_range {
        Some(range) => apply_date_range(subset, range),
        None => subset,
    }
}

/// Keep rows whose inspection date falls in `[start, end]`; undated rows go.
pub fn apply_date_range<'d>(
    rows: Vec<&'d InspectionRecord>,
    (start, end): (NaiveDate, NaiveDate),
) -> Vec<&'d InspectionRecord> {
    rows.into_iter()
        .filter(|r| matches!(r.inspection_date, Some(d) if d >= start && d <= end))
        .collect()
}

impl Dataset {
    /// Distinct non-empty values of `column`: numbers first in numeric
    /// order, then text alphabetically. Unknown columns give nothing.
    pub fn unique_values(&self, column: &str) -> Vec<String> {
        if !self.has_column(column) {
            return Vec::new();
        }
        let distinct: BTreeSet<String> = self
            .records
            .iter()
            .filter_map(|r| r.column_value(column))
            .map(|v| v.into_owned())
            .filter(|v| !v.is_empty())
            .collect();
        let mut values: Vec<String> = distinct.into_iter().collect();
        values.sort_by(|a, b| {
            match (parse_f64_safe(Some(a)), parse_f64_safe(Some(b))) {
                (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => a.cmp(b),
            }
        });
        values
    }

    /// Earliest and latest inspection date, if any row has one.
    pub fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        let mut dates = self.records.iter().filter_map(|r| r.inspection_date);
        let first = dates.next()?;
        Some(dates.fold((first, first), |(lo, hi), d| (lo.min(d), hi.max(d))))
    }

    /// Every inspector id present, as used by the per-inspector views.
    pub fn inspector_ids(&self) -> Vec<String> {
        self.unique_values(columns::INSPECTOR_ID)
    }
}
