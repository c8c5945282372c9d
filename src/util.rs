// Utility helpers for parsing, ratios and display formatting.
//
// All the forgiving cell handling lives here so the loader can turn a messy
// field export into fully-typed records, and the indicator code can assume
// clean values.
use chrono::{DateTime, Datelike, Days, Duration, NaiveDate, NaiveDateTime};
use num_format::{Locale, ToFormattedString};

/// Parse a string-like value into `f64` while being forgiving about
/// formatting issues that are common in CSV exports (commas, spaces, text).
///
/// - Accepts `Option<&str>` so callers can pass through optional fields.
/// - Trims whitespace.
/// - Rejects values that contain alphabetic characters (except an exponent).
/// - Strips thousands separators like `","` before parsing.
/// - Returns `None` for anything that cannot be safely parsed or is not finite.
pub fn parse_f64_safe(s: Option<&str>) -> Option<f64> {
    let s = s?.trim();
    if s.is_empty() {
        return None;
    }
    if s.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') {
        return None;
    }
    let s = s.replace(",", "");
    s.parse::<f64>().ok().filter(|v| v.is_finite())
}

pub fn parse_i64_safe(s: Option<&str>) -> Option<i64> {
    let v = parse_f64_safe(s)?;
    if v.fract() != 0.0 || v.abs() > i64::MAX as f64 {
        return None;
    }
    Some(v as i64)
}

/// Non-negative count such as `"3"` or `"3.0"`; negatives and fractions fail.
pub fn parse_count_safe(s: Option<&str>) -> Option<u64> {
    parse_i64_safe(s).and_then(|v| u64::try_from(v).ok())
}

const DATETIME_FORMATS: [&str; 6] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%d/%m/%Y", "%Y/%m/%d", "%d-%m-%Y"];

/// Years a field export can plausibly carry. Anything outside is a typo.
pub const PLAUSIBLE_YEARS: std::ops::RangeInclusive<i32> = 1900..=2100;

/// Parse the many timestamp shapes field exports use. A bare date reads as
/// midnight; the timezone offset is dropped. Values outside
/// [`PLAUSIBLE_YEARS`] read as missing.
pub fn parse_datetime_safe(s: Option<&str>) -> Option<NaiveDateTime> {
    let s = s?.trim();
    if s.is_empty() {
        return None;
    }
    let parsed = DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.naive_local())
        .ok()
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        })
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })?;
    PLAUSIBLE_YEARS.contains(&parsed.year()).then_some(parsed)
}

/// Whole days elapsed from `from` to `to`, floored like a day count of a
/// signed interval: one hour backwards is -1.
pub fn elapsed_days(from: NaiveDateTime, to: NaiveDateTime) -> i64 {
    let delta: Duration = to - from;
    delta.num_seconds().div_euclid(86_400)
}

/// Canonical text form of an identifier cell: trimmed, and `"5060.0"`
/// collapsed to `"5060"` so spreadsheet float exports group with integers.
pub fn normalize_identifier(s: &str) -> String {
    let s = s.trim();
    if let Some(int_part) = s.strip_suffix(".0") {
        if !int_part.is_empty() && int_part.chars().all(|c| c.is_ascii_digit()) {
            return int_part.to_string();
        }
    }
    s.to_string()
}

/// `part / whole * 100`, or 0 when `whole` is zero.
pub fn percentage(part: f64, whole: f64) -> f64 {
    if whole == 0.0 {
        return 0.0;
    }
    part * 100.0 / whole
}

pub fn percentage_u64(part: u64, whole: u64) -> f64 {
    percentage(part as f64, whole as f64)
}

pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

pub fn average(v: &[f64]) -> f64 {
    // Standard arithmetic mean; returns 0 for an empty slice to avoid NaNs.
    if v.is_empty() {
        return 0.0;
    }
    let sum: f64 = v.iter().copied().sum();
    sum / v.len() as f64
}

pub fn maximum(v: &[f64]) -> Option<f64> {
    v.iter().copied().reduce(f64::max)
}

/// Monday of the week containing `date`, if it is representable.
pub fn week_start(date: NaiveDate) -> Option<NaiveDate> {
    date.checked_sub_days(Days::new(u64::from(date.weekday().num_days_from_monday())))
}

/// `dd/mm/YYYY - dd/mm/YYYY` label for the week starting on `start`.
pub fn week_label(start: NaiveDate) -> String {
    match start.checked_add_days(Days::new(6)) {
        Some(end) => format!("{} - {}", start.format("%d/%m/%Y"), end.format("%d/%m/%Y")),
        None => start.format("%d/%m/%Y").to_string(),
    }
}

/// Calendar month key; orders chronologically and prints as `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn of(date: NaiveDate) -> Self {
        YearMonth { year: date.year(), month: date.month() }
    }
}

impl std::fmt::Display for YearMonth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

pub fn format_number(n: f64, decimals: usize) -> String {
    // Format a floating-point value with:
    // - a fixed number of decimal places, and
    // - locale-aware thousands separators (e.g., `1,234,567.89`).
    let neg = n.is_sign_negative() && n != 0.0;
    let abs_n = n.abs();
    let s = format!("{:.*}", decimals, abs_n);
    let mut parts = s.split('.');
    let int_part = parts.next().unwrap_or("0");
    let frac_part = parts.next();
    let int_val: i64 = int_part.parse().unwrap_or(0);
    let mut res = int_val.to_formatted_string(&Locale::en);
    if let Some(frac) = frac_part {
        if decimals > 0 {
            res.push('.');
            res.push_str(frac);
        }
    }
    if neg {
        format!("-{}", res)
    } else {
        res
    }
}

pub fn format_int<T>(n: T) -> String
where
    T: ToFormattedString,
{
    n.to_formatted_string(&Locale::en)
}

// `tabled` display adapters.

pub fn display_f2(v: &f64) -> String {
    format_number(*v, 2)
}

pub fn display_f1(v: &f64) -> String {
    format_number(*v, 1)
}

pub fn display_opt_date(v: &Option<NaiveDate>) -> String {
    v.map(|d| d.to_string()).unwrap_or_else(|| "-".to_string())
}

pub fn display_opt_u64(v: &Option<u64>) -> String {
    match v {
        Some(n) => format_int(*n),
        None => "-".to_string(),
    }
}

#[cfg(test)]
pub(crate) fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {} but got {}",
        expected,
        actual
    );
}
