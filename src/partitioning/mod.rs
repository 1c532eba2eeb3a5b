//! Date-based partition naming and source query generation
//!
//! Partition names are integer date keys at a chosen granularity:
//!
//! - Yearly: `YYYY`
//! - Monthly: `YYYYMM`
//! - Daily: `YYYYMMDD`
//!
//! Source queries are produced from per-table templates with `{0}`/`{1}`
//! placeholders that receive the `YYYYMMDD` bounds of the period that
//! contains the requested date.

mod templates;

pub use templates::QueryTemplates;

use crate::{Error, Result};
use chrono::{Datelike, Months, NaiveDate, Utc};

/// Partition granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub enum Granularity {
    Undefined,
    Yearly,
    #[default]
    Monthly,
    Daily,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Yearly => "yearly",
            Self::Monthly => "monthly",
            Self::Daily => "daily",
        }
    }
}

impl std::str::FromStr for Granularity {
    type Err = Error;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "undefined" => Ok(Self::Undefined),
            "yearly" | "year" => Ok(Self::Yearly),
            "monthly" | "month" => Ok(Self::Monthly),
            "daily" | "day" => Ok(Self::Daily),
            other => Err(Error::Config(format!(
                "unknown granularity '{}'; expected one of yearly, monthly, daily",
                other
            ))),
        }
    }
}

/// Integer `YYYYMMDD` key for a date.
pub fn date_key(date: NaiveDate) -> i64 {
    date.year() as i64 * 10_000 + date.month() as i64 * 100 + date.day() as i64
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// Deterministic partition name for `date` at `granularity`.
///
/// `None` means the current UTC date.
pub fn generate_partition_key(date: Option<NaiveDate>, granularity: Granularity) -> String {
    let date = date.unwrap_or_else(today);
    let key = match granularity {
        Granularity::Yearly => date.year() as i64,
        Granularity::Monthly => date.year() as i64 * 100 + date.month() as i64,
        Granularity::Daily => date_key(date),
        Granularity::Undefined => -1,
    };
    key.to_string()
}

/// Number of days in the month containing `date`.
pub fn days_in_month(date: NaiveDate) -> u32 {
    let first = first_of_month(date);
    match first.checked_add_months(Months::new(1)) {
        Some(next) => next.signed_duration_since(first).num_days() as u32,
        None => 31,
    }
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// `(begin_key, end_key)` bounding the period that contains `date`.
///
/// Yearly and monthly bounds are the first and last day of the period; daily
/// bounds are the day itself and the following day.
pub fn period_bounds(date: NaiveDate, granularity: Granularity) -> (i64, i64) {
    match granularity {
        Granularity::Yearly => {
            let year = date.year() as i64 * 10_000;
            (year + 101, year + 1231)
        }
        Granularity::Monthly => {
            let month = date.year() as i64 * 10_000 + date.month() as i64 * 100;
            (month + 1, month + days_in_month(date) as i64)
        }
        Granularity::Daily => {
            let next = date.succ_opt().unwrap_or(date);
            (date_key(date), date_key(next))
        }
        Granularity::Undefined => (0, i32::MAX as i64),
    }
}

/// Source query for `table_name` covering the period that contains `date`.
///
/// Templates without both `{0}` and `{1}` are returned verbatim.
pub fn source_query_for_date(
    templates: &QueryTemplates,
    table_name: &str,
    date: Option<NaiveDate>,
    granularity: Granularity,
) -> Result<String> {
    let template = templates
        .get(table_name)
        .ok_or_else(|| Error::UnknownTableQuery(table_name.to_string()))?;

    if !(template.contains("{0}") && template.contains("{1}")) {
        return Ok(template.to_string());
    }

    let (begin, end) = period_bounds(date.unwrap_or_else(today), granularity);
    Ok(template
        .replace("{0}", &begin.to_string())
        .replace("{1}", &end.to_string()))
}

/// Daily partition names for every day of the month containing `date`.
pub fn daily_partition_names_for_month(date: Option<NaiveDate>) -> Vec<String> {
    let first = first_of_month(date.unwrap_or_else(today));
    first
        .iter_days()
        .take(days_in_month(first) as usize)
        .map(|day| date_key(day).to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_partition_keys_per_granularity() {
        let date = ymd(2024, 3, 15);
        assert_eq!(generate_partition_key(Some(date), Granularity::Yearly), "2024");
        assert_eq!(generate_partition_key(Some(date), Granularity::Monthly), "202403");
        assert_eq!(generate_partition_key(Some(date), Granularity::Daily), "20240315");
        assert_eq!(generate_partition_key(Some(date), Granularity::Undefined), "-1");
    }

    #[test]
    fn test_partition_key_defaults_to_today() {
        let expected = generate_partition_key(Some(Utc::now().date_naive()), Granularity::Daily);
        assert_eq!(generate_partition_key(None, Granularity::Daily), expected);
    }

    #[test]
    fn test_monthly_keys_step_by_one_except_year_boundary() {
        let mut date = ymd(2022, 1, 1);
        let mut prev: i64 = generate_partition_key(Some(date), Granularity::Monthly)
            .parse()
            .unwrap();
        for _ in 0..36 {
            date = date.checked_add_months(Months::new(1)).unwrap();
            let key: i64 = generate_partition_key(Some(date), Granularity::Monthly)
                .parse()
                .unwrap();
            let expected_step = if date.month() == 1 { 89 } else { 1 };
            assert_eq!(key - prev, expected_step, "step into {}", date);
            prev = key;
        }
    }

    #[test]
    fn test_daily_keys_increase_monotonically() {
        let mut date = ymd(2023, 12, 25);
        let mut prev: i64 = 0;
        for _ in 0..400 {
            let key: i64 = generate_partition_key(Some(date), Granularity::Daily)
                .parse()
                .unwrap();
            assert!(key > prev);
            prev = key;
            date = date.succ_opt().unwrap();
        }
    }

    #[test]
    fn test_period_bounds() {
        assert_eq!(period_bounds(ymd(2024, 3, 15), Granularity::Yearly), (20240101, 20241231));
        assert_eq!(period_bounds(ymd(2024, 2, 10), Granularity::Monthly), (20240201, 20240229));
        assert_eq!(period_bounds(ymd(2023, 2, 10), Granularity::Monthly), (20230201, 20230228));
        assert_eq!(period_bounds(ymd(2023, 12, 31), Granularity::Daily), (20231231, 20240101));
    }

    #[test]
    fn test_source_query_substitutes_month_bounds() {
        let templates = QueryTemplates::with_defaults();
        let query = source_query_for_date(
            &templates,
            "metrics-internet-sales",
            Some(ymd(2024, 3, 15)),
            Granularity::Monthly,
        )
        .unwrap();
        assert!(query.ends_with(">= 20240301 and [OrderDateKey] < 20240331"), "{}", query);
    }

    #[test]
    fn test_source_query_lookup_is_case_insensitive() {
        let templates = QueryTemplates::with_defaults();
        assert!(source_query_for_date(
            &templates,
            "Metrics-Internet-Sales",
            Some(ymd(2024, 1, 1)),
            Granularity::Monthly
        )
        .is_ok());
    }

    #[test]
    fn test_template_without_placeholders_is_verbatim() {
        let mut templates = QueryTemplates::new();
        templates.insert("Orders", "SELECT * FROM Orders");
        let query =
            source_query_for_date(&templates, "orders", Some(ymd(2024, 1, 1)), Granularity::Daily)
                .unwrap();
        assert_eq!(query, "SELECT * FROM Orders");
    }

    #[test]
    fn test_unknown_table_query() {
        let templates = QueryTemplates::new();
        let err = source_query_for_date(&templates, "missing", None, Granularity::Monthly)
            .unwrap_err();
        assert!(matches!(err, Error::UnknownTableQuery(t) if t == "missing"));
    }

    #[test]
    fn test_daily_partition_names_for_month() {
        let names = daily_partition_names_for_month(Some(ymd(2024, 2, 17)));
        assert_eq!(names.len(), 29);
        assert_eq!(names.first().unwrap(), "20240201");
        assert_eq!(names.last().unwrap(), "20240229");
    }

    #[test]
    fn test_granularity_from_str() {
        assert_eq!("Monthly".parse::<Granularity>().unwrap(), Granularity::Monthly);
        assert!("weekly".parse::<Granularity>().is_err());
    }
}
