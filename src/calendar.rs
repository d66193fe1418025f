//! Rows of the gold `dim_date` table, one per calendar day.
//!
//! `day_of_week` follows ISO numbering (Monday = 1 through Sunday = 7) and
//! `week` is the ISO week. Fiscal years are named after the calendar year in
//! which they end.

use crate::data_store::{Row, Value};
use chrono::{Datelike, NaiveDate, Weekday};
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum CalendarError {
    #[error("Fiscal year start month must be 1..=12, got {0}")]
    InvalidFiscalStart(u32),
    #[error("Range end {end} is before start {start}")]
    InvertedRange { start: NaiveDate, end: NaiveDate },
}

#[derive(Debug, Clone)]
pub struct CalendarOptions {
    /// First month of the fiscal year; 1 makes it the calendar year
    pub fiscal_year_start_month: u32,
    pub holidays: BTreeSet<NaiveDate>,
}

impl Default for CalendarOptions {
    fn default() -> Self {
        CalendarOptions {
            fiscal_year_start_month: 1,
            holidays: BTreeSet::new(),
        }
    }
}

impl CalendarOptions {
    pub fn validate(&self) -> Result<(), CalendarError> {
        if !(1..=12).contains(&self.fiscal_year_start_month) {
            return Err(CalendarError::InvalidFiscalStart(
                self.fiscal_year_start_month,
            ));
        }
        Ok(())
    }
}

/// Rows for every date in `start..=end`.
pub fn date_rows(
    start: NaiveDate,
    end: NaiveDate,
    options: &CalendarOptions,
) -> Result<Vec<Row>, CalendarError> {
    options.validate()?;
    if end < start {
        return Err(CalendarError::InvertedRange { start, end });
    }
    Ok(start
        .iter_days()
        .take_while(|date| *date <= end)
        .map(|date| date_row(date, options))
        .collect())
}

/// The `dim_date` row for one date. `options` is assumed valid.
pub fn date_row(date: NaiveDate, options: &CalendarOptions) -> Row {
    let month = date.month();
    let quarter = (month - 1) / 3 + 1;
    let (fiscal_year, fiscal_quarter) = fiscal_period(date, options.fiscal_year_start_month);
    let weekday = date.weekday();

    Row::new()
        .with("date_key", Value::Int(date_key(date)))
        .with("date", Value::Date(date))
        .with("year", Value::Int(i64::from(date.year())))
        .with("quarter", Value::Int(i64::from(quarter)))
        .with("month", Value::Int(i64::from(month)))
        .with("month_name", Value::String(date.format("%B").to_string()))
        .with("week", Value::Int(i64::from(date.iso_week().week())))
        .with("day_of_month", Value::Int(i64::from(date.day())))
        .with(
            "day_of_week",
            Value::Int(i64::from(weekday.number_from_monday())),
        )
        .with("day_name", Value::String(date.format("%A").to_string()))
        .with(
            "is_weekend",
            Value::Boolean(matches!(weekday, Weekday::Sat | Weekday::Sun)),
        )
        .with("is_holiday", Value::Boolean(options.holidays.contains(&date)))
        .with("fiscal_year", Value::Int(i64::from(fiscal_year)))
        .with("fiscal_quarter", Value::Int(i64::from(fiscal_quarter)))
}

/// `YYYYMMDD` as an integer, e.g. 20240309
pub fn date_key(date: NaiveDate) -> i64 {
    i64::from(date.year()) * 10_000 + i64::from(date.month()) * 100 + i64::from(date.day())
}

fn fiscal_period(date: NaiveDate, start_month: u32) -> (i32, u32) {
    let month = date.month();
    let fiscal_year = if start_month > 1 && month >= start_month {
        date.year() + 1
    } else {
        date.year()
    };
    let offset = (month + 12 - start_month) % 12;
    (fiscal_year, offset / 3 + 1)
}
