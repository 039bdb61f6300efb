//! Elapsed-time calculation for attendance records.

use crate::db::{DATE_FORMAT, TIME_FORMAT};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Hours worked between `time_in` and `time_out` on `date`, rounded to two
/// decimals.
///
/// Each endpoint may be a bare `HH:MM:SS` (anchored to `date`) or a full
/// `YYYY-MM-DD HH:MM:SS`. Returns `None` when either endpoint is missing or
/// unparseable, or when `time_out` precedes `time_in`.
pub fn hours_between(date: &str, time_in: Option<&str>, time_out: Option<&str>) -> Option<f64> {
    let start = parse_endpoint(date, time_in?)?;
    let end = parse_endpoint(date, time_out?)?;

    let seconds = (end - start).num_seconds();
    if seconds < 0 {
        return None;
    }
    Some(round2(seconds as f64 / 3600.0))
}

fn parse_endpoint(date: &str, value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(full) = NaiveDateTime::parse_from_str(value, DATETIME_FORMAT) {
        return Some(full);
    }
    let day = NaiveDate::parse_from_str(date.trim(), DATE_FORMAT).ok()?;
    let time = NaiveTime::parse_from_str(value, TIME_FORMAT).ok()?;
    Some(day.and_time(time))
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
