//! Read-only attendance projections joined with staff names.
//!
//! Rows whose staff member has been deleted stay in the database but are
//! hidden here by the inner join.

use crate::db::DATE_FORMAT;
use crate::duration;
use crate::error::Result;
use crate::staff;
use chrono::{Duration, NaiveDate};
use rusqlite::{params, Connection, Row};
use serde::Serialize;
use std::collections::BTreeSet;

const RECENT_LIMIT: i64 = 10;
const WEEK_DAYS: i64 = 7;

const JOINED_SELECT: &str = "SELECT a.id, a.emp_id, s.name, a.attendance_date, a.time_in, a.time_out, a.status
     FROM attendance a
     JOIN staff s ON a.emp_id = s.emp_id";

/// An attendance record with the staff name and derived duration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceRow {
    pub id: i64,
    pub staff_id: i64,
    pub name: String,
    pub date: String,
    pub time_in: Option<String>,
    pub time_out: Option<String>,
    pub status: String,
    pub duration_hours: Option<f64>,
}

fn row_from_sql(row: &Row<'_>) -> rusqlite::Result<AttendanceRow> {
    let date: String = row.get(3)?;
    let time_in: Option<String> = row.get(4)?;
    let time_out: Option<String> = row.get(5)?;
    let duration_hours = duration::hours_between(&date, time_in.as_deref(), time_out.as_deref());
    Ok(AttendanceRow {
        id: row.get(0)?,
        staff_id: row.get(1)?,
        name: row.get(2)?,
        date,
        time_in,
        time_out,
        status: row.get(6)?,
        duration_hours,
    })
}

fn query_rows(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<Vec<AttendanceRow>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, row_from_sql)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Rows for one day, latest check-in first.
pub fn today(conn: &Connection, date: NaiveDate) -> Result<Vec<AttendanceRow>> {
    let sql = format!("{JOINED_SELECT} WHERE a.attendance_date = ?1 ORDER BY a.time_in DESC, a.id DESC");
    query_rows(conn, &sql, params![date.format(DATE_FORMAT).to_string()])
}

/// Full history, newest day first and latest check-in first within a day.
pub fn log(conn: &Connection) -> Result<Vec<AttendanceRow>> {
    let sql = format!("{JOINED_SELECT} ORDER BY a.attendance_date DESC, a.time_in DESC, a.id DESC");
    query_rows(conn, &sql, [])
}

fn recent(conn: &Connection, limit: i64) -> Result<Vec<AttendanceRow>> {
    let sql = format!("{JOINED_SELECT} ORDER BY a.attendance_date DESC, a.time_in DESC, a.id DESC LIMIT ?1");
    query_rows(conn, &sql, params![limit])
}

/// Aggregates shown above the attendance log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogSummary {
    pub total_records: usize,
    pub unique_employees: usize,
    /// Share of rows with status "Present", truncated to a whole percent.
    pub present_percent: u32,
    /// Mean of the available durations, one decimal; 0 when none are available.
    pub average_duration_hours: f64,
}

impl LogSummary {
    pub fn from_rows(rows: &[AttendanceRow]) -> Self {
        let unique_employees = rows.iter().map(|r| r.staff_id).collect::<BTreeSet<_>>().len();

        let present_percent = if rows.is_empty() {
            0
        } else {
            let present = rows.iter().filter(|r| r.status == crate::attendance::STATUS_PRESENT).count();
            (present * 100 / rows.len()) as u32
        };

        let durations: Vec<f64> = rows.iter().filter_map(|r| r.duration_hours).collect();
        let average_duration_hours = if durations.is_empty() {
            0.0
        } else {
            let mean = durations.iter().sum::<f64>() / durations.len() as f64;
            (mean * 10.0).round() / 10.0
        };

        Self {
            total_records: rows.len(),
            unique_employees,
            present_percent,
            average_duration_hours,
        }
    }
}

/// Dashboard figures for `today`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Overview {
    pub total_staff: i64,
    pub present_today: i64,
    pub absent_today: i64,
    /// Distinct staff seen in the seven days ending `today`, over staff × 7.
    pub week_attendance_percent: u32,
    pub recent: Vec<AttendanceRow>,
}

pub fn overview(conn: &Connection, today: NaiveDate) -> Result<Overview> {
    let total_staff = staff::count_staff(conn)?;
    let today_str = today.format(DATE_FORMAT).to_string();

    let present_today: i64 = conn.query_row(
        "SELECT COUNT(DISTINCT a.emp_id) FROM attendance a
         JOIN staff s ON a.emp_id = s.emp_id
         WHERE a.attendance_date = ?1",
        params![today_str],
        |r| r.get(0),
    )?;

    let week_start = (today - Duration::days(WEEK_DAYS - 1)).format(DATE_FORMAT).to_string();
    let seen_this_week: i64 = conn.query_row(
        "SELECT COUNT(DISTINCT a.emp_id) FROM attendance a
         JOIN staff s ON a.emp_id = s.emp_id
         WHERE a.attendance_date >= ?1 AND a.attendance_date <= ?2",
        params![week_start, today_str],
        |r| r.get(0),
    )?;

    let week_attendance_percent = if total_staff > 0 {
        (seen_this_week * 100 / (total_staff * WEEK_DAYS)) as u32
    } else {
        0
    };

    Ok(Overview {
        total_staff,
        present_today,
        absent_today: (total_staff - present_today).max(0),
        week_attendance_percent,
        recent: recent(conn, RECENT_LIMIT)?,
    })
}
