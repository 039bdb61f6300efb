//! Per-day attendance state machine.
//!
//! For a given staff member and date the record moves
//! `NoRecord → CheckedIn → CheckedOut` and never back. Every transition runs
//! in an `IMMEDIATE` transaction so two concurrent scans of the same person
//! serialise on the write lock instead of racing on the read.

use crate::db::{self, DATE_FORMAT, TIME_FORMAT};
use crate::duration;
use crate::error::Result;
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::{Deserialize, Serialize};

pub const STATUS_PRESENT: &str = "Present";

/// One attendance row, times kept as stored text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub id: i64,
    pub staff_id: i64,
    pub date: String,
    pub time_in: Option<String>,
    pub time_out: Option<String>,
    pub status: String,
    pub created_at: String,
}

impl AttendanceRecord {
    pub fn state(&self) -> AttendanceState {
        if self.time_out.is_some() {
            AttendanceState::CheckedOut
        } else {
            AttendanceState::CheckedIn
        }
    }

    /// Hours between check-in and check-out, when both are usable.
    pub fn duration_hours(&self) -> Option<f64> {
        duration::hours_between(&self.date, self.time_in.as_deref(), self.time_out.as_deref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttendanceState {
    NoRecord,
    CheckedIn,
    CheckedOut,
}

impl AttendanceState {
    pub fn of(record: Option<&AttendanceRecord>) -> Self {
        record.map_or(Self::NoRecord, AttendanceRecord::state)
    }
}

/// Result of feeding a recognised staff id into the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionOutcome {
    /// A new record was created with `time_in` set.
    CheckedIn(AttendanceRecord),
    /// Already checked in today; the caller must confirm to record check-out.
    ConfirmCheckOut { attendance_id: i64, record: AttendanceRecord },
    /// Already checked out today. Nothing changed.
    AlreadyCompleted(AttendanceRecord),
}

impl RecognitionOutcome {
    pub fn record(&self) -> &AttendanceRecord {
        match self {
            Self::CheckedIn(r) | Self::AlreadyCompleted(r) => r,
            Self::ConfirmCheckOut { record, .. } => record,
        }
    }
}

/// Result of confirming a check-out.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmOutcome {
    CheckedOut(AttendanceRecord),
    NotFound(i64),
    AlreadyCompleted(AttendanceRecord),
}

const ATTENDANCE_COLUMNS: &str = "id, emp_id, attendance_date, time_in, time_out, status, created_at";

fn attendance_from_row(row: &Row<'_>) -> rusqlite::Result<AttendanceRecord> {
    Ok(AttendanceRecord {
        id: row.get(0)?,
        staff_id: row.get(1)?,
        date: row.get(2)?,
        time_in: row.get(3)?,
        time_out: row.get(4)?,
        status: row.get(5)?,
        created_at: row.get(6)?,
    })
}

pub fn get_attendance(conn: &Connection, id: i64) -> Result<Option<AttendanceRecord>> {
    let sql = format!("SELECT {ATTENDANCE_COLUMNS} FROM attendance WHERE id = ?1");
    Ok(conn.query_row(&sql, params![id], attendance_from_row).optional()?)
}

/// The record for `staff_id` on `date` (`YYYY-MM-DD`), if any.
pub fn find_for_day(conn: &Connection, staff_id: i64, date: &str) -> Result<Option<AttendanceRecord>> {
    let sql = format!("SELECT {ATTENDANCE_COLUMNS} FROM attendance WHERE emp_id = ?1 AND attendance_date = ?2");
    Ok(conn.query_row(&sql, params![staff_id, date], attendance_from_row).optional()?)
}

/// Apply a recognition of `staff_id` at `now`.
pub fn recognize(conn: &mut Connection, staff_id: i64, now: NaiveDateTime) -> Result<RecognitionOutcome> {
    let date = now.format(DATE_FORMAT).to_string();
    let time = now.format(TIME_FORMAT).to_string();

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    if let Some(existing) = find_for_day(&tx, staff_id, &date)? {
        tx.commit()?;
        return Ok(classify_existing(existing));
    }

    let inserted = tx.execute(
        "INSERT INTO attendance (emp_id, attendance_date, time_in, status) VALUES (?1, ?2, ?3, ?4)",
        params![staff_id, date, time, STATUS_PRESENT],
    );

    let outcome = match inserted {
        Ok(_) => {
            let id = tx.last_insert_rowid();
            let record = get_attendance(&tx, id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)?;
            tracing::info!(staff_id, attendance_id = id, %date, %time, "time-in recorded");
            RecognitionOutcome::CheckedIn(record)
        }
        Err(e) if db::is_unique_violation(&e) => {
            tracing::debug!(staff_id, %date, "concurrent check-in detected, treating as duplicate");
            let existing = find_for_day(&tx, staff_id, &date)?.ok_or(e)?;
            classify_existing(existing)
        }
        Err(e) => return Err(e.into()),
    };

    tx.commit()?;
    Ok(outcome)
}

fn classify_existing(record: AttendanceRecord) -> RecognitionOutcome {
    match record.state() {
        AttendanceState::CheckedOut => {
            tracing::info!(staff_id = record.staff_id, attendance_id = record.id, "already checked out today");
            RecognitionOutcome::AlreadyCompleted(record)
        }
        _ => {
            tracing::info!(staff_id = record.staff_id, attendance_id = record.id, "check-out needs confirmation");
            RecognitionOutcome::ConfirmCheckOut { attendance_id: record.id, record }
        }
    }
}

/// Record check-out for `attendance_id` at `now`.
///
/// Only a record without `time_out` is updated; a second confirmation leaves
/// the first check-out time in place.
pub fn confirm(conn: &mut Connection, attendance_id: i64, now: NaiveDateTime) -> Result<ConfirmOutcome> {
    let time = now.format(TIME_FORMAT).to_string();
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let changed = tx.execute(
        "UPDATE attendance SET time_out = ?1, status = ?2 WHERE id = ?3 AND time_out IS NULL",
        params![time, STATUS_PRESENT, attendance_id],
    )?;
    let record = get_attendance(&tx, attendance_id)?;
    tx.commit()?;

    let outcome = match (changed, record) {
        (_, None) => {
            tracing::warn!(attendance_id, "confirm for unknown attendance record");
            ConfirmOutcome::NotFound(attendance_id)
        }
        (0, Some(record)) => {
            tracing::info!(attendance_id, "time-out already recorded");
            ConfirmOutcome::AlreadyCompleted(record)
        }
        (_, Some(record)) => {
            tracing::info!(attendance_id, staff_id = record.staff_id, %time, "time-out recorded");
            ConfirmOutcome::CheckedOut(record)
        }
    };
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use chrono::NaiveDate;
    use std::sync::{Arc, Barrier};

    fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, day).unwrap().and_hms_opt(h, m, 0).unwrap()
    }

    fn setup() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("attendance.db")).unwrap();
        (dir, db)
    }

    fn row_count(conn: &Connection) -> i64 {
        conn.query_row("SELECT COUNT(*) FROM attendance", [], |r| r.get(0)).unwrap()
    }

    #[test]
    fn test_first_recognition_checks_in() {
        let (_dir, db) = setup();
        let mut conn = db.connect().unwrap();

        let outcome = recognize(&mut conn, 1, at(2, 9, 0)).unwrap();
        let RecognitionOutcome::CheckedIn(record) = outcome else {
            panic!("expected CheckedIn, got {outcome:?}");
        };
        assert_eq!(record.date, "2026-03-02");
        assert_eq!(record.time_in.as_deref(), Some("09:00:00"));
        assert_eq!(record.time_out, None);
        assert_eq!(record.status, STATUS_PRESENT);
        assert_eq!(row_count(&conn), 1);
    }

    #[test]
    fn test_second_recognition_requests_confirmation_without_mutation() {
        let (_dir, db) = setup();
        let mut conn = db.connect().unwrap();

        let first = recognize(&mut conn, 1, at(2, 9, 0)).unwrap().record().clone();
        let outcome = recognize(&mut conn, 1, at(2, 12, 0)).unwrap();

        assert_eq!(
            outcome,
            RecognitionOutcome::ConfirmCheckOut { attendance_id: first.id, record: first.clone() }
        );
        assert_eq!(get_attendance(&conn, first.id).unwrap().unwrap(), first);
        assert_eq!(row_count(&conn), 1);
    }

    #[test]
    fn test_confirm_sets_time_out_once() {
        let (_dir, db) = setup();
        let mut conn = db.connect().unwrap();
        let id = recognize(&mut conn, 1, at(2, 9, 0)).unwrap().record().id;

        let ConfirmOutcome::CheckedOut(done) = confirm(&mut conn, id, at(2, 17, 30)).unwrap() else {
            panic!("expected CheckedOut");
        };
        assert_eq!(done.time_out.as_deref(), Some("17:30:00"));
        assert_eq!(done.duration_hours(), Some(8.5));

        let again = confirm(&mut conn, id, at(2, 18, 0)).unwrap();
        assert_eq!(again, ConfirmOutcome::AlreadyCompleted(done.clone()));
        assert_eq!(get_attendance(&conn, id).unwrap().unwrap().time_out.as_deref(), Some("17:30:00"));
    }

    #[test]
    fn test_confirm_unknown_id() {
        let (_dir, db) = setup();
        let mut conn = db.connect().unwrap();
        assert_eq!(confirm(&mut conn, 42, at(2, 9, 0)).unwrap(), ConfirmOutcome::NotFound(42));
        assert_eq!(row_count(&conn), 0);
    }

    #[test]
    fn test_completed_day_is_rejected_and_unchanged() {
        let (_dir, db) = setup();
        let mut conn = db.connect().unwrap();
        let id = recognize(&mut conn, 1, at(2, 9, 0)).unwrap().record().id;
        confirm(&mut conn, id, at(2, 17, 0)).unwrap();
        let before = get_attendance(&conn, id).unwrap().unwrap();

        let outcome = recognize(&mut conn, 1, at(2, 18, 0)).unwrap();
        assert_eq!(outcome, RecognitionOutcome::AlreadyCompleted(before.clone()));
        assert_eq!(get_attendance(&conn, id).unwrap().unwrap(), before);
    }

    #[test]
    fn test_new_day_starts_fresh_record() {
        let (_dir, db) = setup();
        let mut conn = db.connect().unwrap();
        let id = recognize(&mut conn, 1, at(2, 9, 0)).unwrap().record().id;
        confirm(&mut conn, id, at(2, 17, 0)).unwrap();

        let next = recognize(&mut conn, 1, at(3, 8, 45)).unwrap();
        let RecognitionOutcome::CheckedIn(record) = next else {
            panic!("expected CheckedIn on the next day");
        };
        assert_ne!(record.id, id);
        assert_eq!(record.date, "2026-03-03");
    }

    #[test]
    fn test_state_derivation() {
        let (_dir, db) = setup();
        let mut conn = db.connect().unwrap();
        assert_eq!(AttendanceState::of(find_for_day(&conn, 1, "2026-03-02").unwrap().as_ref()), AttendanceState::NoRecord);

        let id = recognize(&mut conn, 1, at(2, 9, 0)).unwrap().record().id;
        let record = find_for_day(&conn, 1, "2026-03-02").unwrap();
        assert_eq!(AttendanceState::of(record.as_ref()), AttendanceState::CheckedIn);

        confirm(&mut conn, id, at(2, 10, 0)).unwrap();
        let record = find_for_day(&conn, 1, "2026-03-02").unwrap();
        assert_eq!(AttendanceState::of(record.as_ref()), AttendanceState::CheckedOut);
    }

    #[test]
    fn test_concurrent_check_ins_create_one_record() {
        let (_dir, db) = setup();
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let db = db.clone();
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    let mut conn = db.connect().unwrap();
                    barrier.wait();
                    recognize(&mut conn, 7, at(2, 9, 0)).unwrap()
                })
            })
            .collect();

        let outcomes: Vec<RecognitionOutcome> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let checked_in = outcomes.iter().filter(|o| matches!(o, RecognitionOutcome::CheckedIn(_))).count();
        let confirm = outcomes
            .iter()
            .filter(|o| matches!(o, RecognitionOutcome::ConfirmCheckOut { .. }))
            .count();
        assert_eq!((checked_in, confirm), (1, 1));
        assert_eq!(row_count(&db.connect().unwrap()), 1);
    }
}
