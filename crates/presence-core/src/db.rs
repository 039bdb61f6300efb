//! SQLite storage: connection scoping and schema migrations.
//!
//! Every attendance operation opens its own connection through
//! [`Database::connect`] and drops it when done, so the handle is released on
//! success, rejection and error alike.

use crate::error::Result;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Date format stored in `attendance_date`.
pub const DATE_FORMAT: &str = "%Y-%m-%d";
/// Time-of-day format stored in `time_in` / `time_out`.
pub const TIME_FORMAT: &str = "%H:%M:%S";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Ordered schema migrations. Index + 1 is the `user_version` after applying.
/// Only append; never edit an entry that has shipped.
const MIGRATIONS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS staff (
        emp_id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        email TEXT,
        phone TEXT,
        department TEXT,
        gender TEXT,
        joining_date TEXT,
        dob TEXT,
        native TEXT,
        image_path TEXT NOT NULL,
        created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    );
    CREATE TABLE IF NOT EXISTS attendance (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        emp_id INTEGER NOT NULL,
        attendance_date TEXT NOT NULL,
        time_in TEXT,
        time_out TEXT,
        status TEXT NOT NULL DEFAULT 'Present',
        created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
        UNIQUE(emp_id, attendance_date)
    );",
    "CREATE INDEX IF NOT EXISTS idx_attendance_date ON attendance(attendance_date);",
];

/// Handle to the attendance database file.
#[derive(Debug, Clone)]
pub struct Database {
    path: PathBuf,
}

impl Database {
    /// Open (creating if absent) the database and bring the schema up to date.
    /// Existing data is never dropped.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let db = Self { path };
        let mut conn = db.connect()?;
        migrate(&mut conn)?;
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a fresh connection scoped to one operation.
    pub fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }
}

/// Apply pending migrations inside one transaction.
fn migrate(conn: &mut Connection) -> Result<()> {
    let current: usize = conn.query_row("PRAGMA user_version", [], |row| row.get::<_, i64>(0))? as usize;
    if current >= MIGRATIONS.len() {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for (idx, sql) in MIGRATIONS.iter().enumerate().skip(current) {
        tx.execute_batch(sql)?;
        tracing::debug!(version = idx + 1, "applied schema migration");
    }
    tx.pragma_update(None, "user_version", MIGRATIONS.len() as i64)?;
    tx.commit()?;

    tracing::info!(from = current, to = MIGRATIONS.len(), "database schema migrated");
    Ok(())
}

/// True when `err` is a UNIQUE / PRIMARY KEY violation.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
                && (e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::params;

    #[test]
    fn test_open_creates_schema() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("nested/attendance.db")).unwrap();
        let conn = db.connect().unwrap();
        let version: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0)).unwrap();
        assert_eq!(version as usize, MIGRATIONS.len());

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('staff', 'attendance')",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(tables, 2);
    }

    #[test]
    fn test_reopen_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance.db");

        let db = Database::open(&path).unwrap();
        db.connect()
            .unwrap()
            .execute("INSERT INTO staff (name, image_path) VALUES (?1, ?2)", params!["Ada", "/tmp/a.png"])
            .unwrap();

        let db = Database::open(&path).unwrap();
        let count: i64 = db
            .connect()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM staff", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1, "re-opening must not reset the schema");
    }

    #[test]
    fn test_unique_constraint_on_staff_and_date() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("attendance.db")).unwrap();
        let conn = db.connect().unwrap();
        let insert = "INSERT INTO attendance (emp_id, attendance_date, time_in) VALUES (1, '2026-03-02', '09:00:00')";
        conn.execute(insert, []).unwrap();

        let err = conn.execute(insert, []).unwrap_err();
        assert!(is_unique_violation(&err), "got {err:?}");
    }
}
