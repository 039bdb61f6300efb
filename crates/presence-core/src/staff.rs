//! Staff registry rows and their SQLite queries.

use crate::error::{Error, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A registered staff member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaffRecord {
    pub id: i64,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub department: Option<String>,
    pub gender: Option<String>,
    pub joining_date: Option<String>,
    pub dob: Option<String>,
    pub native: Option<String>,
    pub photo_path: PathBuf,
    pub created_at: String,
}

/// Details supplied at registration time.
#[derive(Debug, Clone, Default)]
pub struct NewStaff {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub department: Option<String>,
    pub gender: Option<String>,
    pub joining_date: Option<String>,
    pub dob: Option<String>,
    pub native: Option<String>,
}

impl NewStaff {
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidStaff("name is required".into()));
        }
        Ok(())
    }
}

const STAFF_COLUMNS: &str =
    "emp_id, name, email, phone, department, gender, joining_date, dob, native, image_path, created_at";

fn staff_from_row(row: &Row<'_>) -> rusqlite::Result<StaffRecord> {
    Ok(StaffRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        phone: row.get(3)?,
        department: row.get(4)?,
        gender: row.get(5)?,
        joining_date: row.get(6)?,
        dob: row.get(7)?,
        native: row.get(8)?,
        photo_path: PathBuf::from(row.get::<_, String>(9)?),
        created_at: row.get(10)?,
    })
}

/// Insert a staff row and return its new id.
pub fn insert_staff(conn: &Connection, staff: &NewStaff, photo_path: &std::path::Path) -> Result<i64> {
    staff.validate()?;
    conn.execute(
        "INSERT INTO staff (name, email, phone, department, gender, joining_date, dob, native, image_path)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            staff.name.trim(),
            staff.email,
            staff.phone,
            staff.department,
            staff.gender,
            staff.joining_date,
            staff.dob,
            staff.native,
            photo_path.to_string_lossy(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_staff(conn: &Connection, id: i64) -> Result<Option<StaffRecord>> {
    let sql = format!("SELECT {STAFF_COLUMNS} FROM staff WHERE emp_id = ?1");
    Ok(conn.query_row(&sql, params![id], staff_from_row).optional()?)
}

/// All staff, most recently registered first.
pub fn list_staff(conn: &Connection) -> Result<Vec<StaffRecord>> {
    let sql = format!("SELECT {STAFF_COLUMNS} FROM staff ORDER BY emp_id DESC");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], staff_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn count_staff(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM staff", [], |r| r.get(0))?)
}

/// Delete a staff row, returning what was removed.
pub fn delete_staff(conn: &Connection, id: i64) -> Result<Option<StaffRecord>> {
    let Some(existing) = get_staff(conn, id)? else {
        return Ok(None);
    };
    conn.execute("DELETE FROM staff WHERE emp_id = ?1", params![id])?;
    Ok(Some(existing))
}
