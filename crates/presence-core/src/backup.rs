//! Database snapshots and storage accounting.

use crate::duration::round2;
use crate::error::{Error, Result};
use chrono::{DateTime, Local, NaiveDateTime};
use rusqlite::{params, Connection};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

const BACKUP_PREFIX: &str = "attendance_backup_";
const BACKUP_EXT: &str = "db";
const FILE_STAMP: &str = "%Y%m%d_%H%M%S";
/// Length of a rendered `FILE_STAMP`, e.g. `20260302_090000`.
const FILE_STAMP_LEN: usize = 15;
const MB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackupInfo {
    pub name: String,
    /// Local modification time, `YYYY-MM-DD HH:MM`.
    pub modified: String,
    pub size_kb: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageSummary {
    pub database_mb: f64,
    pub backup_count: usize,
    pub backups_mb: f64,
}

#[derive(Debug, Clone)]
pub struct BackupManager {
    db_path: PathBuf,
    dir: PathBuf,
}

impl BackupManager {
    pub fn new(db_path: impl Into<PathBuf>, dir: impl Into<PathBuf>) -> Self {
        Self { db_path: db_path.into(), dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Snapshot the database with `VACUUM INTO`, returning the backup name.
    pub fn create(&self, conn: &Connection, now: NaiveDateTime) -> Result<String> {
        fs::create_dir_all(&self.dir)?;

        let stem = format!("{BACKUP_PREFIX}{}", now.format(FILE_STAMP));
        let mut name = format!("{stem}.{BACKUP_EXT}");
        let mut n = 1;
        while self.dir.join(&name).exists() {
            name = format!("{stem}_{n}.{BACKUP_EXT}");
            n += 1;
        }

        let target = self.dir.join(&name);
        conn.execute("VACUUM INTO ?1", params![target.to_string_lossy()])?;
        tracing::info!(backup = %name, dir = %self.dir.display(), "database backup created");
        Ok(name)
    }

    /// Backups, newest first.
    pub fn list(&self) -> Result<Vec<BackupInfo>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut backups = Vec::new();
        for entry in entries {
            let entry = entry?;
            let meta = entry.metadata()?;
            let path = entry.path();
            if !meta.is_file() || path.extension().and_then(|e| e.to_str()) != Some(BACKUP_EXT) {
                continue;
            }
            let modified = meta
                .modified()
                .map(|t| DateTime::<Local>::from(t).format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_default();
            backups.push(BackupInfo {
                name: entry.file_name().to_string_lossy().into_owned(),
                modified,
                size_kb: round2(meta.len() as f64 / 1024.0),
            });
        }

        backups.sort_by(|a, b| {
            sort_key(&b.name)
                .cmp(&sort_key(&a.name))
                .then_with(|| b.name.cmp(&a.name))
        });
        Ok(backups)
    }

    /// Delete a backup by file name. Returns `false` if it did not exist.
    pub fn delete(&self, name: &str) -> Result<bool> {
        validate_name(name)?;
        match fs::remove_file(self.dir.join(name)) {
            Ok(()) => {
                tracing::info!(backup = %name, "backup deleted");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub fn latest(&self) -> Result<Option<String>> {
        Ok(self.list()?.into_iter().next().map(|b| b.name))
    }

    pub fn storage_summary(&self) -> Result<StorageSummary> {
        let database_bytes = match fs::metadata(&self.db_path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };
        let backups = self.list()?;
        let backup_kb: f64 = backups.iter().map(|b| b.size_kb).sum();

        Ok(StorageSummary {
            database_mb: round2(database_bytes as f64 / MB),
            backup_count: backups.len(),
            backups_mb: round2(backup_kb / 1024.0),
        })
    }
}

/// Order key for backup names: the timestamp, then the numeric
/// same-second suffix (`_2` before `_10`). Other names sort by themselves.
fn sort_key(name: &str) -> (&str, u32) {
    let stem = name
        .strip_prefix(BACKUP_PREFIX)
        .and_then(|rest| rest.strip_suffix(".db"));
    let Some(stem) = stem else {
        return (name, 0);
    };
    let (Some(stamp), Some(suffix)) = (stem.get(..FILE_STAMP_LEN), stem.get(FILE_STAMP_LEN..)) else {
        return (name, 0);
    };
    if suffix.is_empty() {
        return (stamp, 0);
    }
    match suffix.strip_prefix('_').and_then(|n| n.parse().ok()) {
        Some(n) => (stamp, n),
        None => (name, 0),
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains("..") {
        return Err(Error::InvalidBackupName(name.to_string()));
    }
    Ok(())
}
