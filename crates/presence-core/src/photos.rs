//! On-disk storage for registration photos and archived scans.

use crate::error::{Error, Result};
use chrono::NaiveDateTime;
use std::fs;
use std::path::{Path, PathBuf};

/// Default upload size limit (5 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 5 * 1024 * 1024;

const ALLOWED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];
const FILE_STAMP: &str = "%Y%m%d_%H%M%S";
const SCANS_DIR: &str = "scans";

#[derive(Debug, Clone)]
pub struct PhotoStore {
    dir: PathBuf,
    max_bytes: u64,
}

impl PhotoStore {
    pub fn new(dir: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self { dir: dir.into(), max_bytes }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Copy a registration photo into the uploads directory.
    ///
    /// The stored name is `<sanitised-name>_<YYYYmmdd_HHMMSS>.<ext>`, with a
    /// numeric suffix if that name is already taken.
    pub fn import(&self, src: &Path, name: &str, now: NaiveDateTime) -> Result<PathBuf> {
        let ext = allowed_extension(src)?;

        let size = fs::metadata(src)
            .map_err(|e| Error::InvalidPhoto(format!("{}: {e}", src.display())))?
            .len();
        if size == 0 {
            return Err(Error::InvalidPhoto(format!("{} is empty", src.display())));
        }
        if size > self.max_bytes {
            return Err(Error::InvalidPhoto(format!(
                "{} is {size} bytes, limit is {}",
                src.display(),
                self.max_bytes
            )));
        }

        fs::create_dir_all(&self.dir)?;
        let stem = format!("{}_{}", sanitize(name), now.format(FILE_STAMP));
        let mut dest = self.dir.join(format!("{stem}.{ext}"));
        let mut n = 1;
        while dest.exists() {
            dest = self.dir.join(format!("{stem}_{n}.{ext}"));
            n += 1;
        }

        fs::copy(src, &dest)?;
        tracing::debug!(src = %src.display(), dest = %dest.display(), "photo imported");
        Ok(dest)
    }

    /// Delete a stored photo. A file that is already gone only logs a warning.
    pub fn remove(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "photo removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "photo already missing");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Best-effort copy of a recognised scan into `scans/`. Failures are
    /// logged and swallowed.
    pub fn archive_scan(&self, bytes: &[u8], staff_id: i64, now: NaiveDateTime) -> Option<PathBuf> {
        let ext = match image::guess_format(bytes) {
            Ok(image::ImageFormat::Png) => "png",
            _ => "jpg",
        };
        let dir = self.dir.join(SCANS_DIR);
        let path = dir.join(format!("{staff_id}_{}.{ext}", now.format(FILE_STAMP)));

        match fs::create_dir_all(&dir).and_then(|()| fs::write(&path, bytes)) {
            Ok(()) => {
                tracing::debug!(staff_id, path = %path.display(), "scan archived");
                Some(path)
            }
            Err(e) => {
                tracing::warn!(staff_id, error = %e, "failed to archive scan");
                None
            }
        }
    }
}

fn allowed_extension(path: &Path) -> Result<String> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .ok_or_else(|| Error::InvalidPhoto(format!("{} has no file extension", path.display())))?;
    if !ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
        return Err(Error::InvalidPhoto(format!(
            "unsupported extension .{ext}, expected one of {}",
            ALLOWED_EXTENSIONS.join(", ")
        )));
    }
    Ok(ext)
}

/// Reduce a display name to a safe file stem.
fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            c if c.is_ascii_alphanumeric() || c == '-' || c == '.' => c,
            _ => '_',
        })
        .collect();
    let cleaned = cleaned.trim_matches(|c| c == '_' || c == '.').to_string();
    if cleaned.is_empty() {
        "staff".to_string()
    } else {
        cleaned
    }
}
