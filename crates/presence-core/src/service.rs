//! Staff registration and scan handling over the stores and state machine.

use crate::attendance::{self, ConfirmOutcome, RecognitionOutcome};
use crate::db::Database;
use crate::encodings::{EncodingStore, RebuildReport};
use crate::error::{Error, Result};
use crate::matcher::{self, FaceMatch};
use crate::photos::PhotoStore;
use crate::staff::{self, NewStaff, StaffRecord};
use chrono::NaiveDateTime;
use presence_vision::FaceAnalyzer;
use std::path::Path;

/// Outcome of one scan.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanOutcome {
    /// No face in the frame matched a registered staff member.
    Unrecognized { faces: usize },
    Recognized {
        face: FaceMatch,
        staff: StaffRecord,
        attendance: RecognitionOutcome,
    },
}

/// A completed registration.
#[derive(Debug, Clone)]
pub struct Registration {
    pub staff: StaffRecord,
    pub rebuild: RebuildReport,
}

impl Registration {
    /// Whether the new photo produced an embedding.
    pub fn encoded(&self) -> bool {
        !self.rebuild.skipped.iter().any(|s| s.staff_id == self.staff.id)
    }
}

pub struct AttendanceService<A: FaceAnalyzer> {
    db: Database,
    encodings: EncodingStore,
    photos: PhotoStore,
    analyzer: A,
    threshold: f32,
    archive_scans: bool,
}

impl<A: FaceAnalyzer> AttendanceService<A> {
    pub fn new(db: Database, encodings: EncodingStore, photos: PhotoStore, analyzer: A, threshold: f32) -> Self {
        Self { db, encodings, photos, analyzer, threshold, archive_scans: true }
    }

    /// Keep a copy of every recognised scan under the uploads directory.
    pub fn with_scan_archive(mut self, enabled: bool) -> Self {
        self.archive_scans = enabled;
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn encoding_store(&self) -> &EncodingStore {
        &self.encodings
    }

    pub fn analyzer(&self) -> &A {
        &self.analyzer
    }

    /// Store the photo, insert the staff row and rebuild the encodings.
    ///
    /// If the rebuild fails the row and the stored photo are rolled back, so
    /// a returned error never leaves a half-registered staff member behind.
    pub fn register_staff(&mut self, details: &NewStaff, photo: &Path, now: NaiveDateTime) -> Result<Registration> {
        details.validate()?;
        let stored = self.photos.import(photo, &details.name, now)?;

        let conn = self.db.connect()?;
        let inserted = staff::insert_staff(&conn, details, &stored).and_then(|id| {
            staff::get_staff(&conn, id)?.ok_or(Error::Sqlite(rusqlite::Error::QueryReturnedNoRows))
        });
        let record = match inserted {
            Ok(record) => record,
            Err(e) => {
                self.discard_photo(&stored);
                return Err(e);
            }
        };
        drop(conn);

        tracing::info!(staff_id = record.id, name = %record.name, "staff registered");
        match self.rebuild_encodings() {
            Ok(rebuild) => Ok(Registration { staff: record, rebuild }),
            Err(e) => {
                tracing::warn!(staff_id = record.id, error = %e, "encoding rebuild failed, rolling back registration");
                if let Err(rollback) = self.db.connect().and_then(|c| staff::delete_staff(&c, record.id)) {
                    tracing::warn!(staff_id = record.id, error = %rollback, "failed to roll back staff row");
                }
                self.discard_photo(&stored);
                Err(e)
            }
        }
    }

    /// Delete a staff member, rebuild the encodings, then delete their photo.
    /// Attendance history is kept.
    ///
    /// The rebuild runs before the photo is touched so the encoding store
    /// never outlives the staff row. Photo deletion is best-effort.
    pub fn remove_staff(&mut self, staff_id: i64) -> Result<Option<StaffRecord>> {
        let conn = self.db.connect()?;
        let Some(removed) = staff::delete_staff(&conn, staff_id)? else {
            tracing::warn!(staff_id, "remove requested for unknown staff");
            return Ok(None);
        };
        drop(conn);

        tracing::info!(staff_id, name = %removed.name, "staff removed");
        self.rebuild_encodings()?;
        self.discard_photo(&removed.photo_path);
        Ok(Some(removed))
    }

    fn discard_photo(&self, path: &Path) {
        if let Err(e) = self.photos.remove(path) {
            tracing::warn!(path = %path.display(), error = %e, "failed to delete stored photo");
        }
    }

    pub fn rebuild_encodings(&mut self) -> Result<RebuildReport> {
        let staff = staff::list_staff(&self.db.connect()?)?;
        self.encodings.rebuild(&staff, &mut self.analyzer)
    }

    /// Recognise the best-matching face in `image` and advance that staff
    /// member's attendance for `now`.
    pub fn scan(&mut self, image: &[u8], now: NaiveDateTime) -> Result<ScanOutcome> {
        let known = self.encodings.load()?;
        if known.is_empty() {
            return Err(Error::NoRegisteredStaff);
        }

        let frame = image::load_from_memory(image)
            .map_err(|e| Error::InvalidImage(e.to_string()))?
            .to_rgb8();

        let faces = self.analyzer.analyze(&frame)?;
        let matches = matcher::match_frame(&faces, &known, self.threshold);
        let Some(best) = matcher::best_match(&matches).cloned() else {
            tracing::info!(faces = faces.len(), "no registered staff recognised");
            return Ok(ScanOutcome::Unrecognized { faces: faces.len() });
        };

        let mut conn = self.db.connect()?;
        let Some(staff) = staff::get_staff(&conn, best.staff_id)? else {
            // Encoding store is ahead of the staff table; treat as unknown.
            tracing::warn!(staff_id = best.staff_id, "matched staff no longer exists");
            return Ok(ScanOutcome::Unrecognized { faces: faces.len() });
        };

        if self.archive_scans {
            self.photos.archive_scan(image, staff.id, now);
        }

        let attendance = attendance::recognize(&mut conn, staff.id, now)?;
        Ok(ScanOutcome::Recognized { face: best, staff, attendance })
    }

    pub fn confirm(&self, attendance_id: i64, now: NaiveDateTime) -> Result<ConfirmOutcome> {
        let mut conn = self.db.connect()?;
        attendance::confirm(&mut conn, attendance_id, now)
    }
}
