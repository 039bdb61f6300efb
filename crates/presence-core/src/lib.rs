//! presence-core — attendance tracking on top of face recognition.
//!
//! Holds the encoding store, the matching policy, the per-day attendance state
//! machine and the SQLite-backed staff registry, plus the read-side reports,
//! exports and backups. Recognition itself comes from any
//! [`presence_vision::FaceAnalyzer`].

pub mod attendance;
pub mod backup;
pub mod db;
pub mod duration;
pub mod encodings;
pub mod error;
pub mod export;
pub mod matcher;
pub mod photos;
pub mod reports;
pub mod service;
pub mod staff;

#[cfg(test)]
mod testing;

pub use attendance::{AttendanceRecord, AttendanceState, ConfirmOutcome, RecognitionOutcome};
pub use backup::{BackupInfo, BackupManager, StorageSummary};
pub use db::Database;
pub use encodings::{EncodingStore, Encodings, RebuildReport, SkipReason, SkippedStaff};
pub use error::{Error, Result};
pub use export::ExportFormat;
pub use matcher::{FaceMatch, DEFAULT_MATCH_THRESHOLD};
pub use photos::{PhotoStore, DEFAULT_MAX_UPLOAD_BYTES};
pub use reports::{AttendanceRow, LogSummary, Overview};
pub use service::{AttendanceService, Registration, ScanOutcome};
pub use staff::{NewStaff, StaffRecord};
