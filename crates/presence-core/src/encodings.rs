//! Persisted staff id → face embedding mapping used for recognition.
//!
//! The store is derived data: [`EncodingStore::rebuild`] regenerates it from
//! every registered photo and replaces the file wholesale, so entries for
//! deleted staff cannot survive. Writes go to a temporary sibling file that is
//! renamed over the store, so readers see either the old or the new mapping.

use crate::error::{Error, Result};
use crate::staff::StaffRecord;
use presence_vision::{Embedding, FaceAnalyzer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

const STORE_VERSION: u32 = 1;

/// Known embeddings keyed by staff id, iterated in ascending id order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Encodings {
    entries: BTreeMap<i64, Embedding>,
}

impl Encodings {
    pub fn insert(&mut self, staff_id: i64, embedding: Embedding) {
        self.entries.insert(staff_id, embedding);
    }

    pub fn get(&self, staff_id: i64) -> Option<&Embedding> {
        self.entries.get(&staff_id)
    }

    pub fn contains(&self, staff_id: i64) -> bool {
        self.entries.contains_key(&staff_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (i64, &Embedding)> {
        self.entries.iter().map(|(id, e)| (*id, e))
    }

    pub fn staff_ids(&self) -> Vec<i64> {
        self.entries.keys().copied().collect()
    }
}

impl FromIterator<(i64, Embedding)> for Encodings {
    fn from_iter<I: IntoIterator<Item = (i64, Embedding)>>(iter: I) -> Self {
        Self { entries: iter.into_iter().collect() }
    }
}

#[derive(Serialize)]
struct StoreFileRef<'a> {
    version: u32,
    entries: &'a BTreeMap<i64, Embedding>,
}

#[derive(Deserialize)]
struct StoreFile {
    version: u32,
    entries: BTreeMap<i64, Embedding>,
}

/// Why a staff photo produced no embedding during a rebuild.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SkipReason {
    #[error("photo file is missing")]
    PhotoMissing,
    #[error("photo could not be read: {0}")]
    PhotoUnreadable(String),
    #[error("no face detected")]
    NoFace,
    #[error("{0} faces detected, expected exactly one")]
    MultipleFaces(usize),
    #[error("analyzer failed: {0}")]
    AnalyzerFailed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedStaff {
    pub staff_id: i64,
    pub reason: SkipReason,
}

/// Summary of one rebuild.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RebuildReport {
    pub encoded: usize,
    pub skipped: Vec<SkippedStaff>,
}

/// File-backed encoding store.
#[derive(Debug, Clone)]
pub struct EncodingStore {
    path: PathBuf,
}

impl EncodingStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted mapping. No file yet means no encodings, not an error.
    pub fn load(&self) -> Result<Encodings> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "no encoding store yet");
                return Ok(Encodings::default());
            }
            Err(e) => return Err(e.into()),
        };

        let file: StoreFile = bincode::deserialize(&bytes).map_err(|e| self.store_error(e))?;
        if file.version != STORE_VERSION {
            return Err(self.store_error(format!(
                "unsupported version {} (expected {STORE_VERSION})",
                file.version
            )));
        }
        Ok(Encodings { entries: file.entries })
    }

    /// Re-encode every staff photo and replace the persisted mapping.
    ///
    /// Photos that are missing, unreadable, or do not contain exactly one face
    /// are skipped with a warning; they never fail the rebuild.
    pub fn rebuild<A>(&self, staff: &[StaffRecord], analyzer: &mut A) -> Result<RebuildReport>
    where
        A: FaceAnalyzer + ?Sized,
    {
        let mut encodings = Encodings::default();
        let mut skipped = Vec::new();

        for member in staff {
            match encode_photo(&member.photo_path, analyzer) {
                Ok(embedding) => encodings.insert(member.id, embedding),
                Err(reason) => {
                    tracing::warn!(
                        staff_id = member.id,
                        path = %member.photo_path.display(),
                        %reason,
                        "skipping staff photo"
                    );
                    skipped.push(SkippedStaff { staff_id: member.id, reason });
                }
            }
        }

        self.persist(&encodings)?;
        tracing::info!(
            encoded = encodings.len(),
            skipped = skipped.len(),
            path = %self.path.display(),
            "encoding store rebuilt"
        );

        Ok(RebuildReport { encoded: encodings.len(), skipped })
    }

    fn persist(&self, encodings: &Encodings) -> Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let bytes = bincode::serialize(&StoreFileRef { version: STORE_VERSION, entries: &encodings.entries })
            .map_err(|e| self.store_error(e))?;

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "encodings".to_string());
        let tmp = dir.join(format!(".{file_name}.{}.tmp", Uuid::new_v4()));

        let written = write_synced(&tmp, &bytes).and_then(|()| fs::rename(&tmp, &self.path));
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    fn store_error(&self, reason: impl std::fmt::Display) -> Error {
        Error::EncodingStore { path: self.path.display().to_string(), reason: reason.to_string() }
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

fn encode_photo<A>(path: &Path, analyzer: &mut A) -> std::result::Result<Embedding, SkipReason>
where
    A: FaceAnalyzer + ?Sized,
{
    if !path.exists() {
        return Err(SkipReason::PhotoMissing);
    }
    let image = image::open(path)
        .map_err(|e| SkipReason::PhotoUnreadable(e.to_string()))?
        .to_rgb8();

    let mut faces = analyzer
        .analyze(&image)
        .map_err(|e| SkipReason::AnalyzerFailed(e.to_string()))?;

    match faces.len() {
        0 => Err(SkipReason::NoFace),
        1 => Ok(faces.remove(0).embedding),
        n => Err(SkipReason::MultipleFaces(n)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, StripAnalyzer, BLACK, BLUE, GREEN, RED};

    fn member(id: i64, photo: PathBuf) -> StaffRecord {
        StaffRecord {
            id,
            name: format!("staff-{id}"),
            email: None,
            phone: None,
            department: None,
            gender: None,
            joining_date: None,
            dob: None,
            native: None,
            photo_path: photo,
            created_at: String::new(),
        }
    }

    #[test]
    fn test_load_without_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = EncodingStore::new(dir.path().join("face_data/encodings.bin"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_rebuild_encodes_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store = EncodingStore::new(dir.path().join("face_data/encodings.bin"));
        let staff = vec![
            member(1, testing::write_photo(dir.path(), "a.png", &[RED])),
            member(2, testing::write_photo(dir.path(), "b.png", &[GREEN])),
        ];

        let report = store.rebuild(&staff, &mut StripAnalyzer::default()).unwrap();
        assert_eq!(report.encoded, 2);
        assert!(report.skipped.is_empty());

        let loaded = store.load().unwrap();
        assert_eq!(loaded.staff_ids(), vec![1, 2]);
        assert_eq!(loaded.get(1), Some(&testing::embedding(RED)));
    }

    #[test]
    fn test_rebuild_skips_bad_photos_without_failing() {
        let dir = tempfile::tempdir().unwrap();
        let store = EncodingStore::new(dir.path().join("encodings.bin"));
        let garbage = dir.path().join("garbage.png");
        std::fs::write(&garbage, b"definitely not a png").unwrap();

        let staff = vec![
            member(1, testing::write_photo(dir.path(), "ok.png", &[BLUE])),
            member(2, testing::write_photo(dir.path(), "empty.png", &[BLACK])),
            member(3, testing::write_photo(dir.path(), "group.png", &[RED, GREEN])),
            member(4, dir.path().join("missing.png")),
            member(5, garbage),
        ];

        let report = store.rebuild(&staff, &mut StripAnalyzer::default()).unwrap();
        assert_eq!(report.encoded, 1);

        let reasons: Vec<(i64, SkipReason)> =
            report.skipped.into_iter().map(|s| (s.staff_id, s.reason)).collect();
        assert_eq!(reasons[0], (2, SkipReason::NoFace));
        assert_eq!(reasons[1], (3, SkipReason::MultipleFaces(2)));
        assert_eq!(reasons[2], (4, SkipReason::PhotoMissing));
        assert!(matches!(reasons[3], (5, SkipReason::PhotoUnreadable(_))));

        let loaded = store.load().unwrap();
        assert_eq!(loaded.staff_ids(), vec![1]);
    }

    #[test]
    fn test_rebuild_replaces_instead_of_merging() {
        let dir = tempfile::tempdir().unwrap();
        let store = EncodingStore::new(dir.path().join("encodings.bin"));
        let a = member(1, testing::write_photo(dir.path(), "a.png", &[RED]));
        let b = member(2, testing::write_photo(dir.path(), "b.png", &[GREEN]));

        store.rebuild(&[a.clone(), b], &mut StripAnalyzer::default()).unwrap();
        store.rebuild(&[a], &mut StripAnalyzer::default()).unwrap();

        let loaded = store.load().unwrap();
        assert!(loaded.contains(1));
        assert!(!loaded.contains(2), "deleted staff must be purged");
    }

    #[test]
    fn test_rebuild_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store_dir = dir.path().join("store");
        let store = EncodingStore::new(store_dir.join("encodings.bin"));
        let photo = testing::write_photo(dir.path(), "a.png", &[RED]);

        store.rebuild(&[member(1, photo)], &mut StripAnalyzer::default()).unwrap();
        store.rebuild(&[], &mut StripAnalyzer::default()).unwrap();

        let names: Vec<String> = std::fs::read_dir(&store_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["encodings.bin".to_string()]);
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_load_corrupt_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("encodings.bin");
        std::fs::write(&path, [0xffu8; 3]).unwrap();
        let err = EncodingStore::new(&path).load().unwrap_err();
        assert!(matches!(err, Error::EncodingStore { .. }), "got {err}");
    }

    #[test]
    fn test_load_rejects_unknown_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("encodings.bin");
        let entries = BTreeMap::new();
        let bytes = bincode::serialize(&StoreFileRef { version: 99, entries: &entries }).unwrap();
        std::fs::write(&path, bytes).unwrap();

        let err = EncodingStore::new(&path).load().unwrap_err();
        assert!(err.to_string().contains("unsupported version 99"));
    }
}
