//! presence-vision — face detection and embedding for staff recognition.
//!
//! Uses SCRFD for detection and ArcFace for embeddings, both running via
//! ONNX Runtime on the CPU. Attendance logic only sees the [`FaceAnalyzer`]
//! trait and the types below.

pub mod analyzer;
pub mod detector;
pub mod recognizer;
pub mod types;

pub use analyzer::{AnalyzerError, FaceAnalyzer, OnnxAnalyzer};
pub use types::{BoundingBox, DetectedFace, Embedding};

use std::path::PathBuf;

/// System-wide ONNX model directory.
pub fn default_model_dir() -> PathBuf {
    PathBuf::from("/usr/share/presence/models")
}
