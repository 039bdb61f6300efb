//! Deterministic analyzer and image fixtures for unit tests.
//!
//! A test "photo" is a row of 8px-wide vertical strips. Every non-black strip
//! is one face whose embedding is its colour scaled to [0, 1], so two photos
//! with the same strip colour recognise as the same person.

use image::{ImageFormat, Rgb, RgbImage};
use presence_vision::{AnalyzerError, BoundingBox, DetectedFace, Embedding, FaceAnalyzer};
use std::io::Cursor;
use std::path::{Path, PathBuf};

pub const STRIP: u32 = 8;
pub const RED: [u8; 3] = [255, 0, 0];
pub const GREEN: [u8; 3] = [0, 255, 0];
pub const BLUE: [u8; 3] = [0, 0, 255];
pub const BLACK: [u8; 3] = [0, 0, 0];

/// Threshold that separates the primary colours (distance √2) from identity (0).
pub const THRESHOLD: f32 = 0.6;

#[derive(Default)]
pub struct StripAnalyzer {
    pub calls: usize,
}

impl FaceAnalyzer for StripAnalyzer {
    fn analyze(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, AnalyzerError> {
        self.calls += 1;
        let strips = image.width() / STRIP;
        Ok((0..strips)
            .filter_map(|i| {
                let px = image.get_pixel(i * STRIP, 0).0;
                if px == BLACK {
                    return None;
                }
                Some(DetectedFace {
                    location: BoundingBox {
                        x: (i * STRIP) as f32,
                        y: 0.0,
                        width: STRIP as f32,
                        height: image.height() as f32,
                        confidence: 0.99,
                        landmarks: None,
                    },
                    embedding: embedding(px),
                })
            })
            .collect())
    }
}

pub fn embedding(color: [u8; 3]) -> Embedding {
    Embedding::new(color.iter().map(|&c| c as f32 / 255.0).collect())
}

pub fn strip_image(colors: &[[u8; 3]]) -> RgbImage {
    let width = STRIP * colors.len().max(1) as u32;
    RgbImage::from_fn(width, STRIP, |x, _| {
        Rgb(colors.get((x / STRIP) as usize).copied().unwrap_or(BLACK))
    })
}

pub fn strip_png(colors: &[[u8; 3]]) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    strip_image(colors)
        .write_to(&mut buf, ImageFormat::Png)
        .expect("encode png");
    buf.into_inner()
}

/// Write a strip photo to `dir/name` and return its path.
pub fn write_photo(dir: &Path, name: &str, colors: &[[u8; 3]]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, strip_png(colors)).expect("write photo");
    path
}
