//! ArcFace embedding extractor via ONNX Runtime.
//!
//! Faces are cropped from the photo with a small margin, resized to the
//! model's 112x112 input and embedded as unit-length 512-d vectors.

use crate::types::{BoundingBox, Embedding};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const INPUT_SIZE: u32 = 112;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 127.5;
const EMBEDDING_DIM: usize = 512;
/// Extra context around the detector box, as a fraction of its size.
const CROP_MARGIN: f32 = 0.1;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("recognition model not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face box lies outside the image")]
    FaceOutOfBounds,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// ArcFace-based face recognizer.
pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    /// Load the ArcFace model (e.g. `w600k_r50.onnx`).
    pub fn load(model_path: &Path) -> Result<Self, RecognizerError> {
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(path = %model_path.display(), "loaded ArcFace model");
        Ok(Self { session })
    }

    /// Embed one detected face of `image`.
    pub fn extract(&mut self, image: &RgbImage, face: &BoundingBox) -> Result<Embedding, RecognizerError> {
        let crop = crop_face(image, face).ok_or(RecognizerError::FaceOutOfBounds)?;
        let input = to_tensor(&crop);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding: {e}")))?;

        if raw.len() != EMBEDDING_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(Embedding::new(raw.to_vec()).normalized())
    }
}

/// Crop the face plus margin, clamped to the image, resized to the model input.
fn crop_face(image: &RgbImage, face: &BoundingBox) -> Option<RgbImage> {
    let margin_x = face.width * CROP_MARGIN;
    let margin_y = face.height * CROP_MARGIN;

    let left = (face.x - margin_x).max(0.0);
    let top = (face.y - margin_y).max(0.0);
    let right = (face.x + face.width + margin_x).min(image.width() as f32);
    let bottom = (face.y + face.height + margin_y).min(image.height() as f32);

    if right - left < 1.0 || bottom - top < 1.0 {
        return None;
    }

    let (x, y) = (left as u32, top as u32);
    let (w, h) = ((right - left) as u32, (bottom - top) as u32);
    let view = imageops::crop_imm(image, x, y, w.max(1), h.max(1)).to_image();
    Some(imageops::resize(&view, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle))
}

fn to_tensor(face: &RgbImage) -> Array4<f32> {
    let side = INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, side, side));
    for (x, y, pixel) in face.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - PIXEL_MEAN) / PIXEL_STD;
        }
    }
    tensor
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, confidence: 0.9, landmarks: None }
    }

    #[test]
    fn test_crop_is_model_sized() {
        let image = RgbImage::from_pixel(400, 300, image::Rgb([10, 20, 30]));
        let crop = crop_face(&image, &face(100.0, 50.0, 80.0, 120.0)).unwrap();
        assert_eq!(crop.dimensions(), (INPUT_SIZE, INPUT_SIZE));
    }

    #[test]
    fn test_crop_clamps_to_edges() {
        let image = RgbImage::from_pixel(100, 100, image::Rgb([0, 0, 0]));
        assert!(crop_face(&image, &face(-20.0, -20.0, 60.0, 60.0)).is_some());
        assert!(crop_face(&image, &face(90.0, 90.0, 40.0, 40.0)).is_some());
    }

    #[test]
    fn test_crop_outside_image() {
        let image = RgbImage::from_pixel(100, 100, image::Rgb([0, 0, 0]));
        assert!(crop_face(&image, &face(150.0, 150.0, 30.0, 30.0)).is_none());
    }

    #[test]
    fn test_tensor_normalisation() {
        let crop = RgbImage::from_pixel(INPUT_SIZE, INPUT_SIZE, image::Rgb([255, 0, 128]));
        let tensor = to_tensor(&crop);
        assert_eq!(tensor.shape(), &[1, 3, 112, 112]);
        assert!((tensor[[0, 0, 5, 5]] - 1.0).abs() < 1e-6);
        assert!((tensor[[0, 1, 5, 5]] + 1.0).abs() < 1e-6);
        assert!((tensor[[0, 2, 5, 5]] - 0.5 / 127.5).abs() < 1e-6);
    }
}
