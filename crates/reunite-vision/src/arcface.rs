//! ArcFace embedding extraction.
//!
//! Embeds either a detected face crop or, in relaxed mode, the whole
//! photo. The crop goes straight to the model; case photos rarely carry
//! landmarks good enough to make alignment worth the extra step.

use crate::scrfd::FaceBox;
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use reunite_core::Embedding;
use std::path::Path;
use thiserror::Error;

const ARCFACE_INPUT_SIZE: u32 = 112;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5; // symmetric normalization, unlike SCRFD
const ARCFACE_EMBEDDING_DIM: usize = 512;
const ARCFACE_MODEL_VERSION: &str = "w600k_r50";

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("recognition model not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

pub struct ArcFaceEmbedder {
    session: Session,
}

impl ArcFaceEmbedder {
    pub fn load(model_path: &Path) -> Result<Self, EmbedderError> {
        if !model_path.exists() {
            return Err(EmbedderError::ModelNotFound(
                model_path.display().to_string(),
            ));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(path = %model_path.display(), "loaded ArcFace model");
        Ok(Self { session })
    }

    /// Embed a face region of the photo, or the whole photo when no
    /// region is given (relaxed, whole-frame mode).
    pub fn embed_region(
        &mut self,
        photo: &RgbImage,
        region: Option<&FaceBox>,
    ) -> Result<Embedding, EmbedderError> {
        let crop = match region {
            Some(face) => crop_face(photo, face),
            None => photo.clone(),
        };
        let input = preprocess(&crop);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::InferenceFailed(e.to_string()))?;

        if raw.len() != ARCFACE_EMBEDDING_DIM {
            return Err(EmbedderError::InferenceFailed(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-d embedding, got {}",
                raw.len()
            )));
        }

        Ok(Embedding::new(raw.to_vec()).with_model_version(ARCFACE_MODEL_VERSION))
    }
}

/// Clamp the detected box to the photo bounds and crop it.
///
/// Detections can poke past the frame edge after letterbox de-mapping;
/// a degenerate clamp falls back to the whole photo.
fn crop_face(photo: &RgbImage, face: &FaceBox) -> RgbImage {
    let (w, h) = photo.dimensions();

    let x1 = face.x.max(0.0).min(w as f32 - 1.0) as u32;
    let y1 = face.y.max(0.0).min(h as f32 - 1.0) as u32;
    let x2 = ((face.x + face.width).max(0.0).min(w as f32)) as u32;
    let y2 = ((face.y + face.height).max(0.0).min(h as f32)) as u32;

    if x2 <= x1 || y2 <= y1 {
        return photo.clone();
    }
    image::imageops::crop_imm(photo, x1, y1, x2 - x1, y2 - y1).to_image()
}

/// Resize to the model input square and normalize symmetrically.
fn preprocess(crop: &RgbImage) -> Array4<f32> {
    let resized = image::imageops::resize(
        crop,
        ARCFACE_INPUT_SIZE,
        ARCFACE_INPUT_SIZE,
        FilterType::Triangle,
    );

    let side = ARCFACE_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, side, side));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
        }
    }
    tensor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crop_face_clamps_to_bounds() {
        let photo = RgbImage::from_pixel(100, 80, image::Rgb([10, 20, 30]));
        let face = FaceBox {
            x: -15.0,
            y: 40.0,
            width: 50.0,
            height: 100.0,
            confidence: 0.9,
        };
        let crop = crop_face(&photo, &face);
        assert_eq!(crop.dimensions(), (35, 40));
    }

    #[test]
    fn test_crop_face_degenerate_falls_back_to_whole_photo() {
        let photo = RgbImage::from_pixel(100, 80, image::Rgb([0, 0, 0]));
        let face = FaceBox {
            x: 200.0,
            y: 200.0,
            width: 10.0,
            height: 10.0,
            confidence: 0.9,
        };
        let crop = crop_face(&photo, &face);
        assert_eq!(crop.dimensions(), (100, 80));
    }

    #[test]
    fn test_preprocess_shape_and_normalization() {
        let crop = RgbImage::from_pixel(50, 70, image::Rgb([255, 0, 127]));
        let tensor = preprocess(&crop);
        assert_eq!(tensor.shape(), &[1, 3, 112, 112]);
        assert!((tensor[[0, 0, 56, 56]] - 1.0).abs() < 1e-5);
        assert!((tensor[[0, 1, 56, 56]] + 1.0).abs() < 1e-5);
        assert!(tensor[[0, 2, 56, 56]].abs() < 0.01);
    }
}
