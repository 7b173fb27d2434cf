//! [`EmbeddingProvider`] implementation over the ONNX sessions.

use crate::arcface::ArcFaceEmbedder;
use crate::scrfd::ScrfdDetector;
use image::DynamicImage;
use reunite_core::{DetectorBackend, Embedding, EmbeddingProvider, ProviderError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

const ARCFACE_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum ProviderInitError {
    #[error("embedder init failed: {0}")]
    Embedder(#[from] crate::arcface::EmbedderError),
}

/// ONNX-backed embedding provider.
///
/// The ArcFace embedder loads eagerly (fail fast at startup); the
/// per-backend detectors load lazily on first use, so a missing det_*
/// file only fails the backend that needs it and the fallback chain
/// moves on to the next one.
pub struct OnnxProvider {
    model_dir: PathBuf,
    embedder: ArcFaceEmbedder,
    detectors: HashMap<DetectorBackend, ScrfdDetector>,
}

impl OnnxProvider {
    pub fn load(model_dir: &Path) -> Result<Self, ProviderInitError> {
        let embedder = ArcFaceEmbedder::load(&model_dir.join(ARCFACE_MODEL_FILE))?;
        Ok(Self {
            model_dir: model_dir.to_path_buf(),
            embedder,
            detectors: HashMap::new(),
        })
    }

    /// Detection weights file for a backend variant.
    pub fn detector_model_file(backend: DetectorBackend) -> &'static str {
        match backend {
            DetectorBackend::Fast => "det_500m.onnx",
            DetectorBackend::Balanced => "det_2.5g.onnx",
            DetectorBackend::Accurate => "det_10g.onnx",
        }
    }

    fn detector(&mut self, backend: DetectorBackend) -> Result<&mut ScrfdDetector, ProviderError> {
        if !self.detectors.contains_key(&backend) {
            let path = self.model_dir.join(Self::detector_model_file(backend));
            let detector = ScrfdDetector::load(&path)
                .map_err(|e| ProviderError::Backend(e.to_string()))?;
            self.detectors.insert(backend, detector);
        }
        Ok(self.detectors.get_mut(&backend).unwrap())
    }
}

impl EmbeddingProvider for OnnxProvider {
    fn represent(
        &mut self,
        image: &DynamicImage,
        backend: DetectorBackend,
        enforce_detection: bool,
    ) -> Result<Embedding, ProviderError> {
        let photo = image.to_rgb8();

        let region = if enforce_detection {
            let faces = self
                .detector(backend)?
                .detect(&photo)
                .map_err(|e| ProviderError::Backend(e.to_string()))?;
            let best = faces.into_iter().next().ok_or(ProviderError::NoFaceDetected)?;
            tracing::debug!(
                backend = backend.as_str(),
                confidence = best.confidence,
                "face localized"
            );
            Some(best)
        } else {
            None
        };

        self.embedder
            .embed_region(&photo, region.as_ref())
            .map_err(|e| ProviderError::Backend(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_model_file_mapping() {
        assert_eq!(
            OnnxProvider::detector_model_file(DetectorBackend::Fast),
            "det_500m.onnx"
        );
        assert_eq!(
            OnnxProvider::detector_model_file(DetectorBackend::Balanced),
            "det_2.5g.onnx"
        );
        assert_eq!(
            OnnxProvider::detector_model_file(DetectorBackend::Accurate),
            "det_10g.onnx"
        );
    }

    #[test]
    fn test_load_fails_fast_without_embedder_model() {
        let missing = Path::new("/nonexistent/model/dir");
        assert!(OnnxProvider::load(missing).is_err());
    }
}
