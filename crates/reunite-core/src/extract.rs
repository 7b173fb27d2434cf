//! Embedding extraction — ordered detector fallback with one relaxed attempt.

use crate::types::Embedding;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// One face-localization strategy tried before embedding extraction.
///
/// A fixed set of variants, tried in a configured order. Each maps to a
/// concrete detection model inside the provider (det_500m / det_2.5g /
/// det_10g for the ONNX provider).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorBackend {
    /// Smallest, fastest detector; first line of the chain.
    Fast,
    /// Mid-size detector.
    Balanced,
    /// Largest detector; the most thorough strict attempt.
    Accurate,
}

impl DetectorBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectorBackend::Fast => "fast",
            DetectorBackend::Balanced => "balanced",
            DetectorBackend::Accurate => "accurate",
        }
    }
}

impl FromStr for DetectorBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fast" => Ok(DetectorBackend::Fast),
            "balanced" => Ok(DetectorBackend::Balanced),
            "accurate" => Ok(DetectorBackend::Accurate),
            other => Err(format!("unknown detector backend: {other}")),
        }
    }
}

/// Errors surfaced by an [`EmbeddingProvider`] for a single attempt.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Detection was enforced and the backend found no face.
    #[error("no face detected")]
    NoFaceDetected,
    /// The backend itself malfunctioned (bad model, inference failure).
    #[error("{0}")]
    Backend(String),
}

/// The opaque embedding-model seam.
///
/// `enforce_detection = true` requires a localized face and fails with
/// [`ProviderError::NoFaceDetected`] otherwise; `false` must embed the
/// whole frame, degraded but usable.
pub trait EmbeddingProvider: Send {
    fn represent(
        &mut self,
        image: &DynamicImage,
        backend: DetectorBackend,
        enforce_detection: bool,
    ) -> Result<Embedding, ProviderError>;
}

#[derive(Error, Debug)]
pub enum ExtractError {
    /// Every attempt, including the relaxed one, failed to find a face.
    #[error("no face detected in the frame")]
    NoFace,
    /// The provider malfunctioned on the relaxed attempt.
    #[error("embedding backend error: {0}")]
    Backend(String),
}

/// Ordered fallback chain over detector backends.
///
/// Strict attempts run in order and stop at the first success. If all
/// strict attempts fail, exactly one relaxed attempt runs on the first
/// backend with detection disabled; that attempt is never retried across
/// backends. A relaxed success is indistinguishable from a strict one at
/// this boundary.
#[derive(Debug, Clone)]
pub struct ExtractionPipeline {
    backends: Vec<DetectorBackend>,
}

impl Default for ExtractionPipeline {
    fn default() -> Self {
        Self {
            backends: vec![
                DetectorBackend::Fast,
                DetectorBackend::Balanced,
                DetectorBackend::Accurate,
            ],
        }
    }
}

impl ExtractionPipeline {
    /// Build a pipeline over the given backend order. An empty order
    /// falls back to the default chain.
    pub fn new(backends: Vec<DetectorBackend>) -> Self {
        if backends.is_empty() {
            Self::default()
        } else {
            Self { backends }
        }
    }

    pub fn backends(&self) -> &[DetectorBackend] {
        &self.backends
    }

    pub fn extract(
        &self,
        provider: &mut dyn EmbeddingProvider,
        image: &DynamicImage,
    ) -> Result<Embedding, ExtractError> {
        for &backend in &self.backends {
            match provider.represent(image, backend, true) {
                Ok(embedding) => {
                    tracing::debug!(backend = backend.as_str(), "face embedded");
                    return Ok(embedding);
                }
                Err(ProviderError::NoFaceDetected) => {
                    tracing::debug!(backend = backend.as_str(), "no face found, trying next backend");
                }
                Err(ProviderError::Backend(reason)) => {
                    tracing::warn!(backend = backend.as_str(), %reason, "detector backend failed, trying next");
                }
            }
        }

        // Last resort: one relaxed attempt on the first backend. Yields a
        // whole-frame embedding of degraded quality.
        let relaxed = self.backends[0];
        tracing::warn!(
            backend = relaxed.as_str(),
            "strict chain exhausted, embedding whole frame without detection"
        );
        match provider.represent(image, relaxed, false) {
            Ok(embedding) => Ok(embedding),
            Err(ProviderError::NoFaceDetected) => Err(ExtractError::NoFace),
            Err(ProviderError::Backend(reason)) => Err(ExtractError::Backend(reason)),
        }
    }
}
