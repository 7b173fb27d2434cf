use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn with_model_version(mut self, version: impl Into<String>) -> Self {
        self.model_version = Some(version.into());
        self
    }

    /// Cosine distance to another embedding: 1 − dot(a, b) / (‖a‖·‖b‖).
    ///
    /// 0 = identical direction, 1 = orthogonal. Returns `None` when either
    /// vector has zero norm; a zero vector carries no direction and cannot
    /// be compared.
    pub fn cosine_distance(&self, other: &Embedding) -> Option<f32> {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 {
            Some(1.0 - dot / denom)
        } else {
            None
        }
    }
}

/// One row of the registry snapshot: a case whose embedding is known.
///
/// Cases without an embedding never appear here; the store filters them
/// out before the matcher sees the snapshot.
#[derive(Debug, Clone)]
pub struct RegistryCase {
    pub id: i64,
    pub name: String,
    pub complainant_phone: Option<String>,
    pub embedding: Embedding,
}

/// Result of comparing one registry case against a probe embedding.
/// Produced fresh per scan, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResult {
    pub case_id: i64,
    pub name: String,
    /// Cosine distance to the probe (lower = closer).
    pub distance: f32,
    /// Whether the distance clears the confident-match threshold.
    pub matched: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complainant_phone: Option<String>,
}

#[derive(Error, Debug)]
pub enum ThresholdError {
    #[error("match threshold {matched} must not exceed include threshold {include}")]
    MatchAboveInclude { include: f32, matched: f32 },
    #[error("thresholds must be finite, got include={include}, match={matched}")]
    NotFinite { include: f32, matched: f32 },
}

/// Distance cutoffs for the matcher.
///
/// `include` bounds which candidates appear in results at all; `matched`
/// bounds which of those are flagged as confident matches. Construction
/// enforces `matched <= include`.
#[derive(Debug, Clone, Copy)]
pub struct MatchThresholds {
    include: f32,
    matched: f32,
}

impl MatchThresholds {
    pub fn new(include: f32, matched: f32) -> Result<Self, ThresholdError> {
        if !include.is_finite() || !matched.is_finite() {
            return Err(ThresholdError::NotFinite { include, matched });
        }
        if matched > include {
            return Err(ThresholdError::MatchAboveInclude { include, matched });
        }
        Ok(Self { include, matched })
    }

    /// Maximum distance for a candidate to appear in results.
    pub fn include(&self) -> f32 {
        self.include
    }

    /// Maximum distance for a candidate to count as a confident match.
    pub fn matched(&self) -> f32 {
        self.matched
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_to_self_is_zero() {
        let a = Embedding::new(vec![0.3, -1.2, 4.5]);
        let d = a.cosine_distance(&a).unwrap();
        assert!(d.abs() < 1e-6);
    }

    #[test]
    fn test_distance_orthogonal_is_one() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![0.0, 1.0]);
        let d = a.cosine_distance(&b).unwrap();
        assert!((d - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_distance_opposite_is_two() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![-1.0, 0.0]);
        let d = a.cosine_distance(&b).unwrap();
        assert!((d - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_distance_zero_norm_is_none() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0]);
        assert!(a.cosine_distance(&b).is_none());
        assert!(b.cosine_distance(&a).is_none());
    }

    #[test]
    fn test_distance_scale_invariant() {
        let a = Embedding::new(vec![1.0, 2.0, 3.0]);
        let b = Embedding::new(vec![10.0, 20.0, 30.0]);
        let d = a.cosine_distance(&b).unwrap();
        assert!(d.abs() < 1e-6);
    }

    #[test]
    fn test_thresholds_reject_match_above_include() {
        assert!(MatchThresholds::new(0.5, 0.7).is_err());
        assert!(MatchThresholds::new(0.7, 0.5).is_ok());
        assert!(MatchThresholds::new(0.6, 0.6).is_ok());
    }

    #[test]
    fn test_thresholds_reject_non_finite() {
        assert!(MatchThresholds::new(f32::NAN, 0.5).is_err());
        assert!(MatchThresholds::new(0.7, f32::INFINITY).is_err());
    }
}
