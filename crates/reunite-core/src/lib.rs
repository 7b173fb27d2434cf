//! reunite-core — Identity-matching engine for missing-person cases.
//!
//! Turns a probe image into a face embedding through an ordered fallback
//! chain of detector backends, then ranks registered cases by cosine
//! distance. The neural model and the case registry stay behind narrow
//! seams ([`extract::EmbeddingProvider`], [`types::RegistryCase`]).

pub mod extract;
pub mod matcher;
pub mod types;

pub use extract::{DetectorBackend, EmbeddingProvider, ExtractError, ExtractionPipeline, ProviderError};
pub use matcher::{rank_candidates, MatchError};
pub use types::{Embedding, MatchResult, MatchThresholds, RegistryCase, ThresholdError};
