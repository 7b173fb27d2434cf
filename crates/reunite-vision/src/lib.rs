//! reunite-vision — ONNX inference behind the core's embedding seam.
//!
//! Face detection uses the SCRFD det_* model family (one weights file per
//! [`reunite_core::DetectorBackend`], all sharing the same anchor decode);
//! embeddings come from ArcFace. Case photos and scan frames arrive as
//! decoded RGB images, not camera hardware.

pub mod arcface;
pub mod provider;
pub mod scrfd;

pub use arcface::{ArcFaceEmbedder, EmbedderError};
pub use provider::OnnxProvider;
pub use scrfd::{FaceBox, ScrfdDetector, DetectorError};
