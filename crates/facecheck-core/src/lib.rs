//! facecheck-core: face extraction, comparison and attribute analysis.
//!
//! The adapters in [`adapters`] wrap a [`FaceCapability`]; [`OnnxCapability`]
//! implements it with ONNX Runtime models (detector, recognizers, attribute
//! classifiers) loaded from a model directory. [`Session`] holds two images,
//! the active configuration and the results derived from them.

pub mod adapters;
pub mod alignment;
pub mod attributes;
pub mod capability;
pub mod configuration;
pub mod detector;
pub mod onnx;
pub mod recognizer;
pub mod session;
pub mod types;

use std::path::PathBuf;

pub use adapters::{AttributeResult, ExtractionResult, VerificationResult};
pub use attributes::{Action, FaceAttributes};
pub use capability::{CapabilityError, DetectOptions, ExtractedFace, FaceCapability, Verification};
pub use configuration::{AnalysisConfiguration, ConfigurationError, DetectorBackend, DistanceMetric, ModelName};
pub use onnx::OnnxCapability;
pub use session::{ImageBlob, ImageBlobError, Session, SessionReport, Slot};
pub use types::{BoundingBox, Embedding, FacialArea};

/// Default model directory: `$XDG_DATA_HOME/facecheck/models`, falling back to
/// `~/.local/share/facecheck/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facecheck")
        .join("models")
}
