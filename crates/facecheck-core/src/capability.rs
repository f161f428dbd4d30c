//! The face-analysis capability boundary.
//!
//! Everything the adapters need from detection, embedding and attribute
//! models goes through [`FaceCapability`]. Its fault surface is a closed set:
//! either no face was found where one was required, or something else failed.

use crate::attributes::{Action, AttributeError, FaceAttributes};
use crate::configuration::{AnalysisConfiguration, DetectorBackend};
use crate::detector::DetectorError;
use crate::recognizer::RecognizerError;
use crate::types::FacialArea;
use ndarray::Array3;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    #[error("face could not be detected; confirm that the picture is a face photo")]
    NoFaceDetected,
    #[error("{0}")]
    Fault(String),
}

impl CapabilityError {
    pub fn fault(msg: impl Into<String>) -> Self {
        CapabilityError::Fault(msg.into())
    }
}

impl From<DetectorError> for CapabilityError {
    fn from(e: DetectorError) -> Self {
        CapabilityError::Fault(format!("detector: {e}"))
    }
}

impl From<RecognizerError> for CapabilityError {
    fn from(e: RecognizerError) -> Self {
        CapabilityError::Fault(format!("recognizer: {e}"))
    }
}

impl From<AttributeError> for CapabilityError {
    fn from(e: AttributeError) -> Self {
        CapabilityError::Fault(format!("attributes: {e}"))
    }
}

impl From<image::ImageError> for CapabilityError {
    fn from(e: image::ImageError) -> Self {
        CapabilityError::Fault(format!("image: {e}"))
    }
}

/// Per-call detection behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectOptions {
    /// Fail with [`CapabilityError::NoFaceDetected`] when no face is found.
    /// When false, the whole image is treated as one face.
    pub enforce_detection: bool,
    /// Warp each face to canonical landmark positions; otherwise crop the box.
    pub align: bool,
    /// Keep per-call logging at debug level.
    pub silent: bool,
}

/// One detected face, cropped (and possibly aligned).
#[derive(Debug, Clone)]
pub struct ExtractedFace {
    /// Face pixels, `height × width × 3` RGB, each value in [0, 1].
    pub face: Array3<f32>,
    /// Region of the face in the original image.
    pub facial_area: FacialArea,
    pub confidence: f32,
}

/// Outcome of a verification call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Verification {
    /// `distance <= threshold`.
    pub verified: bool,
    pub distance: f32,
    pub threshold: f32,
}

impl Verification {
    pub fn from_distance(distance: f32, threshold: f32) -> Self {
        Self {
            verified: distance <= threshold,
            distance,
            threshold,
        }
    }
}

/// Face detection, verification and attribute analysis over encoded images.
///
/// Images are passed as encoded bytes (JPEG, PNG, ...). Calls take `&mut self`
/// because inference sessions are stateful; callers run one call at a time.
pub trait FaceCapability {
    /// Detect faces, ordered by detector confidence (highest first).
    fn detect_and_align(
        &mut self,
        image: &[u8],
        detector: DetectorBackend,
        options: DetectOptions,
    ) -> Result<Vec<ExtractedFace>, CapabilityError>;

    /// Compare the first face of each image under `config`.
    fn verify(
        &mut self,
        image_a: &[u8],
        image_b: &[u8],
        config: &AnalysisConfiguration,
        options: DetectOptions,
    ) -> Result<Verification, CapabilityError>;

    /// Predict `actions` for every face found in the image.
    fn analyze(
        &mut self,
        image: &[u8],
        actions: &[Action],
        detector: DetectorBackend,
        options: DetectOptions,
    ) -> Result<Vec<FaceAttributes>, CapabilityError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verification_threshold_is_inclusive() {
        assert!(Verification::from_distance(0.40, 0.40).verified);
        assert!(Verification::from_distance(0.39, 0.40).verified);
        assert!(!Verification::from_distance(0.4001, 0.40).verified);
    }

    #[test]
    fn test_internal_errors_map_to_fault() {
        let err: CapabilityError = DetectorError::ModelNotFound("/m/detector_ssd.onnx".into()).into();
        match err {
            CapabilityError::Fault(msg) => assert!(msg.contains("detector_ssd.onnx"), "{msg}"),
            other => panic!("expected fault, got {other:?}"),
        }
    }
}
