//! Extraction, comparison and attribute adapters.
//!
//! Each adapter makes exactly one capability call and folds every fault into
//! its result struct. Callers never see an `Err`, and nothing is retried.

use crate::attributes::{Action, FaceAttributes};
use crate::capability::{CapabilityError, DetectOptions, FaceCapability};
use crate::configuration::{AnalysisConfiguration, DetectorBackend, DistanceMetric, ModelName};
use crate::types::FacialArea;
use image::{Rgb, RgbImage};
use ndarray::Array3;
use serde::Serialize;

/// Extraction requires a face and aligns it.
pub const EXTRACTION_OPTIONS: DetectOptions = DetectOptions {
    enforce_detection: true,
    align: true,
    silent: true,
};

/// Comparison expects pre-aligned crops: no enforcement, no alignment.
pub const COMPARISON_OPTIONS: DetectOptions = DetectOptions {
    enforce_detection: false,
    align: false,
    silent: true,
};

/// Attribute analysis expects pre-cropped faces.
pub const ATTRIBUTE_OPTIONS: DetectOptions = DetectOptions {
    enforce_detection: false,
    align: false,
    silent: true,
};

pub const ATTRIBUTE_ACTIONS: [Action; 4] = Action::ALL;

const NO_ATTRIBUTE_DATA: &str = "attribute analysis returned no data";

/// Aligned face of one image, or why there is none.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExtractionResult {
    /// PNG-encoded aligned face. Serialized as its length under
    /// `face_png_len`; the PNG itself goes to a file.
    #[serde(rename = "face_png_len", serialize_with = "face_len")]
    pub face_bytes: Option<Vec<u8>>,
    pub original_region: Option<FacialArea>,
    pub error: Option<String>,
}

impl ExtractionResult {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            face_bytes: None,
            original_region: None,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.face_bytes.is_some()
    }
}

/// Outcome of comparing two faces. Configuration fields are always echoed;
/// the decision fields are present only on success.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationResult {
    pub verified: Option<bool>,
    pub distance: Option<f32>,
    pub threshold: Option<f32>,
    pub model_used: ModelName,
    pub detector_used: DetectorBackend,
    pub metric_used: DistanceMetric,
    pub error: Option<String>,
}

impl VerificationResult {
    pub fn failed(config: &AnalysisConfiguration, error: impl Into<String>) -> Self {
        Self {
            verified: None,
            distance: None,
            threshold: None,
            model_used: config.model_name,
            detector_used: config.detector_backend,
            metric_used: config.distance_metric,
            error: Some(error.into()),
        }
    }

    pub fn configuration(&self) -> AnalysisConfiguration {
        AnalysisConfiguration::new(self.model_used, self.detector_used, self.metric_used)
    }
}

/// Attribute records for the faces in one image.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AttributeResult {
    pub data: Vec<FaceAttributes>,
    pub error: Option<String>,
}

impl AttributeResult {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            data: Vec::new(),
            error: Some(error.into()),
        }
    }

    /// The record shown to the user.
    pub fn primary(&self) -> Option<&FaceAttributes> {
        self.data.first()
    }

    /// Faces found beyond the primary one.
    pub fn additional_faces(&self) -> usize {
        self.data.len().saturating_sub(1)
    }
}

/// Locate, align and re-encode the first face in `image`.
pub fn extract(
    capability: &mut dyn FaceCapability,
    image: &[u8],
    detector: DetectorBackend,
) -> ExtractionResult {
    let outcome = capability
        .detect_and_align(image, detector, EXTRACTION_OPTIONS)
        .and_then(|faces| {
            let first = faces.into_iter().next().ok_or(CapabilityError::NoFaceDetected)?;
            Ok((encode_face(&first.face)?, first.facial_area))
        });

    match outcome {
        Ok((face_bytes, region)) => {
            tracing::debug!(detector = %detector, ?region, bytes = face_bytes.len(), "face extracted");
            ExtractionResult {
                face_bytes: Some(face_bytes),
                original_region: Some(region),
                error: None,
            }
        }
        Err(e) => {
            tracing::warn!(detector = %detector, error = %e, "face extraction failed");
            ExtractionResult::failed(e.to_string())
        }
    }
}

/// Compare two face images under `config`.
pub fn verify(
    capability: &mut dyn FaceCapability,
    image_a: &[u8],
    image_b: &[u8],
    config: &AnalysisConfiguration,
) -> VerificationResult {
    match capability.verify(image_a, image_b, config, COMPARISON_OPTIONS) {
        Ok(v) => {
            tracing::debug!(config = %config, verified = v.verified, distance = v.distance, "faces compared");
            VerificationResult {
                verified: Some(v.verified),
                distance: Some(v.distance),
                threshold: Some(v.threshold),
                model_used: config.model_name,
                detector_used: config.detector_backend,
                metric_used: config.distance_metric,
                error: None,
            }
        }
        Err(e) => {
            tracing::warn!(config = %config, error = %e, "face comparison failed");
            VerificationResult::failed(config, e.to_string())
        }
    }
}

/// Predict age, emotion, gender and race for the faces in `image`.
///
/// One or more records is a success whatever their confidence; zero records
/// is reported as an error.
pub fn analyze(
    capability: &mut dyn FaceCapability,
    image: &[u8],
    detector: DetectorBackend,
) -> AttributeResult {
    match capability.analyze(image, &ATTRIBUTE_ACTIONS, detector, ATTRIBUTE_OPTIONS) {
        Ok(data) if data.is_empty() => {
            tracing::warn!(detector = %detector, "attribute analysis returned no records");
            AttributeResult::failed(NO_ATTRIBUTE_DATA)
        }
        Ok(data) => AttributeResult { data, error: None },
        Err(e) => {
            tracing::warn!(detector = %detector, error = %e, "attribute analysis failed");
            AttributeResult::failed(e.to_string())
        }
    }
}

/// Rescale `[0, 1]` face pixels to 8 bits and encode as PNG.
pub fn encode_face(face: &Array3<f32>) -> Result<Vec<u8>, CapabilityError> {
    let (h, w, c) = face.dim();
    if c != 3 || h == 0 || w == 0 {
        return Err(CapabilityError::fault(format!(
            "unexpected face shape {h}x{w}x{c}"
        )));
    }

    let to_u8 = |v: f32| (v * 255.0).round().clamp(0.0, 255.0) as u8;
    let image = RgbImage::from_fn(w as u32, h as u32, |x, y| {
        let (x, y) = (x as usize, y as usize);
        Rgb([to_u8(face[[y, x, 0]]), to_u8(face[[y, x, 1]]), to_u8(face[[y, x, 2]])])
    });

    let mut bytes = Vec::new();
    image.write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)?;
    Ok(bytes)
}

fn face_len<S: serde::Serializer>(bytes: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
    match bytes {
        Some(b) => s.serialize_some(&b.len()),
        None => s.serialize_none(),
    }
}
