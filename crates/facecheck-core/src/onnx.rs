//! [`FaceCapability`] backed by ONNX Runtime models on disk.
//!
//! Sessions are loaded on first use and kept for the life of the capability.
//! A failed load is reported to the caller and attempted again next time.

use crate::alignment;
use crate::attributes::{Action, AttributeClassifier, FaceAttributes};
use crate::capability::{CapabilityError, DetectOptions, ExtractedFace, FaceCapability, Verification};
use crate::configuration::{AnalysisConfiguration, DetectorBackend, ModelName};
use crate::detector::FaceDetector;
use crate::recognizer::{model_spec, FaceRecognizer};
use crate::types::{BoundingBox, Embedding};
use image::RgbImage;
use ndarray::Array3;
use std::collections::HashMap;
use std::path::PathBuf;

/// Side length of faces returned by `detect_and_align`.
const EXTRACTED_FACE_SIZE: u32 = 224;

pub struct OnnxCapability {
    model_dir: PathBuf,
    intra_threads: usize,
    detectors: HashMap<DetectorBackend, FaceDetector>,
    recognizers: HashMap<ModelName, FaceRecognizer>,
    classifiers: HashMap<Action, AttributeClassifier>,
}

impl OnnxCapability {
    pub fn new(model_dir: impl Into<PathBuf>, intra_threads: usize) -> Self {
        Self {
            model_dir: model_dir.into(),
            intra_threads: intra_threads.max(1),
            detectors: HashMap::new(),
            recognizers: HashMap::new(),
            classifiers: HashMap::new(),
        }
    }

    fn detector(&mut self, backend: DetectorBackend) -> Result<&mut FaceDetector, CapabilityError> {
        if !self.detectors.contains_key(&backend) {
            let detector = FaceDetector::load(&self.model_dir, backend, self.intra_threads)?;
            self.detectors.insert(backend, detector);
        }
        self.detectors
            .get_mut(&backend)
            .ok_or_else(|| CapabilityError::fault(format!("detector {backend} unavailable")))
    }

    fn recognizer(&mut self, model: ModelName) -> Result<&mut FaceRecognizer, CapabilityError> {
        if !self.recognizers.contains_key(&model) {
            let recognizer = FaceRecognizer::load(&self.model_dir, model, self.intra_threads)?;
            self.recognizers.insert(model, recognizer);
        }
        self.recognizers
            .get_mut(&model)
            .ok_or_else(|| CapabilityError::fault(format!("model {model} unavailable")))
    }

    fn classifier(&mut self, action: Action) -> Result<&mut AttributeClassifier, CapabilityError> {
        if !self.classifiers.contains_key(&action) {
            let classifier = AttributeClassifier::load(&self.model_dir, action, self.intra_threads)?;
            self.classifiers.insert(action, classifier);
        }
        self.classifiers
            .get_mut(&action)
            .ok_or_else(|| CapabilityError::fault(format!("{action} classifier unavailable")))
    }

    /// Run the detector, applying the enforcement policy for an empty result.
    fn locate_faces(
        &mut self,
        image: &RgbImage,
        backend: DetectorBackend,
        options: DetectOptions,
    ) -> Result<Vec<BoundingBox>, CapabilityError> {
        let faces = self.detector(backend)?.detect(image)?;
        if faces.is_empty() {
            tracing::debug!(backend = %backend, enforced = options.enforce_detection, "no face found");
        }
        apply_enforcement(faces, options, image.width(), image.height())
    }

    /// Embed the first face of an encoded image.
    fn embed_first_face(
        &mut self,
        bytes: &[u8],
        config: &AnalysisConfiguration,
        options: DetectOptions,
    ) -> Result<Embedding, CapabilityError> {
        let image = decode(bytes)?;
        let faces = self.locate_faces(&image, config.detector_backend, options)?;
        let first = faces.first().ok_or(CapabilityError::NoFaceDetected)?;

        let spec = model_spec(config.model_name);
        let face = face_pixels(&image, first, options.align, spec.input_width, spec.input_height);
        Ok(self.recognizer(config.model_name)?.embed(&face)?)
    }
}

impl FaceCapability for OnnxCapability {
    fn detect_and_align(
        &mut self,
        image: &[u8],
        detector: DetectorBackend,
        options: DetectOptions,
    ) -> Result<Vec<ExtractedFace>, CapabilityError> {
        let image = decode(image)?;
        let faces = self.locate_faces(&image, detector, options)?;

        if !options.silent {
            tracing::info!(backend = %detector, faces = faces.len(), "faces extracted");
        }

        Ok(faces
            .iter()
            .map(|bbox| {
                let pixels = face_pixels(&image, bbox, options.align, EXTRACTED_FACE_SIZE, EXTRACTED_FACE_SIZE);
                ExtractedFace {
                    face: normalized(&pixels),
                    facial_area: bbox.facial_area(image.width(), image.height()),
                    confidence: bbox.confidence,
                }
            })
            .collect())
    }

    fn verify(
        &mut self,
        image_a: &[u8],
        image_b: &[u8],
        config: &AnalysisConfiguration,
        options: DetectOptions,
    ) -> Result<Verification, CapabilityError> {
        let a = self.embed_first_face(image_a, config, options)?;
        let b = self.embed_first_face(image_b, config, options)?;

        let verification = Verification::from_distance(
            a.distance(&b, config.distance_metric),
            config.threshold(),
        );

        if options.silent {
            tracing::debug!(config = %config, ?verification, "verification finished");
        } else {
            tracing::info!(
                config = %config,
                verified = verification.verified,
                distance = verification.distance,
                threshold = verification.threshold,
                "verification finished"
            );
        }

        Ok(verification)
    }

    fn analyze(
        &mut self,
        image: &[u8],
        actions: &[Action],
        detector: DetectorBackend,
        options: DetectOptions,
    ) -> Result<Vec<FaceAttributes>, CapabilityError> {
        let image = decode(image)?;
        let faces = self.locate_faces(&image, detector, options)?;

        let mut records = Vec::with_capacity(faces.len());
        for bbox in &faces {
            let area = bbox.facial_area(image.width(), image.height());
            let crop = if options.align {
                face_pixels(&image, bbox, true, EXTRACTED_FACE_SIZE, EXTRACTED_FACE_SIZE)
            } else {
                alignment::crop_face(&image, &area)
            };

            let mut record = FaceAttributes::new(area, bbox.confidence);
            for &action in actions {
                let probabilities = self.classifier(action)?.predict(&crop)?;
                record.apply(action, &probabilities);
            }
            records.push(record);
        }

        if !options.silent {
            tracing::info!(backend = %detector, faces = records.len(), "attribute analysis finished");
        }

        Ok(records)
    }
}

/// An empty detection is an error when enforced, otherwise the whole image
/// stands in as a single face with confidence 0.
fn apply_enforcement(
    faces: Vec<BoundingBox>,
    options: DetectOptions,
    width: u32,
    height: u32,
) -> Result<Vec<BoundingBox>, CapabilityError> {
    match (faces.is_empty(), options.enforce_detection) {
        (false, _) => Ok(faces),
        (true, true) => Err(CapabilityError::NoFaceDetected),
        (true, false) => Ok(vec![BoundingBox::whole_image(width, height)]),
    }
}

fn decode(bytes: &[u8]) -> Result<RgbImage, CapabilityError> {
    if bytes.is_empty() {
        return Err(CapabilityError::fault("image is empty"));
    }
    Ok(image::load_from_memory(bytes)?.to_rgb8())
}

/// Crop or align one face to `width × height`.
fn face_pixels(image: &RgbImage, bbox: &BoundingBox, align: bool, width: u32, height: u32) -> RgbImage {
    match (&bbox.landmarks, align) {
        (Some(landmarks), true) => alignment::align_face(image, landmarks, width, height),
        _ => {
            let crop = alignment::crop_face(image, &bbox.facial_area(image.width(), image.height()));
            image::imageops::resize(&crop, width, height, image::imageops::FilterType::Triangle)
        }
    }
}

/// RGB pixels as `height × width × 3` floats in [0, 1].
fn normalized(image: &RgbImage) -> Array3<f32> {
    let (w, h) = image.dimensions();
    Array3::from_shape_fn((h as usize, w as usize, 3), |(y, x, c)| {
        image.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CapabilityError;
    use crate::types::FacialArea;
    use image::Rgb;

    const OPTIONS: DetectOptions = DetectOptions {
        enforce_detection: true,
        align: true,
        silent: true,
    };

    #[test]
    fn test_normalized_range_and_shape() {
        let image = RgbImage::from_fn(4, 2, |x, _| Rgb([255, (x * 50) as u8, 0]));
        let arr = normalized(&image);
        assert_eq!(arr.shape(), &[2, 4, 3]);
        assert!((arr[[1, 3, 0]] - 1.0).abs() < 1e-6);
        assert!((arr[[0, 2, 1]] - 100.0 / 255.0).abs() < 1e-6);
        assert_eq!(arr[[0, 0, 2]], 0.0);
    }

    #[test]
    fn test_face_pixels_without_landmarks_crops_box() {
        let image = RgbImage::from_fn(100, 100, |x, _| if x < 50 { Rgb([255, 0, 0]) } else { Rgb([0, 0, 255]) });
        let bbox = BoundingBox {
            x: 60.0, y: 10.0, width: 30.0, height: 30.0, confidence: 0.9, landmarks: None,
        };
        let face = face_pixels(&image, &bbox, true, 16, 16);
        assert_eq!(face.dimensions(), (16, 16));
        assert!(face.pixels().all(|p| p[2] == 255 && p[0] == 0));
    }

    fn bbox(confidence: f32) -> BoundingBox {
        BoundingBox {
            x: 5.0, y: 5.0, width: 20.0, height: 20.0, confidence, landmarks: None,
        }
    }

    #[test]
    fn test_enforced_empty_detection_is_no_face() {
        let err = apply_enforcement(Vec::new(), OPTIONS, 64, 48).unwrap_err();
        assert_eq!(err, CapabilityError::NoFaceDetected);
    }

    #[test]
    fn test_unenforced_empty_detection_uses_whole_image() {
        let options = DetectOptions { enforce_detection: false, ..OPTIONS };
        let faces = apply_enforcement(Vec::new(), options, 64, 48).unwrap();

        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0].confidence, 0.0);
        assert!(faces[0].landmarks.is_none());
        assert_eq!(faces[0].facial_area(64, 48), FacialArea { x: 0, y: 0, w: 64, h: 48 });
    }

    #[test]
    fn test_detections_pass_through_either_way() {
        for enforce_detection in [true, false] {
            let options = DetectOptions { enforce_detection, ..OPTIONS };
            let faces = apply_enforcement(vec![bbox(0.9), bbox(0.6)], options, 64, 48).unwrap();
            assert_eq!(faces.len(), 2);
            assert_eq!(faces[0].confidence, 0.9);
        }
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(decode(b"not an image"), Err(CapabilityError::Fault(_))));
        assert!(matches!(decode(b""), Err(CapabilityError::Fault(_))));
    }

    #[test]
    fn test_missing_model_is_a_fault() {
        let dir = std::env::temp_dir().join("facecheck-no-models-here");
        let mut capability = OnnxCapability::new(dir, 1);

        let mut png = Vec::new();
        RgbImage::new(8, 8)
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();

        let err = capability
            .detect_and_align(&png, DetectorBackend::Opencv, OPTIONS)
            .unwrap_err();
        match err {
            CapabilityError::Fault(msg) => assert!(msg.contains("detector_opencv.onnx"), "{msg}"),
            other => panic!("expected fault, got {other:?}"),
        }
        assert!(capability.detectors.is_empty(), "failed loads are not cached");
    }
}
