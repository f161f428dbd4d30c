//! Deterministic in-process capability for pipeline tests.
//!
//! A "face" is any image with at least one non-black pixel. The embedding of
//! an image is its mean RGB colour, so solid-colour images of different hues
//! are different people and identical images are the same person.

#![allow(dead_code)]

use facecheck_core::capability::{DetectOptions, ExtractedFace, Verification};
use facecheck_core::{
    Action, AnalysisConfiguration, CapabilityError, DetectorBackend, Embedding, FaceAttributes,
    FaceCapability, FacialArea,
};
use image::{Rgb, RgbImage};
use ndarray::Array3;

pub const RED: [u8; 3] = [255, 0, 0];
pub const BLUE: [u8; 3] = [0, 0, 255];
pub const BLACK: [u8; 3] = [0, 0, 0];

/// Encode a solid-colour PNG.
pub fn solid_png(color: [u8; 3], width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, Rgb(color));
    let mut bytes = Vec::new();
    image
        .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CallCounts {
    pub detect: usize,
    pub verify: usize,
    pub analyze: usize,
}

pub struct FakeCapability {
    /// Faces reported per image that contains a face.
    pub faces_per_image: usize,
    /// Records returned by `analyze`; `None` mirrors `faces_per_image`.
    pub attribute_records: Option<usize>,
    /// Make `verify` / `analyze` fail with a fault.
    pub fail_verify: bool,
    pub fail_analyze: bool,
    pub calls: CallCounts,
    pub last_options: Option<DetectOptions>,
}

impl Default for FakeCapability {
    fn default() -> Self {
        Self {
            faces_per_image: 1,
            attribute_records: None,
            fail_verify: false,
            fail_analyze: false,
            calls: CallCounts::default(),
            last_options: None,
        }
    }
}

fn decode(bytes: &[u8]) -> Result<RgbImage, CapabilityError> {
    image::load_from_memory(bytes)
        .map(|i| i.to_rgb8())
        .map_err(|e| CapabilityError::fault(format!("decode: {e}")))
}

fn has_face(image: &RgbImage) -> bool {
    image.pixels().any(|p| p.0 != BLACK)
}

fn embedding(image: &RgbImage) -> Embedding {
    let n = (image.width() * image.height()).max(1) as f32;
    let mut sum = [0.0f32; 3];
    for p in image.pixels() {
        for c in 0..3 {
            sum[c] += p[c] as f32;
        }
    }
    Embedding {
        values: sum.iter().map(|s| s / n).collect(),
        model: None,
    }
}

impl FakeCapability {
    fn face_count(&self, image: &RgbImage, options: DetectOptions) -> Result<usize, CapabilityError> {
        match (has_face(image), options.enforce_detection) {
            (true, _) => Ok(self.faces_per_image),
            (false, true) => Err(CapabilityError::NoFaceDetected),
            (false, false) => Ok(1),
        }
    }
}

impl FaceCapability for FakeCapability {
    fn detect_and_align(
        &mut self,
        image: &[u8],
        _detector: DetectorBackend,
        options: DetectOptions,
    ) -> Result<Vec<ExtractedFace>, CapabilityError> {
        self.calls.detect += 1;
        self.last_options = Some(options);
        let image = decode(image)?;
        let count = self.face_count(&image, options)?;

        let face = Array3::from_shape_fn((8, 8, 3), |(y, x, c)| {
            image.get_pixel(x as u32 % image.width(), y as u32 % image.height())[c] as f32 / 255.0
        });
        Ok((0..count)
            .map(|i| ExtractedFace {
                face: face.clone(),
                facial_area: FacialArea { x: 10 * i as u32, y: 0, w: 4, h: 4 },
                confidence: 0.9 - 0.1 * i as f32,
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
        self.calls.verify += 1;
        self.last_options = Some(options);
        if self.fail_verify {
            return Err(CapabilityError::fault("model exploded"));
        }
        let a = decode(image_a)?;
        let b = decode(image_b)?;
        self.face_count(&a, options)?;
        self.face_count(&b, options)?;

        let distance = embedding(&a).distance(&embedding(&b), config.distance_metric);
        Ok(Verification::from_distance(distance, config.threshold()))
    }

    fn analyze(
        &mut self,
        image: &[u8],
        actions: &[Action],
        _detector: DetectorBackend,
        options: DetectOptions,
    ) -> Result<Vec<FaceAttributes>, CapabilityError> {
        self.calls.analyze += 1;
        self.last_options = Some(options);
        if self.fail_analyze {
            return Err(CapabilityError::fault("classifier exploded"));
        }
        let image = decode(image)?;
        let count = match self.attribute_records {
            Some(n) => n,
            None => self.face_count(&image, options)?,
        };

        Ok((0..count)
            .map(|i| {
                let mut record = FaceAttributes::new(FacialArea { x: 0, y: 0, w: 8, h: 8 }, 0.9);
                for &action in actions {
                    let probabilities: Vec<f32> = match action {
                        Action::Age => (0..101).map(|age| if age == 30 + i { 1.0 } else { 0.0 }).collect(),
                        Action::Emotion => vec![0.0, 0.0, 0.0, 0.8, 0.1, 0.0, 0.1],
                        Action::Gender => vec![0.3, 0.7],
                        Action::Race => vec![0.1, 0.1, 0.1, 0.5, 0.1, 0.1],
                    };
                    record.apply(action, &probabilities);
                }
                record
            })
            .collect())
    }
}
