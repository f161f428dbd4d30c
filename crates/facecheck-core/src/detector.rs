//! Face detector via ONNX Runtime.
//!
//! Every detector backend is served by an ONNX export with the SCRFD output
//! layout: three strides, each with score / bbox / keypoint tensors, decoded
//! anchor-free and filtered with NMS.

use crate::configuration::DetectorBackend;
use crate::types::BoundingBox;
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const DETECTOR_INPUT_SIZE: usize = 640;
const DETECTOR_MEAN: f32 = 127.5;
const DETECTOR_STD: f32 = 128.0;
const DETECTOR_CONFIDENCE_THRESHOLD: f32 = 0.5;
const DETECTOR_NMS_THRESHOLD: f32 = 0.4;
const DETECTOR_STRIDES: [usize; 3] = [8, 16, 32];
const DETECTOR_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detector model not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("empty image")]
    EmptyImage,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// ONNX file name for a detector backend, relative to the model directory.
pub fn model_file(backend: DetectorBackend) -> String {
    format!("detector_{}.onnx", backend.as_str())
}

/// Metadata for coordinate de-mapping after letterbox resize.
#[derive(Debug, Clone, Copy, PartialEq)]
struct LetterboxInfo {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
    new_width: u32,
    new_height: u32,
}

impl LetterboxInfo {
    /// Fit a `width × height` image into a square `input_size` canvas, centred.
    fn compute(width: u32, height: u32, input_size: usize) -> Self {
        let scale_w = input_size as f32 / width as f32;
        let scale_h = input_size as f32 / height as f32;
        let scale = scale_w.min(scale_h);

        let new_width = ((width as f32 * scale).round() as u32).clamp(1, input_size as u32);
        let new_height = ((height as f32 * scale).round() as u32).clamp(1, input_size as u32);

        Self {
            scale,
            pad_x: (input_size as u32 - new_width) as f32 / 2.0,
            pad_y: (input_size as u32 - new_height) as f32 / 2.0,
            new_width,
            new_height,
        }
    }
}

/// Output tensor indices for one stride: (score_idx, bbox_idx, kps_idx).
type StrideOutputIndices = (usize, usize, usize);

/// Face detector for one backend.
pub struct FaceDetector {
    session: Session,
    backend: DetectorBackend,
    input_size: usize,
    /// Per-stride output indices [(score, bbox, kps)] for strides [8, 16, 32].
    stride_indices: [StrideOutputIndices; 3],
}

impl FaceDetector {
    /// Load the detector model for `backend` from `model_dir`.
    pub fn load(
        model_dir: &Path,
        backend: DetectorBackend,
        intra_threads: usize,
    ) -> Result<Self, DetectorError> {
        let model_path = model_dir.join(model_file(backend));
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads)
            .map_err(ort::Error::from)?
            .commit_from_file(&model_path)?;

        let output_names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        let num_outputs = output_names.len();

        tracing::info!(
            backend = %backend,
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?output_names,
            "loaded detector model"
        );

        if num_outputs < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "detector model requires 9 outputs (3 strides × score/bbox/kps), got {num_outputs}"
            )));
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::debug!(?stride_indices, "detector output tensor mapping");

        Ok(Self {
            session,
            backend,
            input_size: DETECTOR_INPUT_SIZE,
            stride_indices,
        })
    }

    /// Detect faces in an RGB image, returning bounding boxes sorted by confidence
    /// (highest first) in original-image coordinates.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(DetectorError::EmptyImage);
        }

        let (input, letterbox) = self.preprocess(image);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut all_detections = Vec::new();

        for (stride_pos, &stride) in DETECTOR_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = self.stride_indices[stride_pos];

            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, bboxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;
            let (_, kps) = outputs[kps_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("kps stride {stride}: {e}")))?;

            all_detections.extend(decode_stride(
                scores,
                bboxes,
                kps,
                stride,
                self.input_size,
                &letterbox,
                DETECTOR_CONFIDENCE_THRESHOLD,
            ));
        }

        let result = nms(all_detections, DETECTOR_NMS_THRESHOLD);
        tracing::debug!(backend = %self.backend, faces = result.len(), "detection finished");
        Ok(result)
    }

    /// Letterbox an RGB image into a NCHW float tensor.
    fn preprocess(&self, image: &RgbImage) -> (Array4<f32>, LetterboxInfo) {
        let letterbox = LetterboxInfo::compute(image.width(), image.height(), self.input_size);
        let resized = image::imageops::resize(
            image,
            letterbox.new_width,
            letterbox.new_height,
            FilterType::Triangle,
        );

        let pad_x_start = letterbox.pad_x.floor() as usize;
        let pad_y_start = letterbox.pad_y.floor() as usize;
        let new_w = letterbox.new_width as usize;
        let new_h = letterbox.new_height as usize;

        // Padding normalises to 0.0.
        let mut tensor = Array4::<f32>::zeros((1, 3, self.input_size, self.input_size));

        for (x, y, pixel) in resized.enumerate_pixels() {
            let tx = x as usize + pad_x_start;
            let ty = y as usize + pad_y_start;
            if tx >= pad_x_start + new_w || ty >= pad_y_start + new_h {
                continue;
            }
            for c in 0..3 {
                tensor[[0, c, ty, tx]] = (pixel[c] as f32 - DETECTOR_MEAN) / DETECTOR_STD;
            }
        }

        (tensor, letterbox)
    }
}

/// Discover output tensor ordering by name.
///
/// Exports may name tensors "score_8", "bbox_16", "kps_32", ... or use generic
/// numeric names. Unrecognised names fall back to the positional ordering:
///   [0-2] = scores (strides 8, 16, 32)
///   [3-5] = bboxes (strides 8, 16, 32)
///   [6-8] = kps    (strides 8, 16, 32)
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };
    let lookup = |stride: usize| -> Option<StrideOutputIndices> {
        Some((find("score", stride)?, find("bbox", stride)?, find("kps", stride)?))
    };

    match (
        lookup(DETECTOR_STRIDES[0]),
        lookup(DETECTOR_STRIDES[1]),
        lookup(DETECTOR_STRIDES[2]),
    ) {
        (Some(s8), Some(s16), Some(s32)) => {
            tracing::debug!("detector: using name-based output tensor mapping");
            [s8, s16, s32]
        }
        _ => {
            tracing::debug!(?names, "detector: output names not recognized, using positional mapping");
            [(0, 3, 6), (1, 4, 7), (2, 5, 8)]
        }
    }
}

/// Decode detections for a single stride level.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    kps: &[f32],
    stride: usize,
    input_size: usize,
    letterbox: &LetterboxInfo,
    threshold: f32,
) -> Vec<BoundingBox> {
    let grid = input_size / stride;
    let num_anchors = grid * grid * DETECTOR_ANCHORS_PER_CELL;
    let s = stride as f32;

    let unmap = |x: f32, y: f32| -> (f32, f32) {
        (
            (x - letterbox.pad_x) / letterbox.scale,
            (y - letterbox.pad_y) / letterbox.scale,
        )
    };

    let mut detections = Vec::new();

    for idx in 0..num_anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= threshold {
            continue;
        }

        let anchor_idx = idx / DETECTOR_ANCHORS_PER_CELL;
        let anchor_cx = (anchor_idx % grid) as f32 * s;
        let anchor_cy = (anchor_idx / grid) as f32 * s;

        let bbox_off = idx * 4;
        let Some(offsets) = bboxes.get(bbox_off..bbox_off + 4) else {
            continue;
        };
        let (x1, y1) = unmap(anchor_cx - offsets[0] * s, anchor_cy - offsets[1] * s);
        let (x2, y2) = unmap(anchor_cx + offsets[2] * s, anchor_cy + offsets[3] * s);

        let kps_off = idx * 10;
        let landmarks = kps.get(kps_off..kps_off + 10).map(|points| {
            std::array::from_fn(|i| {
                unmap(anchor_cx + points[i * 2] * s, anchor_cy + points[i * 2 + 1] * s)
            })
        });

        detections.push(BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
            landmarks,
        });
    }

    detections
}

/// Non-Maximum Suppression. Output is sorted by confidence, highest first.
fn nms(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<BoundingBox> = Vec::new();
    for candidate in detections {
        if keep.iter().all(|kept| iou(kept, &candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

/// Intersection-over-Union between two bounding boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter_area = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union_area = a.width * a.height + b.width * b.height - inter_area;

    if union_area > 0.0 {
        inter_area / union_area
    } else {
        0.0
    }
}
