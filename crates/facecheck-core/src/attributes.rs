//! Facial attribute classification: apparent age, gender, emotion and race.
//!
//! Each action is a separate ONNX classifier over a face crop. Raw model
//! outputs are turned into percentage score maps and a dominant label.

use crate::types::FacialArea;
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use thiserror::Error;

pub const GENDER_LABELS: [&str; 2] = ["Woman", "Man"];
pub const EMOTION_LABELS: [&str; 7] = ["angry", "disgust", "fear", "happy", "sad", "surprise", "neutral"];
pub const RACE_LABELS: [&str; 6] = [
    "asian",
    "indian",
    "black",
    "white",
    "middle eastern",
    "latino hispanic",
];
/// The age model predicts a distribution over ages 0..=100.
const AGE_BINS: usize = 101;

const VGG_INPUT_SIZE: u32 = 224;
const EMOTION_INPUT_SIZE: u32 = 48;

#[derive(Error, Debug)]
pub enum AttributeError {
    #[error("{action} model not found: {path}")]
    ModelNotFound { action: Action, path: String },
    #[error("{action} inference failed: {reason}")]
    InferenceFailed { action: Action, reason: String },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// An attribute to predict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Age,
    Emotion,
    Gender,
    Race,
}

impl Action {
    pub const ALL: [Action; 4] = [Action::Age, Action::Emotion, Action::Gender, Action::Race];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Age => "age",
            Action::Emotion => "emotion",
            Action::Gender => "gender",
            Action::Race => "race",
        }
    }

    pub fn model_file(&self) -> String {
        format!("attribute_{}.onnx", self.as_str())
    }

    fn output_len(&self) -> usize {
        match self {
            Action::Age => AGE_BINS,
            Action::Emotion => EMOTION_LABELS.len(),
            Action::Gender => GENDER_LABELS.len(),
            Action::Race => RACE_LABELS.len(),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attribute predictions for one detected face.
///
/// Fields belonging to actions that were not requested are left at their
/// defaults (age 0, empty maps, empty dominant labels).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FaceAttributes {
    pub age: u32,
    pub dominant_emotion: String,
    pub emotion: BTreeMap<String, f32>,
    pub dominant_gender: String,
    pub gender: BTreeMap<String, f32>,
    pub dominant_race: String,
    pub race: BTreeMap<String, f32>,
    pub region: FacialArea,
    pub face_confidence: f32,
}

impl FaceAttributes {
    pub fn new(region: FacialArea, face_confidence: f32) -> Self {
        Self {
            region,
            face_confidence,
            ..Self::default()
        }
    }

    /// Fold one classifier's raw output into this record.
    pub fn apply(&mut self, action: Action, probabilities: &[f32]) {
        match action {
            Action::Age => self.age = apparent_age(probabilities),
            Action::Emotion => {
                self.emotion = label_scores(&EMOTION_LABELS, probabilities);
                self.dominant_emotion = dominant(&self.emotion);
            }
            Action::Gender => {
                self.gender = label_scores(&GENDER_LABELS, probabilities);
                self.dominant_gender = dominant(&self.gender);
            }
            Action::Race => {
                self.race = label_scores(&RACE_LABELS, probabilities);
                self.dominant_race = dominant(&self.race);
            }
        }
    }
}

/// Expected value of the age distribution, truncated to whole years.
pub fn apparent_age(probabilities: &[f32]) -> u32 {
    let total: f32 = probabilities.iter().sum();
    if total <= 0.0 {
        return 0;
    }
    let expected: f32 = probabilities
        .iter()
        .enumerate()
        .map(|(age, p)| age as f32 * p)
        .sum::<f32>()
        / total;
    expected.max(0.0) as u32
}

/// Pair labels with probabilities, rescaled to percentages summing to 100.
pub fn label_scores(labels: &[&str], probabilities: &[f32]) -> BTreeMap<String, f32> {
    let total: f32 = probabilities.iter().take(labels.len()).sum();
    labels
        .iter()
        .zip(probabilities.iter())
        .map(|(label, &p)| {
            let pct = if total > 0.0 { 100.0 * p / total } else { 0.0 };
            (label.to_string(), pct)
        })
        .collect()
}

/// Label with the highest score; empty when there are no scores.
pub fn dominant(scores: &BTreeMap<String, f32>) -> String {
    scores
        .iter()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(label, _)| label.clone())
        .unwrap_or_default()
}

/// ONNX classifier for one attribute.
pub struct AttributeClassifier {
    session: Session,
    action: Action,
}

impl AttributeClassifier {
    pub fn load(model_dir: &Path, action: Action, intra_threads: usize) -> Result<Self, AttributeError> {
        let model_path = model_dir.join(action.model_file());
        if !model_path.exists() {
            return Err(AttributeError::ModelNotFound {
                action,
                path: model_path.display().to_string(),
            });
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads)
            .map_err(ort::Error::from)?
            .commit_from_file(&model_path)?;

        tracing::info!(
            action = %action,
            path = %model_path.display(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded attribute model"
        );

        Ok(Self { session, action })
    }

    /// Run the classifier on a face crop, returning its raw output vector.
    pub fn predict(&mut self, face: &RgbImage) -> Result<Vec<f32>, AttributeError> {
        let action = self.action;
        let input = preprocess(face, action);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| AttributeError::InferenceFailed {
                action,
                reason: e.to_string(),
            })?;

        if raw.len() != action.output_len() {
            return Err(AttributeError::InferenceFailed {
                action,
                reason: format!("expected {} outputs, got {}", action.output_len(), raw.len()),
            });
        }

        Ok(raw.to_vec())
    }
}

/// Build the NHWC input tensor for an attribute model.
///
/// Emotion takes a 48×48 single-channel luma crop; the others take 224×224 RGB.
/// Both are scaled to [0, 1].
fn preprocess(face: &RgbImage, action: Action) -> Array4<f32> {
    match action {
        Action::Emotion => {
            let gray = image::imageops::grayscale(face);
            let resized = image::imageops::resize(&gray, EMOTION_INPUT_SIZE, EMOTION_INPUT_SIZE, FilterType::Triangle);
            let n = EMOTION_INPUT_SIZE as usize;
            let mut tensor = Array4::<f32>::zeros((1, n, n, 1));
            for (x, y, pixel) in resized.enumerate_pixels() {
                tensor[[0, y as usize, x as usize, 0]] = pixel[0] as f32 / 255.0;
            }
            tensor
        }
        Action::Age | Action::Gender | Action::Race => {
            let resized = image::imageops::resize(face, VGG_INPUT_SIZE, VGG_INPUT_SIZE, FilterType::Triangle);
            let n = VGG_INPUT_SIZE as usize;
            let mut tensor = Array4::<f32>::zeros((1, n, n, 3));
            for (x, y, pixel) in resized.enumerate_pixels() {
                for c in 0..3 {
                    tensor[[0, y as usize, x as usize, c]] = pixel[c] as f32 / 255.0;
                }
            }
            tensor
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_apparent_age_expected_value() {
        let mut probs = vec![0.0f32; AGE_BINS];
        probs[30] = 0.5;
        probs[40] = 0.5;
        assert_eq!(apparent_age(&probs), 35);
    }

    #[test]
    fn test_apparent_age_truncates() {
        let mut probs = vec![0.0f32; AGE_BINS];
        probs[20] = 0.3;
        probs[21] = 0.7;
        // 20.7 → 20
        assert_eq!(apparent_age(&probs), 20);
    }

    #[test]
    fn test_apparent_age_all_zero() {
        assert_eq!(apparent_age(&[0.0; AGE_BINS]), 0);
    }

    #[test]
    fn test_label_scores_are_percentages() {
        let scores = label_scores(&GENDER_LABELS, &[0.2, 0.6]);
        assert!((scores["Woman"] - 25.0).abs() < 1e-4);
        assert!((scores["Man"] - 75.0).abs() < 1e-4);
        assert_eq!(dominant(&scores), "Man");
    }

    #[test]
    fn test_dominant_empty() {
        assert_eq!(dominant(&BTreeMap::new()), "");
    }

    #[test]
    fn test_apply_fills_only_requested_action() {
        let mut attrs = FaceAttributes::new(FacialArea { x: 1, y: 2, w: 3, h: 4 }, 0.9);
        let mut emotion = vec![0.0f32; EMOTION_LABELS.len()];
        emotion[3] = 1.0;
        attrs.apply(Action::Emotion, &emotion);

        assert_eq!(attrs.dominant_emotion, "happy");
        assert!((attrs.emotion["happy"] - 100.0).abs() < 1e-4);
        assert!(attrs.dominant_race.is_empty());
        assert!(attrs.gender.is_empty());
        assert_eq!(attrs.region, FacialArea { x: 1, y: 2, w: 3, h: 4 });
    }

    #[test]
    fn test_apply_race() {
        let mut attrs = FaceAttributes::default();
        attrs.apply(Action::Race, &[0.1, 0.1, 0.1, 0.1, 0.5, 0.1]);
        assert_eq!(attrs.dominant_race, "middle eastern");
        let total: f32 = attrs.race.values().sum();
        assert!((total - 100.0).abs() < 1e-3);
    }

    #[test]
    fn test_preprocess_emotion_is_single_channel() {
        let face = RgbImage::from_pixel(100, 100, Rgb([255, 255, 255]));
        let tensor = preprocess(&face, Action::Emotion);
        assert_eq!(tensor.shape(), &[1, 48, 48, 1]);
        assert!((tensor[[0, 0, 0, 0]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_preprocess_vgg_shape() {
        let face = RgbImage::from_pixel(30, 60, Rgb([0, 0, 0]));
        for action in [Action::Age, Action::Gender, Action::Race] {
            assert_eq!(preprocess(&face, action).shape(), &[1, 224, 224, 3]);
        }
    }

    #[test]
    fn test_model_file_names() {
        assert_eq!(Action::Age.model_file(), "attribute_age.onnx");
        assert_eq!(Action::Race.model_file(), "attribute_race.onnx");
    }
}
