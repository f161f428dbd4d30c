//! Analysis configuration: embedding model, detector backend and distance metric.
//!
//! Each field is a closed enumeration, so a configuration that type-checks is
//! always a valid combination. Thresholds are looked up per (model, metric).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("unknown model '{0}' (expected one of: {list})", list = join(&ModelName::ALL))]
    UnknownModel(String),
    #[error("unknown detector backend '{0}' (expected one of: {list})", list = join(&DetectorBackend::ALL))]
    UnknownDetector(String),
    #[error("unknown distance metric '{0}' (expected one of: {list})", list = join(&DistanceMetric::ALL))]
    UnknownMetric(String),
}

fn join<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Face embedding model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ModelName {
    #[default]
    #[serde(rename = "VGG-Face")]
    VggFace,
    Facenet,
    Facenet512,
    OpenFace,
    DeepFace,
    DeepID,
    ArcFace,
    Dlib,
    SFace,
}

impl ModelName {
    pub const ALL: [ModelName; 9] = [
        ModelName::VggFace,
        ModelName::Facenet,
        ModelName::Facenet512,
        ModelName::OpenFace,
        ModelName::DeepFace,
        ModelName::DeepID,
        ModelName::ArcFace,
        ModelName::Dlib,
        ModelName::SFace,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelName::VggFace => "VGG-Face",
            ModelName::Facenet => "Facenet",
            ModelName::Facenet512 => "Facenet512",
            ModelName::OpenFace => "OpenFace",
            ModelName::DeepFace => "DeepFace",
            ModelName::DeepID => "DeepID",
            ModelName::ArcFace => "ArcFace",
            ModelName::Dlib => "Dlib",
            ModelName::SFace => "SFace",
        }
    }
}

/// Face detector backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorBackend {
    #[default]
    Opencv,
    Ssd,
    Dlib,
    Mtcnn,
    Retinaface,
    Mediapipe,
}

impl DetectorBackend {
    pub const ALL: [DetectorBackend; 6] = [
        DetectorBackend::Opencv,
        DetectorBackend::Ssd,
        DetectorBackend::Dlib,
        DetectorBackend::Mtcnn,
        DetectorBackend::Retinaface,
        DetectorBackend::Mediapipe,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DetectorBackend::Opencv => "opencv",
            DetectorBackend::Ssd => "ssd",
            DetectorBackend::Dlib => "dlib",
            DetectorBackend::Mtcnn => "mtcnn",
            DetectorBackend::Retinaface => "retinaface",
            DetectorBackend::Mediapipe => "mediapipe",
        }
    }
}

/// Distance between two embeddings. Lower = more similar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    #[default]
    Cosine,
    Euclidean,
    EuclideanL2,
}

impl DistanceMetric {
    pub const ALL: [DistanceMetric; 3] = [
        DistanceMetric::Cosine,
        DistanceMetric::Euclidean,
        DistanceMetric::EuclideanL2,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::Euclidean => "euclidean",
            DistanceMetric::EuclideanL2 => "euclidean_l2",
        }
    }
}

macro_rules! impl_display_from_str {
    ($ty:ty, $err:ident) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = ConfigurationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str().eq_ignore_ascii_case(s.trim()))
                    .ok_or_else(|| ConfigurationError::$err(s.to_string()))
            }
        }
    };
}

impl_display_from_str!(ModelName, UnknownModel);
impl_display_from_str!(DetectorBackend, UnknownDetector);
impl_display_from_str!(DistanceMetric, UnknownMetric);

/// Distance at or below which two faces are declared the same identity.
pub fn threshold(model: ModelName, metric: DistanceMetric) -> f32 {
    use DistanceMetric::*;
    use ModelName::*;

    match (model, metric) {
        (VggFace, Cosine) => 0.40,
        (VggFace, Euclidean) => 0.60,
        (VggFace, EuclideanL2) => 0.86,
        (Facenet, Cosine) => 0.40,
        (Facenet, Euclidean) => 10.0,
        (Facenet, EuclideanL2) => 0.80,
        (Facenet512, Cosine) => 0.30,
        (Facenet512, Euclidean) => 23.56,
        (Facenet512, EuclideanL2) => 1.04,
        (ArcFace, Cosine) => 0.68,
        (ArcFace, Euclidean) => 4.15,
        (ArcFace, EuclideanL2) => 1.13,
        (Dlib, Cosine) => 0.07,
        (Dlib, Euclidean) => 0.6,
        (Dlib, EuclideanL2) => 0.4,
        (SFace, Cosine) => 0.593,
        (SFace, Euclidean) => 10.734,
        (SFace, EuclideanL2) => 1.055,
        (OpenFace, Cosine) => 0.10,
        (OpenFace, Euclidean) => 0.55,
        (OpenFace, EuclideanL2) => 0.55,
        (DeepFace, Cosine) => 0.23,
        (DeepFace, Euclidean) => 64.0,
        (DeepFace, EuclideanL2) => 0.64,
        (DeepID, Cosine) => 0.015,
        (DeepID, Euclidean) => 45.0,
        (DeepID, EuclideanL2) => 0.17,
    }
}

/// The user-selected (model, detector, metric) triple.
///
/// Every derived result is computed under exactly one configuration; changing
/// any field invalidates all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct AnalysisConfiguration {
    pub model_name: ModelName,
    pub detector_backend: DetectorBackend,
    pub distance_metric: DistanceMetric,
}

impl AnalysisConfiguration {
    pub fn new(
        model_name: ModelName,
        detector_backend: DetectorBackend,
        distance_metric: DistanceMetric,
    ) -> Self {
        Self {
            model_name,
            detector_backend,
            distance_metric,
        }
    }

    /// Threshold for this configuration's model and metric.
    pub fn threshold(&self) -> f32 {
        threshold(self.model_name, self.distance_metric)
    }
}

impl fmt::Display for AnalysisConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.model_name, self.detector_backend, self.distance_metric
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_roundtrip_all_values() {
        for m in ModelName::ALL {
            assert_eq!(m.as_str().parse::<ModelName>().unwrap(), m);
        }
        for d in DetectorBackend::ALL {
            assert_eq!(d.as_str().parse::<DetectorBackend>().unwrap(), d);
        }
        for m in DistanceMetric::ALL {
            assert_eq!(m.as_str().parse::<DistanceMetric>().unwrap(), m);
        }
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!("vgg-face".parse::<ModelName>().unwrap(), ModelName::VggFace);
        assert_eq!("RetinaFace".parse::<DetectorBackend>().unwrap(), DetectorBackend::Retinaface);
        assert_eq!("EUCLIDEAN_L2".parse::<DistanceMetric>().unwrap(), DistanceMetric::EuclideanL2);
    }

    #[test]
    fn test_parse_unknown_lists_choices() {
        let err = "yolo".parse::<DetectorBackend>().unwrap_err();
        assert_eq!(err, ConfigurationError::UnknownDetector("yolo".into()));
        let msg = err.to_string();
        assert!(msg.contains("opencv") && msg.contains("mediapipe"), "{msg}");
    }

    #[test]
    fn test_serde_names_match_display() {
        let json = serde_json::to_string(&ModelName::VggFace).unwrap();
        assert_eq!(json, "\"VGG-Face\"");
        let json = serde_json::to_string(&DistanceMetric::EuclideanL2).unwrap();
        assert_eq!(json, "\"euclidean_l2\"");
        let back: DetectorBackend = serde_json::from_str("\"mtcnn\"").unwrap();
        assert_eq!(back, DetectorBackend::Mtcnn);
    }

    #[test]
    fn test_default_configuration() {
        let cfg = AnalysisConfiguration::default();
        assert_eq!(cfg.model_name, ModelName::VggFace);
        assert_eq!(cfg.detector_backend, DetectorBackend::Opencv);
        assert_eq!(cfg.distance_metric, DistanceMetric::Cosine);
        assert!((cfg.threshold() - 0.40).abs() < 1e-6);
    }

    #[test]
    fn test_thresholds_positive_for_every_pair() {
        for m in ModelName::ALL {
            for d in DistanceMetric::ALL {
                assert!(threshold(m, d) > 0.0, "{m}/{d}");
            }
        }
    }
}
