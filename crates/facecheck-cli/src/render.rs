//! Human-readable rendering of results. JSON output goes through serde_json.

use facecheck_core::adapters::{AttributeResult, ExtractionResult, VerificationResult};
use facecheck_core::configuration::threshold;
use facecheck_core::session::ImageReport;
use facecheck_core::{DetectorBackend, DistanceMetric, FaceAttributes, ModelName, SessionReport};
use serde::Serialize;

pub fn json<T: Serialize>(value: &T) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

pub fn session(report: &SessionReport) -> String {
    let mut out = String::new();
    out.push_str(&format!("Configuration: {}\n", report.configuration));
    for image in &report.images {
        out.push('\n');
        out.push_str(&image_report(image));
    }
    out.push('\n');
    match &report.verification {
        Some(v) => out.push_str(&verification(v)),
        None => out.push_str("Comparison not run.\n"),
    }
    out
}

fn image_report(image: &ImageReport) -> String {
    let mut out = String::new();
    let title = match &image.name {
        Some(name) => format!("{} ({name})", image.slot),
        None => image.slot.to_string(),
    };
    out.push_str(&format!("== {title} ==\n"));

    if image.name.is_none() {
        out.push_str("  not provided\n");
        return out;
    }
    if let Some(extraction) = &image.extraction {
        out.push_str(&indent(&self::extraction(extraction)));
    }
    if let Some(attributes) = &image.attributes {
        out.push_str(&indent(&self::attributes(attributes)));
    }
    out
}

pub fn extraction(result: &ExtractionResult) -> String {
    match (&result.error, &result.original_region, &result.face_bytes) {
        (Some(e), _, _) => format!("Face extraction failed: {e}\n"),
        (None, Some(r), Some(bytes)) => format!(
            "Face extracted at x={} y={} w={} h={} ({} byte PNG)\n",
            r.x,
            r.y,
            r.w,
            r.h,
            bytes.len()
        ),
        _ => "Face extraction returned no face\n".to_string(),
    }
}

pub fn attributes(result: &AttributeResult) -> String {
    if let Some(e) = &result.error {
        return format!("Attribute analysis failed: {e}\n");
    }
    let Some(face) = result.primary() else {
        return "No attribute data\n".to_string();
    };

    let mut out = face_summary(face);
    match result.additional_faces() {
        0 => {}
        1 => out.push_str("(1 more face detected)\n"),
        n => out.push_str(&format!("({n} more faces detected)\n")),
    }
    out
}

fn face_summary(face: &FaceAttributes) -> String {
    let pct = |scores: &std::collections::BTreeMap<String, f32>, label: &str| {
        scores.get(label).copied().unwrap_or(0.0)
    };
    format!(
        "Age:     {}\nGender:  {} ({:.1}%)\nEmotion: {} ({:.1}%)\nRace:    {} ({:.1}%)\n",
        face.age,
        face.dominant_gender,
        pct(&face.gender, &face.dominant_gender),
        face.dominant_emotion,
        pct(&face.emotion, &face.dominant_emotion),
        face.dominant_race,
        pct(&face.race, &face.dominant_race),
    )
}

pub fn verification(result: &VerificationResult) -> String {
    if let Some(e) = &result.error {
        return format!("Comparison error: {e}\n");
    }

    let verdict = match result.verified {
        Some(true) => "Faces verified as the same person.",
        Some(false) => "Faces not verified as the same person.",
        None => return "Comparison result unavailable.\n".to_string(),
    };
    format!(
        "{verdict}\n  Distance:  {:.4} (lower is more similar)\n  Threshold: {:.4}\n  Model:     {}\n  Detector:  {}\n  Metric:    {}\n",
        result.distance.unwrap_or(0.0),
        result.threshold.unwrap_or(0.0),
        result.model_used,
        result.detector_used,
        result.metric_used,
    )
}

/// Valid configuration values and the threshold table.
#[derive(Debug, Serialize)]
pub struct ModelListing {
    pub models: Vec<ModelName>,
    pub detectors: Vec<DetectorBackend>,
    pub metrics: Vec<DistanceMetric>,
    pub thresholds: Vec<ThresholdRow>,
}

#[derive(Debug, Serialize)]
pub struct ThresholdRow {
    pub model: ModelName,
    pub cosine: f32,
    pub euclidean: f32,
    pub euclidean_l2: f32,
}

impl ModelListing {
    pub fn build() -> Self {
        Self {
            models: ModelName::ALL.to_vec(),
            detectors: DetectorBackend::ALL.to_vec(),
            metrics: DistanceMetric::ALL.to_vec(),
            thresholds: ModelName::ALL
                .iter()
                .map(|&model| ThresholdRow {
                    model,
                    cosine: threshold(model, DistanceMetric::Cosine),
                    euclidean: threshold(model, DistanceMetric::Euclidean),
                    euclidean_l2: threshold(model, DistanceMetric::EuclideanL2),
                })
                .collect(),
        }
    }
}

pub fn models(listing: &ModelListing) -> String {
    let mut out = format!(
        "Models:    {}\nDetectors: {}\nMetrics:   {}\n\n",
        join(&listing.models),
        join(&listing.detectors),
        join(&listing.metrics),
    );
    out.push_str(&format!("{:<12} {:>8} {:>10} {:>13}\n", "model", "cosine", "euclidean", "euclidean_l2"));
    for row in &listing.thresholds {
        out.push_str(&format!(
            "{:<12} {:>8.4} {:>10.4} {:>13.4}\n",
            row.model.as_str(),
            row.cosine,
            row.euclidean,
            row.euclidean_l2
        ));
    }
    out
}

fn join<T: std::fmt::Display>(items: &[T]) -> String {
    items.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

fn indent(text: &str) -> String {
    text.lines().map(|l| format!("  {l}\n")).collect()
}
