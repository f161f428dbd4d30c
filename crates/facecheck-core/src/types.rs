use crate::configuration::DistanceMetric;
use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// A box covering the whole image, used when detection is not enforced
    /// and the detector found nothing.
    pub fn whole_image(width: u32, height: u32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
            confidence: 0.0,
            landmarks: None,
        }
    }

    /// Integer region of this box, clamped to an image of the given size.
    pub fn facial_area(&self, image_width: u32, image_height: u32) -> FacialArea {
        let x0 = self.x.round().clamp(0.0, image_width as f32) as u32;
        let y0 = self.y.round().clamp(0.0, image_height as f32) as u32;
        let x1 = (self.x + self.width).round().clamp(0.0, image_width as f32) as u32;
        let y1 = (self.y + self.height).round().clamp(0.0, image_height as f32) as u32;
        FacialArea {
            x: x0,
            y: y0,
            w: x1.saturating_sub(x0),
            h: y1.saturating_sub(y0),
        }
    }
}

/// Face region in original-image pixel coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacialArea {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl FacialArea {
    pub fn is_empty(&self) -> bool {
        self.w == 0 || self.h == 0
    }
}

/// Face embedding vector produced by one recognition model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model that produced this embedding (e.g., "ArcFace").
    pub model: Option<String>,
}

impl Embedding {
    /// Cosine similarity in [-1, 1]. Higher = more similar.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    /// Cosine distance: `1 - similarity`. A zero vector is maximally distant from
    /// everything (distance 1.0).
    pub fn cosine_distance(&self, other: &Embedding) -> f32 {
        1.0 - self.similarity(other)
    }

    /// Euclidean distance between the raw vectors.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Euclidean distance between the L2-normalised vectors.
    pub fn euclidean_l2_distance(&self, other: &Embedding) -> f32 {
        self.l2_normalized().euclidean_distance(&other.l2_normalized())
    }

    pub fn distance(&self, other: &Embedding, metric: DistanceMetric) -> f32 {
        match metric {
            DistanceMetric::Cosine => self.cosine_distance(other),
            DistanceMetric::Euclidean => self.euclidean_distance(other),
            DistanceMetric::EuclideanL2 => self.euclidean_l2_distance(other),
        }
    }

    pub fn l2_normalized(&self) -> Embedding {
        let norm: f32 = self.values.iter().map(|x| x * x).sum::<f32>().sqrt();
        let values = if norm > 0.0 {
            self.values.iter().map(|x| x / norm).collect()
        } else {
            self.values.clone()
        };
        Embedding {
            values,
            model: self.model.clone(),
        }
    }
}
