use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

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
    /// Box area in pixels. Degenerate boxes report 0.
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Compute cosine similarity between two embeddings.
    ///
    /// Returns a value in [-1, 1]. Higher = more similar.
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

    /// Compute Euclidean distance between two embeddings.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Whether two embeddings belong to the same face under a Euclidean
    /// distance cutoff. Embeddings of different length never match.
    pub fn is_match(&self, other: &Embedding, max_distance: f32) -> bool {
        self.len() == other.len() && self.euclidean_distance(other) < max_distance
    }
}

/// Which detected face to embed when the detector returns more than one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaceSelection {
    /// First box in detector order (highest confidence for SCRFD).
    #[default]
    First,
    /// Largest box by area; earlier boxes win ties.
    Largest,
    /// Highest confidence regardless of detector order; earlier boxes win ties.
    MostConfident,
}

impl FaceSelection {
    /// Pick one face out of the detector output, or `None` if it is empty.
    pub fn select<'a>(&self, faces: &'a [BoundingBox]) -> Option<&'a BoundingBox> {
        match self {
            FaceSelection::First => faces.first(),
            FaceSelection::Largest => first_max_by(faces, BoundingBox::area),
            FaceSelection::MostConfident => first_max_by(faces, |f| f.confidence),
        }
    }
}

/// `Iterator::max_by` keeps the last maximum; this keeps the first.
fn first_max_by<F>(faces: &[BoundingBox], key: F) -> Option<&BoundingBox>
where
    F: Fn(&BoundingBox) -> f32,
{
    faces.iter().fold(None, |best: Option<&BoundingBox>, face| match best {
        Some(b) if key(b) >= key(face) => Some(b),
        _ => Some(face),
    })
}

impl fmt::Display for FaceSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FaceSelection::First => "first",
            FaceSelection::Largest => "largest",
            FaceSelection::MostConfident => "most_confident",
        })
    }
}

impl FromStr for FaceSelection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first" => Ok(FaceSelection::First),
            "largest" => Ok(FaceSelection::Largest),
            "most_confident" | "most-confident" => Ok(FaceSelection::MostConfident),
            other => Err(format!(
                "unknown face selection '{other}' (expected first, largest or most_confident)"
            )),
        }
    }
}
