use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Face embedding vector produced by a face encoder.
///
/// The dimensionality is fixed by the encoder (512 for ArcFace, 128 for
/// dlib-style encoders). Values are immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Number of dimensions.
    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Compute Euclidean (L2) distance between two embeddings.
    ///
    /// Lower = more similar. Both embeddings must have the same dimension;
    /// callers check this before comparing.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        debug_assert_eq!(self.dim(), other.dim(), "embedding dimension mismatch");
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self::new(values)
    }
}

/// Pixel-space bounding box of a detected face, `(top, right, bottom, left)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FaceLocation {
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub left: u32,
}

impl FaceLocation {
    pub fn new(top: u32, right: u32, bottom: u32, left: u32) -> Self {
        Self { top, right, bottom, left }
    }

    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }
}

/// Detector cost/accuracy tradeoff. Not a correctness knob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorMode {
    #[default]
    Fast,
    Accurate,
}

impl DetectorMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectorMode::Fast => "fast",
            DetectorMode::Accurate => "accurate",
        }
    }
}

impl fmt::Display for DetectorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DetectorMode {
    type Err = String;

    /// Accepts `fast`/`accurate` and the legacy `small`/`large` spellings.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fast" | "small" | "hog" => Ok(DetectorMode::Fast),
            "accurate" | "large" | "cnn" => Ok(DetectorMode::Accurate),
            other => Err(format!("unknown detector mode: {other} (expected fast or accurate)")),
        }
    }
}

/// Output of a detect-and-encode pass: one location and one embedding per face.
///
/// Both sequences are always the same length and in the same order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Detections {
    locations: Vec<FaceLocation>,
    embeddings: Vec<Embedding>,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("{locations} face locations but {embeddings} embeddings")]
pub struct LengthMismatch {
    pub locations: usize,
    pub embeddings: usize,
}

impl Detections {
    /// Pair up locations and embeddings. Fails when the lengths differ.
    pub fn new(
        locations: Vec<FaceLocation>,
        embeddings: Vec<Embedding>,
    ) -> Result<Self, LengthMismatch> {
        if locations.len() != embeddings.len() {
            return Err(LengthMismatch {
                locations: locations.len(),
                embeddings: embeddings.len(),
            });
        }
        Ok(Self { locations, embeddings })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn locations(&self) -> &[FaceLocation] {
        &self.locations
    }

    pub fn embeddings(&self) -> &[Embedding] {
        &self.embeddings
    }

    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FaceLocation, &Embedding)> {
        self.locations.iter().zip(self.embeddings.iter())
    }
}

/// One enrolled face: a label and the embedding captured for it.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityRecord {
    pub label: String,
    pub embedding: Embedding,
}

/// Whether a detect-and-encode result can be enrolled.
///
/// Enrollment requires exactly one face; it never picks among several.
#[derive(Debug, Clone, PartialEq)]
pub enum EnrollDecision {
    NoFaceDetected,
    /// Every detected box, so the caller can show them as ambiguous.
    MultipleFacesDetected(Vec<FaceLocation>),
    SingleFaceReady {
        location: FaceLocation,
        embedding: Embedding,
    },
}

/// Result of matching one query embedding against the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MatchResult {
    /// Nearest record is within tolerance.
    Matched { label: String, distance: f32 },
    /// Nearest record is too far; its distance is still reported.
    Unmatched { distance: f32 },
    /// The store had nothing to compare against.
    Unknown,
}

impl MatchResult {
    pub fn is_match(&self) -> bool {
        matches!(self, MatchResult::Matched { .. })
    }

    pub fn label(&self) -> Option<&str> {
        match self {
            MatchResult::Matched { label, .. } => Some(label),
            _ => None,
        }
    }

    /// Distance to the nearest record, if any record was compared.
    pub fn distance(&self) -> Option<f32> {
        match self {
            MatchResult::Matched { distance, .. } | MatchResult::Unmatched { distance } => {
                Some(*distance)
            }
            MatchResult::Unknown => None,
        }
    }
}

impl fmt::Display for MatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchResult::Matched { label, distance } => write!(f, "{label} (dist {distance:.3})"),
            MatchResult::Unmatched { distance } => write!(f, "Unknown (dist {distance:.3})"),
            MatchResult::Unknown => f.write_str("Unknown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean_distance_identical() {
        let a = Embedding::new(vec![0.3, -0.2, 0.9]);
        assert_eq!(a.euclidean_distance(&a), 0.0);
    }

    #[test]
    fn test_euclidean_distance_unit_axes() {
        let a = Embedding::new(vec![1.0, 0.0, 0.0]);
        let b = Embedding::new(vec![0.0, 1.0, 0.0]);
        assert!((a.euclidean_distance(&b) - 2.0f32.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn test_euclidean_distance_symmetric() {
        let a = Embedding::new(vec![0.9, 0.1, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0, 0.0]);
        assert_eq!(a.euclidean_distance(&b), b.euclidean_distance(&a));
        assert!((a.euclidean_distance(&b) - 0.141_421).abs() < 1e-5);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "embedding dimension mismatch")]
    fn test_euclidean_distance_rejects_mixed_dimensions() {
        let a = Embedding::new(vec![1.0, 0.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0]);
        a.euclidean_distance(&b);
    }

    #[test]
    fn test_detector_mode_parse() {
        assert_eq!("fast".parse::<DetectorMode>(), Ok(DetectorMode::Fast));
        assert_eq!("Accurate".parse::<DetectorMode>(), Ok(DetectorMode::Accurate));
        assert_eq!("small".parse::<DetectorMode>(), Ok(DetectorMode::Fast));
        assert_eq!("large".parse::<DetectorMode>(), Ok(DetectorMode::Accurate));
        assert!("turbo".parse::<DetectorMode>().is_err());
    }

    #[test]
    fn test_detections_rejects_misaligned() {
        let loc = FaceLocation::new(0, 10, 10, 0);
        let result = Detections::new(vec![loc, loc], vec![Embedding::new(vec![1.0])]);
        assert_eq!(result, Err(LengthMismatch { locations: 2, embeddings: 1 }));
    }

    #[test]
    fn test_face_location_size() {
        let loc = FaceLocation::new(10, 60, 90, 20);
        assert_eq!(loc.width(), 40);
        assert_eq!(loc.height(), 80);
    }

    #[test]
    fn test_match_result_display() {
        let matched = MatchResult::Matched { label: "Ana".into(), distance: 0.1414 };
        assert_eq!(matched.to_string(), "Ana (dist 0.141)");
        let unmatched = MatchResult::Unmatched { distance: 1.41421 };
        assert_eq!(unmatched.to_string(), "Unknown (dist 1.414)");
        assert_eq!(MatchResult::Unknown.to_string(), "Unknown");
    }

    #[test]
    fn test_match_result_json_shape() {
        let matched = MatchResult::Matched { label: "Bea".into(), distance: 0.25 };
        let json = serde_json::to_value(&matched).unwrap();
        assert_eq!(json["outcome"], "matched");
        assert_eq!(json["label"], "Bea");
        assert_eq!(serde_json::to_value(MatchResult::Unknown).unwrap()["outcome"], "unknown");
    }
}
