//! Nearest-identity matching and the enrollment gate.

use crate::store::{validate_embedding, Store};
use crate::types::{Detections, Embedding, EnrollDecision, FaceLocation, MatchResult};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum MatchError {
    #[error("query embedding has {actual} dimensions, store holds {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("tolerance must be a non-negative number, got {0}")]
    InvalidTolerance(f32),
    #[error("invalid query embedding: {0}")]
    InvalidQuery(String),
}

/// Strategy for comparing a query embedding against the enrolled store.
pub trait Matcher {
    fn match_one(
        &self,
        query: &Embedding,
        store: &Store,
        tolerance: f32,
    ) -> Result<MatchResult, MatchError>;

    /// Match every detected face independently.
    ///
    /// The same identity may be reported for more than one face.
    fn match_many(
        &self,
        detections: &Detections,
        store: &Store,
        tolerance: f32,
    ) -> Result<Vec<(FaceLocation, MatchResult)>, MatchError> {
        detections
            .iter()
            .map(|(location, embedding)| {
                self.match_one(embedding, store, tolerance)
                    .map(|result| (*location, result))
            })
            .collect()
    }
}

/// Euclidean nearest-neighbour matcher.
///
/// Scans every record; the smallest distance wins and ties go to the
/// earliest record. `distance <= tolerance` is a match. Tolerance is a raw
/// distance in the encoder's embedding space, so a value tuned for one
/// encoder means nothing for another.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn match_one(
        &self,
        query: &Embedding,
        store: &Store,
        tolerance: f32,
    ) -> Result<MatchResult, MatchError> {
        // Also rejects NaN.
        if !(tolerance >= 0.0) {
            return Err(MatchError::InvalidTolerance(tolerance));
        }
        validate_embedding(query).map_err(MatchError::InvalidQuery)?;

        let Some(expected) = store.dim() else {
            return Ok(MatchResult::Unknown);
        };
        if query.dim() != expected {
            return Err(MatchError::DimensionMismatch {
                expected,
                actual: query.dim(),
            });
        }

        let mut best_dist = f32::INFINITY;
        let mut best_idx = 0;
        for (i, record) in store.records().iter().enumerate() {
            let dist = query.euclidean_distance(&record.embedding);
            if dist < best_dist {
                best_dist = dist;
                best_idx = i;
            }
        }

        let result = if best_dist <= tolerance {
            MatchResult::Matched {
                label: store.records()[best_idx].label.clone(),
                distance: best_dist,
            }
        } else {
            MatchResult::Unmatched {
                distance: best_dist,
            }
        };
        tracing::debug!(%result, tolerance, compared = store.len(), "match_one");
        Ok(result)
    }
}

/// Decide whether a detect-and-encode result is enrollable.
pub fn enroll_candidate(detections: &Detections) -> EnrollDecision {
    match (detections.locations(), detections.embeddings()) {
        ([location], [embedding]) => EnrollDecision::SingleFaceReady {
            location: *location,
            embedding: embedding.clone(),
        },
        (_, []) => EnrollDecision::NoFaceDetected,
        (locations, _) => EnrollDecision::MultipleFacesDetected(locations.to_vec()),
    }
}
