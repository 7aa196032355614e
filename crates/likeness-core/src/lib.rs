//! likeness-core — Face enrollment store and nearest-identity matching.
//!
//! Enrolled faces live in a single versioned file as label/embedding pairs.
//! Recognition picks the nearest enrolled embedding by Euclidean distance
//! and accepts it within a caller-supplied tolerance. Detection and
//! embedding go through the [`FaceEncoder`] trait; the bundled backend uses
//! SCRFD and ArcFace via ONNX Runtime.

pub mod alignment;
pub mod detector;
pub mod encoder;
pub mod engine;
pub mod matcher;
pub mod recognizer;
pub mod store;
pub mod types;

pub use encoder::{CachedEncoder, EncoderError, FaceEncoder, LazyOnnxEncoder, OnnxEncoder};
pub use engine::{EngineError, EnrollOutcome, MatchEngine};
pub use matcher::{enroll_candidate, EuclideanMatcher, MatchError, Matcher};
pub use recognizer::ARCFACE_DEFAULT_TOLERANCE;
pub use store::{EmbeddingStore, Store, StoreError};
pub use types::{
    Detections, DetectorMode, Embedding, EnrollDecision, FaceLocation, IdentityRecord,
    LengthMismatch, MatchResult,
};
