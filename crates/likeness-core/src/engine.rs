//! Enrollment and recognition over a detector/encoder and the store file.
//!
//! Every operation is one synchronous call: load the store from disk, do
//! the work, persist if something changed. Nothing is cached between calls,
//! so two processes enrolling at once can overwrite each other's append.

use crate::encoder::{EncoderError, FaceEncoder};
use crate::matcher::{enroll_candidate, EuclideanMatcher, MatchError, Matcher};
use crate::store::{self, EmbeddingStore, StoreError};
use crate::types::{DetectorMode, Detections, EnrollDecision, FaceLocation, MatchResult};
use image::RgbImage;
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Match(#[from] MatchError),
    #[error(transparent)]
    Encoder(#[from] EncoderError),
    #[error("image decode failed: {0}")]
    ImageDecode(#[from] image::ImageError),
}

/// What happened to an enrollment request.
#[derive(Debug, Clone, PartialEq)]
pub enum EnrollOutcome {
    /// The face was appended and the store persisted.
    Enrolled {
        label: String,
        location: FaceLocation,
        total_records: usize,
    },
    NoFaceDetected,
    /// Refused; every detected box is returned for display.
    MultipleFacesDetected(Vec<FaceLocation>),
}

/// Face enrollment and recognition engine.
pub struct MatchEngine<E> {
    encoder: E,
    store: EmbeddingStore,
    matcher: EuclideanMatcher,
}

impl<E> MatchEngine<E> {
    pub fn new(encoder: E, store: EmbeddingStore) -> Self {
        Self {
            encoder,
            store,
            matcher: EuclideanMatcher,
        }
    }

    pub fn store(&self) -> &EmbeddingStore {
        &self.store
    }

    pub fn encoder(&self) -> &E {
        &self.encoder
    }

    /// Distinct enrolled labels, sorted.
    pub fn list_identities(&self) -> Result<BTreeSet<String>, EngineError> {
        Ok(self.store.load()?.identities())
    }

    /// Total enrolled records, counting re-enrollments separately.
    pub fn record_count(&self) -> Result<usize, EngineError> {
        Ok(self.store.load()?.len())
    }

    pub fn clear_store(&self) -> Result<(), EngineError> {
        Ok(self.store.clear()?)
    }

    /// Raw store blob, empty if nothing has been enrolled.
    pub fn export_store(&self) -> Result<Vec<u8>, EngineError> {
        Ok(self.store.export_raw()?)
    }
}

impl<E: FaceEncoder> MatchEngine<E> {
    /// Run the encoder over decoded RGB pixels.
    pub fn detect_and_encode(
        &mut self,
        image: &RgbImage,
        mode: DetectorMode,
    ) -> Result<Detections, EngineError> {
        let detections = self.encoder.detect_and_encode(image, mode)?;
        tracing::debug!(
            width = image.width(),
            height = image.height(),
            %mode,
            faces = detections.len(),
            "detect_and_encode"
        );
        Ok(detections)
    }

    /// Enroll the single face in `image_bytes` under `name`.
    ///
    /// The label is checked before any detection work. If persisting fails
    /// the error is returned and the appended record is dropped with it.
    pub fn enroll(
        &mut self,
        name: &str,
        image_bytes: &[u8],
        mode: DetectorMode,
    ) -> Result<EnrollOutcome, EngineError> {
        let label = store::validate_label(name)?;
        let image = decode_rgb(image_bytes)?;
        let detections = self.detect_and_encode(&image, mode)?;

        let (location, embedding) = match enroll_candidate(&detections) {
            EnrollDecision::NoFaceDetected => {
                tracing::warn!(label, "enroll refused: no face detected");
                return Ok(EnrollOutcome::NoFaceDetected);
            }
            EnrollDecision::MultipleFacesDetected(locations) => {
                tracing::warn!(label, faces = locations.len(), "enroll refused: multiple faces");
                return Ok(EnrollOutcome::MultipleFacesDetected(locations));
            }
            EnrollDecision::SingleFaceReady { location, embedding } => (location, embedding),
        };

        let updated = self.store.load()?.append(label, embedding)?;
        self.store.persist(&updated)?;

        tracing::info!(label, records = updated.len(), "enrolled identity");
        Ok(EnrollOutcome::Enrolled {
            label: label.to_owned(),
            location,
            total_records: updated.len(),
        })
    }

    /// Match every face in `image_bytes` against the enrolled store.
    ///
    /// An empty store yields [`MatchResult::Unknown`] for each face.
    pub fn recognize(
        &mut self,
        image_bytes: &[u8],
        mode: DetectorMode,
        tolerance: f32,
    ) -> Result<Vec<(FaceLocation, MatchResult)>, EngineError> {
        let enrolled = self.store.load()?;
        let image = decode_rgb(image_bytes)?;
        let detections = self.detect_and_encode(&image, mode)?;

        let results = self.matcher.match_many(&detections, &enrolled, tolerance)?;
        tracing::info!(
            faces = results.len(),
            matched = results.iter().filter(|(_, r)| r.is_match()).count(),
            tolerance,
            "recognize"
        );
        Ok(results)
    }
}

fn decode_rgb(bytes: &[u8]) -> Result<RgbImage, EngineError> {
    Ok(image::load_from_memory(bytes)?.to_rgb8())
}
