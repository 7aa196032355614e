//! Face detection + embedding collaborators.
//!
//! [`FaceEncoder`] is the seam between the matching core and whatever turns
//! pixels into embeddings. [`OnnxEncoder`] is the bundled SCRFD + ArcFace
//! backend and [`LazyOnnxEncoder`] defers loading it until first use.
//! [`CachedEncoder`] memoizes any encoder by image content.

use crate::alignment;
use crate::detector::{DetectorError, FaceDetector, RawDetection};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{DetectorMode, Detections, FaceLocation, LengthMismatch};
use image::RgbImage;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// SCRFD detection model file name inside the model directory.
pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
/// ArcFace recognition model file name inside the model directory.
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("invalid image: {0}")]
    InvalidImage(String),
    #[error("encoder broke its contract: {0}")]
    LengthMismatch(#[from] LengthMismatch),
    #[error("detected face {index} has degenerate landmarks and cannot be aligned")]
    UnalignableFace { index: usize },
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Detects faces in an RGB image and embeds each one.
///
/// Finding no face is `Ok` with empty detections; errors are reserved for
/// input the encoder cannot process.
pub trait FaceEncoder {
    fn detect_and_encode(
        &mut self,
        image: &RgbImage,
        mode: DetectorMode,
    ) -> Result<Detections, EncoderError>;
}

/// SCRFD detection followed by ArcFace embedding of each aligned face.
pub struct OnnxEncoder {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxEncoder {
    /// Load both models from `model_dir`. Fails fast if either is missing.
    pub fn load(model_dir: &Path) -> Result<Self, EncoderError> {
        let detector = FaceDetector::load(&model_dir.join(DETECTOR_MODEL_FILE))?;
        let recognizer = FaceRecognizer::load(&model_dir.join(RECOGNIZER_MODEL_FILE))?;
        Ok(Self { detector, recognizer })
    }
}

impl FaceEncoder for OnnxEncoder {
    fn detect_and_encode(
        &mut self,
        image: &RgbImage,
        mode: DetectorMode,
    ) -> Result<Detections, EncoderError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(EncoderError::InvalidImage(format!("empty image {width}x{height}")));
        }

        let faces = self.detector.detect(image, mode)?;
        let crops = align_all(image, &faces)?;

        let mut locations = Vec::with_capacity(crops.len());
        let mut embeddings = Vec::with_capacity(crops.len());
        for (location, aligned) in crops {
            embeddings.push(self.recognizer.embed(&aligned)?);
            locations.push(location);
        }

        Ok(Detections::new(locations, embeddings)?)
    }
}

/// Align every detected face, failing on the first one that cannot be.
///
/// Dropping such a face would change the face count the enrollment gate sees.
fn align_all(
    image: &RgbImage,
    faces: &[RawDetection],
) -> Result<Vec<(FaceLocation, RgbImage)>, EncoderError> {
    let (width, height) = image.dimensions();
    faces
        .iter()
        .enumerate()
        .map(|(index, face)| -> Result<_, EncoderError> {
            let aligned = alignment::align_face(image, &face.landmarks).ok_or_else(|| {
                tracing::warn!(index, score = face.score, "face has degenerate landmarks");
                EncoderError::UnalignableFace { index }
            })?;
            Ok((face.location(width, height), aligned))
        })
        .collect()
}

/// [`OnnxEncoder`] that loads its models on the first detection.
///
/// Lets store-only operations run without the model files present.
pub struct LazyOnnxEncoder {
    model_dir: PathBuf,
    loaded: Option<OnnxEncoder>,
}

impl LazyOnnxEncoder {
    pub fn new(model_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_dir: model_dir.into(),
            loaded: None,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    fn encoder(&mut self) -> Result<&mut OnnxEncoder, EncoderError> {
        let encoder = match self.loaded.take() {
            Some(encoder) => encoder,
            None => {
                let encoder = OnnxEncoder::load(&self.model_dir)?;
                tracing::info!(model_dir = %self.model_dir.display(), "face models loaded");
                encoder
            }
        };
        Ok(self.loaded.insert(encoder))
    }
}

impl FaceEncoder for LazyOnnxEncoder {
    fn detect_and_encode(
        &mut self,
        image: &RgbImage,
        mode: DetectorMode,
    ) -> Result<Detections, EncoderError> {
        self.encoder()?.detect_and_encode(image, mode)
    }
}

type CacheKey = ([u8; 32], DetectorMode);

/// Memoizes an encoder's results by image content and detector mode.
///
/// Purely an optimisation: results are identical to calling the inner
/// encoder. The cache is dropped wholesale once it reaches `capacity`.
pub struct CachedEncoder<E> {
    inner: E,
    capacity: usize,
    entries: HashMap<CacheKey, Detections>,
}

impl<E: FaceEncoder> CachedEncoder<E> {
    pub fn new(inner: E, capacity: usize) -> Self {
        Self {
            inner,
            capacity: capacity.max(1),
            entries: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_inner(self) -> E {
        self.inner
    }
}

/// SHA-256 over dimensions and pixel bytes.
fn content_hash(image: &RgbImage) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(image.width().to_le_bytes());
    hasher.update(image.height().to_le_bytes());
    hasher.update(image.as_raw());
    hasher.finalize().into()
}

impl<E: FaceEncoder> FaceEncoder for CachedEncoder<E> {
    fn detect_and_encode(
        &mut self,
        image: &RgbImage,
        mode: DetectorMode,
    ) -> Result<Detections, EncoderError> {
        let key = (content_hash(image), mode);
        if let Some(hit) = self.entries.get(&key) {
            tracing::debug!(%mode, faces = hit.len(), "detection cache hit");
            return Ok(hit.clone());
        }

        let detections = self.inner.detect_and_encode(image, mode)?;
        if self.entries.len() >= self.capacity {
            self.entries.clear();
        }
        self.entries.insert(key, detections.clone());
        Ok(detections)
    }
}
