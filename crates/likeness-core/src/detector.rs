//! SCRFD face detector via ONNX Runtime.
//!
//! Runs on RGB input. The image is scaled to fit the network input (placed
//! at the top-left, remainder zero-padded), decoded per stride from anchor
//! centres, and de-duplicated with non-maximum suppression.

use crate::types::{DetectorMode, FaceLocation};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;
const SCRFD_FAST_INPUT: usize = 320;
const SCRFD_ACCURATE_INPUT: usize = 640;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} — download det_10g.onnx from insightface")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Output tensor positions for one stride: (score, bbox, kps).
type StrideOutputs = (usize, usize, usize);

/// A detected face in source-image pixel coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub score: f32,
    /// [left_eye, right_eye, nose, left_mouth, right_mouth]
    pub landmarks: [(f32, f32); 5],
}

impl RawDetection {
    fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    fn iou(&self, other: &RawDetection) -> f32 {
        let w = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let h = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let inter = w * h;
        let union = self.area() + other.area() - inter;
        if union > 0.0 { inter / union } else { 0.0 }
    }

    /// Round to whole pixels and clamp into a `width × height` image.
    pub fn location(&self, width: u32, height: u32) -> FaceLocation {
        let clamp = |v: f32, max: u32| v.round().clamp(0.0, max as f32) as u32;
        FaceLocation {
            top: clamp(self.y1, height),
            right: clamp(self.x2, width),
            bottom: clamp(self.y2, height),
            left: clamp(self.x1, width),
        }
    }
}

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    outputs: [StrideOutputs; 3],
}

impl FaceDetector {
    /// Load the SCRFD ONNX model (with keypoint outputs) from `model_path`.
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        if names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model needs 9 outputs (score/bbox/kps per stride), got {}",
                names.len()
            )));
        }

        let outputs = output_layout(&names);
        tracing::info!(path = %model_path.display(), ?names, ?outputs, "loaded SCRFD model");

        Ok(Self { session, outputs })
    }

    /// Detect faces, strongest first.
    pub fn detect(
        &mut self,
        image: &RgbImage,
        mode: DetectorMode,
    ) -> Result<Vec<RawDetection>, DetectorError> {
        let size = input_size(mode);
        let (input, scale) = preprocess(image, size);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (&stride, &(score_idx, bbox_idx, kps_idx)) in SCRFD_STRIDES.iter().zip(self.outputs.iter()) {
            let extract = |idx: usize, what: &str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}")))
            };
            let scores = extract(score_idx, "scores")?;
            let bboxes = extract(bbox_idx, "bboxes")?;
            let kps = extract(kps_idx, "kps")?;

            candidates.extend(decode_stride(scores, bboxes, kps, stride, size, scale));
        }

        let faces = non_max_suppression(candidates, SCRFD_NMS_THRESHOLD);
        tracing::debug!(faces = faces.len(), %mode, "SCRFD detect");
        Ok(faces)
    }
}

fn input_size(mode: DetectorMode) -> usize {
    match mode {
        DetectorMode::Fast => SCRFD_FAST_INPUT,
        DetectorMode::Accurate => SCRFD_ACCURATE_INPUT,
    }
}

/// Map output tensors to strides by name (`score_8`, `bbox_16`, ...),
/// falling back to the positional export order.
fn output_layout(names: &[String]) -> [StrideOutputs; 3] {
    let find = |kind: &str, stride: usize| {
        let wanted = format!("{kind}_{stride}");
        names.iter().position(|n| *n == wanted)
    };
    let named: Option<Vec<StrideOutputs>> = SCRFD_STRIDES
        .iter()
        .map(|&s| Some((find("score", s)?, find("bbox", s)?, find("kps", s)?)))
        .collect();

    match named.as_deref() {
        Some(&[s8, s16, s32]) => [s8, s16, s32],
        _ => [(0, 3, 6), (1, 4, 7), (2, 5, 8)],
    }
}

/// Scale `image` to fit a `size × size` NCHW tensor, normalized.
///
/// Returns the tensor and the scale factor from source to network pixels.
fn preprocess(image: &RgbImage, size: usize) -> (Array4<f32>, f32) {
    let (w, h) = image.dimensions();
    let scale = (size as f32 / w as f32).min(size as f32 / h as f32);
    let new_w = ((w as f32 * scale).round() as u32).clamp(1, size as u32);
    let new_h = ((h as f32 * scale).round() as u32).clamp(1, size as u32);

    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);

    // Zero is the normalized value of the mean, so padding needs no fill.
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
        }
    }

    (tensor, scale)
}

/// Decode one stride's anchors into detections in source coordinates.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    kps: &[f32],
    stride: usize,
    input_size: usize,
    scale: f32,
) -> Vec<RawDetection> {
    let grid = input_size / stride;
    let anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let s = stride as f32;

    (0..anchors.min(scores.len()))
        .filter(|&i| scores[i] > SCRFD_CONFIDENCE_THRESHOLD)
        .filter_map(|i| {
            let cell = i / SCRFD_ANCHORS_PER_CELL;
            let cx = (cell % grid) as f32 * s;
            let cy = (cell / grid) as f32 * s;

            let b = bboxes.get(i * 4..i * 4 + 4)?;
            let k = kps.get(i * 10..i * 10 + 10)?;

            let mut landmarks = [(0.0f32, 0.0f32); 5];
            for (p, pair) in landmarks.iter_mut().zip(k.chunks_exact(2)) {
                *p = ((cx + pair[0] * s) / scale, (cy + pair[1] * s) / scale);
            }

            Some(RawDetection {
                x1: (cx - b[0] * s) / scale,
                y1: (cy - b[1] * s) / scale,
                x2: (cx + b[2] * s) / scale,
                y2: (cy + b[3] * s) / scale,
                score: scores[i],
                landmarks,
            })
        })
        .collect()
}

/// Keep the strongest detection of every overlapping cluster.
fn non_max_suppression(mut candidates: Vec<RawDetection>, iou_threshold: f32) -> Vec<RawDetection> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut kept: Vec<RawDetection> = Vec::with_capacity(candidates.len());
    for det in candidates {
        if kept.iter().all(|k| k.iou(&det) <= iou_threshold) {
            kept.push(det);
        }
    }
    kept
}
