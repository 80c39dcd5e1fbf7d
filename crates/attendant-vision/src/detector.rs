//! SCRFD face detector via ONNX Runtime.
//!
//! Anchor-free decoding over three strides with NMS post-processing. The
//! network input size is a parameter so the same decoder serves the small
//! (det_500m @ 320) and large (det_10g @ 640) models.

use attendant_core::BoundingBox;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}; download from insightface and place in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Where the resized frame sits inside the square network input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: u32, height: u32, input: usize) -> Self {
        let scale = (input as f32 / width as f32).min(input as f32 / height as f32);
        let new_w = (width as f32 * scale).round();
        let new_h = (height as f32 * scale).round();
        Self {
            scale,
            pad_x: ((input as f32 - new_w) / 2.0).floor(),
            pad_y: ((input as f32 - new_h) / 2.0).floor(),
        }
    }

    /// Network-input coordinates back to frame coordinates.
    fn unmap(&self, (x, y): (f32, f32)) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Output tensor indices for one stride level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StrideOutputs {
    score: usize,
    bbox: usize,
    kps: usize,
}

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    input_size: usize,
    score_threshold: f32,
    outputs: [StrideOutputs; 3],
}

impl FaceDetector {
    /// Load an SCRFD model that takes a square `input_size` input.
    pub fn load(model_path: &str, input_size: usize, score_threshold: f32) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();

        tracing::info!(
            path = model_path,
            input_size,
            outputs = ?names,
            "loaded SCRFD model"
        );

        if names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model requires 9 outputs (3 strides × score/bbox/kps), got {}",
                names.len()
            )));
        }

        let outputs = map_outputs(&names);
        tracing::debug!(?outputs, "SCRFD output tensor mapping");

        Ok(Self {
            session,
            input_size,
            score_threshold,
            outputs,
        })
    }

    /// Detect faces, returning boxes in frame coordinates sorted by confidence.
    pub fn detect(&mut self, frame: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        if frame.width() == 0 || frame.height() == 0 {
            return Err(DetectorError::InvalidFrame("zero-sized frame".into()));
        }

        let (input, letterbox) = preprocess(frame, self.input_size);
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (level, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let idx = self.outputs[level];
            let (_, scores) = outputs[idx.score]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, bboxes) = outputs[idx.bbox]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;
            let (_, kps) = outputs[idx.kps]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("kps stride {stride}: {e}")))?;

            candidates.extend(decode_level(
                scores,
                bboxes,
                kps,
                stride,
                self.input_size,
                &letterbox,
                self.score_threshold,
            ));
        }

        Ok(nms(candidates, SCRFD_NMS_THRESHOLD))
    }
}

/// Letterbox `frame` into a normalised 1×3×N×N tensor (RGB channel order).
fn preprocess(frame: &RgbImage, input: usize) -> (Array4<f32>, Letterbox) {
    let letterbox = Letterbox::fit(frame.width(), frame.height(), input);
    let new_w = ((frame.width() as f32 * letterbox.scale).round() as u32).clamp(1, input as u32);
    let new_h = ((frame.height() as f32 * letterbox.scale).round() as u32).clamp(1, input as u32);
    let resized = imageops::resize(frame, new_w, new_h, FilterType::Triangle);

    // Padding stays at 0.0, i.e. the mean colour after normalisation.
    let mut tensor = Array4::<f32>::zeros((1, 3, input, input));
    let (ox, oy) = (letterbox.pad_x as usize, letterbox.pad_y as usize);
    for (x, y, pixel) in resized.enumerate_pixels() {
        let (tx, ty) = (x as usize + ox, y as usize + oy);
        if tx >= input || ty >= input {
            continue;
        }
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = (pixel.0[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
        }
    }

    (tensor, letterbox)
}

/// Locate score/bbox/kps tensors by name ("score_8", "bbox_16", "kps_32", ...),
/// falling back to the common positional export order
/// [scores 8/16/32, bboxes 8/16/32, kps 8/16/32].
fn map_outputs(names: &[String]) -> [StrideOutputs; 3] {
    let find = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };

    let named: Option<Vec<StrideOutputs>> = SCRFD_STRIDES
        .iter()
        .map(|&stride| {
            Some(StrideOutputs {
                score: find("score", stride)?,
                bbox: find("bbox", stride)?,
                kps: find("kps", stride)?,
            })
        })
        .collect();

    match named {
        Some(levels) => {
            tracing::info!("SCRFD: using name-based output tensor mapping");
            [levels[0], levels[1], levels[2]]
        }
        None => {
            tracing::info!(?names, "SCRFD: output names not recognized, using positional mapping");
            std::array::from_fn(|i| StrideOutputs {
                score: i,
                bbox: i + 3,
                kps: i + 6,
            })
        }
    }
}

/// Decode one stride level into frame-space boxes above `threshold`.
fn decode_level(
    scores: &[f32],
    bboxes: &[f32],
    kps: &[f32],
    stride: usize,
    input: usize,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<BoundingBox> {
    let grid_w = input / stride;
    let grid_h = input / stride;
    let anchors = grid_w * grid_h * SCRFD_ANCHORS_PER_CELL;
    let s = stride as f32;

    (0..anchors.min(scores.len()))
        .filter(|&i| scores[i] > threshold)
        .filter_map(|i| {
            let cell = i / SCRFD_ANCHORS_PER_CELL;
            let cx = (cell % grid_w) as f32 * s;
            let cy = (cell / grid_w) as f32 * s;

            let b = bboxes.get(i * 4..i * 4 + 4)?;
            let (x1, y1) = letterbox.unmap((cx - b[0] * s, cy - b[1] * s));
            let (x2, y2) = letterbox.unmap((cx + b[2] * s, cy + b[3] * s));

            let landmarks = kps.get(i * 10..i * 10 + 10).map(|k| {
                std::array::from_fn(|p| letterbox.unmap((cx + k[p * 2] * s, cy + k[p * 2 + 1] * s)))
            });

            Some(BoundingBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence: scores[i],
                landmarks,
            })
        })
        .collect()
}

/// Greedy non-maximum suppression; output is sorted by confidence.
fn nms(mut boxes: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<BoundingBox> = Vec::with_capacity(boxes.len());
    for candidate in boxes {
        if keep.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let inter_w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let inter_h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = inter_w * inter_h;
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 { inter / union } else { 0.0 }
}
