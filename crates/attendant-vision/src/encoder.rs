//! Frame → observations.
//!
//! Two detection modes share one ArcFace recognizer:
//! - `Fast`: SCRFD-500M at 320² on a half-resolution frame, boxes scaled back.
//! - `Accurate`: SCRFD-10G at 640² on the full frame.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use attendant_core::{BoundingBox, Observation};
use attendant_hw::Frame;
use image::RgbImage;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

pub const FAST_DETECTOR_MODEL: &str = "det_500m.onnx";
pub const ACCURATE_DETECTOR_MODEL: &str = "det_10g.onnx";
pub const RECOGNIZER_MODEL: &str = "w600k_r50.onnx";

const FAST_INPUT_SIZE: usize = 320;
const ACCURATE_INPUT_SIZE: usize = 640;
const FAST_DOWNSCALE: f32 = 0.5;
const DETECTION_SCORE_THRESHOLD: f32 = 0.5;

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
}

/// Turns a frame into zero or more face observations.
///
/// A returned error means the frame could not be analysed at all; callers
/// skip it and keep going.
pub trait FaceEncoder: Send {
    fn encode(&mut self, frame: &Frame) -> Result<Vec<Observation>, EncoderError>;

    fn name(&self) -> &'static str;
}

impl<T: FaceEncoder + ?Sized> FaceEncoder for Box<T> {
    fn encode(&mut self, frame: &Frame) -> Result<Vec<Observation>, EncoderError> {
        (**self).encode(frame)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DetectionModel {
    #[default]
    Fast,
    Accurate,
}

impl DetectionModel {
    pub fn as_str(self) -> &'static str {
        match self {
            DetectionModel::Fast => "fast",
            DetectionModel::Accurate => "accurate",
        }
    }
}

impl FromStr for DetectionModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fast" | "hog" => Ok(DetectionModel::Fast),
            "accurate" | "cnn" => Ok(DetectionModel::Accurate),
            other => Err(format!("unknown detection model '{other}' (expected fast or accurate)")),
        }
    }
}

impl std::fmt::Display for DetectionModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct FastEncoder {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl FastEncoder {
    pub fn load(model_dir: &Path) -> Result<Self, EncoderError> {
        let detector = FaceDetector::load(
            &model_path(model_dir, FAST_DETECTOR_MODEL),
            FAST_INPUT_SIZE,
            DETECTION_SCORE_THRESHOLD,
        )?;
        let recognizer = FaceRecognizer::load(&model_path(model_dir, RECOGNIZER_MODEL))?;
        Ok(Self { detector, recognizer })
    }
}

impl FaceEncoder for FastEncoder {
    fn encode(&mut self, frame: &Frame) -> Result<Vec<Observation>, EncoderError> {
        let full = frame_image(frame)?;
        let small = frame
            .scaled(FAST_DOWNSCALE)
            .and_then(|f| f.to_image())
            .ok_or_else(|| EncoderError::InvalidFrame("downscale failed".into()))?;

        let faces: Vec<BoundingBox> = self
            .detector
            .detect(&small)?
            .iter()
            .map(|b| b.scaled(1.0 / FAST_DOWNSCALE))
            .collect();

        embed_all(&mut self.recognizer, &full, faces)
    }

    fn name(&self) -> &'static str {
        "fast"
    }
}

pub struct AccurateEncoder {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl AccurateEncoder {
    pub fn load(model_dir: &Path) -> Result<Self, EncoderError> {
        let detector = FaceDetector::load(
            &model_path(model_dir, ACCURATE_DETECTOR_MODEL),
            ACCURATE_INPUT_SIZE,
            DETECTION_SCORE_THRESHOLD,
        )?;
        let recognizer = FaceRecognizer::load(&model_path(model_dir, RECOGNIZER_MODEL))?;
        Ok(Self { detector, recognizer })
    }
}

impl FaceEncoder for AccurateEncoder {
    fn encode(&mut self, frame: &Frame) -> Result<Vec<Observation>, EncoderError> {
        let full = frame_image(frame)?;
        let faces = self.detector.detect(&full)?;
        embed_all(&mut self.recognizer, &full, faces)
    }

    fn name(&self) -> &'static str {
        "accurate"
    }
}

/// Load the encoder for `model` from `model_dir`.
pub fn load_encoder(model: DetectionModel, model_dir: &Path) -> Result<Box<dyn FaceEncoder>, EncoderError> {
    let encoder: Box<dyn FaceEncoder> = match model {
        DetectionModel::Fast => Box::new(FastEncoder::load(model_dir)?),
        DetectionModel::Accurate => Box::new(AccurateEncoder::load(model_dir)?),
    };
    tracing::info!(model = %model, dir = %model_dir.display(), "face encoder ready");
    Ok(encoder)
}

fn model_path(dir: &Path, file: &str) -> String {
    dir.join(file).to_string_lossy().into_owned()
}

fn frame_image(frame: &Frame) -> Result<RgbImage, EncoderError> {
    frame.to_image().ok_or_else(|| {
        EncoderError::InvalidFrame(format!(
            "{} bytes for {}x{} RGB",
            frame.data.len(),
            frame.width,
            frame.height
        ))
    })
}

/// Faces without landmarks cannot be aligned and are dropped.
fn embed_all(
    recognizer: &mut FaceRecognizer,
    image: &RgbImage,
    faces: Vec<BoundingBox>,
) -> Result<Vec<Observation>, EncoderError> {
    let mut observations = Vec::with_capacity(faces.len());
    for region in faces {
        match recognizer.extract(image, &region) {
            Ok(embedding) => observations.push(Observation { region, embedding }),
            Err(RecognizerError::NoLandmarks) => {
                tracing::debug!(x = region.x, y = region.y, "face without landmarks skipped");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(observations)
}
