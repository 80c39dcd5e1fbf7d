//! attendant-vision: Face detection and embedding extraction.
//!
//! SCRFD locates faces and five landmarks, faces are aligned to the ArcFace
//! template, and ArcFace produces L2-normalised 512-d embeddings. Both run
//! on ONNX Runtime (CPU). The monitoring loop only sees [`FaceEncoder`].

pub mod alignment;
pub mod detector;
pub mod encoder;
pub mod recognizer;

pub use encoder::{load_encoder, AccurateEncoder, DetectionModel, EncoderError, FaceEncoder, FastEncoder};

use std::path::PathBuf;

/// Default directory for ONNX model files: `$XDG_DATA_HOME/attendant/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("attendant/models")
}
