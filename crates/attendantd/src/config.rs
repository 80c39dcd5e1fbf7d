use attendant_core::config::{
    DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_COOLDOWN_MINUTES, DEFAULT_PROCESS_EVERY_N_FRAMES,
};
use attendant_core::{ConfigError, DecisionConfig, DistanceMetric};
use attendant_hw::{CameraError, SourceSpec};
use attendant_vision::DetectionModel;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigLoadError {
    #[error("read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("{key}: cannot parse '{value}'")]
    InvalidValue { key: &'static str, value: String },
    #[error(transparent)]
    Decision(#[from] ConfigError),
    #[error("camera_source: {0}")]
    Source(#[from] CameraError),
}

/// Daemon configuration.
///
/// Defaults, then the TOML file named by `ATTENDANT_CONFIG` (if set), then
/// `ATTENDANT_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Camera index, V4L2 device path, or http(s) URL.
    pub camera_source: String,
    pub camera_width: u32,
    pub camera_height: u32,
    /// Read timeout for network cameras.
    pub camera_read_timeout_ms: u64,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// `fast` or `accurate`.
    pub detection_model: String,
    /// `cosine` or `euclidean`.
    pub distance_metric: String,
    pub process_every_n_frames: u32,
    pub cooldown_minutes: f64,
    pub confidence_threshold: f32,
    /// Upper bound on one attendance write attempt.
    pub store_write_timeout_ms: u64,
    pub store_write_attempts: u32,
    /// Append every decision to the recognition log table.
    pub log_recognitions: bool,
    /// Write the latest annotated frame here as JPEG.
    pub snapshot_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_source: "0".to_string(),
            camera_width: 640,
            camera_height: 480,
            camera_read_timeout_ms: 5000,
            model_dir: attendant_vision::default_model_dir(),
            db_path: attendant_store::default_db_path(),
            detection_model: DetectionModel::default().to_string(),
            distance_metric: "cosine".to_string(),
            process_every_n_frames: DEFAULT_PROCESS_EVERY_N_FRAMES,
            cooldown_minutes: DEFAULT_COOLDOWN_MINUTES,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            store_write_timeout_ms: 2000,
            store_write_attempts: 1,
            log_recognitions: false,
            snapshot_path: None,
        }
    }
}

impl Config {
    /// Load from `ATTENDANT_CONFIG` and `ATTENDANT_*` variables.
    pub fn load() -> Result<Self, ConfigLoadError> {
        let mut config = match std::env::var_os("ATTENDANT_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigLoadError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigLoadError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigLoadError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overlay environment values. Unparseable values are errors, not
    /// silently replaced by defaults.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigLoadError> {
        if let Some(v) = lookup("ATTENDANT_CAMERA_SOURCE") {
            self.camera_source = v;
        }
        set_parsed(&lookup, "ATTENDANT_CAMERA_WIDTH", &mut self.camera_width)?;
        set_parsed(&lookup, "ATTENDANT_CAMERA_HEIGHT", &mut self.camera_height)?;
        set_parsed(&lookup, "ATTENDANT_CAMERA_READ_TIMEOUT_MS", &mut self.camera_read_timeout_ms)?;
        if let Some(v) = lookup("ATTENDANT_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("ATTENDANT_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("ATTENDANT_DETECTION_MODEL") {
            self.detection_model = v;
        }
        if let Some(v) = lookup("ATTENDANT_DISTANCE_METRIC") {
            self.distance_metric = v;
        }
        set_parsed(&lookup, "ATTENDANT_PROCESS_EVERY_N_FRAMES", &mut self.process_every_n_frames)?;
        set_parsed(&lookup, "ATTENDANT_COOLDOWN_MINUTES", &mut self.cooldown_minutes)?;
        set_parsed(&lookup, "ATTENDANT_CONFIDENCE_THRESHOLD", &mut self.confidence_threshold)?;
        set_parsed(&lookup, "ATTENDANT_STORE_WRITE_TIMEOUT_MS", &mut self.store_write_timeout_ms)?;
        set_parsed(&lookup, "ATTENDANT_STORE_WRITE_ATTEMPTS", &mut self.store_write_attempts)?;
        if let Some(v) = lookup("ATTENDANT_LOG_RECOGNITIONS") {
            self.log_recognitions = v != "0" && !v.eq_ignore_ascii_case("false");
        }
        if let Some(v) = lookup("ATTENDANT_SNAPSHOT_PATH") {
            self.snapshot_path = (!v.is_empty()).then(|| PathBuf::from(v));
        }
        Ok(())
    }

    /// Validated decision parameters.
    pub fn decision_config(&self) -> Result<DecisionConfig, ConfigLoadError> {
        let metric: DistanceMetric =
            self.distance_metric
                .parse()
                .map_err(|_| ConfigLoadError::InvalidValue {
                    key: "distance_metric",
                    value: self.distance_metric.clone(),
                })?;
        Ok(DecisionConfig::new(
            self.process_every_n_frames,
            self.cooldown_minutes,
            self.confidence_threshold,
            metric,
        )?)
    }

    pub fn detection_model(&self) -> Result<DetectionModel, ConfigLoadError> {
        self.detection_model
            .parse()
            .map_err(|_| ConfigLoadError::InvalidValue {
                key: "detection_model",
                value: self.detection_model.clone(),
            })
    }

    pub fn source_spec(&self) -> Result<SourceSpec, ConfigLoadError> {
        Ok(SourceSpec::parse(&self.camera_source)?)
    }

    pub fn store_write_timeout(&self) -> Duration {
        Duration::from_millis(self.store_write_timeout_ms)
    }

    pub fn camera_read_timeout(&self) -> Duration {
        Duration::from_millis(self.camera_read_timeout_ms)
    }
}

fn set_parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    slot: &mut T,
) -> Result<(), ConfigLoadError> {
    if let Some(value) = lookup(key) {
        *slot = value
            .trim()
            .parse()
            .map_err(|_| ConfigLoadError::InvalidValue { key, value })?;
    }
    Ok(())
}
