//! Validated decision parameters for one monitoring session.

use crate::matcher::DistanceMetric;
use chrono::TimeDelta;
use std::num::NonZeroU32;
use thiserror::Error;

pub const DEFAULT_PROCESS_EVERY_N_FRAMES: u32 = 5;
pub const DEFAULT_COOLDOWN_MINUTES: f64 = 5.0;
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.6;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("process_every_n_frames must be a positive integer, got {0}")]
    InvalidStride(u32),
    #[error("cooldown_minutes must be a positive number, got {0}")]
    InvalidCooldown(f64),
    #[error("confidence_threshold must be in (0, 1], got {0}")]
    InvalidThreshold(f32),
}

/// Values the decision pipeline consumes. Loading them is the caller's job.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionConfig {
    pub process_every_n_frames: NonZeroU32,
    pub cooldown: TimeDelta,
    pub confidence_threshold: f32,
    pub metric: DistanceMetric,
}

impl DecisionConfig {
    /// Validate raw values. The cooldown is given in minutes and kept with
    /// millisecond precision.
    pub fn new(
        process_every_n_frames: u32,
        cooldown_minutes: f64,
        confidence_threshold: f32,
        metric: DistanceMetric,
    ) -> Result<Self, ConfigError> {
        let stride = NonZeroU32::new(process_every_n_frames)
            .ok_or(ConfigError::InvalidStride(process_every_n_frames))?;

        if !(cooldown_minutes.is_finite() && cooldown_minutes > 0.0) {
            return Err(ConfigError::InvalidCooldown(cooldown_minutes));
        }
        let millis = (cooldown_minutes * 60_000.0).round();
        if millis < 1.0 || millis > i64::MAX as f64 {
            return Err(ConfigError::InvalidCooldown(cooldown_minutes));
        }

        if !(confidence_threshold > 0.0 && confidence_threshold <= 1.0) {
            return Err(ConfigError::InvalidThreshold(confidence_threshold));
        }

        Ok(Self {
            process_every_n_frames: stride,
            cooldown: TimeDelta::milliseconds(millis as i64),
            confidence_threshold,
            metric,
        })
    }
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            process_every_n_frames: NonZeroU32::new(DEFAULT_PROCESS_EVERY_N_FRAMES)
                .unwrap_or(NonZeroU32::MIN),
            cooldown: TimeDelta::minutes(5),
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            metric: DistanceMetric::default(),
        }
    }
}
