//! attendant-core: Recognition-to-attendance decision pipeline.
//!
//! Turns per-frame face observations into deduplicated attendance writes
//! and a per-face presentation state. Cameras, models, storage and
//! rendering live behind traits in the surrounding crates.

pub mod config;
pub mod cooldown;
pub mod decision;
pub mod gallery;
pub mod matcher;
pub mod presentation;
pub mod throttle;
pub mod types;

pub use config::{ConfigError, DecisionConfig};
pub use cooldown::CooldownTracker;
pub use decision::{
    AttendanceRecord, AttendanceStore, DecisionEngine, DecisionOutcome, ResolvedIdentity, StoreError,
    SuppressReason,
};
pub use gallery::{Gallery, GalleryError};
pub use matcher::{DistanceMetric, FaceMatcher, MatchResult};
pub use presentation::{classify, Overlay, PresentationState};
pub use throttle::FrameThrottle;
pub use types::{BoundingBox, Embedding, Identity, IdentityId, Observation};
