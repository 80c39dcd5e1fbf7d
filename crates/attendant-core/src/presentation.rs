//! Visual state classification for live overlays.

use crate::decision::{DecisionOutcome, SuppressReason};
use crate::types::BoundingBox;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PresentationState {
    Confirmed,
    Suppressed,
    Unrecognized,
}

impl PresentationState {
    pub fn as_str(self) -> &'static str {
        match self {
            PresentationState::Confirmed => "confirmed",
            PresentationState::Suppressed => "suppressed",
            PresentationState::Unrecognized => "unrecognized",
        }
    }

    /// Overlay colour (RGB): green, orange, red.
    pub fn color(self) -> [u8; 3] {
        match self {
            PresentationState::Confirmed => [0, 200, 0],
            PresentationState::Suppressed => [255, 165, 0],
            PresentationState::Unrecognized => [220, 0, 0],
        }
    }
}

impl fmt::Display for PresentationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a renderer needs to draw one face.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Overlay {
    pub region: BoundingBox,
    pub state: PresentationState,
    /// Identity display name; absent for unrecognized faces.
    pub name: Option<String>,
    pub confidence: Option<f32>,
    /// Secondary line: employee reference, remaining cooldown, or failure note.
    pub detail: Option<String>,
}

pub fn classify(outcome: &DecisionOutcome) -> PresentationState {
    match outcome {
        DecisionOutcome::Marked { .. } => PresentationState::Confirmed,
        DecisionOutcome::Cooldown { .. } => PresentationState::Suppressed,
        DecisionOutcome::Unknown { .. } => PresentationState::Unrecognized,
    }
}

impl Overlay {
    pub fn new(region: BoundingBox, outcome: &DecisionOutcome) -> Self {
        let state = classify(outcome);
        let (name, detail) = match outcome {
            DecisionOutcome::Marked { identity, .. } => (
                Some(identity.name.clone()),
                identity.employee_id.as_ref().map(|e| format!("ID: {e}")),
            ),
            DecisionOutcome::Cooldown {
                identity, reason, ..
            } => {
                let detail = match reason {
                    SuppressReason::ActiveCooldown { remaining } => {
                        format!("{}s remaining", remaining.num_seconds().max(0))
                    }
                    SuppressReason::StoreFailed(_) => "store write failed".to_string(),
                };
                (Some(identity.name.clone()), Some(detail))
            }
            DecisionOutcome::Unknown { .. } => (None, None),
        };

        Self {
            region,
            state,
            name,
            confidence: Some(outcome.confidence()),
            detail,
        }
    }

    /// Primary label line, e.g. "Alice - CHECKED IN".
    pub fn label(&self) -> String {
        match (self.state, self.name.as_deref()) {
            (PresentationState::Confirmed, Some(name)) => format!("{name} - CHECKED IN"),
            (PresentationState::Suppressed, Some(name)) => format!("{name} (Cooldown)"),
            (_, Some(name)) => name.to_string(),
            (_, None) => "Unknown".to_string(),
        }
    }
}
