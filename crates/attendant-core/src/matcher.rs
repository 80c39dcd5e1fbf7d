//! Face matcher: resolves a probe embedding to the closest gallery identity.

use crate::gallery::Gallery;
use crate::types::{Embedding, IdentityId};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

/// How probe and reference embeddings are compared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// `1 - cosine similarity`; confidence is the similarity clamped to [0, 1].
    /// Suited to L2-normalised ArcFace embeddings.
    #[default]
    Cosine,
    /// Euclidean distance; confidence is `1 - distance` clamped to [0, 1].
    /// Suited to dlib-style 128-d encodings.
    Euclidean,
}

impl DistanceMetric {
    pub fn distance(self, probe: &Embedding, reference: &Embedding) -> f32 {
        match self {
            DistanceMetric::Cosine => 1.0 - probe.similarity(reference),
            DistanceMetric::Euclidean => probe.euclidean_distance(reference),
        }
    }

    /// Map a distance to a confidence in [0, 1]. Both metrics reduce to `1 - d`.
    pub fn confidence(self, distance: f32) -> f32 {
        (1.0 - distance).clamp(0.0, 1.0)
    }
}

impl FromStr for DistanceMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cosine" => Ok(DistanceMetric::Cosine),
            "euclidean" => Ok(DistanceMetric::Euclidean),
            other => Err(format!("unknown distance metric '{other}' (expected cosine or euclidean)")),
        }
    }
}

/// Result of matching a probe embedding against the gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Accepted identity, or `None` when the best candidate fell below threshold.
    pub identity: Option<IdentityId>,
    /// Distance to the closest reference embedding across the whole gallery.
    pub distance: f32,
    /// Confidence derived from `distance`; reported even for unknown faces.
    pub confidence: f32,
}

impl MatchResult {
    fn unknown(distance: f32, confidence: f32) -> Self {
        Self {
            identity: None,
            distance,
            confidence,
        }
    }
}

/// Nearest-identity matcher over an immutable gallery.
///
/// Holds no mutable state, so a single instance can be shared across
/// threads processing faces of the same or different frames.
#[derive(Debug, Clone)]
pub struct FaceMatcher {
    gallery: Arc<Gallery>,
    metric: DistanceMetric,
    threshold: f32,
}

impl FaceMatcher {
    pub fn new(gallery: Arc<Gallery>, metric: DistanceMetric, threshold: f32) -> Self {
        Self {
            gallery,
            metric,
            threshold,
        }
    }

    pub fn gallery(&self) -> &Gallery {
        &self.gallery
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Find the closest identity for `probe`.
    ///
    /// An identity's distance is the minimum over its references. Exact ties
    /// go to the identity that appears first in the gallery: the scan runs
    /// in registration order and only a strictly smaller distance replaces
    /// the current best.
    pub fn match_embedding(&self, probe: &Embedding) -> MatchResult {
        if probe.dim() != self.gallery.dim() {
            tracing::warn!(
                expected = self.gallery.dim(),
                actual = probe.dim(),
                "probe embedding dimension does not match gallery; treating as unknown"
            );
            return MatchResult::unknown(f32::INFINITY, 0.0);
        }

        let mut best_distance = f32::INFINITY;
        let mut best_identity: Option<&IdentityId> = None;

        for identity in self.gallery.identities() {
            for reference in &identity.references {
                let distance = self.metric.distance(probe, reference);
                if distance < best_distance {
                    best_distance = distance;
                    best_identity = Some(&identity.id);
                }
            }
        }

        let Some(id) = best_identity else {
            return MatchResult::unknown(f32::INFINITY, 0.0);
        };

        let confidence = self.metric.confidence(best_distance);
        if confidence >= self.threshold {
            MatchResult {
                identity: Some(id.clone()),
                distance: best_distance,
                confidence,
            }
        } else {
            MatchResult::unknown(best_distance, confidence)
        }
    }
}
