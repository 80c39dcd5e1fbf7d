//! Attendance decision engine.
//!
//! Per observation: match → cooldown check → durable write → cooldown mark.
//! The cooldown entry is only advanced after the store confirms the write,
//! so a failed write leaves the identity eligible on a later frame.

use crate::cooldown::CooldownTracker;
use crate::matcher::FaceMatcher;
use crate::types::{IdentityId, Observation};
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;

/// One attendance mark, as handed to the store.
#[derive(Debug, Clone, PartialEq)]
pub struct AttendanceRecord {
    pub identity: IdentityId,
    pub marked_at: DateTime<Utc>,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("attendance write timed out after {0:?}")]
    Timeout(Duration),
    #[error("attendance write failed: {0}")]
    Write(String),
    #[error("attendance store unavailable: {0}")]
    Unavailable(String),
}

/// Durable append-only sink for attendance records.
///
/// `Ok(())` must mean the record is persisted. Implementations bound their
/// own latency and report a timeout as [`StoreError::Timeout`].
pub trait AttendanceStore: Send + Sync {
    fn append(&self, record: &AttendanceRecord) -> Result<(), StoreError>;
}

impl<S: AttendanceStore + ?Sized> AttendanceStore for Arc<S> {
    fn append(&self, record: &AttendanceRecord) -> Result<(), StoreError> {
        (**self).append(record)
    }
}

/// Display-facing facts about a resolved identity.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedIdentity {
    pub id: IdentityId,
    pub name: String,
    pub employee_id: Option<String>,
}

/// Why a recognised identity was not marked.
#[derive(Debug, Clone, PartialEq)]
pub enum SuppressReason {
    /// Marked recently; eligible again after `remaining`.
    ActiveCooldown { remaining: TimeDelta },
    /// The store rejected or timed out the write. Cooldown was left untouched.
    StoreFailed(StoreError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum DecisionOutcome {
    Marked {
        identity: ResolvedIdentity,
        confidence: f32,
    },
    Cooldown {
        identity: ResolvedIdentity,
        confidence: f32,
        reason: SuppressReason,
    },
    Unknown {
        confidence: f32,
    },
}

impl DecisionOutcome {
    pub fn identity(&self) -> Option<&ResolvedIdentity> {
        match self {
            DecisionOutcome::Marked { identity, .. }
            | DecisionOutcome::Cooldown { identity, .. } => Some(identity),
            DecisionOutcome::Unknown { .. } => None,
        }
    }

    pub fn confidence(&self) -> f32 {
        match self {
            DecisionOutcome::Marked { confidence, .. }
            | DecisionOutcome::Cooldown { confidence, .. }
            | DecisionOutcome::Unknown { confidence } => *confidence,
        }
    }

    pub fn is_marked(&self) -> bool {
        matches!(self, DecisionOutcome::Marked { .. })
    }

    /// Short status tag used in logs and the recognition log table.
    pub fn status(&self) -> &'static str {
        match self {
            DecisionOutcome::Marked { .. } => "marked",
            DecisionOutcome::Cooldown {
                reason: SuppressReason::ActiveCooldown { .. },
                ..
            } => "cooldown",
            DecisionOutcome::Cooldown {
                reason: SuppressReason::StoreFailed(_),
                ..
            } => "store_failed",
            DecisionOutcome::Unknown { .. } => "unknown",
        }
    }
}

/// Combines matcher output, cooldown state and the attendance store.
///
/// `decide` takes `&self` and the engine is `Sync`: faces may be decided
/// from several threads. The check-write-mark sequence for one identity is
/// serialised by a per-identity lock, so two concurrent observations of
/// the same person can never both be written.
pub struct DecisionEngine<S> {
    matcher: FaceMatcher,
    cooldown: Arc<CooldownTracker>,
    store: S,
    write_attempts: u32,
    identity_locks: HashMap<IdentityId, Mutex<()>>,
}

impl<S: AttendanceStore> DecisionEngine<S> {
    pub fn new(matcher: FaceMatcher, cooldown: Arc<CooldownTracker>, store: S) -> Self {
        let identity_locks = matcher
            .gallery()
            .identities()
            .iter()
            .map(|i| (i.id.clone(), Mutex::new(())))
            .collect();

        Self {
            matcher,
            cooldown,
            store,
            write_attempts: 1,
            identity_locks,
        }
    }

    /// Number of store attempts per mark (minimum 1). Each attempt is bounded
    /// by the store's own timeout.
    pub fn with_write_attempts(mut self, attempts: u32) -> Self {
        self.write_attempts = attempts.max(1);
        self
    }

    pub fn cooldown(&self) -> &CooldownTracker {
        &self.cooldown
    }

    pub fn matcher(&self) -> &FaceMatcher {
        &self.matcher
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Decide one observation at time `now`. On `Marked`, exactly one record
    /// has been durably appended before this returns.
    pub fn decide(&self, observation: &Observation, now: DateTime<Utc>) -> DecisionOutcome {
        let result = self.matcher.match_embedding(&observation.embedding);
        let confidence = result.confidence;

        let Some(id) = result.identity else {
            tracing::debug!(confidence, distance = result.distance, "unknown face");
            return DecisionOutcome::Unknown { confidence };
        };

        let identity = self.resolve(&id);

        let _guard = self
            .identity_locks
            .get(&id)
            .map(|lock| lock.lock().unwrap_or_else(PoisonError::into_inner));

        if let Some(remaining) = self.cooldown.remaining(&id, now) {
            tracing::debug!(
                identity = %id,
                name = %identity.name,
                confidence,
                remaining_secs = remaining.num_seconds(),
                "identity in cooldown"
            );
            return DecisionOutcome::Cooldown {
                identity,
                confidence,
                reason: SuppressReason::ActiveCooldown { remaining },
            };
        }

        let record = AttendanceRecord {
            identity: id.clone(),
            marked_at: now,
        };

        match self.append_with_retry(&record) {
            Ok(()) => {
                self.cooldown.mark(&id, now);
                tracing::info!(
                    identity = %id,
                    name = %identity.name,
                    confidence,
                    marked_at = %now,
                    "attendance marked"
                );
                DecisionOutcome::Marked {
                    identity,
                    confidence,
                }
            }
            Err(err) => {
                tracing::warn!(
                    identity = %id,
                    name = %identity.name,
                    error = %err,
                    "attendance write failed; identity stays eligible"
                );
                DecisionOutcome::Cooldown {
                    identity,
                    confidence,
                    reason: SuppressReason::StoreFailed(err),
                }
            }
        }
    }

    /// Decide every observation of one frame, in order. Two observations of
    /// the same identity are not merged; the second sees the first's mark.
    pub fn decide_frame(
        &self,
        observations: &[Observation],
        now: DateTime<Utc>,
    ) -> Vec<DecisionOutcome> {
        observations.iter().map(|o| self.decide(o, now)).collect()
    }

    fn append_with_retry(&self, record: &AttendanceRecord) -> Result<(), StoreError> {
        let mut attempt = 1;
        loop {
            match self.store.append(record) {
                Ok(()) => return Ok(()),
                Err(err) if attempt < self.write_attempts => {
                    tracing::debug!(attempt, error = %err, "retrying attendance write");
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn resolve(&self, id: &IdentityId) -> ResolvedIdentity {
        match self.matcher.gallery().get(id) {
            Some(identity) => ResolvedIdentity {
                id: id.clone(),
                name: identity.name.clone(),
                employee_id: identity.employee_id.clone(),
            },
            None => ResolvedIdentity {
                id: id.clone(),
                name: id.to_string(),
                employee_id: None,
            },
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::gallery::Gallery;
    use crate::matcher::DistanceMetric;
    use crate::types::{BoundingBox, Embedding, Identity};
    use std::collections::VecDeque;

    /// In-memory store with a scripted queue of failures.
    #[derive(Default)]
    pub(crate) struct MemoryStore {
        pub records: Mutex<Vec<AttendanceRecord>>,
        pub failures: Mutex<VecDeque<StoreError>>,
    }

    impl MemoryStore {
        pub fn fail_next(&self, err: StoreError) {
            self.failures.lock().unwrap().push_back(err);
        }

        pub fn records(&self) -> Vec<AttendanceRecord> {
            self.records.lock().unwrap().clone()
        }
    }

    impl AttendanceStore for MemoryStore {
        fn append(&self, record: &AttendanceRecord) -> Result<(), StoreError> {
            if let Some(err) = self.failures.lock().unwrap().pop_front() {
                return Err(err);
            }
            self.records.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    /// Gallery with "alice" at [0.0] and "bob" at [10.0], euclidean metric,
    /// so a probe [x] near alice has confidence 1 - |x|.
    fn engine() -> DecisionEngine<Arc<MemoryStore>> {
        let gallery = Gallery::new(vec![
            Identity {
                id: "alice".into(),
                name: "Alice".into(),
                employee_id: Some("E-001".into()),
                references: vec![Embedding::new(vec![0.0])],
            },
            Identity {
                id: "bob".into(),
                name: "Bob".into(),
                employee_id: None,
                references: vec![Embedding::new(vec![10.0])],
            },
        ])
        .unwrap();
        let matcher = FaceMatcher::new(Arc::new(gallery), DistanceMetric::Euclidean, 0.6);
        let cooldown = Arc::new(CooldownTracker::new(TimeDelta::minutes(5)));
        DecisionEngine::new(matcher, cooldown, Arc::new(MemoryStore::default()))
    }

    pub(crate) fn observation(x: f32) -> Observation {
        Observation {
            region: BoundingBox {
                x: 10.0,
                y: 10.0,
                width: 50.0,
                height: 50.0,
                confidence: 0.99,
                landmarks: None,
            },
            embedding: Embedding::new(vec![x]),
        }
    }

    #[test]
    fn test_mark_cooldown_mark_scenario() {
        let engine = engine();
        let alice = observation(0.2); // confidence ~0.8

        let first = engine.decide(&alice, t0());
        assert!(first.is_marked());
        assert_eq!(first.identity().unwrap().name, "Alice");
        assert_eq!(engine.store().records().len(), 1);

        let second = engine.decide(&alice, t0() + TimeDelta::seconds(60));
        assert!(matches!(
            second,
            DecisionOutcome::Cooldown {
                reason: SuppressReason::ActiveCooldown { .. },
                ..
            }
        ));
        assert_eq!(engine.store().records().len(), 1);

        let third = engine.decide(&alice, t0() + TimeDelta::seconds(301));
        assert!(third.is_marked());
        let records = engine.store().records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].marked_at, t0() + TimeDelta::seconds(301));
    }

    #[test]
    fn test_low_confidence_is_unknown_without_side_effects() {
        let engine = engine();
        let outcome = engine.decide(&observation(0.6), t0()); // confidence ~0.4
        assert!(matches!(outcome, DecisionOutcome::Unknown { .. }));
        assert!((outcome.confidence() - 0.4).abs() < 1e-5);
        assert!(outcome.identity().is_none());
        assert!(engine.store().records().is_empty());
        assert!(engine.cooldown().is_empty());
    }

    #[test]
    fn test_store_failure_leaves_identity_eligible() {
        let engine = engine();
        engine
            .store()
            .fail_next(StoreError::Write("disk full".into()));

        let failed = engine.decide(&observation(0.2), t0());
        assert_eq!(failed.status(), "store_failed");
        assert!(!failed.is_marked());
        assert!(engine.cooldown().last_mark(&"alice".into()).is_none());
        assert!(engine.store().records().is_empty());

        let retried = engine.decide(&observation(0.2), t0() + TimeDelta::seconds(1));
        assert!(retried.is_marked());
        assert_eq!(engine.store().records().len(), 1);
        assert_eq!(
            engine.cooldown().last_mark(&"alice".into()),
            Some(t0() + TimeDelta::seconds(1))
        );
    }

    #[test]
    fn test_timeout_is_a_failure() {
        let engine = engine();
        engine
            .store()
            .fail_next(StoreError::Timeout(Duration::from_secs(2)));
        let outcome = engine.decide(&observation(0.1), t0());
        assert!(matches!(
            outcome,
            DecisionOutcome::Cooldown {
                reason: SuppressReason::StoreFailed(StoreError::Timeout(_)),
                ..
            }
        ));
        assert!(engine.cooldown().is_empty());
    }

    #[test]
    fn test_write_attempts_retry_within_one_decision() {
        let engine = engine().with_write_attempts(2);
        engine.store().fail_next(StoreError::Write("busy".into()));
        let outcome = engine.decide(&observation(0.1), t0());
        assert!(outcome.is_marked());
        assert_eq!(engine.store().records().len(), 1);
    }

    #[test]
    fn test_same_identity_twice_in_one_frame_writes_once() {
        let engine = engine();
        let outcomes = engine.decide_frame(&[observation(0.1), observation(0.2)], t0());
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].is_marked());
        assert_eq!(outcomes[1].status(), "cooldown");
        assert_eq!(engine.store().records().len(), 1);
    }

    #[test]
    fn test_concurrent_decisions_write_once() {
        let engine = engine();
        let outcomes: Vec<DecisionOutcome> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| engine.decide(&observation(0.1), t0())))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(outcomes.iter().filter(|o| o.is_marked()).count(), 1);
        assert_eq!(engine.store().records().len(), 1);
    }

    #[test]
    fn test_writes_never_closer_than_cooldown() {
        let engine = engine();
        // Observations every 17 seconds for two hours, some arriving late.
        let mut times: Vec<i64> = (0..420).map(|i| i * 17).collect();
        times.swap(10, 11);
        times.swap(200, 203);
        for secs in times {
            engine.decide(&observation(0.15), t0() + TimeDelta::seconds(secs));
        }
        let records = engine.store().records();
        assert!(records.len() > 1);
        for pair in records.windows(2) {
            assert!(pair[1].marked_at - pair[0].marked_at >= TimeDelta::minutes(5));
        }
    }

    #[test]
    fn test_distinct_identities_do_not_share_cooldown() {
        let engine = engine();
        assert!(engine.decide(&observation(0.1), t0()).is_marked());
        let bob = engine.decide(&observation(9.9), t0());
        assert!(bob.is_marked());
        assert_eq!(bob.identity().unwrap().id, IdentityId::from("bob"));
        assert_eq!(engine.store().records().len(), 2);
    }
}
