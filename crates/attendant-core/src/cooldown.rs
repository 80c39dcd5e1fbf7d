//! Per-identity cooldown state.
//!
//! Entries are created and advanced only by [`CooldownTracker::mark`], and
//! never move backwards in time. State is process-local: a restart clears it.

use crate::types::IdentityId;
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Tracks the last successful attendance mark per identity.
#[derive(Debug)]
pub struct CooldownTracker {
    window: TimeDelta,
    entries: RwLock<HashMap<IdentityId, DateTime<Utc>>>,
}

impl CooldownTracker {
    pub fn new(window: TimeDelta) -> Self {
        Self {
            window,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> TimeDelta {
        self.window
    }

    /// True iff `identity` was marked and `now - last_mark < window`.
    ///
    /// A `now` earlier than the last mark counts as inside the window.
    pub fn is_in_cooldown(&self, identity: &IdentityId, now: DateTime<Utc>) -> bool {
        self.remaining(identity, now).is_some()
    }

    /// Time left before `identity` may be marked again, if it is suppressed.
    pub fn remaining(&self, identity: &IdentityId, now: DateTime<Utc>) -> Option<TimeDelta> {
        let last = self.last_mark(identity)?;
        let elapsed = now - last;
        (elapsed < self.window).then(|| self.window - elapsed)
    }

    pub fn last_mark(&self, identity: &IdentityId) -> Option<DateTime<Utc>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(identity).copied()
    }

    /// Record a successful mark at `now`.
    ///
    /// Compare-and-set: an existing newer timestamp is kept. Returns whether
    /// the stored timestamp changed.
    pub fn mark(&self, identity: &IdentityId, now: DateTime<Utc>) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        match entries.get_mut(identity) {
            Some(last) if *last >= now => {
                tracing::debug!(%identity, last = %last, now = %now, "stale cooldown mark ignored");
                false
            }
            Some(last) => {
                *last = now;
                true
            }
            None => {
                entries.insert(identity.clone(), now);
                true
            }
        }
    }

    /// Number of identities that have ever been marked this session.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
