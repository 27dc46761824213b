//! Idempotency keys and the per-rail outcome cache.
//!
//! Network rails may be retried at any point, so every outbound mutation is
//! paired with a deterministic key derived from the transcript's last valid
//! signed hash (LVSH), the phase, the rail, the provider, and the attempt
//! index. A rail that sees a key again returns the recorded outcome and
//! applies nothing.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use pact_types::HandleId;
use pact_types::constants::IDEMPOTENCY_CACHE_CAPACITY;

use crate::provider::{CommitOutcome, RefundOutcome};

/// Deterministic key for one rail mutation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Derive the key for a settlement phase call.
    #[must_use]
    pub fn derive(
        lvsh: &str,
        phase: &str,
        rail: &str,
        provider_id: &str,
        attempt_idx: usize,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"pact:idem:v3:");
        hasher.update(lvsh.as_bytes());
        hasher.update(b":");
        hasher.update(phase.as_bytes());
        hasher.update(b":");
        hasher.update(rail.as_bytes());
        hasher.update(b":");
        hasher.update(provider_id.as_bytes());
        hasher.update(b":");
        hasher.update(attempt_idx.to_le_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Wrap a caller-provided key verbatim.
    #[must_use]
    pub fn raw(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// A sub-key scoped under this one (e.g. per-operation within a phase).
    #[must_use]
    pub fn scoped(&self, suffix: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(self.0.as_bytes());
        hasher.update(b":");
        hasher.update(suffix.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The outcome a rail recorded for a key.
#[derive(Debug, Clone, PartialEq)]
pub enum RailOutcome {
    Unit,
    Lock(HandleId),
    Commit(CommitOutcome),
    Refund(RefundOutcome),
}

/// Bounded key → outcome cache with FIFO eviction, so long-running rails
/// keep predictable memory.
#[derive(Debug)]
pub struct IdempotencyCache {
    outcomes: HashMap<String, RailOutcome>,
    order: VecDeque<String>,
    max_size: usize,
}

impl Default for IdempotencyCache {
    fn default() -> Self {
        Self::new(IDEMPOTENCY_CACHE_CAPACITY)
    }
}

impl IdempotencyCache {
    /// # Panics
    /// Panics if `max_size` is zero.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        assert!(max_size > 0, "IdempotencyCache max_size must be > 0");
        Self {
            outcomes: HashMap::with_capacity(max_size.min(1_024)),
            order: VecDeque::with_capacity(max_size.min(1_024)),
            max_size,
        }
    }

    /// The recorded outcome for a key, if the call already happened.
    #[must_use]
    pub fn get(&self, key: &IdempotencyKey) -> Option<&RailOutcome> {
        self.outcomes.get(key.as_str())
    }

    /// Record the outcome of a first-time call.
    pub fn record(&mut self, key: &IdempotencyKey, outcome: RailOutcome) {
        if self.outcomes.contains_key(key.as_str()) {
            return;
        }
        if self.outcomes.len() >= self.max_size {
            if let Some(oldest) = self.order.pop_front() {
                self.outcomes.remove(&oldest);
            }
        }
        self.outcomes.insert(key.as_str().to_string(), outcome);
        self.order.push_back(key.as_str().to_string());
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}
