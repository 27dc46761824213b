//! Reputation, market statistics, and the intent-fingerprint registry.
//!
//! The reputation store is the one resource shared across acquire runs. Its
//! `has_committed_fingerprint` / `mark_fingerprint_committed` pair is the
//! at-most-one-commit enforcement point and must be linearizable: both run
//! under one lock, and a mark that loses the race reports the prior commit.

use std::collections::HashMap;
use std::sync::Mutex;

use rust_decimal::Decimal;

use pact_types::{AgentId, FailureCode, IntentId, PactError, Receipt, Result};

/// A previously committed acquisition for the same economic intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorCommit {
    pub intent_id: IntentId,
    /// Path or identifier of the prior transcript.
    pub transcript_ref: String,
    pub committed_at_ms: u64,
}

/// Receipt log plus derived statistics plus the commit registry.
pub trait ReputationStore: Send + Sync {
    /// Append a receipt. `intent_type` keys the market statistics.
    fn ingest(&self, intent_type: &str, receipt: &Receipt);

    /// Agent score in [0, 1]: fulfilled ratio with volume damping.
    fn score(&self, agent: &AgentId) -> f64;

    /// Fraction of this agent's receipts that failed outright.
    fn failure_rate(&self, agent: &AgentId) -> f64;

    /// Fraction of this agent's receipts that timed out in settlement.
    fn timeout_rate(&self, agent: &AgentId) -> f64;

    /// Nearest-rank price percentile (`pct` in [0, 1]) over fulfilled
    /// receipts for an intent type. `None` without history.
    fn price_percentile(&self, intent_type: &str, pct: f64) -> Option<Decimal>;

    /// Whether this economic intent already committed somewhere.
    fn has_committed_fingerprint(&self, fingerprint: &str) -> Option<PriorCommit>;

    /// Atomically record a commit. Compare-and-set: losing the race returns
    /// a `PACT-331` error carrying the prior transcript reference.
    fn mark_fingerprint_committed(
        &self,
        fingerprint: &str,
        intent_id: IntentId,
        transcript_ref: &str,
        now_ms: u64,
    ) -> Result<()>;

    /// Number of receipts recorded for an agent.
    fn receipt_count(&self, agent: &AgentId) -> usize;
}

#[derive(Debug, Default)]
struct StoreInner {
    /// (intent_type, receipt) log, append-only.
    receipts: Vec<(String, Receipt)>,
    fingerprints: HashMap<String, PriorCommit>,
}

/// In-memory store. Cross-run sharing happens by cloning the `Arc` that
/// owns it; all reads and writes serialize through one mutex.
#[derive(Debug, Default)]
pub struct InMemoryReputationStore {
    inner: Mutex<StoreInner>,
    /// v2 scoring uses log damping instead of linear damping.
    v2_scoring: bool,
}

impl InMemoryReputationStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store with the v2 (log-damped) scoring curve.
    #[must_use]
    pub fn with_v2_scoring() -> Self {
        Self {
            inner: Mutex::new(StoreInner::default()),
            v2_scoring: true,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreInner> {
        // A poisoned store means a panicked writer; the data itself is
        // append-only and still consistent.
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    #[allow(clippy::cast_precision_loss)]
    fn damping(&self, n: usize) -> f64 {
        let n = n as f64;
        if self.v2_scoring {
            (1.0 + n).ln() / (5.0 + n).ln()
        } else {
            n / (n + 4.0)
        }
    }
}

impl ReputationStore for InMemoryReputationStore {
    fn ingest(&self, intent_type: &str, receipt: &Receipt) {
        self.lock()
            .receipts
            .push((intent_type.to_string(), receipt.clone()));
    }

    #[allow(clippy::cast_precision_loss)]
    fn score(&self, agent: &AgentId) -> f64 {
        let inner = self.lock();
        let mine: Vec<&Receipt> = inner
            .receipts
            .iter()
            .map(|(_, r)| r)
            .filter(|r| &r.seller_agent_id == agent)
            .collect();
        if mine.is_empty() {
            return 0.0;
        }
        let fulfilled = mine.iter().filter(|r| r.fulfilled).count() as f64;
        let base = fulfilled / mine.len() as f64;
        base * self.damping(mine.len())
    }

    #[allow(clippy::cast_precision_loss)]
    fn failure_rate(&self, agent: &AgentId) -> f64 {
        let inner = self.lock();
        let (mut total, mut failed) = (0usize, 0usize);
        for (_, r) in &inner.receipts {
            if &r.seller_agent_id == agent {
                total += 1;
                if !r.fulfilled && r.failure_code.is_some() {
                    failed += 1;
                }
            }
        }
        if total == 0 {
            0.0
        } else {
            failed as f64 / total as f64
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn timeout_rate(&self, agent: &AgentId) -> f64 {
        let inner = self.lock();
        let (mut total, mut timed_out) = (0usize, 0usize);
        for (_, r) in &inner.receipts {
            if &r.seller_agent_id == agent {
                total += 1;
                if r.failure_code == Some(FailureCode::SettlementPollTimeout) {
                    timed_out += 1;
                }
            }
        }
        if total == 0 {
            0.0
        } else {
            timed_out as f64 / total as f64
        }
    }

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn price_percentile(&self, intent_type: &str, pct: f64) -> Option<Decimal> {
        let inner = self.lock();
        let mut prices: Vec<Decimal> = inner
            .receipts
            .iter()
            .filter(|(t, r)| t == intent_type && r.fulfilled && r.paid_amount > Decimal::ZERO)
            .map(|(_, r)| r.agreed_price)
            .collect();
        if prices.is_empty() {
            return None;
        }
        prices.sort_unstable();
        let rank = (pct.clamp(0.0, 1.0) * (prices.len() - 1) as f64).round() as usize;
        Some(prices[rank])
    }

    fn has_committed_fingerprint(&self, fingerprint: &str) -> Option<PriorCommit> {
        self.lock().fingerprints.get(fingerprint).cloned()
    }

    fn mark_fingerprint_committed(
        &self,
        fingerprint: &str,
        intent_id: IntentId,
        transcript_ref: &str,
        now_ms: u64,
    ) -> Result<()> {
        let mut inner = self.lock();
        if let Some(prior) = inner.fingerprints.get(fingerprint) {
            // CAS failure: someone else committed first.
            return Err(PactError::new(
                FailureCode::Pact331,
                format!(
                    "Double commit detected for fingerprint {fingerprint}. \
                     Prior transcript: {} (intent {})",
                    prior.transcript_ref, prior.intent_id
                ),
            ));
        }
        inner.fingerprints.insert(
            fingerprint.to_string(),
            PriorCommit {
                intent_id,
                transcript_ref: transcript_ref.to_string(),
                committed_at_ms: now_ms,
            },
        );
        Ok(())
    }

    fn receipt_count(&self, agent: &AgentId) -> usize {
        self.lock()
            .receipts
            .iter()
            .filter(|(_, r)| &r.seller_agent_id == agent)
            .count()
    }
}
