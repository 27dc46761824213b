//! Intent and agreement models.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{PactError, Result};
use crate::ids::IntentId;

/// How an acquisition settles once negotiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementMode {
    /// Atomic commit/reveal: pay on proof of delivery.
    HashReveal,
    /// Pay-as-you-go: periodic small payments paired with signed chunks.
    Streaming,
}

impl std::fmt::Display for SettlementMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HashReveal => write!(f, "hash_reveal"),
            Self::Streaming => write!(f, "streaming"),
        }
    }
}

/// Delivery constraints attached to an intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Constraints {
    /// Maximum acceptable provider latency.
    pub latency_ms: u64,
    /// Maximum acceptable data staleness.
    pub freshness_sec: u64,
}

/// The buyer's signed statement of what it wants to acquire and under what
/// constraints. Carried as the INTENT message payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub intent_id: IntentId,
    pub intent_type: String,
    pub scope: String,
    pub constraints: Constraints,
    pub max_price: Decimal,
    pub settlement_mode: SettlementMode,
    pub sent_at_ms: u64,
    pub expires_at_ms: u64,
}

impl Intent {
    /// Whether the intent has expired at the given clock reading.
    #[must_use]
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms
    }
}

/// Agreement lifecycle. Transitions are monotonic:
/// `Open → Committed → Completed` or `{Open, Committed} → Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgreementStatus {
    Open,
    Committed,
    Completed,
    Failed,
}

impl AgreementStatus {
    /// Can this agreement transition to the given target status?
    #[must_use]
    pub fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Open, Self::Committed | Self::Failed)
                | (Self::Committed, Self::Completed | Self::Failed)
        )
    }
}

impl std::fmt::Display for AgreementStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "OPEN"),
            Self::Committed => write!(f, "COMMITTED"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// The contract formed after ACCEPT.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agreement {
    pub intent_id: IntentId,
    pub agreed_price: Decimal,
    pub settlement_mode: SettlementMode,
    /// Window after delivery during which the buyer may dispute.
    pub challenge_window_ms: u64,
    pub delivery_deadline_ms: u64,
    /// The bond the seller locks: `max(seller_min_bond, price × multiple)`.
    pub seller_bond: Decimal,
    pub status: AgreementStatus,
}

impl Agreement {
    /// Transition to a new status, enforcing monotonicity.
    pub fn transition(&mut self, target: AgreementStatus) -> Result<()> {
        if !self.status.can_transition_to(target) {
            return Err(PactError::internal(format!(
                "agreement {} cannot transition {} -> {target}",
                self.intent_id, self.status
            )));
        }
        self.status = target;
        Ok(())
    }
}
