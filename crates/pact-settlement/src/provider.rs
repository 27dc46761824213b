//! The settlement rail interface.
//!
//! One uniform async surface over pluggable rails. Contract:
//!
//! - every mutating operation takes an [`IdempotencyKey`]; repeated calls
//!   with the same key are no-ops that return the prior result;
//! - `lock` reserves funds from a payer toward a payee and returns a
//!   handle; `commit` pays the payee; `release`/`abort` return the funds;
//! - `commit` and `poll` share one outcome shape so pending settlements can
//!   be driven to completion later (reconciliation).

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use pact_types::{AgentId, DisputeId, FailureCode, HandleId, Result};

use crate::idempotency::IdempotencyKey;

/// Where a commit stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitStatus {
    Committed,
    Pending,
    Failed,
}

/// Result of `commit` or `poll`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitOutcome {
    pub status: CommitStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paid_amount: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_code: Option<FailureCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    /// Set when the rail covered a small buyer shortfall itself
    /// (mock-rail local recovery).
    #[serde(default)]
    pub topped_up: bool,
}

impl CommitOutcome {
    #[must_use]
    pub fn committed(paid_amount: Decimal) -> Self {
        Self {
            status: CommitStatus::Committed,
            paid_amount: Some(paid_amount),
            failure_code: None,
            failure_reason: None,
            topped_up: false,
        }
    }

    #[must_use]
    pub fn pending() -> Self {
        Self {
            status: CommitStatus::Pending,
            paid_amount: None,
            failure_code: None,
            failure_reason: None,
            topped_up: false,
        }
    }

    #[must_use]
    pub fn failed(code: FailureCode, reason: impl Into<String>) -> Self {
        Self {
            status: CommitStatus::Failed,
            paid_amount: None,
            failure_code: Some(code),
            failure_reason: Some(reason.into()),
            topped_up: false,
        }
    }
}

/// A dispute-driven refund instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefundRequest {
    pub dispute_id: DisputeId,
    pub from: AgentId,
    pub to: AgentId,
    pub amount: Decimal,
    pub idempotency_key: IdempotencyKey,
}

/// What the rail did about a refund.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefundOutcome {
    pub ok: bool,
    pub refunded_amount: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<FailureCode>,
}

/// Uniform interface over settlement rails.
///
/// Implementations must be safe to share (`&self` methods, interior
/// mutability) because the orchestrator, the session, and the streaming
/// exchange all hold the same rail.
#[async_trait]
pub trait SettlementRail: Send + Sync {
    /// Stable rail name used by routing rules and transcripts.
    fn name(&self) -> &'static str;

    /// Credit an account.
    async fn credit(
        &self,
        key: &IdempotencyKey,
        account: &AgentId,
        amount: Decimal,
        chain: Option<&str>,
        asset: Option<&str>,
    ) -> Result<()>;

    /// Debit an account.
    async fn debit(
        &self,
        key: &IdempotencyKey,
        account: &AgentId,
        amount: Decimal,
        chain: Option<&str>,
        asset: Option<&str>,
    ) -> Result<()>;

    /// Reserve `amount` from `from` toward `to`. Returns the lock handle.
    async fn lock(
        &self,
        key: &IdempotencyKey,
        from: &AgentId,
        to: &AgentId,
        amount: Decimal,
    ) -> Result<HandleId>;

    /// Return locked funds to the payer (cooperative unwind).
    async fn release(&self, key: &IdempotencyKey, handle: &HandleId) -> Result<()>;

    /// Pay the payee from the lock.
    async fn commit(&self, key: &IdempotencyKey, handle: &HandleId) -> Result<CommitOutcome>;

    /// Re-read the state of an earlier commit. Read-only: no key.
    async fn poll(&self, handle: &HandleId) -> Result<CommitOutcome>;

    /// Abandon a lock after failure; funds go back to the payer.
    async fn abort(&self, key: &IdempotencyKey, handle: &HandleId) -> Result<()>;

    /// Current available balance.
    async fn balance(
        &self,
        account: &AgentId,
        chain: Option<&str>,
        asset: Option<&str>,
    ) -> Result<Decimal>;

    /// Dispute remedy. Rails without refund support return a failed outcome
    /// rather than an error, so dispute handling stays uniform.
    async fn refund(&self, request: &RefundRequest) -> Result<RefundOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_constructors() {
        let ok = CommitOutcome::committed(Decimal::ONE);
        assert_eq!(ok.status, CommitStatus::Committed);
        assert_eq!(ok.paid_amount, Some(Decimal::ONE));

        let pending = CommitOutcome::pending();
        assert_eq!(pending.status, CommitStatus::Pending);
        assert!(pending.paid_amount.is_none());

        let failed = CommitOutcome::failed(FailureCode::SettlementFailed, "rail down");
        assert_eq!(failed.status, CommitStatus::Failed);
        assert_eq!(failed.failure_code, Some(FailureCode::SettlementFailed));
    }

    #[test]
    fn commit_status_wire_spelling() {
        assert_eq!(
            serde_json::to_string(&CommitStatus::Committed).unwrap(),
            "\"committed\""
        );
    }
}
