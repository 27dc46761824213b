//! Dispute workflow: open → decide → apply remedy.
//!
//! A dispute hangs off a receipt. Opening is bounded by the policy window;
//! the decision is an arbiter-signed envelope over a canonical record; the
//! remedy is a rail refund keyed by the dispute id, so re-applying is a
//! no-op.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use pact_settlement::{IdempotencyKey, RefundOutcome, RefundRequest, SettlementRail};
use pact_types::{
    DisputeId, DisputePolicy, FailureCode, Keypair, PactError, Receipt, Result,
    sha256_hex_of,
};

/// How the arbiter ruled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeOutcome {
    RefundBuyer,
    UpholdSeller,
    PartialRefund,
}

/// An open dispute awaiting decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dispute {
    pub dispute_id: DisputeId,
    pub receipt: Receipt,
    pub reason: String,
    pub opened_at_ms: u64,
    pub deadline_ms: u64,
}

/// The arbiter's signed ruling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisputeDecision {
    pub dispute_id: DisputeId,
    pub outcome: DisputeOutcome,
    pub refund_amount: Decimal,
    pub notes: String,
    /// Hash of the policy the ruling was made under.
    pub policy_snapshot: String,
    /// Base58 signature by the arbiter over the canonical decision body.
    pub arbiter_signature: String,
    pub arbiter_pubkey_b58: String,
}

/// What applying the remedy did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemedyRecord {
    pub dispute_id: DisputeId,
    pub refunded_amount: Decimal,
    pub ok: bool,
    pub at_ms: u64,
}

/// Open a dispute against a receipt, enforcing the policy window.
pub fn open_dispute(
    receipt: &Receipt,
    reason: impl Into<String>,
    now_ms: u64,
    policy: &DisputePolicy,
) -> Result<Dispute> {
    if !policy.enabled {
        return Err(PactError::new(
            FailureCode::Internal,
            "disputes are disabled by policy",
        ));
    }
    let deadline_ms = receipt.timestamp_ms + policy.window_ms;
    if now_ms > deadline_ms {
        return Err(PactError::new(
            FailureCode::Internal,
            format!("dispute window closed at {deadline_ms}ms (now {now_ms}ms)"),
        ));
    }
    let receipt_hash = receipt.content_hash()?;
    Ok(Dispute {
        dispute_id: DisputeId::derive(&receipt_hash, now_ms),
        receipt: receipt.clone(),
        reason: reason.into(),
        opened_at_ms: now_ms,
        deadline_ms,
    })
}

/// Sign a ruling. The refund is clamped by `max_refund_pct`, and partial
/// refunds require `allow_partial`.
pub fn decide_dispute(
    dispute: &Dispute,
    outcome: DisputeOutcome,
    requested_refund: Decimal,
    notes: impl Into<String>,
    policy: &DisputePolicy,
    policy_hash: &str,
    arbiter: &Keypair,
) -> Result<DisputeDecision> {
    let cap = dispute.receipt.paid_amount * policy.max_refund_pct;
    let refund_amount = match outcome {
        DisputeOutcome::UpholdSeller => Decimal::ZERO,
        DisputeOutcome::RefundBuyer => cap,
        DisputeOutcome::PartialRefund => {
            if !policy.allow_partial {
                return Err(PactError::new(
                    FailureCode::Internal,
                    "partial refunds are disabled by policy",
                ));
            }
            requested_refund.min(cap)
        }
    };

    let notes = notes.into();
    let body = json!({
        "dispute_id": dispute.dispute_id,
        "outcome": outcome,
        "refund_amount": refund_amount,
        "notes": notes,
        "policy_snapshot": policy_hash,
    });
    let digest = sha256_hex_of(&body)?;
    let signature = arbiter.sign_b58(digest.as_bytes());

    Ok(DisputeDecision {
        dispute_id: dispute.dispute_id.clone(),
        outcome,
        refund_amount,
        notes,
        policy_snapshot: policy_hash.to_string(),
        arbiter_signature: signature,
        arbiter_pubkey_b58: arbiter.public_b58(),
    })
}

/// Verify a decision's signature.
pub fn verify_decision(decision: &DisputeDecision) -> Result<()> {
    let body = json!({
        "dispute_id": decision.dispute_id,
        "outcome": decision.outcome,
        "refund_amount": decision.refund_amount,
        "notes": decision.notes,
        "policy_snapshot": decision.policy_snapshot,
    });
    let digest = sha256_hex_of(&body)?;
    pact_types::verify_b58(
        &decision.arbiter_pubkey_b58,
        digest.as_bytes(),
        &decision.arbiter_signature,
    )
}

/// Apply the remedy: refund seller → buyer with the dispute id as the
/// idempotency key.
pub async fn apply_remedy(
    decision: &DisputeDecision,
    dispute: &Dispute,
    rail: &dyn SettlementRail,
    now_ms: u64,
) -> Result<RemedyRecord> {
    verify_decision(decision)?;
    if decision.refund_amount <= Decimal::ZERO {
        return Ok(RemedyRecord {
            dispute_id: decision.dispute_id.clone(),
            refunded_amount: Decimal::ZERO,
            ok: true,
            at_ms: now_ms,
        });
    }
    let outcome: RefundOutcome = rail
        .refund(&RefundRequest {
            dispute_id: decision.dispute_id.clone(),
            from: dispute.receipt.seller_agent_id.clone(),
            to: dispute.receipt.buyer_agent_id.clone(),
            amount: decision.refund_amount,
            idempotency_key: IdempotencyKey::raw(decision.dispute_id.to_string()),
        })
        .await?;
    info!(dispute = %decision.dispute_id, ok = outcome.ok, "remedy applied");
    Ok(RemedyRecord {
        dispute_id: decision.dispute_id.clone(),
        refunded_amount: outcome.refunded_amount,
        ok: outcome.ok,
        at_ms: now_ms,
    })
}

#[cfg(test)]
mod tests {
    use pact_settlement::MockRail;
    use pact_types::{AgentId, IntentId};

    use super::*;

    fn receipt() -> Receipt {
        Receipt {
            intent_id: IntentId::derive("fp", 0),
            buyer_agent_id: AgentId::from("buyer-1"),
            seller_agent_id: AgentId::from("seller-1"),
            agreed_price: Decimal::new(10, 1),
            fulfilled: true,
            paid_amount: Decimal::new(10, 1),
            timestamp_ms: 10_000,
            ticks: None,
            chunks: None,
            failure_code: None,
            asset_id: None,
            chain_id: None,
        }
    }

    fn policy() -> DisputePolicy {
        DisputePolicy {
            enabled: true,
            window_ms: 100_000,
            max_refund_pct: Decimal::new(5, 1), // 50%
            allow_partial: true,
        }
    }

    #[test]
    fn open_within_window() {
        let d = open_dispute(&receipt(), "stale data", 50_000, &policy()).unwrap();
        assert_eq!(d.deadline_ms, 110_000);
        assert!(d.dispute_id.to_string().starts_with("dsp_"));
    }

    #[test]
    fn open_after_window_rejected() {
        let err = open_dispute(&receipt(), "stale data", 200_000, &policy()).unwrap_err();
        assert!(err.reason.contains("window closed"));
    }

    #[test]
    fn open_when_disabled_rejected() {
        let mut p = policy();
        p.enabled = false;
        assert!(open_dispute(&receipt(), "r", 0, &p).is_err());
    }

    #[test]
    fn decision_clamps_refund_and_signs() {
        let dispute = open_dispute(&receipt(), "stale data", 50_000, &policy()).unwrap();
        let arbiter = Keypair::from_seed([7u8; 32]);
        let decision = decide_dispute(
            &dispute,
            DisputeOutcome::PartialRefund,
            Decimal::new(9, 1), // wants 0.9, cap is 0.5
            "partially stale",
            &policy(),
            "policy-hash",
            &arbiter,
        )
        .unwrap();
        assert_eq!(decision.refund_amount, Decimal::new(5, 1));
        verify_decision(&decision).unwrap();
    }

    #[test]
    fn tampered_decision_fails_verification() {
        let dispute = open_dispute(&receipt(), "stale data", 50_000, &policy()).unwrap();
        let arbiter = Keypair::from_seed([7u8; 32]);
        let mut decision = decide_dispute(
            &dispute,
            DisputeOutcome::RefundBuyer,
            Decimal::ZERO,
            "refund",
            &policy(),
            "policy-hash",
            &arbiter,
        )
        .unwrap();
        decision.refund_amount = Decimal::new(99, 0);
        assert!(verify_decision(&decision).is_err());
    }

    #[tokio::test]
    async fn remedy_refunds_idempotently() {
        let rail = MockRail::new();
        rail.deposit(&AgentId::from("seller-1"), Decimal::ONE);
        let dispute = open_dispute(&receipt(), "stale data", 50_000, &policy()).unwrap();
        let arbiter = Keypair::from_seed([7u8; 32]);
        let decision = decide_dispute(
            &dispute,
            DisputeOutcome::RefundBuyer,
            Decimal::ZERO,
            "refund",
            &policy(),
            "policy-hash",
            &arbiter,
        )
        .unwrap();

        let first = apply_remedy(&decision, &dispute, &rail, 60_000).await.unwrap();
        assert!(first.ok);
        assert_eq!(first.refunded_amount, Decimal::new(5, 1));

        // Applying again moves no more money.
        let second = apply_remedy(&decision, &dispute, &rail, 61_000).await.unwrap();
        assert!(second.ok);
        assert_eq!(
            rail.balance(&AgentId::from("buyer-1"), None, None).await.unwrap(),
            Decimal::new(5, 1)
        );
    }

    #[test]
    fn uphold_seller_refunds_nothing() {
        let dispute = open_dispute(&receipt(), "meritless", 50_000, &policy()).unwrap();
        let arbiter = Keypair::from_seed([7u8; 32]);
        let decision = decide_dispute(
            &dispute,
            DisputeOutcome::UpholdSeller,
            Decimal::new(5, 1),
            "no merit",
            &policy(),
            "policy-hash",
            &arbiter,
        )
        .unwrap();
        assert_eq!(decision.refund_amount, Decimal::ZERO);
    }
}
