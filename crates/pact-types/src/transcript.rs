//! The per-intent transcript: an append-only record of every decision.
//!
//! Each phase of an acquisition writes into its own dedicated section; the
//! transcript store serializes the whole record canonically exactly once.
//! The transcript hash covers every field *except* `failure_event` and
//! `final_hash`, so a failure event can reference the hash of the rest.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::candidate::CandidateEvaluation;
use crate::canonical::sha256_hex;
use crate::error::{FailureCode, Result};
use crate::ids::{AgentId, HandleId, IntentId, ProviderId};
use crate::intent::SettlementMode;
use crate::receipt::Receipt;
use crate::wallet::WalletRecord;

/// One provider as the directory returned it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub provider_id: ProviderId,
    pub pubkey_b58: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    pub baseline_latency_ms: u64,
}

/// Outcome of one credential fetch + verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialCheck {
    pub provider_id: ProviderId,
    /// Whether the provider served a credential at all.
    pub present: bool,
    pub verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer_id: Option<String>,
    pub covers_intent_type: bool,
    pub expired: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<FailureCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Outcome of one quote fetch + verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteRecord {
    pub provider_id: ProviderId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ask_price: Option<Decimal>,
    pub firm: bool,
    pub verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub within_band: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<FailureCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// The winner and the fallback order behind it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionRecord {
    pub winner: ProviderId,
    pub winner_pubkey_b58: String,
    pub winner_utility: f64,
    /// Winner first, then remaining eligible candidates by utility.
    pub fallback_order: Vec<ProviderId>,
    pub evaluations: Vec<CandidateEvaluation>,
}

/// Negotiation strategy outcome at a glance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegotiationSummary {
    pub strategy: String,
    pub rounds_used: u32,
    pub log: Vec<String>,
}

/// One COUNTER round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NegotiationRound {
    pub round: u32,
    pub quote_price: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counter_price: Option<Decimal>,
    pub accepted: bool,
    pub reason: String,
    pub within_band: bool,
    pub used_override: bool,
}

/// Settlement at a glance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementSummary {
    pub mode: SettlementMode,
    pub verification_summary: String,
}

/// Where the settlement lifecycle currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStatus {
    Preparing,
    Pending,
    Committed,
    Failed,
    Aborted,
}

impl std::fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Preparing => "preparing",
            Self::Pending => "pending",
            Self::Committed => "committed",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// One timestamped event inside the settlement lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementEvent {
    pub at_ms: u64,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// How the router picked the rail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRecord {
    pub rail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_index: Option<usize>,
    pub rationale: String,
}

/// Full settlement lifecycle for the winning attempt. A `Pending` status
/// with a handle is the contract for later reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementLifecycle {
    /// Rail name (e.g. "mock", "stripe_like").
    pub provider: String,
    pub idempotency_key: String,
    pub status: LifecycleStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle_id: Option<HandleId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prepared_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub committed_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aborted_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paid_amount: Option<Decimal>,
    #[serde(default)]
    pub settlement_events: Vec<SettlementEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_code: Option<FailureCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing: Option<RouteRecord>,
}

/// One attempt against one provider in the fallback plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementAttempt {
    pub attempt_idx: usize,
    pub provider_id: ProviderId,
    pub pubkey_b58: String,
    pub rail: String,
    pub mode: SettlementMode,
    pub started_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paid_amount: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<FailureCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

/// Streaming progress against one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamingAttempt {
    pub attempt_idx: usize,
    pub provider_id: ProviderId,
    pub ticks: u64,
    pub chunks: u64,
    pub paid_amount: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<FailureCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Cumulative streaming totals across every attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamingSummary {
    pub ticks: u64,
    pub chunks: u64,
    pub paid_amount: Decimal,
    pub budget: Decimal,
    pub fulfilled: bool,
}

/// One split-settlement segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementSegment {
    pub segment_idx: u32,
    pub amount: Decimal,
    pub rail: String,
    pub status: LifecycleStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle_id: Option<HandleId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paid_amount: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<FailureCode>,
}

/// A recorded breach of the settlement SLA.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaViolation {
    pub kind: SlaViolationKind,
    pub at_ms: u64,
    pub detail: String,
}

/// The ways settlement can breach its SLA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlaViolationKind {
    MaxPendingExceeded,
    PollAttemptsExhausted,
}

/// SLA section of the transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SlaReport {
    pub violations: Vec<SlaViolation>,
}

/// The provider that won contention; all others are locked out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentionRecord {
    pub winner_pubkey_b58: String,
    pub fingerprint_hex: String,
}

/// Terminal result of the acquisition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<FailureCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Outcome {
    #[must_use]
    pub fn success() -> Self {
        Self {
            ok: true,
            code: None,
            reason: None,
        }
    }

    #[must_use]
    pub fn failure(code: FailureCode, reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            code: Some(code),
            reason: Some(reason.into()),
        }
    }
}

/// A failure event that references the hash of the rest of the transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureEvent {
    pub code: FailureCode,
    pub reason: String,
    pub at_ms: u64,
    pub transcript_hash: String,
}

/// How much detail the caller asked `explain` to carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExplainLevel {
    #[default]
    None,
    Coarse,
    Full,
}

/// One explained decision (usually a candidate exclusion).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplainEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<ProviderId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<FailureCode>,
    pub detail: String,
}

/// The explain log returned alongside the result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ExplainReport {
    pub level: ExplainLevel,
    pub log: Vec<ExplainEntry>,
}

/// The full per-intent transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub schema_version: u32,
    pub protocol: String,
    pub intent_id: IntentId,
    pub intent_fingerprint: String,
    pub buyer_agent_id: AgentId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seller_agent_id: Option<AgentId>,
    /// Sanitized acquire input — never carries private keys.
    pub input: Value,
    pub directory: Vec<DirectoryEntry>,
    pub credential_checks: Vec<CredentialCheck>,
    pub quotes: Vec<QuoteRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection: Option<SelectionRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negotiation: Option<NegotiationSummary>,
    #[serde(default)]
    pub negotiation_rounds: Vec<NegotiationRound>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settlement: Option<SettlementSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settlement_lifecycle: Option<SettlementLifecycle>,
    #[serde(default)]
    pub settlement_attempts: Vec<SettlementAttempt>,
    #[serde(default)]
    pub streaming_attempts: Vec<StreamingAttempt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streaming_summary: Option<StreamingSummary>,
    #[serde(default)]
    pub settlement_segments: Vec<SettlementSegment>,
    #[serde(default)]
    pub settlement_sla: SlaReport,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contention: Option<ContentionRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt: Option<Receipt>,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet: Option<WalletRecord>,
    pub written_at_ms: u64,
    pub written_at_rfc3339: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_event: Option<FailureEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_hash: Option<String>,
}

impl Transcript {
    /// Empty transcript shell for a new run.
    #[must_use]
    pub fn new(intent_id: IntentId, intent_fingerprint: String, buyer_agent_id: AgentId) -> Self {
        Self {
            schema_version: crate::constants::TRANSCRIPT_SCHEMA_VERSION,
            protocol: crate::constants::PROTOCOL_VERSION.to_string(),
            intent_id,
            intent_fingerprint,
            buyer_agent_id,
            seller_agent_id: None,
            input: Value::Null,
            directory: Vec::new(),
            credential_checks: Vec::new(),
            quotes: Vec::new(),
            selection: None,
            negotiation: None,
            negotiation_rounds: Vec::new(),
            settlement: None,
            settlement_lifecycle: None,
            settlement_attempts: Vec::new(),
            streaming_attempts: Vec::new(),
            streaming_summary: None,
            settlement_segments: Vec::new(),
            settlement_sla: SlaReport::default(),
            contention: None,
            receipt: None,
            outcome: Outcome::success(),
            wallet: None,
            written_at_ms: 0,
            written_at_rfc3339: String::new(),
            failure_event: None,
            final_hash: None,
        }
    }

    /// Hash over every field except `failure_event` and `final_hash`.
    pub fn compute_hash(&self) -> Result<String> {
        let mut value = crate::canonical::to_canonical_value(self)?;
        if let Value::Object(map) = &mut value {
            map.remove("failure_event");
            map.remove("final_hash");
        }
        Ok(sha256_hex(&value))
    }

    /// Attach a failure event referencing the hash of the rest.
    pub fn seal_failure(&mut self, code: FailureCode, reason: String, at_ms: u64) -> Result<()> {
        let transcript_hash = self.compute_hash()?;
        self.failure_event = Some(FailureEvent {
            code,
            reason,
            at_ms,
            transcript_hash,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transcript() -> Transcript {
        Transcript::new(
            IntentId::derive("fp", 0),
            "fp".repeat(32),
            AgentId::from("buyer-1"),
        )
    }

    #[test]
    fn hash_excludes_failure_event_and_final_hash() {
        let mut t = transcript();
        let before = t.compute_hash().unwrap();
        t.seal_failure(FailureCode::NoProviders, "none".into(), 1_000)
            .unwrap();
        t.final_hash = Some("whatever".into());
        assert_eq!(t.compute_hash().unwrap(), before);
        assert_eq!(
            t.failure_event.as_ref().unwrap().transcript_hash,
            before,
            "failure event must reference the pre-failure hash"
        );
    }

    #[test]
    fn hash_tracks_content() {
        let mut a = transcript();
        let before = a.compute_hash().unwrap();
        a.outcome = Outcome::failure(FailureCode::NoProviders, "none");
        assert_ne!(a.compute_hash().unwrap(), before);
    }

    #[test]
    fn identical_transcripts_hash_identically() {
        assert_eq!(
            transcript().compute_hash().unwrap(),
            transcript().compute_hash().unwrap()
        );
    }

    #[test]
    fn serde_roundtrip() {
        let mut t = transcript();
        t.settlement_lifecycle = Some(SettlementLifecycle {
            provider: "mock".into(),
            idempotency_key: "ab".repeat(32),
            status: LifecycleStatus::Pending,
            handle_id: Some(HandleId::new("h1")),
            prepared_at_ms: Some(1_000),
            committed_at_ms: None,
            aborted_at_ms: None,
            paid_amount: None,
            settlement_events: vec![SettlementEvent {
                at_ms: 1_000,
                kind: "lock".into(),
                detail: None,
            }],
            failure_code: None,
            failure_reason: None,
            errors: Vec::new(),
            routing: Some(RouteRecord {
                rail: "mock".into(),
                rule_index: None,
                rationale: "default_provider".into(),
            }),
        });
        let json = serde_json::to_string(&t).unwrap();
        let back: Transcript = serde_json::from_str(&json).unwrap();
        assert_eq!(t, back);
    }

    #[test]
    fn outcome_constructors() {
        assert!(Outcome::success().ok);
        let f = Outcome::failure(FailureCode::Pact331, "double commit");
        assert!(!f.ok);
        assert_eq!(f.code, Some(FailureCode::Pact331));
    }
}
