//! Event runner, evidence records, and the failure taxonomy.
//!
//! Every observable step of an acquisition emits one [`Event`]. Handlers
//! run synchronously, in registration order, to completion — that is the
//! ordering guarantee the transcript commit gate relies on. Re-emitting an
//! idempotency key is a no-op.
//!
//! The taxonomy side ([`map_error`], [`should_retry_after_failure`]) is the
//! single place retry policy lives; the orchestrator never classifies
//! failures ad hoc.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use pact_types::{FailureCode, IntentId, PactError, Terminality};

/// Progress / success / failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Progress,
    Success,
    Failure,
}

/// An attached evidence record. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceRecord {
    pub phase: String,
    pub kind: String,
    pub data: Value,
}

/// One observable step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub phase: String,
    pub kind: EventKind,
    pub intent_id: IntentId,
    pub ts_ms: u64,
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<EvidenceRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_code: Option<FailureCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
    pub idempotency_key: String,
}

/// Derive the idempotency key every event carries.
#[must_use]
pub fn event_idempotency_key(
    fingerprint: &str,
    phase: &str,
    provider_id: Option<&str>,
    attempt_idx: usize,
) -> String {
    pact_types::sha256_hex_bytes(
        format!(
            "pact:event:{fingerprint}:{phase}:{}:{attempt_idx}",
            provider_id.unwrap_or("-")
        )
        .as_bytes(),
    )
}

/// A synchronous event observer.
pub trait EventHandler: Send {
    fn handle(&mut self, event: &Event);
}

/// Owns the handlers and the emitted-key set.
#[derive(Default)]
pub struct EventRunner {
    handlers: Vec<Box<dyn EventHandler>>,
    emitted: HashSet<String>,
    log: Vec<Event>,
}

impl EventRunner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Box<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    /// Emit one event. Handlers run to completion before this returns.
    /// Returns `false` (and does nothing) when the key was already emitted.
    pub fn emit(&mut self, event: Event) -> bool {
        if !self.emitted.insert(event.idempotency_key.clone()) {
            debug!(phase = %event.phase, "duplicate event suppressed");
            return false;
        }
        for handler in &mut self.handlers {
            handler.handle(&event);
        }
        self.log.push(event);
        true
    }

    /// Every event emitted so far, in order.
    #[must_use]
    pub fn log(&self) -> &[Event] {
        &self.log
    }
}

// ---------------------------------------------------------------------------
// Failure taxonomy
// ---------------------------------------------------------------------------

/// Which side of the system a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultDomain {
    Buyer,
    Provider,
    Rail,
    Policy,
    Network,
    Internal,
}

/// The classified shape of one failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureTaxonomy {
    pub code: FailureCode,
    pub stage: String,
    pub fault_domain: FaultDomain,
    pub terminality: Terminality,
    pub evidence_refs: Vec<String>,
}

/// Classify an error at a given stage.
#[must_use]
pub fn map_error(err: &PactError, stage: &str, evidence_refs: Vec<String>) -> FailureTaxonomy {
    FailureTaxonomy {
        code: err.code,
        stage: stage.to_string(),
        fault_domain: fault_domain_for(err.code),
        terminality: err.code.terminality(),
        evidence_refs,
    }
}

/// Whether the fallback loop should advance after this failure.
#[must_use]
pub fn should_retry_after_failure(code: FailureCode) -> bool {
    code.is_retryable()
}

fn fault_domain_for(code: FailureCode) -> FaultDomain {
    use FailureCode as F;
    match code {
        F::WalletConnectFailed | F::WalletCapabilityMissing | F::WalletProofFailed => {
            FaultDomain::Buyer
        }
        F::BuyerStopped => FaultDomain::Buyer,
        F::ZkKyaRequired
        | F::ZkKyaExpired
        | F::ZkKyaInvalid
        | F::ZkKyaTierTooLow
        | F::ZkKyaIssuerNotAllowed => FaultDomain::Buyer,
        F::SettlementFailed
        | F::SettlementPollTimeout
        | F::SettlementProviderNotImplemented
        | F::SettlementSlaViolation => FaultDomain::Rail,
        F::ProviderQuoteHttpError | F::HttpProviderError | F::HttpStreamingError => {
            FaultDomain::Network
        }
        F::InvalidPolicy
        | F::NoProviders
        | F::NoEligibleProviders
        | F::ProviderQuotePolicyRejected
        | F::ProviderQuoteOutOfBand => FaultDomain::Policy,
        F::Internal => FaultDomain::Internal,
        _ => FaultDomain::Provider,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    struct Counter {
        seen: std::sync::Arc<std::sync::Mutex<Vec<String>>>,
    }

    impl EventHandler for Counter {
        fn handle(&mut self, event: &Event) {
            self.seen.lock().unwrap().push(event.phase.clone());
        }
    }

    fn event(phase: &str, key: &str) -> Event {
        Event {
            phase: phase.into(),
            kind: EventKind::Progress,
            intent_id: IntentId::derive("fp", 0),
            ts_ms: 1_000,
            payload: json!({}),
            evidence: None,
            failure_code: None,
            failure_reason: None,
            retryable: None,
            idempotency_key: key.into(),
        }
    }

    #[test]
    fn handlers_run_in_order() {
        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut runner = EventRunner::new();
        runner.register(Box::new(Counter { seen: seen.clone() }));
        runner.emit(event("provider_discovery", "k1"));
        runner.emit(event("negotiation", "k2"));
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["provider_discovery".to_string(), "negotiation".to_string()]
        );
        assert_eq!(runner.log().len(), 2);
    }

    #[test]
    fn duplicate_key_is_noop() {
        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut runner = EventRunner::new();
        runner.register(Box::new(Counter { seen: seen.clone() }));
        assert!(runner.emit(event("settlement", "same")));
        assert!(!runner.emit(event("settlement", "same")));
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert_eq!(runner.log().len(), 1);
    }

    #[test]
    fn idempotency_key_varies_by_inputs() {
        let a = event_idempotency_key("fp", "settlement_commit", Some("prov-a"), 0);
        let b = event_idempotency_key("fp", "settlement_commit", Some("prov-a"), 1);
        let c = event_idempotency_key("fp", "settlement_commit", Some("prov-b"), 0);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, event_idempotency_key("fp", "settlement_commit", Some("prov-a"), 0));
    }

    #[test]
    fn taxonomy_classifies_rail_failures() {
        let err = PactError::new(FailureCode::SettlementFailed, "rail down");
        let tax = map_error(&err, "settlement_commit", vec!["ev-1".into()]);
        assert_eq!(tax.fault_domain, FaultDomain::Rail);
        assert_eq!(tax.terminality, Terminality::Retryable);
        assert!(should_retry_after_failure(tax.code));
    }

    #[test]
    fn taxonomy_classifies_terminal_policy_failures() {
        let err = PactError::new(FailureCode::InvalidPolicy, "bad band");
        let tax = map_error(&err, "policy_validation", Vec::new());
        assert_eq!(tax.fault_domain, FaultDomain::Policy);
        assert_eq!(tax.terminality, Terminality::Terminal);
    }

    #[test]
    fn poll_timeout_is_pending_not_retryable() {
        let err = PactError::new(FailureCode::SettlementPollTimeout, "pending");
        let tax = map_error(&err, "settlement_commit", Vec::new());
        assert_eq!(tax.terminality, Terminality::Pending);
        assert!(!should_retry_after_failure(tax.code));
    }
}
