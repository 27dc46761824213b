//! Settlement SLA tracking.
//!
//! When enabled, commits and polls are bounded in time and attempt count.
//! The tracker records violations; the orchestrator decides what they cost
//! (a penalty receipt against the seller when the policy says so).

use pact_types::{SlaPolicy, SlaReport, SlaViolation, SlaViolationKind};

/// Tracks one settlement's SLA against the policy bounds.
#[derive(Debug, Clone)]
pub struct SlaTracker {
    policy: SlaPolicy,
    prepared_at_ms: Option<u64>,
    violations: Vec<SlaViolation>,
}

impl SlaTracker {
    #[must_use]
    pub fn new(policy: SlaPolicy) -> Self {
        Self {
            policy,
            prepared_at_ms: None,
            violations: Vec::new(),
        }
    }

    #[must_use]
    pub fn policy(&self) -> &SlaPolicy {
        &self.policy
    }

    /// Record the moment funds were locked. Pending time counts from here.
    pub fn record_prepared(&mut self, now_ms: u64) {
        self.prepared_at_ms = Some(now_ms);
    }

    /// Check the pending-time bound. Records and returns a violation when
    /// the settlement has been pending longer than allowed.
    pub fn check_pending(&mut self, now_ms: u64) -> Option<&SlaViolation> {
        if !self.policy.enabled {
            return None;
        }
        let prepared = self.prepared_at_ms?;
        let pending_for = now_ms.saturating_sub(prepared);
        if pending_for <= self.policy.max_pending_ms {
            return None;
        }
        self.violations.push(SlaViolation {
            kind: SlaViolationKind::MaxPendingExceeded,
            at_ms: now_ms,
            detail: format!(
                "settlement pending {pending_for}ms exceeds max_pending_ms {}",
                self.policy.max_pending_ms
            ),
        });
        self.violations.last()
    }

    /// Record that bounded polling ran out of attempts.
    pub fn record_poll_exhausted(&mut self, now_ms: u64, attempts: u32) {
        if !self.policy.enabled {
            return;
        }
        self.violations.push(SlaViolation {
            kind: SlaViolationKind::PollAttemptsExhausted,
            at_ms: now_ms,
            detail: format!(
                "{attempts} poll attempts exhausted (max {})",
                self.policy.max_poll_attempts
            ),
        });
    }

    #[must_use]
    pub fn violations(&self) -> &[SlaViolation] {
        &self.violations
    }

    #[must_use]
    pub fn has_violations(&self) -> bool {
        !self.violations.is_empty()
    }

    /// The transcript section.
    #[must_use]
    pub fn into_report(self) -> SlaReport {
        SlaReport {
            violations: self.violations,
        }
    }
}
