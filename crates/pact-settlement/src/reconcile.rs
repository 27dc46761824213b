//! Reconciliation of settlements left pending.
//!
//! A transcript whose lifecycle says `pending` and still holds a handle is
//! an open question the rail can answer later. Reconciliation asks exactly
//! once: one poll, one status update, one appended event. Deterministic —
//! same (lifecycle, rail state) gives the same outcome.

use tracing::info;

use pact_types::{LifecycleStatus, Result, SettlementEvent, SettlementLifecycle};

use crate::provider::{CommitStatus, SettlementRail};

/// What one reconciliation pass concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The lifecycle was not pending (or had no handle); nothing to do.
    NotPending,
    /// The rail reports the settlement landed.
    Committed,
    /// The rail reports the settlement failed.
    Failed,
    /// Still pending; try again later.
    StillPending,
}

/// Poll a pending lifecycle once and fold the answer back into it.
pub async fn reconcile_lifecycle(
    lifecycle: &mut SettlementLifecycle,
    rail: &dyn SettlementRail,
    now_ms: u64,
) -> Result<ReconcileOutcome> {
    if lifecycle.status != LifecycleStatus::Pending {
        return Ok(ReconcileOutcome::NotPending);
    }
    let Some(handle) = lifecycle.handle_id.clone() else {
        return Ok(ReconcileOutcome::NotPending);
    };

    let outcome = rail.poll(&handle).await?;
    let (result, event_detail) = match outcome.status {
        CommitStatus::Committed => {
            lifecycle.status = LifecycleStatus::Committed;
            lifecycle.committed_at_ms = Some(now_ms);
            lifecycle.paid_amount = outcome.paid_amount;
            (ReconcileOutcome::Committed, "committed".to_string())
        }
        CommitStatus::Failed => {
            lifecycle.status = LifecycleStatus::Failed;
            lifecycle.failure_code = outcome.failure_code;
            lifecycle.failure_reason = outcome.failure_reason.clone();
            (ReconcileOutcome::Failed, "failed".to_string())
        }
        CommitStatus::Pending => (ReconcileOutcome::StillPending, "still_pending".to_string()),
    };

    lifecycle.settlement_events.push(SettlementEvent {
        at_ms: now_ms,
        kind: "reconcile_poll".to_string(),
        detail: Some(event_detail),
    });
    info!(handle = %handle, status = %lifecycle.status, "reconciliation poll");
    Ok(result)
}
