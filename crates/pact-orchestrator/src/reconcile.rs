//! Transcript-level reconciliation.
//!
//! Takes a transcript left `pending` by SETTLEMENT_POLL_TIMEOUT, polls the
//! rail once through the settlement-plane reconciler, folds the answer
//! back into the transcript, and rewrites the file.

use std::path::Path;

use tracing::info;

use pact_settlement::{ReconcileOutcome, SettlementRail, reconcile_lifecycle};
use pact_types::{LifecycleStatus, Outcome, Result};

use crate::transcript_store::TranscriptStore;

/// Reconcile one pending transcript file in place.
///
/// Returns the outcome of the poll; `NotPending` when the transcript had
/// nothing to reconcile.
pub async fn reconcile_transcript_file(
    path: &Path,
    rail: &dyn SettlementRail,
    now_ms: u64,
) -> Result<ReconcileOutcome> {
    let mut transcript = TranscriptStore::load(path)?;
    let Some(lifecycle) = transcript.settlement_lifecycle.as_mut() else {
        return Ok(ReconcileOutcome::NotPending);
    };

    let outcome = reconcile_lifecycle(lifecycle, rail, now_ms).await?;
    match outcome {
        ReconcileOutcome::Committed => {
            let paid = lifecycle.paid_amount;
            if let Some(receipt) = transcript.receipt.as_mut() {
                if let Some(paid) = paid {
                    receipt.paid_amount = paid;
                    receipt.fulfilled = true;
                    receipt.failure_code = None;
                }
            }
            transcript.outcome = Outcome::success();
        }
        ReconcileOutcome::Failed => {
            let code = lifecycle
                .failure_code
                .unwrap_or(pact_types::FailureCode::SettlementFailed);
            let reason = lifecycle
                .failure_reason
                .clone()
                .unwrap_or_else(|| "settlement failed during reconciliation".into());
            transcript.outcome = Outcome::failure(code, reason);
        }
        ReconcileOutcome::StillPending | ReconcileOutcome::NotPending => {}
    }

    if outcome != ReconcileOutcome::NotPending {
        TranscriptStore::rewrite(path, &mut transcript)?;
        info!(path = %path.display(), ?outcome, "transcript reconciled");
    }
    Ok(outcome)
}
