//! Cooperative cancellation.
//!
//! The orchestrator observes the token between phases — before each
//! candidate evaluation, between streaming ticks, before settlement commit.
//! Cancellation after the transcript commits is ignored: the attempt has
//! already succeeded.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{FailureCode, PactError, Result};

/// Cloneable cancellation flag shared between the caller and the run.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Error out if cancellation was requested.
    pub fn checkpoint(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(PactError::new(
                FailureCode::NegotiationFailed,
                "cancelled by caller",
            ));
        }
        Ok(())
    }
}
