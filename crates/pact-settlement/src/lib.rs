//! # pact-settlement
//!
//! The settlement plane of the PACT core:
//!
//! - **[`SettlementRail`]**: the uniform async interface over pluggable
//!   rails (lock / credit / debit / commit / poll / abort / refund). Every
//!   mutating call takes an idempotency key; repeating a key replays the
//!   recorded outcome instead of re-applying effects.
//! - **[`MockRail`]**: in-memory rail with failure injection and top-up
//!   simulation.
//! - **[`StripeLikeRail`]**: asynchronous rail whose commits stay pending
//!   until polled, exercising the bounded-poll path.
//! - **[`ExternalRail`]**: stub that reports
//!   `SETTLEMENT_PROVIDER_NOT_IMPLEMENTED`, driving fallback.
//! - **[`SettlementRouter`]**: first-match walk over the policy's routing
//!   rules.
//! - **[`SlaTracker`]**: pending-time and poll-attempt bounds.
//! - **[`reconcile_lifecycle`]**: one poll for transcripts left pending.

pub mod external;
pub mod idempotency;
pub mod mock;
pub mod provider;
pub mod reconcile;
pub mod router;
pub mod sla;
pub mod stripe_like;

pub use external::*;
pub use idempotency::*;
pub use mock::*;
pub use provider::*;
pub use reconcile::*;
pub use router::*;
pub use sla::*;
pub use stripe_like::*;
