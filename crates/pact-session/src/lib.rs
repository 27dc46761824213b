//! # pact-session
//!
//! The buyer-side negotiation machinery:
//!
//! - **[`Session`]**: the INTENT → ASK → COUNTER* → ACCEPT → COMMIT →
//!   REVEAL state machine, with signed envelopes, replay protection, fund
//!   locking, and hash-reveal verification.
//! - **Strategies** ([`decide`]): four deterministic counteroffer policies
//!   — baseline, banded_concession, aggressive_if_urgent, ml_stub.
//! - **[`StreamingExchange`]**: tick-driven pay-as-you-go settlement with a
//!   bounded budget, signed chunks, and cumulative state that survives
//!   fallback across providers.

pub mod session;
pub mod strategy;
pub mod streaming;

pub use session::*;
pub use strategy::*;
pub use streaming::*;
