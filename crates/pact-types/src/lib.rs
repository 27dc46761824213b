//! # pact-types
//!
//! Shared types for the **PACT** agent-to-agent commerce core.
//!
//! This crate is the leaf dependency of the workspace — every other crate
//! depends on it. It defines:
//!
//! - **Identifiers**: [`IntentId`], [`AgentId`], [`ProviderId`], [`HandleId`], [`DisputeId`]
//! - **Canonicalization**: [`canonical_json`], [`sha256_hex`] — the single root of signing and hashing
//! - **Keys & envelopes**: [`Keypair`], [`Envelope`], [`Message`]
//! - **Intent model**: [`Intent`], [`Constraints`], [`SettlementMode`], [`Agreement`]
//! - **Receipt model**: [`Receipt`]
//! - **Candidate model**: [`CandidateEvaluation`], [`TrustTier`]
//! - **Transcript model**: [`Transcript`] and its per-section records
//! - **Policy document**: [`PolicyDoc`] and its sections
//! - **Wallet model**: [`WalletCapabilities`], [`WalletRecord`]
//! - **Errors**: [`PactError`] and the stable [`FailureCode`] vocabulary
//! - **Clock**: [`Clock`] — injectable monotonic milliseconds, no wall-clock reads
//! - **Constants**: protocol-wide limits and defaults

pub mod cancel;
pub mod candidate;
pub mod canonical;
pub mod clock;
pub mod constants;
pub mod envelope;
pub mod error;
pub mod fingerprint;
pub mod ids;
pub mod intent;
pub mod keys;
pub mod message;
pub mod policy;
pub mod receipt;
pub mod transcript;
pub mod wallet;

// Re-export all primary types at crate root for ergonomic imports:
//   use pact_types::{Envelope, Intent, Receipt, Transcript, ...};

pub use cancel::*;
pub use candidate::*;
pub use canonical::*;
pub use clock::*;
pub use envelope::*;
pub use error::*;
pub use fingerprint::*;
pub use ids::*;
pub use intent::*;
pub use keys::*;
pub use message::*;
pub use policy::*;
pub use receipt::*;
pub use transcript::*;
pub use wallet::*;

// Constants are accessed via `pact_types::constants::FOO`
// (not re-exported to avoid name collisions).
