//! # pact-policy
//!
//! The declarative policy machinery of the PACT core:
//!
//! - **Compiler** ([`compile`]): validates a [`pact_types::PolicyDoc`] and
//!   produces a [`CompiledPolicy`] with its canonical hash.
//! - **Guard** ([`PolicyGuard`]): answers identity / negotiation / settlement
//!   questions. Pure and side-effect-free: same inputs, same verdict.
//! - **Trust** ([`assess_trust`]): Know-Your-Agent scoring over issuer
//!   weights, claim completeness, region and mode match.
//! - **ZK-KYA** ([`enforce_zk_kya`]): optional zero-knowledge attestation
//!   gate with stable failure codes.
//! - **Reputation** ([`ReputationStore`]): receipt log, agent scores, price
//!   percentiles, and the intent-fingerprint commit registry — the one
//!   resource shared across runs.

pub mod compiler;
pub mod guard;
pub mod reputation;
pub mod trust;
pub mod zk;

pub use compiler::*;
pub use guard::*;
pub use reputation::*;
pub use trust::*;
pub use zk::*;
