//! Identifiers used throughout PACT.
//!
//! Every id that lands in a transcript is derived deterministically
//! (SHA-256 → first 16 bytes → UUID), so two runs with identical inputs and
//! an injected clock produce byte-identical transcripts. `Uuid::now_v7()`
//! appears only on test-helper paths that never feed a transcript.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// IntentId
// ---------------------------------------------------------------------------

/// Globally unique identifier for one acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct IntentId(pub Uuid);

impl IntentId {
    /// Deterministic `IntentId` from the intent fingerprint and send time.
    ///
    /// Every rerun of the same economic intent at the same clock reading
    /// derives the **exact same** id — the anchor of transcript determinism.
    #[must_use]
    pub fn derive(fingerprint_hex: &str, sent_at_ms: u64) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"pact:intent_id:v3:");
        hasher.update(fingerprint_hex.as_bytes());
        hasher.update(sent_at_ms.to_le_bytes());
        let hash = hasher.finalize();
        let bytes: [u8; 16] = hash[..16].try_into().expect("SHA-256 produces 32 bytes");
        Self(Uuid::from_bytes(bytes))
    }

    /// Fresh random id for tests that don't care about determinism.
    #[cfg(any(test, feature = "test-helpers"))]
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for IntentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// AgentId
// ---------------------------------------------------------------------------

/// Short opaque label for a buyer or seller agent.
///
/// The ed25519 public key is the canonical identity; the label exists for
/// transcripts and logs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct AgentId(pub String);

impl AgentId {
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// ProviderId
// ---------------------------------------------------------------------------

/// Short opaque label for a provider in the directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ProviderId(pub String);

impl ProviderId {
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// HandleId
// ---------------------------------------------------------------------------

/// Opaque handle a settlement rail returns for a lock, used by
/// commit / poll / abort and preserved for reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct HandleId(pub String);

impl HandleId {
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// DisputeId
// ---------------------------------------------------------------------------

/// Identifier of an open dispute; doubles as the refund idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct DisputeId(pub String);

impl DisputeId {
    /// Deterministic dispute id from the disputed receipt and open time.
    #[must_use]
    pub fn derive(receipt_hash_hex: &str, opened_at_ms: u64) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"pact:dispute_id:v3:");
        hasher.update(receipt_hash_hex.as_bytes());
        hasher.update(opened_at_ms.to_le_bytes());
        Self(format!("dsp_{}", hex::encode(&hasher.finalize()[..12])))
    }
}

impl fmt::Display for DisputeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intent_id_deterministic() {
        let a = IntentId::derive("abc123", 1000);
        let b = IntentId::derive("abc123", 1000);
        assert_eq!(a, b);
        let c = IntentId::derive("abc123", 2000);
        assert_ne!(a, c);
    }

    #[test]
    fn intent_id_differs_by_fingerprint() {
        let a = IntentId::derive("fp-one", 0);
        let b = IntentId::derive("fp-two", 0);
        assert_ne!(a, b);
    }

    #[test]
    fn dispute_id_prefix_and_determinism() {
        let a = DisputeId::derive("deadbeef", 5000);
        let b = DisputeId::derive("deadbeef", 5000);
        assert_eq!(a, b);
        assert!(a.0.starts_with("dsp_"));
    }

    #[test]
    fn agent_id_display() {
        assert_eq!(AgentId::from("buyer-1").to_string(), "buyer-1");
    }

    #[test]
    fn serde_roundtrips() {
        let id = IntentId::derive("fp", 42);
        let json = serde_json::to_string(&id).unwrap();
        let back: IntentId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);

        let pid = ProviderId::from("prov-a");
        let json = serde_json::to_string(&pid).unwrap();
        let back: ProviderId = serde_json::from_str(&json).unwrap();
        assert_eq!(pid, back);
    }
}
