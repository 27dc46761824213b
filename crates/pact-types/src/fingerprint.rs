//! Intent and contention fingerprints.
//!
//! The intent fingerprint identifies an *economic intent* — stable across
//! retries of the same acquisition — and is the key for at-most-one-commit
//! enforcement. The contention fingerprint is the evidence ref for winner
//! exclusivity.

use serde_json::json;

use crate::canonical::sha256_hex;
use crate::ids::AgentId;
use crate::intent::Constraints;

/// Deterministic SHA-256 over the canonical form of
/// `{intent_type, scope (normalized), constraints, buyer_agent_id}`.
///
/// Scope normalization: trimmed and lower-cased, so `"NYC"` and `" nyc "`
/// name the same economic intent.
#[must_use]
pub fn intent_fingerprint(
    intent_type: &str,
    scope: &str,
    constraints: &Constraints,
    buyer_agent_id: &AgentId,
) -> String {
    let value = json!({
        "intent_type": intent_type,
        "scope": scope.trim().to_lowercase(),
        "constraints": {
            "latency_ms": constraints.latency_ms,
            "freshness_sec": constraints.freshness_sec,
        },
        "buyer_agent_id": buyer_agent_id.as_str(),
    });
    sha256_hex(&value)
}

/// Fingerprint of `{intent_type, policy_hash, buyer_id}` recorded with the
/// contention winner.
#[must_use]
pub fn contention_fingerprint(intent_type: &str, policy_hash: &str, buyer_id: &AgentId) -> String {
    let value = json!({
        "intent_type": intent_type,
        "policy_hash": policy_hash,
        "buyer_id": buyer_id.as_str(),
    });
    sha256_hex(&value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constraints() -> Constraints {
        Constraints {
            latency_ms: 50,
            freshness_sec: 10,
        }
    }

    #[test]
    fn stable_across_retries() {
        let buyer = AgentId::from("buyer-1");
        let a = intent_fingerprint("weather.data", "NYC", &constraints(), &buyer);
        let b = intent_fingerprint("weather.data", "NYC", &constraints(), &buyer);
        assert_eq!(a, b);
    }

    #[test]
    fn scope_is_normalized() {
        let buyer = AgentId::from("buyer-1");
        let a = intent_fingerprint("weather.data", "NYC", &constraints(), &buyer);
        let b = intent_fingerprint("weather.data", "  nyc ", &constraints(), &buyer);
        assert_eq!(a, b);
    }

    #[test]
    fn differs_by_buyer() {
        let a = intent_fingerprint("weather.data", "NYC", &constraints(), &AgentId::from("b1"));
        let b = intent_fingerprint("weather.data", "NYC", &constraints(), &AgentId::from("b2"));
        assert_ne!(a, b);
    }

    #[test]
    fn differs_by_constraints() {
        let buyer = AgentId::from("buyer-1");
        let tighter = Constraints {
            latency_ms: 10,
            freshness_sec: 10,
        };
        let a = intent_fingerprint("weather.data", "NYC", &constraints(), &buyer);
        let b = intent_fingerprint("weather.data", "NYC", &tighter, &buyer);
        assert_ne!(a, b);
    }

    #[test]
    fn contention_fingerprint_stable() {
        let buyer = AgentId::from("buyer-1");
        let a = contention_fingerprint("weather.data", "abc", &buyer);
        let b = contention_fingerprint("weather.data", "abc", &buyer);
        assert_eq!(a, b);
        assert_ne!(a, contention_fingerprint("weather.data", "def", &buyer));
    }
}
