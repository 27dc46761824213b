//! Optional zero-knowledge KYA gate.
//!
//! When policy demands it, the buyer supplies a proof that some issuer
//! attested to its tier without revealing the underlying credential. The
//! orchestrator converts whatever the wallet produced into the canonical
//! record below and asks a verifier. Failure codes are stable.

use serde::{Deserialize, Serialize};

use pact_types::{
    FailureCode, PactError, Result, TrustTier, ZkKyaPolicy, sha256_hex_bytes,
};

/// Canonical zero-knowledge attestation record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZkKyaProof {
    pub scheme: String,
    pub circuit_id: String,
    pub issuer_id: String,
    pub public_inputs_hash: String,
    pub proof_hash: String,
    /// The tier the proof attests to.
    pub tier: TrustTier,
    pub expires_at_ms: u64,
}

impl ZkKyaProof {
    /// The hash a well-formed proof must carry: a binding over scheme,
    /// circuit, issuer, and public inputs.
    #[must_use]
    pub fn expected_proof_hash(&self) -> String {
        let binding = format!(
            "pact:zk:v1:{}:{}:{}:{}",
            self.scheme, self.circuit_id, self.issuer_id, self.public_inputs_hash
        );
        sha256_hex_bytes(binding.as_bytes())
    }
}

/// Verifies a canonical proof record. The core ships a hash-binding
/// verifier; real deployments plug in a circuit-aware one.
pub trait ZkVerifier: Send + Sync {
    fn verify(&self, proof: &ZkKyaProof) -> bool;
}

/// Checks that `proof_hash` matches the canonical binding. Catches
/// malformed or tampered records; cryptographic soundness is the
/// production verifier's job.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashBindingVerifier;

impl ZkVerifier for HashBindingVerifier {
    fn verify(&self, proof: &ZkKyaProof) -> bool {
        proof.proof_hash == proof.expected_proof_hash()
    }
}

/// Enforce the policy's ZK-KYA requirement against an optional proof.
pub fn enforce_zk_kya(
    policy: &ZkKyaPolicy,
    proof: Option<&ZkKyaProof>,
    verifier: &dyn ZkVerifier,
    now_ms: u64,
) -> Result<()> {
    if !policy.required {
        return Ok(());
    }
    let Some(proof) = proof else {
        return Err(PactError::new(
            FailureCode::ZkKyaRequired,
            "policy requires a ZK-KYA proof and none was supplied",
        ));
    };
    if now_ms >= proof.expires_at_ms {
        return Err(PactError::new(
            FailureCode::ZkKyaExpired,
            format!("proof expired at {}ms", proof.expires_at_ms),
        ));
    }
    if !policy.allowed_issuers.is_empty() && !policy.allowed_issuers.contains(&proof.issuer_id) {
        return Err(PactError::new(
            FailureCode::ZkKyaIssuerNotAllowed,
            format!("issuer {} is not allowlisted", proof.issuer_id),
        ));
    }
    if !verifier.verify(proof) {
        return Err(PactError::new(
            FailureCode::ZkKyaInvalid,
            "proof did not verify",
        ));
    }
    if proof.tier < policy.min_tier {
        return Err(PactError::new(
            FailureCode::ZkKyaTierTooLow,
            format!(
                "proof attests tier {} but policy requires {}",
                proof.tier, policy.min_tier
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ZkKyaPolicy {
        ZkKyaPolicy {
            required: true,
            allowed_issuers: vec!["pact-ca".into()],
            min_tier: TrustTier::Low,
        }
    }

    fn valid_proof() -> ZkKyaProof {
        let mut proof = ZkKyaProof {
            scheme: "groth16".into(),
            circuit_id: "kya-v1".into(),
            issuer_id: "pact-ca".into(),
            public_inputs_hash: "ab".repeat(32),
            proof_hash: String::new(),
            tier: TrustTier::Trusted,
            expires_at_ms: 1_000_000,
        };
        proof.proof_hash = proof.expected_proof_hash();
        proof
    }

    #[test]
    fn not_required_passes_without_proof() {
        let mut p = policy();
        p.required = false;
        enforce_zk_kya(&p, None, &HashBindingVerifier, 0).unwrap();
    }

    #[test]
    fn missing_proof_is_required_code() {
        let err = enforce_zk_kya(&policy(), None, &HashBindingVerifier, 0).unwrap_err();
        assert_eq!(err.code, FailureCode::ZkKyaRequired);
    }

    #[test]
    fn valid_proof_passes() {
        enforce_zk_kya(&policy(), Some(&valid_proof()), &HashBindingVerifier, 0).unwrap();
    }

    #[test]
    fn expired_proof_rejected() {
        let err = enforce_zk_kya(
            &policy(),
            Some(&valid_proof()),
            &HashBindingVerifier,
            2_000_000,
        )
        .unwrap_err();
        assert_eq!(err.code, FailureCode::ZkKyaExpired);
    }

    #[test]
    fn disallowed_issuer_rejected() {
        let mut proof = valid_proof();
        proof.issuer_id = "other-ca".into();
        proof.proof_hash = proof.expected_proof_hash();
        let err = enforce_zk_kya(&policy(), Some(&proof), &HashBindingVerifier, 0).unwrap_err();
        assert_eq!(err.code, FailureCode::ZkKyaIssuerNotAllowed);
    }

    #[test]
    fn tampered_proof_rejected() {
        let mut proof = valid_proof();
        proof.proof_hash = "00".repeat(32);
        let err = enforce_zk_kya(&policy(), Some(&proof), &HashBindingVerifier, 0).unwrap_err();
        assert_eq!(err.code, FailureCode::ZkKyaInvalid);
    }

    #[test]
    fn tier_too_low_rejected() {
        let mut p = policy();
        p.min_tier = TrustTier::Trusted;
        let mut proof = valid_proof();
        proof.tier = TrustTier::Low;
        let err = enforce_zk_kya(&p, Some(&proof), &HashBindingVerifier, 0).unwrap_err();
        assert_eq!(err.code, FailureCode::ZkKyaTierTooLow);
    }
}
