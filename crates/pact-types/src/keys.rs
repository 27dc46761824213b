//! Ed25519 keypairs and base58 identity strings.
//!
//! The base58 public key is the canonical identity of every agent and
//! provider. Signing always happens over canonical message bytes; see
//! [`crate::envelope`].

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

use crate::error::{FailureCode, PactError, Result};

/// An ed25519 keypair owned by one agent.
///
/// The secret half never serializes; only [`Keypair::public_b58`] may enter
/// a transcript.
pub struct Keypair {
    signing: SigningKey,
}

impl Keypair {
    /// Deterministic keypair from a 32-byte seed. The path used by tests and
    /// by any caller that manages seeds externally.
    #[must_use]
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(&seed),
        }
    }

    /// Fresh keypair from OS entropy.
    #[cfg(any(test, feature = "test-helpers"))]
    #[must_use]
    pub fn generate() -> Self {
        let mut rng = rand::rngs::OsRng;
        Self {
            signing: SigningKey::generate(&mut rng),
        }
    }

    /// Base58 encoding of the public key — the canonical identity string.
    #[must_use]
    pub fn public_b58(&self) -> String {
        bs58::encode(self.signing.verifying_key().as_bytes()).into_string()
    }

    /// Sign raw bytes, returning the base58 signature.
    #[must_use]
    pub fn sign_b58(&self, bytes: &[u8]) -> String {
        bs58::encode(self.signing.sign(bytes).to_bytes()).into_string()
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Secret material must not leak through Debug.
        write!(f, "Keypair({})", self.public_b58())
    }
}

/// Verify a base58 signature over raw bytes under a base58 public key.
pub fn verify_b58(public_b58: &str, bytes: &[u8], signature_b58: &str) -> Result<()> {
    let key = decode_public_b58(public_b58)?;
    let sig_bytes: [u8; 64] = bs58::decode(signature_b58)
        .into_vec()
        .map_err(|e| bad_signature(format!("signature is not base58: {e}")))?
        .try_into()
        .map_err(|_| bad_signature("signature is not 64 bytes"))?;
    let signature = Signature::from_bytes(&sig_bytes);
    key.verify(bytes, &signature)
        .map_err(|_| bad_signature("ed25519 verification failed"))
}

/// Decode a base58 public key string into a verifying key.
pub fn decode_public_b58(public_b58: &str) -> Result<VerifyingKey> {
    let key_bytes: [u8; 32] = bs58::decode(public_b58)
        .into_vec()
        .map_err(|e| bad_signature(format!("public key is not base58: {e}")))?
        .try_into()
        .map_err(|_| bad_signature("public key is not 32 bytes"))?;
    VerifyingKey::from_bytes(&key_bytes)
        .map_err(|_| bad_signature("public key is not a valid ed25519 point"))
}

fn bad_signature(reason: impl Into<String>) -> PactError {
    PactError::new(FailureCode::ProviderSignatureInvalid, reason)
}
