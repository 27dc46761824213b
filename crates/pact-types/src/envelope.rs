//! Signed envelopes.
//!
//! Every on-the-wire message is carried in an [`Envelope`]: the message, the
//! signer's base58 public key, and an ed25519 signature over the canonical
//! serialization of the message. Invariant: `verify()` succeeding means the
//! signature matches `signer_public_key_b58` over `canonical(message)`.

use serde::{Deserialize, Serialize};

use crate::canonical::{canonical_bytes, sha256_hex_bytes, to_canonical_value};
use crate::error::{FailureCode, PactError, Result};
use crate::keys::{Keypair, verify_b58};
use crate::message::Message;

/// A signed wrapper carrying exactly one protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub message: Message,
    pub signer_public_key_b58: String,
    /// Base58 ed25519 signature over the canonical bytes of `message`.
    pub signature: String,
}

impl Envelope {
    /// Sign a message, producing a sealed envelope.
    pub fn seal(message: Message, keypair: &Keypair) -> Result<Self> {
        let bytes = canonical_bytes(&to_canonical_value(&message)?);
        Ok(Self {
            signer_public_key_b58: keypair.public_b58(),
            signature: keypair.sign_b58(&bytes),
            message,
        })
    }

    /// Verify the signature against the stated signer.
    pub fn verify(&self) -> Result<()> {
        let bytes = canonical_bytes(&to_canonical_value(&self.message)?);
        verify_b58(&self.signer_public_key_b58, &bytes, &self.signature)
    }

    /// Verify and additionally require a specific signer identity.
    ///
    /// A valid signature under the *wrong* key is a signer mismatch, not a
    /// signature failure — callers distinguish the two on the wire.
    pub fn verify_signer(&self, expected_public_b58: &str) -> Result<()> {
        self.verify()?;
        if self.signer_public_key_b58 != expected_public_b58 {
            return Err(PactError::new(
                FailureCode::ProviderSignerMismatch,
                format!(
                    "envelope signed by {} but expected {expected_public_b58}",
                    self.signer_public_key_b58
                ),
            ));
        }
        Ok(())
    }

    /// Stable hash of the whole envelope; the session replay guard keys on it.
    pub fn content_hash(&self) -> Result<String> {
        Ok(sha256_hex_bytes(&canonical_bytes(&to_canonical_value(
            self,
        )?)))
    }
}
