//! Wallet adapters.
//!
//! The adapter owns key custody; the orchestrator only ever sees an
//! address, a capability set, and (when asked for proof-of-control) a
//! signature it immediately reduces to a hash. Secrets never cross the
//! adapter boundary.

use async_trait::async_trait;
use serde_json::Value;

use pact_types::{
    FailureCode, PactError, Result, WalletCapabilities, WalletProviderKind, WalletSession,
    sha256_hex_bytes,
};

/// Connects wallets and signs proof-of-control messages.
#[async_trait]
pub trait WalletAdapter: Send + Sync {
    fn kind(&self) -> WalletProviderKind;

    /// Establish a session on a chain. `params` comes straight from the
    /// acquire input and may hold secrets; it must not escape the adapter.
    async fn connect(&self, chain: &str, params: &Value) -> Result<WalletSession>;

    /// Sign an arbitrary message for proof-of-control.
    async fn sign_message(&self, session: &WalletSession, message: &[u8]) -> Result<String>;
}

/// Deterministic wallet for tests and local runs. The address derives from
/// the connect params' `seed` (or the chain name), so runs are replayable.
#[derive(Debug, Clone, Copy, Default)]
pub struct TestWallet;

#[async_trait]
impl WalletAdapter for TestWallet {
    fn kind(&self) -> WalletProviderKind {
        WalletProviderKind::Test
    }

    async fn connect(&self, chain: &str, params: &Value) -> Result<WalletSession> {
        let seed = params
            .get("seed")
            .and_then(Value::as_str)
            .unwrap_or(chain);
        let address = format!("0x{}", &sha256_hex_bytes(seed.as_bytes())[..40]);
        Ok(WalletSession {
            kind: WalletProviderKind::Test,
            chain: chain.to_string(),
            address,
            capabilities: WalletCapabilities {
                can_sign_message: true,
                can_sign_transaction: true,
                supported_chains: vec![chain.to_string()],
                supported_assets: vec!["USDC".into(), "ETH".into(), "SOL".into()],
            },
        })
    }

    async fn sign_message(&self, session: &WalletSession, message: &[u8]) -> Result<String> {
        // Deterministic stand-in for a real signature.
        let mut bound = session.address.clone().into_bytes();
        bound.extend_from_slice(message);
        Ok(sha256_hex_bytes(&bound))
    }
}

/// Placeholder for wallets the deployment has not wired up.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExternalWallet {
    pub kind: WalletProviderKind,
}

impl ExternalWallet {
    #[must_use]
    pub fn new(kind: WalletProviderKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl WalletAdapter for ExternalWallet {
    fn kind(&self) -> WalletProviderKind {
        self.kind
    }

    async fn connect(&self, _chain: &str, _params: &Value) -> Result<WalletSession> {
        Err(PactError::new(
            FailureCode::WalletConnectFailed,
            format!("no adapter wired for wallet provider {}", self.kind),
        ))
    }

    async fn sign_message(&self, _session: &WalletSession, _message: &[u8]) -> Result<String> {
        Err(PactError::new(
            FailureCode::WalletProofFailed,
            "external wallet cannot sign",
        ))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_wallet_address_is_deterministic() {
        let wallet = TestWallet;
        let a = wallet
            .connect("ethereum", &json!({"seed": "alpha"}))
            .await
            .unwrap();
        let b = wallet
            .connect("ethereum", &json!({"seed": "alpha"}))
            .await
            .unwrap();
        assert_eq!(a.address, b.address);
        assert!(a.address.starts_with("0x"));
        assert_eq!(a.address.len(), 42);
    }

    #[tokio::test]
    async fn different_seeds_different_addresses() {
        let wallet = TestWallet;
        let a = wallet.connect("ethereum", &json!({"seed": "alpha"})).await.unwrap();
        let b = wallet.connect("ethereum", &json!({"seed": "beta"})).await.unwrap();
        assert_ne!(a.address, b.address);
    }

    #[tokio::test]
    async fn proof_of_control_signature_is_stable() {
        let wallet = TestWallet;
        let session = wallet.connect("solana", &json!({})).await.unwrap();
        let a = wallet.sign_message(&session, b"prove").await.unwrap();
        let b = wallet.sign_message(&session, b"prove").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn external_wallet_fails_to_connect() {
        let wallet = ExternalWallet::new(WalletProviderKind::Metamask);
        let err = wallet.connect("ethereum", &json!({})).await.unwrap_err();
        assert_eq!(err.code, FailureCode::WalletConnectFailed);
    }
}
