//! Wallet model: adapter kinds, capabilities, and the sanitized transcript
//! record.
//!
//! Wallet *parameters* may carry secret material; only the types in this
//! module — which hold no secrets — are allowed anywhere near a transcript.

use serde::{Deserialize, Serialize};

/// Which wallet adapter backs a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum WalletProviderKind {
    #[serde(rename = "test")]
    #[default]
    Test,
    #[serde(rename = "ethers")]
    Ethers,
    #[serde(rename = "solana-keypair")]
    SolanaKeypair,
    #[serde(rename = "metamask")]
    Metamask,
    #[serde(rename = "coinbase")]
    Coinbase,
    #[serde(rename = "external")]
    External,
}

impl std::fmt::Display for WalletProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Test => "test",
            Self::Ethers => "ethers",
            Self::SolanaKeypair => "solana-keypair",
            Self::Metamask => "metamask",
            Self::Coinbase => "coinbase",
            Self::External => "external",
        };
        f.write_str(s)
    }
}

/// What a connected wallet can do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct WalletCapabilities {
    pub can_sign_message: bool,
    pub can_sign_transaction: bool,
    pub supported_chains: Vec<String>,
    pub supported_assets: Vec<String>,
}

impl WalletCapabilities {
    /// Whether the wallet supports the given chain.
    #[must_use]
    pub fn supports_chain(&self, chain: &str) -> bool {
        self.supported_chains.iter().any(|c| c == chain)
    }
}

/// A live wallet connection, as returned by an adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletSession {
    pub kind: WalletProviderKind,
    pub chain: String,
    pub address: String,
    pub capabilities: WalletCapabilities,
}

/// Metadata about a proof-of-control signature. The signature itself is
/// hashed; raw signatures over wallet keys never enter a transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureMetadata {
    pub action: String,
    pub signature_hash_hex: String,
}

/// The transcript's wallet section — sanitized by construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletRecord {
    pub kind: WalletProviderKind,
    pub chain: String,
    pub address: String,
    /// Whether the wallet was actually exercised during settlement.
    pub used: bool,
    pub capabilities: WalletCapabilities,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_metadata: Option<SignatureMetadata>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_wire_spellings() {
        assert_eq!(
            serde_json::to_string(&WalletProviderKind::SolanaKeypair).unwrap(),
            "\"solana-keypair\""
        );
        assert_eq!(
            serde_json::to_string(&WalletProviderKind::Test).unwrap(),
            "\"test\""
        );
    }

    #[test]
    fn capabilities_chain_check() {
        let caps = WalletCapabilities {
            can_sign_message: true,
            can_sign_transaction: false,
            supported_chains: vec!["ethereum".into(), "solana".into()],
            supported_assets: vec!["USDC".into()],
        };
        assert!(caps.supports_chain("solana"));
        assert!(!caps.supports_chain("polygon"));
    }

    #[test]
    fn record_roundtrip() {
        let rec = WalletRecord {
            kind: WalletProviderKind::Test,
            chain: "solana".into(),
            address: "addr1".into(),
            used: true,
            capabilities: WalletCapabilities::default(),
            signature_metadata: Some(SignatureMetadata {
                action: "prove-control".into(),
                signature_hash_hex: "ab".repeat(32),
            }),
        };
        let json = serde_json::to_string(&rec).unwrap();
        let back: WalletRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(rec, back);
    }
}
