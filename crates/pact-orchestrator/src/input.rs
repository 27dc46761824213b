//! The acquire input surface.
//!
//! Everything a caller can ask for in one acquisition. The struct
//! serializes with camelCase keys because it is recorded (sanitized) as
//! the transcript's `input` section.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use pact_policy::ZkKyaProof;
use pact_types::constants::{DEFAULT_ASSET_ID, DEFAULT_CHAIN_ID};
use pact_types::{
    Constraints, ExplainLevel, SettlementMode, TrustTier, WalletProviderKind,
};

/// Which asset settles the acquisition. Either the structured form
/// (`symbol`/`chain`/`decimals`) or the legacy pair (`asset_id`/`chain_id`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AssetSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decimals: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<String>,
}

impl AssetSpec {
    /// Resolve to `(asset_id, chain_id)`, modern form winning over legacy,
    /// defaults filling the rest.
    #[must_use]
    pub fn resolve(spec: Option<&AssetSpec>) -> (String, String) {
        let asset = spec
            .and_then(|s| s.symbol.clone().or_else(|| s.asset_id.clone()))
            .unwrap_or_else(|| DEFAULT_ASSET_ID.to_string());
        let chain = spec
            .and_then(|s| s.chain.clone().or_else(|| s.chain_id.clone()))
            .unwrap_or_else(|| DEFAULT_CHAIN_ID.to_string());
        (asset, chain)
    }
}

/// Buyer- and seller-side identity material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct IdentityInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buyer: Option<PartyIdentity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seller: Option<PartyIdentity>,
    #[serde(default)]
    pub require_wallet_proof: bool,
}

/// One party's identity claims.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PartyIdentity {
    #[serde(default)]
    pub credentials: Vec<String>,
    #[serde(default)]
    pub issuer_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zk_kya_proof: Option<ZkKyaProof>,
}

/// Wallet connection request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletInput {
    pub provider: WalletProviderKind,
    /// Adapter-specific parameters; may carry secrets, sanitized before
    /// any transcript write.
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub requires_signature: bool,
    #[serde(default)]
    pub requires_transaction_signature: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_action: Option<String>,
}

/// Settlement rail selection and tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SettlementInput {
    /// Rail name override ("mock", "stripe_like", "external"). Routing
    /// rules still apply when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default)]
    pub params: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_poll_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub split: Option<SplitInput>,
}

/// Split settlement request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitInput {
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_segments: Option<u32>,
}

/// Negotiation strategy selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct NegotiationInput {
    /// "baseline" | "banded_concession" | "aggressive_if_urgent" | "ml_stub"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    #[serde(default)]
    pub params: Value,
}

/// The complete acquire request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcquireInput {
    pub intent_type: String,
    pub scope: String,
    pub constraints: Constraints,
    pub max_price: Decimal,
    #[serde(default)]
    pub urgent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode_override: Option<SettlementMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buyer_stop_after_ticks: Option<u64>,
    #[serde(default)]
    pub explain: ExplainLevel,
    #[serde(default)]
    pub save_transcript: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset: Option<AssetSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<IdentityInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet: Option<WalletInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settlement: Option<SettlementInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negotiation: Option<NegotiationInput>,
    #[serde(default)]
    pub require_credential: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_trust_tier: Option<TrustTier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_trust_score: Option<f64>,
    #[serde(default)]
    pub use_reputation_v2: bool,
}

impl AcquireInput {
    /// A minimal well-formed input for the given intent.
    #[must_use]
    pub fn simple(
        intent_type: impl Into<String>,
        scope: impl Into<String>,
        constraints: Constraints,
        max_price: Decimal,
    ) -> Self {
        Self {
            intent_type: intent_type.into(),
            scope: scope.into(),
            constraints,
            max_price,
            urgent: false,
            mode_override: None,
            buyer_stop_after_ticks: None,
            explain: ExplainLevel::None,
            save_transcript: false,
            transcript_dir: None,
            asset: None,
            identity: None,
            wallet: None,
            settlement: None,
            negotiation: None,
            require_credential: false,
            min_trust_tier: None,
            min_trust_score: None,
            use_reputation_v2: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camel_case_wire_shape() {
        let input = AcquireInput::simple(
            "weather.data",
            "NYC",
            Constraints {
                latency_ms: 50,
                freshness_sec: 10,
            },
            Decimal::new(1, 4),
        );
        let json = serde_json::to_value(&input).unwrap();
        assert_eq!(json["intentType"], "weather.data");
        assert_eq!(json["maxPrice"], "0.0001");
        assert!(json.get("modeOverride").is_none());
    }

    #[test]
    fn asset_resolution_prefers_modern_form() {
        let spec = AssetSpec {
            symbol: Some("ETH".into()),
            chain: Some("ethereum".into()),
            decimals: Some(18),
            asset_id: Some("LEGACY".into()),
            chain_id: Some("legacy-chain".into()),
        };
        assert_eq!(
            AssetSpec::resolve(Some(&spec)),
            ("ETH".to_string(), "ethereum".to_string())
        );
    }

    #[test]
    fn asset_resolution_accepts_legacy_form() {
        let spec = AssetSpec {
            asset_id: Some("USDT".into()),
            chain_id: Some("tron".into()),
            ..AssetSpec::default()
        };
        assert_eq!(
            AssetSpec::resolve(Some(&spec)),
            ("USDT".to_string(), "tron".to_string())
        );
    }

    #[test]
    fn asset_resolution_defaults() {
        assert_eq!(
            AssetSpec::resolve(None),
            ("USDC".to_string(), "solana".to_string())
        );
    }

    #[test]
    fn input_roundtrip_with_overrides() {
        let mut input = AcquireInput::simple(
            "weather.data",
            "NYC",
            Constraints {
                latency_ms: 50,
                freshness_sec: 10,
            },
            Decimal::new(1, 4),
        );
        input.mode_override = Some(SettlementMode::Streaming);
        input.buyer_stop_after_ticks = Some(3);
        input.min_trust_tier = Some(TrustTier::Trusted);
        let json = serde_json::to_string(&input).unwrap();
        let back: AcquireInput = serde_json::from_str(&json).unwrap();
        assert_eq!(input, back);
    }
}
