//! Candidate provider records produced by the evaluation pipeline.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ids::ProviderId;

/// Coarse trust label derived from the trust score and issuer list.
///
/// The derive order gives the policy ordering: untrusted < low < trusted.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum TrustTier {
    #[default]
    Untrusted,
    Low,
    Trusted,
}

impl TrustTier {
    /// Parse the policy-file spelling.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "untrusted" => Some(Self::Untrusted),
            "low" => Some(Self::Low),
            "trusted" => Some(Self::Trusted),
            _ => None,
        }
    }
}

impl std::fmt::Display for TrustTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Untrusted => write!(f, "untrusted"),
            Self::Low => write!(f, "low"),
            Self::Trusted => write!(f, "trusted"),
        }
    }
}

/// Everything the orchestrator learned about one provider while evaluating
/// it: identity, credentials, trust, quote, and the ranking utility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateEvaluation {
    pub provider_id: ProviderId,
    pub pubkey_b58: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Claims carried by the verified credential, empty when none.
    pub credentials: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    pub baseline_latency_ms: u64,
    /// Weighted KYA score in [0, 1].
    pub trust_score: f64,
    pub trust_tier: TrustTier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ask_price: Option<Decimal>,
    /// Ranking utility; higher wins. Absent when the candidate was excluded
    /// before quoting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utility: Option<f64>,
    pub reputation: f64,
    pub has_required_credentials: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_ordering() {
        assert!(TrustTier::Untrusted < TrustTier::Low);
        assert!(TrustTier::Low < TrustTier::Trusted);
    }

    #[test]
    fn tier_parse_roundtrip() {
        for tier in [TrustTier::Untrusted, TrustTier::Low, TrustTier::Trusted] {
            assert_eq!(TrustTier::parse(&tier.to_string()), Some(tier));
        }
        assert_eq!(TrustTier::parse("medium"), None);
    }

    #[test]
    fn tier_serde_spelling() {
        assert_eq!(
            serde_json::to_string(&TrustTier::Trusted).unwrap(),
            "\"trusted\""
        );
    }

    #[test]
    fn evaluation_serde_roundtrip() {
        let eval = CandidateEvaluation {
            provider_id: ProviderId::from("prov-a"),
            pubkey_b58: "3abc".into(),
            endpoint: None,
            credentials: vec!["kya:verified".into()],
            region: Some("us-east".into()),
            baseline_latency_ms: 40,
            trust_score: 0.8,
            trust_tier: TrustTier::Trusted,
            ask_price: Some(Decimal::new(8, 5)),
            utility: Some(-0.00008),
            reputation: 0.5,
            has_required_credentials: true,
        };
        let json = serde_json::to_string(&eval).unwrap();
        let back: CandidateEvaluation = serde_json::from_str(&json).unwrap();
        assert_eq!(eval, back);
    }
}
