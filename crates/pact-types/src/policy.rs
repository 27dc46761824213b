//! The declarative policy document.
//!
//! A policy groups everything the buyer's operator declares ahead of time:
//! who may be a counterparty, how hard to negotiate, what bonds to demand,
//! how settlement routes, and the trust floor providers must clear. The
//! document is inert data; `pact-policy` compiles and enforces it.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::candidate::TrustTier;
use crate::intent::SettlementMode;

/// Root policy document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PolicyDoc {
    #[serde(default)]
    pub counterparty: CounterpartyPolicy,
    #[serde(default)]
    pub negotiation: NegotiationPolicy,
    #[serde(default)]
    pub economics: EconomicsPolicy,
    #[serde(default)]
    pub settlement: SettlementPolicy,
    #[serde(default)]
    pub trust: TrustPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zk_kya: Option<ZkKyaPolicy>,
    #[serde(default)]
    pub utility: UtilityWeights,
    #[serde(default)]
    pub disputes: DisputePolicy,
}

/// Who may sit on the other side of a trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterpartyPolicy {
    /// Credential claims a provider must present (empty = none required).
    #[serde(default)]
    pub required_credentials: Vec<String>,
    /// Issuers whose credentials are acceptable (empty = any).
    #[serde(default)]
    pub trusted_issuers: Vec<String>,
    /// Reputation floor in [0, 1].
    #[serde(default)]
    pub min_reputation: f64,
    /// Allowed provider regions (empty = any).
    #[serde(default)]
    pub allowed_regions: Vec<String>,
    /// Cap on the provider's historical failure rate.
    pub max_failure_rate: f64,
    /// Cap on the provider's historical timeout rate.
    pub max_timeout_rate: f64,
}

impl Default for CounterpartyPolicy {
    fn default() -> Self {
        Self {
            required_credentials: Vec::new(),
            trusted_issuers: Vec::new(),
            min_reputation: 0.0,
            allowed_regions: Vec::new(),
            max_failure_rate: 1.0,
            max_timeout_rate: 1.0,
        }
    }
}

/// How hard to negotiate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NegotiationPolicy {
    /// Maximum COUNTER rounds before the session must accept or fail.
    pub max_rounds: u32,
    /// Acceptable band around the reference p50, as a fraction.
    pub band_pct: Decimal,
    /// Accept firm quotes that clear max_price without countering.
    pub accept_firm_quotes: bool,
    /// Band widening factor applied by `aggressive_if_urgent`.
    pub urgency_band_factor: Decimal,
}

impl Default for NegotiationPolicy {
    fn default() -> Self {
        Self {
            max_rounds: 3,
            band_pct: Decimal::new(25, 2),
            accept_firm_quotes: true,
            urgency_band_factor: Decimal::new(15, 1),
        }
    }
}

/// Bond economics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EconomicsPolicy {
    pub seller_min_bond: Decimal,
    /// Bond = max(seller_min_bond, agreed_price × seller_bond_multiple).
    pub seller_bond_multiple: Decimal,
}

impl Default for EconomicsPolicy {
    fn default() -> Self {
        Self {
            seller_min_bond: Decimal::new(1, 2),
            seller_bond_multiple: Decimal::new(2, 0),
        }
    }
}

/// Settlement behavior: streaming cadence, SLA bounds, routing, splits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SettlementPolicy {
    #[serde(default)]
    pub streaming: StreamingPolicy,
    #[serde(default)]
    pub settlement_sla: SlaPolicy,
    #[serde(default)]
    pub settlement_routing: RoutingPolicy,
    #[serde(default)]
    pub split: SplitPolicy,
    #[serde(default)]
    pub windows: AgreementWindows,
}

/// Streaming cadence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamingPolicy {
    pub tick_ms: u64,
    pub planned_ticks: u64,
}

impl Default for StreamingPolicy {
    fn default() -> Self {
        Self {
            tick_ms: 100,
            planned_ticks: 10,
        }
    }
}

/// Bounds on how long settlement may stay pending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaPolicy {
    pub enabled: bool,
    pub max_pending_ms: u64,
    pub max_poll_attempts: u32,
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub penalty: PenaltyPolicy,
}

impl Default for SlaPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_pending_ms: 60_000,
            max_poll_attempts: 5,
            poll_interval_ms: 50,
            penalty: PenaltyPolicy::default(),
        }
    }
}

/// Whether SLA violations cost the seller reputation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PenaltyPolicy {
    pub enabled: bool,
}

/// Rail selection rules, walked top to bottom; first match wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingPolicy {
    pub default_provider: String,
    #[serde(default)]
    pub rules: Vec<RoutingRule>,
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        Self {
            default_provider: "mock".to_string(),
            rules: Vec::new(),
        }
    }
}

/// One routing rule: predicates plus the rail to use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingRule {
    pub when: RouteWhen,
    #[serde(rename = "use")]
    pub use_provider: String,
}

/// Predicates a settlement must satisfy for the rule to match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RouteWhen {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_amount: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_trust_tier: Option<TrustTier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<SettlementMode>,
}

/// Split settlement: divide the agreed price across segments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitPolicy {
    pub enabled: bool,
    pub max_segments: u32,
}

impl Default for SplitPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            max_segments: 2,
        }
    }
}

/// Agreement time windows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgreementWindows {
    pub challenge_window_ms: u64,
    pub delivery_deadline_ms: u64,
    /// How long an INTENT stays valid after sending.
    pub intent_ttl_ms: u64,
}

impl Default for AgreementWindows {
    fn default() -> Self {
        Self {
            challenge_window_ms: 60_000,
            delivery_deadline_ms: 120_000,
            intent_ttl_ms: 300_000,
        }
    }
}

/// Know-Your-Agent trust configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustPolicy {
    /// Weight per credential issuer; `"self"` covers uncredentialed providers.
    pub issuer_weights: BTreeMap<String, f64>,
    pub require_trusted_issuer: bool,
    pub require_credential: bool,
    pub min_trust_tier: TrustTier,
    pub min_trust_score: f64,
}

impl Default for TrustPolicy {
    fn default() -> Self {
        let mut issuer_weights = BTreeMap::new();
        issuer_weights.insert("self".to_string(), 0.8);
        issuer_weights.insert("pact-ca".to_string(), 1.0);
        Self {
            issuer_weights,
            require_trusted_issuer: false,
            require_credential: false,
            min_trust_tier: TrustTier::Untrusted,
            min_trust_score: 0.0,
        }
    }
}

/// Optional zero-knowledge KYA requirement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZkKyaPolicy {
    pub required: bool,
    #[serde(default)]
    pub allowed_issuers: Vec<String>,
    pub min_tier: TrustTier,
}

/// Ranking-utility weights (spec-tunable constants surfaced as policy).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UtilityWeights {
    pub latency_weight: f64,
    pub failure_weight: f64,
    pub reputation_weight: f64,
    pub trust_bonus_low: f64,
    pub trust_bonus_trusted: f64,
}

impl Default for UtilityWeights {
    fn default() -> Self {
        Self {
            latency_weight: 1e-8,
            failure_weight: 1e-3,
            reputation_weight: 1e-6,
            trust_bonus_low: 0.02,
            trust_bonus_trusted: 0.05,
        }
    }
}

/// Dispute window and remedy limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisputePolicy {
    pub enabled: bool,
    pub window_ms: u64,
    /// Maximum refund as a fraction of the paid amount.
    pub max_refund_pct: Decimal,
    pub allow_partial: bool,
}

impl Default for DisputePolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            window_ms: 86_400_000,
            max_refund_pct: Decimal::ONE,
            allow_partial: true,
        }
    }
}
