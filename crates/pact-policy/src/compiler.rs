//! Policy compilation: validate the declarative document once, up front.
//!
//! Everything downstream (guard, router, session) trusts a
//! [`CompiledPolicy`] blindly, so every range and cross-field check lives
//! here. A document that fails any check is an `INVALID_POLICY` failure
//! before a single provider is contacted.

use rust_decimal::Decimal;

use pact_types::{FailureCode, PactError, PolicyDoc, Result, sha256_hex_of};

/// A validated policy plus the canonical hash of its document.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledPolicy {
    pub doc: PolicyDoc,
    /// SHA-256 of the canonical document; feeds the contention fingerprint.
    pub policy_hash: String,
}

/// Validate and seal a policy document.
pub fn compile(doc: PolicyDoc) -> Result<CompiledPolicy> {
    validate(&doc)?;
    let policy_hash = sha256_hex_of(&doc)?;
    Ok(CompiledPolicy { doc, policy_hash })
}

/// Parse a raw JSON value and compile it.
pub fn compile_value(value: serde_json::Value) -> Result<CompiledPolicy> {
    let doc: PolicyDoc = serde_json::from_value(value)
        .map_err(|e| invalid(format!("policy does not parse: {e}")))?;
    compile(doc)
}

fn invalid(reason: impl Into<String>) -> PactError {
    PactError::new(FailureCode::InvalidPolicy, reason)
}

fn validate(doc: &PolicyDoc) -> Result<()> {
    let neg = &doc.negotiation;
    if neg.max_rounds == 0 {
        return Err(invalid("negotiation.max_rounds must be >= 1"));
    }
    if neg.band_pct < Decimal::ZERO || neg.band_pct > Decimal::ONE {
        return Err(invalid(format!(
            "negotiation.band_pct must be in [0, 1], got {}",
            neg.band_pct
        )));
    }
    if neg.urgency_band_factor < Decimal::ONE {
        return Err(invalid("negotiation.urgency_band_factor must be >= 1"));
    }

    let eco = &doc.economics;
    if eco.seller_min_bond < Decimal::ZERO {
        return Err(invalid("economics.seller_min_bond must be >= 0"));
    }
    if eco.seller_bond_multiple < Decimal::ZERO {
        return Err(invalid("economics.seller_bond_multiple must be >= 0"));
    }

    let streaming = &doc.settlement.streaming;
    if streaming.tick_ms == 0 {
        return Err(invalid("settlement.streaming.tick_ms must be > 0"));
    }
    if streaming.planned_ticks == 0 {
        return Err(invalid("settlement.streaming.planned_ticks must be > 0"));
    }

    let sla = &doc.settlement.settlement_sla;
    if sla.enabled && sla.max_poll_attempts == 0 {
        return Err(invalid(
            "settlement.settlement_sla.max_poll_attempts must be >= 1 when enabled",
        ));
    }

    let routing = &doc.settlement.settlement_routing;
    if routing.default_provider.is_empty() {
        return Err(invalid("settlement_routing.default_provider must be set"));
    }
    for (idx, rule) in routing.rules.iter().enumerate() {
        if rule.use_provider.is_empty() {
            return Err(invalid(format!(
                "settlement_routing.rules[{idx}].use must name a rail"
            )));
        }
        if rule.when.max_amount.is_some_and(|max| max < Decimal::ZERO) {
            return Err(invalid(format!(
                "settlement_routing.rules[{idx}].when.max_amount must be >= 0"
            )));
        }
    }

    if doc.settlement.split.enabled && doc.settlement.split.max_segments == 0 {
        return Err(invalid("settlement.split.max_segments must be >= 1"));
    }

    let cp = &doc.counterparty;
    for (name, rate) in [
        ("min_reputation", cp.min_reputation),
        ("max_failure_rate", cp.max_failure_rate),
        ("max_timeout_rate", cp.max_timeout_rate),
    ] {
        if !(0.0..=1.0).contains(&rate) || !rate.is_finite() {
            return Err(invalid(format!("counterparty.{name} must be in [0, 1]")));
        }
    }

    let trust = &doc.trust;
    if !(0.0..=1.0).contains(&trust.min_trust_score) {
        return Err(invalid("trust.min_trust_score must be in [0, 1]"));
    }
    for (issuer, weight) in &trust.issuer_weights {
        if !(0.0..=1.0).contains(weight) || !weight.is_finite() {
            return Err(invalid(format!(
                "trust.issuer_weights[{issuer}] must be in [0, 1]"
            )));
        }
    }

    let util = &doc.utility;
    for (name, w) in [
        ("latency_weight", util.latency_weight),
        ("failure_weight", util.failure_weight),
        ("reputation_weight", util.reputation_weight),
        ("trust_bonus_low", util.trust_bonus_low),
        ("trust_bonus_trusted", util.trust_bonus_trusted),
    ] {
        if !w.is_finite() || w < 0.0 {
            return Err(invalid(format!("utility.{name} must be finite and >= 0")));
        }
    }

    let disputes = &doc.disputes;
    if disputes.max_refund_pct < Decimal::ZERO || disputes.max_refund_pct > Decimal::ONE {
        return Err(invalid("disputes.max_refund_pct must be in [0, 1]"));
    }

    Ok(())
}
