//! The policy guard: one pure question-answering surface.
//!
//! The guard never touches I/O and never mutates anything. It answers three
//! kinds of question — identity, negotiation, settlement — each carried as a
//! tagged query, and returns a verdict with a discriminated code on
//! rejection. The orchestrator owns the mapping from guard codes to
//! boundary `PROVIDER_*` failure codes.

use rust_decimal::Decimal;

use pact_types::{FailureCode, SettlementMode, TrustTier};

use crate::compiler::CompiledPolicy;

/// Why the guard said no.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GuardCode {
    MissingRequiredCredentials,
    UntrustedIssuer,
    CredentialRequired,
    ReputationTooLow,
    RegionNotAllowed,
    FailureRateTooHigh,
    TimeoutRateTooHigh,
    TrustTierTooLow,
    TrustScoreTooLow,
    QuoteExceedsMaxPrice,
    QuoteOutOfBand,
    BondBelowMinimum,
    AmountNotFinite,
}

impl GuardCode {
    /// The guard-level wire string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingRequiredCredentials => "MISSING_REQUIRED_CREDENTIALS",
            Self::UntrustedIssuer => "UNTRUSTED_ISSUER",
            Self::CredentialRequired => "CREDENTIAL_REQUIRED",
            Self::ReputationTooLow => "REPUTATION_TOO_LOW",
            Self::RegionNotAllowed => "REGION_NOT_ALLOWED",
            Self::FailureRateTooHigh => "FAILURE_RATE_TOO_HIGH",
            Self::TimeoutRateTooHigh => "TIMEOUT_RATE_TOO_HIGH",
            Self::TrustTierTooLow => "TRUST_TIER_TOO_LOW",
            Self::TrustScoreTooLow => "TRUST_SCORE_TOO_LOW",
            Self::QuoteExceedsMaxPrice => "QUOTE_EXCEEDS_MAX_PRICE",
            Self::QuoteOutOfBand => "QUOTE_OUT_OF_BAND",
            Self::BondBelowMinimum => "BOND_BELOW_MINIMUM",
            Self::AmountNotFinite => "AMOUNT_NOT_FINITE",
        }
    }

    /// The orchestrator-boundary code this maps to.
    #[must_use]
    pub fn to_failure_code(self) -> FailureCode {
        match self {
            Self::MissingRequiredCredentials => FailureCode::ProviderMissingRequiredCredentials,
            Self::UntrustedIssuer => FailureCode::ProviderUntrustedIssuer,
            Self::CredentialRequired => FailureCode::ProviderCredentialRequired,
            Self::TrustTierTooLow => FailureCode::ProviderTrustTierTooLow,
            Self::TrustScoreTooLow => FailureCode::ProviderTrustScoreTooLow,
            Self::QuoteOutOfBand => FailureCode::ProviderQuoteOutOfBand,
            Self::QuoteExceedsMaxPrice | Self::AmountNotFinite => {
                FailureCode::ProviderQuoteInvalid
            }
            Self::ReputationTooLow
            | Self::RegionNotAllowed
            | Self::FailureRateTooHigh
            | Self::TimeoutRateTooHigh => FailureCode::ProviderQuotePolicyRejected,
            Self::BondBelowMinimum => FailureCode::SettlementFailed,
        }
    }
}

impl std::fmt::Display for GuardCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The guard's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardVerdict {
    pub ok: bool,
    pub code: Option<GuardCode>,
}

impl GuardVerdict {
    #[must_use]
    pub fn pass() -> Self {
        Self {
            ok: true,
            code: None,
        }
    }

    #[must_use]
    pub fn reject(code: GuardCode) -> Self {
        Self {
            ok: false,
            code: Some(code),
        }
    }
}

/// What the orchestrator learned about a counterparty's identity.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityContext {
    pub credential_present: bool,
    /// Claims carried by a *verified* credential.
    pub claims: Vec<String>,
    pub issuer_id: Option<String>,
    pub region: Option<String>,
    pub reputation: f64,
    pub failure_rate: f64,
    pub timeout_rate: f64,
    pub trust_score: f64,
    pub trust_tier: TrustTier,
    /// Buyer-side per-call overrides; tighter than policy wins.
    pub min_trust_tier_override: Option<TrustTier>,
    pub min_trust_score_override: Option<f64>,
    pub require_credential_override: bool,
}

/// A quote under consideration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NegotiationContext {
    pub quote_price: Decimal,
    pub max_price: Decimal,
    /// Reference p50 from market stats; absent history disables the band.
    pub reference_p50: Option<Decimal>,
    pub firm: bool,
}

/// A settlement about to be prepared.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SettlementContext {
    pub amount: Decimal,
    pub seller_bond: Decimal,
    pub mode: SettlementMode,
}

/// One question for the guard, tagged by phase.
#[derive(Debug, Clone, PartialEq)]
pub enum GuardQuery {
    Identity(IdentityContext),
    Negotiation(NegotiationContext),
    Settlement(SettlementContext),
}

impl GuardQuery {
    /// Phase label for events and logs.
    #[must_use]
    pub fn phase(&self) -> &'static str {
        match self {
            Self::Identity(_) => "identity",
            Self::Negotiation(_) => "negotiation",
            Self::Settlement(_) => "settlement",
        }
    }
}

/// Answers policy questions. Holds only the compiled policy; stateless
/// otherwise.
#[derive(Debug, Clone)]
pub struct PolicyGuard {
    policy: CompiledPolicy,
}

impl PolicyGuard {
    #[must_use]
    pub fn new(policy: CompiledPolicy) -> Self {
        Self { policy }
    }

    #[must_use]
    pub fn policy(&self) -> &CompiledPolicy {
        &self.policy
    }

    /// Answer one question. Pure: identical queries give identical verdicts.
    #[must_use]
    pub fn check(&self, query: &GuardQuery) -> GuardVerdict {
        match query {
            GuardQuery::Identity(ctx) => self.check_identity(ctx),
            GuardQuery::Negotiation(ctx) => self.check_negotiation(ctx),
            GuardQuery::Settlement(ctx) => self.check_settlement(ctx),
        }
    }

    fn check_identity(&self, ctx: &IdentityContext) -> GuardVerdict {
        let doc = &self.policy.doc;
        let cp = &doc.counterparty;
        let trust = &doc.trust;

        if (trust.require_credential || ctx.require_credential_override) && !ctx.credential_present
        {
            return GuardVerdict::reject(GuardCode::CredentialRequired);
        }

        if !cp.required_credentials.is_empty() {
            let all_present = cp
                .required_credentials
                .iter()
                .all(|required| ctx.claims.iter().any(|claim| claim == required));
            if !all_present {
                return GuardVerdict::reject(GuardCode::MissingRequiredCredentials);
            }
        }

        if trust.require_trusted_issuer || !cp.trusted_issuers.is_empty() {
            match &ctx.issuer_id {
                Some(issuer) => {
                    let known = if cp.trusted_issuers.is_empty() {
                        trust.issuer_weights.contains_key(issuer.as_str())
                    } else {
                        cp.trusted_issuers.contains(issuer)
                    };
                    if !known {
                        return GuardVerdict::reject(GuardCode::UntrustedIssuer);
                    }
                }
                None if trust.require_trusted_issuer => {
                    return GuardVerdict::reject(GuardCode::UntrustedIssuer);
                }
                None => {}
            }
        }

        if !cp.allowed_regions.is_empty() {
            let allowed = ctx
                .region
                .as_ref()
                .is_some_and(|r| cp.allowed_regions.contains(r));
            if !allowed {
                return GuardVerdict::reject(GuardCode::RegionNotAllowed);
            }
        }

        if ctx.reputation < cp.min_reputation {
            return GuardVerdict::reject(GuardCode::ReputationTooLow);
        }
        if ctx.failure_rate > cp.max_failure_rate {
            return GuardVerdict::reject(GuardCode::FailureRateTooHigh);
        }
        if ctx.timeout_rate > cp.max_timeout_rate {
            return GuardVerdict::reject(GuardCode::TimeoutRateTooHigh);
        }

        let min_tier = ctx
            .min_trust_tier_override
            .map_or(trust.min_trust_tier, |o| o.max(trust.min_trust_tier));
        if ctx.trust_tier < min_tier {
            return GuardVerdict::reject(GuardCode::TrustTierTooLow);
        }

        let min_score = ctx
            .min_trust_score_override
            .map_or(trust.min_trust_score, |o| o.max(trust.min_trust_score));
        if ctx.trust_score < min_score {
            return GuardVerdict::reject(GuardCode::TrustScoreTooLow);
        }

        GuardVerdict::pass()
    }

    fn check_negotiation(&self, ctx: &NegotiationContext) -> GuardVerdict {
        let neg = &self.policy.doc.negotiation;

        if ctx.quote_price < Decimal::ZERO {
            return GuardVerdict::reject(GuardCode::AmountNotFinite);
        }
        if ctx.quote_price > ctx.max_price {
            return GuardVerdict::reject(GuardCode::QuoteExceedsMaxPrice);
        }
        if ctx.firm && neg.accept_firm_quotes {
            // A firm quote under max_price is acceptable regardless of band.
            return GuardVerdict::pass();
        }
        if let Some(p50) = ctx.reference_p50 {
            let low = p50 * (Decimal::ONE - neg.band_pct);
            let high = p50 * (Decimal::ONE + neg.band_pct);
            if ctx.quote_price < low || ctx.quote_price > high {
                return GuardVerdict::reject(GuardCode::QuoteOutOfBand);
            }
        }
        GuardVerdict::pass()
    }

    fn check_settlement(&self, ctx: &SettlementContext) -> GuardVerdict {
        let eco = &self.policy.doc.economics;

        if ctx.amount < Decimal::ZERO {
            return GuardVerdict::reject(GuardCode::AmountNotFinite);
        }
        let required_bond = eco
            .seller_min_bond
            .max(ctx.amount * eco.seller_bond_multiple);
        if ctx.seller_bond < required_bond {
            return GuardVerdict::reject(GuardCode::BondBelowMinimum);
        }
        // Mode-specific routing resolvability is the router's question; the
        // guard only vouches for the economics.
        let _ = ctx.mode;
        GuardVerdict::pass()
    }
}

#[cfg(test)]
mod tests {
    use pact_types::PolicyDoc;

    use crate::compiler::compile;

    use super::*;

    fn guard(doc: PolicyDoc) -> PolicyGuard {
        PolicyGuard::new(compile(doc).unwrap())
    }

    fn identity_ctx() -> IdentityContext {
        IdentityContext {
            credential_present: true,
            claims: vec!["kya:verified".into()],
            issuer_id: Some("pact-ca".into()),
            region: Some("us-east".into()),
            reputation: 0.5,
            failure_rate: 0.0,
            timeout_rate: 0.0,
            trust_score: 0.8,
            trust_tier: TrustTier::Trusted,
            min_trust_tier_override: None,
            min_trust_score_override: None,
            require_credential_override: false,
        }
    }

    #[test]
    fn default_policy_passes_reasonable_identity() {
        let g = guard(PolicyDoc::default());
        let verdict = g.check(&GuardQuery::Identity(identity_ctx()));
        assert!(verdict.ok);
    }

    #[test]
    fn missing_required_credential_rejected() {
        let mut doc = PolicyDoc::default();
        doc.counterparty.required_credentials = vec!["kya:enhanced".into()];
        let g = guard(doc);
        let verdict = g.check(&GuardQuery::Identity(identity_ctx()));
        assert_eq!(verdict.code, Some(GuardCode::MissingRequiredCredentials));
    }

    #[test]
    fn untrusted_issuer_rejected() {
        let mut doc = PolicyDoc::default();
        doc.counterparty.trusted_issuers = vec!["other-ca".into()];
        let g = guard(doc);
        let verdict = g.check(&GuardQuery::Identity(identity_ctx()));
        assert_eq!(verdict.code, Some(GuardCode::UntrustedIssuer));
    }

    #[test]
    fn buyer_tier_override_tightens() {
        let g = guard(PolicyDoc::default());
        let mut ctx = identity_ctx();
        ctx.trust_tier = TrustTier::Low;
        ctx.min_trust_tier_override = Some(TrustTier::Trusted);
        let verdict = g.check(&GuardQuery::Identity(ctx));
        assert_eq!(verdict.code, Some(GuardCode::TrustTierTooLow));
    }

    #[test]
    fn credential_required_override() {
        let g = guard(PolicyDoc::default());
        let mut ctx = identity_ctx();
        ctx.credential_present = false;
        ctx.require_credential_override = true;
        let verdict = g.check(&GuardQuery::Identity(ctx));
        assert_eq!(verdict.code, Some(GuardCode::CredentialRequired));
    }

    #[test]
    fn quote_over_max_rejected() {
        let g = guard(PolicyDoc::default());
        let verdict = g.check(&GuardQuery::Negotiation(NegotiationContext {
            quote_price: Decimal::new(2, 4),
            max_price: Decimal::new(1, 4),
            reference_p50: None,
            firm: false,
        }));
        assert_eq!(verdict.code, Some(GuardCode::QuoteExceedsMaxPrice));
    }

    #[test]
    fn quote_out_of_band_rejected() {
        let g = guard(PolicyDoc::default());
        // p50 = 100; band 25% → [75, 125]. 130 is out.
        let verdict = g.check(&GuardQuery::Negotiation(NegotiationContext {
            quote_price: Decimal::new(130, 0),
            max_price: Decimal::new(200, 0),
            reference_p50: Some(Decimal::new(100, 0)),
            firm: false,
        }));
        assert_eq!(verdict.code, Some(GuardCode::QuoteOutOfBand));
    }

    #[test]
    fn no_history_disables_band() {
        let g = guard(PolicyDoc::default());
        let verdict = g.check(&GuardQuery::Negotiation(NegotiationContext {
            quote_price: Decimal::new(130, 0),
            max_price: Decimal::new(200, 0),
            reference_p50: None,
            firm: false,
        }));
        assert!(verdict.ok);
    }

    #[test]
    fn firm_quote_skips_band() {
        let g = guard(PolicyDoc::default());
        let verdict = g.check(&GuardQuery::Negotiation(NegotiationContext {
            quote_price: Decimal::new(130, 0),
            max_price: Decimal::new(200, 0),
            reference_p50: Some(Decimal::new(100, 0)),
            firm: true,
        }));
        assert!(verdict.ok);
    }

    #[test]
    fn bond_below_minimum_rejected() {
        let g = guard(PolicyDoc::default());
        let verdict = g.check(&GuardQuery::Settlement(SettlementContext {
            amount: Decimal::new(100, 0),
            seller_bond: Decimal::new(100, 0), // needs 200 (2x multiple)
            mode: SettlementMode::HashReveal,
        }));
        assert_eq!(verdict.code, Some(GuardCode::BondBelowMinimum));
    }

    #[test]
    fn check_is_pure() {
        let g = guard(PolicyDoc::default());
        let q = GuardQuery::Identity(identity_ctx());
        assert_eq!(g.check(&q), g.check(&q));
    }

    #[test]
    fn guard_codes_map_to_boundary_codes() {
        assert_eq!(
            GuardCode::TrustTierTooLow.to_failure_code(),
            FailureCode::ProviderTrustTierTooLow
        );
        assert_eq!(
            GuardCode::QuoteOutOfBand.to_failure_code(),
            FailureCode::ProviderQuoteOutOfBand
        );
    }
}
