//! Per-candidate evaluation: credential → trust → quote → utility.
//!
//! Checks run fail-closed and in order; the first failure excludes the
//! candidate with a stable code, and every step leaves a record for the
//! transcript regardless of outcome. Exclusion is per-candidate — the run
//! only fails globally when nobody survives.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use tracing::debug;

use pact_policy::{
    GuardQuery, IdentityContext, PolicyGuard, ReputationStore, assess_trust,
};
use pact_types::{
    AgentId, Ask, CandidateEvaluation, Clock, Credential, CredentialCheck, Envelope, FailureCode,
    Message, PactError, QuoteRecord, TrustTier, UtilityWeights,
};

use crate::directory::ProviderProfile;
use crate::transport::{ProviderTransport, QuoteRequest};

/// Buyer-side per-call tightening of the trust gate.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuyerOverrides {
    pub require_credential: bool,
    pub min_trust_tier: Option<TrustTier>,
    pub min_trust_score: Option<f64>,
}

/// Everything evaluation learned about one candidate.
pub struct EvaluatedCandidate {
    pub profile: ProviderProfile,
    pub evaluation: CandidateEvaluation,
    pub credential_check: CredentialCheck,
    pub quote_record: QuoteRecord,
    pub ask_envelope: Option<Envelope>,
    pub ask: Option<Ask>,
    /// Why the candidate is out, when it is.
    pub exclusion: Option<PactError>,
}

impl EvaluatedCandidate {
    #[must_use]
    pub fn is_eligible(&self) -> bool {
        self.exclusion.is_none() && self.ask.is_some()
    }
}

/// Evaluate one provider against the policy and the market.
#[allow(clippy::too_many_lines)]
pub async fn evaluate_candidate(
    profile: &ProviderProfile,
    transport: &dyn ProviderTransport,
    guard: &PolicyGuard,
    reputation: &dyn ReputationStore,
    overrides: BuyerOverrides,
    quote_request: &QuoteRequest,
    reference_p50: Option<Decimal>,
    clock: &Clock,
) -> EvaluatedCandidate {
    let seller_agent = AgentId::new(profile.provider_id.as_str());
    let mut exclusion: Option<PactError> = None;

    // 1. Credential fetch + envelope verification.
    let mut credential: Option<Credential> = None;
    let mut credential_check = CredentialCheck {
        provider_id: profile.provider_id.clone(),
        present: false,
        verified: false,
        issuer_id: None,
        covers_intent_type: false,
        expired: false,
        code: None,
        detail: None,
    };
    match transport.fetch_credential(&quote_request.intent_type).await {
        Ok(None) => {
            // Tolerated unless a credential is required.
            let trust = &guard.policy().doc.trust;
            if trust.require_credential || overrides.require_credential {
                credential_check.code = Some(FailureCode::ProviderCredentialRequired);
                exclusion = Some(PactError::new(
                    FailureCode::ProviderCredentialRequired,
                    format!("{} offers no credential", profile.provider_id),
                ));
            }
        }
        Ok(Some(envelope)) => {
            credential_check.present = true;
            match verify_credential(&envelope, profile, &quote_request.intent_type, clock) {
                Ok(cred) => {
                    credential_check.verified = true;
                    credential_check.issuer_id = Some(cred.issuer_id.clone());
                    credential_check.covers_intent_type = true;
                    credential = Some(cred);
                }
                Err((err, check_patch)) => {
                    credential_check.issuer_id = check_patch.issuer_id;
                    credential_check.expired = check_patch.expired;
                    credential_check.covers_intent_type = check_patch.covers_intent_type;
                    credential_check.code = Some(err.code);
                    credential_check.detail = Some(err.reason.clone());
                    exclusion = Some(err);
                }
            }
        }
        Err(err) => {
            credential_check.code = Some(err.code);
            credential_check.detail = Some(err.reason.clone());
            exclusion = Some(err);
        }
    }

    // 2. Trust scoring (runs even for excluded candidates; the record is
    //    useful evidence either way).
    let mode_match = credential
        .as_ref()
        .is_none_or(|c| c.covers(&quote_request.intent_type));
    let assessment = assess_trust(
        &guard.policy().doc.trust,
        credential.as_ref(),
        profile.region.as_deref(),
        mode_match,
    );

    // 3. Reputation statistics.
    let rep_score = reputation.score(&seller_agent);
    let failure_rate = reputation.failure_rate(&seller_agent);
    let timeout_rate = reputation.timeout_rate(&seller_agent);

    // 4. Identity gate.
    if exclusion.is_none() {
        let verdict = guard.check(&GuardQuery::Identity(IdentityContext {
            credential_present: credential.is_some(),
            claims: credential.as_ref().map(|c| c.claims.clone()).unwrap_or_default(),
            issuer_id: credential.as_ref().map(|c| c.issuer_id.clone()),
            region: profile.region.clone(),
            reputation: rep_score,
            failure_rate,
            timeout_rate,
            trust_score: assessment.score,
            trust_tier: assessment.tier,
            min_trust_tier_override: overrides.min_trust_tier,
            min_trust_score_override: overrides.min_trust_score,
            require_credential_override: overrides.require_credential,
        }));
        if let Some(code) = verdict.code {
            exclusion = Some(PactError::new(
                code.to_failure_code(),
                format!("{}: {code}", profile.provider_id),
            ));
        }
    }

    // 5. Quote fetch + verification.
    let mut quote_record = QuoteRecord {
        provider_id: profile.provider_id.clone(),
        ask_price: None,
        firm: false,
        verified: false,
        within_band: None,
        code: None,
        detail: None,
    };
    let mut ask_envelope = None;
    let mut ask = None;
    if exclusion.is_none() {
        match fetch_and_verify_quote(transport, profile, guard, quote_request, reference_p50).await
        {
            Ok((envelope, verified_ask, within_band)) => {
                quote_record.ask_price = Some(verified_ask.ask_price);
                quote_record.firm = verified_ask.firm;
                quote_record.verified = true;
                quote_record.within_band = Some(within_band);
                ask_envelope = Some(envelope);
                ask = Some(verified_ask);
            }
            Err(err) => {
                quote_record.code = Some(err.code);
                quote_record.detail = Some(err.reason.clone());
                exclusion = Some(err);
            }
        }
    }

    // 6. Ranking utility.
    let weights = &guard.policy().doc.utility;
    let utility = ask
        .as_ref()
        .filter(|_| exclusion.is_none())
        .map(|a| utility_of(a.ask_price, profile, rep_score, failure_rate, assessment.tier, weights));

    let evaluation = CandidateEvaluation {
        provider_id: profile.provider_id.clone(),
        pubkey_b58: profile.pubkey_b58.clone(),
        endpoint: profile.endpoint.clone(),
        credentials: credential.as_ref().map(|c| c.claims.clone()).unwrap_or_default(),
        region: profile.region.clone(),
        baseline_latency_ms: profile.baseline_latency_ms,
        trust_score: assessment.score,
        trust_tier: assessment.tier,
        ask_price: ask.as_ref().map(|a| a.ask_price),
        utility,
        reputation: rep_score,
        has_required_credentials: credential_check.verified
            || guard.policy().doc.counterparty.required_credentials.is_empty(),
    };

    debug!(
        provider = %profile.provider_id,
        eligible = exclusion.is_none(),
        utility = ?utility,
        "candidate evaluated"
    );

    EvaluatedCandidate {
        profile: profile.clone(),
        evaluation,
        credential_check,
        quote_record,
        ask_envelope,
        ask,
        exclusion,
    }
}

struct CredentialCheckPatch {
    issuer_id: Option<String>,
    expired: bool,
    covers_intent_type: bool,
}

fn verify_credential(
    envelope: &Envelope,
    profile: &ProviderProfile,
    intent_type: &str,
    clock: &Clock,
) -> std::result::Result<Credential, (PactError, CredentialCheckPatch)> {
    let mut patch = CredentialCheckPatch {
        issuer_id: None,
        expired: false,
        covers_intent_type: false,
    };
    if let Err(err) = envelope.verify() {
        return Err((err, patch));
    }
    if envelope.signer_public_key_b58 != profile.pubkey_b58 {
        return Err((
            PactError::new(
                FailureCode::ProviderSignerMismatch,
                format!(
                    "credential signed by {} but directory lists {}",
                    envelope.signer_public_key_b58, profile.pubkey_b58
                ),
            ),
            patch,
        ));
    }
    let Message::Credential(cred) = &envelope.message else {
        return Err((
            PactError::new(
                FailureCode::ProviderCredentialInvalid,
                format!("expected CREDENTIAL, got {}", envelope.message.kind()),
            ),
            patch,
        ));
    };
    patch.issuer_id = Some(cred.issuer_id.clone());
    if cred.is_expired(clock.now_ms()) {
        patch.expired = true;
        return Err((
            PactError::new(
                FailureCode::ProviderCredentialInvalid,
                format!("credential expired at {}ms", cred.expires_at_ms),
            ),
            patch,
        ));
    }
    if !cred.covers(intent_type) {
        return Err((
            PactError::new(
                FailureCode::ProviderMissingRequiredCredentials,
                format!("credential does not cover {intent_type}"),
            ),
            patch,
        ));
    }
    patch.covers_intent_type = true;
    Ok(cred.clone())
}

async fn fetch_and_verify_quote(
    transport: &dyn ProviderTransport,
    profile: &ProviderProfile,
    guard: &PolicyGuard,
    request: &QuoteRequest,
    reference_p50: Option<Decimal>,
) -> pact_types::Result<(Envelope, Ask, bool)> {
    let envelope = transport.fetch_quote(request).await?;
    envelope.verify()?;
    if envelope.signer_public_key_b58 != profile.pubkey_b58 {
        return Err(PactError::new(
            FailureCode::ProviderSignerMismatch,
            format!(
                "quote signed by {} but directory lists {}",
                envelope.signer_public_key_b58, profile.pubkey_b58
            ),
        ));
    }
    let Message::Ask(ask) = &envelope.message else {
        return Err(PactError::new(
            FailureCode::ProviderQuoteParseError,
            format!("expected ASK, got {}", envelope.message.kind()),
        ));
    };
    if ask.intent_id != request.intent_id {
        return Err(PactError::new(
            FailureCode::ProviderQuoteInvalid,
            "quote references a different intent",
        ));
    }
    if ask.ask_price <= Decimal::ZERO {
        return Err(PactError::new(
            FailureCode::ProviderQuoteInvalid,
            format!("non-positive ask price {}", ask.ask_price),
        ));
    }

    let verdict = guard.check(&GuardQuery::Negotiation(pact_policy::NegotiationContext {
        quote_price: ask.ask_price,
        max_price: request.max_price,
        reference_p50,
        firm: ask.firm,
    }));
    let within_band = verdict.ok;
    if let Some(code) = verdict.code {
        return Err(PactError::new(
            code.to_failure_code(),
            format!("{}: quote {} rejected ({code})", profile.provider_id, ask.ask_price),
        ));
    }
    Ok((envelope.clone(), ask.clone(), within_band))
}

fn utility_of(
    price: Decimal,
    profile: &ProviderProfile,
    reputation: f64,
    failure_rate: f64,
    tier: TrustTier,
    weights: &UtilityWeights,
) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let latency = profile.baseline_latency_ms as f64;
    let bonus = match tier {
        TrustTier::Trusted => weights.trust_bonus_trusted,
        TrustTier::Low => weights.trust_bonus_low,
        TrustTier::Untrusted => 0.0,
    };
    -price.to_f64().unwrap_or(f64::MAX) - latency * weights.latency_weight
        - failure_rate * weights.failure_weight
        + reputation * weights.reputation_weight
        + bonus
}

/// Order eligible candidates: utility descending, provider id ascending on
/// ties. Returns indices into `candidates`.
#[must_use]
pub fn rank_eligible(candidates: &[EvaluatedCandidate]) -> Vec<usize> {
    let mut eligible: Vec<usize> = candidates
        .iter()
        .enumerate()
        .filter(|(_, c)| c.is_eligible())
        .map(|(i, _)| i)
        .collect();
    eligible.sort_by(|&a, &b| {
        let ua = candidates[a].evaluation.utility.unwrap_or(f64::MIN);
        let ub = candidates[b].evaluation.utility.unwrap_or(f64::MIN);
        ub.partial_cmp(&ua)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                candidates[a]
                    .evaluation
                    .provider_id
                    .cmp(&candidates[b].evaluation.provider_id)
            })
    });
    eligible
}
