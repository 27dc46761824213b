//! Know-Your-Agent trust scoring.
//!
//! The score is a weighted blend of issuer weight, claim completeness,
//! region match, and settlement-mode match, clamped to [0, 1]. The tier is
//! a coarse label over the score. Scoring is pure: same inputs, same score.

use pact_types::constants::{TRUST_LOW_FLOOR, TRUST_TRUSTED_FLOOR};
use pact_types::{Credential, TrustPolicy, TrustTier};

/// Blend weights. These are structural (they define what the score *means*),
/// unlike the policy-exposed utility weights.
const ISSUER_COMPONENT: f64 = 0.5;
const CLAIMS_COMPONENT: f64 = 0.2;
const REGION_COMPONENT: f64 = 0.15;
const MODE_COMPONENT: f64 = 0.15;

/// Claims at or above this count score full completeness.
const CLAIMS_SATURATION: f64 = 3.0;

/// The outcome of scoring one provider.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrustAssessment {
    pub score: f64,
    pub tier: TrustTier,
    /// The issuer weight that went into the score.
    pub issuer_weight: f64,
}

/// Score a provider under the policy's issuer weights.
///
/// Providers without a credential are scored under the `"self"` issuer.
/// Unknown issuers weigh zero, which pins the provider below the `low` tier.
#[must_use]
pub fn assess_trust(
    policy: &TrustPolicy,
    credential: Option<&Credential>,
    expected_region: Option<&str>,
    mode_match: bool,
) -> TrustAssessment {
    let issuer = credential.map_or("self", |c| c.issuer_id.as_str());
    let issuer_weight = policy
        .issuer_weights
        .get(issuer)
        .copied()
        .unwrap_or(0.0)
        .clamp(0.0, 1.0);

    let claims = credential.map_or(0.0, |c| {
        #[allow(clippy::cast_precision_loss)]
        let n = c.claims.len() as f64;
        (n / CLAIMS_SATURATION).min(1.0)
    });

    let region = match (expected_region, credential.and_then(|c| c.region.as_deref())) {
        // No expectation means region cannot count against a provider.
        (None, _) => 1.0,
        (Some(want), Some(have)) if want == have => 1.0,
        _ => 0.0,
    };

    let mode = if mode_match { 1.0 } else { 0.0 };

    let score = (ISSUER_COMPONENT * issuer_weight
        + CLAIMS_COMPONENT * claims
        + REGION_COMPONENT * region
        + MODE_COMPONENT * mode)
        .clamp(0.0, 1.0);

    TrustAssessment {
        score,
        tier: tier_for(score),
        issuer_weight,
    }
}

/// The tier a score lands in.
#[must_use]
pub fn tier_for(score: f64) -> TrustTier {
    if score >= TRUST_TRUSTED_FLOOR {
        TrustTier::Trusted
    } else if score >= TRUST_LOW_FLOOR {
        TrustTier::Low
    } else {
        TrustTier::Untrusted
    }
}

#[cfg(test)]
mod tests {
    use pact_types::ProviderId;

    use super::*;

    fn credential(issuer: &str, claims: usize, region: Option<&str>) -> Credential {
        Credential {
            provider_id: ProviderId::from("prov-a"),
            capabilities: vec!["weather.data".into()],
            issuer_id: issuer.into(),
            claims: (0..claims).map(|i| format!("claim-{i}")).collect(),
            region: region.map(String::from),
            issued_at_ms: 0,
            expires_at_ms: 1_000_000,
        }
    }

    #[test]
    fn full_marks_is_trusted() {
        let policy = TrustPolicy::default();
        let cred = credential("pact-ca", 3, Some("us-east"));
        let a = assess_trust(&policy, Some(&cred), Some("us-east"), true);
        assert!((a.score - 1.0).abs() < 1e-9);
        assert_eq!(a.tier, TrustTier::Trusted);
    }

    #[test]
    fn uncredentialed_scores_under_self_issuer() {
        let policy = TrustPolicy::default();
        let a = assess_trust(&policy, None, None, true);
        // 0.5*0.8 + 0 + 0.15 + 0.15 = 0.70 → low tier.
        assert!((a.score - 0.70).abs() < 1e-9);
        assert_eq!(a.tier, TrustTier::Low);
    }

    #[test]
    fn downweighted_self_issuer_cannot_reach_trusted() {
        let mut policy = TrustPolicy::default();
        policy.issuer_weights.insert("self".into(), 0.2);
        let a = assess_trust(&policy, None, None, true);
        assert!(a.score < TRUST_TRUSTED_FLOOR);
        assert_ne!(a.tier, TrustTier::Trusted);
    }

    #[test]
    fn unknown_issuer_weighs_zero() {
        let policy = TrustPolicy::default();
        let cred = credential("shady-ca", 3, None);
        let a = assess_trust(&policy, Some(&cred), None, true);
        assert!((a.issuer_weight - 0.0).abs() < f64::EPSILON);
        assert!(a.score < TRUST_TRUSTED_FLOOR);
    }

    #[test]
    fn region_mismatch_costs_its_component() {
        let policy = TrustPolicy::default();
        let cred = credential("pact-ca", 3, Some("eu-west"));
        let matched = assess_trust(&policy, Some(&cred), Some("eu-west"), true);
        let mismatched = assess_trust(&policy, Some(&cred), Some("us-east"), true);
        assert!((matched.score - mismatched.score - REGION_COMPONENT).abs() < 1e-9);
    }

    #[test]
    fn deterministic() {
        let policy = TrustPolicy::default();
        let cred = credential("pact-ca", 2, Some("us-east"));
        let a = assess_trust(&policy, Some(&cred), Some("us-east"), false);
        let b = assess_trust(&policy, Some(&cred), Some("us-east"), false);
        assert_eq!(a, b);
    }

    #[test]
    fn tier_floors() {
        assert_eq!(tier_for(0.0), TrustTier::Untrusted);
        assert_eq!(tier_for(0.39), TrustTier::Untrusted);
        assert_eq!(tier_for(0.4), TrustTier::Low);
        assert_eq!(tier_for(0.75), TrustTier::Trusted);
        assert_eq!(tier_for(1.0), TrustTier::Trusted);
    }
}
