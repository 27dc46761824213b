//! Settlement routing: which rail settles this agreement.
//!
//! Rules are walked top to bottom; the first rule whose `when` predicates
//! all hold wins. No match falls through to the policy's default rail. The
//! chosen rule index and a human-readable rationale land in the transcript.

use rust_decimal::Decimal;

use pact_types::{
    FailureCode, PactError, Result, RouteRecord, RoutingPolicy, SettlementMode, TrustTier,
};

/// Walks the policy's routing rules.
#[derive(Debug, Clone)]
pub struct SettlementRouter {
    policy: RoutingPolicy,
}

impl SettlementRouter {
    #[must_use]
    pub fn new(policy: RoutingPolicy) -> Self {
        Self { policy }
    }

    /// Pick a rail for one settlement.
    ///
    /// `trust_score` is clamped to [0, 1]; a negative amount is rejected
    /// outright (rails never see it).
    pub fn route(
        &self,
        amount: Decimal,
        mode: SettlementMode,
        trust_tier: TrustTier,
        trust_score: f64,
    ) -> Result<RouteRecord> {
        if amount < Decimal::ZERO {
            return Err(PactError::new(
                FailureCode::SettlementFailed,
                format!("cannot route negative settlement amount {amount}"),
            ));
        }
        let _trust_score = trust_score.clamp(0.0, 1.0);

        for (idx, rule) in self.policy.rules.iter().enumerate() {
            let when = &rule.when;
            if when.max_amount.is_some_and(|max| amount > max) {
                continue;
            }
            if when.min_trust_tier.is_some_and(|min| trust_tier < min) {
                continue;
            }
            if when.mode.is_some_and(|m| m != mode) {
                continue;
            }
            return Ok(RouteRecord {
                rail: rule.use_provider.clone(),
                rule_index: Some(idx),
                rationale: format!(
                    "rule[{idx}] matched: amount={amount} mode={mode} tier={trust_tier}"
                ),
            });
        }

        Ok(RouteRecord {
            rail: self.policy.default_provider.clone(),
            rule_index: None,
            rationale: format!(
                "no rule matched amount={amount} mode={mode} tier={trust_tier}; using default"
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use pact_types::{RouteWhen, RoutingRule};

    use super::*;

    fn policy_with_rules() -> RoutingPolicy {
        RoutingPolicy {
            default_provider: "mock".into(),
            rules: vec![
                RoutingRule {
                    when: RouteWhen {
                        max_amount: Some(Decimal::new(1, 2)), // <= 0.01
                        min_trust_tier: None,
                        mode: None,
                    },
                    use_provider: "mock".into(),
                },
                RoutingRule {
                    when: RouteWhen {
                        max_amount: None,
                        min_trust_tier: Some(TrustTier::Trusted),
                        mode: Some(SettlementMode::HashReveal),
                    },
                    use_provider: "stripe_like".into(),
                },
            ],
        }
    }

    #[test]
    fn first_match_wins() {
        let router = SettlementRouter::new(policy_with_rules());
        let route = router
            .route(
                Decimal::new(5, 3), // 0.005 — matches rule 0
                SettlementMode::HashReveal,
                TrustTier::Trusted,
                0.9,
            )
            .unwrap();
        assert_eq!(route.rail, "mock");
        assert_eq!(route.rule_index, Some(0));
    }

    #[test]
    fn later_rule_matches_when_earlier_skips() {
        let router = SettlementRouter::new(policy_with_rules());
        let route = router
            .route(
                Decimal::new(5, 1), // 0.5 — too big for rule 0
                SettlementMode::HashReveal,
                TrustTier::Trusted,
                0.9,
            )
            .unwrap();
        assert_eq!(route.rail, "stripe_like");
        assert_eq!(route.rule_index, Some(1));
    }

    #[test]
    fn tier_below_minimum_skips_rule() {
        let router = SettlementRouter::new(policy_with_rules());
        let route = router
            .route(
                Decimal::new(5, 1),
                SettlementMode::HashReveal,
                TrustTier::Low,
                0.5,
            )
            .unwrap();
        assert_eq!(route.rail, "mock", "falls to default");
        assert_eq!(route.rule_index, None);
    }

    #[test]
    fn mode_mismatch_skips_rule() {
        let router = SettlementRouter::new(policy_with_rules());
        let route = router
            .route(
                Decimal::new(5, 1),
                SettlementMode::Streaming,
                TrustTier::Trusted,
                0.9,
            )
            .unwrap();
        assert_eq!(route.rule_index, None);
    }

    #[test]
    fn empty_rules_use_default() {
        let router = SettlementRouter::new(RoutingPolicy::default());
        let route = router
            .route(Decimal::ONE, SettlementMode::HashReveal, TrustTier::Untrusted, 0.0)
            .unwrap();
        assert_eq!(route.rail, "mock");
        assert!(route.rationale.contains("default"));
    }

    #[test]
    fn negative_amount_rejected() {
        let router = SettlementRouter::new(RoutingPolicy::default());
        let err = router
            .route(
                Decimal::new(-1, 0),
                SettlementMode::HashReveal,
                TrustTier::Untrusted,
                0.0,
            )
            .unwrap_err();
        assert_eq!(err.code, FailureCode::SettlementFailed);
    }

    #[test]
    fn routing_is_deterministic() {
        let router = SettlementRouter::new(policy_with_rules());
        let a = router
            .route(Decimal::new(5, 1), SettlementMode::HashReveal, TrustTier::Trusted, 0.9)
            .unwrap();
        let b = router
            .route(Decimal::new(5, 1), SettlementMode::HashReveal, TrustTier::Trusted, 0.9)
            .unwrap();
        assert_eq!(a, b);
    }
}
