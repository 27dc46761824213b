//! Negotiation strategies.
//!
//! A strategy is a pure function of the negotiation state: no clocks, no
//! randomness, no I/O. Identical inputs always produce identical decisions,
//! which is what makes negotiation transcripts replayable.

use rust_decimal::Decimal;
use serde_json::json;

use pact_types::{FailureCode, PactError, Result};

/// Which strategy drives the counteroffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StrategyKind {
    #[default]
    Baseline,
    BandedConcession,
    AggressiveIfUrgent,
    MlStub,
}

impl StrategyKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Baseline => "baseline",
            Self::BandedConcession => "banded_concession",
            Self::AggressiveIfUrgent => "aggressive_if_urgent",
            Self::MlStub => "ml_stub",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "baseline" => Ok(Self::Baseline),
            "banded_concession" => Ok(Self::BandedConcession),
            "aggressive_if_urgent" => Ok(Self::AggressiveIfUrgent),
            "ml_stub" => Ok(Self::MlStub),
            other => Err(PactError::new(
                FailureCode::NegotiationFailed,
                format!("unknown negotiation strategy: {other}"),
            )),
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a strategy may look at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrategyInputs {
    /// Market reference p50; `None` without history.
    pub reference_price: Option<Decimal>,
    pub quote_price: Decimal,
    pub max_price: Decimal,
    /// Band fraction from policy.
    pub band_pct: Decimal,
    /// Band widening factor available to `aggressive_if_urgent`.
    pub urgency_band_factor: Decimal,
    pub urgent: bool,
    /// 1-based round number.
    pub current_round: u32,
    pub max_rounds: u32,
}

/// One round's decision.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyDecision {
    /// Counter to send this round; `None` when accepting or rejecting.
    pub counter_price: Option<Decimal>,
    pub accept: bool,
    pub reason: String,
    pub within_band: bool,
    /// True when an urgency override changed the outcome.
    pub used_override: bool,
    /// Strategy-specific evidence (the ml_stub scorer trail).
    pub evidence: Option<serde_json::Value>,
}

/// Scores candidate counter prices for [`StrategyKind::MlStub`].
pub trait CounterScorer: Send + Sync {
    fn name(&self) -> &'static str;
    fn score(&self, candidate: Decimal, inputs: &StrategyInputs) -> f64;
}

/// Default scorer: prefers cheaper candidates, mildly penalizing distance
/// from the reference price.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrugalScorer;

impl CounterScorer for FrugalScorer {
    fn name(&self) -> &'static str {
        "frugal"
    }

    #[allow(clippy::cast_precision_loss)]
    fn score(&self, candidate: Decimal, inputs: &StrategyInputs) -> f64 {
        let max = decimal_to_f64(inputs.max_price).max(f64::MIN_POSITIVE);
        let price = decimal_to_f64(candidate);
        let cheapness = 1.0 - (price / max).clamp(0.0, 1.0);
        let anchor = inputs
            .reference_price
            .map_or(0.0, |r| (price - decimal_to_f64(r)).abs() / max);
        cheapness - 0.25 * anchor
    }
}

fn decimal_to_f64(d: Decimal) -> f64 {
    use rust_decimal::prelude::ToPrimitive;
    d.to_f64().unwrap_or(0.0)
}

fn band_bounds(reference: Decimal, band: Decimal) -> (Decimal, Decimal) {
    (
        reference * (Decimal::ONE - band),
        reference * (Decimal::ONE + band),
    )
}

fn within_band(inputs: &StrategyInputs, band: Decimal) -> bool {
    match inputs.reference_price {
        Some(reference) => {
            let (low, high) = band_bounds(reference, band);
            inputs.quote_price >= low && inputs.quote_price <= high
        }
        // No market history: the band cannot reject.
        None => true,
    }
}

/// Run one strategy round.
pub fn decide(
    kind: StrategyKind,
    inputs: &StrategyInputs,
    scorer: Option<&dyn CounterScorer>,
) -> StrategyDecision {
    match kind {
        StrategyKind::Baseline => baseline(inputs),
        StrategyKind::BandedConcession => banded_concession(inputs),
        StrategyKind::AggressiveIfUrgent => aggressive_if_urgent(inputs),
        StrategyKind::MlStub => ml_stub(inputs, scorer),
    }
}

fn baseline(inputs: &StrategyInputs) -> StrategyDecision {
    let in_band = within_band(inputs, inputs.band_pct);
    if inputs.quote_price <= inputs.max_price && in_band {
        StrategyDecision {
            counter_price: None,
            accept: true,
            reason: "quote within max price and reference band".into(),
            within_band: in_band,
            used_override: false,
            evidence: None,
        }
    } else {
        StrategyDecision {
            counter_price: None,
            accept: false,
            reason: if in_band {
                format!(
                    "quote {} exceeds max price {}",
                    inputs.quote_price, inputs.max_price
                )
            } else {
                format!("quote {} outside reference band", inputs.quote_price)
            },
            within_band: in_band,
            used_override: false,
            evidence: None,
        }
    }
}

fn banded_concession(inputs: &StrategyInputs) -> StrategyDecision {
    if inputs.quote_price > inputs.max_price {
        return StrategyDecision {
            counter_price: None,
            accept: false,
            reason: format!(
                "quote {} exceeds max price {}",
                inputs.quote_price, inputs.max_price
            ),
            within_band: within_band(inputs, inputs.band_pct),
            used_override: false,
            evidence: None,
        };
    }

    let anchor = inputs.reference_price.unwrap_or(inputs.quote_price);
    let start = anchor * (Decimal::ONE - inputs.band_pct);
    let progress = Decimal::from(inputs.current_round) / Decimal::from(inputs.max_rounds.max(1));
    let counter = (start + (inputs.quote_price - start) * progress).min(inputs.max_price);

    if counter >= inputs.quote_price {
        StrategyDecision {
            counter_price: None,
            accept: true,
            reason: format!("concession reached quote at round {}", inputs.current_round),
            within_band: within_band(inputs, inputs.band_pct),
            used_override: false,
            evidence: None,
        }
    } else {
        StrategyDecision {
            counter_price: Some(counter.max(Decimal::ZERO)),
            accept: false,
            reason: format!(
                "conceding linearly: round {}/{}",
                inputs.current_round, inputs.max_rounds
            ),
            within_band: within_band(inputs, inputs.band_pct),
            used_override: false,
            evidence: None,
        }
    }
}

fn aggressive_if_urgent(inputs: &StrategyInputs) -> StrategyDecision {
    if !inputs.urgent {
        return baseline(inputs);
    }
    // Widened band, capped at 100%.
    let widened = (inputs.band_pct * inputs.urgency_band_factor).min(Decimal::ONE);
    let in_wide_band = within_band(inputs, widened);
    let in_base_band = within_band(inputs, inputs.band_pct);

    if inputs.quote_price <= inputs.max_price && in_wide_band {
        StrategyDecision {
            counter_price: None,
            accept: true,
            reason: "urgent: quote within widened band".into(),
            within_band: in_base_band,
            used_override: !in_base_band,
            evidence: None,
        }
    } else {
        StrategyDecision {
            counter_price: None,
            accept: false,
            reason: "urgent: quote outside even the widened band".into(),
            within_band: in_base_band,
            used_override: false,
            evidence: None,
        }
    }
}

fn ml_stub(inputs: &StrategyInputs, scorer: Option<&dyn CounterScorer>) -> StrategyDecision {
    let default_scorer = FrugalScorer;
    let scorer: &dyn CounterScorer = scorer.unwrap_or(&default_scorer);

    let discounted = inputs.quote_price * (Decimal::ONE - inputs.band_pct);
    let mid = (inputs.quote_price + discounted) / Decimal::from(2);
    let candidates = [inputs.quote_price, discounted, mid];

    let scores: Vec<f64> = candidates
        .iter()
        .map(|c| scorer.score(*c, inputs))
        .collect();
    // Highest score wins; ties resolve to the earliest candidate.
    let mut selected = 0usize;
    for (i, s) in scores.iter().enumerate() {
        if *s > scores[selected] {
            selected = i;
        }
    }

    // Never outside [0, max_price].
    let choice = candidates[selected]
        .max(Decimal::ZERO)
        .min(inputs.max_price);

    let evidence = json!({
        "scorer": scorer.name(),
        "selected_index": selected,
        "scores": scores,
    });

    let accept_quote = inputs.quote_price <= inputs.max_price;
    if choice >= inputs.quote_price && accept_quote {
        StrategyDecision {
            counter_price: None,
            accept: true,
            reason: "scorer selected the quote itself".into(),
            within_band: within_band(inputs, inputs.band_pct),
            used_override: false,
            evidence: Some(evidence),
        }
    } else if inputs.current_round >= inputs.max_rounds && accept_quote {
        StrategyDecision {
            counter_price: None,
            accept: true,
            reason: "rounds exhausted; accepting quote under max price".into(),
            within_band: within_band(inputs, inputs.band_pct),
            used_override: false,
            evidence: Some(evidence),
        }
    } else if accept_quote {
        StrategyDecision {
            counter_price: Some(choice),
            accept: false,
            reason: format!("scorer prefers candidate {selected}"),
            within_band: within_band(inputs, inputs.band_pct),
            used_override: false,
            evidence: Some(evidence),
        }
    } else {
        StrategyDecision {
            counter_price: None,
            accept: false,
            reason: format!(
                "quote {} exceeds max price {}",
                inputs.quote_price, inputs.max_price
            ),
            within_band: within_band(inputs, inputs.band_pct),
            used_override: false,
            evidence: Some(evidence),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs() -> StrategyInputs {
        StrategyInputs {
            reference_price: Some(Decimal::new(100, 0)),
            quote_price: Decimal::new(110, 0),
            max_price: Decimal::new(150, 0),
            band_pct: Decimal::new(25, 2),
            urgency_band_factor: Decimal::new(15, 1),
            urgent: false,
            current_round: 1,
            max_rounds: 3,
        }
    }

    #[test]
    fn baseline_accepts_in_band_quote() {
        let d = decide(StrategyKind::Baseline, &inputs(), None);
        assert!(d.accept);
        assert!(d.within_band);
    }

    #[test]
    fn baseline_rejects_over_max() {
        let mut i = inputs();
        i.quote_price = Decimal::new(200, 0);
        let d = decide(StrategyKind::Baseline, &i, None);
        assert!(!d.accept);
        assert!(d.reason.contains("max price"));
    }

    #[test]
    fn baseline_rejects_out_of_band() {
        let mut i = inputs();
        i.quote_price = Decimal::new(130, 0); // band is [75, 125]
        let d = decide(StrategyKind::Baseline, &i, None);
        assert!(!d.accept);
        assert!(!d.within_band);
    }

    #[test]
    fn baseline_without_history_only_checks_max() {
        let mut i = inputs();
        i.reference_price = None;
        i.quote_price = Decimal::new(149, 0);
        let d = decide(StrategyKind::Baseline, &i, None);
        assert!(d.accept);
    }

    #[test]
    fn banded_concession_counters_then_accepts() {
        let mut i = inputs();
        // start = 75; round 1 counter = 75 + 35/3 ≈ 86.67 < 110 → counter
        let d1 = decide(StrategyKind::BandedConcession, &i, None);
        assert!(!d1.accept);
        let c1 = d1.counter_price.unwrap();
        assert!(c1 < i.quote_price);

        i.current_round = 2;
        let d2 = decide(StrategyKind::BandedConcession, &i, None);
        let c2 = d2.counter_price.unwrap();
        assert!(c2 > c1, "concession must move toward the quote");

        i.current_round = 3;
        let d3 = decide(StrategyKind::BandedConcession, &i, None);
        assert!(d3.accept, "final round reaches the quote");
    }

    #[test]
    fn banded_concession_rejects_over_max() {
        let mut i = inputs();
        i.quote_price = Decimal::new(200, 0);
        let d = decide(StrategyKind::BandedConcession, &i, None);
        assert!(!d.accept);
        assert!(d.counter_price.is_none());
    }

    #[test]
    fn aggressive_matches_baseline_when_not_urgent() {
        let i = inputs();
        let a = decide(StrategyKind::AggressiveIfUrgent, &i, None);
        let b = decide(StrategyKind::Baseline, &i, None);
        assert_eq!(a.accept, b.accept);
    }

    #[test]
    fn aggressive_widens_band_when_urgent() {
        let mut i = inputs();
        i.quote_price = Decimal::new(130, 0); // outside [75,125], inside [62.5,137.5]
        i.urgent = true;
        let d = decide(StrategyKind::AggressiveIfUrgent, &i, None);
        assert!(d.accept);
        assert!(d.used_override, "acceptance came from the widened band");
        assert!(!d.within_band, "base band still records the truth");
    }

    #[test]
    fn aggressive_still_rejects_far_out_quotes() {
        let mut i = inputs();
        i.quote_price = Decimal::new(145, 0); // outside even [62.5, 137.5]
        i.urgent = true;
        let d = decide(StrategyKind::AggressiveIfUrgent, &i, None);
        assert!(!d.accept);
    }

    #[test]
    fn ml_stub_emits_scorer_evidence() {
        let d = decide(StrategyKind::MlStub, &inputs(), None);
        let evidence = d.evidence.unwrap();
        assert_eq!(evidence["scorer"], "frugal");
        assert_eq!(evidence["scores"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn ml_stub_never_exceeds_max_price() {
        let mut i = inputs();
        i.quote_price = Decimal::new(140, 0);
        let d = decide(StrategyKind::MlStub, &i, None);
        if let Some(counter) = d.counter_price {
            assert!(counter <= i.max_price);
            assert!(counter >= Decimal::ZERO);
        }
    }

    #[test]
    fn ml_stub_accepts_when_rounds_exhausted() {
        let mut i = inputs();
        i.current_round = 3;
        let d = decide(StrategyKind::MlStub, &i, None);
        assert!(d.accept);
    }

    #[test]
    fn strategies_are_deterministic() {
        for kind in [
            StrategyKind::Baseline,
            StrategyKind::BandedConcession,
            StrategyKind::AggressiveIfUrgent,
            StrategyKind::MlStub,
        ] {
            let a = decide(kind, &inputs(), None);
            let b = decide(kind, &inputs(), None);
            assert_eq!(a, b, "{kind} must be deterministic");
        }
    }

    #[test]
    fn kind_parse_roundtrip() {
        for kind in [
            StrategyKind::Baseline,
            StrategyKind::BandedConcession,
            StrategyKind::AggressiveIfUrgent,
            StrategyKind::MlStub,
        ] {
            assert_eq!(StrategyKind::parse(kind.as_str()).unwrap(), kind);
        }
        assert!(StrategyKind::parse("alpha_go").is_err());
    }
}
