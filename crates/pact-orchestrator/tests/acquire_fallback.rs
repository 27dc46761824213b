//! Fallback correctness: retryable failures advance the plan, terminal
//! failures stop it.

mod common;

use common::{harness, transcript_dir, weather_input, SellerSpec};
use pact_orchestrator::{acquire, TranscriptStore};
use pact_types::{AgentId, FailureCode, PolicyDoc};

#[tokio::test]
async fn retryable_commit_failure_falls_through() {
    let h = harness(
        PolicyDoc::default(),
        vec![SellerSpec::honest("prov-a", 2), SellerSpec::honest("prov-b", 3)],
    );
    // First rail commit fails; the second (for prov-b) succeeds.
    h.rail.set_fail_commits(1);

    let mut input = weather_input();
    input.save_transcript = true;
    input.transcript_dir = Some(transcript_dir("fallback").display().to_string());

    let result = acquire(input, &h.deps).await;

    assert!(result.ok, "expected fallback success, got {:?}", result.reason);
    // prov-a won the ranking (id tiebreak) but prov-b settled.
    assert_eq!(result.seller_agent_id, Some(AgentId::from("prov-b")));
    assert_eq!(
        result.plan.as_deref().map(<[pact_types::ProviderId]>::len),
        Some(2)
    );

    let transcript = TranscriptStore::load(&result.transcript_path.unwrap()).unwrap();
    assert_eq!(transcript.settlement_attempts.len(), 2);
    assert_eq!(
        transcript.settlement_attempts[0].code,
        Some(FailureCode::SettlementFailed)
    );
    assert_eq!(transcript.settlement_attempts[0].retryable, Some(true));
    assert!(transcript.settlement_attempts[1].code.is_none());

    // The failed attempt's lock was aborted: the buyer only paid once.
    assert_eq!(
        common::balance(&h.rail, "buyer-1").await,
        rust_decimal::Decimal::ONE - rust_decimal::Decimal::new(8, 5)
    );
}

#[tokio::test]
async fn terminal_proof_failure_stops_iteration() {
    let mut cheat = SellerSpec::honest("prov-a", 2);
    cheat.config.bad_reveal = true;
    let h = harness(
        PolicyDoc::default(),
        vec![cheat, SellerSpec::honest("prov-b", 3)],
    );

    let mut input = weather_input();
    input.save_transcript = true;
    input.transcript_dir = Some(transcript_dir("failed-proof").display().to_string());

    let result = acquire(input, &h.deps).await;

    assert!(!result.ok);
    assert_eq!(result.code, Some(FailureCode::FailedProof));

    // Terminal: no second attempt happened.
    let transcript = TranscriptStore::load(&result.transcript_path.unwrap()).unwrap();
    assert_eq!(transcript.settlement_attempts.len(), 1);
    assert_eq!(transcript.outcome.code, Some(FailureCode::FailedProof));
    let failure_event = transcript.failure_event.as_ref().expect("failure event");
    assert_eq!(failure_event.code, FailureCode::FailedProof);
}

#[tokio::test]
async fn bad_proof_returns_buyer_funds() {
    let mut cheat = SellerSpec::honest("prov-a", 2);
    cheat.config.bad_reveal = true;
    let h = harness(PolicyDoc::default(), vec![cheat]);

    let before = common::balance(&h.rail, "buyer-1").await;
    let result = acquire(weather_input(), &h.deps).await;
    assert!(!result.ok);

    // Locks unwound: the buyer is whole.
    assert_eq!(common::balance(&h.rail, "buyer-1").await, before);
}

#[tokio::test]
async fn quote_outage_falls_back_to_second_provider() {
    let mut flaky = SellerSpec::honest("prov-a", 2);
    flaky.config.fail_quote = true;
    let h = harness(
        PolicyDoc::default(),
        vec![flaky, SellerSpec::honest("prov-b", 3)],
    );

    let result = acquire(weather_input(), &h.deps).await;

    // prov-a never produced an eligible quote; prov-b simply wins.
    assert!(result.ok, "expected success, got {:?}", result.reason);
    assert_eq!(result.offers_eligible, 1);
    assert_eq!(result.seller_agent_id, Some(AgentId::from("prov-b")));
}

#[tokio::test]
async fn all_attempts_exhausted_reports_last_error() {
    let h = harness(
        PolicyDoc::default(),
        vec![SellerSpec::honest("prov-a", 2), SellerSpec::honest("prov-b", 3)],
    );
    // Both commits fail retryably.
    h.rail.set_fail_commits(2);

    let result = acquire(weather_input(), &h.deps).await;
    assert!(!result.ok);
    assert_eq!(result.code, Some(FailureCode::SettlementFailed));
}
