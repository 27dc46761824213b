//! At-most-one-commit per intent fingerprint (PACT-331).

mod common;

use common::{balance, harness, transcript_dir, weather_input, SellerSpec};
use pact_orchestrator::{acquire, TranscriptStore};
use pact_types::{FailureCode, PolicyDoc};

#[tokio::test]
async fn second_identical_acquire_is_a_double_commit() {
    let h = harness(PolicyDoc::default(), vec![SellerSpec::honest("prov-a", 2)]);
    let dir = transcript_dir("double-commit");

    let mut first = weather_input();
    first.save_transcript = true;
    first.transcript_dir = Some(dir.display().to_string());
    let first_result = acquire(first, &h.deps).await;
    assert!(first_result.ok, "first run must succeed: {:?}", first_result.reason);
    let first_path = first_result.transcript_path.clone().expect("first transcript");

    let buyer_after_first = balance(&h.rail, "buyer-1").await;
    let seller_after_first = balance(&h.rail, "prov-a").await;

    // Identical economic intent against the same store.
    let mut second = weather_input();
    second.save_transcript = true;
    second.transcript_dir = Some(dir.display().to_string());
    let second_result = acquire(second, &h.deps).await;

    assert!(!second_result.ok);
    assert_eq!(second_result.code, Some(FailureCode::Pact331));
    let reason = second_result.reason.clone().expect("reason");
    assert!(reason.contains("Double commit detected"), "{reason}");
    assert!(reason.contains("Prior transcript"), "{reason}");
    assert!(
        reason.contains(&first_path.display().to_string()),
        "prior transcript reference preserved: {reason}"
    );

    // No settlement side effects on the second run.
    assert_eq!(balance(&h.rail, "buyer-1").await, buyer_after_first);
    assert_eq!(balance(&h.rail, "prov-a").await, seller_after_first);

    // A failure transcript was still written.
    let second_path = second_result.transcript_path.expect("failure transcript");
    let transcript = TranscriptStore::load(&second_path).unwrap();
    assert_eq!(transcript.schema_version, 1);
    assert!(!transcript.outcome.ok);
    assert_eq!(transcript.outcome.code, Some(FailureCode::Pact331));
    assert!(transcript.receipt.is_none());
}

#[tokio::test]
async fn store_holds_exactly_one_fingerprint_entry() {
    let h = harness(PolicyDoc::default(), vec![SellerSpec::honest("prov-a", 2)]);
    let result = acquire(weather_input(), &h.deps).await;
    assert!(result.ok);

    use pact_policy::ReputationStore as _;
    let fingerprint = pact_types::intent_fingerprint(
        "weather.data",
        "NYC",
        &pact_types::Constraints {
            latency_ms: 50,
            freshness_sec: 10,
        },
        &pact_types::AgentId::from("buyer-1"),
    );
    let prior = h
        .reputation
        .has_committed_fingerprint(&fingerprint)
        .expect("fingerprint recorded");
    assert_eq!(prior.intent_id, result.intent_id);
}

#[tokio::test]
async fn different_scope_is_a_different_intent() {
    let h = harness(PolicyDoc::default(), vec![SellerSpec::honest("prov-a", 2)]);
    let first = acquire(weather_input(), &h.deps).await;
    assert!(first.ok);

    let mut other = weather_input();
    other.scope = "Boston".into();
    let second = acquire(other, &h.deps).await;
    assert!(second.ok, "distinct fingerprints commit independently");
}
