//! Streaming settlement: full budget, buyer stop, monotone payments.

mod common;

use rust_decimal::Decimal;

use common::{balance, harness, transcript_dir, weather_input, SellerSpec};
use pact_orchestrator::{acquire, TranscriptStore};
use pact_types::{FailureCode, PolicyDoc, SettlementMode};

#[tokio::test]
async fn streaming_runs_to_budget_exhaustion() {
    let h = harness(PolicyDoc::default(), vec![SellerSpec::honest("prov-a", 2)]);
    let mut input = weather_input();
    input.mode_override = Some(SettlementMode::Streaming);
    input.save_transcript = true;
    input.transcript_dir = Some(transcript_dir("stream-full").display().to_string());

    let result = acquire(input, &h.deps).await;
    assert!(result.ok, "expected success, got {:?}", result.reason);

    let receipt = result.receipt.expect("receipt");
    assert!(receipt.fulfilled);
    assert_eq!(receipt.paid_amount, Decimal::new(8, 5));
    // Default policy streams over 10 planned ticks.
    assert_eq!(receipt.ticks, Some(10));
    assert_eq!(receipt.chunks, Some(10));

    let transcript = TranscriptStore::load(&result.transcript_path.unwrap()).unwrap();
    let summary = transcript.streaming_summary.expect("streaming summary");
    assert!(summary.fulfilled);
    assert_eq!(summary.paid_amount, summary.budget);
    assert_eq!(transcript.streaming_attempts.len(), 1);

    // Seller earned the full budget on top of its float (bond returned).
    assert_eq!(
        balance(&h.rail, "prov-a").await,
        Decimal::new(1, 1) + Decimal::new(8, 5)
    );
}

#[tokio::test]
async fn buyer_stop_after_three_ticks() {
    let h = harness(PolicyDoc::default(), vec![SellerSpec::honest("prov-a", 2)]);
    let mut input = weather_input();
    input.mode_override = Some(SettlementMode::Streaming);
    input.buyer_stop_after_ticks = Some(3);

    let result = acquire(input, &h.deps).await;

    // A buyer stop is a successful (if unfulfilled) acquisition.
    assert!(result.ok, "expected success, got {:?}", result.reason);
    let receipt = result.receipt.expect("receipt");
    assert!(!receipt.fulfilled);
    assert_eq!(receipt.failure_code, Some(FailureCode::BuyerStopped));
    assert_eq!(receipt.ticks, Some(3));
    // Paid 3 of 10 slices: 3 × 0.000008 = 0.000024.
    assert_eq!(receipt.paid_amount, Decimal::new(24, 6));
    assert!(receipt.paid_amount < receipt.agreed_price);
}

#[tokio::test]
async fn streaming_payments_stay_within_budget() {
    let h = harness(PolicyDoc::default(), vec![SellerSpec::honest("prov-a", 2)]);
    let mut input = weather_input();
    input.mode_override = Some(SettlementMode::Streaming);
    input.save_transcript = true;
    input.transcript_dir = Some(transcript_dir("stream-budget").display().to_string());

    let result = acquire(input, &h.deps).await;
    assert!(result.ok);
    let receipt = result.receipt.unwrap();
    let epsilon = pact_types::constants::payment_epsilon();
    assert!(receipt.paid_amount <= receipt.agreed_price + epsilon);

    let transcript = TranscriptStore::load(&result.transcript_path.unwrap()).unwrap();
    for attempt in &transcript.streaming_attempts {
        assert!(attempt.paid_amount <= receipt.agreed_price + epsilon);
    }
}

#[tokio::test]
async fn streaming_fallback_carries_cumulative_state() {
    // Primary provider drops its stream after 4 chunks; the fallback
    // provider (same ask) finishes the budget.
    let mut primary = SellerSpec::honest("prov-a", 2);
    primary.config.fail_chunks_after = Some(4);
    let secondary = SellerSpec::honest("prov-b", 3);

    let h = harness(PolicyDoc::default(), vec![primary, secondary]);
    let mut input = weather_input();
    input.mode_override = Some(SettlementMode::Streaming);
    input.save_transcript = true;
    input.transcript_dir = Some(transcript_dir("stream-fallback").display().to_string());

    let result = acquire(input, &h.deps).await;
    assert!(result.ok, "expected success, got {:?}", result.reason);
    let receipt = result.receipt.expect("receipt");
    assert!(receipt.fulfilled);
    assert_eq!(receipt.ticks, Some(10), "total ticks span both attempts");
    assert_eq!(receipt.paid_amount, Decimal::new(8, 5));

    let transcript = TranscriptStore::load(&result.transcript_path.unwrap()).unwrap();
    assert_eq!(transcript.streaming_attempts.len(), 2);
    assert_eq!(transcript.streaming_attempts[0].ticks, 4);
    assert_eq!(
        transcript.streaming_attempts[0].code,
        Some(FailureCode::HttpStreamingError)
    );
    assert_eq!(transcript.streaming_attempts[1].ticks, 6);
    let summary = transcript.streaming_summary.unwrap();
    assert_eq!(summary.ticks, 10);
    assert_eq!(summary.chunks, 10, "chunk sequence continued across attempts");
}
