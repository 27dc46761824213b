//! Tick-driven pay-as-you-go settlement.
//!
//! Each tick receives one signed chunk from the provider and pays one
//! budget slice through the rail. Cumulative state — ticks, chunk
//! sequence, paid amount — lives *outside* the exchange and survives
//! fallback to the next provider: sequence numbers continue and the
//! receipt reflects total paid across all attempts.
//!
//! Payment invariant: `paid_amount` is monotone non-decreasing and never
//! exceeds `total_budget + 1e-12`.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use pact_settlement::{IdempotencyKey, SettlementRail};
use pact_types::constants::{STREAM_AMOUNT_DP, STREAM_BATCH_MAX, STREAM_BATCH_MIN, payment_epsilon};
use pact_types::{
    AgentId, CancelToken, Clock, Envelope, FailureCode, IntentId, Message, PactError, Result,
};

/// Supplies the provider's signed STREAM_CHUNK envelopes, one per tick.
#[async_trait]
pub trait ChunkSource: Send + Sync {
    async fn next_chunk(
        &self,
        intent_id: IntentId,
        seq: u64,
        sent_at_ms: u64,
    ) -> Result<Envelope>;
}

/// Static inputs of one streaming settlement.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamingConfig {
    /// Equal to the agreed price.
    pub total_budget: Decimal,
    pub tick_ms: u64,
    pub planned_ticks: u64,
    pub buyer_stop_after_ticks: Option<u64>,
}

/// State that survives fallback across providers.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StreamingCumulative {
    pub ticks: u64,
    pub chunks: u64,
    pub paid_amount: Decimal,
}

/// Why the exchange stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEndReason {
    /// Paid the full budget; the receipt is fulfilled.
    BudgetExhausted,
    /// The buyer's stop mark was reached; fulfilled = false.
    BuyerStopped,
    /// Break to the next candidate in the fallback plan.
    Retryable(PactError),
    /// Stop iteration; seal the transcript.
    Terminal(PactError),
}

/// One attempt's outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamingRunResult {
    pub reason: StreamEndReason,
    pub attempt_ticks: u64,
    pub attempt_chunks: u64,
    pub attempt_paid: Decimal,
    pub batches_emitted: u64,
}

/// Ticks per SETTLEMENT_STREAM_BATCH event: `clamp(floor(1000 / tick_ms), 5, 50)`.
#[must_use]
pub fn batch_size(tick_ms: u64) -> u64 {
    (1_000 / tick_ms.max(1)).clamp(STREAM_BATCH_MIN, STREAM_BATCH_MAX)
}

/// Drives one streaming attempt against one provider.
pub struct StreamingExchange<'a> {
    pub config: &'a StreamingConfig,
    pub rail: Arc<dyn SettlementRail>,
    pub source: &'a dyn ChunkSource,
    /// The contention winner; chunks signed by anyone else are terminal.
    pub winner_pubkey_b58: &'a str,
    pub buyer: &'a AgentId,
    pub seller: &'a AgentId,
    pub base_key: IdempotencyKey,
    pub cancel: CancelToken,
}

impl StreamingExchange<'_> {
    /// Run ticks until the budget, the buyer, an error, or cancellation
    /// stops the attempt. `on_batch` fires every [`batch_size`] ticks with
    /// the cumulative totals and the stream-clock reading.
    pub async fn run(
        &self,
        clock: &Clock,
        intent_id: IntentId,
        cumulative: &mut StreamingCumulative,
        on_batch: &mut dyn FnMut(&StreamingCumulative, u64),
    ) -> StreamingRunResult {
        let budget = self.config.total_budget;
        let per_tick = (budget / Decimal::from(self.config.planned_ticks.max(1)))
            .round_dp(STREAM_AMOUNT_DP);
        if per_tick <= Decimal::ZERO {
            return self.finish(
                StreamEndReason::Terminal(PactError::new(
                    FailureCode::StreamingNotConfigured,
                    format!(
                        "per-tick amount rounds to zero (budget {budget} over {} ticks)",
                        self.config.planned_ticks
                    ),
                )),
                0,
                0,
                Decimal::ZERO,
                0,
            );
        }

        let mut stream_clock = clock.fork_stream(self.config.tick_ms);
        let batch = batch_size(self.config.tick_ms);
        let epsilon = payment_epsilon();

        let mut attempt_ticks = 0u64;
        let mut attempt_chunks = 0u64;
        let mut attempt_paid = Decimal::ZERO;
        let mut batches = 0u64;

        loop {
            if cumulative.paid_amount + epsilon >= budget {
                info!(paid = %cumulative.paid_amount, "streaming budget exhausted");
                return self.finish(
                    StreamEndReason::BudgetExhausted,
                    attempt_ticks,
                    attempt_chunks,
                    attempt_paid,
                    batches,
                );
            }
            if self.cancel.is_cancelled() {
                return self.finish(
                    StreamEndReason::Terminal(PactError::new(
                        FailureCode::BuyerStopped,
                        "cancelled between ticks",
                    )),
                    attempt_ticks,
                    attempt_chunks,
                    attempt_paid,
                    batches,
                );
            }

            // Chunk sequence continues across attempts.
            let seq = cumulative.chunks;
            let sent_at_ms = stream_clock.now_ms();
            let envelope = match self.source.next_chunk(intent_id, seq, sent_at_ms).await {
                Ok(envelope) => envelope,
                Err(err) => {
                    let reason = if err.is_retryable() {
                        StreamEndReason::Retryable(err)
                    } else {
                        StreamEndReason::Terminal(err)
                    };
                    return self.finish(reason, attempt_ticks, attempt_chunks, attempt_paid, batches);
                }
            };

            if let Err(err) = envelope.verify() {
                warn!(seq, "chunk signature invalid");
                return self.finish(
                    StreamEndReason::Retryable(err),
                    attempt_ticks,
                    attempt_chunks,
                    attempt_paid,
                    batches,
                );
            }
            if envelope.signer_public_key_b58 != self.winner_pubkey_b58 {
                // A different key settling the winner's intent is contention
                // breach, not a transient fault.
                return self.finish(
                    StreamEndReason::Terminal(PactError::new(
                        FailureCode::Pact330,
                        format!(
                            "stream chunk {seq} signed by {} but winner is {}",
                            envelope.signer_public_key_b58, self.winner_pubkey_b58
                        ),
                    )),
                    attempt_ticks,
                    attempt_chunks,
                    attempt_paid,
                    batches,
                );
            }
            let chunk_ok = matches!(
                &envelope.message,
                Message::StreamChunk(chunk) if chunk.seq == seq && chunk.intent_id == intent_id
            );
            if !chunk_ok {
                return self.finish(
                    StreamEndReason::Retryable(PactError::new(
                        FailureCode::InvalidMessageType,
                        format!("expected STREAM_CHUNK seq {seq}"),
                    )),
                    attempt_ticks,
                    attempt_chunks,
                    attempt_paid,
                    batches,
                );
            }

            // Never exceed the budget: the final slice may be smaller.
            let amount = per_tick.min(budget - cumulative.paid_amount);
            let debit_key = self.base_key.scoped(&format!("tick-{seq}-debit"));
            let credit_key = self.base_key.scoped(&format!("tick-{seq}-credit"));
            if let Err(err) = self
                .rail
                .debit(&debit_key, self.buyer, amount, None, None)
                .await
            {
                return self.finish(
                    self.classify(err),
                    attempt_ticks,
                    attempt_chunks,
                    attempt_paid,
                    batches,
                );
            }
            if let Err(err) = self
                .rail
                .credit(&credit_key, self.seller, amount, None, None)
                .await
            {
                return self.finish(
                    self.classify(err),
                    attempt_ticks,
                    attempt_chunks,
                    attempt_paid,
                    batches,
                );
            }

            cumulative.ticks += 1;
            cumulative.chunks += 1;
            cumulative.paid_amount += amount;
            attempt_ticks += 1;
            attempt_chunks += 1;
            attempt_paid += amount;
            let stream_now = stream_clock.tick();
            debug!(seq, %amount, paid = %cumulative.paid_amount, "tick settled");

            if attempt_ticks % batch == 0 {
                batches += 1;
                on_batch(cumulative, stream_now);
            }

            if self
                .config
                .buyer_stop_after_ticks
                .is_some_and(|stop| cumulative.ticks >= stop)
            {
                info!(ticks = cumulative.ticks, "buyer stop mark reached");
                return self.finish(
                    StreamEndReason::BuyerStopped,
                    attempt_ticks,
                    attempt_chunks,
                    attempt_paid,
                    batches,
                );
            }
        }
    }

    fn classify(&self, err: PactError) -> StreamEndReason {
        if err.is_retryable() {
            StreamEndReason::Retryable(err)
        } else {
            StreamEndReason::Terminal(err)
        }
    }

    #[allow(clippy::unused_self)]
    fn finish(
        &self,
        reason: StreamEndReason,
        attempt_ticks: u64,
        attempt_chunks: u64,
        attempt_paid: Decimal,
        batches_emitted: u64,
    ) -> StreamingRunResult {
        StreamingRunResult {
            reason,
            attempt_ticks,
            attempt_chunks,
            attempt_paid,
            batches_emitted,
        }
    }
}
