//! The buyer-side negotiation session.
//!
//! A small state machine driven by signed envelopes:
//!
//! ```text
//!   IDLE ──open_with_intent──▶ INTENT_SENT ──on_quote──▶ QUOTED
//!     QUOTED ──negotiate + accept──▶ ACCEPTED (funds + bond locked)
//!       ACCEPTED ──on_commit──▶ COMMITTED ──on_reveal──▶ COMPLETED
//!                                   └─ hash mismatch ──▶ FAILED
//! ```
//!
//! Transitions are monotonic; a consumed envelope is remembered by hash and
//! rejected on replay. Streaming mode hands control to
//! [`crate::StreamingExchange`] after ACCEPTED and the exchange terminates
//! the session.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use pact_policy::{GuardQuery, NegotiationContext, PolicyGuard, SettlementContext};
use pact_settlement::{CommitStatus, IdempotencyKey, SettlementRail, SlaTracker};
use pact_types::constants::REPLAY_GUARD_CAPACITY;
use pact_types::{
    Agreement, AgreementStatus, AgentId, Ask, Clock, Envelope, FailureCode, HandleId, Intent,
    Keypair, LifecycleStatus, Message, NegotiationRound, NegotiationSummary, PactError, Result,
    RouteRecord, SettlementEvent, SettlementLifecycle, SettlementMode, SettlementSegment,
    commit_reveal_hash,
};

use crate::strategy::{CounterScorer, StrategyDecision, StrategyInputs, StrategyKind, decide};

/// Where the session stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    IntentSent,
    Quoted,
    Accepted,
    Committed,
    Completed,
    Failed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "IDLE",
            Self::IntentSent => "INTENT_SENT",
            Self::Quoted => "QUOTED",
            Self::Accepted => "ACCEPTED",
            Self::Committed => "COMMITTED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// One planned settlement segment: how much, over which rail.
pub struct SegmentPlan {
    pub amount: Decimal,
    pub rail: Arc<dyn SettlementRail>,
    pub route: RouteRecord,
}

struct SegmentLedger {
    amount: Decimal,
    rail: Arc<dyn SettlementRail>,
    route: RouteRecord,
    handle: Option<HandleId>,
    status: LifecycleStatus,
    paid: Option<Decimal>,
    code: Option<FailureCode>,
}

impl SegmentLedger {
    fn record(&self, idx: u32) -> SettlementSegment {
        SettlementSegment {
            segment_idx: idx,
            amount: self.amount,
            rail: self.route.rail.clone(),
            status: self.status,
            handle_id: self.handle.clone(),
            paid_amount: self.paid,
            code: self.code,
        }
    }
}

/// What settling produced: money moved plus the transcript sections.
#[derive(Debug)]
pub struct SettlementReport {
    pub paid_amount: Decimal,
    pub lifecycle: SettlementLifecycle,
    pub segments: Vec<SettlementSegment>,
}

/// Bounded replay guard over consumed envelope hashes.
struct ReplayGuard {
    seen: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl ReplayGuard {
    fn new(capacity: usize) -> Self {
        Self {
            seen: HashSet::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    fn check_and_record(&mut self, envelope: &Envelope) -> Result<()> {
        let hash = envelope.content_hash()?;
        if self.seen.contains(&hash) {
            return Err(PactError::new(
                FailureCode::InvalidMessageType,
                "replayed envelope",
            ));
        }
        if self.seen.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.seen.insert(hash.clone());
        self.order.push_back(hash);
        Ok(())
    }
}

/// The buyer-side session for one (intent, provider) pair.
pub struct Session {
    state: SessionState,
    clock: Clock,
    guard: PolicyGuard,
    buyer_keys: Arc<Keypair>,
    buyer: AgentId,
    seller: AgentId,
    seller_pubkey_b58: String,
    base_key: IdempotencyKey,
    replay: ReplayGuard,
    sla: SlaTracker,
    intent: Option<Intent>,
    quote: Option<Ask>,
    agreed_price: Option<Decimal>,
    agreement: Option<Agreement>,
    rounds: Vec<NegotiationRound>,
    rounds_used: u32,
    negotiation_log: Vec<String>,
    segments: Vec<SegmentLedger>,
    bond_lock: Option<(Arc<dyn SettlementRail>, HandleId)>,
    commit_hash_hex: Option<String>,
    events: Vec<SettlementEvent>,
}

impl Session {
    #[must_use]
    pub fn new(
        clock: Clock,
        guard: PolicyGuard,
        buyer_keys: Arc<Keypair>,
        buyer: AgentId,
        seller: AgentId,
        seller_pubkey_b58: String,
        base_key: IdempotencyKey,
    ) -> Self {
        let sla = SlaTracker::new(guard.policy().doc.settlement.settlement_sla.clone());
        Self {
            state: SessionState::Idle,
            clock,
            guard,
            buyer_keys,
            buyer,
            seller,
            seller_pubkey_b58,
            base_key,
            replay: ReplayGuard::new(REPLAY_GUARD_CAPACITY),
            sla,
            intent: None,
            quote: None,
            agreed_price: None,
            agreement: None,
            rounds: Vec::new(),
            rounds_used: 0,
            negotiation_log: Vec::new(),
            segments: Vec::new(),
            bond_lock: None,
            commit_hash_hex: None,
            events: Vec::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn agreement(&self) -> Option<&Agreement> {
        self.agreement.as_ref()
    }

    #[must_use]
    pub fn rounds(&self) -> &[NegotiationRound] {
        &self.rounds
    }

    #[must_use]
    pub fn negotiation_summary(&self, strategy: StrategyKind) -> NegotiationSummary {
        NegotiationSummary {
            strategy: strategy.as_str().to_string(),
            rounds_used: self.rounds_used,
            log: self.negotiation_log.clone(),
        }
    }

    /// Violations the SLA tracker accumulated so far.
    #[must_use]
    pub fn sla_violations(&self) -> &[pact_types::SlaViolation] {
        self.sla.violations()
    }

    fn expect_state(&self, expected: SessionState, op: &str) -> Result<()> {
        if self.state != expected {
            return Err(PactError::new(
                FailureCode::NegotiationFailed,
                format!("{op} requires state {expected}, session is {}", self.state),
            ));
        }
        Ok(())
    }

    fn fail(&mut self) {
        self.state = SessionState::Failed;
        if let Some(agreement) = &mut self.agreement {
            // Best effort; an agreement already COMPLETED stays completed.
            let _ = agreement.transition(AgreementStatus::Failed);
        }
    }

    fn push_event(&mut self, kind: &str, detail: Option<String>) {
        self.events.push(SettlementEvent {
            at_ms: self.clock.now_ms(),
            kind: kind.to_string(),
            detail,
        });
    }

    // -- INTENT ------------------------------------------------------------

    /// Sign and send the INTENT. `Idle → IntentSent`.
    pub fn open_with_intent(&mut self, intent: Intent) -> Result<Envelope> {
        self.expect_state(SessionState::Idle, "open_with_intent")?;
        if intent.max_price <= Decimal::ZERO {
            self.fail();
            return Err(PactError::new(
                FailureCode::ProviderQuoteInvalid,
                "intent max_price must be positive",
            ));
        }
        let now = self.clock.now_ms();
        if intent.is_expired(now) {
            self.fail();
            return Err(PactError::new(
                FailureCode::NegotiationFailed,
                format!("intent expired at {}ms (now {now}ms)", intent.expires_at_ms),
            ));
        }
        let envelope = Envelope::seal(Message::Intent(intent.clone()), &self.buyer_keys)?;
        self.intent = Some(intent);
        self.state = SessionState::IntentSent;
        debug!(buyer = %self.buyer, seller = %self.seller, "intent sent");
        Ok(envelope)
    }

    // -- ASK ---------------------------------------------------------------

    /// Consume the seller's ASK. `IntentSent → Quoted`.
    pub fn on_quote(&mut self, envelope: &Envelope, reference_p50: Option<Decimal>) -> Result<Ask> {
        self.expect_state(SessionState::IntentSent, "on_quote")?;
        self.replay.check_and_record(envelope)?;
        envelope.verify_signer(&self.seller_pubkey_b58)?;

        let Message::Ask(ask) = &envelope.message else {
            return Err(PactError::new(
                FailureCode::InvalidMessageType,
                format!("expected ASK, got {}", envelope.message.kind()),
            ));
        };
        let intent = self.intent.as_ref().expect("set in open_with_intent");
        if ask.intent_id != intent.intent_id {
            return Err(PactError::new(
                FailureCode::InvalidMessageType,
                "ASK references a different intent",
            ));
        }

        let verdict = self.guard.check(&GuardQuery::Negotiation(NegotiationContext {
            quote_price: ask.ask_price,
            max_price: intent.max_price,
            reference_p50,
            firm: ask.firm,
        }));
        if let Some(code) = verdict.code {
            self.fail();
            return Err(PactError::new(
                code.to_failure_code(),
                format!("quote {} rejected: {code}", ask.ask_price),
            ));
        }

        self.quote = Some(ask.clone());
        self.state = SessionState::Quoted;
        Ok(ask.clone())
    }

    // -- COUNTER rounds ----------------------------------------------------

    /// Run the strategy over counter rounds; returns the agreed price.
    ///
    /// Stays in `Quoted`; [`Session::accept`] seals the price.
    pub fn negotiate(
        &mut self,
        kind: StrategyKind,
        scorer: Option<&dyn CounterScorer>,
        urgent: bool,
        reference_p50: Option<Decimal>,
    ) -> Result<Decimal> {
        self.expect_state(SessionState::Quoted, "negotiate")?;
        let (quote_price, max_price) = {
            let intent = self.intent.as_ref().expect("set in open_with_intent");
            let quote = self.quote.as_ref().expect("set in on_quote");
            (quote.ask_price, intent.max_price)
        };
        let (max_rounds, band_pct, urgency_band_factor) = {
            let neg = &self.guard.policy().doc.negotiation;
            (neg.max_rounds, neg.band_pct, neg.urgency_band_factor)
        };

        for round in 1..=max_rounds {
            let inputs = StrategyInputs {
                reference_price: reference_p50,
                quote_price,
                max_price,
                band_pct,
                urgency_band_factor,
                urgent,
                current_round: round,
                max_rounds,
            };
            let decision: StrategyDecision = decide(kind, &inputs, scorer);

            self.rounds.push(NegotiationRound {
                round,
                quote_price,
                counter_price: decision.counter_price,
                accepted: decision.accept,
                reason: decision.reason.clone(),
                within_band: decision.within_band,
                used_override: decision.used_override,
            });
            self.negotiation_log
                .push(format!("round {round}: {}", decision.reason));

            if decision.accept {
                self.rounds_used = round;
                let agreed = quote_price.min(max_price);
                self.agreed_price = Some(agreed);
                info!(rounds = round, price = %agreed, "negotiation accepted");
                return Ok(agreed);
            }
            if decision.counter_price.is_none() {
                // The strategy rejected outright; further rounds are moot.
                self.rounds_used = round;
                self.fail();
                return Err(PactError::new(
                    FailureCode::NegotiationFailed,
                    decision.reason,
                ));
            }
        }

        self.rounds_used = max_rounds;
        self.fail();
        Err(PactError::new(
            FailureCode::NegotiationFailed,
            format!("no acceptance within {max_rounds} rounds"),
        ))
    }

    // -- ACCEPT ------------------------------------------------------------

    /// Sign the ACCEPT and lock funds. `Quoted → Accepted`.
    ///
    /// For hash-reveal, `segments` carries one plan per settlement segment
    /// (usually one). For streaming, pass no segments: per-tick payments
    /// move directly and only the seller bond is locked.
    pub async fn accept(
        &mut self,
        segments: Vec<SegmentPlan>,
        bond_rail: Arc<dyn SettlementRail>,
    ) -> Result<(Envelope, Agreement)> {
        self.expect_state(SessionState::Quoted, "accept")?;
        let agreed_price = self.agreed_price.ok_or_else(|| {
            PactError::new(FailureCode::NoAgreement, "accept before negotiate")
        })?;
        let intent = self.intent.as_ref().expect("set in open_with_intent");
        let doc = &self.guard.policy().doc;

        let seller_bond = doc
            .economics
            .seller_min_bond
            .max(agreed_price * doc.economics.seller_bond_multiple);

        let verdict = self.guard.check(&GuardQuery::Settlement(SettlementContext {
            amount: agreed_price,
            seller_bond,
            mode: intent.settlement_mode,
        }));
        if let Some(code) = verdict.code {
            self.fail();
            return Err(PactError::new(
                code.to_failure_code(),
                format!("settlement rejected by policy: {code}"),
            ));
        }

        let now = self.clock.now_ms();
        let envelope = Envelope::seal(
            Message::Accept(pact_types::Accept {
                intent_id: intent.intent_id,
                agreed_price,
                settlement_mode: intent.settlement_mode,
                sent_at_ms: now,
            }),
            &self.buyer_keys,
        )?;

        let agreement = Agreement {
            intent_id: intent.intent_id,
            agreed_price,
            settlement_mode: intent.settlement_mode,
            challenge_window_ms: doc.settlement.windows.challenge_window_ms,
            delivery_deadline_ms: now + doc.settlement.windows.delivery_deadline_ms,
            seller_bond,
            status: AgreementStatus::Open,
        };

        // Lock buyer funds per segment, unwinding on any failure.
        for (idx, plan) in segments.into_iter().enumerate() {
            let key = self.base_key.scoped(&format!("seg-{idx}-lock"));
            match plan
                .rail
                .lock(&key, &self.buyer, &self.seller, plan.amount)
                .await
            {
                Ok(handle) => {
                    self.push_event(
                        "lock",
                        Some(format!("segment {idx} locked {} on {}", plan.amount, plan.route.rail)),
                    );
                    self.segments.push(SegmentLedger {
                        amount: plan.amount,
                        rail: plan.rail,
                        route: plan.route,
                        handle: Some(handle),
                        status: LifecycleStatus::Preparing,
                        paid: None,
                        code: None,
                    });
                }
                Err(err) => {
                    warn!(segment = idx, error = %err, "segment lock failed; unwinding");
                    self.unwind().await;
                    self.fail();
                    return Err(err);
                }
            }
        }

        // Lock the seller bond toward the buyer.
        let bond_key = self.base_key.scoped("bond-lock");
        match bond_rail
            .lock(&bond_key, &self.seller, &self.buyer, seller_bond)
            .await
        {
            Ok(handle) => {
                self.push_event("bond_lock", Some(format!("seller bond {seller_bond}")));
                self.bond_lock = Some((bond_rail, handle));
            }
            Err(err) => {
                warn!(error = %err, "bond lock failed; unwinding");
                self.unwind().await;
                self.fail();
                return Err(err);
            }
        }

        self.sla.record_prepared(now);
        self.agreement = Some(agreement.clone());
        self.state = SessionState::Accepted;
        Ok((envelope, agreement))
    }

    // -- COMMIT / REVEAL (hash-reveal mode) --------------------------------

    /// Consume the seller's COMMIT. `Accepted → Committed`.
    pub fn on_commit(&mut self, envelope: &Envelope) -> Result<()> {
        self.expect_state(SessionState::Accepted, "on_commit")?;
        let mode = self.agreement.as_ref().map(|a| a.settlement_mode);
        if mode != Some(SettlementMode::HashReveal) {
            return Err(PactError::new(
                FailureCode::InvalidMessageType,
                "COMMIT is only valid in hash_reveal mode",
            ));
        }
        self.replay.check_and_record(envelope)?;
        envelope.verify_signer(&self.seller_pubkey_b58)?;
        let Message::Commit(commit) = &envelope.message else {
            return Err(PactError::new(
                FailureCode::InvalidMessageType,
                format!("expected COMMIT, got {}", envelope.message.kind()),
            ));
        };
        self.commit_hash_hex = Some(commit.commit_hash_hex.clone());
        if let Some(agreement) = &mut self.agreement {
            agreement.transition(AgreementStatus::Committed)?;
        }
        self.push_event("commit_hash", Some(commit.commit_hash_hex.clone()));
        self.state = SessionState::Committed;
        Ok(())
    }

    /// Consume the seller's REVEAL, verify the proof, and settle.
    /// `Committed → Completed` (or `Failed` on a bad proof).
    pub async fn on_reveal(&mut self, envelope: &Envelope) -> Result<SettlementReport> {
        self.expect_state(SessionState::Committed, "on_reveal")?;
        self.replay.check_and_record(envelope)?;
        envelope.verify_signer(&self.seller_pubkey_b58)?;
        let Message::Reveal(reveal) = &envelope.message else {
            return Err(PactError::new(
                FailureCode::InvalidMessageType,
                format!("expected REVEAL, got {}", envelope.message.kind()),
            ));
        };

        let expected = self.commit_hash_hex.clone().expect("set in on_commit");
        let actual = commit_reveal_hash(&reveal.payload_b64, &reveal.nonce_b64);
        if actual != expected {
            warn!("reveal hash mismatch");
            self.unwind().await;
            self.fail();
            return Err(PactError::new(
                FailureCode::FailedProof,
                format!("reveal hash {actual} does not match commit {expected}"),
            ));
        }
        self.push_event("reveal_verified", None);

        self.settle_segments().await
    }

    /// Commit every locked segment with bounded polling, then release the
    /// bond and complete.
    async fn settle_segments(&mut self) -> Result<SettlementReport> {
        let sla_policy = self.sla.policy().clone();
        let mut paid_total = Decimal::ZERO;

        for idx in 0..self.segments.len() {
            let key = self.base_key.scoped(&format!("seg-{idx}-commit"));
            let (rail, handle) = {
                let seg = &self.segments[idx];
                (
                    Arc::clone(&seg.rail),
                    seg.handle.clone().expect("locked in accept"),
                )
            };

            let mut outcome = rail.commit(&key, &handle).await?;
            let mut polls: u32 = 0;
            while outcome.status == CommitStatus::Pending && polls < sla_policy.max_poll_attempts {
                // The deterministic clock stands in for the poll interval.
                let now = self.clock.now_ms();
                self.sla.check_pending(now);
                outcome = rail.poll(&handle).await?;
                polls += 1;
            }

            match outcome.status {
                CommitStatus::Committed => {
                    let paid = outcome.paid_amount.unwrap_or(self.segments[idx].amount);
                    paid_total += paid;
                    let seg = &mut self.segments[idx];
                    seg.status = LifecycleStatus::Committed;
                    seg.paid = Some(paid);
                    self.push_event("segment_committed", Some(format!("segment {idx} paid {paid}")));
                }
                CommitStatus::Pending => {
                    let now = self.clock.now_ms();
                    self.sla.record_poll_exhausted(now, polls);
                    let seg = &mut self.segments[idx];
                    seg.status = LifecycleStatus::Pending;
                    // Handle stays for reconciliation; no state change.
                    let report = self.build_report(LifecycleStatus::Pending, paid_total, None);
                    return Err(PactError::new(
                        FailureCode::SettlementPollTimeout,
                        format!(
                            "segment {idx} still pending after {polls} polls (handle {})",
                            report
                                .lifecycle
                                .handle_id
                                .as_ref()
                                .map_or("?", |h| h.0.as_str())
                        ),
                    ));
                }
                CommitStatus::Failed => {
                    let code = outcome
                        .failure_code
                        .unwrap_or(FailureCode::SettlementFailed);
                    let reason = outcome
                        .failure_reason
                        .clone()
                        .unwrap_or_else(|| "rail commit failed".to_string());
                    {
                        let seg = &mut self.segments[idx];
                        seg.status = LifecycleStatus::Failed;
                        seg.code = Some(code);
                    }
                    self.unwind().await;
                    self.fail();
                    return Err(PactError::new(code, reason));
                }
            }
        }

        // Return the seller's bond.
        if let Some((rail, handle)) = self.bond_lock.take() {
            let key = self.base_key.scoped("bond-release");
            rail.release(&key, &handle).await?;
            self.push_event("bond_released", None);
        }

        if let Some(agreement) = &mut self.agreement {
            agreement.transition(AgreementStatus::Completed)?;
        }
        self.state = SessionState::Completed;
        info!(paid = %paid_total, "hash-reveal settlement complete");
        Ok(self.build_report(LifecycleStatus::Committed, paid_total, None))
    }

    /// Terminate a streaming session: release the bond and record totals.
    pub async fn finish_streaming(&mut self, fulfilled: bool, paid: Decimal) -> Result<()> {
        self.expect_state(SessionState::Accepted, "finish_streaming")?;
        if let Some((rail, handle)) = self.bond_lock.take() {
            let key = self.base_key.scoped("bond-release");
            rail.release(&key, &handle).await?;
            self.push_event("bond_released", None);
        }
        if let Some(agreement) = &mut self.agreement {
            if fulfilled {
                agreement.transition(AgreementStatus::Committed)?;
                agreement.transition(AgreementStatus::Completed)?;
            } else {
                agreement.transition(AgreementStatus::Failed)?;
            }
        }
        self.push_event("streaming_finished", Some(format!("paid {paid}")));
        self.state = if fulfilled {
            SessionState::Completed
        } else {
            SessionState::Failed
        };
        Ok(())
    }

    /// Abort all active locks (failure path). Safe to call repeatedly.
    pub async fn unwind(&mut self) {
        for idx in 0..self.segments.len() {
            let (rail, handle, active) = {
                let seg = &self.segments[idx];
                // A failed commit leaves its lock alive on the rail; abort
                // returns those funds too.
                (
                    Arc::clone(&seg.rail),
                    seg.handle.clone(),
                    matches!(
                        seg.status,
                        LifecycleStatus::Preparing | LifecycleStatus::Failed
                    ),
                )
            };
            if let (Some(handle), true) = (handle, active) {
                let key = self.base_key.scoped(&format!("seg-{idx}-abort"));
                if rail.abort(&key, &handle).await.is_ok() {
                    self.segments[idx].status = LifecycleStatus::Aborted;
                }
            }
        }
        if let Some((rail, handle)) = self.bond_lock.take() {
            let key = self.base_key.scoped("bond-abort");
            let _ = rail.abort(&key, &handle).await;
        }
    }

    /// Assemble the lifecycle + segment records for the transcript.
    #[must_use]
    pub fn build_report(
        &self,
        status: LifecycleStatus,
        paid_amount: Decimal,
        failure: Option<(FailureCode, String)>,
    ) -> SettlementReport {
        let primary = self.segments.first();
        let lifecycle = SettlementLifecycle {
            provider: primary.map_or_else(
                || "mock".to_string(),
                |seg| seg.route.rail.clone(),
            ),
            idempotency_key: self.base_key.as_str().to_string(),
            status,
            handle_id: primary.and_then(|seg| seg.handle.clone()),
            prepared_at_ms: self.events.iter().find(|e| e.kind == "lock").map(|e| e.at_ms),
            committed_at_ms: self
                .events
                .iter()
                .find(|e| e.kind == "segment_committed")
                .map(|e| e.at_ms),
            aborted_at_ms: None,
            paid_amount: (paid_amount > Decimal::ZERO).then_some(paid_amount),
            settlement_events: self.events.clone(),
            failure_code: failure.as_ref().map(|(code, _)| *code),
            failure_reason: failure.map(|(_, reason)| reason),
            errors: Vec::new(),
            routing: primary.map(|seg| seg.route.clone()),
        };
        let segments = self
            .segments
            .iter()
            .enumerate()
            .map(|(idx, seg)| seg.record(u32::try_from(idx).unwrap_or(u32::MAX)))
            .collect();
        SettlementReport {
            paid_amount,
            lifecycle,
            segments,
        }
    }
}
