//! The acquire orchestrator.
//!
//! One explicit run struct owns all mutable state — transcript sections,
//! contention, cumulative streaming counters, the event runner — and the
//! phase methods thread it by `&mut self`. No state hides in closures.
//!
//! The bounded retry loop walks the fallback plan: winner first, then the
//! remaining eligible candidates by utility. Retryable failures advance the
//! plan; terminal failures seal the transcript; SETTLEMENT_POLL_TIMEOUT
//! leaves the lifecycle pending for reconciliation.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{info, warn};

use pact_policy::{
    CompiledPolicy, PolicyGuard, ReputationStore, ZkVerifier, compile, enforce_zk_kya,
};
use pact_session::{
    SegmentPlan, Session, StrategyKind, StreamEndReason, StreamingConfig, StreamingCumulative,
    StreamingExchange,
};
use pact_settlement::{IdempotencyKey, SettlementRail, SettlementRouter};
use pact_types::constants::{DEFAULT_FANOUT, STREAM_AMOUNT_DP};
use pact_types::{
    AgentId, CancelToken, Clock, ContentionRecord, ExplainEntry, ExplainLevel, ExplainReport,
    FailureCode, Intent, IntentId, Keypair, NegotiationSummary, Outcome, PactError, PolicyDoc,
    ProviderId, Receipt, Result, SelectionRecord, SettlementAttempt, SettlementMode,
    SettlementSummary, SignatureMetadata, StreamingAttempt, StreamingSummary, Transcript,
    WalletRecord, contention_fingerprint, intent_fingerprint, sha256_hex_bytes,
};

use crate::directory::ProviderDirectory;
use crate::evaluate::{BuyerOverrides, EvaluatedCandidate, evaluate_candidate, rank_eligible};
use crate::events::{Event, EventKind, EventRunner, event_idempotency_key};
use crate::input::{AcquireInput, AssetSpec};
use crate::transcript_store::{TranscriptStore, sanitize_input};
use crate::transport::{CommitRequest, ProviderTransport, QuoteRequest, RevealRequest, TransportChunkSource};
use crate::wallet::WalletAdapter;

/// Everything an acquire run needs from its environment.
pub struct AcquireDeps {
    pub buyer_keys: Arc<Keypair>,
    pub buyer_id: AgentId,
    pub policy: PolicyDoc,
    pub directory: ProviderDirectory,
    pub transports: HashMap<ProviderId, Arc<dyn ProviderTransport>>,
    pub rails: HashMap<String, Arc<dyn SettlementRail>>,
    pub reputation: Arc<dyn ReputationStore>,
    pub wallet_adapters: HashMap<pact_types::WalletProviderKind, Arc<dyn WalletAdapter>>,
    pub zk_verifier: Arc<dyn ZkVerifier>,
    /// Injected clock; `None` falls back to the deterministic counter.
    pub clock: Option<Clock>,
    pub cancel: CancelToken,
}

/// The caller-facing outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquireResult {
    pub ok: bool,
    pub code: Option<FailureCode>,
    pub reason: Option<String>,
    pub intent_id: IntentId,
    pub buyer_agent_id: AgentId,
    pub seller_agent_id: Option<AgentId>,
    pub receipt: Option<Receipt>,
    pub offers_eligible: usize,
    /// The fallback plan, winner first.
    pub plan: Option<Vec<ProviderId>>,
    pub explain: Option<ExplainReport>,
    pub verification: Option<String>,
    pub transcript_path: Option<PathBuf>,
}

/// Run one acquisition end to end.
pub async fn acquire(input: AcquireInput, deps: &AcquireDeps) -> AcquireResult {
    AcquireRun::new(input, deps).execute().await
}

struct AcquireRun<'a> {
    input: AcquireInput,
    deps: &'a AcquireDeps,
    clock: Clock,
    fingerprint: String,
    intent_id: IntentId,
    transcript: Transcript,
    events: EventRunner,
    explain: ExplainReport,
    offers_eligible: usize,
    plan_ids: Vec<ProviderId>,
    seller_agent: Option<AgentId>,
    verification: Option<String>,
    asset_id: String,
    chain_id: String,
}

impl<'a> AcquireRun<'a> {
    fn new(input: AcquireInput, deps: &'a AcquireDeps) -> Self {
        let clock = deps.clock.clone().unwrap_or_else(Clock::counter);
        let fingerprint = intent_fingerprint(
            &input.intent_type,
            &input.scope,
            &input.constraints,
            &deps.buyer_id,
        );
        let started_ms = clock.now_ms();
        let intent_id = IntentId::derive(&fingerprint, started_ms);
        let mut transcript =
            Transcript::new(intent_id, fingerprint.clone(), deps.buyer_id.clone());
        transcript.input = serde_json::to_value(&input)
            .map(|v| sanitize_input(&v))
            .unwrap_or(serde_json::Value::Null);
        let explain = ExplainReport {
            level: input.explain,
            log: Vec::new(),
        };

        Self {
            input,
            deps,
            clock,
            fingerprint,
            intent_id,
            transcript,
            events: EventRunner::new(),
            explain,
            offers_eligible: 0,
            plan_ids: Vec::new(),
            seller_agent: None,
            verification: None,
            asset_id: String::new(),
            chain_id: String::new(),
        }
    }

    fn emit(
        &mut self,
        phase: &str,
        kind: EventKind,
        provider: Option<&ProviderId>,
        attempt_idx: usize,
        payload: serde_json::Value,
        failure: Option<&PactError>,
    ) {
        let event = Event {
            phase: phase.to_string(),
            kind,
            intent_id: self.intent_id,
            ts_ms: self.clock.now_ms(),
            payload,
            evidence: None,
            failure_code: failure.map(|e| e.code),
            failure_reason: failure.map(|e| e.reason.clone()),
            retryable: failure.map(PactError::is_retryable),
            idempotency_key: event_idempotency_key(
                &self.fingerprint,
                phase,
                provider.map(ProviderId::as_str),
                attempt_idx,
            ),
        };
        self.events.emit(event);
    }

    fn explain_exclusion(&mut self, provider: &ProviderId, err: &PactError) {
        if self.explain.level == ExplainLevel::None {
            return;
        }
        self.explain.log.push(ExplainEntry {
            provider_id: Some(provider.clone()),
            code: Some(err.code),
            detail: err.reason.clone(),
        });
    }

    /// Seal a failing run: outcome, failure event, transcript, result.
    fn finish_failure(mut self, err: PactError) -> AcquireResult {
        warn!(code = %err.code, reason = %err.reason, "acquire failed");
        self.transcript.outcome = Outcome::failure(err.code, err.reason.clone());
        let now = self.clock.now_ms();
        let _ = self
            .transcript
            .seal_failure(err.code, err.reason.clone(), now);
        self.emit(
            "settlement",
            EventKind::Failure,
            None,
            0,
            json!({"terminal": true}),
            Some(&err),
        );
        let path = self.commit_transcript_if_requested();
        self.result(Some(err), path)
    }

    /// Seal a successful run (including buyer-stopped streaming).
    fn finish_success(mut self, receipt: Receipt) -> AcquireResult {
        self.transcript.receipt = Some(receipt);
        self.transcript.outcome = Outcome::success();
        if let Some(wallet) = self.transcript.wallet.as_mut() {
            wallet.used = true;
        }
        let path = self.commit_transcript_if_requested();
        self.result(None, path)
    }

    fn commit_transcript_if_requested(&mut self) -> Option<PathBuf> {
        if !self.input.save_transcript {
            return None;
        }
        let dir = self
            .input
            .transcript_dir
            .clone()
            .unwrap_or_else(|| "transcripts".to_string());
        let mut store = TranscriptStore::new(dir);
        let now = self.clock.now_ms();
        match store.commit(&mut self.transcript, now) {
            Ok(path) => {
                self.emit(
                    "transcript_commit",
                    EventKind::Success,
                    None,
                    0,
                    json!({"path": path.display().to_string()}),
                    None,
                );
                Some(path)
            }
            Err(err) => {
                warn!(error = %err, "transcript write failed");
                None
            }
        }
    }

    fn result(self, err: Option<PactError>, path: Option<PathBuf>) -> AcquireResult {
        let explain = (self.explain.level != ExplainLevel::None).then_some(self.explain);
        AcquireResult {
            ok: err.is_none(),
            code: err.as_ref().map(|e| e.code),
            reason: err.map(|e| e.reason),
            intent_id: self.intent_id,
            buyer_agent_id: self.deps.buyer_id.clone(),
            seller_agent_id: self.seller_agent,
            receipt: self.transcript.receipt.clone(),
            offers_eligible: self.offers_eligible,
            plan: (!self.plan_ids.is_empty()).then(|| self.plan_ids.clone()),
            explain,
            verification: self.verification,
            transcript_path: path,
        }
    }

    #[allow(clippy::too_many_lines)]
    async fn execute(mut self) -> AcquireResult {
        // -- Policy compile ------------------------------------------------
        let compiled = match compile(self.deps.policy.clone()) {
            Ok(compiled) => compiled,
            Err(err) => {
                self.emit(
                    "policy_validation",
                    EventKind::Failure,
                    None,
                    0,
                    json!({}),
                    Some(&err),
                );
                return self.finish_failure(err);
            }
        };
        self.emit(
            "policy_validation",
            EventKind::Success,
            None,
            0,
            json!({"policy_hash": compiled.policy_hash}),
            None,
        );
        let guard = PolicyGuard::new(compiled.clone());

        // -- Asset resolution ---------------------------------------------
        let (asset_id, chain_id) = AssetSpec::resolve(self.input.asset.as_ref());
        self.asset_id = asset_id;
        self.chain_id = chain_id;

        // -- Wallet connect -----------------------------------------------
        if let Err(err) = self.connect_wallet().await {
            return self.finish_failure(err);
        }

        // -- ZK-KYA gate ---------------------------------------------------
        if let Some(zk_policy) = compiled.doc.zk_kya.clone() {
            let proof = self
                .input
                .identity
                .as_ref()
                .and_then(|i| i.buyer.as_ref())
                .and_then(|b| b.zk_kya_proof.clone());
            let now = self.clock.now_ms();
            if let Err(err) =
                enforce_zk_kya(&zk_policy, proof.as_ref(), &*self.deps.zk_verifier, now)
            {
                return self.finish_failure(err);
            }
        }

        // -- Market stats + execution routing ------------------------------
        let reference_p50 = self
            .deps
            .reputation
            .price_percentile(&self.input.intent_type, 0.5);
        let mode = self
            .input
            .mode_override
            .unwrap_or(SettlementMode::HashReveal);
        let max_rounds = compiled.doc.negotiation.max_rounds;
        self.emit(
            "policy_validation",
            EventKind::Progress,
            None,
            1,
            json!({
                "regime": if self.input.urgent { "urgent" } else { "standard" },
                "mode": mode.to_string(),
                "fanout": DEFAULT_FANOUT,
                "max_rounds": max_rounds,
                "reference_p50": reference_p50,
            }),
            None,
        );

        // -- Discovery ------------------------------------------------------
        let profiles: Vec<_> = self
            .deps
            .directory
            .lookup(&self.input.intent_type)
            .into_iter()
            .cloned()
            .collect();
        self.transcript.directory = profiles.iter().map(|p| p.directory_entry()).collect();
        if profiles.is_empty() {
            let err = PactError::new(
                FailureCode::NoProviders,
                format!("no providers serve {}", self.input.intent_type),
            );
            self.emit(
                "provider_discovery",
                EventKind::Failure,
                None,
                0,
                json!({}),
                Some(&err),
            );
            return self.finish_failure(err);
        }
        self.emit(
            "provider_discovery",
            EventKind::Success,
            None,
            0,
            json!({"candidates": profiles.len()}),
            None,
        );

        // -- Per-candidate evaluation ---------------------------------------
        let overrides = BuyerOverrides {
            require_credential: self.input.require_credential,
            min_trust_tier: self.input.min_trust_tier,
            min_trust_score: self.input.min_trust_score,
        };
        let quote_request = QuoteRequest {
            intent_id: self.intent_id,
            intent_type: self.input.intent_type.clone(),
            max_price: self.input.max_price,
            constraints: self.input.constraints,
            urgent: self.input.urgent,
        };
        let mut evaluated: Vec<EvaluatedCandidate> = Vec::with_capacity(profiles.len());
        for profile in &profiles {
            if let Err(err) = self.deps.cancel.checkpoint() {
                return self.finish_failure(err);
            }
            let Some(transport) = self.deps.transports.get(&profile.provider_id) else {
                let err = PactError::new(
                    FailureCode::HttpProviderError,
                    format!("no transport registered for {}", profile.provider_id),
                );
                self.explain_exclusion(&profile.provider_id, &err);
                self.emit(
                    "provider_evaluation",
                    EventKind::Failure,
                    Some(&profile.provider_id),
                    0,
                    json!({}),
                    Some(&err),
                );
                continue;
            };
            let candidate = evaluate_candidate(
                profile,
                transport.as_ref(),
                &guard,
                self.deps.reputation.as_ref(),
                overrides,
                &quote_request,
                reference_p50,
                &self.clock,
            )
            .await;

            self.transcript
                .credential_checks
                .push(candidate.credential_check.clone());
            self.transcript.quotes.push(candidate.quote_record.clone());
            if let Some(err) = &candidate.exclusion {
                self.explain_exclusion(&profile.provider_id, err);
                self.emit(
                    "provider_evaluation",
                    EventKind::Failure,
                    Some(&profile.provider_id),
                    0,
                    json!({"eligible": false}),
                    Some(err),
                );
            } else {
                self.emit(
                    "provider_evaluation",
                    EventKind::Success,
                    Some(&profile.provider_id),
                    0,
                    json!({"utility": candidate.evaluation.utility}),
                    None,
                );
            }
            evaluated.push(candidate);
        }

        // -- Ranking + fallback plan ---------------------------------------
        let order = rank_eligible(&evaluated);
        self.offers_eligible = order.len();
        if order.is_empty() {
            let err = PactError::new(
                FailureCode::NoEligibleProviders,
                format!("all {} candidates excluded", evaluated.len()),
            );
            return self.finish_failure(err);
        }
        let plan: Vec<usize> = order.into_iter().take(DEFAULT_FANOUT).collect();
        self.plan_ids = plan
            .iter()
            .map(|&i| evaluated[i].profile.provider_id.clone())
            .collect();

        let winner = &evaluated[plan[0]];
        self.transcript.selection = Some(SelectionRecord {
            winner: winner.profile.provider_id.clone(),
            winner_pubkey_b58: winner.profile.pubkey_b58.clone(),
            winner_utility: winner.evaluation.utility.unwrap_or(f64::MIN),
            fallback_order: self.plan_ids.clone(),
            evaluations: evaluated.iter().map(|c| c.evaluation.clone()).collect(),
        });
        self.transcript.contention = Some(ContentionRecord {
            winner_pubkey_b58: winner.profile.pubkey_b58.clone(),
            fingerprint_hex: contention_fingerprint(
                &self.input.intent_type,
                &compiled.policy_hash,
                &self.deps.buyer_id,
            ),
        });

        // -- Double-commit gate (PACT-331) ---------------------------------
        if let Some(prior) = self
            .deps
            .reputation
            .has_committed_fingerprint(&self.fingerprint)
        {
            let err = PactError::new(
                FailureCode::Pact331,
                format!(
                    "Double commit detected for fingerprint {}. Prior transcript: {} (intent {})",
                    self.fingerprint, prior.transcript_ref, prior.intent_id
                ),
            );
            return self.finish_failure(err);
        }

        // -- Bounded retry loop over the plan ------------------------------
        let mut cumulative = StreamingCumulative::default();
        let mut last_error: Option<PactError> = None;

        for (attempt_idx, &cand_idx) in plan.iter().enumerate() {
            if let Err(err) = self.deps.cancel.checkpoint() {
                return self.finish_failure(err);
            }
            let outcome = self
                .run_attempt(
                    &evaluated[cand_idx],
                    attempt_idx,
                    &compiled,
                    &guard,
                    mode,
                    reference_p50,
                    &mut cumulative,
                )
                .await;
            match outcome {
                AttemptOutcome::Succeeded(receipt) => {
                    return self.commit_success(receipt, &compiled).await;
                }
                AttemptOutcome::Pending(err) => {
                    // Lifecycle stays pending; reconciliation finishes it.
                    return self.finish_failure(err);
                }
                AttemptOutcome::Retryable(err) => {
                    info!(attempt = attempt_idx, code = %err.code, "advancing fallback plan");
                    last_error = Some(err);
                }
                AttemptOutcome::Terminal(err) => {
                    return self.finish_failure(err);
                }
            }
        }

        let err = last_error.unwrap_or_else(|| {
            PactError::new(FailureCode::NoReceipt, "no attempt produced a receipt")
        });
        self.finish_failure(err)
    }

    async fn connect_wallet(&mut self) -> Result<()> {
        let Some(wallet_input) = self.input.wallet.clone() else {
            return Ok(());
        };
        let adapter = self
            .deps
            .wallet_adapters
            .get(&wallet_input.provider)
            .ok_or_else(|| {
                PactError::new(
                    FailureCode::WalletConnectFailed,
                    format!("no adapter for wallet provider {}", wallet_input.provider),
                )
            })?;
        let session = adapter
            .connect(&self.chain_id, &wallet_input.params)
            .await
            .map_err(|e| PactError::new(FailureCode::WalletConnectFailed, e.reason))?;

        if wallet_input.requires_signature && !session.capabilities.can_sign_message {
            return Err(PactError::new(
                FailureCode::WalletCapabilityMissing,
                "wallet cannot sign messages",
            ));
        }
        if wallet_input.requires_transaction_signature
            && !session.capabilities.can_sign_transaction
        {
            return Err(PactError::new(
                FailureCode::WalletCapabilityMissing,
                "wallet cannot sign transactions",
            ));
        }
        if !session.capabilities.supports_chain(&self.chain_id) {
            return Err(PactError::new(
                FailureCode::WalletCapabilityMissing,
                format!("wallet does not support chain {}", self.chain_id),
            ));
        }

        let mut signature_metadata = None;
        let require_proof = self
            .input
            .identity
            .as_ref()
            .is_some_and(|i| i.require_wallet_proof);
        if require_proof {
            let action = wallet_input
                .signature_action
                .clone()
                .unwrap_or_else(|| "prove-control".to_string());
            let message = format!("pact:{action}:{}", self.fingerprint);
            let signature = adapter
                .sign_message(&session, message.as_bytes())
                .await
                .map_err(|e| PactError::new(FailureCode::WalletProofFailed, e.reason))?;
            signature_metadata = Some(SignatureMetadata {
                action,
                // The raw signature never enters the transcript.
                signature_hash_hex: sha256_hex_bytes(signature.as_bytes()),
            });
        }

        self.transcript.wallet = Some(WalletRecord {
            kind: session.kind,
            chain: session.chain.clone(),
            address: session.address.clone(),
            used: false,
            capabilities: session.capabilities.clone(),
            signature_metadata,
        });
        Ok(())
    }

    #[allow(clippy::too_many_arguments, clippy::too_many_lines)]
    async fn run_attempt(
        &mut self,
        candidate: &EvaluatedCandidate,
        attempt_idx: usize,
        compiled: &CompiledPolicy,
        guard: &PolicyGuard,
        mode: SettlementMode,
        reference_p50: Option<Decimal>,
        cumulative: &mut StreamingCumulative,
    ) -> AttemptOutcome {
        let provider_id = candidate.profile.provider_id.clone();
        let seller_agent = AgentId::new(provider_id.as_str());
        let started_at_ms = self.clock.now_ms();

        // Fallback hands contention to the current candidate.
        if let Some(contention) = self.transcript.contention.as_mut() {
            contention.winner_pubkey_b58 = candidate.profile.pubkey_b58.clone();
        }

        let lvsh = match self.transcript.compute_hash() {
            Ok(hash) => hash,
            Err(err) => return AttemptOutcome::Terminal(err),
        };

        // Route the settlement.
        let router = SettlementRouter::new(compiled.doc.settlement.settlement_routing.clone());
        let ask_price = candidate
            .ask
            .as_ref()
            .map(|a| a.ask_price)
            .unwrap_or_default();
        let route = match router.route(
            ask_price,
            mode,
            candidate.evaluation.trust_tier,
            candidate.evaluation.trust_score,
        ) {
            Ok(route) => route,
            Err(err) => return AttemptOutcome::Terminal(err),
        };
        let rail_name = self
            .input
            .settlement
            .as_ref()
            .and_then(|s| s.provider.clone())
            .unwrap_or_else(|| route.rail.clone());
        let Some(rail) = self.deps.rails.get(&rail_name).cloned() else {
            return self.attempt_failed(
                attempt_idx,
                &provider_id,
                candidate,
                mode,
                started_at_ms,
                PactError::new(
                    FailureCode::SettlementProviderNotImplemented,
                    format!("no rail registered under {rail_name}"),
                ),
            );
        };

        let base_key = match self
            .input
            .settlement
            .as_ref()
            .and_then(|s| s.idempotency_key.clone())
        {
            Some(raw) => IdempotencyKey::raw(raw).scoped(&format!("attempt-{attempt_idx}")),
            None => IdempotencyKey::derive(
                &lvsh,
                "settlement",
                &rail_name,
                provider_id.as_str(),
                attempt_idx,
            ),
        };

        // The session for this (intent, provider) pair.
        let mut session = Session::new(
            self.clock.clone(),
            guard.clone(),
            Arc::clone(&self.deps.buyer_keys),
            self.deps.buyer_id.clone(),
            seller_agent.clone(),
            candidate.profile.pubkey_b58.clone(),
            base_key.clone(),
        );

        let sent_at_ms = self.clock.now_ms();
        let intent = Intent {
            intent_id: self.intent_id,
            intent_type: self.input.intent_type.clone(),
            scope: self.input.scope.clone(),
            constraints: self.input.constraints,
            max_price: self.input.max_price,
            settlement_mode: mode,
            sent_at_ms,
            expires_at_ms: sent_at_ms + compiled.doc.settlement.windows.intent_ttl_ms,
        };
        if let Err(err) = session.open_with_intent(intent) {
            return self.attempt_failed(attempt_idx, &provider_id, candidate, mode, started_at_ms, err);
        }

        let Some(ask_envelope) = candidate.ask_envelope.clone() else {
            return self.attempt_failed(
                attempt_idx,
                &provider_id,
                candidate,
                mode,
                started_at_ms,
                PactError::new(FailureCode::ProviderQuoteInvalid, "candidate has no quote"),
            );
        };
        if let Err(err) = session.on_quote(&ask_envelope, reference_p50) {
            return self.attempt_failed(attempt_idx, &provider_id, candidate, mode, started_at_ms, err);
        }

        // Strategy-driven counter rounds.
        let strategy = match self
            .input
            .negotiation
            .as_ref()
            .and_then(|n| n.strategy.as_deref())
            .map_or(Ok(StrategyKind::Baseline), StrategyKind::parse)
        {
            Ok(kind) => kind,
            Err(err) => {
                return self.attempt_failed(
                    attempt_idx,
                    &provider_id,
                    candidate,
                    mode,
                    started_at_ms,
                    err,
                );
            }
        };
        let agreed = match session.negotiate(strategy, None, self.input.urgent, reference_p50) {
            Ok(agreed) => agreed,
            Err(err) => {
                self.record_negotiation(&session, strategy);
                return self.attempt_failed(
                    attempt_idx,
                    &provider_id,
                    candidate,
                    mode,
                    started_at_ms,
                    err,
                );
            }
        };
        self.record_negotiation(&session, strategy);
        self.emit(
            "negotiation",
            EventKind::Success,
            Some(&provider_id),
            attempt_idx,
            json!({"agreed_price": agreed, "strategy": strategy.as_str()}),
            None,
        );

        // Segment plan: split hash-reveal settlements when asked.
        let segments = match self.segment_plans(agreed, mode, candidate, compiled, &router) {
            Ok(segments) => segments,
            Err(err) => {
                return self.attempt_failed(
                    attempt_idx,
                    &provider_id,
                    candidate,
                    mode,
                    started_at_ms,
                    err,
                );
            }
        };

        self.emit(
            "settlement_prepare",
            EventKind::Progress,
            Some(&provider_id),
            attempt_idx,
            json!({"rail": rail_name, "segments": segments.len(), "route": route.rationale}),
            None,
        );
        if let Err(err) = session.accept(segments, Arc::clone(&rail)).await {
            return self.attempt_failed(attempt_idx, &provider_id, candidate, mode, started_at_ms, err);
        }

        match mode {
            SettlementMode::HashReveal => {
                self.settle_hash_reveal(
                    &mut session,
                    candidate,
                    attempt_idx,
                    agreed,
                    started_at_ms,
                )
                .await
            }
            SettlementMode::Streaming => {
                self.settle_streaming(
                    &mut session,
                    candidate,
                    attempt_idx,
                    agreed,
                    compiled,
                    Arc::clone(&rail),
                    base_key,
                    cumulative,
                    started_at_ms,
                )
                .await
            }
        }
    }

    fn record_negotiation(&mut self, session: &Session, strategy: StrategyKind) {
        let summary: NegotiationSummary = session.negotiation_summary(strategy);
        self.transcript.negotiation = Some(summary);
        self.transcript.negotiation_rounds = session.rounds().to_vec();
    }

    fn segment_plans(
        &self,
        agreed: Decimal,
        mode: SettlementMode,
        candidate: &EvaluatedCandidate,
        compiled: &CompiledPolicy,
        router: &SettlementRouter,
    ) -> Result<Vec<SegmentPlan>> {
        if mode == SettlementMode::Streaming {
            // Streaming pays per tick; no upfront buyer lock.
            return Ok(Vec::new());
        }
        let split_enabled = self
            .input
            .settlement
            .as_ref()
            .and_then(|s| s.split.as_ref())
            .map_or(compiled.doc.settlement.split.enabled, |s| s.enabled);
        let max_segments = self
            .input
            .settlement
            .as_ref()
            .and_then(|s| s.split.as_ref())
            .and_then(|s| s.max_segments)
            .unwrap_or(compiled.doc.settlement.split.max_segments)
            .max(1);

        let amounts = if split_enabled {
            split_amounts(agreed, max_segments)
        } else {
            vec![agreed]
        };

        let mut plans = Vec::with_capacity(amounts.len());
        for amount in amounts {
            // Each segment routes independently; an input override pins the
            // rail for all of them.
            let route = router.route(
                amount,
                mode,
                candidate.evaluation.trust_tier,
                candidate.evaluation.trust_score,
            )?;
            let rail_name = self
                .input
                .settlement
                .as_ref()
                .and_then(|s| s.provider.clone())
                .unwrap_or_else(|| route.rail.clone());
            let rail = self.deps.rails.get(&rail_name).cloned().ok_or_else(|| {
                PactError::new(
                    FailureCode::SettlementProviderNotImplemented,
                    format!("no rail registered under {rail_name}"),
                )
            })?;
            plans.push(SegmentPlan {
                amount,
                rail,
                route,
            });
        }
        Ok(plans)
    }

    async fn settle_hash_reveal(
        &mut self,
        session: &mut Session,
        candidate: &EvaluatedCandidate,
        attempt_idx: usize,
        agreed: Decimal,
        started_at_ms: u64,
    ) -> AttemptOutcome {
        let provider_id = candidate.profile.provider_id.clone();
        let Some(transport) = self.deps.transports.get(&provider_id).cloned() else {
            return self.attempt_failed(
                attempt_idx,
                &provider_id,
                candidate,
                SettlementMode::HashReveal,
                started_at_ms,
                PactError::new(FailureCode::HttpProviderError, "transport disappeared"),
            );
        };

        // Deterministic delivery material for this intent.
        let payload_b64 = BASE64.encode(format!("payload:{}", self.intent_id));
        let nonce_b64 = BASE64.encode(format!("nonce:{}", self.intent_id));

        let commit_env = match transport
            .fetch_commit(&CommitRequest {
                intent_id: self.intent_id,
                payload_b64: payload_b64.clone(),
                nonce_b64: nonce_b64.clone(),
            })
            .await
        {
            Ok(env) => env,
            Err(err) => {
                session.unwind().await;
                return self.attempt_failed(
                    attempt_idx,
                    &provider_id,
                    candidate,
                    SettlementMode::HashReveal,
                    started_at_ms,
                    err,
                );
            }
        };
        let commit_hash_hex = match &commit_env.message {
            pact_types::Message::Commit(c) => c.commit_hash_hex.clone(),
            _ => String::new(),
        };
        if let Err(err) = session.on_commit(&commit_env) {
            session.unwind().await;
            return self.attempt_failed(
                attempt_idx,
                &provider_id,
                candidate,
                SettlementMode::HashReveal,
                started_at_ms,
                err,
            );
        }
        self.emit(
            "settlement_commit",
            EventKind::Progress,
            Some(&provider_id),
            attempt_idx,
            json!({"commit_hash_hex": commit_hash_hex}),
            None,
        );

        let reveal_env = match transport
            .fetch_reveal(&RevealRequest {
                intent_id: self.intent_id,
                payload_b64,
                nonce_b64,
                commit_hash_hex,
            })
            .await
        {
            Ok(env) => env,
            Err(err) => {
                session.unwind().await;
                return self.attempt_failed(
                    attempt_idx,
                    &provider_id,
                    candidate,
                    SettlementMode::HashReveal,
                    started_at_ms,
                    err,
                );
            }
        };

        match session.on_reveal(&reveal_env).await {
            Ok(report) => {
                self.transcript.settlement_lifecycle = Some(report.lifecycle);
                self.transcript.settlement_segments = report.segments;
                self.transcript.settlement = Some(SettlementSummary {
                    mode: SettlementMode::HashReveal,
                    verification_summary: "commit/reveal hash verified; funds released".into(),
                });
                self.transcript
                    .settlement_sla
                    .violations
                    .extend_from_slice(session.sla_violations());
                self.verification =
                    Some("envelopes verified; reveal matched commit hash".to_string());
                self.seller_agent = Some(AgentId::new(provider_id.as_str()));
                self.record_attempt(
                    attempt_idx,
                    candidate,
                    SettlementMode::HashReveal,
                    started_at_ms,
                    Some(report.paid_amount),
                    None,
                );
                self.emit(
                    "settlement",
                    EventKind::Success,
                    Some(&provider_id),
                    attempt_idx,
                    json!({"paid_amount": report.paid_amount}),
                    None,
                );
                let receipt = self.build_receipt(&provider_id, agreed, true, report.paid_amount, None, None);
                AttemptOutcome::Succeeded(receipt)
            }
            Err(err) if err.code == FailureCode::SettlementPollTimeout => {
                // Preserve pending lifecycle + handle for reconciliation.
                let report =
                    session.build_report(pact_types::LifecycleStatus::Pending, Decimal::ZERO, None);
                self.transcript.settlement_lifecycle = Some(report.lifecycle);
                self.transcript.settlement_segments = report.segments;
                self.transcript
                    .settlement_sla
                    .violations
                    .extend_from_slice(session.sla_violations());
                self.record_attempt(
                    attempt_idx,
                    candidate,
                    SettlementMode::HashReveal,
                    started_at_ms,
                    None,
                    Some(&err),
                );
                AttemptOutcome::Pending(err)
            }
            Err(err) => {
                let report = session.build_report(
                    pact_types::LifecycleStatus::Failed,
                    Decimal::ZERO,
                    Some((err.code, err.reason.clone())),
                );
                self.transcript.settlement_lifecycle = Some(report.lifecycle);
                self.transcript.settlement_segments = report.segments;
                self.attempt_failed(
                    attempt_idx,
                    &provider_id,
                    candidate,
                    SettlementMode::HashReveal,
                    started_at_ms,
                    err,
                )
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn settle_streaming(
        &mut self,
        session: &mut Session,
        candidate: &EvaluatedCandidate,
        attempt_idx: usize,
        agreed: Decimal,
        compiled: &CompiledPolicy,
        rail: Arc<dyn SettlementRail>,
        base_key: IdempotencyKey,
        cumulative: &mut StreamingCumulative,
        started_at_ms: u64,
    ) -> AttemptOutcome {
        let provider_id = candidate.profile.provider_id.clone();
        let Some(transport) = self.deps.transports.get(&provider_id).cloned() else {
            return self.attempt_failed(
                attempt_idx,
                &provider_id,
                candidate,
                SettlementMode::Streaming,
                started_at_ms,
                PactError::new(FailureCode::HttpStreamingError, "transport disappeared"),
            );
        };

        let streaming = &compiled.doc.settlement.streaming;
        let config = StreamingConfig {
            total_budget: agreed,
            tick_ms: streaming.tick_ms,
            planned_ticks: streaming.planned_ticks,
            buyer_stop_after_ticks: self.input.buyer_stop_after_ticks,
        };
        let source = TransportChunkSource {
            transport: transport.as_ref(),
        };
        let seller_agent = AgentId::new(provider_id.as_str());
        let exchange = StreamingExchange {
            config: &config,
            rail,
            source: &source,
            winner_pubkey_b58: &candidate.profile.pubkey_b58,
            buyer: &self.deps.buyer_id,
            seller: &seller_agent,
            base_key,
            cancel: self.deps.cancel.clone(),
        };

        let mut batch_events: Vec<(u64, u64)> = Vec::new();
        let result = exchange
            .run(&self.clock, self.intent_id, cumulative, &mut |c, now| {
                batch_events.push((c.ticks, now));
            })
            .await;
        for (ticks, stream_now) in &batch_events {
            self.emit(
                "settlement_streaming",
                EventKind::Progress,
                Some(&provider_id),
                usize::try_from(*ticks).unwrap_or(usize::MAX),
                json!({"batch_at_ticks": ticks, "stream_clock_ms": stream_now}),
                None,
            );
        }

        self.transcript.streaming_attempts.push(StreamingAttempt {
            attempt_idx,
            provider_id: provider_id.clone(),
            ticks: result.attempt_ticks,
            chunks: result.attempt_chunks,
            paid_amount: result.attempt_paid,
            code: match &result.reason {
                StreamEndReason::Retryable(e) | StreamEndReason::Terminal(e) => Some(e.code),
                StreamEndReason::BuyerStopped => Some(FailureCode::BuyerStopped),
                StreamEndReason::BudgetExhausted => None,
            },
            reason: match &result.reason {
                StreamEndReason::Retryable(e) | StreamEndReason::Terminal(e) => {
                    Some(e.reason.clone())
                }
                StreamEndReason::BuyerStopped => Some("buyer stop mark reached".into()),
                StreamEndReason::BudgetExhausted => None,
            },
        });

        match result.reason {
            StreamEndReason::BudgetExhausted | StreamEndReason::BuyerStopped => {
                let fulfilled = matches!(result.reason, StreamEndReason::BudgetExhausted);
                if let Err(err) = session.finish_streaming(fulfilled, cumulative.paid_amount).await
                {
                    return self.attempt_failed(
                        attempt_idx,
                        &provider_id,
                        candidate,
                        SettlementMode::Streaming,
                        started_at_ms,
                        err,
                    );
                }
                self.transcript.streaming_summary = Some(StreamingSummary {
                    ticks: cumulative.ticks,
                    chunks: cumulative.chunks,
                    paid_amount: cumulative.paid_amount,
                    budget: agreed,
                    fulfilled,
                });
                self.transcript.settlement = Some(SettlementSummary {
                    mode: SettlementMode::Streaming,
                    verification_summary: format!(
                        "{} chunks verified against winner pubkey",
                        cumulative.chunks
                    ),
                });
                self.verification = Some("all stream chunks verified".to_string());
                self.seller_agent = Some(AgentId::new(provider_id.as_str()));
                self.record_attempt(
                    attempt_idx,
                    candidate,
                    SettlementMode::Streaming,
                    started_at_ms,
                    Some(cumulative.paid_amount),
                    None,
                );
                self.emit(
                    "settlement",
                    EventKind::Success,
                    Some(&provider_id),
                    attempt_idx,
                    json!({"paid_amount": cumulative.paid_amount, "ticks": cumulative.ticks}),
                    None,
                );
                let failure_code = (!fulfilled).then_some(FailureCode::BuyerStopped);
                let receipt = self.build_receipt(
                    &provider_id,
                    agreed,
                    fulfilled,
                    cumulative.paid_amount,
                    Some(cumulative),
                    failure_code,
                );
                AttemptOutcome::Succeeded(receipt)
            }
            StreamEndReason::Retryable(err) => {
                session.unwind().await;
                self.attempt_failed(
                    attempt_idx,
                    &provider_id,
                    candidate,
                    SettlementMode::Streaming,
                    started_at_ms,
                    err,
                )
            }
            StreamEndReason::Terminal(err) => {
                session.unwind().await;
                self.record_attempt(
                    attempt_idx,
                    candidate,
                    SettlementMode::Streaming,
                    started_at_ms,
                    None,
                    Some(&err),
                );
                AttemptOutcome::Terminal(err)
            }
        }
    }

    fn record_attempt(
        &mut self,
        attempt_idx: usize,
        candidate: &EvaluatedCandidate,
        mode: SettlementMode,
        started_at_ms: u64,
        paid_amount: Option<Decimal>,
        failure: Option<&PactError>,
    ) {
        let rail = self
            .transcript
            .settlement_lifecycle
            .as_ref()
            .map_or_else(|| "mock".to_string(), |l| l.provider.clone());
        self.transcript.settlement_attempts.push(SettlementAttempt {
            attempt_idx,
            provider_id: candidate.profile.provider_id.clone(),
            pubkey_b58: candidate.profile.pubkey_b58.clone(),
            rail,
            mode,
            started_at_ms,
            ended_at_ms: Some(self.clock.now_ms()),
            paid_amount,
            code: failure.map(|e| e.code),
            reason: failure.map(|e| e.reason.clone()),
            retryable: failure.map(PactError::is_retryable),
        });
    }

    /// Record a failed attempt and classify its continuation.
    fn attempt_failed(
        &mut self,
        attempt_idx: usize,
        provider_id: &ProviderId,
        candidate: &EvaluatedCandidate,
        mode: SettlementMode,
        started_at_ms: u64,
        err: PactError,
    ) -> AttemptOutcome {
        self.record_attempt(attempt_idx, candidate, mode, started_at_ms, None, Some(&err));
        self.emit(
            "settlement",
            EventKind::Failure,
            Some(provider_id),
            attempt_idx,
            json!({}),
            Some(&err),
        );
        if err.is_retryable() {
            AttemptOutcome::Retryable(err)
        } else {
            AttemptOutcome::Terminal(err)
        }
    }

    fn build_receipt(
        &self,
        provider_id: &ProviderId,
        agreed: Decimal,
        fulfilled: bool,
        paid_amount: Decimal,
        streaming: Option<&StreamingCumulative>,
        failure_code: Option<FailureCode>,
    ) -> Receipt {
        Receipt {
            intent_id: self.intent_id,
            buyer_agent_id: self.deps.buyer_id.clone(),
            seller_agent_id: AgentId::new(provider_id.as_str()),
            agreed_price: agreed,
            fulfilled,
            paid_amount,
            timestamp_ms: self.clock.now_ms(),
            ticks: streaming.map(|c| c.ticks),
            chunks: streaming.map(|c| c.chunks),
            failure_code,
            asset_id: Some(self.asset_id.clone()),
            chain_id: Some(self.chain_id.clone()),
        }
    }

    /// Success epilogue: SLA penalties, the atomic fingerprint mark, the
    /// reputation ingest, and the single transcript commit.
    async fn commit_success(
        mut self,
        receipt: Receipt,
        compiled: &CompiledPolicy,
    ) -> AcquireResult {
        // SLA penalty receipt against the seller, when configured.
        if !self.transcript.settlement_sla.violations.is_empty()
            && compiled.doc.settlement.settlement_sla.penalty.enabled
        {
            let penalty = Receipt::sla_penalty(
                self.intent_id,
                self.deps.buyer_id.clone(),
                receipt.seller_agent_id.clone(),
                self.clock.now_ms(),
            );
            self.deps
                .reputation
                .ingest(&self.input.intent_type, &penalty);
        }

        // At-most-one-commit: the CAS and the transcript commit form the
        // atomic gate; a lost race is a double commit.
        let transcript_ref = if self.input.save_transcript {
            let dir = self
                .input
                .transcript_dir
                .clone()
                .unwrap_or_else(|| "transcripts".to_string());
            TranscriptStore::new(dir)
                .path_for(self.intent_id)
                .display()
                .to_string()
        } else {
            format!("memory:{}", self.intent_id)
        };
        let now = self.clock.now_ms();
        if let Err(err) = self.deps.reputation.mark_fingerprint_committed(
            &self.fingerprint,
            self.intent_id,
            &transcript_ref,
            now,
        ) {
            return self.finish_failure(err);
        }
        self.deps.reputation.ingest(&self.input.intent_type, &receipt);

        info!(intent = %self.intent_id, paid = %receipt.paid_amount, "acquire succeeded");
        self.finish_success(receipt)
    }
}

/// How one attempt ended.
enum AttemptOutcome {
    Succeeded(Receipt),
    /// SETTLEMENT_POLL_TIMEOUT: not terminal, not retryable.
    Pending(PactError),
    Retryable(PactError),
    Terminal(PactError),
}

/// Split an agreed price into `n` segments that sum exactly to the total.
fn split_amounts(agreed: Decimal, n: u32) -> Vec<Decimal> {
    let n = n.max(1);
    if n == 1 {
        return vec![agreed];
    }
    let per = (agreed / Decimal::from(n)).round_dp(STREAM_AMOUNT_DP);
    let mut amounts = vec![per; (n - 1) as usize];
    amounts.push(agreed - per * Decimal::from(n - 1));
    amounts
}
