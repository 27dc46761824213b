//! Provider transports.
//!
//! A [`ProviderTransport`] is how the orchestrator talks to one provider:
//! quote, commit, reveal, stream chunks, credential. Providers with an
//! `endpoint` speak HTTP ([`HttpTransport`]); providers without one are
//! served in-process by a [`LocalProvider`], which is also the test
//! harness's programmable seller.

use std::sync::Mutex;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use pact_session::ChunkSource;
use pact_types::constants::STREAM_AMOUNT_DP;
use pact_types::{
    Ask, Clock, Commit, Constraints, Credential, Envelope, FailureCode, IntentId, Keypair,
    Message, PactError, ProviderId, Result, Reveal, StreamChunk, commit_reveal_hash,
};

/// Quote request body (`POST /quote`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteRequest {
    pub intent_id: IntentId,
    pub intent_type: String,
    pub max_price: Decimal,
    pub constraints: Constraints,
    pub urgent: bool,
}

/// Commit request body (`POST /commit`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitRequest {
    pub intent_id: IntentId,
    pub payload_b64: String,
    pub nonce_b64: String,
}

/// Reveal request body (`POST /reveal`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevealRequest {
    pub intent_id: IntentId,
    pub payload_b64: String,
    pub nonce_b64: String,
    pub commit_hash_hex: String,
}

/// How the orchestrator reaches one provider.
#[async_trait]
pub trait ProviderTransport: Send + Sync {
    async fn fetch_quote(&self, request: &QuoteRequest) -> Result<Envelope>;
    async fn fetch_commit(&self, request: &CommitRequest) -> Result<Envelope>;
    async fn fetch_reveal(&self, request: &RevealRequest) -> Result<Envelope>;
    async fn fetch_chunk(&self, intent_id: IntentId, seq: u64, sent_at_ms: u64)
    -> Result<Envelope>;
    /// `Ok(None)` means no credential (404 or no endpoint) — tolerated
    /// unless policy requires one.
    async fn fetch_credential(&self, intent_type: &str) -> Result<Option<Envelope>>;
}

/// Adapts a transport to the streaming exchange's chunk source.
pub struct TransportChunkSource<'a> {
    pub transport: &'a dyn ProviderTransport,
}

#[async_trait]
impl ChunkSource for TransportChunkSource<'_> {
    async fn next_chunk(
        &self,
        intent_id: IntentId,
        seq: u64,
        sent_at_ms: u64,
    ) -> Result<Envelope> {
        self.transport.fetch_chunk(intent_id, seq, sent_at_ms).await
    }
}

// ---------------------------------------------------------------------------
// HTTP transport
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct EnvelopeBody {
    envelope: Envelope,
}

#[derive(Debug, Deserialize)]
struct RevealBody {
    ok: bool,
    envelope: Option<Envelope>,
    #[allow(dead_code)]
    code: Option<String>,
    reason: Option<String>,
}

/// Speaks the provider HTTP surface: `POST /quote`, `POST /commit`,
/// `POST /reveal`, `POST /stream_chunk`, `GET /credential`.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn post_envelope<B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
        http_code: FailureCode,
        parse_code: FailureCode,
    ) -> Result<Envelope> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| PactError::new(http_code, format!("{path}: {e}")))?;
        if !response.status().is_success() {
            return Err(PactError::new(
                http_code,
                format!("{path}: status {}", response.status()),
            ));
        }
        let body: EnvelopeBody = response
            .json()
            .await
            .map_err(|e| PactError::new(parse_code, format!("{path}: {e}")))?;
        Ok(body.envelope)
    }
}

#[async_trait]
impl ProviderTransport for HttpTransport {
    async fn fetch_quote(&self, request: &QuoteRequest) -> Result<Envelope> {
        self.post_envelope(
            "/quote",
            request,
            FailureCode::ProviderQuoteHttpError,
            FailureCode::ProviderQuoteParseError,
        )
        .await
    }

    async fn fetch_commit(&self, request: &CommitRequest) -> Result<Envelope> {
        self.post_envelope(
            "/commit",
            request,
            FailureCode::HttpProviderError,
            FailureCode::HttpProviderError,
        )
        .await
    }

    async fn fetch_reveal(&self, request: &RevealRequest) -> Result<Envelope> {
        let response = self
            .client
            .post(self.url("/reveal"))
            .json(request)
            .send()
            .await
            .map_err(|e| PactError::new(FailureCode::HttpProviderError, format!("/reveal: {e}")))?;
        if !response.status().is_success() {
            return Err(PactError::new(
                FailureCode::HttpProviderError,
                format!("/reveal: status {}", response.status()),
            ));
        }
        let body: RevealBody = response
            .json()
            .await
            .map_err(|e| PactError::new(FailureCode::HttpProviderError, format!("/reveal: {e}")))?;
        if !body.ok {
            return Err(PactError::new(
                FailureCode::FailedProof,
                body.reason.unwrap_or_else(|| "provider refused reveal".into()),
            ));
        }
        body.envelope.ok_or_else(|| {
            PactError::new(FailureCode::HttpProviderError, "/reveal: missing envelope")
        })
    }

    async fn fetch_chunk(
        &self,
        intent_id: IntentId,
        seq: u64,
        sent_at_ms: u64,
    ) -> Result<Envelope> {
        #[derive(Serialize)]
        struct ChunkRequest {
            intent_id: IntentId,
            seq: u64,
            sent_at_ms: u64,
        }
        self.post_envelope(
            "/stream_chunk",
            &ChunkRequest {
                intent_id,
                seq,
                sent_at_ms,
            },
            FailureCode::HttpStreamingError,
            FailureCode::HttpStreamingError,
        )
        .await
    }

    async fn fetch_credential(&self, intent_type: &str) -> Result<Option<Envelope>> {
        let response = self
            .client
            .get(self.url("/credential"))
            .query(&[("intent_type", intent_type)])
            .send()
            .await
            .map_err(|e| {
                PactError::new(FailureCode::HttpProviderError, format!("/credential: {e}"))
            })?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            // Graceful degradation: no credential offered.
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(PactError::new(
                FailureCode::HttpProviderError,
                format!("/credential: status {}", response.status()),
            ));
        }
        let body: EnvelopeBody = response.json().await.map_err(|e| {
            PactError::new(
                FailureCode::ProviderCredentialInvalid,
                format!("/credential: {e}"),
            )
        })?;
        Ok(Some(body.envelope))
    }
}

// ---------------------------------------------------------------------------
// In-process provider
// ---------------------------------------------------------------------------

/// Credential material a local provider serves.
#[derive(Debug, Clone)]
pub struct LocalCredential {
    pub issuer_id: String,
    pub claims: Vec<String>,
    pub capabilities: Vec<String>,
    pub region: Option<String>,
    pub valid_for_ms: u64,
}

/// Behavior knobs for a [`LocalProvider`].
#[derive(Debug, Clone)]
pub struct LocalProviderConfig {
    pub provider_id: ProviderId,
    /// Ask = `max_price × ask_fraction` unless `fixed_price` is set.
    pub ask_fraction: Decimal,
    pub fixed_price: Option<Decimal>,
    pub firm: bool,
    pub credential: Option<LocalCredential>,
    /// Sign stream chunks with a different key (identity attack).
    pub chunk_signer_seed: Option<[u8; 32]>,
    pub fail_quote: bool,
    pub bad_reveal: bool,
    pub fail_chunks_after: Option<u64>,
}

impl LocalProviderConfig {
    #[must_use]
    pub fn honest(provider_id: impl Into<ProviderId>) -> Self {
        Self {
            provider_id: provider_id.into(),
            ask_fraction: Decimal::new(8, 1),
            fixed_price: None,
            firm: false,
            credential: None,
            chunk_signer_seed: None,
            fail_quote: false,
            bad_reveal: false,
            fail_chunks_after: None,
        }
    }
}

/// An in-process seller: prices quotes, signs envelopes with its own key,
/// serves commit/reveal proofs and stream chunks.
pub struct LocalProvider {
    keys: Keypair,
    chunk_keys: Option<Keypair>,
    config: LocalProviderConfig,
    clock: Clock,
    chunks_served: Mutex<u64>,
}

impl LocalProvider {
    #[must_use]
    pub fn new(seed: [u8; 32], config: LocalProviderConfig, clock: Clock) -> Self {
        let chunk_keys = config.chunk_signer_seed.map(Keypair::from_seed);
        Self {
            keys: Keypair::from_seed(seed),
            chunk_keys,
            config,
            clock,
            chunks_served: Mutex::new(0),
        }
    }

    /// The identity this provider registers in the directory.
    #[must_use]
    pub fn public_b58(&self) -> String {
        self.keys.public_b58()
    }

    fn price_for(&self, max_price: Decimal) -> Decimal {
        self.config
            .fixed_price
            .unwrap_or_else(|| (max_price * self.config.ask_fraction).round_dp(STREAM_AMOUNT_DP))
    }
}

#[async_trait]
impl ProviderTransport for LocalProvider {
    async fn fetch_quote(&self, request: &QuoteRequest) -> Result<Envelope> {
        if self.config.fail_quote {
            return Err(PactError::new(
                FailureCode::ProviderQuoteHttpError,
                "provider quote endpoint unavailable",
            ));
        }
        let ask = Ask {
            intent_id: request.intent_id,
            provider_id: self.config.provider_id.clone(),
            ask_price: self.price_for(request.max_price),
            firm: self.config.firm,
            sent_at_ms: self.clock.now_ms(),
        };
        debug!(provider = %self.config.provider_id, price = %ask.ask_price, "quoting");
        Envelope::seal(Message::Ask(ask), &self.keys)
    }

    async fn fetch_commit(&self, request: &CommitRequest) -> Result<Envelope> {
        Envelope::seal(
            Message::Commit(Commit {
                intent_id: request.intent_id,
                commit_hash_hex: commit_reveal_hash(&request.payload_b64, &request.nonce_b64),
                sent_at_ms: self.clock.now_ms(),
            }),
            &self.keys,
        )
    }

    async fn fetch_reveal(&self, request: &RevealRequest) -> Result<Envelope> {
        let nonce = if self.config.bad_reveal {
            // A cheating seller reveals something it never committed to.
            format!("{}x", request.nonce_b64)
        } else {
            request.nonce_b64.clone()
        };
        Envelope::seal(
            Message::Reveal(Reveal {
                intent_id: request.intent_id,
                payload_b64: request.payload_b64.clone(),
                nonce_b64: nonce,
                sent_at_ms: self.clock.now_ms(),
            }),
            &self.keys,
        )
    }

    async fn fetch_chunk(
        &self,
        intent_id: IntentId,
        seq: u64,
        sent_at_ms: u64,
    ) -> Result<Envelope> {
        {
            let mut served = self.chunks_served.lock().unwrap_or_else(|e| e.into_inner());
            if self.config.fail_chunks_after.is_some_and(|n| *served >= n) {
                return Err(PactError::new(
                    FailureCode::HttpStreamingError,
                    "provider stream dropped",
                ));
            }
            *served += 1;
        }
        use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
        let payload_b64 = BASE64.encode(format!("chunk:{intent_id}:{seq}"));
        let signer = self.chunk_keys.as_ref().unwrap_or(&self.keys);
        Envelope::seal(
            Message::StreamChunk(StreamChunk {
                intent_id,
                seq,
                payload_b64,
                sent_at_ms,
            }),
            signer,
        )
    }

    async fn fetch_credential(&self, intent_type: &str) -> Result<Option<Envelope>> {
        let Some(cred) = &self.config.credential else {
            return Ok(None);
        };
        let now = self.clock.now_ms();
        let credential = Credential {
            provider_id: self.config.provider_id.clone(),
            capabilities: cred.capabilities.clone(),
            issuer_id: cred.issuer_id.clone(),
            claims: cred.claims.clone(),
            region: cred.region.clone(),
            issued_at_ms: now,
            expires_at_ms: now + cred.valid_for_ms,
        };
        let _ = intent_type; // capability matching happens buyer-side
        Ok(Some(Envelope::seal(
            Message::Credential(credential),
            &self.keys,
        )?))
    }
}
