//! Protocol messages — the tagged variants an envelope may carry.
//!
//! Exactly one message per envelope. The tag field is `"type"` and the tags
//! are the wire-level names (`INTENT`, `ASK`, ...).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ids::{IntentId, ProviderId};
use crate::intent::{Intent, SettlementMode};

/// The seller's signed quote in response to an intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ask {
    pub intent_id: IntentId,
    pub provider_id: ProviderId,
    pub ask_price: Decimal,
    /// A firm quote is non-negotiable; policy may accept it directly.
    pub firm: bool,
    pub sent_at_ms: u64,
}

/// A buyer counteroffer between ASK and ACCEPT.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Counter {
    pub intent_id: IntentId,
    pub round: u32,
    pub counter_price: Decimal,
    pub sent_at_ms: u64,
}

/// The buyer's acceptance, fixing the agreed price and mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Accept {
    pub intent_id: IntentId,
    pub agreed_price: Decimal,
    pub settlement_mode: SettlementMode,
    pub sent_at_ms: u64,
}

/// The seller's commitment to a payload hash (hash-reveal mode).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    pub intent_id: IntentId,
    pub commit_hash_hex: String,
    pub sent_at_ms: u64,
}

/// The seller's reveal: payload and nonce whose hash must equal the commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reveal {
    pub intent_id: IntentId,
    pub payload_b64: String,
    pub nonce_b64: String,
    pub sent_at_ms: u64,
}

/// One signed unit of streaming delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    pub intent_id: IntentId,
    /// Continues across fallback attempts against the same intent.
    pub seq: u64,
    pub payload_b64: String,
    pub sent_at_ms: u64,
}

/// A provider's signed capability listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub provider_id: ProviderId,
    /// Intent types this provider can serve.
    pub capabilities: Vec<String>,
    pub issuer_id: String,
    pub claims: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    pub issued_at_ms: u64,
    pub expires_at_ms: u64,
}

impl Credential {
    /// Whether the credential covers the requested intent type.
    #[must_use]
    pub fn covers(&self, intent_type: &str) -> bool {
        self.capabilities.iter().any(|c| c == intent_type)
    }

    #[must_use]
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms
    }
}

/// Every on-the-wire message, as a tagged variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    #[serde(rename = "INTENT")]
    Intent(Intent),
    #[serde(rename = "ASK")]
    Ask(Ask),
    #[serde(rename = "COUNTER")]
    Counter(Counter),
    #[serde(rename = "ACCEPT")]
    Accept(Accept),
    #[serde(rename = "COMMIT")]
    Commit(Commit),
    #[serde(rename = "REVEAL")]
    Reveal(Reveal),
    #[serde(rename = "STREAM_CHUNK")]
    StreamChunk(StreamChunk),
    #[serde(rename = "CREDENTIAL")]
    Credential(Credential),
}

impl Message {
    /// The wire tag of this message.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Intent(_) => "INTENT",
            Self::Ask(_) => "ASK",
            Self::Counter(_) => "COUNTER",
            Self::Accept(_) => "ACCEPT",
            Self::Commit(_) => "COMMIT",
            Self::Reveal(_) => "REVEAL",
            Self::StreamChunk(_) => "STREAM_CHUNK",
            Self::Credential(_) => "CREDENTIAL",
        }
    }

    /// The intent this message concerns, when it carries one.
    #[must_use]
    pub fn intent_id(&self) -> Option<IntentId> {
        match self {
            Self::Intent(m) => Some(m.intent_id),
            Self::Ask(m) => Some(m.intent_id),
            Self::Counter(m) => Some(m.intent_id),
            Self::Accept(m) => Some(m.intent_id),
            Self::Commit(m) => Some(m.intent_id),
            Self::Reveal(m) => Some(m.intent_id),
            Self::StreamChunk(m) => Some(m.intent_id),
            Self::Credential(_) => None,
        }
    }
}
