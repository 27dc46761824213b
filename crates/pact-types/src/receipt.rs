//! Receipts — the terminal, content-addressable artifact of one acquisition.
//!
//! Receipts are the inputs to reputation: fulfilled receipts raise a
//! seller's score, failure and penalty receipts lower it. The content hash
//! is stable under canonicalization, so two identical runs produce the same
//! receipt hash.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::canonical::sha256_hex_of;
use crate::error::{FailureCode, Result};
use crate::ids::{AgentId, IntentId};

/// What, if anything, was paid for one acquisition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub intent_id: IntentId,
    pub buyer_agent_id: AgentId,
    pub seller_agent_id: AgentId,
    pub agreed_price: Decimal,
    /// Whether the full agreed exchange completed.
    pub fulfilled: bool,
    pub paid_amount: Decimal,
    pub timestamp_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticks: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunks: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_code: Option<FailureCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<String>,
}

impl Receipt {
    /// Content-address: SHA-256 over the canonical serialization.
    pub fn content_hash(&self) -> Result<String> {
        sha256_hex_of(self)
    }

    /// The injected timestamp rendered as RFC 3339, for logs and reports.
    /// Never derived from a wall clock.
    #[must_use]
    pub fn timestamp_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::<Utc>::from_timestamp_millis(i64::try_from(self.timestamp_ms).ok()?)
    }

    /// A zero-value penalty receipt against a seller that violated the
    /// settlement SLA. Ingested into reputation when penalties are enabled.
    #[must_use]
    pub fn sla_penalty(
        intent_id: IntentId,
        buyer: AgentId,
        seller: AgentId,
        timestamp_ms: u64,
    ) -> Self {
        Self {
            intent_id,
            buyer_agent_id: buyer,
            seller_agent_id: seller,
            agreed_price: Decimal::ZERO,
            fulfilled: false,
            paid_amount: Decimal::ZERO,
            timestamp_ms,
            ticks: None,
            chunks: None,
            failure_code: Some(FailureCode::SettlementSlaViolation),
            asset_id: None,
            chain_id: None,
        }
    }
}
