//! External RPC rail stub.
//!
//! Callers may name an `external` rail in routing rules before wiring a
//! real adapter. Every operation reports
//! `SETTLEMENT_PROVIDER_NOT_IMPLEMENTED` — retryable, so the fallback plan
//! moves on instead of dying here.

use async_trait::async_trait;
use rust_decimal::Decimal;

use pact_types::{AgentId, FailureCode, HandleId, PactError, Result};

use crate::idempotency::IdempotencyKey;
use crate::provider::{CommitOutcome, RefundOutcome, RefundRequest, SettlementRail};

/// Placeholder for a not-yet-integrated settlement rail.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExternalRail;

impl ExternalRail {
    fn unimplemented(op: &str) -> PactError {
        PactError::new(
            FailureCode::SettlementProviderNotImplemented,
            format!("external rail has no adapter for {op}"),
        )
    }
}

#[async_trait]
impl SettlementRail for ExternalRail {
    fn name(&self) -> &'static str {
        "external"
    }

    async fn credit(
        &self,
        _key: &IdempotencyKey,
        _account: &AgentId,
        _amount: Decimal,
        _chain: Option<&str>,
        _asset: Option<&str>,
    ) -> Result<()> {
        Err(Self::unimplemented("credit"))
    }

    async fn debit(
        &self,
        _key: &IdempotencyKey,
        _account: &AgentId,
        _amount: Decimal,
        _chain: Option<&str>,
        _asset: Option<&str>,
    ) -> Result<()> {
        Err(Self::unimplemented("debit"))
    }

    async fn lock(
        &self,
        _key: &IdempotencyKey,
        _from: &AgentId,
        _to: &AgentId,
        _amount: Decimal,
    ) -> Result<HandleId> {
        Err(Self::unimplemented("lock"))
    }

    async fn release(&self, _key: &IdempotencyKey, _handle: &HandleId) -> Result<()> {
        Err(Self::unimplemented("release"))
    }

    async fn commit(&self, _key: &IdempotencyKey, _handle: &HandleId) -> Result<CommitOutcome> {
        Err(Self::unimplemented("commit"))
    }

    async fn poll(&self, _handle: &HandleId) -> Result<CommitOutcome> {
        Err(Self::unimplemented("poll"))
    }

    async fn abort(&self, _key: &IdempotencyKey, _handle: &HandleId) -> Result<()> {
        Err(Self::unimplemented("abort"))
    }

    async fn balance(
        &self,
        _account: &AgentId,
        _chain: Option<&str>,
        _asset: Option<&str>,
    ) -> Result<Decimal> {
        Err(Self::unimplemented("balance"))
    }

    async fn refund(&self, _request: &RefundRequest) -> Result<RefundOutcome> {
        Err(Self::unimplemented("refund"))
    }
}
