//! Asynchronous card-processor-style rail.
//!
//! Commits never complete inline: the first answer is always `pending`, and
//! the caller drives the settlement home through bounded polling. Ledger
//! mechanics are shared with [`MockRail`]; only the pending behavior and
//! the rail name differ.

use async_trait::async_trait;
use rust_decimal::Decimal;

use pact_types::{AgentId, HandleId, Result};

use crate::idempotency::IdempotencyKey;
use crate::mock::MockRail;
use crate::provider::{CommitOutcome, RefundOutcome, RefundRequest, SettlementRail};

/// A rail whose commits require `polls_required` polls to land.
pub struct StripeLikeRail {
    ledger: MockRail,
}

impl StripeLikeRail {
    #[must_use]
    pub fn new(polls_required: u32) -> Self {
        let ledger = MockRail::new();
        ledger.set_pending_commits(polls_required.max(1));
        Self { ledger }
    }

    /// Test / setup entry point: put funds into an account.
    pub fn deposit(&self, account: &AgentId, amount: Decimal) {
        self.ledger.deposit(account, amount);
    }
}

#[async_trait]
impl SettlementRail for StripeLikeRail {
    fn name(&self) -> &'static str {
        "stripe_like"
    }

    async fn credit(
        &self,
        key: &IdempotencyKey,
        account: &AgentId,
        amount: Decimal,
        chain: Option<&str>,
        asset: Option<&str>,
    ) -> Result<()> {
        self.ledger.credit(key, account, amount, chain, asset).await
    }

    async fn debit(
        &self,
        key: &IdempotencyKey,
        account: &AgentId,
        amount: Decimal,
        chain: Option<&str>,
        asset: Option<&str>,
    ) -> Result<()> {
        self.ledger.debit(key, account, amount, chain, asset).await
    }

    async fn lock(
        &self,
        key: &IdempotencyKey,
        from: &AgentId,
        to: &AgentId,
        amount: Decimal,
    ) -> Result<HandleId> {
        self.ledger.lock(key, from, to, amount).await
    }

    async fn release(&self, key: &IdempotencyKey, handle: &HandleId) -> Result<()> {
        self.ledger.release(key, handle).await
    }

    async fn commit(&self, key: &IdempotencyKey, handle: &HandleId) -> Result<CommitOutcome> {
        self.ledger.commit(key, handle).await
    }

    async fn poll(&self, handle: &HandleId) -> Result<CommitOutcome> {
        self.ledger.poll(handle).await
    }

    async fn abort(&self, key: &IdempotencyKey, handle: &HandleId) -> Result<()> {
        self.ledger.abort(key, handle).await
    }

    async fn balance(
        &self,
        account: &AgentId,
        chain: Option<&str>,
        asset: Option<&str>,
    ) -> Result<Decimal> {
        self.ledger.balance(account, chain, asset).await
    }

    async fn refund(&self, request: &RefundRequest) -> Result<RefundOutcome> {
        self.ledger.refund(request).await
    }
}
