//! In-memory settlement rail.
//!
//! The default rail for local runs and tests: synchronous commits, full
//! idempotency, deterministic handles, and two levers real rails forced on
//! us — failure injection (to exercise the fallback plan) and top-up
//! simulation (local recovery for small buyer shortfalls).

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::debug;

use pact_types::constants::{DEFAULT_ASSET_ID, DEFAULT_CHAIN_ID};
use pact_types::{AgentId, FailureCode, HandleId, PactError, Result};

use crate::idempotency::{IdempotencyCache, IdempotencyKey, RailOutcome};
use crate::provider::{CommitOutcome, RefundOutcome, RefundRequest, SettlementRail};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockStatus {
    Active,
    Committed,
    Released,
    Aborted,
}

#[derive(Debug, Clone)]
struct LockState {
    from: AgentId,
    to: AgentId,
    amount: Decimal,
    status: LockStatus,
    /// Polls remaining before a pending commit completes.
    pending_polls_left: u32,
    pending: bool,
    topped_up: bool,
}

#[derive(Debug, Default)]
struct MockInner {
    /// (account, chain, asset) → available balance.
    balances: HashMap<(AgentId, String, String), Decimal>,
    locks: HashMap<HandleId, LockState>,
    cache: IdempotencyCache,
    fail_commits_remaining: u32,
    fail_debits_remaining: u32,
    pending_commit_polls: u32,
    fail_next_lock: bool,
    topup_count: u64,
}

/// In-memory rail with deterministic handles and injectable failures.
pub struct MockRail {
    inner: Mutex<MockInner>,
    /// Largest buyer shortfall the rail will cover itself.
    topup_allowance: Decimal,
}

impl Default for MockRail {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRail {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MockInner::default()),
            topup_allowance: Decimal::ZERO,
        }
    }

    /// Rail that covers buyer shortfalls up to `allowance` per debit.
    #[must_use]
    pub fn with_topup_allowance(allowance: Decimal) -> Self {
        Self {
            topup_allowance: allowance,
            ..Self::new()
        }
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, MockInner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Test / setup entry point: put funds into an account.
    pub fn deposit(&self, account: &AgentId, amount: Decimal) {
        self.deposit_asset(account, amount, DEFAULT_CHAIN_ID, DEFAULT_ASSET_ID);
    }

    /// Deposit under an explicit chain and asset.
    pub fn deposit_asset(&self, account: &AgentId, amount: Decimal, chain: &str, asset: &str) {
        let mut inner = self.lock_inner();
        *inner
            .balances
            .entry(balance_key(account, Some(chain), Some(asset)))
            .or_insert(Decimal::ZERO) += amount;
    }

    /// The next `n` commits fail retryably.
    pub fn set_fail_commits(&self, n: u32) {
        self.lock_inner().fail_commits_remaining = n;
    }

    /// The next `n` debits fail retryably.
    pub fn set_fail_debits(&self, n: u32) {
        self.lock_inner().fail_debits_remaining = n;
    }

    /// Commits return `pending` and need `polls` polls to complete.
    pub fn set_pending_commits(&self, polls: u32) {
        self.lock_inner().pending_commit_polls = polls;
    }

    /// The next lock fails retryably.
    pub fn set_fail_next_lock(&self) {
        self.lock_inner().fail_next_lock = true;
    }

    /// How many debits the rail topped up.
    #[must_use]
    pub fn topup_count(&self) -> u64 {
        self.lock_inner().topup_count
    }

    /// Debit with top-up simulation. Returns whether a top-up happened.
    fn debit_with_topup(
        inner: &mut MockInner,
        account: &AgentId,
        amount: Decimal,
        chain: Option<&str>,
        asset: Option<&str>,
        allowance: Decimal,
    ) -> Result<bool> {
        let key = balance_key(account, chain, asset);
        let balance = inner.balances.entry(key).or_insert(Decimal::ZERO);
        if *balance >= amount {
            *balance -= amount;
            return Ok(false);
        }
        let shortfall = amount - *balance;
        if shortfall <= allowance {
            debug!(account = %account, %shortfall, "mock rail covering shortfall");
            *balance = Decimal::ZERO;
            inner.topup_count += 1;
            return Ok(true);
        }
        Err(PactError::new(
            FailureCode::SettlementFailed,
            format!("insufficient funds: account {account} short {shortfall}"),
        ))
    }

    fn finalize_commit(inner: &mut MockInner, handle: &HandleId) -> Result<CommitOutcome> {
        let lock = inner
            .locks
            .get_mut(handle)
            .ok_or_else(|| unknown_handle(handle))?;
        lock.status = LockStatus::Committed;
        lock.pending = false;
        let (to, amount, topped_up) = (lock.to.clone(), lock.amount, lock.topped_up);
        *inner
            .balances
            .entry(balance_key(&to, None, None))
            .or_insert(Decimal::ZERO) += amount;
        let mut outcome = CommitOutcome::committed(amount);
        outcome.topped_up = topped_up;
        Ok(outcome)
    }
}

fn balance_key(
    account: &AgentId,
    chain: Option<&str>,
    asset: Option<&str>,
) -> (AgentId, String, String) {
    (
        account.clone(),
        chain.unwrap_or(DEFAULT_CHAIN_ID).to_string(),
        asset.unwrap_or(DEFAULT_ASSET_ID).to_string(),
    )
}

fn unknown_handle(handle: &HandleId) -> PactError {
    PactError::new(
        FailureCode::SettlementFailed,
        format!("unknown settlement handle {handle}"),
    )
}

#[async_trait]
impl SettlementRail for MockRail {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn credit(
        &self,
        key: &IdempotencyKey,
        account: &AgentId,
        amount: Decimal,
        chain: Option<&str>,
        asset: Option<&str>,
    ) -> Result<()> {
        let mut inner = self.lock_inner();
        if inner.cache.get(key).is_some() {
            return Ok(());
        }
        *inner
            .balances
            .entry(balance_key(account, chain, asset))
            .or_insert(Decimal::ZERO) += amount;
        inner.cache.record(key, RailOutcome::Unit);
        Ok(())
    }

    async fn debit(
        &self,
        key: &IdempotencyKey,
        account: &AgentId,
        amount: Decimal,
        chain: Option<&str>,
        asset: Option<&str>,
    ) -> Result<()> {
        let mut inner = self.lock_inner();
        if inner.cache.get(key).is_some() {
            return Ok(());
        }
        if inner.fail_debits_remaining > 0 {
            inner.fail_debits_remaining -= 1;
            return Err(PactError::new(
                FailureCode::SettlementFailed,
                "injected debit failure",
            ));
        }
        Self::debit_with_topup(&mut inner, account, amount, chain, asset, self.topup_allowance)?;
        inner.cache.record(key, RailOutcome::Unit);
        Ok(())
    }

    async fn lock(
        &self,
        key: &IdempotencyKey,
        from: &AgentId,
        to: &AgentId,
        amount: Decimal,
    ) -> Result<HandleId> {
        let mut inner = self.lock_inner();
        if let Some(RailOutcome::Lock(handle)) = inner.cache.get(key) {
            return Ok(handle.clone());
        }
        if inner.fail_next_lock {
            inner.fail_next_lock = false;
            return Err(PactError::new(
                FailureCode::SettlementFailed,
                "injected lock failure",
            ));
        }
        let topped_up =
            Self::debit_with_topup(&mut inner, from, amount, None, None, self.topup_allowance)?;
        let handle = HandleId::new(format!("mock_h_{}", &key.as_str()[..16]));
        inner.locks.insert(
            handle.clone(),
            LockState {
                from: from.clone(),
                to: to.clone(),
                amount,
                status: LockStatus::Active,
                pending_polls_left: 0,
                pending: false,
                topped_up,
            },
        );
        inner.cache.record(key, RailOutcome::Lock(handle.clone()));
        Ok(handle)
    }

    async fn release(&self, key: &IdempotencyKey, handle: &HandleId) -> Result<()> {
        let mut inner = self.lock_inner();
        if inner.cache.get(key).is_some() {
            return Ok(());
        }
        let lock = inner
            .locks
            .get_mut(handle)
            .ok_or_else(|| unknown_handle(handle))?;
        if lock.status != LockStatus::Active {
            return Err(PactError::new(
                FailureCode::SettlementFailed,
                format!("cannot release lock {handle} in state {:?}", lock.status),
            ));
        }
        lock.status = LockStatus::Released;
        let (from, amount) = (lock.from.clone(), lock.amount);
        *inner
            .balances
            .entry(balance_key(&from, None, None))
            .or_insert(Decimal::ZERO) += amount;
        inner.cache.record(key, RailOutcome::Unit);
        Ok(())
    }

    async fn commit(&self, key: &IdempotencyKey, handle: &HandleId) -> Result<CommitOutcome> {
        let mut inner = self.lock_inner();
        if let Some(RailOutcome::Commit(outcome)) = inner.cache.get(key) {
            return Ok(outcome.clone());
        }
        let lock = inner
            .locks
            .get_mut(handle)
            .ok_or_else(|| unknown_handle(handle))?;
        if lock.status != LockStatus::Active {
            return Err(PactError::new(
                FailureCode::SettlementFailed,
                format!("cannot commit lock {handle} in state {:?}", lock.status),
            ));
        }
        let outcome = if inner.fail_commits_remaining > 0 {
            inner.fail_commits_remaining -= 1;
            CommitOutcome::failed(FailureCode::SettlementFailed, "injected commit failure")
        } else if inner.pending_commit_polls > 0 {
            let polls = inner.pending_commit_polls;
            let lock = inner.locks.get_mut(handle).expect("checked above");
            lock.pending = true;
            lock.pending_polls_left = polls;
            CommitOutcome::pending()
        } else {
            Self::finalize_commit(&mut inner, handle)?
        };
        inner.cache.record(key, RailOutcome::Commit(outcome.clone()));
        Ok(outcome)
    }

    async fn poll(&self, handle: &HandleId) -> Result<CommitOutcome> {
        let mut inner = self.lock_inner();
        let (status, pending, polls_left, amount, topped_up) = {
            let lock = inner
                .locks
                .get(handle)
                .ok_or_else(|| unknown_handle(handle))?;
            (
                lock.status,
                lock.pending,
                lock.pending_polls_left,
                lock.amount,
                lock.topped_up,
            )
        };
        match status {
            LockStatus::Committed => {
                let mut outcome = CommitOutcome::committed(amount);
                outcome.topped_up = topped_up;
                Ok(outcome)
            }
            LockStatus::Active if pending => {
                if polls_left > 1 {
                    if let Some(lock) = inner.locks.get_mut(handle) {
                        lock.pending_polls_left -= 1;
                    }
                    Ok(CommitOutcome::pending())
                } else {
                    Self::finalize_commit(&mut inner, handle)
                }
            }
            LockStatus::Active => Ok(CommitOutcome::pending()),
            LockStatus::Released | LockStatus::Aborted => Ok(CommitOutcome::failed(
                FailureCode::SettlementFailed,
                format!("lock {handle} was unwound"),
            )),
        }
    }

    async fn abort(&self, key: &IdempotencyKey, handle: &HandleId) -> Result<()> {
        let mut inner = self.lock_inner();
        if inner.cache.get(key).is_some() {
            return Ok(());
        }
        let lock = inner
            .locks
            .get_mut(handle)
            .ok_or_else(|| unknown_handle(handle))?;
        if lock.status == LockStatus::Active {
            lock.status = LockStatus::Aborted;
            let (from, amount) = (lock.from.clone(), lock.amount);
            *inner
                .balances
                .entry(balance_key(&from, None, None))
                .or_insert(Decimal::ZERO) += amount;
        }
        inner.cache.record(key, RailOutcome::Unit);
        Ok(())
    }

    async fn balance(
        &self,
        account: &AgentId,
        chain: Option<&str>,
        asset: Option<&str>,
    ) -> Result<Decimal> {
        let inner = self.lock_inner();
        Ok(inner
            .balances
            .get(&balance_key(account, chain, asset))
            .copied()
            .unwrap_or(Decimal::ZERO))
    }

    async fn refund(&self, request: &RefundRequest) -> Result<RefundOutcome> {
        let mut inner = self.lock_inner();
        if let Some(RailOutcome::Refund(outcome)) = inner.cache.get(&request.idempotency_key) {
            return Ok(outcome.clone());
        }
        let from_key = balance_key(&request.from, None, None);
        let available = inner
            .balances
            .get(&from_key)
            .copied()
            .unwrap_or(Decimal::ZERO);
        let outcome = if available < request.amount {
            RefundOutcome {
                ok: false,
                refunded_amount: Decimal::ZERO,
                code: Some(FailureCode::SettlementFailed),
            }
        } else {
            *inner.balances.entry(from_key).or_insert(Decimal::ZERO) -= request.amount;
            *inner
                .balances
                .entry(balance_key(&request.to, None, None))
                .or_insert(Decimal::ZERO) += request.amount;
            RefundOutcome {
                ok: true,
                refunded_amount: request.amount,
                code: None,
            }
        };
        inner
            .cache
            .record(&request.idempotency_key, RailOutcome::Refund(outcome.clone()));
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use pact_types::DisputeId;

    use super::*;

    fn key(tag: &str) -> IdempotencyKey {
        IdempotencyKey::raw(format!("{tag}-{}", "0".repeat(32)))
    }

    fn buyer() -> AgentId {
        AgentId::from("buyer-1")
    }

    fn seller() -> AgentId {
        AgentId::from("seller-1")
    }

    #[tokio::test]
    async fn lock_commit_pays_the_payee() {
        let rail = MockRail::new();
        rail.deposit(&buyer(), Decimal::ONE);

        let handle = rail
            .lock(&key("lock"), &buyer(), &seller(), Decimal::new(3, 1))
            .await
            .unwrap();
        assert_eq!(
            rail.balance(&buyer(), None, None).await.unwrap(),
            Decimal::new(7, 1)
        );

        let outcome = rail.commit(&key("commit"), &handle).await.unwrap();
        assert_eq!(outcome.status, crate::provider::CommitStatus::Committed);
        assert_eq!(outcome.paid_amount, Some(Decimal::new(3, 1)));
        assert_eq!(
            rail.balance(&seller(), None, None).await.unwrap(),
            Decimal::new(3, 1)
        );
    }

    #[tokio::test]
    async fn repeated_key_replays_not_reapplies() {
        let rail = MockRail::new();
        rail.deposit(&buyer(), Decimal::ONE);

        let k = key("credit");
        rail.credit(&k, &seller(), Decimal::ONE, None, None)
            .await
            .unwrap();
        rail.credit(&k, &seller(), Decimal::ONE, None, None)
            .await
            .unwrap();
        assert_eq!(
            rail.balance(&seller(), None, None).await.unwrap(),
            Decimal::ONE,
            "second credit with same key must be a no-op"
        );

        let lk = key("lock");
        let h1 = rail
            .lock(&lk, &buyer(), &seller(), Decimal::new(5, 1))
            .await
            .unwrap();
        let h2 = rail
            .lock(&lk, &buyer(), &seller(), Decimal::new(5, 1))
            .await
            .unwrap();
        assert_eq!(h1, h2);
        assert_eq!(
            rail.balance(&buyer(), None, None).await.unwrap(),
            Decimal::new(5, 1),
            "second lock with same key must not debit again"
        );
    }

    #[tokio::test]
    async fn insufficient_funds_fails_retryably() {
        let rail = MockRail::new();
        rail.deposit(&buyer(), Decimal::new(1, 1));
        let err = rail
            .lock(&key("lock"), &buyer(), &seller(), Decimal::ONE)
            .await
            .unwrap_err();
        assert_eq!(err.code, FailureCode::SettlementFailed);
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn topup_covers_small_shortfall() {
        let rail = MockRail::with_topup_allowance(Decimal::new(1, 1));
        rail.deposit(&buyer(), Decimal::new(95, 2));
        // Needs 1.0, has 0.95; shortfall 0.05 within allowance 0.1.
        let handle = rail
            .lock(&key("lock"), &buyer(), &seller(), Decimal::ONE)
            .await
            .unwrap();
        assert_eq!(rail.topup_count(), 1);
        let outcome = rail.commit(&key("commit"), &handle).await.unwrap();
        assert!(outcome.topped_up);
    }

    #[tokio::test]
    async fn release_returns_funds() {
        let rail = MockRail::new();
        rail.deposit(&buyer(), Decimal::ONE);
        let handle = rail
            .lock(&key("lock"), &buyer(), &seller(), Decimal::ONE)
            .await
            .unwrap();
        rail.release(&key("release"), &handle).await.unwrap();
        assert_eq!(rail.balance(&buyer(), None, None).await.unwrap(), Decimal::ONE);
        // A released lock cannot be committed.
        assert!(rail.commit(&key("commit"), &handle).await.is_err());
    }

    #[tokio::test]
    async fn abort_returns_funds_and_poll_reports_failure() {
        let rail = MockRail::new();
        rail.deposit(&buyer(), Decimal::ONE);
        let handle = rail
            .lock(&key("lock"), &buyer(), &seller(), Decimal::ONE)
            .await
            .unwrap();
        rail.abort(&key("abort"), &handle).await.unwrap();
        assert_eq!(rail.balance(&buyer(), None, None).await.unwrap(), Decimal::ONE);
        let outcome = rail.poll(&handle).await.unwrap();
        assert_eq!(outcome.status, crate::provider::CommitStatus::Failed);
    }

    #[tokio::test]
    async fn injected_commit_failure_then_success() {
        let rail = MockRail::new();
        rail.deposit(&buyer(), Decimal::ONE);
        rail.set_fail_commits(1);

        let h1 = rail
            .lock(&key("lock1"), &buyer(), &seller(), Decimal::new(2, 1))
            .await
            .unwrap();
        let failed = rail.commit(&key("commit1"), &h1).await.unwrap();
        assert_eq!(failed.status, crate::provider::CommitStatus::Failed);
        rail.abort(&key("abort1"), &h1).await.unwrap();

        let h2 = rail
            .lock(&key("lock2"), &buyer(), &seller(), Decimal::new(2, 1))
            .await
            .unwrap();
        let ok = rail.commit(&key("commit2"), &h2).await.unwrap();
        assert_eq!(ok.status, crate::provider::CommitStatus::Committed);
    }

    #[tokio::test]
    async fn pending_commit_completes_after_polls() {
        let rail = MockRail::new();
        rail.deposit(&buyer(), Decimal::ONE);
        rail.set_pending_commits(2);

        let handle = rail
            .lock(&key("lock"), &buyer(), &seller(), Decimal::new(4, 1))
            .await
            .unwrap();
        let first = rail.commit(&key("commit"), &handle).await.unwrap();
        assert_eq!(first.status, crate::provider::CommitStatus::Pending);

        let second = rail.poll(&handle).await.unwrap();
        assert_eq!(second.status, crate::provider::CommitStatus::Pending);
        let third = rail.poll(&handle).await.unwrap();
        assert_eq!(third.status, crate::provider::CommitStatus::Committed);
        assert_eq!(
            rail.balance(&seller(), None, None).await.unwrap(),
            Decimal::new(4, 1)
        );
    }

    #[tokio::test]
    async fn refund_is_idempotent() {
        let rail = MockRail::new();
        rail.deposit(&seller(), Decimal::ONE);
        let request = RefundRequest {
            dispute_id: DisputeId::derive("r", 0),
            from: seller(),
            to: buyer(),
            amount: Decimal::new(5, 1),
            idempotency_key: key("refund"),
        };
        let first = rail.refund(&request).await.unwrap();
        assert!(first.ok);
        let second = rail.refund(&request).await.unwrap();
        assert!(second.ok);
        assert_eq!(
            rail.balance(&buyer(), None, None).await.unwrap(),
            Decimal::new(5, 1),
            "second refund with the same dispute key must not move funds"
        );
    }
}
