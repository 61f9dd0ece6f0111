use super::staging::StagedWrites;
use crate::domain::ports::{LedgerStore, UnitOfWork, UnitOfWorkBox};
use crate::domain::transaction::{ReferenceId, Transaction, TransactionId};
use crate::domain::wallet::{OwnerId, Wallet, WalletStatus};
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Default)]
struct LedgerState {
    wallets: HashMap<OwnerId, Wallet>,
    transactions: HashMap<TransactionId, Transaction>,
    references: HashMap<ReferenceId, TransactionId>,
}

impl LedgerState {
    fn set_status(
        &mut self,
        owner: &OwnerId,
        status: WalletStatus,
        at: DateTime<Utc>,
    ) -> Result<Wallet> {
        let wallet = self
            .wallets
            .get_mut(owner)
            .ok_or_else(|| LedgerError::WalletNotFound(owner.clone()))?;
        match status {
            WalletStatus::Enabled => wallet.enable(at)?,
            WalletStatus::Disabled => wallet.disable(at)?,
        }
        Ok(wallet.clone())
    }
}

/// A thread-safe in-memory ledger.
///
/// Uses `Arc<Mutex<LedgerState>>`; a unit of work owns the lock until it
/// commits or is dropped, which makes every unit of work serializable.
/// Ideal for testing and for the CLI when no database path is given.
#[derive(Default, Clone)]
pub struct InMemoryLedgerStore {
    state: Arc<Mutex<LedgerState>>,
}

impl InMemoryLedgerStore {
    /// Creates a new, empty in-memory ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every committed transaction, for inspection in tests and reconciliation.
    pub async fn transactions(&self) -> Vec<Transaction> {
        let state = self.state.lock().await;
        state.transactions.values().cloned().collect()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn begin(&self) -> Result<UnitOfWorkBox> {
        let state = self.state.clone().lock_owned().await;
        Ok(Box::new(InMemoryUnitOfWork {
            state,
            staged: StagedWrites::default(),
        }))
    }

    async fn wallet(&self, owner: &OwnerId) -> Result<Option<Wallet>> {
        let state = self.state.lock().await;
        Ok(state.wallets.get(owner).cloned())
    }

    async fn create_wallet(&self, wallet: Wallet) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.wallets.contains_key(&wallet.owned_by) {
            return Err(LedgerError::WalletExists(wallet.owned_by));
        }
        state.wallets.insert(wallet.owned_by.clone(), wallet);
        Ok(())
    }

    async fn set_wallet_status(
        &self,
        owner: &OwnerId,
        status: WalletStatus,
        at: DateTime<Utc>,
    ) -> Result<Wallet> {
        let mut state = self.state.lock().await;
        state.set_status(owner, status, at)
    }

    async fn all_wallets(&self) -> Result<Vec<Wallet>> {
        let state = self.state.lock().await;
        Ok(state.wallets.values().cloned().collect())
    }

    async fn transaction(&self, id: TransactionId) -> Result<Option<Transaction>> {
        let state = self.state.lock().await;
        Ok(state.transactions.get(&id).cloned())
    }
}

struct InMemoryUnitOfWork {
    state: OwnedMutexGuard<LedgerState>,
    staged: StagedWrites,
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    async fn wallet(&mut self, owner: &OwnerId) -> Result<Option<Wallet>> {
        Ok(self
            .state
            .wallets
            .get(owner)
            .cloned()
            .map(|w| self.staged.overlay_wallet(w)))
    }

    async fn reference_exists(&mut self, reference: &ReferenceId) -> Result<bool> {
        Ok(self.state.references.contains_key(reference) || self.staged.has_reference(reference))
    }

    async fn transaction(&mut self, id: TransactionId) -> Result<Option<Transaction>> {
        let tx = self
            .state
            .transactions
            .get(&id)
            .or_else(|| self.staged.inserted(id))
            .cloned();
        Ok(tx.map(|t| self.staged.overlay_transaction(t)))
    }

    async fn insert_transaction(&mut self, tx: Transaction) -> Result<()> {
        if self.state.references.contains_key(&tx.reference_id) {
            return Err(LedgerError::ReferenceExists(tx.reference_id));
        }
        self.staged.stage_insert(tx)
    }

    async fn apply_balance_delta(&mut self, owner: &OwnerId, delta: i64) -> Result<i64> {
        let committed = self
            .state
            .wallets
            .get(owner)
            .ok_or_else(|| LedgerError::WalletNotFound(owner.clone()))?;
        self.staged.stage_delta(committed, delta)
    }

    async fn mark_settled(&mut self, id: TransactionId, at: DateTime<Utc>) -> Result<()> {
        if !self.state.transactions.contains_key(&id) && self.staged.inserted(id).is_none() {
            return Err(LedgerError::TransactionNotFound(id));
        }
        self.staged.stage_settled(id, at);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let InMemoryUnitOfWork { mut state, staged } = *self;

        for tx in staged.inserted {
            state.references.insert(tx.reference_id.clone(), tx.id);
            state.transactions.insert(tx.id, tx);
        }
        for (owner, delta) in staged.deltas {
            if let Some(wallet) = state.wallets.get_mut(&owner) {
                wallet.balance += delta;
            }
        }
        for (id, at) in staged.settled {
            if let Some(tx) = state.transactions.get_mut(&id) {
                tx.settle(at);
            }
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
