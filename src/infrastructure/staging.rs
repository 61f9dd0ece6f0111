use crate::domain::transaction::{ReferenceId, Transaction, TransactionId};
use crate::domain::wallet::{OwnerId, Wallet};
use crate::error::{LedgerError, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Writes buffered by a unit of work until commit.
///
/// Stores hold their single-writer lock for the whole unit of work, so the
/// committed rows read underneath cannot change before the staged writes land.
#[derive(Debug, Default)]
pub(crate) struct StagedWrites {
    pub(crate) inserted: Vec<Transaction>,
    pub(crate) deltas: HashMap<OwnerId, i64>,
    pub(crate) settled: HashMap<TransactionId, DateTime<Utc>>,
}

impl StagedWrites {
    pub(crate) fn has_reference(&self, reference: &ReferenceId) -> bool {
        self.inserted.iter().any(|t| &t.reference_id == reference)
    }

    pub(crate) fn inserted(&self, id: TransactionId) -> Option<&Transaction> {
        self.inserted.iter().find(|t| t.id == id)
    }

    /// Applies staged balance changes on top of a committed wallet row.
    pub(crate) fn overlay_wallet(&self, mut wallet: Wallet) -> Wallet {
        if let Some(delta) = self.deltas.get(&wallet.owned_by) {
            wallet.balance += delta;
        }
        wallet
    }

    /// Applies a staged settlement on top of a committed or staged transaction.
    pub(crate) fn overlay_transaction(&self, mut tx: Transaction) -> Transaction {
        if let Some(at) = self.settled.get(&tx.id) {
            tx.settle(*at);
        }
        tx
    }

    /// Stages `delta` against `committed`, refusing to go below zero.
    pub(crate) fn stage_delta(&mut self, committed: &Wallet, delta: i64) -> Result<i64> {
        let staged = self.deltas.get(&committed.owned_by).copied().unwrap_or(0);
        let current = self.overlay_wallet(committed.clone());
        let balance = current
            .balance_after(delta)
            .ok_or_else(|| LedgerError::InsufficientBalance {
                owner: committed.owned_by.clone(),
                balance: current.balance,
                requested: -delta,
            })?;
        self.deltas
            .insert(committed.owned_by.clone(), staged + delta);
        Ok(balance)
    }

    pub(crate) fn stage_insert(&mut self, tx: Transaction) -> Result<()> {
        if self.has_reference(&tx.reference_id) {
            return Err(LedgerError::ReferenceExists(tx.reference_id));
        }
        self.inserted.push(tx);
        Ok(())
    }

    pub(crate) fn stage_settled(&mut self, id: TransactionId, at: DateTime<Utc>) {
        self.settled.insert(id, at);
    }
}
