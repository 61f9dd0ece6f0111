use super::staging::StagedWrites;
use crate::domain::ports::{LedgerStore, UnitOfWork, UnitOfWorkBox};
use crate::domain::transaction::{ReferenceId, Transaction, TransactionId};
use crate::domain::wallet::{OwnerId, Wallet, WalletStatus};
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Column Family for wallets, keyed by owner id.
pub const CF_WALLETS: &str = "wallets";
/// Column Family for transactions, keyed by transaction id.
pub const CF_TRANSACTIONS: &str = "transactions";
/// Column Family mapping reference ids to transaction ids (the uniqueness index).
pub const CF_REFERENCES: &str = "references";

/// A persistent ledger implementation using RocksDB.
///
/// Wallets, transactions and the reference index live in separate Column
/// Families. A unit of work stages its writes and commits them as one
/// `WriteBatch`, so the balance delta and the settled flag land together.
/// Writers are serialized by an async lock held for the whole unit of work.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// Ensures that the required column families exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cfs = [CF_WALLETS, CF_TRANSACTIONS, CF_REFERENCES]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path, cfs)?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| LedgerError::Storage(format!("{name} column family not found")))
    }

    fn read<T: DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        match self.db.get_cf(cf, key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn exists(&self, cf_name: &str, key: &[u8]) -> Result<bool> {
        let cf = self.cf(cf_name)?;
        Ok(self.db.get_pinned_cf(cf, key)?.is_some())
    }

    fn write_wallet(&self, wallet: &Wallet) -> Result<()> {
        let cf = self.cf(CF_WALLETS)?;
        self.db
            .put_cf(cf, wallet.owned_by.as_str().as_bytes(), encode(wallet)?)?;
        Ok(())
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| LedgerError::Storage(format!("Serialization error: {e}")))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes)
        .map_err(|e| LedgerError::Storage(format!("Deserialization error: {e}")))
}

fn tx_key(id: TransactionId) -> [u8; 16] {
    *id.as_uuid().as_bytes()
}

#[async_trait]
impl LedgerStore for RocksDBStore {
    async fn begin(&self) -> Result<UnitOfWorkBox> {
        let guard = self.write_lock.clone().lock_owned().await;
        Ok(Box::new(RocksDBUnitOfWork {
            store: self.clone(),
            _guard: guard,
            staged: StagedWrites::default(),
        }))
    }

    async fn wallet(&self, owner: &OwnerId) -> Result<Option<Wallet>> {
        self.read(CF_WALLETS, owner.as_str().as_bytes())
    }

    async fn create_wallet(&self, wallet: Wallet) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        if self.exists(CF_WALLETS, wallet.owned_by.as_str().as_bytes())? {
            return Err(LedgerError::WalletExists(wallet.owned_by));
        }
        self.write_wallet(&wallet)
    }

    async fn set_wallet_status(
        &self,
        owner: &OwnerId,
        status: WalletStatus,
        at: DateTime<Utc>,
    ) -> Result<Wallet> {
        let _guard = self.write_lock.lock().await;
        let mut wallet: Wallet = self
            .read(CF_WALLETS, owner.as_str().as_bytes())?
            .ok_or_else(|| LedgerError::WalletNotFound(owner.clone()))?;
        match status {
            WalletStatus::Enabled => wallet.enable(at)?,
            WalletStatus::Disabled => wallet.disable(at)?,
        }
        self.write_wallet(&wallet)?;
        Ok(wallet)
    }

    async fn all_wallets(&self) -> Result<Vec<Wallet>> {
        let cf = self.cf(CF_WALLETS)?;
        let mut wallets = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            wallets.push(decode(&value)?);
        }
        Ok(wallets)
    }

    async fn transaction(&self, id: TransactionId) -> Result<Option<Transaction>> {
        self.read(CF_TRANSACTIONS, &tx_key(id))
    }
}

struct RocksDBUnitOfWork {
    store: RocksDBStore,
    _guard: OwnedMutexGuard<()>,
    staged: StagedWrites,
}

impl RocksDBUnitOfWork {
    fn committed_transaction(&self, id: TransactionId) -> Result<Option<Transaction>> {
        match self.store.read(CF_TRANSACTIONS, &tx_key(id))? {
            Some(tx) => Ok(Some(tx)),
            None => Ok(self.staged.inserted(id).cloned()),
        }
    }
}

#[async_trait]
impl UnitOfWork for RocksDBUnitOfWork {
    async fn wallet(&mut self, owner: &OwnerId) -> Result<Option<Wallet>> {
        let wallet: Option<Wallet> = self.store.read(CF_WALLETS, owner.as_str().as_bytes())?;
        Ok(wallet.map(|w| self.staged.overlay_wallet(w)))
    }

    async fn reference_exists(&mut self, reference: &ReferenceId) -> Result<bool> {
        Ok(self
            .store
            .exists(CF_REFERENCES, reference.as_str().as_bytes())?
            || self.staged.has_reference(reference))
    }

    async fn transaction(&mut self, id: TransactionId) -> Result<Option<Transaction>> {
        Ok(self
            .committed_transaction(id)?
            .map(|t| self.staged.overlay_transaction(t)))
    }

    async fn insert_transaction(&mut self, tx: Transaction) -> Result<()> {
        if self
            .store
            .exists(CF_REFERENCES, tx.reference_id.as_str().as_bytes())?
        {
            return Err(LedgerError::ReferenceExists(tx.reference_id));
        }
        self.staged.stage_insert(tx)
    }

    async fn apply_balance_delta(&mut self, owner: &OwnerId, delta: i64) -> Result<i64> {
        let committed: Wallet = self
            .store
            .read(CF_WALLETS, owner.as_str().as_bytes())?
            .ok_or_else(|| LedgerError::WalletNotFound(owner.clone()))?;
        self.staged.stage_delta(&committed, delta)
    }

    async fn mark_settled(&mut self, id: TransactionId, at: DateTime<Utc>) -> Result<()> {
        if self.committed_transaction(id)?.is_none() {
            return Err(LedgerError::TransactionNotFound(id));
        }
        self.staged.stage_settled(id, at);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let RocksDBUnitOfWork {
            store,
            _guard,
            staged,
        } = *self;
        let wallets_cf = store.cf(CF_WALLETS)?;
        let transactions_cf = store.cf(CF_TRANSACTIONS)?;
        let references_cf = store.cf(CF_REFERENCES)?;
        let mut batch = WriteBatch::default();

        for tx in &staged.inserted {
            let tx = staged.overlay_transaction(tx.clone());
            batch.put_cf(references_cf, tx.reference_id.as_str().as_bytes(), tx_key(tx.id));
            batch.put_cf(transactions_cf, tx_key(tx.id), encode(&tx)?);
        }
        for (id, at) in &staged.settled {
            if staged.inserted(*id).is_some() {
                continue;
            }
            if let Some(mut tx) = store.read::<Transaction>(CF_TRANSACTIONS, &tx_key(*id))? {
                tx.settle(*at);
                batch.put_cf(transactions_cf, tx_key(*id), encode(&tx)?);
            }
        }
        for owner in staged.deltas.keys() {
            if let Some(wallet) = store.read::<Wallet>(CF_WALLETS, owner.as_str().as_bytes())? {
                let wallet = staged.overlay_wallet(wallet);
                batch.put_cf(wallets_cf, owner.as_str().as_bytes(), encode(&wallet)?);
            }
        }

        store.db.write(batch)?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::transaction::{Amount, TransactionStatus, TransactionType};
    use tempfile::tempdir;

    fn owner() -> OwnerId {
        OwnerId::new("alice").unwrap()
    }

    #[tokio::test]
    async fn test_rocksdb_open_cf() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).expect("Failed to open RocksDB");

        assert!(store.db.cf_handle(CF_WALLETS).is_some());
        assert!(store.db.cf_handle(CF_TRANSACTIONS).is_some());
        assert!(store.db.cf_handle(CF_REFERENCES).is_some());
    }

    #[tokio::test]
    async fn test_rocksdb_settlement_commit() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();
        store.create_wallet(Wallet::new(owner())).await.unwrap();

        let tx = Transaction::pending(
            owner(),
            TransactionType::Deposit,
            Amount::new(50_000).unwrap(),
            ReferenceId::new("r1").unwrap(),
            Utc::now(),
        );
        let id = tx.id;
        let mut uow = store.begin().await.unwrap();
        uow.insert_transaction(tx).await.unwrap();
        uow.commit().await.unwrap();

        let mut uow = store.begin().await.unwrap();
        assert!(uow.reference_exists(&ReferenceId::new("r1").unwrap()).await.unwrap());
        assert_eq!(uow.apply_balance_delta(&owner(), 50_000).await.unwrap(), 50_000);
        uow.mark_settled(id, Utc::now()).await.unwrap();
        uow.commit().await.unwrap();

        let wallet = store.wallet(&owner()).await.unwrap().unwrap();
        assert_eq!(wallet.balance, 50_000);
        let stored = store.transaction(id).await.unwrap().unwrap();
        assert_eq!(stored.status, TransactionStatus::Success);
    }

    #[tokio::test]
    async fn test_rocksdb_reopen_keeps_state() {
        let dir = tempdir().unwrap();
        {
            let store = RocksDBStore::open(dir.path()).unwrap();
            store.create_wallet(Wallet::new(owner())).await.unwrap();
            let mut uow = store.begin().await.unwrap();
            uow.apply_balance_delta(&owner(), 10).await.unwrap();
            uow.commit().await.unwrap();
        }

        let store = RocksDBStore::open(dir.path()).unwrap();
        let all = store.all_wallets().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].balance, 10);
        assert!(matches!(
            store.create_wallet(Wallet::new(owner())).await,
            Err(LedgerError::WalletExists(_))
        ));
    }
}
