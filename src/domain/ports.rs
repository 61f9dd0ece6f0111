use super::transaction::{ReferenceId, Transaction, TransactionId};
use super::wallet::{OwnerId, Wallet, WalletStatus};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub type LedgerStoreRef = Arc<dyn LedgerStore>;
pub type UnitOfWorkBox = Box<dyn UnitOfWork>;
pub type MessageChannelRef = Arc<dyn MessageChannel>;
pub type TtlCacheRef = Arc<dyn TtlCache>;

/// Durable wallet and transaction storage.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Starts a unit of work. Nothing it writes is visible until `commit`.
    async fn begin(&self) -> Result<UnitOfWorkBox>;
    async fn wallet(&self, owner: &OwnerId) -> Result<Option<Wallet>>;
    /// Fails with `WalletExists` if the owner already has a wallet.
    async fn create_wallet(&self, wallet: Wallet) -> Result<()>;
    /// Moves the wallet to `status`, stamping `at`. The balance is untouched.
    async fn set_wallet_status(
        &self,
        owner: &OwnerId,
        status: WalletStatus,
        at: DateTime<Utc>,
    ) -> Result<Wallet>;
    async fn all_wallets(&self) -> Result<Vec<Wallet>>;
    async fn transaction(&self, id: TransactionId) -> Result<Option<Transaction>>;
}

/// One atomic storage transaction.
///
/// Dropping a unit of work without committing discards its writes.
#[async_trait]
pub trait UnitOfWork: Send {
    async fn wallet(&mut self, owner: &OwnerId) -> Result<Option<Wallet>>;
    async fn reference_exists(&mut self, reference: &ReferenceId) -> Result<bool>;
    async fn transaction(&mut self, id: TransactionId) -> Result<Option<Transaction>>;
    /// Fails with `ReferenceExists` if the reference id is taken.
    async fn insert_transaction(&mut self, tx: Transaction) -> Result<()>;
    /// Adds a signed delta to the balance and returns the new balance.
    ///
    /// Fails with `InsufficientBalance` instead of letting the balance go negative.
    async fn apply_balance_delta(&mut self, owner: &OwnerId, delta: i64) -> Result<i64>;
    async fn mark_settled(&mut self, id: TransactionId, at: DateTime<Utc>) -> Result<()>;
    async fn commit(self: Box<Self>) -> Result<()>;
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Key/value cache with per-entry expiry.
#[async_trait]
pub trait TtlCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<()>;
}

/// Settlement queue as seen by producers and consumers.
#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// Publishes to the incoming queue.
    async fn publish(&self, body: Vec<u8>) -> Result<()>;
    /// Publishes to the delayed-retry queue; the body reaches the incoming queue after `delay`.
    async fn publish_delayed(&self, body: Vec<u8>, delay: Duration) -> Result<()>;
    /// Waits for the next message of the incoming queue.
    async fn next_delivery(&self) -> Result<Delivery>;
}

/// Settles the fate of a delivery with the broker.
#[async_trait]
pub trait Acker: Send + Sync {
    async fn ack(&self, delivery_tag: u64) -> Result<()>;
    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<()>;
    async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<()>;
}

/// A message handed to a consumer, pending acknowledgement.
pub struct Delivery {
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub body: Vec<u8>,
    acker: Arc<dyn Acker>,
}

impl Delivery {
    pub fn new(delivery_tag: u64, redelivered: bool, body: Vec<u8>, acker: Arc<dyn Acker>) -> Self {
        Self {
            delivery_tag,
            redelivered,
            body,
            acker,
        }
    }

    pub async fn ack(&self) -> Result<()> {
        self.acker.ack(self.delivery_tag).await
    }

    pub async fn nack(&self, requeue: bool) -> Result<()> {
        self.acker.nack(self.delivery_tag, requeue).await
    }

    pub async fn reject(&self, requeue: bool) -> Result<()> {
        self.acker.reject(self.delivery_tag, requeue).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("delivery_tag", &self.delivery_tag)
            .field("redelivered", &self.redelivered)
            .field("body", &String::from_utf8_lossy(&self.body))
            .finish()
    }
}
