#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use wallet_ledger::application::consumer::{Outcome, SettlementConsumer};
use wallet_ledger::application::guard::{SubmissionGuard, SubmissionRequest};
use wallet_ledger::application::wallet::WalletService;
use wallet_ledger::config::SettlementConfig;
use wallet_ledger::domain::ports::{LedgerStore, MessageChannel, UnitOfWorkBox};
use wallet_ledger::domain::transaction::{
    Amount, ReferenceId, Transaction, TransactionId, TransactionType,
};
use wallet_ledger::domain::wallet::{OwnerId, Wallet, WalletStatus};
use wallet_ledger::error::{LedgerError, Result};
use wallet_ledger::infrastructure::broker::{BrokerConnection, InMemoryBroker};
use wallet_ledger::infrastructure::cache::InMemoryTtlCache;
use wallet_ledger::infrastructure::in_memory::InMemoryLedgerStore;

/// Ledger store that can be switched into an outage: `begin` then fails.
#[derive(Default)]
pub struct FailingLedgerStore {
    inner: InMemoryLedgerStore,
    failing: AtomicBool,
    begins: AtomicUsize,
}

impl FailingLedgerStore {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn begins(&self) -> usize {
        self.begins.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &InMemoryLedgerStore {
        &self.inner
    }
}

#[async_trait]
impl LedgerStore for FailingLedgerStore {
    async fn begin(&self) -> Result<UnitOfWorkBox> {
        self.begins.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(LedgerError::Storage("database unavailable".to_string()));
        }
        self.inner.begin().await
    }

    async fn wallet(&self, owner: &OwnerId) -> Result<Option<Wallet>> {
        self.inner.wallet(owner).await
    }

    async fn create_wallet(&self, wallet: Wallet) -> Result<()> {
        self.inner.create_wallet(wallet).await
    }

    async fn set_wallet_status(
        &self,
        owner: &OwnerId,
        status: WalletStatus,
        at: DateTime<Utc>,
    ) -> Result<Wallet> {
        self.inner.set_wallet_status(owner, status, at).await
    }

    async fn all_wallets(&self) -> Result<Vec<Wallet>> {
        self.inner.all_wallets().await
    }

    async fn transaction(&self, id: TransactionId) -> Result<Option<Transaction>> {
        self.inner.transaction(id).await
    }
}

/// In-process wiring of every settlement component.
pub struct Harness {
    pub broker: InMemoryBroker,
    pub connection: Arc<BrokerConnection>,
    pub store: Arc<FailingLedgerStore>,
    pub cache: Arc<InMemoryTtlCache>,
    pub guard: SubmissionGuard,
    pub wallets: WalletService,
    pub config: SettlementConfig,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(SettlementConfig::default())
    }

    pub fn with_config(config: SettlementConfig) -> Self {
        let broker = InMemoryBroker::new();
        let connection = Arc::new(
            BrokerConnection::connect(broker.clone(), config.topology.clone()).unwrap(),
        );
        let store = Arc::new(FailingLedgerStore::default());
        Self {
            guard: SubmissionGuard::new(store.clone(), connection.clone()),
            wallets: WalletService::new(store.clone()),
            cache: Arc::new(InMemoryTtlCache::new()),
            broker,
            connection,
            store,
            config,
        }
    }

    pub fn consumer(&self) -> SettlementConsumer {
        SettlementConsumer::new(
            self.connection.clone(),
            self.store.clone(),
            self.cache.clone(),
            &self.config,
        )
        .unwrap()
    }

    /// Creates and enables a wallet for `name`.
    pub async fn enabled_wallet(&self, name: &str) -> OwnerId {
        let owner = owner(name);
        self.wallets.init(&owner).await.unwrap();
        self.wallets.enable(&owner).await.unwrap();
        owner
    }

    /// Takes the next delivery and runs it through `consumer`.
    pub async fn settle_next(&self, consumer: &SettlementConsumer) -> Outcome {
        let delivery = self.connection.next_delivery().await.unwrap();
        consumer.handle(delivery).await.unwrap()
    }

    /// Creates an enabled wallet and settles a deposit of `balance` into it.
    pub async fn funded_wallet(&self, name: &str, balance: u64) -> OwnerId {
        let owner = self.enabled_wallet(name).await;
        self.guard
            .submit(deposit(&owner, balance, &format!("{name}-funding")))
            .await
            .unwrap();
        let outcome = self.settle_next(&self.consumer()).await;
        assert_eq!(outcome, Outcome::Settled { balance: balance as i64 });
        owner
    }

    pub async fn balance(&self, owner: &OwnerId) -> i64 {
        self.store.wallet(owner).await.unwrap().unwrap().balance
    }

    pub fn incoming(&self) -> usize {
        self.broker
            .message_count(&self.config.topology.incoming_queue)
            .unwrap()
    }

    pub fn dead_letters(&self) -> usize {
        self.broker
            .message_count(&self.config.topology.dead_letter_queue)
            .unwrap()
    }
}

pub fn owner(name: &str) -> OwnerId {
    OwnerId::new(name).unwrap()
}

pub fn deposit(owner: &OwnerId, amount: u64, reference: &str) -> SubmissionRequest {
    request(owner, TransactionType::Deposit, amount, reference)
}

pub fn withdrawal(owner: &OwnerId, amount: u64, reference: &str) -> SubmissionRequest {
    request(owner, TransactionType::Withdrawal, amount, reference)
}

fn request(owner: &OwnerId, r#type: TransactionType, amount: u64, reference: &str) -> SubmissionRequest {
    SubmissionRequest {
        owned_by: owner.clone(),
        r#type,
        amount: Amount::new(amount).unwrap(),
        reference_id: ReferenceId::new(reference).unwrap(),
    }
}
