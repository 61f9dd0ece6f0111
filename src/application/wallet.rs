use crate::domain::ports::LedgerStoreRef;
use crate::domain::wallet::{OwnerId, Wallet, WalletStatus};
use crate::error::{LedgerError, Result};
use chrono::Utc;
use tracing::info;

/// Wallet lifecycle: init, enable, disable and lookup.
#[derive(Clone)]
pub struct WalletService {
    store: LedgerStoreRef,
}

impl WalletService {
    pub fn new(store: LedgerStoreRef) -> Self {
        Self { store }
    }

    /// Creates a disabled, empty wallet for `owner`.
    pub async fn init(&self, owner: &OwnerId) -> Result<Wallet> {
        let wallet = Wallet::new(owner.clone());
        self.store.create_wallet(wallet.clone()).await?;
        info!(owner = %owner, wallet_id = %wallet.id, "wallet initialized");
        Ok(wallet)
    }

    pub async fn enable(&self, owner: &OwnerId) -> Result<Wallet> {
        let wallet = self
            .store
            .set_wallet_status(owner, WalletStatus::Enabled, Utc::now())
            .await?;
        info!(owner = %owner, "wallet enabled");
        Ok(wallet)
    }

    pub async fn disable(&self, owner: &OwnerId) -> Result<Wallet> {
        let wallet = self
            .store
            .set_wallet_status(owner, WalletStatus::Disabled, Utc::now())
            .await?;
        info!(owner = %owner, balance = wallet.balance, "wallet disabled");
        Ok(wallet)
    }

    /// Returns the wallet of `owner`, which must be enabled.
    pub async fn get(&self, owner: &OwnerId) -> Result<Wallet> {
        let wallet = self
            .store
            .wallet(owner)
            .await?
            .ok_or_else(|| LedgerError::WalletNotFound(owner.clone()))?;
        wallet.ensure_enabled()?;
        Ok(wallet)
    }

    /// Every wallet regardless of status, ordered by owner.
    pub async fn list(&self) -> Result<Vec<Wallet>> {
        let mut wallets = self.store.all_wallets().await?;
        wallets.sort_by(|a, b| a.owned_by.cmp(&b.owned_by));
        Ok(wallets)
    }
}
