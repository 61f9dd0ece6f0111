use crate::error::{LedgerError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of the customer owning a wallet.
///
/// One wallet per owner; every balance mutation is addressed by owner.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into().trim().to_string();
        if id.is_empty() {
            return Err(LedgerError::ValidationError(
                "Owner id cannot be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for OwnerId {
    type Error = LedgerError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<OwnerId> for String {
    fn from(id: OwnerId) -> Self {
        id.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum WalletStatus {
    Enabled,
    Disabled,
}

impl fmt::Display for WalletStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WalletStatus::Enabled => f.write_str("enabled"),
            WalletStatus::Disabled => f.write_str("disabled"),
        }
    }
}

/// A customer wallet.
///
/// `balance` is held in minor currency units. It is never assigned by the
/// application once the wallet exists: stores only expose a signed delta update.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct Wallet {
    pub id: Uuid,
    pub owned_by: OwnerId,
    pub balance: i64,
    pub status: WalletStatus,
    pub enabled_at: Option<DateTime<Utc>>,
    pub disabled_at: Option<DateTime<Utc>>,
}

impl Wallet {
    /// Creates a new disabled wallet with a zero balance.
    pub fn new(owned_by: OwnerId) -> Self {
        Self {
            id: Uuid::new_v4(),
            owned_by,
            balance: 0,
            status: WalletStatus::Disabled,
            enabled_at: None,
            disabled_at: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.status == WalletStatus::Enabled
    }

    pub fn ensure_enabled(&self) -> Result<()> {
        if self.is_enabled() {
            Ok(())
        } else {
            Err(LedgerError::WalletDisabled(self.owned_by.clone()))
        }
    }

    pub fn enable(&mut self, at: DateTime<Utc>) -> Result<()> {
        if self.is_enabled() {
            return Err(LedgerError::WalletAlreadyEnabled(self.owned_by.clone()));
        }
        self.status = WalletStatus::Enabled;
        self.enabled_at = Some(at);
        Ok(())
    }

    pub fn disable(&mut self, at: DateTime<Utc>) -> Result<()> {
        if !self.is_enabled() {
            return Err(LedgerError::WalletAlreadyDisabled(self.owned_by.clone()));
        }
        self.status = WalletStatus::Disabled;
        self.disabled_at = Some(at);
        Ok(())
    }

    /// Balance after applying `delta`, or `None` if it would go negative or overflow.
    pub fn balance_after(&self, delta: i64) -> Option<i64> {
        self.balance.checked_add(delta).filter(|b| *b >= 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> OwnerId {
        OwnerId::new("ea0212d3-abd6-406f-8c67-868e814a2436").unwrap()
    }

    #[test]
    fn test_owner_id_validation() {
        assert!(OwnerId::new("alice").is_ok());
        assert_eq!(OwnerId::new("  bob ").unwrap().as_str(), "bob");
        assert!(matches!(
            OwnerId::new("   "),
            Err(LedgerError::ValidationError(_))
        ));
    }

    #[test]
    fn test_new_wallet_is_disabled_and_empty() {
        let wallet = Wallet::new(owner());
        assert_eq!(wallet.balance, 0);
        assert_eq!(wallet.status, WalletStatus::Disabled);
        assert!(wallet.ensure_enabled().is_err());
    }

    #[test]
    fn test_enable_then_disable() {
        let mut wallet = Wallet::new(owner());
        let now = Utc::now();

        wallet.enable(now).unwrap();
        assert!(wallet.is_enabled());
        assert_eq!(wallet.enabled_at, Some(now));
        assert!(matches!(
            wallet.enable(now),
            Err(LedgerError::WalletAlreadyEnabled(_))
        ));

        wallet.disable(now).unwrap();
        assert_eq!(wallet.status, WalletStatus::Disabled);
        assert_eq!(wallet.disabled_at, Some(now));
        assert!(matches!(
            wallet.disable(now),
            Err(LedgerError::WalletAlreadyDisabled(_))
        ));
    }

    #[test]
    fn test_balance_after_rejects_negative() {
        let mut wallet = Wallet::new(owner());
        wallet.balance = 100;
        assert_eq!(wallet.balance_after(-100), Some(0));
        assert_eq!(wallet.balance_after(50), Some(150));
        assert_eq!(wallet.balance_after(-101), None);
        wallet.balance = i64::MAX;
        assert_eq!(wallet.balance_after(1), None);
    }

    #[test]
    fn test_wallet_serde_roundtrip_keeps_owner_validation() {
        let wallet = Wallet::new(owner());
        let json = serde_json::to_string(&wallet).unwrap();
        assert!(json.contains("\"status\":\"disabled\""));

        let bad = json.replace(owner().as_str(), " ");
        assert!(serde_json::from_str::<Wallet>(&bad).is_err());
    }
}
