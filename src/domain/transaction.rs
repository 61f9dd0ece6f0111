use crate::domain::wallet::OwnerId;
use crate::error::{LedgerError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifier of a deposit or withdrawal record. Also the settlement correlation id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionId(Uuid);

impl TransactionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl From<Uuid> for TransactionId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl FromStr for TransactionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Caller-supplied idempotency key. Unique across all transactions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ReferenceId(String);

impl ReferenceId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into().trim().to_string();
        if id.is_empty() {
            return Err(LedgerError::ValidationError(
                "Reference id cannot be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ReferenceId {
    type Error = LedgerError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<ReferenceId> for String {
    fn from(id: ReferenceId) -> Self {
        id.0
    }
}

impl fmt::Display for ReferenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Positive amount in minor currency units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct Amount(u64);

impl Amount {
    /// Largest accepted amount; keeps every signed delta representable as `i64`.
    pub const MAX: u64 = i64::MAX as u64;

    pub fn new(value: u64) -> Result<Self> {
        if value == 0 {
            return Err(LedgerError::ValidationError(
                "Amount must be positive".to_string(),
            ));
        }
        if value > Self::MAX {
            return Err(LedgerError::ValidationError(format!(
                "Amount exceeds {}",
                Self::MAX
            )));
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl TryFrom<u64> for Amount {
    type Error = LedgerError;

    fn try_from(value: u64) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Amount> for u64 {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
}

impl TransactionType {
    /// Signed balance delta for `amount`: credits are positive, debits negative.
    pub fn signed(&self, amount: Amount) -> i64 {
        // Amount::MAX guarantees the cast is lossless.
        let magnitude = amount.value() as i64;
        match self {
            TransactionType::Deposit => magnitude,
            TransactionType::Withdrawal => -magnitude,
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionType::Deposit => f.write_str("deposit"),
            TransactionType::Withdrawal => f.write_str("withdrawal"),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Success,
}

/// A deposit or withdrawal record.
///
/// Created `Pending` at submission and moved to `Success` only by settlement.
/// A transaction whose message is dead-lettered stays pending.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct Transaction {
    pub id: TransactionId,
    pub amount: Amount,
    pub status: TransactionStatus,
    pub reference_id: ReferenceId,
    pub owned_by: OwnerId,
    pub r#type: TransactionType,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl Transaction {
    pub fn pending(
        owned_by: OwnerId,
        r#type: TransactionType,
        amount: Amount,
        reference_id: ReferenceId,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TransactionId::generate(),
            amount,
            status: TransactionStatus::Pending,
            reference_id,
            owned_by,
            r#type,
            created_at,
            settled_at: None,
        }
    }

    pub fn signed_amount(&self) -> i64 {
        self.r#type.signed(self.amount)
    }

    pub fn is_settled(&self) -> bool {
        self.status == TransactionStatus::Success
    }

    pub fn settle(&mut self, at: DateTime<Utc>) {
        self.status = TransactionStatus::Success;
        self.settled_at = Some(at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amount_validation() {
        assert!(Amount::new(1).is_ok());
        assert!(Amount::new(Amount::MAX).is_ok());
        assert!(matches!(
            Amount::new(0),
            Err(LedgerError::ValidationError(_))
        ));
        assert!(matches!(
            Amount::new(Amount::MAX + 1),
            Err(LedgerError::ValidationError(_))
        ));
    }

    #[test]
    fn test_signed_amount() {
        let amount = Amount::new(50_000).unwrap();
        assert_eq!(TransactionType::Deposit.signed(amount), 50_000);
        assert_eq!(TransactionType::Withdrawal.signed(amount), -50_000);
    }

    #[test]
    fn test_pending_then_settle() {
        let mut tx = Transaction::pending(
            OwnerId::new("alice").unwrap(),
            TransactionType::Withdrawal,
            Amount::new(10).unwrap(),
            ReferenceId::new("r1").unwrap(),
            Utc::now(),
        );
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert_eq!(tx.signed_amount(), -10);
        assert!(!tx.is_settled());

        let at = Utc::now();
        tx.settle(at);
        assert!(tx.is_settled());
        assert_eq!(tx.settled_at, Some(at));
    }

    #[test]
    fn test_transaction_id_parsing() {
        let id = TransactionId::generate();
        let parsed: TransactionId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<TransactionId>().is_err());
    }
}
