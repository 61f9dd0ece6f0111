use crate::domain::message::MessageError;
use crate::domain::transaction::{ReferenceId, TransactionId};
use crate::domain::wallet::OwnerId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LedgerError>;

/// Coarse classification used to route a failure.
///
/// Business errors go back to the submitter, malformed messages are rejected
/// without retry, and transient errors are retried through broker redelivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Malformed,
    Business,
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Reference exist: {0}")]
    ReferenceExists(ReferenceId),
    #[error("Insufficient balance for {owner}: balance {balance}, requested {requested}")]
    InsufficientBalance {
        owner: OwnerId,
        balance: i64,
        requested: i64,
    },
    #[error("Wallet not found for {0}")]
    WalletNotFound(OwnerId),
    #[error("Wallet already exists for {0}")]
    WalletExists(OwnerId),
    #[error("Disabled: wallet of {0} is not enabled")]
    WalletDisabled(OwnerId),
    #[error("Already enabled: wallet of {0}")]
    WalletAlreadyEnabled(OwnerId),
    #[error("Already disabled: wallet of {0}")]
    WalletAlreadyDisabled(OwnerId),
    #[error("Transaction {0} not found")]
    TransactionNotFound(TransactionId),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Malformed message: {0}")]
    MalformedMessage(#[from] MessageError),
    #[error("Settlement of {owner} ({signed_amount}) does not match transaction {transaction_id}")]
    SettlementMismatch {
        transaction_id: TransactionId,
        owner: OwnerId,
        signed_amount: i64,
    },
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Broker error: {0}")]
    Broker(String),
    #[error("Cache error: {0}")]
    Cache(String),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::MalformedMessage(_) | LedgerError::SettlementMismatch { .. } => {
                ErrorKind::Malformed
            }
            LedgerError::Storage(_)
            | LedgerError::Broker(_)
            | LedgerError::Cache(_)
            | LedgerError::IoError(_) => ErrorKind::Transient,
            _ => ErrorKind::Business,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for LedgerError {
    fn from(e: rocksdb::Error) -> Self {
        LedgerError::Storage(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let owner = OwnerId::new("alice").unwrap();
        assert_eq!(
            LedgerError::Storage("down".into()).kind(),
            ErrorKind::Transient
        );
        assert_eq!(
            LedgerError::Broker("closed".into()).kind(),
            ErrorKind::Transient
        );
        assert_eq!(
            LedgerError::MalformedMessage(MessageError::MissingField("qid")).kind(),
            ErrorKind::Malformed
        );
        assert_eq!(
            LedgerError::SettlementMismatch {
                transaction_id: TransactionId::generate(),
                owner: owner.clone(),
                signed_amount: 1,
            }
            .kind(),
            ErrorKind::Malformed
        );
        assert_eq!(
            LedgerError::WalletDisabled(owner.clone()).kind(),
            ErrorKind::Business
        );
        assert_eq!(
            LedgerError::InsufficientBalance {
                owner,
                balance: 10,
                requested: 20
            }
            .kind(),
            ErrorKind::Business
        );
    }

    #[test]
    fn test_error_display() {
        let err = LedgerError::ReferenceExists(ReferenceId::new("r1").unwrap());
        assert_eq!(err.to_string(), "Reference exist: r1");
    }
}
