use crate::domain::ports::LedgerStoreRef;
use crate::domain::transaction::TransactionId;
use crate::domain::wallet::OwnerId;
use crate::error::{LedgerError, Result};
use chrono::Utc;

/// Result of a successful settlement attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Applied { balance: i64 },
    /// The transaction was settled by an earlier delivery; nothing changed.
    AlreadySettled,
}

/// Moves a pending transaction to success and applies its balance delta,
/// both in one unit of work.
#[derive(Clone)]
pub struct SettlementApplier {
    store: LedgerStoreRef,
}

impl SettlementApplier {
    pub fn new(store: LedgerStoreRef) -> Self {
        Self { store }
    }

    pub async fn apply(
        &self,
        transaction_id: TransactionId,
        owner: &OwnerId,
        signed_amount: i64,
    ) -> Result<Settlement> {
        let mut uow = self.store.begin().await?;

        let tx = match uow.transaction(transaction_id).await {
            Ok(Some(tx)) => tx,
            Ok(None) => {
                uow.rollback().await?;
                return Err(LedgerError::TransactionNotFound(transaction_id));
            }
            Err(e) => {
                uow.rollback().await?;
                return Err(e);
            }
        };

        if &tx.owned_by != owner || tx.signed_amount() != signed_amount {
            uow.rollback().await?;
            return Err(LedgerError::SettlementMismatch {
                transaction_id,
                owner: owner.clone(),
                signed_amount,
            });
        }
        if tx.is_settled() {
            uow.rollback().await?;
            return Ok(Settlement::AlreadySettled);
        }

        let result = async {
            let balance = uow.apply_balance_delta(owner, signed_amount).await?;
            uow.mark_settled(transaction_id, Utc::now()).await?;
            Ok::<_, LedgerError>(balance)
        }
        .await;

        match result {
            Ok(balance) => {
                uow.commit().await?;
                Ok(Settlement::Applied { balance })
            }
            Err(e) => {
                uow.rollback().await?;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::LedgerStore;
    use crate::domain::transaction::{Amount, ReferenceId, Transaction, TransactionType};
    use crate::domain::wallet::Wallet;
    use crate::infrastructure::in_memory::InMemoryLedgerStore;
    use std::sync::Arc;

    fn alice() -> OwnerId {
        OwnerId::new("alice").unwrap()
    }

    async fn seed(store: &InMemoryLedgerStore, r#type: TransactionType, amount: u64) -> Transaction {
        if store.wallet(&alice()).await.unwrap().is_none() {
            store.create_wallet(Wallet::new(alice())).await.unwrap();
        }
        let tx = Transaction::pending(
            alice(),
            r#type,
            Amount::new(amount).unwrap(),
            ReferenceId::new(format!("ref-{}", TransactionId::generate())).unwrap(),
            Utc::now(),
        );
        let mut uow = store.begin().await.unwrap();
        uow.insert_transaction(tx.clone()).await.unwrap();
        uow.commit().await.unwrap();
        tx
    }

    #[tokio::test]
    async fn test_apply_settles_once() {
        let store = InMemoryLedgerStore::new();
        let tx = seed(&store, TransactionType::Deposit, 50_000).await;
        let applier = SettlementApplier::new(Arc::new(store.clone()));

        let first = applier.apply(tx.id, &alice(), 50_000).await.unwrap();
        assert_eq!(first, Settlement::Applied { balance: 50_000 });

        let second = applier.apply(tx.id, &alice(), 50_000).await.unwrap();
        assert_eq!(second, Settlement::AlreadySettled);

        assert_eq!(store.wallet(&alice()).await.unwrap().unwrap().balance, 50_000);
        assert!(store.transaction(tx.id).await.unwrap().unwrap().is_settled());
    }

    #[tokio::test]
    async fn test_overdraft_leaves_everything_untouched() {
        let store = InMemoryLedgerStore::new();
        let tx = seed(&store, TransactionType::Withdrawal, 10).await;
        let applier = SettlementApplier::new(Arc::new(store.clone()));

        let err = applier.apply(tx.id, &alice(), -10).await.unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { .. }));
        assert_eq!(store.wallet(&alice()).await.unwrap().unwrap().balance, 0);
        assert!(!store.transaction(tx.id).await.unwrap().unwrap().is_settled());
    }

    #[tokio::test]
    async fn test_unknown_or_mismatched_transaction() {
        let store = InMemoryLedgerStore::new();
        let tx = seed(&store, TransactionType::Deposit, 10).await;
        let applier = SettlementApplier::new(Arc::new(store.clone()));

        assert!(matches!(
            applier.apply(TransactionId::generate(), &alice(), 10).await,
            Err(LedgerError::TransactionNotFound(_))
        ));
        assert!(matches!(
            applier.apply(tx.id, &alice(), 11).await,
            Err(LedgerError::SettlementMismatch { .. })
        ));
        assert_eq!(store.wallet(&alice()).await.unwrap().unwrap().balance, 0);
    }

    #[tokio::test]
    async fn test_mismatch_is_reported_even_once_settled() {
        let store = InMemoryLedgerStore::new();
        let tx = seed(&store, TransactionType::Deposit, 10).await;
        let applier = SettlementApplier::new(Arc::new(store.clone()));
        applier.apply(tx.id, &alice(), 10).await.unwrap();

        let err = applier.apply(tx.id, &alice(), 999_999).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Malformed);
        assert_eq!(store.wallet(&alice()).await.unwrap().unwrap().balance, 10);
    }
}
