use crate::domain::message::SettlementMessage;
use crate::domain::ports::{LedgerStoreRef, MessageChannelRef, UnitOfWork};
use crate::domain::transaction::{Amount, ReferenceId, Transaction, TransactionType};
use crate::domain::wallet::OwnerId;
use crate::error::{LedgerError, Result};
use chrono::Utc;
use tracing::{info, warn};

/// A deposit or withdrawal as requested by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionRequest {
    pub owned_by: OwnerId,
    pub r#type: TransactionType,
    pub amount: Amount,
    pub reference_id: ReferenceId,
}

/// Request-time checks and enqueueing of settlement messages.
///
/// An accepted submission leaves exactly one pending transaction and one
/// published message; a refused one leaves neither.
#[derive(Clone)]
pub struct SubmissionGuard {
    store: LedgerStoreRef,
    channel: MessageChannelRef,
}

impl SubmissionGuard {
    pub fn new(store: LedgerStoreRef, channel: MessageChannelRef) -> Self {
        Self { store, channel }
    }

    pub async fn submit(&self, request: SubmissionRequest) -> Result<Transaction> {
        let tx = Transaction::pending(
            request.owned_by.clone(),
            request.r#type,
            request.amount,
            request.reference_id.clone(),
            Utc::now(),
        );
        let body = SettlementMessage::for_transaction(&tx).encode()?;

        // The store lock is held from here until commit or rollback.
        let mut uow = self.store.begin().await?;
        match self.stage(uow.as_mut(), &request, &tx, body).await {
            Ok(()) => {
                uow.commit().await?;
                info!(
                    correlation_id = %tx.id,
                    owner = %tx.owned_by,
                    reference = %tx.reference_id,
                    kind = %tx.r#type,
                    amount = tx.amount.value(),
                    "submission accepted"
                );
                Ok(tx)
            }
            Err(e) => {
                uow.rollback().await?;
                warn!(
                    owner = %request.owned_by,
                    reference = %request.reference_id,
                    error = %e,
                    "submission refused"
                );
                Err(e)
            }
        }
    }

    async fn stage(
        &self,
        uow: &mut dyn UnitOfWork,
        request: &SubmissionRequest,
        tx: &Transaction,
        body: Vec<u8>,
    ) -> Result<()> {
        let wallet = uow
            .wallet(&request.owned_by)
            .await?
            .ok_or_else(|| LedgerError::WalletNotFound(request.owned_by.clone()))?;
        wallet.ensure_enabled()?;

        if uow.reference_exists(&request.reference_id).await? {
            return Err(LedgerError::ReferenceExists(request.reference_id.clone()));
        }

        let requested = request.r#type.signed(request.amount).abs();
        if request.r#type == TransactionType::Withdrawal && requested >= wallet.balance {
            return Err(LedgerError::InsufficientBalance {
                owner: request.owned_by.clone(),
                balance: wallet.balance,
                requested,
            });
        }

        uow.insert_transaction(tx.clone()).await?;
        self.channel.publish(body).await
    }
}
