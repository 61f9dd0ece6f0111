//! Settlement message wire schema.
//!
//! The JSON body published to the incoming queue:
//!
//! ```text
//! { "qid": "<transaction id>", "owned_by": "<owner>", "amount": 50000,
//!   "type": "deposit" | "withdrawal", "balance_id": "<transaction id>" }
//! ```
//!
//! Decoding is strict about the fields it needs and ignores anything else.
//! A body that cannot produce a complete [`SettlementMessage`] is a
//! [`MessageError`] and must never be processed partially.

use crate::domain::transaction::{Amount, Transaction, TransactionId, TransactionType};
use crate::domain::wallet::OwnerId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MessageError {
    #[error("invalid JSON body: {0}")]
    Json(#[from] serde_json::Error),
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("invalid field `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    qid: Option<String>,
    owned_by: Option<String>,
    amount: Option<i64>,
    #[serde(rename = "type")]
    kind: Option<String>,
    balance_id: Option<String>,
}

/// A decoded settlement request for one pending transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementMessage {
    pub correlation_id: TransactionId,
    pub owned_by: OwnerId,
    pub amount: Amount,
    pub r#type: TransactionType,
    pub transaction_id: TransactionId,
}

impl SettlementMessage {
    pub fn for_transaction(tx: &Transaction) -> Self {
        Self {
            correlation_id: tx.id,
            owned_by: tx.owned_by.clone(),
            amount: tx.amount,
            r#type: tx.r#type,
            transaction_id: tx.id,
        }
    }

    pub fn signed_amount(&self) -> i64 {
        self.r#type.signed(self.amount)
    }

    pub fn encode(&self) -> Result<Vec<u8>, MessageError> {
        let wire = WireMessage {
            qid: Some(self.correlation_id.to_string()),
            owned_by: Some(self.owned_by.to_string()),
            amount: Some(self.amount.value() as i64),
            kind: Some(self.r#type.to_string()),
            balance_id: Some(self.transaction_id.to_string()),
        };
        Ok(serde_json::to_vec(&wire)?)
    }

    pub fn decode(body: &[u8]) -> Result<Self, MessageError> {
        let wire: WireMessage = serde_json::from_slice(body)?;

        let correlation_id = parse_id("qid", wire.qid)?;
        let transaction_id = parse_id("balance_id", wire.balance_id)?;

        let owned_by = wire
            .owned_by
            .ok_or(MessageError::MissingField("owned_by"))
            .and_then(|o| {
                OwnerId::new(o).map_err(|e| MessageError::InvalidField {
                    field: "owned_by",
                    reason: e.to_string(),
                })
            })?;

        let amount = wire.amount.ok_or(MessageError::MissingField("amount"))?;
        let amount = u64::try_from(amount)
            .ok()
            .and_then(|a| Amount::new(a).ok())
            .ok_or_else(|| MessageError::InvalidField {
                field: "amount",
                reason: format!("{amount} is not a positive amount"),
            })?;

        let r#type = match wire.kind.as_deref() {
            None => return Err(MessageError::MissingField("type")),
            Some("deposit") => TransactionType::Deposit,
            Some("withdrawal") => TransactionType::Withdrawal,
            Some(other) => {
                return Err(MessageError::InvalidField {
                    field: "type",
                    reason: format!("unknown transaction type '{other}'"),
                });
            }
        };

        Ok(Self {
            correlation_id,
            owned_by,
            amount,
            r#type,
            transaction_id,
        })
    }
}

fn parse_id(field: &'static str, value: Option<String>) -> Result<TransactionId, MessageError> {
    let value = value.ok_or(MessageError::MissingField(field))?;
    value
        .trim()
        .parse()
        .map_err(|e: uuid::Error| MessageError::InvalidField {
            field,
            reason: e.to_string(),
        })
}
