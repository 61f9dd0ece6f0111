mod common;

use common::{Harness, deposit, withdrawal};
use wallet_ledger::application::consumer::Outcome;
use wallet_ledger::domain::message::SettlementMessage;
use wallet_ledger::domain::ports::{LedgerStore, MessageChannel};
use wallet_ledger::domain::transaction::TransactionStatus;
use wallet_ledger::error::LedgerError;

#[tokio::test]
async fn test_deposit_is_pending_until_settled() {
    let h = Harness::new();
    let alice = h.enabled_wallet("alice").await;

    let tx = h.guard.submit(deposit(&alice, 50_000, "r1")).await.unwrap();
    assert_eq!(tx.status, TransactionStatus::Pending);
    assert_eq!(h.balance(&alice).await, 0);
    assert_eq!(h.incoming(), 1);

    let outcome = h.settle_next(&h.consumer()).await;
    assert_eq!(outcome, Outcome::Settled { balance: 50_000 });

    let stored = h.store.transaction(tx.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TransactionStatus::Success);
    assert!(stored.settled_at.is_some());
    assert_eq!(h.balance(&alice).await, 50_000);
}

#[tokio::test]
async fn test_overdraft_withdrawal_is_refused_at_submission() {
    let h = Harness::new();
    let alice = h.funded_wallet("alice", 50_000).await;

    let err = h
        .guard
        .submit(withdrawal(&alice, 60_000, "w1"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        LedgerError::InsufficientBalance {
            balance: 50_000,
            requested: 60_000,
            ..
        }
    ));
    assert_eq!(h.incoming(), 0);
    assert_eq!(h.balance(&alice).await, 50_000);
    assert_eq!(h.store.inner().transactions().await.len(), 1);
}

#[tokio::test]
async fn test_redelivered_settled_message_is_acknowledged_without_effect() {
    let h = Harness::new();
    let alice = h.enabled_wallet("alice").await;
    let tx = h.guard.submit(deposit(&alice, 700, "r1")).await.unwrap();
    let consumer = h.consumer();
    assert_eq!(h.settle_next(&consumer).await, Outcome::Settled { balance: 700 });

    // The broker hands the same body out again, e.g. after a lost ack.
    let body = SettlementMessage::for_transaction(&tx).encode().unwrap();
    h.connection.publish(body).await.unwrap();

    assert_eq!(h.settle_next(&consumer).await, Outcome::AlreadySettled);
    assert_eq!(h.balance(&alice).await, 700);
    assert_eq!(h.incoming(), 0);
    assert_eq!(h.broker.unacked_count().unwrap(), 0);
}

#[tokio::test]
async fn test_lost_ack_after_commit_settles_once() {
    let h = Harness::new();
    let alice = h.enabled_wallet("alice").await;
    h.guard.submit(deposit(&alice, 300, "r1")).await.unwrap();
    let consumer = h.consumer();

    // Settle, but the connection drops before the ack reaches the broker.
    let delivery = h.connection.next_delivery().await.unwrap();
    h.broker.drop_connections().unwrap();
    assert!(consumer.handle(delivery).await.is_err());
    assert_eq!(h.balance(&alice).await, 300);

    let again = h.connection.next_delivery().await.unwrap();
    assert!(again.redelivered);
    assert_eq!(consumer.handle(again).await.unwrap(), Outcome::AlreadySettled);
    assert_eq!(h.balance(&alice).await, 300);
}

#[tokio::test]
async fn test_duplicate_reference_leaves_no_second_row_or_message() {
    let h = Harness::new();
    let alice = h.enabled_wallet("alice").await;

    h.guard.submit(deposit(&alice, 10, "dup")).await.unwrap();
    let err = h.guard.submit(deposit(&alice, 99, "dup")).await.unwrap_err();

    assert!(matches!(err, LedgerError::ReferenceExists(_)));
    assert_eq!(h.incoming(), 1);
    assert_eq!(h.store.inner().transactions().await.len(), 1);
}

#[tokio::test]
async fn test_withdrawal_overtaken_by_another_fails_at_settlement() {
    let h = Harness::new();
    let alice = h.funded_wallet("alice", 1_000).await;

    // Both pass the submission check against the same settled balance.
    h.guard.submit(withdrawal(&alice, 600, "w1")).await.unwrap();
    h.guard.submit(withdrawal(&alice, 600, "w2")).await.unwrap();

    let consumer = h.consumer();
    assert_eq!(h.settle_next(&consumer).await, Outcome::Settled { balance: 400 });
    assert_eq!(h.settle_next(&consumer).await, Outcome::Requeued(1));
    assert_eq!(h.balance(&alice).await, 400);
}
