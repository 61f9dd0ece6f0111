//! Settlement consumer: a fixed pool of workers draining the incoming queue.
//!
//! Every delivery ends in exactly one broker acknowledgement decision:
//!
//! * settled or already settled: ack
//! * malformed body, or a body contradicting its stored transaction: reject
//!   without requeue (dead-lettered), fail counter untouched
//! * failure below the retry bound: nack with requeue, or republish to the
//!   delayed queue and ack when delayed retries are configured
//! * failure at the retry bound: reject without requeue
//!
//! If that final broker call fails (the connection dropped mid-flight) the
//! broker still holds the delivery unacknowledged and redelivers it.

use crate::application::applier::{Settlement, SettlementApplier};
use crate::application::delay::DelayStrategyRef;
use crate::application::retry::{RetryDecision, RetryPolicy};
use crate::config::SettlementConfig;
use crate::domain::message::SettlementMessage;
use crate::domain::ports::{Delivery, LedgerStoreRef, MessageChannelRef, TtlCacheRef};
use crate::error::{ErrorKind, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

const CONSUME_RETRY_BACKOFF: Duration = Duration::from_millis(200);

/// What happened to one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Settled { balance: i64 },
    AlreadySettled,
    /// Requeued for redelivery after failure number `n`.
    Requeued(u32),
    /// Republished to the delayed queue after failure number `n`.
    Deferred(u32),
    Rejected,
}

pub struct SettlementConsumer {
    channel: MessageChannelRef,
    applier: SettlementApplier,
    retry: RetryPolicy,
    delay: DelayStrategyRef,
    workers: usize,
    outcomes: Option<mpsc::UnboundedSender<Outcome>>,
}

impl SettlementConsumer {
    pub fn new(
        channel: MessageChannelRef,
        store: LedgerStoreRef,
        cache: TtlCacheRef,
        config: &SettlementConfig,
    ) -> Result<Self> {
        Ok(Self {
            channel,
            applier: SettlementApplier::new(store),
            retry: RetryPolicy::new(
                cache,
                config.max_fail_counter,
                config.fail_counter_ttl,
                config.retry_mode,
            ),
            delay: config.delay.build()?,
            workers: config.workers.max(1),
            outcomes: None,
        })
    }

    /// Replaces the configured delay source.
    pub fn with_delay(mut self, delay: DelayStrategyRef) -> Self {
        self.delay = delay;
        self
    }

    /// Reports every outcome produced by the worker pool on `tx`.
    pub fn with_outcomes(mut self, tx: mpsc::UnboundedSender<Outcome>) -> Self {
        self.outcomes = Some(tx);
        self
    }

    /// Processes one delivery to completion.
    ///
    /// Only a failing acknowledgement call surfaces as an error.
    pub async fn handle(&self, delivery: Delivery) -> Result<Outcome> {
        let message = match SettlementMessage::decode(&delivery.body) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, body = ?delivery, "rejected malformed message");
                delivery.reject(false).await?;
                return Ok(Outcome::Rejected);
            }
        };
        let correlation_id = message.correlation_id;

        self.delay.wait().await;

        let result = self
            .applier
            .apply(
                message.transaction_id,
                &message.owned_by,
                message.signed_amount(),
            )
            .await;

        match result {
            Ok(Settlement::Applied { balance }) => {
                delivery.ack().await?;
                info!(
                    correlation_id = %correlation_id,
                    owner = %message.owned_by,
                    balance,
                    "success"
                );
                Ok(Outcome::Settled { balance })
            }
            Ok(Settlement::AlreadySettled) => {
                delivery.ack().await?;
                info!(
                    correlation_id = %correlation_id,
                    redelivered = delivery.redelivered,
                    "already settled"
                );
                Ok(Outcome::AlreadySettled)
            }
            Err(e) if e.kind() == ErrorKind::Malformed => {
                delivery.reject(false).await?;
                warn!(correlation_id = %correlation_id, error = %e, "rejected mismatched message");
                Ok(Outcome::Rejected)
            }
            Err(e) => {
                let decision = self.retry.on_failure(correlation_id).await;
                self.settle_failure(&delivery, &message, decision, &e.to_string())
                    .await
            }
        }
    }

    async fn settle_failure(
        &self,
        delivery: &Delivery,
        message: &SettlementMessage,
        decision: RetryDecision,
        cause: &str,
    ) -> Result<Outcome> {
        let correlation_id = message.correlation_id;
        match decision {
            RetryDecision::Requeue(attempt) => {
                delivery.nack(true).await?;
                warn!(correlation_id = %correlation_id, attempt, error = cause, "failed");
                Ok(Outcome::Requeued(attempt))
            }
            RetryDecision::Defer(attempt, delay) => {
                match self
                    .channel
                    .publish_delayed(delivery.body.clone(), delay)
                    .await
                {
                    Ok(()) => {
                        delivery.ack().await?;
                        warn!(
                            correlation_id = %correlation_id,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = cause,
                            "failed, deferred"
                        );
                        Ok(Outcome::Deferred(attempt))
                    }
                    Err(publish_error) => {
                        delivery.nack(true).await?;
                        warn!(
                            correlation_id = %correlation_id,
                            attempt,
                            error = cause,
                            publish_error = %publish_error,
                            "failed, delayed republish unavailable"
                        );
                        Ok(Outcome::Requeued(attempt))
                    }
                }
            }
            RetryDecision::Reject(attempt) => {
                delivery.reject(false).await?;
                error!(
                    correlation_id = %correlation_id,
                    owner = %message.owned_by,
                    attempt,
                    error = cause,
                    "rejected"
                );
                Ok(Outcome::Rejected)
            }
        }
    }

    /// Runs the worker pool until `cancel` fires.
    ///
    /// A worker finishes the delivery it holds before stopping.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut workers = JoinSet::new();
        for id in 0..self.workers {
            let consumer = self.clone();
            let cancel = cancel.clone();
            workers.spawn(
                async move { consumer.work(cancel).await }.instrument(info_span!("worker", worker = id)),
            );
        }
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "settlement worker crashed");
            }
        }
        debug!("settlement consumer stopped");
    }

    async fn work(&self, cancel: CancellationToken) {
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = self.channel.next_delivery() => next,
            };

            match next {
                Ok(delivery) => match self.handle(delivery).await {
                    Ok(outcome) => {
                        if let Some(tx) = &self.outcomes {
                            let _ = tx.send(outcome);
                        }
                    }
                    Err(e) => warn!(error = %e, "acknowledgement lost, broker will redeliver"),
                },
                Err(e) => {
                    warn!(error = %e, "consume failed");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(CONSUME_RETRY_BACKOFF) => {}
                    }
                }
            }
        }
    }
}
