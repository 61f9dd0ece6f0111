//! Bounded retry of failed deliveries, counted per correlation id in a TTL cache.

use crate::config::RetryMode;
use crate::domain::ports::TtlCacheRef;
use crate::domain::transaction::TransactionId;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

pub const FAIL_COUNTER_PREFIX: &str = "amqpFail";

/// Cache value stored under [`fail_counter_key`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailCounter {
    pub counter: u32,
}

pub fn fail_counter_key(correlation_id: TransactionId) -> String {
    format!("{FAIL_COUNTER_PREFIX}{correlation_id}")
}

/// What to do with a delivery whose processing failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Requeue for immediate redelivery; the counter is now `n`.
    Requeue(u32),
    /// Republish to the delayed queue with the given delay; the counter is now `n`.
    Defer(u32, Duration),
    /// Give up: the counter had reached the maximum at `n`.
    Reject(u32),
}

pub struct RetryPolicy {
    cache: TtlCacheRef,
    max_fail_counter: u32,
    ttl: Duration,
    mode: RetryMode,
}

impl RetryPolicy {
    pub fn new(cache: TtlCacheRef, max_fail_counter: u32, ttl: Duration, mode: RetryMode) -> Self {
        Self {
            cache,
            max_fail_counter,
            ttl,
            mode,
        }
    }

    /// Current failure count; a missing, expired or unreadable entry counts as none.
    pub async fn current(&self, correlation_id: TransactionId) -> Option<u32> {
        let key = fail_counter_key(correlation_id);
        match self.cache.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str::<FailCounter>(&raw) {
                Ok(c) => Some(c.counter),
                Err(e) => {
                    warn!(correlation_id = %correlation_id, error = %e, "unreadable fail counter");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(correlation_id = %correlation_id, error = %e, "fail counter lookup failed");
                None
            }
        }
    }

    /// Records one more failure for `correlation_id` and decides its fate.
    pub async fn on_failure(&self, correlation_id: TransactionId) -> RetryDecision {
        let next = match self.current(correlation_id).await {
            None => 1,
            Some(n) if n < self.max_fail_counter => n + 1,
            Some(n) => return RetryDecision::Reject(n),
        };

        let key = fail_counter_key(correlation_id);
        let value = FailCounter { counter: next };
        match serde_json::to_string(&value) {
            Ok(raw) => {
                if let Err(e) = self.cache.set_ex(&key, raw, self.ttl).await {
                    warn!(correlation_id = %correlation_id, error = %e, "fail counter update failed");
                }
            }
            Err(e) => warn!(correlation_id = %correlation_id, error = %e, "fail counter encoding failed"),
        }

        match self.mode {
            RetryMode::Requeue => RetryDecision::Requeue(next),
            RetryMode::Delayed(delay) => RetryDecision::Defer(next, delay),
        }
    }
}
