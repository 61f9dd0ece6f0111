use crate::application::delay::DelayConfig;
use std::time::Duration;

pub const DEFAULT_MAX_FAIL_COUNTER: u32 = 3;
pub const DEFAULT_FAIL_COUNTER_TTL: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_WORKERS: usize = 4;

/// Names of the exchange and queues carrying settlement messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueTopology {
    pub exchange: String,
    pub incoming_queue: String,
    pub dead_letter_queue: String,
    pub delayed_queue: String,
}

impl Default for QueueTopology {
    fn default() -> Self {
        Self {
            exchange: "update_balance.exchange".to_string(),
            incoming_queue: "update_balance.incoming.queue".to_string(),
            dead_letter_queue: "update_balance.deadletter.queue".to_string(),
            delayed_queue: "update_balance.delayed.queue".to_string(),
        }
    }
}

/// How a failed delivery is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryMode {
    /// Negative-acknowledge with requeue; the broker redelivers right away.
    #[default]
    Requeue,
    /// Republish to the delayed queue and acknowledge the original.
    Delayed(Duration),
}

/// Tuning of the settlement consumer.
#[derive(Debug, Clone)]
pub struct SettlementConfig {
    pub workers: usize,
    pub max_fail_counter: u32,
    pub fail_counter_ttl: Duration,
    pub delay: DelayConfig,
    pub retry_mode: RetryMode,
    pub topology: QueueTopology,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            max_fail_counter: DEFAULT_MAX_FAIL_COUNTER,
            fail_counter_ttl: DEFAULT_FAIL_COUNTER_TTL,
            delay: DelayConfig::None,
            retry_mode: RetryMode::Requeue,
            topology: QueueTopology::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_wire_contract() {
        let config = SettlementConfig::default();
        assert_eq!(config.max_fail_counter, 3);
        assert_eq!(config.fail_counter_ttl, Duration::from_secs(600));
        assert_eq!(config.retry_mode, RetryMode::Requeue);
        assert_eq!(config.topology.exchange, "update_balance.exchange");
        assert_eq!(
            config.topology.dead_letter_queue,
            "update_balance.deadletter.queue"
        );
    }
}
