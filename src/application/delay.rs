//! Pre-processing delay applied by consumer workers before settling a delivery.

use crate::error::LedgerError;
use async_trait::async_trait;
use rand::Rng;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

pub type DelayStrategyRef = Arc<dyn DelayStrategy>;

#[async_trait]
pub trait DelayStrategy: Send + Sync {
    /// The delay to wait before the next delivery is processed.
    fn next_delay(&self) -> Duration;

    async fn wait(&self) {
        let delay = self.next_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoDelay;

impl DelayStrategy for NoDelay {
    fn next_delay(&self) -> Duration {
        Duration::ZERO
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedDelay(pub Duration);

impl DelayStrategy for FixedDelay {
    fn next_delay(&self) -> Duration {
        self.0
    }
}

/// Uniformly random delay in `[min, max]`.
#[derive(Debug, Clone, Copy)]
pub struct JitterDelay {
    min: Duration,
    max: Duration,
}

impl JitterDelay {
    pub fn new(min: Duration, max: Duration) -> Result<Self, LedgerError> {
        if min > max {
            return Err(LedgerError::ValidationError(format!(
                "jitter minimum {min:?} exceeds maximum {max:?}"
            )));
        }
        Ok(Self { min, max })
    }
}

impl DelayStrategy for JitterDelay {
    fn next_delay(&self) -> Duration {
        let millis = rand::thread_rng()
            .gen_range(self.min.as_millis() as u64..=self.max.as_millis() as u64);
        Duration::from_millis(millis)
    }
}

/// Parsed form of a delay setting: `none`, `fixed:MS` or `jitter:MIN-MAX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DelayConfig {
    #[default]
    None,
    Fixed(Duration),
    Jitter { min: Duration, max: Duration },
}

impl DelayConfig {
    pub fn build(&self) -> Result<DelayStrategyRef, LedgerError> {
        Ok(match *self {
            DelayConfig::None => Arc::new(NoDelay),
            DelayConfig::Fixed(d) => Arc::new(FixedDelay(d)),
            DelayConfig::Jitter { min, max } => Arc::new(JitterDelay::new(min, max)?),
        })
    }
}

fn parse_millis(s: &str) -> Result<Duration, LedgerError> {
    s.trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|e| LedgerError::ValidationError(format!("invalid milliseconds {s:?}: {e}")))
}

impl FromStr for DelayConfig {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("none") {
            return Ok(DelayConfig::None);
        }
        match s.split_once(':') {
            Some(("fixed", ms)) => Ok(DelayConfig::Fixed(parse_millis(ms)?)),
            Some(("jitter", range)) => {
                let (min, max) = range.split_once('-').ok_or_else(|| {
                    LedgerError::ValidationError(format!("jitter range must be MIN-MAX, got {range:?}"))
                })?;
                let (min, max) = (parse_millis(min)?, parse_millis(max)?);
                JitterDelay::new(min, max)?;
                Ok(DelayConfig::Jitter { min, max })
            }
            _ => Err(LedgerError::ValidationError(format!(
                "unknown delay {s:?}, expected none, fixed:MS or jitter:MIN-MAX"
            ))),
        }
    }
}

impl fmt::Display for DelayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DelayConfig::None => write!(f, "none"),
            DelayConfig::Fixed(d) => write!(f, "fixed:{}", d.as_millis()),
            DelayConfig::Jitter { min, max } => {
                write!(f, "jitter:{}-{}", min.as_millis(), max.as_millis())
            }
        }
    }
}
