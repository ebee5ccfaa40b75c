//! Opt-in retry for callers of branch operations.
//!
//! The store never retries on its own: a merge changes which branch holds the
//! records, so blindly re-running one is not always what the caller wants.
//! Callers that know their operation is safe to repeat can wrap it here.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::Deserialize;
use tracing::warn;

use crate::error::StoreError;

/// How often and how patiently to retry serialization failures.
#[derive(Debug, Deserialize, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt. Default: 3.
    #[serde(default = "default_max_retries")]
    pub max_retries: u8,
    /// Delay before the first retry in milliseconds. Default: 50.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound for any single delay in milliseconds. Default: 2000.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_retries() -> u8 {
    3
}
fn default_base_delay_ms() -> u64 {
    50
}
fn default_max_delay_ms() -> u64 {
    2000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryPolicy {
    /// A policy that runs the operation exactly once.
    pub fn never() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (1-based): the base delay doubled
    /// per earlier retry, plus up to a quarter of that as jitter, capped at
    /// `max_delay_ms`. Attempt 0 has no delay.
    pub fn backoff(&self, attempt: u8) -> Duration {
        let Some(doublings) = attempt.checked_sub(1) else {
            return Duration::ZERO;
        };

        let delay_ms = self
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(u32::from(doublings)));
        let jitter_ms = match delay_ms / 4 {
            0 => 0,
            spread => rand::rng().random_range(0..=spread),
        };

        Duration::from_millis(delay_ms.saturating_add(jitter_ms).min(self.max_delay_ms))
    }
}

/// Run `op`, re-running it after a backoff whenever it fails with a
/// serialization failure, up to `policy.max_retries` times. Any other error is
/// returned immediately.
pub async fn retry_on_serialization_failure<T, F, Fut>(
    policy: &RetryPolicy,
    mut op: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempt = 0u8;
    loop {
        match op().await {
            Err(e) if e.is_serialization_failure() && attempt < policy.max_retries => {
                attempt += 1;
                let delay = policy.backoff(attempt);
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Serialization failure, retrying branch operation"
                );
                tokio::time::sleep(delay).await;
            }
            result => return result,
        }
    }
}
