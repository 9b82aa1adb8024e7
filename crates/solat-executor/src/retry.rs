//! Deadlines and retry for broker calls.
//!
//! Every broker call goes through [`with_timeout`]. Only reads go through
//! [`retry_read`]; submits get exactly one attempt.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use solat_telemetry::Metrics;

use crate::error::{BrokerError, BrokerResult};

/// Exponential backoff: `base * 2^(attempt-1)`, capped at `max_delay_ms`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
            max_delay_ms: 2_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt that follows attempt number `attempt` (1-based).
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(10);
        let delay = self.base_delay_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }

    /// At least one attempt, whatever the config says.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Run one broker call under a deadline.
pub async fn with_timeout<T, F>(op: &'static str, limit: Duration, fut: F) -> BrokerResult<T>
where
    F: Future<Output = BrokerResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            Metrics::broker_timeout(op);
            warn!(op, timeout_ms = limit.as_millis() as u64, "Broker call timed out");
            Err(BrokerError::Timeout {
                op,
                after_ms: limit.as_millis() as u64,
            })
        }
    }
}

/// Run an idempotent read with per-attempt deadline and backoff between
/// retryable failures.
pub async fn retry_read<T, F, Fut>(
    op: &'static str,
    policy: &RetryPolicy,
    limit: Duration,
    mut call: F,
) -> BrokerResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = BrokerResult<T>>,
{
    let attempts = policy.attempts();
    let mut attempt = 1;
    loop {
        match with_timeout(op, limit, call()).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < attempts => {
                let delay = policy.backoff_delay(attempt);
                debug!(op, attempt, delay_ms = delay.as_millis() as u64, error = %e, "Retrying broker read");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay_ms: 500,
            max_delay_ms: 1_500,
        };
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(500));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(1_000));
        assert_eq!(policy.backoff_delay(3), Duration::from_millis(1_500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_maps_to_broker_error() {
        let result: BrokerResult<()> = with_timeout("submit", Duration::from_millis(50), async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(BrokerError::Timeout { op: "submit", after_ms: 50 })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_read_recovers_from_transient_failure() {
        let calls = AtomicU32::new(0);
        let result = retry_read("account", &RetryPolicy::default(), Duration::from_secs(1), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(BrokerError::Unavailable("connection reset".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_read_stops_on_api_error() {
        let calls = AtomicU32::new(0);
        let result: BrokerResult<()> =
            retry_read("positions", &RetryPolicy::default(), Duration::from_secs(1), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(BrokerError::Api("forbidden".into())) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
