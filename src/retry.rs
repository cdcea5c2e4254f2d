// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Retry Logic with Exponential Backoff
 * Transport-error retries with jitter; HTTP statuses are never retried
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::errors::{DetectorError, DetectorResult};

/// Retry configuration with exponential backoff
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt (0 = no retries)
    pub retry_attempts: u32,

    /// Initial backoff duration
    pub initial_backoff: Duration,

    /// Maximum backoff duration
    pub max_backoff: Duration,

    /// Backoff multiplier
    pub backoff_multiplier: f64,

    /// Jitter factor applied symmetrically (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 2,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }
}

impl RetryConfig {
    pub fn with_retry_attempts(mut self, retry_attempts: u32) -> Self {
        self.retry_attempts = retry_attempts;
        self
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter_factor = 0.0;
        self
    }

    /// Backoff before retry number `retry` (1-based)
    pub fn calculate_backoff(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::from_secs(0);
        }

        let base = self.initial_backoff.as_millis() as f64
            * self.backoff_multiplier.powi((retry - 1) as i32);
        let capped = base.min(self.max_backoff.as_millis() as f64);

        let with_jitter = if self.jitter_factor > 0.0 {
            let mut rng = rand::rng();
            let jitter_range = capped * self.jitter_factor;
            let jitter = rng.random_range(-jitter_range..jitter_range);
            (capped + jitter).max(0.0)
        } else {
            capped
        };

        Duration::from_millis(with_jitter as u64)
    }
}

/// Retry a replay operation on transport errors only. Validation errors,
/// timeouts and HTTP responses (which are data, not errors) pass through
/// on the first occurrence.
pub async fn retry_transport<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> DetectorResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = DetectorResult<T>>,
{
    let mut retry = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if retry > 0 {
                    debug!(
                        retry,
                        operation = operation_name,
                        "operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) => {
                if !err.is_retryable() || retry >= config.retry_attempts {
                    if retry > 0 {
                        warn!(
                            retries = retry,
                            operation = operation_name,
                            error = %err,
                            "giving up after retries"
                        );
                    }
                    return Err(err);
                }

                retry += 1;
                let backoff = config.calculate_backoff(retry);
                debug!(
                    retry,
                    backoff_ms = backoff.as_millis() as u64,
                    operation = operation_name,
                    error = %err,
                    "transport error, backing off before retry"
                );
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn network_error() -> DetectorError {
        DetectorError::Network {
            url: "http://target".to_string(),
            reason: "connection refused".to_string(),
        }
    }

    #[test]
    fn test_backoff_doubles_from_base() {
        let config = RetryConfig::default().without_jitter();
        assert_eq!(config.calculate_backoff(0), Duration::from_secs(0));
        assert_eq!(config.calculate_backoff(1), Duration::from_millis(250));
        assert_eq!(config.calculate_backoff(2), Duration::from_millis(500));
        assert_eq!(config.calculate_backoff(3), Duration::from_millis(1000));
    }

    #[test]
    fn test_backoff_caps_at_max() {
        let config = RetryConfig {
            max_backoff: Duration::from_millis(600),
            ..RetryConfig::default()
        }
        .without_jitter();
        assert_eq!(config.calculate_backoff(3), Duration::from_millis(600));
        assert_eq!(config.calculate_backoff(8), Duration::from_millis(600));
    }

    #[test]
    fn test_jitter_stays_within_band() {
        let config = RetryConfig::default();
        for _ in 0..50 {
            let backoff = config.calculate_backoff(1).as_millis() as f64;
            assert!((200.0..=300.0).contains(&backoff), "backoff {}", backoff);
        }
    }

    #[tokio::test]
    async fn test_recovers_after_transport_errors() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);
        let config = RetryConfig::default().without_jitter();

        let result = retry_transport(&config, "replay", || {
            let counter = Arc::clone(&counter_clone);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(network_error())
                } else {
                    Ok("ok")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausts_retry_budget() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);
        let config = RetryConfig::default()
            .with_retry_attempts(2)
            .without_jitter();

        let result: DetectorResult<()> = retry_transport(&config, "replay", || {
            let counter = Arc::clone(&counter_clone);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(network_error())
            }
        })
        .await;

        assert!(result.is_err());
        // 1 attempt + 2 retries
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_timeout_is_not_retried() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);
        let config = RetryConfig::default().without_jitter();

        let result: DetectorResult<()> = retry_transport(&config, "replay", || {
            let counter = Arc::clone(&counter_clone);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(DetectorError::Timeout {
                    duration: Duration::from_secs(30),
                })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
