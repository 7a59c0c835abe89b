// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry with exponential backoff for store connections.
//!
//! Only connection setup is retried. Individual CRUD calls are never retried
//! behind the caller's back: a failed write surfaces as a typed error so that
//! "success implies durable" stays true.
//!
//! # Example
//!
//! ```
//! use list_sync::RetryConfig;
//!
//! let connect = RetryConfig::connect();
//! assert_eq!(connect.max_retries, 5);
//!
//! let probe = RetryConfig::probe();
//! assert_eq!(probe.max_retries, 2);
//! ```

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Backoff settings. `max_retries` counts total attempts.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    pub max_retries: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::connect()
    }
}

impl RetryConfig {
    /// Opening a store at application start: 5 attempts, ~3s worst case,
    /// so a bad URL fails fast instead of hanging the launch.
    #[must_use]
    pub fn connect() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
        }
    }

    /// Health probes: one quick retry then report.
    #[must_use]
    pub fn probe() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(200),
            factor: 2.0,
        }
    }

    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            factor: 2.0,
        }
    }

    /// Delay before attempt `n + 1` (n starting at 1).
    #[must_use]
    pub fn delay_after(&self, attempt: usize) -> Duration {
        let mut delay = self.initial_delay;
        for _ in 1..attempt {
            delay = delay.mul_f64(self.factor).min(self.max_delay);
        }
        delay
    }
}

/// Run `operation` until it succeeds or `config.max_retries` attempts fail.
pub async fn retry<F, Fut, T, E>(
    operation_name: &str,
    config: &RetryConfig,
    operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_if(operation_name, config, operation, |_| true).await
}

/// Like [`retry`], but gives up immediately on errors `should_retry` rejects.
pub async fn retry_if<F, Fut, T, E, P>(
    operation_name: &str,
    config: &RetryConfig,
    mut operation: F,
    should_retry: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempts = 0;

    loop {
        match operation().await {
            Ok(val) => {
                if attempts > 0 {
                    info!(operation = operation_name, retries = attempts, "Operation succeeded after retry");
                }
                return Ok(val);
            }
            Err(err) => {
                attempts += 1;
                if attempts >= config.max_retries || !should_retry(&err) {
                    return Err(err);
                }

                let delay = config.delay_after(attempts);
                warn!(
                    operation = operation_name,
                    attempt = attempts,
                    max = config.max_retries,
                    error = %err,
                    "Operation failed, retrying in {:?}",
                    delay
                );
                sleep(delay).await;
            }
        }
    }
}
