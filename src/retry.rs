//! Bounded retry with linearly increasing backoff.
//!
//! Only errors that wrap a transient [`ProviderError`](crate::error::ProviderError)
//! are retried. Attempt `n` that fails waits `n × backoff` before attempt
//! `n + 1`; with the defaults (3 attempts, 1s) that is 1s then 2s.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use tracing::warn;

use crate::config::RetryConfig;
use crate::error::{is_transient, DedupError};

/// How often and how patiently a provider call is retried.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Base delay, multiplied by the attempt number.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: Duration::from_millis(config.backoff_ms),
        }
    }

    /// A policy that never sleeps. Used by tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff: Duration::ZERO,
        }
    }

    /// Delay after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff * attempt
    }
}

/// Run `op` until it succeeds, fails permanently, or the attempts run out.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if !is_transient(&err) => return Err(err),
            Err(err) if attempt >= policy.max_attempts => {
                return Err(DedupError::RetriesExhausted {
                    operation: operation.to_string(),
                    attempts: attempt,
                    last: err.to_string(),
                }
                .into());
            }
            Err(err) => {
                let delay = policy.delay_for(attempt);
                warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient provider failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient() -> anyhow::Error {
        ProviderError::Transient {
            provider: "test",
            message: "503".into(),
        }
        .into()
    }

    #[test]
    fn backoff_grows_linearly() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn transient_failure_then_success() {
        let calls = AtomicU32::new(0);
        let out = with_retry(&RetryPolicy::immediate(3), "chat", || async {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(transient())
            } else {
                Ok(42)
            }
        })
        .await
        .unwrap();
        assert_eq!(out, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let calls = AtomicU32::new(0);
        let res: Result<()> = with_retry(&RetryPolicy::immediate(3), "chat", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::permanent("test", "400").into())
        })
        .await;
        assert!(res.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhaustion_reports_attempts() {
        let calls = AtomicU32::new(0);
        let res: Result<()> = with_retry(&RetryPolicy::immediate(3), "chat", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(transient())
        })
        .await;
        let err = res.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match err.downcast_ref::<DedupError>() {
            Some(DedupError::RetriesExhausted { attempts, .. }) => assert_eq!(*attempts, 3),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
