//! Retry, circuit-breaker and latency instrumentation for outbound calls.
//!
//! Every gateway surface gets a named [`Policy`]. A policy call re-checks the
//! breaker per attempt, retries transient failures with jittered exponential
//! backoff, caps concurrent in-flight calls, and records latency and retry
//! metrics under the policy name.

mod breaker;
pub mod metrics;
mod retry;

use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::Semaphore;

pub use breaker::CircuitBreaker;
pub use retry::RetryPolicy;

/// Classifies errors into transient (retryable) and terminal.
pub trait Transience {
    fn is_transient(&self) -> bool;
}

#[derive(Debug, Error)]
pub enum PolicyError<E> {
    /// The breaker rejected the call without touching the downstream
    /// service. Not retried here; callers surface it as a gateway error.
    #[error("circuit open for policy {0}")]
    CircuitOpen(String),
    #[error(transparent)]
    Inner(E),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub retry_attempts: u32,
    pub backoff_initial_ms: u64,
    pub backoff_multiplier: f64,
    pub failure_rate_threshold: f64,
    pub sliding_window_size: usize,
    pub wait_duration_in_open_state_secs: u64,
    pub max_concurrent_calls: usize,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 3,
            backoff_initial_ms: 200,
            backoff_multiplier: 2.0,
            failure_rate_threshold: 0.5,
            sliding_window_size: 20,
            wait_duration_in_open_state_secs: 30,
            max_concurrent_calls: 32,
        }
    }
}

pub struct Policy {
    name: String,
    retry: RetryPolicy,
    breaker: CircuitBreaker,
    in_flight: Arc<Semaphore>,
}

impl Policy {
    pub fn new(name: impl Into<String>, config: &PolicyConfig) -> Self {
        let name = name.into();
        Self {
            retry: RetryPolicy {
                attempts: config.retry_attempts.max(1),
                initial_backoff: Duration::from_millis(config.backoff_initial_ms),
                multiplier: config.backoff_multiplier,
                jitter: 0.2,
            },
            breaker: CircuitBreaker::new(
                name.clone(),
                config.sliding_window_size,
                config.failure_rate_threshold,
                Duration::from_secs(config.wait_duration_in_open_state_secs),
            ),
            in_flight: Arc::new(Semaphore::new(config.max_concurrent_calls.max(1))),
            name,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `operation` under this policy. The closure is invoked once per
    /// attempt so the request is rebuilt fresh after a failure.
    pub async fn call<T, E, F, Fut>(&self, operation: F) -> Result<T, PolicyError<E>>
    where
        E: Transience + std::fmt::Display,
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            if !self.breaker.try_acquire() {
                metrics::CIRCUIT_REJECTIONS_TOTAL
                    .with_label_values(&[&self.name])
                    .inc();
                return Err(PolicyError::CircuitOpen(self.name.clone()));
            }

            // The permit only covers the call itself, not the backoff
            // sleep.
            let result = {
                let _permit = self
                    .in_flight
                    .clone()
                    .acquire_owned()
                    .await
                    .expect("semaphore never closed");

                let started = Instant::now();
                let result = operation().await;
                metrics::CALL_DURATION_SECONDS
                    .with_label_values(&[&self.name])
                    .observe(started.elapsed().as_secs_f64());
                result
            };

            match result {
                Ok(value) => {
                    self.breaker.record_success();
                    return Ok(value);
                }
                Err(error) => {
                    self.breaker.record_failure();
                    attempt += 1;
                    if !error.is_transient() || attempt >= self.retry.attempts {
                        return Err(PolicyError::Inner(error));
                    }
                    let delay = self.retry.delay(attempt - 1);
                    tracing::warn!(
                        policy = %self.name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Transient failure, retrying: {error}"
                    );
                    metrics::RETRIES_TOTAL.with_label_values(&[&self.name]).inc();
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::atomic::Ordering;

    #[derive(Debug, Error)]
    enum TestError {
        #[error("service unavailable")]
        Transient,
        #[error("bad request")]
        Terminal,
    }

    impl Transience for TestError {
        fn is_transient(&self) -> bool {
            matches!(self, TestError::Transient)
        }
    }

    fn fast_policy() -> Policy {
        Policy::new(
            "test-policy",
            &PolicyConfig {
                retry_attempts: 3,
                backoff_initial_ms: 1,
                ..PolicyConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn retries_transient_failures_until_success() {
        let policy = fast_policy();
        let calls = AtomicU32::new(0);

        let result: Result<&str, _> = policy
            .call(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(TestError::Transient)
                    } else {
                        Ok("pout_X")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "pout_X");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_terminal_failures() {
        let policy = fast_policy();
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = policy
            .call(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError::Terminal) }
            })
            .await;

        assert!(matches!(result, Err(PolicyError::Inner(TestError::Terminal))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_configured_attempts() {
        let policy = fast_policy();
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = policy
            .call(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError::Transient) }
            })
            .await;

        assert!(matches!(result, Err(PolicyError::Inner(TestError::Transient))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn open_breaker_rejects_without_calling() {
        let policy = Policy::new(
            "breaker-policy",
            &PolicyConfig {
                retry_attempts: 1,
                sliding_window_size: 2,
                ..PolicyConfig::default()
            },
        );

        for _ in 0..2 {
            let _: Result<(), _> = policy.call(|| async { Err(TestError::Transient) }).await;
        }

        let calls = AtomicU32::new(0);
        let result: Result<(), _> = policy
            .call(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<(), TestError>(()) }
            })
            .await;

        assert!(matches!(result, Err(PolicyError::CircuitOpen(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
