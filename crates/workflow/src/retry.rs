//! Bounded retry with exponential backoff around collaborator calls.
//!
//! Every attempt runs under a timeout. Transient failures (timeouts, rate
//! limits, network errors, 5xx) are retried after
//! `min(base_delay * multiplier^n, max_delay)`; permanent failures end the
//! call at once. Each attempt is published as a `CallAttempted` event.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ragflow_config::RetryConfig;
use ragflow_core::{CollaboratorError, DomainEvent, EventBus, WorkflowError};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Ceiling for a single attempt
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.base_delay(),
            multiplier: config.multiplier,
            max_delay: config.max_delay(),
            attempt_timeout: config.step_timeout(),
        }
    }

    /// Wait before retry number `retry` (0 = the wait after the first failure).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() {
            return self.max_delay;
        }
        Duration::try_from_secs_f64(secs).map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// A successful call and how many attempts it took.
#[derive(Debug, Clone)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: u32,
}

pub struct RetryingCaller {
    policy: RetryPolicy,
    events: Arc<EventBus>,
}

impl RetryingCaller {
    pub fn new(policy: RetryPolicy, events: Arc<EventBus>) -> Self {
        Self { policy, events }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op` until it succeeds, fails permanently, or exhausts attempts.
    ///
    /// `operation` names the call in logs and events.
    pub async fn call<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<Attempted<T>, WorkflowError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CollaboratorError>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;

            let result = match tokio::time::timeout(self.policy.attempt_timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(CollaboratorError::Timeout(format!(
                    "{operation} gave no response within {:?}",
                    self.policy.attempt_timeout
                ))),
            };

            let error = match result {
                Ok(value) => {
                    debug!(operation, attempt, "Call succeeded");
                    self.publish(operation, attempt, None, None);
                    return Ok(Attempted { value, attempts: attempt });
                }
                Err(e) => e,
            };

            if !error.is_transient() {
                warn!(operation, attempt, error = %error, "Permanent failure, not retrying");
                self.publish(operation, attempt, Some(&error), None);
                return Err(WorkflowError::Permanent(error));
            }

            if attempt >= self.policy.max_attempts {
                warn!(operation, attempts = attempt, error = %error, "Retries exhausted");
                self.publish(operation, attempt, Some(&error), None);
                return Err(WorkflowError::RetryExhausted { attempts: attempt, last: error });
            }

            let mut delay = self.policy.delay_for(attempt - 1);
            if let Some(hint) = error.retry_after() {
                delay = delay.max(hint.min(self.policy.max_delay));
            }

            warn!(
                operation,
                attempt,
                max_attempts = self.policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Transient failure, backing off"
            );
            self.publish(operation, attempt, Some(&error), Some(delay));
            tokio::time::sleep(delay).await;
        }
    }

    fn publish(&self, operation: &str, attempt: u32, error: Option<&CollaboratorError>, delay: Option<Duration>) {
        self.events.publish(DomainEvent::CallAttempted {
            operation: operation.to_string(),
            attempt,
            success: error.is_none(),
            error: error.map(|e| e.to_string()),
            delay_ms: delay.map(|d| d.as_millis() as u64),
            timestamp: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_secs(1),
            multiplier: 1.5,
            max_delay: Duration::from_secs(10),
            attempt_timeout: Duration::from_secs(30),
        }
    }

    fn caller(max_attempts: u32) -> RetryingCaller {
        RetryingCaller::new(policy(max_attempts), Arc::new(EventBus::default()))
    }

    fn network() -> CollaboratorError {
        CollaboratorError::Network("connection reset".into())
    }

    #[test]
    fn delay_grows_geometrically_and_caps() {
        let p = policy(5);
        assert_eq!(p.delay_for(0), Duration::from_secs(1));
        assert_eq!(p.delay_for(1), Duration::from_millis(1500));
        assert_eq!(p.delay_for(2), Duration::from_millis(2250));
        assert_eq!(p.delay_for(10), Duration::from_secs(10));
        assert_eq!(p.delay_for(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn policy_from_config() {
        let p = RetryPolicy::default();
        assert_eq!(p.max_attempts, 3);
        assert_eq!(p.base_delay, Duration::from_secs(1));
        assert_eq!(p.attempt_timeout, Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn always_transient_uses_exactly_max_attempts() {
        let calls = &AtomicU32::new(0);
        let start = Instant::now();

        let result: Result<Attempted<()>, _> = caller(3)
            .call("retrieve", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(network())
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(WorkflowError::RetryExhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert_eq!(last, network());
            }
            other => panic!("Expected RetryExhausted, got {other:?}"),
        }
        // 1s + 1.5s of backoff
        assert_eq!(start.elapsed(), Duration::from_millis(2500));
    }

    #[tokio::test(start_paused = true)]
    async fn fail_once_then_succeed_takes_two_attempts() {
        let calls = &AtomicU32::new(0);

        let result = caller(3)
            .call("generate", || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n == 0 { Err(network()) } else { Ok("answer") }
            })
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(result.attempts, 2);
        assert_eq!(result.value, "answer");
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failure_is_not_retried() {
        let calls = &AtomicU32::new(0);

        let result: Result<Attempted<()>, _> = caller(3)
            .call("generate", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(CollaboratorError::AuthenticationFailed("bad key".into()))
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(WorkflowError::Permanent(CollaboratorError::AuthenticationFailed(_)))));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_attempt_times_out_and_is_retried() {
        let calls = &AtomicU32::new(0);
        let mut p = policy(2);
        p.attempt_timeout = Duration::from_secs(5);
        let caller = RetryingCaller::new(p, Arc::new(EventBus::default()));

        let result = caller
            .call("retrieve", || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                }
                Ok(n)
            })
            .await
            .unwrap();

        assert_eq!(result.value, 1);
        assert_eq!(result.attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_hint_extends_backoff() {
        let calls = &AtomicU32::new(0);
        let start = Instant::now();

        caller(2)
            .call("generate", || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n == 0 { Err(CollaboratorError::RateLimited { retry_after_secs: 4 }) } else { Ok(()) }
            })
            .await
            .unwrap();

        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn every_attempt_is_published() {
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let caller = RetryingCaller::new(policy(3), bus.clone());
        let calls = &AtomicU32::new(0);

        caller
            .call("retrieve", || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 { Err(network()) } else { Ok(()) }
            })
            .await
            .unwrap();

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let DomainEvent::CallAttempted { attempt, success, delay_ms, .. } = event.as_ref() {
                seen.push((*attempt, *success, *delay_ms));
            }
        }
        assert_eq!(seen, vec![(1, false, Some(1000)), (2, false, Some(1500)), (3, true, None)]);
    }
}
