//! Declarative retry policies with backoff and elapsed-time budgets.
//!
//! Each bootstrap step runs under its own [`RetryPolicy`]: connection
//! establishment, remote command execution, and liveness probing all tolerate
//! different failure classes and use different backoff shapes. The
//! [`with_retry`] combinator applies a policy around any async operation; the
//! caller supplies the predicate that decides which errors are retryable, so
//! a policy never retries a classification outside its declared trigger set.

use crate::error::BootstrapError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Backoff shape and budget for one retried step.
///
/// Constant backoff is expressed as `initial_delay == max_delay`. The budget
/// is elapsed time, not attempt count: once `max_elapsed` has passed, the
/// most recent error propagates without further attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Cap for exponential growth
    pub max_delay: Duration,
    /// Total time budget across all attempts
    pub max_elapsed: Duration,
    /// Jitter factor (0.0 - 1.0) added to each delay
    pub jitter: f64,
}

impl RetryPolicy {
    /// Policy for opening an SSH session to a freshly launched instance.
    ///
    /// Exponential with a 300s ceiling: instances routinely hold a public
    /// address for tens of seconds before sshd accepts connections.
    pub fn connect() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            max_elapsed: Duration::from_secs(300),
            jitter: 0.25,
        }
    }

    /// Policy for remote command execution (install/build/start).
    ///
    /// Covers transient package-manager locks and registry hiccups.
    pub fn remote_exec() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(20),
            max_elapsed: Duration::from_secs(120),
            jitter: 0.25,
        }
    }

    /// Policy for the HTTP liveness probe.
    ///
    /// Constant interval, no attempt cap: the container may take a while to
    /// start, and the only bound is the overall elapsed budget.
    pub fn probe() -> Self {
        Self {
            initial_delay: Duration::from_secs(3),
            max_delay: Duration::from_secs(3),
            max_elapsed: Duration::from_secs(300),
            jitter: 0.0,
        }
    }
}

/// Run `op` under `policy`, retrying only errors accepted by `is_retryable`.
///
/// # Arguments
/// * `policy` - backoff shape and elapsed budget
/// * `is_retryable` - trigger predicate; errors it rejects propagate at once
/// * `name` - operation name for logging
/// * `op` - async operation producing a fresh future per attempt
///
/// Returns the first success, the first non-retryable error, or the last
/// error once the elapsed budget is exhausted.
pub async fn with_retry<T, F, Fut, P>(
    policy: &RetryPolicy,
    is_retryable: P,
    name: &str,
    op: F,
) -> Result<T, BootstrapError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, BootstrapError>>,
    P: Fn(&BootstrapError) -> bool,
{
    let start = std::time::Instant::now();
    let mut delay = policy.initial_delay;
    let mut attempts = 0u32;

    loop {
        attempts += 1;

        match op().await {
            Ok(value) => {
                debug!(op = %name, attempts, "Operation succeeded");
                return Ok(value);
            }
            Err(e) if !is_retryable(&e) => {
                warn!(op = %name, attempts, error = %e, "Non-retryable failure");
                return Err(e);
            }
            Err(e) => {
                if start.elapsed() >= policy.max_elapsed {
                    warn!(
                        op = %name,
                        attempts,
                        elapsed_secs = start.elapsed().as_secs(),
                        error = %e,
                        "Retry budget exhausted"
                    );
                    return Err(e);
                }

                let jittered = jittered_delay(delay, policy.jitter);
                debug!(
                    op = %name,
                    attempt = attempts,
                    delay_ms = jittered.as_millis(),
                    error = %e,
                    "Retrying after transient failure"
                );
                tokio::time::sleep(jittered).await;
                delay = (delay * 2).min(policy.max_delay);
            }
        }
    }
}

/// Add jitter to a delay to avoid synchronized retries across the fleet.
fn jittered_delay(base: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 {
        return base;
    }
    let jitter = rand::thread_rng().gen_range(0.0..jitter_factor);
    Duration::from_secs_f64(base.as_secs_f64() * (1.0 + jitter))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            max_elapsed: Duration::from_secs(5),
            jitter: 0.0,
        }
    }

    #[tokio::test]
    async fn succeeds_immediately() {
        let result = with_retry(
            &fast_policy(),
            BootstrapError::is_probe,
            "probe",
            || async { Ok(()) },
        )
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(&fast_policy(), BootstrapError::is_probe, "probe", || {
            let c = counter_clone.clone();
            async move {
                let count = c.fetch_add(1, Ordering::SeqCst);
                if count < 2 {
                    Err(BootstrapError::Probe("not yet serving".into()))
                } else {
                    Ok(())
                }
            }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn budget_exhaustion_returns_last_error() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(10),
            max_elapsed: Duration::from_millis(50),
            jitter: 0.0,
        };

        let result: Result<(), _> = with_retry(&policy, BootstrapError::is_probe, "probe", || {
            let c = counter_clone.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(BootstrapError::Probe("still down".into()))
            }
        })
        .await;

        assert!(matches!(result, Err(BootstrapError::Probe(_))));
        let attempts = counter.load(Ordering::SeqCst);
        // ~50ms budget at 10ms per retry: a handful of attempts, never unbounded
        assert!(attempts >= 2, "expected at least one retry, got {attempts}");
        assert!(attempts <= 8, "attempts exceeded budget: {attempts}");
    }

    #[tokio::test]
    async fn non_retryable_class_propagates_without_retry() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        // Probe policy must not retry a transfer failure
        let result: Result<(), _> =
            with_retry(&fast_policy(), BootstrapError::is_probe, "probe", || {
                let c = counter_clone.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(BootstrapError::Transfer("disk full".into()))
                }
            })
            .await;

        assert!(matches!(result, Err(BootstrapError::Transfer(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn constant_backoff_has_no_jitter_or_growth() {
        let policy = RetryPolicy::probe();
        assert_eq!(policy.initial_delay, policy.max_delay);
        assert_eq!(jittered_delay(policy.initial_delay, policy.jitter), policy.initial_delay);
    }

    #[test]
    fn exponential_delay_is_capped() {
        let policy = RetryPolicy::connect();
        let mut delay = policy.initial_delay;
        for _ in 0..10 {
            delay = (delay * 2).min(policy.max_delay);
        }
        assert_eq!(delay, policy.max_delay);
    }
}
