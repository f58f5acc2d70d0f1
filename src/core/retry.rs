use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::warn;

use super::error::ProviderError;

/// Backoff policy for transient provider failures: capped exponential with
/// jitter. Non-retryable kinds surface immediately.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub factor: u32,
    pub max_attempts: u32,
    pub max_total: Duration,
    /// Jitter fraction applied symmetrically around each delay.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            factor: 2,
            max_attempts: 4,
            max_total: Duration::from_secs(30),
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// The proxy retries transient upstream kinds at most twice.
    pub fn proxy() -> Self {
        Self {
            max_attempts: 2,
            ..Self::default()
        }
    }

    pub fn base_delay(&self, attempt: u32) -> Duration {
        self.initial_delay * self.factor.saturating_pow(attempt)
    }

    fn jittered_delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt).as_millis() as f64;
        let spread = base * self.jitter;
        let delta = rand::rng().random_range(-spread..=spread);
        Duration::from_millis((base + delta).max(0.0) as u64)
    }
}

/// Run `op` under the policy. Each attempt's error decides whether to back
/// off and retry; the final attempt's error is returned as-is.
pub async fn with_retries<T, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let started = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                let out_of_budget = attempt >= policy.max_attempts
                    || started.elapsed() >= policy.max_total;
                if !err.retryable() || out_of_budget {
                    return Err(err);
                }
                let delay = policy.jittered_delay(attempt - 1);
                warn!(
                    provider = err.provider,
                    kind = err.kind.as_str(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "transient provider error, backing off"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ProviderErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient() -> ProviderError {
        ProviderError::new("stub", ProviderErrorKind::UpstreamFailure, "boom")
    }

    fn terminal() -> ProviderError {
        ProviderError::new("stub", ProviderErrorKind::Auth, "denied")
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_errors_up_to_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retries(RetryPolicy::default(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(transient()) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn does_not_retry_terminal_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retries(RetryPolicy::default(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(terminal()) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = with_retries(RetryPolicy::default(), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(transient())
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
    }

    #[test]
    fn delay_doubles_per_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.base_delay(0), Duration::from_millis(500));
        assert_eq!(policy.base_delay(1), Duration::from_millis(1000));
        assert_eq!(policy.base_delay(2), Duration::from_millis(2000));
    }
}
