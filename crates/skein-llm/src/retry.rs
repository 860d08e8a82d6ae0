//! Bounded exponential backoff for model calls.
//!
//! [`complete_with_retry`] wraps one [`Model::complete`] call with a
//! per-attempt timeout, retries transient failures
//! ([`ModelError::is_retryable`]) with exponential backoff, and gives up
//! after a fixed number of attempts. Every wait is raced against a
//! cancellation token.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use skein_types::config::RetrySettings;

use crate::error::ModelError;
use crate::model::{Model, ModelOutput, ModelRequest};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 3).
    pub max_retries: u32,
    /// Base delay between retries (default: 1 second).
    pub base_delay: Duration,
    /// Maximum delay between retries (default: 30 seconds).
    pub max_delay: Duration,
    /// Jitter factor: random 0..jitter_fraction of the delay is added (default: 0.25).
    pub jitter_fraction: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_fraction: 0.25,
        }
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            ..Self::default()
        }
    }
}

/// Calculate delay for attempt `n` (0-indexed) with exponential backoff + jitter.
///
/// The delay is `min(base_delay * 2^n, max_delay)` plus a random jitter of
/// `0..jitter_fraction * delay`.
pub fn compute_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let exp = 2u64.saturating_pow(attempt);
    let base_ms = config.base_delay.as_millis() as u64;
    let raw_ms = base_ms.saturating_mul(exp);
    let capped_ms = raw_ms.min(config.max_delay.as_millis() as u64);

    let jitter_max_ms = (capped_ms as f64 * config.jitter_fraction) as u64;
    let jitter_ms = if jitter_max_ms > 0 {
        let seed = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos() as u64;
        seed % (jitter_max_ms + 1)
    } else {
        0
    };

    Duration::from_millis(capped_ms + jitter_ms)
}

/// Why [`complete_with_retry`] gave up.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CallError {
    /// The cancellation token fired while waiting.
    #[error("model call cancelled")]
    Cancelled,

    /// The last attempt failed and no retries remain (or the error is not retryable).
    #[error("{error} (after {attempts} attempt(s))")]
    Failed {
        /// Error of the last attempt.
        error: ModelError,
        /// Attempts made, including the first.
        attempts: u32,
    },
}

/// Call the model with a per-attempt timeout and bounded retries.
///
/// A timed-out attempt counts as [`ModelError::Timeout`]. For rate-limit
/// errors the provider's suggested delay is used when it is longer than
/// the computed backoff.
pub async fn complete_with_retry(
    model: &dyn Model,
    request: &ModelRequest,
    config: &RetryConfig,
    call_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<ModelOutput, CallError> {
    let mut attempt = 0u32;
    loop {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CallError::Cancelled),
            r = tokio::time::timeout(call_timeout, model.complete(request)) => r,
        };

        let err = match result {
            Ok(Ok(output)) => {
                if attempt > 0 {
                    debug!(model = %model.name(), attempt, "model call succeeded after retry");
                }
                return Ok(output);
            }
            Ok(Err(e)) => e,
            Err(_) => ModelError::Timeout,
        };

        if !err.is_retryable() || attempt >= config.max_retries {
            return Err(CallError::Failed {
                error: err,
                attempts: attempt + 1,
            });
        }

        let delay = match &err {
            ModelError::RateLimited { retry_after_ms } => {
                compute_delay(config, attempt).max(Duration::from_millis(*retry_after_ms))
            }
            _ => compute_delay(config, attempt),
        };

        warn!(
            model = %model.name(),
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "retrying model call after transient error"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CallError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails `failures` times with `fail_with`, then answers "ok".
    struct FlakyModel {
        calls: AtomicU32,
        failures: u32,
        fail_with: fn() -> ModelError,
    }

    impl FlakyModel {
        fn new(failures: u32, fail_with: fn() -> ModelError) -> Self {
            Self {
                calls: AtomicU32::new(0),
                failures,
                fail_with,
            }
        }
    }

    #[async_trait]
    impl Model for FlakyModel {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn complete(&self, _request: &ModelRequest) -> crate::Result<ModelOutput> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err((self.fail_with)())
            } else {
                Ok(ModelOutput::text("ok"))
            }
        }
    }

    struct SlowModel;

    #[async_trait]
    impl Model for SlowModel {
        fn name(&self) -> &str {
            "slow"
        }

        async fn complete(&self, _request: &ModelRequest) -> crate::Result<ModelOutput> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(ModelOutput::text("late"))
        }
    }

    fn fast_config(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter_fraction: 0.0,
        }
    }

    fn request() -> ModelRequest {
        ModelRequest::new("m", vec![])
    }

    #[test]
    fn default_config() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.base_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(30));
    }

    #[test]
    fn from_settings() {
        let settings = RetrySettings {
            max_retries: 5,
            base_delay_ms: 200,
            max_delay_ms: 2000,
        };
        let config = RetryConfig::from(&settings);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.base_delay, Duration::from_millis(200));
        assert_eq!(config.max_delay, Duration::from_millis(2000));
    }

    #[test]
    fn compute_delay_exponential_and_capped() {
        let config = RetryConfig {
            max_retries: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            jitter_fraction: 0.0,
        };
        assert_eq!(compute_delay(&config, 0), Duration::from_millis(100));
        assert_eq!(compute_delay(&config, 1), Duration::from_millis(200));
        assert_eq!(compute_delay(&config, 3), Duration::from_millis(800));
        assert_eq!(compute_delay(&config, 4), Duration::from_millis(1000));
        assert_eq!(compute_delay(&config, 40), Duration::from_millis(1000));
    }

    #[test]
    fn compute_delay_jitter_bounded() {
        let config = RetryConfig {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            jitter_fraction: 0.5,
        };
        for _ in 0..20 {
            let d = compute_delay(&config, 0);
            assert!(d >= Duration::from_millis(100));
            assert!(d <= Duration::from_millis(150));
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let model = FlakyModel::new(2, || ModelError::Unavailable("503".into()));
        let out = complete_with_retry(
            &model,
            &request(),
            &fast_config(3),
            Duration::from_secs(5),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(out, ModelOutput::text("ok"));
        assert_eq!(model.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_attempt_ceiling() {
        let model = FlakyModel::new(100, || ModelError::Unavailable("down".into()));
        let err = complete_with_retry(
            &model,
            &request(),
            &fast_config(2),
            Duration::from_secs(5),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        match err {
            CallError::Failed { error, attempts } => {
                assert!(matches!(error, ModelError::Unavailable(_)));
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(model.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_fails_immediately() {
        let model = FlakyModel::new(100, || ModelError::AuthFailed("bad key".into()));
        let err = complete_with_retry(
            &model,
            &request(),
            &fast_config(3),
            Duration::from_secs(5),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CallError::Failed { attempts: 1, .. }));
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slow_call_becomes_timeout() {
        let err = complete_with_retry(
            &SlowModel,
            &request(),
            &fast_config(1),
            Duration::from_millis(20),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        match err {
            CallError::Failed { error, attempts } => {
                assert!(matches!(error, ModelError::Timeout));
                assert_eq!(attempts, 2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancellation_interrupts_wait() {
        let cancel = CancellationToken::new();
        let c = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            c.cancel();
        });
        let err = complete_with_retry(
            &SlowModel,
            &request(),
            &fast_config(3),
            Duration::from_secs(60),
            &cancel,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CallError::Cancelled));
    }
}
