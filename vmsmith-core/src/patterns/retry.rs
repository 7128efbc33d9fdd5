//! Retry and backoff for transient tool failures
//!
//! Wraps a fallible async operation with bounded attempts and a delay between
//! them. Waits observe a [`CancelSignal`]; cancellation is reported as
//! [`VmsmithError::Cancelled`], distinct from exhaustion, which returns the
//! last error the operation produced.

use crate::config::RetryPolicyConfig;
use crate::error::{VmsmithError, VmsmithResult};
use crate::patterns::cancel::CancelSignal;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Backoff strategy for retry operations
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed(Duration),
    /// Exponential increase in delay (base * multiplier^(attempt - 1))
    Exponential {
        base: Duration,
        max: Duration,
        multiplier: f64,
    },
}

impl BackoffStrategy {
    /// Calculate the delay after the given (1-based) failed attempt
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            BackoffStrategy::Fixed(duration) => *duration,

            BackoffStrategy::Exponential {
                base,
                max,
                multiplier,
            } => {
                let factor = multiplier.powf(attempt.saturating_sub(1) as f64);
                let delay_ms = base.as_millis() as f64 * factor;
                if !delay_ms.is_finite() || delay_ms >= max.as_millis() as f64 {
                    return *max;
                }
                std::cmp::min(Duration::from_millis(delay_ms as u64), *max)
            }
        }
    }
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        BackoffStrategy::Exponential {
            base: Duration::from_millis(100),
            max: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

/// Configuration for retry operations
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the initial attempt)
    pub max_attempts: u32,
    /// Backoff strategy to use
    pub backoff: BackoffStrategy,
    /// Function to determine if an error is retryable
    pub is_retryable: fn(&VmsmithError) -> bool,
    /// Per-operation identifier for log lines and cancellation errors
    pub operation_name: Option<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffStrategy::default(),
            is_retryable: VmsmithError::is_retryable,
            operation_name: None,
        }
    }
}

impl RetryConfig {
    /// Create a simple fixed delay retry config
    pub fn fixed(attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: attempts,
            backoff: BackoffStrategy::Fixed(delay),
            ..Default::default()
        }
    }

    /// Create an exponential backoff retry config
    pub fn exponential(attempts: u32, initial: Duration, max: Duration, multiplier: f64) -> Self {
        Self {
            max_attempts: attempts,
            backoff: BackoffStrategy::Exponential {
                base: initial,
                max,
                multiplier,
            },
            ..Default::default()
        }
    }

    /// Build a retry config from its serialized policy form
    pub fn from_policy(policy: &RetryPolicyConfig) -> Self {
        Self::exponential(
            policy.max_attempts,
            policy.initial_delay,
            policy.max_delay,
            policy.multiplier,
        )
    }

    /// Retry used for `unregistervm`: every second, up to five times.
    ///
    /// Initial and maximum delay are equal, so the multiplier never shows.
    pub fn for_vm_delete() -> Self {
        Self::from_policy(&RetryPolicyConfig::default()).with_operation_name("delete")
    }

    /// Set operation name for better observability
    pub fn with_operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    fn operation(&self) -> &str {
        self.operation_name.as_deref().unwrap_or("operation")
    }
}

/// Retry an async operation with the given configuration.
///
/// The signal is checked before every attempt and raced against every wait.
pub async fn retry<F, Fut, T>(
    config: &RetryConfig,
    cancel: &CancelSignal,
    mut operation: F,
) -> VmsmithResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = VmsmithResult<T>>,
{
    let mut cancel = cancel.clone();
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        if cancel.is_cancelled() {
            debug!("{} cancelled before attempt {}", config.operation(), attempt + 1);
            return Err(VmsmithError::cancelled(config.operation()));
        }

        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!("{} succeeded after {} attempts", config.operation(), attempt);
                }
                return Ok(result);
            }
            Err(error) => {
                if attempt >= max_attempts {
                    warn!(
                        "Max retry attempts ({}) reached for {}",
                        max_attempts,
                        config.operation()
                    );
                    return Err(error);
                }

                if !(config.is_retryable)(&error) {
                    debug!("Error is not retryable: {}", error);
                    return Err(error);
                }

                let delay = config.backoff.delay(attempt);

                warn!(
                    "Retry attempt {}/{} for {} after error: {} (waiting {:?})",
                    attempt,
                    max_attempts,
                    config.operation(),
                    error,
                    delay
                );

                tokio::select! {
                    _ = sleep(delay) => {}
                    _ = cancel.cancelled() => {
                        debug!("{} cancelled while waiting to retry", config.operation());
                        return Err(VmsmithError::cancelled(config.operation()));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::cancel::cancel_pair;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn tool_error(message: impl Into<String>) -> VmsmithError {
        VmsmithError::ToolReported {
            message: message.into(),
        }
    }

    #[tokio::test]
    async fn test_successful_on_first_attempt() {
        let config = RetryConfig::fixed(3, Duration::from_millis(10));
        let counter = AtomicU32::new(0);
        let attempts = &counter;

        let result = retry(&config, &CancelSignal::never(), move || async move {
            Ok::<_, VmsmithError>(attempts.fetch_add(1, Ordering::SeqCst))
        })
        .await
        .unwrap();

        assert_eq!(result, 0);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_four_failures_then_success_uses_five_attempts() {
        let config = RetryConfig::fixed(5, Duration::from_millis(5));
        let counter = AtomicU32::new(0);
        let attempts = &counter;

        let result = retry(&config, &CancelSignal::never(), move || async move {
            let count = attempts.fetch_add(1, Ordering::SeqCst);
            if count < 4 {
                Err(tool_error("machine is locked by a session"))
            } else {
                Ok("unregistered")
            }
        })
        .await
        .unwrap();

        assert_eq!(result, "unregistered");
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error() {
        let config = RetryConfig::fixed(5, Duration::from_millis(2));
        let counter = AtomicU32::new(0);
        let attempts = &counter;

        let err = retry(&config, &CancelSignal::never(), move || async move {
            let count = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            Err::<(), _>(tool_error(format!("attempt {count}")))
        })
        .await
        .unwrap_err();

        assert_eq!(counter.load(Ordering::SeqCst), 5);
        assert!(err.is_tool_failure());
        assert_eq!(err.tool_message(), Some("attempt 5"));
    }

    #[tokio::test]
    async fn test_non_retryable_error() {
        let config = RetryConfig::fixed(3, Duration::from_millis(10));
        let counter = AtomicU32::new(0);
        let attempts = &counter;

        let err = retry(&config, &CancelSignal::never(), move || async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(VmsmithError::Setup {
                message: "vboxdrv".to_string(),
            })
        })
        .await
        .unwrap_err();

        assert!(err.is_fatal());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_during_wait_stops_before_next_attempt() {
        let config = RetryConfig::fixed(5, Duration::from_secs(30));
        let (handle, signal) = cancel_pair();
        let counter = Arc::new(AtomicU32::new(0));
        let attempts = counter.clone();

        let task = tokio::spawn(async move {
            retry(&config, &signal, || {
                let attempts = attempts.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(tool_error("locked"))
                }
            })
            .await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.cancel();

        let result = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();

        assert!(matches!(result, Err(VmsmithError::Cancelled { .. })));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_already_cancelled_never_runs() {
        let config = RetryConfig::fixed(3, Duration::from_millis(1)).with_operation_name("delete");
        let (handle, signal) = cancel_pair();
        handle.cancel();
        let counter = AtomicU32::new(0);
        let attempts = &counter;

        let err = retry(&config, &signal, move || async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            Ok::<_, VmsmithError>(())
        })
        .await
        .unwrap_err();

        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(err.to_string(), "Operation 'delete' was cancelled");
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let backoff = BackoffStrategy::Exponential {
            base: Duration::from_millis(100),
            max: Duration::from_millis(500),
            multiplier: 2.0,
        };

        assert_eq!(backoff.delay(1), Duration::from_millis(100));
        assert_eq!(backoff.delay(2), Duration::from_millis(200));
        assert_eq!(backoff.delay(3), Duration::from_millis(400));
        assert_eq!(backoff.delay(4), Duration::from_millis(500));
        assert_eq!(backoff.delay(60), Duration::from_millis(500));
    }

    #[test]
    fn test_vm_delete_policy_is_flat_one_second() {
        let config = RetryConfig::for_vm_delete();
        assert_eq!(config.max_attempts, 5);
        for attempt in 1..=5 {
            assert_eq!(config.backoff.delay(attempt), Duration::from_secs(1));
        }
        assert_eq!(config.operation_name.as_deref(), Some("delete"));
    }
}
