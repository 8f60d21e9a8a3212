//! Retry strategy with exponential backoff for transient errors.

use std::collections::HashSet;
use std::error::Error as StdError;
use std::future::Future;
use std::io;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use inkboard_common::{Error, ErrorCode, Result};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts. Total attempts are `max_retries + 1`.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on every further retry.
    pub base_delay: Duration,
    /// Codes that fail immediately without retrying.
    pub non_retryable: HashSet<ErrorCode>,
}

impl RetryConfig {
    /// Create a new retry configuration.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_millis(1000),
            non_retryable: HashSet::from([
                ErrorCode::AuthFailed,
                ErrorCode::InvalidData,
                ErrorCode::StorageFull,
            ]),
        }
    }

    /// Set base delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Treat an additional code as non-retryable.
    pub fn with_non_retryable(mut self, code: ErrorCode) -> Self {
        self.non_retryable.insert(code);
        self
    }

    /// Replace the whole non-retryable set.
    pub fn with_non_retryable_set(mut self, codes: impl IntoIterator<Item = ErrorCode>) -> Self {
        self.non_retryable = codes.into_iter().collect();
        self
    }

    /// Delay before retry number `attempt` (0-based): `base_delay * 2^attempt`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Whether a failure may be retried. Errors without a code always may.
    pub fn is_retryable(&self, err: &Error) -> bool {
        match err.code() {
            Some(code) => !self.non_retryable.contains(&code),
            None => true,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Retry executor for running operations with retry logic.
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    /// Create a new retry executor.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Execute an operation with retry logic.
    ///
    /// Fails immediately on a non-retryable code. Otherwise retries up to
    /// `max_retries` times and returns the last error once they run out.
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(result) => {
                    if attempt > 0 {
                        debug!("Operation succeeded after {} retries", attempt);
                    }
                    return Ok(result);
                }
                Err(err) => {
                    if !self.config.is_retryable(&err) {
                        debug!("Not retrying: {}", err);
                        return Err(err);
                    }

                    if attempt >= self.config.max_retries {
                        if self.config.max_retries > 0 {
                            warn!(
                                "Operation failed after {} attempts: {}",
                                attempt + 1,
                                err
                            );
                        }
                        return Err(err);
                    }

                    let delay = self.config.delay_for_attempt(attempt);
                    attempt += 1;
                    warn!(
                        "Attempt {} failed: {}. Retrying in {:?}...",
                        attempt, err, delay
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    /// Get the retry configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}

/// Convenience function for simple retry with defaults.
pub async fn retry<F, Fut, T>(operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    RetryExecutor::default().execute(operation).await
}

/// Convenience function for retry with custom config.
pub async fn retry_with_config<F, Fut, T>(config: RetryConfig, operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    RetryExecutor::new(config).execute(operation).await
}

/// Whether an error looks network related, for user messaging.
///
/// Retry decisions never use this; they go by [`ErrorCode`].
pub fn is_network_error(err: &(dyn StdError + 'static)) -> bool {
    let message = err.to_string().to_lowercase();
    if ["timeout", "connection", "fetch"]
        .iter()
        .any(|keyword| message.contains(keyword))
    {
        return true;
    }
    is_transport_error(err) && message.contains("network")
}

fn is_transport_error(err: &(dyn StdError + 'static)) -> bool {
    err.is::<io::Error>() || matches!(err.downcast_ref::<Error>(), Some(Error::Io(_)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    fn network() -> Error {
        Error::remote(ErrorCode::NetworkError, "Connection reset")
    }

    #[test]
    fn test_retry_config_delay_calculation() {
        let config = RetryConfig::new(3).with_base_delay(Duration::from_secs(1));

        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(config.delay_for_attempt(5), Duration::from_secs(32));
    }

    #[test]
    fn test_delay_saturates() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for_attempt(64), Duration::from_secs(1).saturating_mul(u32::MAX));
    }

    #[test]
    fn test_default_retryability() {
        let config = RetryConfig::default();

        assert!(!config.is_retryable(&Error::remote(ErrorCode::AuthFailed, "x")));
        assert!(!config.is_retryable(&Error::remote(ErrorCode::InvalidData, "x")));
        assert!(!config.is_retryable(&Error::remote(ErrorCode::StorageFull, "x")));
        assert!(config.is_retryable(&Error::remote(ErrorCode::NetworkError, "x")));
        assert!(config.is_retryable(&Error::remote(ErrorCode::RateLimited, "x")));
        assert!(config.is_retryable(&Error::remote(ErrorCode::Unknown, "x")));
        assert!(config.is_retryable(&Error::Storage("plain failure".into())));
    }

    #[test]
    fn test_rate_limited_can_be_made_non_retryable() {
        let config = RetryConfig::default().with_non_retryable(ErrorCode::RateLimited);
        assert!(!config.is_retryable(&Error::remote(ErrorCode::RateLimited, "slow down")));
    }

    #[tokio::test]
    async fn test_successful_operation() {
        let executor = RetryExecutor::default();

        let result: Result<i32> = executor.execute(|| async { Ok(42) }).await;

        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fails_twice_then_succeeds_with_defaults() {
        let attempt_count = Arc::new(AtomicU32::new(0));
        let count_clone = attempt_count.clone();
        let start = Instant::now();

        let result: Result<&str> = retry(move || {
            let count = count_clone.clone();
            async move {
                if count.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(network())
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(attempt_count.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delays_are_strictly_exponential() {
        let stamps = Arc::new(Mutex::new(Vec::new()));
        let stamps_clone = stamps.clone();
        let config = RetryConfig::new(4).with_base_delay(Duration::from_millis(100));

        let result: Result<()> = retry_with_config(config, move || {
            stamps_clone.lock().unwrap().push(Instant::now());
            async { Err(network()) }
        })
        .await;

        assert!(result.is_err());
        let stamps = stamps.lock().unwrap();
        assert_eq!(stamps.len(), 5);
        let gaps: Vec<Duration> = stamps.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(
            gaps,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(800),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error() {
        let attempt_count = Arc::new(AtomicU32::new(0));
        let count_clone = attempt_count.clone();

        let executor = RetryExecutor::new(RetryConfig::new(10));

        let result: Result<i32> = executor
            .execute(move || {
                let count = count_clone.clone();
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                    Err(Error::remote(ErrorCode::StorageFull, "Quota exceeded"))
                }
            })
            .await;

        assert_eq!(result.unwrap_err().code(), Some(ErrorCode::StorageFull));
        assert_eq!(attempt_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_retries_exceeded_returns_last_error() {
        let attempt_count = Arc::new(AtomicU32::new(0));
        let count_clone = attempt_count.clone();

        let config = RetryConfig::new(2).with_base_delay(Duration::from_millis(1));
        let executor = RetryExecutor::new(config);

        let result: Result<i32> = executor
            .execute(move || {
                let count = count_clone.clone();
                async move {
                    let n = count.fetch_add(1, Ordering::SeqCst);
                    Err(Error::remote(ErrorCode::NetworkError, format!("failure {}", n)))
                }
            })
            .await;

        // Initial + 2 retries = 3 attempts
        assert_eq!(attempt_count.load(Ordering::SeqCst), 3);
        assert!(result.unwrap_err().to_string().contains("failure 2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_means_one_attempt() {
        let attempt_count = Arc::new(AtomicU32::new(0));
        let count_clone = attempt_count.clone();
        let start = Instant::now();

        let result: Result<()> = retry_with_config(RetryConfig::new(0), move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
            async { Err(network()) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempt_count.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[derive(Debug)]
    struct Plain(&'static str);

    impl fmt::Display for Plain {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.0)
        }
    }

    impl StdError for Plain {}

    #[test]
    fn test_is_network_error_by_message() {
        assert!(is_network_error(&Plain("Request TIMEOUT after 30s")));
        assert!(is_network_error(&Plain("connection refused")));
        assert!(is_network_error(&Plain("Failed to fetch")));
        assert!(!is_network_error(&Plain("network unreachable")));
        assert!(!is_network_error(&Plain("quota exceeded")));
    }

    #[test]
    fn test_is_network_error_for_transport_errors() {
        let io_err = io::Error::new(io::ErrorKind::Other, "Network is down");
        assert!(is_network_error(&io_err));

        let wrapped = Error::Io(io::Error::new(io::ErrorKind::Other, "network changed"));
        assert!(is_network_error(&wrapped));

        let unrelated = io::Error::new(io::ErrorKind::Other, "disk on fire");
        assert!(!is_network_error(&unrelated));
    }

    #[test]
    fn test_is_network_error_ignores_codes() {
        let coded = Error::remote(ErrorCode::NetworkError, "peer went away");
        assert!(!is_network_error(&coded));
    }
}
