//! Retry with exponential backoff
//!
//! Retries a fallible async operation while its error message matches a
//! transient-failure classifier. Anything the classifier does not recognise
//! is treated as permanent and returned on the first occurrence.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Decides from an error message whether a failure is worth retrying
pub type Classifier = fn(&str) -> bool;

/// Failures seen from HTTP APIs (enrichment model, metadata providers)
const NETWORK_ERROR_MARKERS: &[&str] = &[
    "socket connection was closed unexpectedly",
    "timeout",
    "timed out",
    "econnreset",
    "enotfound",
    "econnrefused",
    "connection reset",
    "dns error",
    "network error",
    "fetch failed",
];

/// Failures seen from the media tooling (inspection and download)
const TOOLING_ERROR_MARKERS: &[&str] = &[
    "handshake operation timed out",
    "timeout",
    "timed out",
    "connection",
    "network",
    "ssl",
    "tls",
    "econnreset",
    "enotfound",
    "econnrefused",
];

/// Transient network failure from an HTTP API call
pub fn is_transient_network_error(message: &str) -> bool {
    contains_any(message, NETWORK_ERROR_MARKERS)
}

/// Transient failure reported by the download/inspection tooling
pub fn is_transient_tooling_error(message: &str) -> bool {
    contains_any(message, TOOLING_ERROR_MARKERS)
}

/// SQLite write contention
pub fn is_database_lock_error(message: &str) -> bool {
    contains_any(message, &["database is locked", "database table is locked"])
}

fn contains_any(message: &str, markers: &[&str]) -> bool {
    let message = message.to_lowercase();
    markers.iter().any(|marker| message.contains(marker))
}

/// Retry parameters plus the classifier that gates retries
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each subsequent retry
    pub base_delay: Duration,
    classifier: Classifier,
}

impl RetryPolicy {
    pub const DEFAULT_MAX_RETRIES: u32 = 3;

    pub fn new(max_retries: u32, base_delay: Duration, classifier: Classifier) -> Self {
        Self {
            max_retries,
            base_delay,
            classifier,
        }
    }

    /// Policy for HTTP API calls: 3 retries starting at 1 s
    pub fn network() -> Self {
        Self::new(
            Self::DEFAULT_MAX_RETRIES,
            Duration::from_secs(1),
            is_transient_network_error,
        )
    }

    /// Policy for media tooling: 3 retries starting at 2 s
    pub fn tooling() -> Self {
        Self::new(
            Self::DEFAULT_MAX_RETRIES,
            Duration::from_secs(2),
            is_transient_tooling_error,
        )
    }

    /// Policy for contended SQLite writes: 5 retries starting at 10 ms
    pub fn database() -> Self {
        Self::new(5, Duration::from_millis(10), is_database_lock_error)
    }

    /// Same policy with a different base delay
    pub fn with_base_delay(self, base_delay: Duration) -> Self {
        Self { base_delay, ..self }
    }

    /// Same policy with a different retry count
    pub fn with_max_retries(self, max_retries: u32) -> Self {
        Self {
            max_retries,
            ..self
        }
    }

    /// Whether the policy would retry this error message
    pub fn is_retryable(&self, message: &str) -> bool {
        (self.classifier)(message)
    }

    /// Backoff before retry number `attempt + 1` (`attempt` is 0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Run `operation` until it succeeds, fails permanently, or retries run out.
    ///
    /// The last error is returned unchanged.
    pub async fn run<F, Fut, T, E>(&self, operation_name: &str, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut attempt: u32 = 0;

        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::debug!(
                            operation = operation_name,
                            attempt = attempt + 1,
                            "Operation succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(err) => {
                    let message = err.to_string();

                    if !self.is_retryable(&message) {
                        return Err(err);
                    }

                    if attempt >= self.max_retries {
                        tracing::error!(
                            operation = operation_name,
                            attempts = attempt + 1,
                            error = %message,
                            "Operation failed after all retries"
                        );
                        return Err(err);
                    }

                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        max_attempts = self.max_retries + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "Transient failure, retrying after backoff"
                    );

                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
