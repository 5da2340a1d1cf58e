//! Fixed-interval retries for external tools, and the classifier for
//! Terraform errors known to be transient.

use rand::Rng;
use regex::RegexSet;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// How often and how far apart an operation is attempted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts, including the first one. Never zero.
    pub max_attempts: usize,
    /// Pause between attempts.
    pub delay: Duration,
    /// Upper bound of a random extra pause added to `delay`.
    pub jitter: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::terraform()
    }
}

impl RetryConfig {
    /// Three retries, five seconds apart, with up to a second of jitter so
    /// parallel scenarios do not hit the provider registry in lockstep.
    #[must_use]
    pub fn terraform() -> Self {
        Self {
            max_attempts: 4,
            delay: Duration::from_secs(5),
            jitter: Duration::from_secs(1),
        }
    }

    /// Thirty attempts, ten seconds apart. Bastion hosts take a while to boot.
    #[must_use]
    pub fn ssh() -> Self {
        Self {
            max_attempts: 30,
            delay: Duration::from_secs(10),
            jitter: Duration::ZERO,
        }
    }

    /// A single attempt.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            delay: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }

    /// Sets the maximum attempts, at least one.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Sets the pause between attempts and clears the jitter.
    #[must_use]
    pub fn with_delay_ms(mut self, delay: u64) -> Self {
        self.delay = Duration::from_millis(delay);
        self.jitter = Duration::ZERO;
        self
    }

    /// Sets the jitter bound.
    #[must_use]
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Pause before the next attempt.
    #[must_use]
    pub fn pause(&self) -> Duration {
        let bound = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        if bound == 0 {
            return self.delay;
        }
        self.delay + Duration::from_millis(rand::thread_rng().gen_range(0..=bound))
    }
}

/// Runs `operation` until it succeeds, fails with an error `is_retryable`
/// rejects, or runs out of attempts.
///
/// On failure returns the last error and the number of attempts made.
pub async fn with_retry_if<T, E, F, Fut, P>(
    config: &RetryConfig,
    key: &str,
    is_retryable: P,
    mut operation: F,
) -> Result<T, (E, usize)>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        if attempt >= max_attempts || !is_retryable(&err) {
            return Err((err, attempt));
        }

        let pause = config.pause();
        warn!(
            operation = key,
            attempt,
            max_attempts,
            pause_ms = u64::try_from(pause.as_millis()).unwrap_or(u64::MAX),
            error = %err,
            "attempt failed, retrying"
        );
        tokio::time::sleep(pause).await;
        attempt += 1;
    }
}

/// Error patterns Terraform and its providers emit for transient failures.
pub const DEFAULT_RETRYABLE_TERRAFORM_ERRORS: &[&str] = &[
    // Helm/Kubernetes provider calls under network contention.
    r".*read: connection reset by peer.*",
    r".*transport is closing.*",
    // Plugin and registry downloads during init.
    r".*unable to verify checksum.*",
    r".*unable to verify signature.*",
    r".*no provider exists with the given name.*",
    r".*registry service is unreachable.*",
    r".*Error installing provider.*",
    r".*Failed to query available provider packages.*",
    r".*timeout while waiting for plugin to start.*",
    r".*timed out waiting for server handshake.*",
    r"could not query provider registry for",
    // Eventual consistency in provider APIs.
    r".*Provider produced inconsistent result after apply.*",
];

/// Classifies error text as transient or not.
#[derive(Debug, Clone)]
pub struct RetryableErrors {
    patterns: RegexSet,
}

impl RetryableErrors {
    /// Builds a classifier from regex patterns.
    ///
    /// # Errors
    ///
    /// Returns an error if a pattern does not compile.
    pub fn new<I, S>(patterns: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(Self {
            patterns: RegexSet::new(patterns)?,
        })
    }

    /// The default Terraform classifier.
    #[must_use]
    pub fn terraform_defaults() -> Self {
        Self::new(DEFAULT_RETRYABLE_TERRAFORM_ERRORS).unwrap_or_else(|_| Self {
            patterns: RegexSet::empty(),
        })
    }

    /// Returns true if any pattern matches the text.
    #[must_use]
    pub fn is_retryable(&self, text: &str) -> bool {
        self.patterns.is_match(text)
    }
}

impl Default for RetryableErrors {
    fn default() -> Self {
        Self::terraform_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_presets() {
        let terraform = RetryConfig::default();
        assert_eq!(terraform.max_attempts, 4);
        assert_eq!(terraform.delay, Duration::from_secs(5));

        let ssh = RetryConfig::ssh();
        assert_eq!(ssh.max_attempts, 30);
        assert_eq!(ssh.pause(), Duration::from_secs(10));

        assert_eq!(RetryConfig::none().max_attempts, 1);
        assert_eq!(RetryConfig::none().with_max_attempts(0).max_attempts, 1);
    }

    #[test]
    fn test_pause_stays_within_jitter() {
        let config = RetryConfig::none()
            .with_delay_ms(100)
            .with_jitter(Duration::from_millis(50));

        for _ in 0..20 {
            let pause = config.pause();
            assert!(pause >= Duration::from_millis(100));
            assert!(pause <= Duration::from_millis(150));
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let config = RetryConfig::none().with_max_attempts(5).with_delay_ms(1);
        let mut calls = 0;

        let result: Result<i32, (String, usize)> = with_retry_if(
            &config,
            "apply",
            |_: &String| true,
            || {
                calls += 1;
                let current = calls;
                async move {
                    if current < 3 {
                        Err(format!("attempt {current}"))
                    } else {
                        Ok(42)
                    }
                }
            },
        )
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn test_reports_attempts_when_exhausted() {
        let config = RetryConfig::none().with_max_attempts(3).with_delay_ms(1);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let result: Result<i32, (String, usize)> = with_retry_if(
            &config,
            "init",
            |_: &String| true,
            || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err("registry service is unreachable".to_string())
                }
            },
        )
        .await;

        assert_eq!(result, Err(("registry service is unreachable".to_string(), 3)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let config = RetryConfig::none().with_max_attempts(5).with_delay_ms(1);
        let mut calls = 0;

        let result: Result<(), (String, usize)> = with_retry_if(
            &config,
            "apply",
            |e: &String| e.contains("transient"),
            || {
                calls += 1;
                async { Err("Error: invalid value for variable".to_string()) }
            },
        )
        .await;

        assert_eq!(result.map_err(|(_, attempts)| attempts), Err(1));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_terraform_retryable_classifier() {
        let errors = RetryableErrors::terraform_defaults();

        assert!(errors.is_retryable(
            "Error: Failed to query available provider packages\n\nCould not retrieve the list"
        ));
        assert!(errors.is_retryable("Error: Provider produced inconsistent result after apply"));
        assert!(errors.is_retryable("dial tcp: read: connection reset by peer"));
        assert!(!errors.is_retryable("Error: Invalid value for input variable"));
        assert!(!errors.is_retryable("Error: googleapi: Error 403: quota exceeded"));
    }
}
