//! Retry policy layered over a single request.
//!
//! Provides configurable retry behavior with:
//! - Fixed, linear, or exponential backoff capped at a maximum delay
//! - Optional jitter (off by default)
//! - Retry on declared error kinds and response statuses only
//! - An `on_retry` hook and statistics tracking

use crate::error::{CallwireError, ErrorKind, Result};
use crate::message::{Response, StatusCode};
use rand::Rng;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    Fixed,
    Linear,
    Exponential { multiplier: f64 },
}

/// Called before each retry with the failing error (if any), the 1-based
/// retry number, and the delay about to be slept.
pub type RetryCallback = Arc<dyn Fn(Option<&CallwireError>, u32, Duration) + Send + Sync>;

/// Configuration for retry behavior.
#[derive(Clone)]
pub struct RetryPolicy {
    pub enabled: bool,
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff: Backoff,
    /// Multiply each delay by a random factor between 0.5 and 1.5.
    pub jitter: bool,
    pub retryable_statuses: HashSet<StatusCode>,
    /// Error kinds worth retrying. Empty means any error.
    pub retryable_errors: HashSet<ErrorKind>,
    pub on_retry: Option<RetryCallback>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff: Backoff::Exponential { multiplier: 2.0 },
            jitter: false,
            retryable_statuses: HashSet::from([StatusCode::InternalServerError]),
            retryable_errors: HashSet::new(),
            on_retry: None,
        }
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("enabled", &self.enabled)
            .field("max_retries", &self.max_retries)
            .field("initial_delay", &self.initial_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff", &self.backoff)
            .field("jitter", &self.jitter)
            .field("retryable_statuses", &self.retryable_statuses)
            .field("retryable_errors", &self.retryable_errors)
            .finish()
    }
}

impl RetryPolicy {
    /// Create a new retry policy with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy that never retries.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_retryable_statuses(
        mut self,
        statuses: impl IntoIterator<Item = StatusCode>,
    ) -> Self {
        self.retryable_statuses = statuses.into_iter().collect();
        self
    }

    pub fn with_retryable_errors(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.retryable_errors = kinds.into_iter().collect();
        self
    }

    /// Retry only connection-level failures ([`ErrorKind::TRANSIENT`]).
    pub fn with_transient_errors(self) -> Self {
        self.with_retryable_errors(ErrorKind::TRANSIENT)
    }

    pub fn with_on_retry(
        mut self,
        callback: impl Fn(Option<&CallwireError>, u32, Duration) + Send + Sync + 'static,
    ) -> Self {
        self.on_retry = Some(Arc::new(callback));
        self
    }

    /// Delay before retry `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let initial = self.initial_delay.as_secs_f64();
        let raw = match self.backoff {
            Backoff::Fixed => initial,
            Backoff::Linear => initial * attempt as f64,
            Backoff::Exponential { multiplier } => {
                initial * multiplier.powi(attempt.saturating_sub(1).min(i32::MAX as u32) as i32)
            }
        };
        let cap = self.max_delay.as_secs_f64();
        let capped = if raw.is_finite() { raw.min(cap) } else { cap };

        let final_secs = if self.jitter {
            let factor = rand::rng().random_range(0.5..1.5);
            (capped * factor).min(cap)
        } else {
            capped
        };

        Duration::try_from_secs_f64(final_secs).unwrap_or(self.max_delay)
    }

    pub fn should_retry_error(&self, error: &CallwireError) -> bool {
        self.enabled
            && (self.retryable_errors.is_empty() || self.retryable_errors.contains(&error.kind()))
    }

    pub fn should_retry_status(&self, status: StatusCode) -> bool {
        self.enabled && self.retryable_statuses.contains(&status)
    }

    async fn pause(&self, error: Option<&CallwireError>, attempt: u32, stats: &mut RetryStats) {
        let delay = self.delay_for(attempt);
        stats.total_delay += delay;
        if let Some(callback) = &self.on_retry {
            callback(error, attempt, delay);
        }
        tokio::time::sleep(delay).await;
    }

    /// Run `operation`, retrying retryable errors.
    ///
    /// After `max_retries` retries the last error is returned unchanged.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute_with_stats(operation).await.0
    }

    pub async fn execute_with_stats<T, F, Fut>(&self, mut operation: F) -> (Result<T>, RetryStats)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut stats = RetryStats::default();
        let mut retries = 0;

        loop {
            stats.attempts += 1;
            match operation().await {
                Ok(value) => {
                    stats.success = true;
                    if retries > 0 {
                        debug!("Operation succeeded after {} attempts", stats.attempts);
                    }
                    return (Ok(value), stats);
                }
                Err(e) => {
                    stats.last_error = Some(e.to_string());
                    if !self.should_retry_error(&e) {
                        debug!("Error is not retryable: {}", e);
                        return (Err(e), stats);
                    }
                    if retries >= self.max_retries {
                        warn!("All {} retries exhausted. Last error: {}", self.max_retries, e);
                        return (Err(e), stats);
                    }
                    retries += 1;
                    warn!("Attempt {} failed: {}. Retrying", stats.attempts, e);
                    self.pause(Some(&e), retries, &mut stats).await;
                }
            }
        }
    }

    /// Run a request exchange, retrying retryable errors and statuses.
    ///
    /// When retries run out, the last response or error is returned unchanged.
    pub async fn execute_response<F, Fut>(&self, operation: F) -> Result<Response>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Response>>,
    {
        self.execute_response_with_stats(operation).await.0
    }

    pub async fn execute_response_with_stats<F, Fut>(
        &self,
        mut operation: F,
    ) -> (Result<Response>, RetryStats)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Response>>,
    {
        let mut stats = RetryStats::default();
        let mut retries = 0;

        loop {
            stats.attempts += 1;
            let outcome = operation().await;
            let retryable = match &outcome {
                Ok(response) if response.is_ok() => false,
                Ok(response) => {
                    stats.last_error = Some(response.status.to_string());
                    self.should_retry_status(response.status)
                }
                Err(e) => {
                    stats.last_error = Some(e.to_string());
                    self.should_retry_error(e)
                }
            };
            stats.success = matches!(&outcome, Ok(response) if response.is_ok());

            if !retryable || retries >= self.max_retries {
                if retryable {
                    warn!("All {} retries exhausted", self.max_retries);
                }
                return (outcome, stats);
            }

            retries += 1;
            match &outcome {
                Ok(response) => {
                    warn!("Attempt {} answered {}. Retrying", stats.attempts, response.status);
                    self.pause(None, retries, &mut stats).await;
                }
                Err(e) => {
                    warn!("Attempt {} failed: {}. Retrying", stats.attempts, e);
                    self.pause(Some(e), retries, &mut stats).await;
                }
            }
        }
    }
}

/// Statistics about a retry operation.
#[derive(Debug, Clone, Default)]
pub struct RetryStats {
    /// Number of attempts made.
    pub attempts: u32,
    /// Total delay accumulated.
    pub total_delay: Duration,
    /// Whether the operation ultimately succeeded.
    pub success: bool,
    /// Last error or failing status, if any.
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick() -> RetryPolicy {
        RetryPolicy::new().with_initial_delay(Duration::from_millis(1))
    }

    #[test]
    fn test_backoff_schedules() {
        let base = RetryPolicy::new()
            .with_initial_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_secs(10));

        let fixed = base.clone().with_backoff(Backoff::Fixed);
        assert_eq!(fixed.delay_for(1), Duration::from_millis(100));
        assert_eq!(fixed.delay_for(4), Duration::from_millis(100));

        let linear = base.clone().with_backoff(Backoff::Linear);
        assert_eq!(linear.delay_for(1), Duration::from_millis(100));
        assert_eq!(linear.delay_for(3), Duration::from_millis(300));

        let exponential = base.with_backoff(Backoff::Exponential { multiplier: 2.0 });
        assert_eq!(exponential.delay_for(1), Duration::from_millis(100));
        assert_eq!(exponential.delay_for(2), Duration::from_millis(200));
        assert_eq!(exponential.delay_for(4), Duration::from_millis(800));
    }

    #[test]
    fn test_delay_capped_at_max() {
        let policy = RetryPolicy::new()
            .with_initial_delay(Duration::from_secs(10))
            .with_max_delay(Duration::from_secs(30));

        // 10 * 2^3 = 80s, but capped at 30s
        assert_eq!(policy.delay_for(4), Duration::from_secs(30));
        assert_eq!(policy.delay_for(5000), Duration::from_secs(30));
    }

    #[test]
    fn test_delay_with_jitter() {
        let policy = RetryPolicy::new()
            .with_initial_delay(Duration::from_secs(2))
            .with_jitter(true);

        for _ in 0..20 {
            let delay = policy.delay_for(1);
            assert!(
                delay >= Duration::from_secs(1) && delay <= Duration::from_secs(3),
                "Delay {:?} should be between 1s and 3s",
                delay
            );
        }
    }

    #[tokio::test]
    async fn test_retry_bound() {
        let policy = quick().with_max_retries(2);
        let calls = AtomicU32::new(0);

        let (result, stats) = policy
            .execute_with_stats(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<i32, _>(CallwireError::Disconnected) }
            })
            .await;

        assert!(matches!(result, Err(CallwireError::Disconnected)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(stats.attempts, 3);
        assert!(!stats.success);
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let policy = quick().with_max_retries(3);
        let calls = AtomicU32::new(0);

        let result = policy
            .execute(|| {
                let count = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if count < 2 {
                        Err(CallwireError::Timeout(Duration::from_millis(5)))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_only_declared_error_kinds_retry() {
        let policy = quick().with_retryable_errors([ErrorKind::Timeout]);
        let calls = AtomicU32::new(0);

        let result = policy
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(CallwireError::protocol("bad frame")) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_errors_retry_connection_failures_only() {
        let policy = quick().with_transient_errors();
        assert!(policy.should_retry_error(&CallwireError::NotConnected));
        assert!(policy.should_retry_error(&CallwireError::transport("reset")));
        assert!(!policy.should_retry_error(&CallwireError::Unauthorized {
            message: "denied".into()
        }));

        let calls = AtomicU32::new(0);
        let result = policy
            .execute(|| {
                let count = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if count == 0 {
                        Err(CallwireError::Disconnected)
                    } else {
                        Err::<(), _>(CallwireError::protocol("bad frame"))
                    }
                }
            })
            .await;
        assert!(matches!(result, Err(CallwireError::Protocol { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_disabled_never_retries() {
        let policy = RetryPolicy::disabled();
        let calls = AtomicU32::new(0);

        let _ = policy
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(CallwireError::Disconnected) }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_status_retry_and_callback() {
        let seen: Arc<Mutex<Vec<(bool, u32)>>> = Arc::new(Mutex::new(Vec::new()));
        let recorder = seen.clone();
        let policy = quick()
            .with_max_retries(2)
            .with_on_retry(move |error, attempt, _| {
                recorder.lock().push((error.is_some(), attempt))
            });
        let calls = AtomicU32::new(0);

        let (result, stats) = policy
            .execute_response_with_stats(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(Response::internal_error("flaky", None)) }
            })
            .await;

        let response = result.unwrap();
        assert_eq!(response.status, StatusCode::InternalServerError);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(stats.attempts, 3);
        assert_eq!(*seen.lock(), vec![(false, 1), (false, 2)]);
    }

    #[tokio::test]
    async fn test_unlisted_status_is_returned_immediately() {
        let policy = quick();
        let calls = AtomicU32::new(0);

        let response = policy
            .execute_response(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(Response::bad_request("nope")) }
            })
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::BadRequest);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
