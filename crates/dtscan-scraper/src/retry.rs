//! Fixed-delay retry for flaky page interactions.
//!
//! Clicks on the booking calendar routinely fail while the page is still
//! animating, so each navigation step is wrapped in [`RetryExecutor::run`].
//! A step is retried after a fixed delay until it succeeds or the attempt
//! budget runs out. Fatal errors ([`ScraperError::is_fatal`]) are returned
//! immediately: a dead browser session will not come back by waiting.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::browser::BrowserSession;
use crate::error::ScraperError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts allowed; `0` retries forever.
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// Same delay, different attempt budget.
    #[must_use]
    pub fn attempts(self, max_retries: u32) -> Self {
        Self {
            max_retries,
            ..self
        }
    }
}

#[derive(Clone)]
pub struct RetryExecutor {
    session: Arc<dyn BrowserSession>,
    cancel: CancellationToken,
}

impl RetryExecutor {
    #[must_use]
    pub fn new(session: Arc<dyn BrowserSession>, cancel: CancellationToken) -> Self {
        Self { session, cancel }
    }

    /// Run `operation` until it succeeds, it fails fatally, or the policy's
    /// attempt budget is spent.
    ///
    /// # Errors
    ///
    /// - the first fatal error from `operation`
    /// - [`ScraperError::Cancelled`] if the run is cancelled between or during attempts
    /// - [`ScraperError::ExhaustedRetries`] once `policy.max_retries` attempts have failed
    /// - a browser error if the backoff sleep fails (the session closed)
    pub async fn run<T, F, Fut>(
        &self,
        step: &str,
        policy: RetryPolicy,
        mut operation: F,
    ) -> Result<T, ScraperError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ScraperError>>,
    {
        let mut attempt = 0u32;
        loop {
            if self.cancel.is_cancelled() {
                return Err(ScraperError::Cancelled);
            }
            attempt += 1;
            tracing::debug!(step, attempt, "calling step");

            let outcome = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(ScraperError::Cancelled),
                outcome = operation() => outcome,
            };
            let err = match outcome {
                Ok(value) => {
                    tracing::debug!(step, attempt, "step succeeded");
                    return Ok(value);
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => err,
            };

            if policy.max_retries != 0 && attempt >= policy.max_retries {
                tracing::error!(step, attempt, error = %err, "step failed on final attempt");
                return Err(ScraperError::ExhaustedRetries {
                    step: step.to_string(),
                    attempts: attempt,
                });
            }

            tracing::warn!(
                step,
                attempt,
                max_retries = policy.max_retries,
                delay_ms = u64::try_from(policy.delay.as_millis()).unwrap_or(u64::MAX),
                error = %err,
                "step failed; retrying after delay"
            );
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(ScraperError::Cancelled),
                slept = self.session.sleep(policy.delay) => slept?,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::error::BrowserError;
    use crate::fake::FakeSession;

    fn executor() -> (RetryExecutor, CancellationToken) {
        let cancel = CancellationToken::new();
        let session: Arc<dyn BrowserSession> = FakeSession::new();
        (RetryExecutor::new(session, cancel.clone()), cancel)
    }

    fn flaky() -> ScraperError {
        ScraperError::Browser(BrowserError::ElementNotFound {
            selector: "#calendarSubmit > button".into(),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_immediately_on_first_try() {
        let (retry, _) = executor();
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = retry
            .run("noop", RetryPolicy::default(), || {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok::<u32, ScraperError>(42)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_last_allowed_attempt() {
        let (retry, _) = executor();
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let start = tokio::time::Instant::now();
        let result = retry
            .run("selectDate", RetryPolicy::default(), || {
                let c = Arc::clone(&c);
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(flaky())
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_max_attempts() {
        let (retry, _) = executor();
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = retry
            .run("clickNext", RetryPolicy::default().attempts(2), || {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(flaky())
                }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(matches!(
            result,
            Err(ScraperError::ExhaustedRetries { ref step, attempts: 2 }) if step == "clickNext"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn session_dead_error_is_not_retried() {
        let (retry, _) = executor();
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = retry
            .run("selectLocation", RetryPolicy::default().attempts(100), || {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(ScraperError::Browser(BrowserError::Protocol(
                        "Protocol error: Target closed.".into(),
                    )))
                }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1, "session-dead must not be retried");
        assert!(result.unwrap_err().is_session_dead());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_max_retries_keeps_trying() {
        let (retry, _) = executor();
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = retry
            .run("forever", RetryPolicy::new(0, Duration::from_millis(10)), || {
                let c = Arc::clone(&c);
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) < 250 {
                        Err(flaky())
                    } else {
                        Ok(())
                    }
                }
            })
            .await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 251);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_retrying() {
        let (retry, cancel) = executor();
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let task = tokio::spawn(async move {
            retry
                .run("forever", RetryPolicy::new(0, Duration::from_secs(1)), || {
                    let c = Arc::clone(&c);
                    async move {
                        c.fetch_add(1, Ordering::SeqCst);
                        Err::<(), _>(flaky())
                    }
                })
                .await
        });
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        cancel.cancel();
        let result = task.await.unwrap();
        assert!(matches!(result, Err(ScraperError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_session_fails_the_backoff_sleep() {
        let cancel = CancellationToken::new();
        let fake = FakeSession::new();
        fake.close().await.unwrap();
        let session: Arc<dyn BrowserSession> = fake;
        let retry = RetryExecutor::new(session, cancel);
        let result = retry
            .run("step", RetryPolicy::default(), || async { Err::<(), _>(flaky()) })
            .await;
        assert!(result.unwrap_err().is_session_dead());
    }
}
