//! Deadline-bounded retry with exponential backoff and jitter.
//!
//! A direct analog of the source's `Retry.execute`: the whole attempt loop
//! races an overall deadline (`gevent.Timeout` there, `tokio::time::timeout`
//! here), and between attempts the delay is multiplied by `backoff`, jitter
//! is added, and the result is optionally capped - in that order, every
//! retry, not just the first.

use std::future::Future;
use std::time::Duration;

use lymph_proto::LymphError;
use rand::Rng;
use tracing::debug;

/// A composable retry policy: `execute` is the only entry point, matching
/// the source's "Retry as a value with a method" shape rather than a
/// decorator or macro.
#[derive(Debug, Clone)]
pub struct Retry {
    timeout: Duration,
    delay: Duration,
    backoff: f64,
    max_jitter: Duration,
    max_delay: Option<Duration>,
}

impl Retry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            delay: Duration::from_millis(100),
            backoff: 2.0,
            max_jitter: Duration::from_millis(800),
            max_delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_backoff(mut self, backoff: f64) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_max_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    /// Run `op` until it succeeds, returns a non-retryable error, or the
    /// overall deadline elapses (in which case this returns
    /// [`LymphError::Timeout`] with a nil request id - callers racing a real
    /// request should prefer surfacing their own id on timeout).
    pub async fn execute<F, Fut, T>(&self, mut op: F) -> Result<T, LymphError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LymphError>>,
    {
        let attempt_loop = async {
            let mut delay = self.delay;
            loop {
                match op().await {
                    Ok(value) => return value_ok(value),
                    Err(e) if e.is_retryable() => {
                        delay = self.next_delay(delay);
                        debug!(delay_ms = delay.as_millis() as u64, "retrying after retryable error: {e}");
                        tokio::time::sleep(delay).await;
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        match tokio::time::timeout(self.timeout, attempt_loop).await {
            Ok(result) => result,
            Err(_) => Err(LymphError::Timeout {
                request_id: uuid::Uuid::nil(),
            }),
        }
    }

    fn next_delay(&self, previous: Duration) -> Duration {
        let mut delay = previous.mul_f64(self.backoff);
        let jitter_secs = rand::thread_rng().gen::<f64>() * self.max_jitter.as_secs_f64();
        delay += Duration::from_secs_f64(jitter_secs);
        if let Some(max_delay) = self.max_delay {
            delay = delay.min(max_delay);
        }
        delay
    }
}

fn value_ok<T>(value: T) -> Result<T, LymphError> {
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn succeeds_without_retry_on_first_try() {
        let retry = Retry::new(Duration::from_secs(1));
        let result = retry.execute(|| async { Ok::<_, LymphError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn retries_until_success() {
        let retry = Retry::new(Duration::from_secs(5))
            .with_delay(Duration::from_millis(1))
            .with_max_jitter(Duration::from_millis(1));
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = attempts.clone();

        let result = retry
            .execute(move || {
                let attempts = attempts_clone.clone();
                async move {
                    let n = attempts.fetch_add(1, Ordering::SeqCst);
                    if n < 3 {
                        Err(LymphError::NotConnected {
                            service: "echo".into(),
                        })
                    } else {
                        Ok("ok")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn non_retryable_error_propagates_immediately() {
        let retry = Retry::new(Duration::from_secs(5));
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = attempts.clone();

        let result: Result<(), LymphError> = retry
            .execute(move || {
                let attempts = attempts_clone.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(LymphError::Nack {
                        request_id: uuid::Uuid::nil(),
                    })
                }
            })
            .await;

        assert!(matches!(result, Err(LymphError::Nack { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exceeding_deadline_yields_timeout() {
        let retry = Retry::new(Duration::from_millis(50)).with_delay(Duration::from_millis(10));
        let result: Result<(), LymphError> = retry
            .execute(|| async {
                Err(LymphError::NotConnected {
                    service: "echo".into(),
                })
            })
            .await;
        assert!(matches!(result, Err(LymphError::Timeout { .. })));
    }
}
