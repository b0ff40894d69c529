//! Exponential backoff for idempotent remote reads.

use std::{future::Future, time::Duration};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Policy {
    /// Attempts on top of the first one. Zero disables retrying.
    pub retries: u32,
    /// Delay before the first retry, doubled for every following one.
    pub delay: Duration,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            retries: 2,
            delay: Duration::from_millis(500),
        }
    }
}

impl Policy {
    pub fn none() -> Self {
        Self {
            retries: 0,
            delay: Duration::ZERO,
        }
    }

    fn delay_for(&self, retry: u32) -> Duration {
        self.delay.saturating_mul(2u32.saturating_pow(retry))
    }

    /// Runs `operation` until it succeeds, fails with an error `is_transient`
    /// rejects, or the retries are exhausted. The last error is returned.
    pub async fn run<T, E, F, Fut>(
        &self,
        name: &str,
        mut operation: F,
        is_transient: impl Fn(&E) -> bool,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut retry = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if retry < self.retries && is_transient(&err) => {
                    let delay = self.delay_for(retry);
                    tracing::debug!(%name, %err, ?delay, retry, "retrying");
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        std::sync::atomic::{AtomicU32, Ordering},
    };

    #[test]
    fn doubles_the_delay() {
        let policy = Policy::default();
        assert_eq!(policy.delay_for(0), Duration::from_millis(500));
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_errors_until_exhausted() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = Policy::default()
            .run(
                "test",
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("node down".to_string())
                },
                |_| true,
            )
            .await;
        assert_eq!(result.unwrap_err(), "node down");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_on_permanent_errors_and_success() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = Policy::default()
            .run(
                "test",
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("reverted".to_string())
                },
                |_| false,
            )
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = Policy::default()
            .run(
                "test",
                || async {
                    match calls.fetch_add(1, Ordering::SeqCst) {
                        0 => Err("flaky".to_string()),
                        n => Ok(n),
                    }
                },
                |_| true,
            )
            .await;
        assert_eq!(result.unwrap(), 1);
    }
}
