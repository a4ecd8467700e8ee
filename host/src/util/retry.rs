use std::fmt::Display;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

/// Capped exponential backoff, optionally bounded by a deadline.
#[derive(Debug, Clone)]
pub struct Backoff {
    /// Attempts in total, including the first one.
    pub attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub factor: u32,
    pub deadline: Option<Instant>,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            attempts: 4,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            factor: 2,
            deadline: None,
        }
    }
}

impl Backoff {
    pub fn new(attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            base_delay,
            max_delay,
            ..Self::default()
        }
    }

    pub fn until(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Delay to wait after the `attempt`-th failure (zero based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let scale = self.factor.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(scale)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// Whether sleeping `delay` more would run past the deadline.
    fn exceeds_deadline(&self, delay: Duration) -> bool {
        matches!(self.deadline, Some(deadline) if Instant::now() + delay >= deadline)
    }

    /// Runs `operation` until it succeeds or the budget is spent. The last
    /// error is returned on failure.
    pub async fn retry<F, Fut, T, E>(&self, what: &str, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut attempt = 0;
        loop {
            let err = match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(attempt, "{} succeeded after retrying", what);
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            let delay = self.delay_for(attempt);
            attempt += 1;
            if attempt >= self.attempts || self.exceeds_deadline(delay) {
                warn!(attempts = attempt, "{} gave up: {}", what, err);
                return Err(err);
            }

            debug!(attempt, ?delay, "{} failed, backing off: {}", what, err);
            sleep(delay).await;
        }
    }
}
