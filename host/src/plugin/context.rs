use crate::error::{PluginError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Deadline carried by every plugin call.
///
/// Expiry of the deadline is the only cancellation signal a call gets.
#[derive(Debug, Clone, Copy)]
pub struct CallContext {
    deadline: Instant,
    timeout: Duration,
}

impl CallContext {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            timeout,
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// The timeout this context was created with.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Runs `fut` until it completes or the deadline passes.
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout_at(self.deadline, fut).await {
            Ok(result) => result,
            Err(_) => Err(PluginError::Timeout(self.timeout)),
        }
    }
}
