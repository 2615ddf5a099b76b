//! Fixed-backoff retry for job API calls

use crate::error::ClusterError;
use crate::observability::GangMetrics;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Delay between attempts when none is configured
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(20);

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub backoff: Duration,
    /// `None` retries transient failures forever
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: DEFAULT_RETRY_BACKOFF,
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    pub fn new(backoff: Duration, max_attempts: Option<u32>) -> Self {
        Self {
            backoff,
            max_attempts,
        }
    }

    /// Run `call` until it succeeds, fails permanently, or attempts run out
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, ClusterError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClusterError>>,
    {
        let metrics = GangMetrics::new();
        let mut attempt = 1u32;

        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() => {
                    if self.max_attempts.is_some_and(|max| attempt >= max) {
                        warn!(operation, attempt, error = %e, "Giving up on job call");
                        return Err(e);
                    }
                    warn!(
                        operation,
                        attempt,
                        backoff_ms = self.backoff.as_millis() as u64,
                        error = %e,
                        "Job call failed, retrying"
                    );
                    metrics.inc_job_retries();
                    tokio::time::sleep(self.backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
