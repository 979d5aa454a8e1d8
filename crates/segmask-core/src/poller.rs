//! Fixed-interval polling of a single job.

use crate::error::{SegmaskError, SegmaskResult};
use crate::transport::{JobToken, PollStatus, Transport};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How long to wait for one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self { max_attempts: 30, interval: Duration::from_secs(2) }
    }
}

impl PollPolicy {
    /// Upper bound on the time spent sleeping between polls.
    pub fn budget(&self) -> Duration {
        self.interval * self.max_attempts.saturating_sub(1)
    }

    /// A policy that never polls can only time out, so it is refused.
    pub fn validate(&self) -> SegmaskResult<()> {
        if self.max_attempts == 0 {
            return Err(SegmaskError::validation("poll max_attempts must be at least 1"));
        }
        Ok(())
    }
}

/// How a polling sequence ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Ready(Vec<String>),
    /// All attempts used without a ready result.
    TimedOut { attempts: u32 },
    Cancelled,
}

#[derive(Debug, Clone, Default)]
pub struct JobPoller {
    policy: PollPolicy,
}

impl JobPoller {
    pub fn new(policy: PollPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> PollPolicy {
        self.policy
    }

    /// Polls until the job is ready, attempts run out, or `cancel` fires.
    ///
    /// Transport and protocol errors are logged and retried like a pending
    /// answer; only running out of attempts fails the job.
    pub async fn wait(
        &self,
        transport: &dyn Transport,
        endpoint: &str,
        token: &JobToken,
        cancel: &CancellationToken,
    ) -> PollOutcome {
        let max_attempts = self.policy.max_attempts;

        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                debug!(token = %token, attempt, "Polling cancelled");
                return PollOutcome::Cancelled;
            }

            match transport.poll(endpoint, token).await {
                Ok(PollStatus::Ready(urls)) => {
                    debug!(token = %token, attempt, images = urls.len(), "Job ready");
                    return PollOutcome::Ready(urls);
                }
                Ok(PollStatus::Pending) => {
                    debug!(token = %token, attempt, max_attempts, "Job still processing");
                }
                Err(e) => {
                    warn!(token = %token, attempt, error = %e, "Error checking job result");
                }
            }

            if attempt < max_attempts {
                tokio::select! {
                    () = cancel.cancelled() => {
                        debug!(token = %token, attempt, "Polling cancelled while waiting");
                        return PollOutcome::Cancelled;
                    }
                    () = tokio::time::sleep(self.policy.interval) => {}
                }
            }
        }

        warn!(token = %token, attempts = max_attempts, "No result received");
        PollOutcome::TimedOut { attempts: max_attempts }
    }
}
