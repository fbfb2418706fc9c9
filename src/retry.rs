use std::time::Duration;

use crate::error::ScrapeError;
use crate::model::ScrapeJob;

/// What to do with a job that just failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-enqueue a fresh copy after the back-off.
    Retry(Duration),
    /// Attempt ceiling reached or the failure is not transient; drop the
    /// job and move on with the batch.
    Fatal,
}

/// Requeue policy for failed scrape jobs.
///
/// The back-off is fixed rather than exponential: retries here recover from
/// flaky page state, not from load, and the pool's concurrency is too low
/// for a thundering herd.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// Classifies one failure. Every failure path in the pipeline (the
    /// load-more loop, the whole-job scope and the session-level guard)
    /// funnels through here, so a job is never silently lost nor retried
    /// past the ceiling.
    pub fn decide(&self, job: &ScrapeJob, error: &ScrapeError) -> RetryDecision {
        if !error.is_recoverable() {
            return RetryDecision::Fatal;
        }
        if job.attempt >= self.max_attempts {
            return RetryDecision::Fatal;
        }
        RetryDecision::Retry(self.backoff)
    }
}
