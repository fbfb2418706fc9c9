use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::ScrapeError;
use crate::model::ScrapeJob;
use crate::report::{Reporter, ScrapeEvent};
use crate::retry::{RetryDecision, RetryPolicy};

/// How often idle workers and [`ScrapePool::idle`] re-check the queue.
const IDLE_POLL: Duration = Duration::from_millis(25);

/// Executes one job on one worker slot. The production implementation
/// drives a browser; tests script outcomes directly.
#[async_trait]
pub trait JobRunner: Send + Sync + 'static {
    /// Runs the job, returning the number of records collected.
    async fn run(&self, slot: usize, job: &ScrapeJob) -> Result<usize, ScrapeError>;

    /// Releases per-slot resources when the pool shuts down.
    async fn close(&self) {}
}

/// Totals reported once the batch is over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchStats {
    pub succeeded: usize,
    pub failed: usize,
}

struct PoolShared<R> {
    /// FIFO of pending jobs; retries go to the back.
    queue: Mutex<VecDeque<ScrapeJob>>,
    /// Cards finished this run; never dispatched twice. Scoped to the pool,
    /// discarded with it.
    scraped: Mutex<HashSet<i64>>,
    /// Jobs claimed but not yet finished (including retry back-off waits).
    in_flight: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    runner: R,
    policy: RetryPolicy,
    reporter: Reporter,
    cancel: CancellationToken,
}

/// Bounded-concurrency scheduler for scrape jobs.
///
/// Workers pull from a shared FIFO queue; each owns one runner slot (one
/// browser session) for the pool's lifetime. Failures funnel through the
/// retry policy, so no job is ever silently lost nor retried forever, and
/// no job failure can take the batch down.
pub struct ScrapePool<R: JobRunner> {
    shared: Arc<PoolShared<R>>,
    workers: Vec<JoinHandle<()>>,
}

impl<R: JobRunner> ScrapePool<R> {
    /// Spawns `concurrency` workers (at least one) over the given runner.
    pub fn start(concurrency: usize, runner: R, policy: RetryPolicy, reporter: Reporter) -> Self {
        let shared = Arc::new(PoolShared {
            queue: Mutex::new(VecDeque::new()),
            scraped: Mutex::new(HashSet::new()),
            in_flight: AtomicUsize::new(0),
            succeeded: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            runner,
            policy,
            reporter,
            cancel: CancellationToken::new(),
        });
        let workers = (0..concurrency.max(1))
            .map(|slot| tokio::spawn(worker_loop(slot, Arc::clone(&shared))))
            .collect();
        Self { shared, workers }
    }

    /// Adds a job to the back of the queue.
    pub async fn enqueue(&self, job: ScrapeJob) {
        self.shared.queue.lock().await.push_back(job);
    }

    /// Resolves when the queue is empty and nothing is in flight. Retry
    /// back-off counts as in flight, so a pending requeue holds this open.
    pub async fn idle(&self) {
        loop {
            let drained = self.shared.queue.lock().await.is_empty()
                && self.shared.in_flight.load(Ordering::SeqCst) == 0;
            if drained {
                return;
            }
            tokio::time::sleep(IDLE_POLL).await;
        }
    }

    /// Stops the workers, releases the runner's resources and reports the
    /// batch totals.
    pub async fn close(self) -> BatchStats {
        self.shared.cancel.cancel();
        for worker in self.workers {
            let _ = worker.await;
        }
        self.shared.runner.close().await;

        let stats = BatchStats {
            succeeded: self.shared.succeeded.load(Ordering::SeqCst),
            failed: self.shared.failed.load(Ordering::SeqCst),
        };
        self.shared.reporter.send(ScrapeEvent::BatchComplete {
            succeeded: stats.succeeded,
            failed: stats.failed,
        });
        info!(
            succeeded = stats.succeeded,
            failed = stats.failed,
            "batch complete"
        );
        stats
    }
}

async fn worker_loop<R: JobRunner>(slot: usize, shared: Arc<PoolShared<R>>) {
    loop {
        if shared.cancel.is_cancelled() {
            break;
        }

        // Claim before popping so `idle` never sees an empty queue while a
        // just-popped job has not been counted yet.
        shared.in_flight.fetch_add(1, Ordering::SeqCst);
        let job = match shared.queue.lock().await.pop_front() {
            Some(job) => job,
            None => {
                shared.in_flight.fetch_sub(1, Ordering::SeqCst);
                tokio::select! {
                    _ = tokio::time::sleep(IDLE_POLL) => {}
                    _ = shared.cancel.cancelled() => break,
                }
                continue;
            }
        };

        if shared.scraped.lock().await.contains(&job.card.id) {
            debug!(card_id = job.card.id, "already scraped this run, skipping");
            shared.in_flight.fetch_sub(1, Ordering::SeqCst);
            continue;
        }

        shared.reporter.send(ScrapeEvent::JobStarted {
            card_name: job.card.product_name.clone(),
            condition: job.card.condition.clone(),
            printing: job.card.printing.clone(),
            index: job.index,
            total: job.total,
            attempt: job.attempt,
        });
        info!(
            card = %job.card.product_name,
            attempt = job.attempt,
            slot,
            "job started"
        );

        match shared.runner.run(slot, &job).await {
            Ok(records) => {
                shared.scraped.lock().await.insert(job.card.id);
                shared.succeeded.fetch_add(1, Ordering::SeqCst);
                shared.reporter.send(ScrapeEvent::JobSucceeded {
                    card_name: job.card.product_name.clone(),
                    records,
                });
            }
            Err(err) => match shared.policy.decide(&job, &err) {
                RetryDecision::Retry(backoff) => {
                    warn!(
                        card = %job.card.product_name,
                        attempt = job.attempt,
                        error = %err,
                        "job failed, re-queuing"
                    );
                    shared.reporter.send(ScrapeEvent::JobFailed {
                        card_name: job.card.product_name.clone(),
                        attempt: job.attempt,
                        reason: err.to_string(),
                        requeued: true,
                    });
                    // Back off while still counted in flight; `idle` must
                    // not resolve with a requeue pending.
                    tokio::time::sleep(backoff).await;
                    shared
                        .queue
                        .lock()
                        .await
                        .push_back(job.with_incremented_attempt());
                }
                RetryDecision::Fatal => {
                    error!(
                        card = %job.card.product_name,
                        attempt = job.attempt,
                        error = %err,
                        "job dropped"
                    );
                    shared.failed.fetch_add(1, Ordering::SeqCst);
                    shared.reporter.send(ScrapeEvent::JobFailed {
                        card_name: job.card.product_name.clone(),
                        attempt: job.attempt,
                        reason: err.to_string(),
                        requeued: false,
                    });
                }
            },
        }
        shared.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
