use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use crate::executor::Executor;
use crate::storage::{Collection, JobStore};

/// How long the loop waits before re-checking a full concurrency ceiling.
const SATURATED_RECHECK: Duration = Duration::from_secs(1);

/// Count of jobs dispatched and not yet settled.
#[derive(Clone, Default)]
pub struct ActiveJobs(Arc<AtomicUsize>);

impl ActiveJobs {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn acquire(&self) -> ActiveGuard {
        self.0.fetch_add(1, Ordering::SeqCst);
        ActiveGuard(Arc::clone(&self.0))
    }
}

struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct WorkerSettings {
    pub concurrency: usize,
    pub poll_interval: Duration,
    pub error_backoff: Duration,
}

/// The scheduler loop: finds due jobs in `pending` and hands them to the
/// executor, never running more than `concurrency` at once.
pub(crate) struct Worker {
    store: Arc<dyn JobStore>,
    executor: Arc<Executor>,
    active: ActiveJobs,
    wakeup: Arc<Notify>,
    tracker: TaskTracker,
    settings: WorkerSettings,
}

impl Worker {
    pub fn new(
        store: Arc<dyn JobStore>,
        executor: Executor,
        active: ActiveJobs,
        wakeup: Arc<Notify>,
        tracker: TaskTracker,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            store,
            executor: Arc::new(executor),
            active,
            wakeup,
            tracker,
            settings,
        }
    }

    /// Runs until `shutdown` fires, then waits for in-flight jobs to settle.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(concurrency = self.settings.concurrency, "Worker started");

        while !shutdown.is_cancelled() {
            if self.active.get() >= self.settings.concurrency {
                self.pause(&shutdown, SATURATED_RECHECK).await;
                continue;
            }

            match self.next_due().await {
                Ok(Some(member)) => self.dispatch(member, &shutdown).await,
                Ok(None) => self.pause(&shutdown, self.settings.poll_interval).await,
                Err(e) => {
                    error!(error = %e, "Failed to poll pending jobs");
                    self.pause(&shutdown, self.settings.error_backoff).await;
                }
            }
        }

        info!(in_flight = self.active.get(), "Worker shutting down");
        self.tracker.close();
        self.tracker.wait().await;
        info!("Worker stopped");
    }

    async fn next_due(&self) -> crate::storage::Result<Option<String>> {
        let now = Utc::now().timestamp_millis();
        let mut due = self.store.pop_due(Collection::Pending, now, 1).await?;
        Ok(due.pop())
    }

    /// Claims `member` by removing it from `pending`, then runs it in the
    /// background. A member someone else removed first is skipped.
    async fn dispatch(&self, member: String, shutdown: &CancellationToken) {
        match self.store.remove(Collection::Pending, &member).await {
            Ok(true) => {}
            Ok(false) => {
                debug!("Job already claimed by another consumer");
                return;
            }
            Err(e) => {
                error!(error = %e, "Failed to claim pending job");
                self.pause(shutdown, self.settings.error_backoff).await;
                return;
            }
        }

        let guard = self.active.acquire();
        let executor = Arc::clone(&self.executor);
        let wakeup = Arc::clone(&self.wakeup);
        self.tracker.spawn(async move {
            executor.execute(member).await;
            drop(guard);
            wakeup.notify_one();
        });
    }

    async fn pause(&self, shutdown: &CancellationToken, duration: Duration) {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {}
            _ = self.wakeup.notified() => {}
            _ = tokio::time::sleep(duration) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobKind, JobRecord, ReportArgs};
    use crate::retry::RetryPolicy;
    use crate::storage::SqliteStore;
    use crate::testing::{FlakyStore, Harness};

    #[test]
    fn guards_track_active_jobs() {
        let active = ActiveJobs::default();
        let first = active.acquire();
        let second = active.acquire();
        assert_eq!(active.get(), 2);

        drop(first);
        assert_eq!(active.get(), 1);
        drop(second);
        assert_eq!(active.get(), 0);
    }

    #[tokio::test]
    async fn failed_claim_backoff_yields_to_shutdown() {
        let flaky = Arc::new(FlakyStore::new(Arc::new(SqliteStore::in_memory().await.unwrap())));
        let harness = Harness::with_store(flaky.clone()).await;
        let record = JobRecord::new(JobKind::DailyStats(ReportArgs::default()), Utc::now(), 3);
        flaky
            .enqueue(Collection::Pending, &record.to_member().unwrap(), record.due_score())
            .await
            .unwrap();
        flaky.set_removes_failing(true);

        let long_backoff = Duration::from_secs(60);
        let executor = Executor::new(
            harness.ctx.clone(),
            RetryPolicy::new(Duration::from_millis(50)),
            Duration::from_secs(1),
            long_backoff,
            3,
        );
        let worker = Worker::new(
            flaky.clone(),
            executor,
            ActiveJobs::default(),
            Arc::new(Notify::new()),
            TaskTracker::new(),
            WorkerSettings {
                concurrency: 1,
                poll_interval: Duration::from_millis(20),
                error_backoff: long_backoff,
            },
        );

        let shutdown = CancellationToken::new();
        let running = tokio::spawn(worker.run(shutdown.clone()));
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(1), running)
            .await
            .expect("worker should stop promptly")
            .unwrap();
        assert_eq!(flaky.count(Collection::Pending).await.unwrap(), 1);
    }
}
