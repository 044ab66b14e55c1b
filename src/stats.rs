use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::services::MonitoringSink;
use crate::storage::{Collection, JobStore, Result};
use crate::worker::ActiveJobs;

/// Point-in-time queue health.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
}

/// Combines store cardinalities with the in-process active count.
#[derive(Clone)]
pub struct StatsReporter {
    store: Arc<dyn JobStore>,
    active: ActiveJobs,
}

impl StatsReporter {
    pub(crate) fn new(store: Arc<dyn JobStore>, active: ActiveJobs) -> Self {
        Self { store, active }
    }

    pub async fn snapshot(&self) -> Result<QueueStats> {
        Ok(QueueStats {
            pending: self.store.count(Collection::Pending).await?,
            active: self.active.get() as u64,
            completed: self.store.count(Collection::Completed).await?,
            failed: self.store.count(Collection::Failed).await?,
        })
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Pushes a snapshot to `sink` every `interval` until `shutdown` fires.
    pub(crate) fn spawn_monitor(
        self,
        sink: Arc<dyn MonitoringSink>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                match self.snapshot().await {
                    Ok(stats) => sink.record(stats).await,
                    Err(e) => warn!(error = %e, "Failed to collect queue stats"),
                }
            }
            info!("Stats monitor stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStore;
    use crate::testing::RecordingSink;

    #[tokio::test]
    async fn snapshot_counts_every_collection() {
        let store: Arc<dyn JobStore> = Arc::new(SqliteStore::in_memory().await.unwrap());
        store.enqueue(Collection::Pending, "a", 1).await.unwrap();
        store.enqueue(Collection::Pending, "b", 2).await.unwrap();
        store.enqueue(Collection::Completed, "c", 3).await.unwrap();
        store.enqueue(Collection::Failed, "d", 4).await.unwrap();

        let stats = StatsReporter::new(store, ActiveJobs::default())
            .snapshot()
            .await
            .unwrap();

        assert_eq!(
            stats,
            QueueStats {
                pending: 2,
                active: 0,
                completed: 1,
                failed: 1,
            }
        );
    }

    #[tokio::test]
    async fn monitor_feeds_the_sink_until_shutdown() {
        let store: Arc<dyn JobStore> = Arc::new(SqliteStore::in_memory().await.unwrap());
        let sink = Arc::new(RecordingSink::default());
        let shutdown = CancellationToken::new();

        let handle = StatsReporter::new(store, ActiveJobs::default()).spawn_monitor(
            sink.clone(),
            Duration::from_millis(20),
            shutdown.clone(),
        );

        tokio::time::sleep(Duration::from_millis(90)).await;
        shutdown.cancel();
        handle.await.unwrap();

        let seen = sink.snapshots();
        assert!(seen.len() >= 2, "expected several snapshots, got {}", seen.len());
        assert!(seen.iter().all(|s| *s == QueueStats::default()));
    }
}
