use std::sync::Arc;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::config::QueueConfig;
use crate::executor::Executor;
use crate::handler::JobContext;
use crate::job::{JobKind, JobRecord};
use crate::producer::{EnqueueOptions, JobProducer};
use crate::recurring::{self, RecurringJob, RecurringRegistry};
use crate::retry::RetryPolicy;
use crate::services::{Collaborators, MonitoringSink};
use crate::stats::{QueueStats, StatsReporter};
use crate::storage::{self, JobStore};
use crate::worker::{ActiveJobs, Worker, WorkerSettings};
use crate::QueueError;

/// One per process: owns the store, the scheduler loop, the recurring
/// triggers and the stats source.
pub struct JobQueue {
    store: Arc<dyn JobStore>,
    config: QueueConfig,
    producer: JobProducer,
    active: ActiveJobs,
    wakeup: Arc<Notify>,
    shutdown: CancellationToken,
    recurring: RecurringRegistry,
    monitoring: Option<Arc<dyn MonitoringSink>>,
    worker_handle: Option<JoinHandle<()>>,
    monitor_handle: Option<JoinHandle<()>>,
}

impl JobQueue {
    pub fn new(store: Arc<dyn JobStore>, config: QueueConfig) -> Result<Self, QueueError> {
        config.validate()?;

        let wakeup = Arc::new(Notify::new());
        let shutdown = CancellationToken::new();
        let producer = JobProducer::new(Arc::clone(&store), Arc::clone(&wakeup), config.max_retries);
        let recurring = RecurringRegistry::new(producer.clone(), shutdown.clone());

        Ok(Self {
            store,
            config,
            producer,
            active: ActiveJobs::default(),
            wakeup,
            shutdown,
            recurring,
            monitoring: None,
            worker_handle: None,
            monitor_handle: None,
        })
    }

    /// Builds the configured store backend and a queue on top of it.
    pub async fn connect(config: QueueConfig) -> Result<Self, QueueError> {
        config.validate()?;
        let store = storage::connect(&config.store).await?;
        Self::new(store, config)
    }

    /// Stats snapshots are pushed to `sink` every `statsIntervalMs` once the
    /// queue is started.
    pub fn with_monitoring(mut self, sink: Arc<dyn MonitoringSink>) -> Self {
        self.monitoring = Some(sink);
        self
    }

    pub fn producer(&self) -> JobProducer {
        self.producer.clone()
    }

    pub async fn enqueue(&self, kind: JobKind, options: EnqueueOptions) -> Result<JobRecord, QueueError> {
        self.producer.enqueue(kind, options).await
    }

    /// Spawns the scheduler loop, installs the standard recurring jobs and,
    /// if a sink is attached, the stats monitor.
    pub fn start(&mut self, collaborators: Collaborators) -> Result<(), QueueError> {
        if self.worker_handle.is_some() || self.shutdown.is_cancelled() {
            return Err(QueueError::AlreadyStarted);
        }

        let ctx = JobContext::new(collaborators, self.producer.clone(), self.config.retention());
        let executor = Executor::new(
            ctx,
            RetryPolicy::new(self.config.retry_delay()),
            self.config.job_timeout(),
            self.config.error_backoff(),
            self.config.max_retries,
        );
        let worker = Worker::new(
            Arc::clone(&self.store),
            executor,
            self.active.clone(),
            Arc::clone(&self.wakeup),
            TaskTracker::new(),
            WorkerSettings {
                concurrency: self.config.concurrency,
                poll_interval: self.config.poll_interval(),
                error_backoff: self.config.error_backoff(),
            },
        );

        let shutdown = self.shutdown.clone();
        self.worker_handle = Some(tokio::spawn(async move {
            worker.run(shutdown).await;
        }));

        for job in recurring::standard_schedules() {
            self.recurring.register(job)?;
        }

        if let Some(sink) = self.monitoring.clone() {
            self.monitor_handle = Some(self.stats_reporter().spawn_monitor(
                sink,
                self.config.stats_interval(),
                self.shutdown.clone(),
            ));
        }

        info!(
            concurrency = self.config.concurrency,
            max_retries = self.config.max_retries,
            "Job queue started"
        );
        Ok(())
    }

    pub fn register_recurring(&self, job: RecurringJob) -> Result<(), QueueError> {
        self.recurring.register(job)
    }

    pub fn stop_recurring(&self, name: &str) -> bool {
        self.recurring.stop(name)
    }

    pub fn recurring_jobs(&self) -> Vec<String> {
        self.recurring.names()
    }

    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        Ok(self.stats_reporter().snapshot().await?)
    }

    pub fn stats_reporter(&self) -> StatsReporter {
        StatsReporter::new(Arc::clone(&self.store), self.active.clone())
    }

    pub fn health_router(&self) -> axum::Router {
        crate::health::router(self.stats_reporter())
    }

    /// Stops taking new jobs and recurring triggers, then waits for the jobs
    /// already running to settle.
    pub async fn shutdown(&mut self) {
        info!(in_flight = self.active.get(), "Shutting down job queue");
        self.shutdown.cancel();
        self.recurring.stop_all();

        if let Some(handle) = self.worker_handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Worker task ended abnormally");
            }
        }
        if let Some(handle) = self.monitor_handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Stats monitor ended abnormally");
            }
        }

        info!("Job queue stopped");
    }

    /// Runs until Ctrl+C, then shuts down.
    pub async fn wait_for_shutdown(&mut self) {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
        }
        self.shutdown().await;
    }
}
