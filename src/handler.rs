use std::sync::Arc;

use crate::job::JobKind;
use crate::jobs;
use crate::producer::JobProducer;
use crate::services::{Collaborators, Notifier, PaymentGateway, Repository, RepositoryError};
use crate::storage::{JobStore, StorageError};
use crate::QueueError;

/// Why a single execution attempt failed.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("Notification failed: {0}")]
    Notification(anyhow::Error),

    #[error("Payment failed: {0}")]
    Payment(anyhow::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Enqueue failed: {0}")]
    Enqueue(#[from] QueueError),

    #[error("timeout")]
    Timeout,

    #[error("Handler panicked")]
    Panicked,

    #[error("Execution error: {0}")]
    Execution(String),
}

pub type JobResult = Result<(), JobError>;

/// Everything a handler may touch while it runs.
#[derive(Clone)]
pub struct JobContext {
    pub repository: Arc<dyn Repository>,
    pub notifier: Arc<dyn Notifier>,
    pub payments: Arc<dyn PaymentGateway>,
    /// Enqueue handle for handlers that fan out follow-up jobs.
    pub producer: JobProducer,
    /// Age after which completed/failed job records are pruned.
    pub retention: chrono::Duration,
}

impl JobContext {
    pub fn new(
        collaborators: Collaborators,
        producer: JobProducer,
        retention: chrono::Duration,
    ) -> Self {
        Self {
            repository: collaborators.repository,
            notifier: collaborators.notifier,
            payments: collaborators.payments,
            producer,
            retention,
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        self.producer.store()
    }
}

/// Runs the handler registered for `kind`.
pub async fn dispatch(ctx: &JobContext, kind: &JobKind) -> JobResult {
    match kind {
        JobKind::SendEmail(email) => jobs::email::send(ctx, email).await,
        JobKind::RentalReminder(args) => jobs::reminder::remind(ctx, args).await,
        JobKind::ReviewRequest(args) => jobs::review::request_review(ctx, args).await,
        JobKind::PaymentProcessing(request) => jobs::payment::process(ctx, request).await,
        JobKind::CleanupExpiredTokens(args) => jobs::cleanup::cleanup(ctx, args).await,
        JobKind::DailyStats(args) => jobs::reports::daily_stats(ctx, args).await,
        JobKind::WeeklyReports(args) => jobs::reports::weekly_report(ctx, args).await,
        JobKind::ReminderSweep(args) => jobs::reminder::sweep(ctx, args).await,
    }
}
