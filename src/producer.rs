use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tracing::debug;

use crate::job::{JobKind, JobRecord};
use crate::storage::{Collection, JobStore};
use crate::QueueError;

/// Per-call enqueue settings.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    pub delay: Option<Duration>,
    pub run_at: Option<DateTime<Utc>>,
    pub max_attempts: Option<u32>,
}

impl EnqueueOptions {
    pub fn delayed(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn at(run_at: DateTime<Utc>) -> Self {
        Self {
            run_at: Some(run_at),
            ..Self::default()
        }
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    fn scheduled_at(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, QueueError> {
        match (self.run_at, self.delay) {
            (Some(run_at), _) => Ok(run_at),
            (None, Some(delay)) => chrono::Duration::from_std(delay)
                .ok()
                .and_then(|delay| now.checked_add_signed(delay))
                .ok_or_else(|| QueueError::ScheduleOutOfRange(format!("delay of {delay:?}"))),
            (None, None) => Ok(now),
        }
    }
}

/// Cloneable handle for putting work on the queue.
#[derive(Clone)]
pub struct JobProducer {
    store: Arc<dyn JobStore>,
    wakeup: Arc<Notify>,
    default_max_attempts: u32,
}

impl JobProducer {
    pub(crate) fn new(store: Arc<dyn JobStore>, wakeup: Arc<Notify>, default_max_attempts: u32) -> Self {
        Self {
            store,
            wakeup,
            default_max_attempts,
        }
    }

    pub async fn enqueue(&self, kind: JobKind, options: EnqueueOptions) -> Result<JobRecord, QueueError> {
        let now = Utc::now();
        let record = JobRecord::new(
            kind,
            options.scheduled_at(now)?,
            options.max_attempts.unwrap_or(self.default_max_attempts),
        );

        let member = record.to_member()?;
        self.store
            .enqueue(Collection::Pending, &member, record.due_score())
            .await?;
        self.wakeup.notify_one();

        debug!(
            job_id = %record.id,
            job_type = record.type_name(),
            scheduled_at = %record.scheduled_at,
            "Job enqueued"
        );
        Ok(record)
    }

    pub async fn enqueue_now(&self, kind: JobKind) -> Result<JobRecord, QueueError> {
        self.enqueue(kind, EnqueueOptions::default()).await
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }
}
