use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinError;
use tracing::{debug, error, info, warn};

use crate::handler::{self, JobContext, JobError, JobResult};
use crate::job::JobRecord;
use crate::retry::{self, RetryPolicy, Transition};
use crate::storage::{Collection, JobStore};

/// Upper bound on the pause between retried writes of a settled record.
const MAX_PERSIST_BACKOFF: Duration = Duration::from_secs(30);

/// Runs one job record to its next resting place.
pub(crate) struct Executor {
    ctx: JobContext,
    store: Arc<dyn JobStore>,
    policy: RetryPolicy,
    timeout: Duration,
    error_backoff: Duration,
    default_max_attempts: u32,
}

impl Executor {
    pub fn new(
        ctx: JobContext,
        policy: RetryPolicy,
        timeout: Duration,
        error_backoff: Duration,
        default_max_attempts: u32,
    ) -> Self {
        let store = Arc::clone(ctx.store());
        Self {
            ctx,
            store,
            policy,
            timeout,
            error_backoff,
            default_max_attempts,
        }
    }

    /// Executes a member already removed from `pending` by the caller.
    pub async fn execute(&self, member: String) {
        let mut record = match JobRecord::from_member(&member) {
            Ok(record) => record,
            Err(e) => {
                self.settle_malformed(&member, e.to_string()).await;
                return;
            }
        };

        record.begin_attempt();
        debug!(
            job_id = %record.id,
            job_type = record.type_name(),
            attempts = record.attempts,
            "Processing job"
        );

        let outcome = self.invoke(&record).await.map_err(|e| e.to_string());
        let transition = retry::settle(record, outcome, Utc::now(), &self.policy);
        log_transition(&transition);

        match transition.record.to_member() {
            Ok(member) => {
                self.persist(transition.collection, &member, transition.score)
                    .await
            }
            Err(e) => error!(job_id = %transition.record.id, error = %e, "Failed to serialize job"),
        }
    }

    /// Runs the handler on its own task so a timeout or panic cannot take the
    /// caller with it. A timed-out handler is detached, not aborted.
    async fn invoke(&self, record: &JobRecord) -> JobResult {
        let ctx = self.ctx.clone();
        let kind = record.kind.clone();
        let handle = tokio::spawn(async move { handler::dispatch(&ctx, &kind).await });

        let join_to_error = |e: JoinError| {
            if e.is_panic() {
                JobError::Panicked
            } else {
                JobError::Execution("Handler cancelled".to_string())
            }
        };

        match tokio::time::timeout(self.timeout, handle).await {
            Ok(joined) => joined.map_err(join_to_error)?,
            Err(_) => Err(JobError::Timeout),
        }
    }

    async fn settle_malformed(&self, member: &str, reason: String) {
        let (collection, score, annotated) = retry::settle_malformed(
            member,
            format!("Malformed job record: {reason}"),
            Utc::now(),
            &self.policy,
            self.default_max_attempts,
        );
        warn!(collection = %collection, error = %reason, "Malformed job record");
        self.persist(collection, &annotated, score).await;
    }

    /// Writes the settled record, retrying until the store accepts it. The
    /// job keeps its concurrency slot meanwhile, so an outage stalls the loop
    /// instead of losing records.
    async fn persist(&self, collection: Collection, member: &str, score: i64) {
        let mut backoff = self.error_backoff.max(Duration::from_millis(10));
        let mut attempt: u32 = 1;
        loop {
            match self.store.enqueue(collection, member, score).await {
                Ok(()) => {
                    if attempt > 1 {
                        info!(collection = %collection, attempts = attempt, "Stored settled job after retries");
                    }
                    return;
                }
                Err(e) => {
                    warn!(
                        collection = %collection,
                        attempt = attempt,
                        retry_in_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Failed to store settled job"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2).min(MAX_PERSIST_BACKOFF);
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }
}

fn log_transition(transition: &Transition) {
    let record = &transition.record;
    match transition.collection {
        Collection::Completed => info!(
            job_id = %record.id,
            job_type = record.type_name(),
            attempts = record.attempts,
            "Job completed"
        ),
        Collection::Pending => warn!(
            job_id = %record.id,
            job_type = record.type_name(),
            attempts = record.attempts,
            max_attempts = record.max_attempts,
            retry_at = %record.scheduled_at,
            error = record.error.as_deref().unwrap_or_default(),
            "Job failed, scheduling retry"
        ),
        Collection::Failed => warn!(
            job_id = %record.id,
            job_type = record.type_name(),
            attempts = record.attempts,
            error = record.error.as_deref().unwrap_or_default(),
            "Job failed permanently"
        ),
    }
}
