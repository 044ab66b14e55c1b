use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Mutex;

use chrono::Utc;
use cron::Schedule;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::job::{CleanupArgs, JobKind, ReportArgs, SweepArgs};
use crate::producer::{EnqueueOptions, JobProducer};
use crate::QueueError;

/// A named cron trigger that enqueues a fresh job each time it fires.
#[derive(Debug, Clone, PartialEq)]
pub struct RecurringJob {
    pub name: String,
    pub cron: String,
    pub kind: JobKind,
}

impl RecurringJob {
    pub fn new(name: impl Into<String>, cron: impl Into<String>, kind: JobKind) -> Self {
        Self {
            name: name.into(),
            cron: cron.into(),
            kind,
        }
    }
}

/// Definitions installed at startup.
pub fn standard_schedules() -> Vec<RecurringJob> {
    vec![
        RecurringJob::new(
            "daily_cleanup",
            "0 2 * * *",
            JobKind::CleanupExpiredTokens(CleanupArgs::default()),
        ),
        RecurringJob::new(
            "daily_stats",
            "0 1 * * *",
            JobKind::DailyStats(ReportArgs::default()),
        ),
        RecurringJob::new(
            "weekly_reports",
            "0 9 * * Mon",
            JobKind::WeeklyReports(ReportArgs::default()),
        ),
        RecurringJob::new(
            "rental_reminders",
            "0 10 * * *",
            JobKind::ReminderSweep(SweepArgs::default()),
        ),
    ]
}

/// Parses a cron expression. Five-field expressions get a leading seconds
/// field of `0`; six and seven fields are passed through.
pub fn parse_schedule(expression: &str) -> Result<Schedule, QueueError> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    let normalized = match fields.len() {
        5 => format!("0 {}", fields.join(" ")),
        6 | 7 => fields.join(" "),
        n => {
            return Err(QueueError::InvalidCron {
                expression: expression.to_string(),
                reason: format!("expected 5 to 7 fields, got {n}"),
            })
        }
    };

    Schedule::from_str(&normalized).map_err(|e| QueueError::InvalidCron {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

struct Registration {
    cron: String,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the running cron triggers, one per name.
pub struct RecurringRegistry {
    producer: JobProducer,
    shutdown: CancellationToken,
    registrations: Mutex<HashMap<String, Registration>>,
}

impl RecurringRegistry {
    pub(crate) fn new(producer: JobProducer, shutdown: CancellationToken) -> Self {
        Self {
            producer,
            shutdown,
            registrations: Mutex::new(HashMap::new()),
        }
    }

    /// Installs `job`, stopping any earlier schedule registered under the
    /// same name. Must be called from within a Tokio runtime.
    pub fn register(&self, job: RecurringJob) -> Result<(), QueueError> {
        let schedule = parse_schedule(&job.cron)?;
        let cancel = self.shutdown.child_token();
        let handle = tokio::spawn(run_schedule(
            job.name.clone(),
            schedule,
            job.kind,
            self.producer.clone(),
            cancel.clone(),
        ));

        let previous = self
            .registrations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                job.name.clone(),
                Registration {
                    cron: job.cron.clone(),
                    cancel,
                    handle,
                },
            );

        if let Some(previous) = previous {
            previous.cancel.cancel();
            info!(name = %job.name, old = %previous.cron, new = %job.cron, "Replaced recurring job");
        } else {
            info!(name = %job.name, cron = %job.cron, "Registered recurring job");
        }
        Ok(())
    }

    /// Stops future triggers for `name`. Jobs it already enqueued stay queued.
    pub fn stop(&self, name: &str) -> bool {
        let removed = self
            .registrations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name);

        match removed {
            Some(registration) => {
                registration.cancel.cancel();
                info!(name = name, "Stopped recurring job");
                true
            }
            None => false,
        }
    }

    pub fn stop_all(&self) {
        let drained: Vec<_> = self
            .registrations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .collect();

        for (_, registration) in drained {
            registration.cancel.cancel();
        }
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .registrations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(_, r)| !r.handle.is_finished())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }
}

async fn run_schedule(
    name: String,
    schedule: Schedule,
    kind: JobKind,
    producer: JobProducer,
    cancel: CancellationToken,
) {
    loop {
        let Some(next) = schedule.upcoming(Utc).next() else {
            info!(name = %name, "Recurring job has no upcoming trigger");
            break;
        };
        let wait = (next - Utc::now()).to_std().unwrap_or_default();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }

        match producer
            .enqueue(kind.clone(), EnqueueOptions::default())
            .await
        {
            Ok(record) => debug!(name = %name, job_id = %record.id, "Recurring job fired"),
            Err(e) => error!(name = %name, error = %e, "Failed to enqueue recurring job"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobRecord;
    use crate::storage::{Collection, JobStore, SqliteStore};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Notify;

    async fn registry() -> (RecurringRegistry, Arc<dyn JobStore>) {
        let store: Arc<dyn JobStore> = Arc::new(SqliteStore::in_memory().await.unwrap());
        let producer = JobProducer::new(Arc::clone(&store), Arc::new(Notify::new()), 3);
        (
            RecurringRegistry::new(producer, CancellationToken::new()),
            store,
        )
    }

    async fn pending_kinds(store: &Arc<dyn JobStore>) -> Vec<JobKind> {
        store
            .pop_due(Collection::Pending, i64::MAX, 100)
            .await
            .unwrap()
            .iter()
            .map(|m| JobRecord::from_member(m).unwrap().kind)
            .collect()
    }

    #[test]
    fn five_field_expressions_are_accepted() {
        let schedule = parse_schedule("*/5 * * * *").unwrap();
        let next = schedule.upcoming(Utc).next().unwrap();
        assert_eq!(next.timestamp() % 300, 0);
    }

    #[test]
    fn six_field_expressions_are_accepted() {
        assert!(parse_schedule("*/10 * * * * *").is_ok());
    }

    #[test]
    fn malformed_expressions_are_rejected() {
        assert!(matches!(
            parse_schedule("every day"),
            Err(QueueError::InvalidCron { .. })
        ));
        assert!(parse_schedule("61 * * * *").is_err());
    }

    #[test]
    fn standard_schedules_parse() {
        let schedules = standard_schedules();
        assert_eq!(schedules.len(), 4);
        for job in schedules {
            parse_schedule(&job.cron).unwrap();
        }
    }

    #[tokio::test]
    async fn firing_enqueues_one_job() {
        let (registry, store) = registry().await;
        registry
            .register(RecurringJob::new(
                "stats",
                "* * * * * *",
                JobKind::DailyStats(ReportArgs::default()),
            ))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(1_300)).await;
        registry.stop_all();

        let kinds = pending_kinds(&store).await;
        assert!(!kinds.is_empty());
        assert!(kinds
            .iter()
            .all(|k| *k == JobKind::DailyStats(ReportArgs::default())));
    }

    #[tokio::test]
    async fn re_registering_replaces_the_schedule() {
        let (registry, store) = registry().await;
        registry
            .register(RecurringJob::new(
                "daily_cleanup",
                "* * * * * *",
                JobKind::DailyStats(ReportArgs::default()),
            ))
            .unwrap();
        registry
            .register(RecurringJob::new(
                "daily_cleanup",
                "*/2 * * * * *",
                JobKind::CleanupExpiredTokens(CleanupArgs::default()),
            ))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(4_300)).await;
        registry.stop_all();

        let records: Vec<JobRecord> = store
            .pop_due(Collection::Pending, i64::MAX, 100)
            .await
            .unwrap()
            .iter()
            .map(|m| JobRecord::from_member(m).unwrap())
            .collect();

        // An every-second schedule would have fired four times by now.
        assert!((1..=3).contains(&records.len()), "fired {} times", records.len());
        for record in &records {
            assert!(matches!(record.kind, JobKind::CleanupExpiredTokens(_)));
            assert_eq!(record.created_at.timestamp() % 2, 0);
        }
        assert!(registry.names().is_empty());
    }

    #[tokio::test]
    async fn stop_cancels_future_triggers_only() {
        let (registry, store) = registry().await;
        registry
            .register(RecurringJob::new(
                "stats",
                "* * * * * *",
                JobKind::DailyStats(ReportArgs::default()),
            ))
            .unwrap();
        assert_eq!(registry.names(), vec!["stats".to_string()]);

        tokio::time::sleep(Duration::from_millis(1_300)).await;
        assert!(registry.stop("stats"));
        assert!(!registry.stop("stats"));

        let fired = pending_kinds(&store).await.len();
        tokio::time::sleep(Duration::from_millis(1_200)).await;
        assert_eq!(pending_kinds(&store).await.len(), fired);
    }
}
