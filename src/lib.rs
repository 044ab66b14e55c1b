mod config;
mod error;
mod executor;
mod handler;
mod health;
mod job;
mod jobqueue;
mod jobs;
mod producer;
mod recurring;
mod retry;
mod services;
mod stats;
pub mod storage;
pub mod telemetry;
mod worker;

#[cfg(test)]
mod testing;

pub use config::{ConfigError, QueueConfig, StoreConfig};
pub use error::QueueError;
pub use handler::{JobContext, JobError, JobResult};
pub use health::router as health_router;
pub use job::{
    CleanupArgs, JobId, JobKind, JobRecord, JobStatus, RentalRef, ReportArgs, SweepArgs,
};
pub use jobqueue::JobQueue;
pub use producer::{EnqueueOptions, JobProducer};
pub use recurring::{parse_schedule, standard_schedules, RecurringJob, RecurringRegistry};
pub use retry::{RetryPolicy, Transition};
pub use services::{
    ActivityCounts, Collaborators, Email, MonitoringSink, Notifier, PaymentGateway,
    PaymentRequest, Rental, RentalStatus, ReportPeriod, Repository, RepositoryError, Review,
};
pub use stats::{QueueStats, StatsReporter};
pub use storage::{Collection, JobStore, StorageError};
pub use worker::ActiveJobs;
