use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::services::{Email, PaymentRequest};

/// Unique identifier for a job: `<type>-<created millis>-<random suffix>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    pub fn new(job_type: &str, created_at: DateTime<Utc>) -> Self {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self(format!(
            "{}-{}-{}",
            job_type,
            created_at.timestamp_millis(),
            &suffix[..9]
        ))
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Lifecycle state of a job record.
///
/// `Processing` only ever exists in memory while a handler runs; records at
/// rest are `Pending`/`Retrying` (pending set), `Completed` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Retrying,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Retrying => "retrying",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RentalRef {
    pub rental_id: String,
}

impl RentalRef {
    pub fn new(rental_id: impl Into<String>) -> Self {
        Self {
            rental_id: rental_id.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupArgs {
    /// Overrides the queue's retention window for job history.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_days: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportArgs {
    /// End of the reporting window; the execution time when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepArgs {}

/// What a job does, with the payload its handler expects.
///
/// Serialized adjacently tagged, so a record carries
/// `"type": "send-email", "payload": {...}` at its top level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum JobKind {
    SendEmail(Email),
    RentalReminder(RentalRef),
    ReviewRequest(RentalRef),
    PaymentProcessing(PaymentRequest),
    CleanupExpiredTokens(CleanupArgs),
    DailyStats(ReportArgs),
    WeeklyReports(ReportArgs),
    ReminderSweep(SweepArgs),
}

impl JobKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            JobKind::SendEmail(_) => "send-email",
            JobKind::RentalReminder(_) => "rental-reminder",
            JobKind::ReviewRequest(_) => "review-request",
            JobKind::PaymentProcessing(_) => "payment-processing",
            JobKind::CleanupExpiredTokens(_) => "cleanup-expired-tokens",
            JobKind::DailyStats(_) => "daily-stats",
            JobKind::WeeklyReports(_) => "weekly-reports",
            JobKind::ReminderSweep(_) => "reminder-sweep",
        }
    }
}

/// A unit of deferred work as it lives in the durable store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: JobId,
    #[serde(flatten)]
    pub kind: JobKind,
    pub scheduled_at: DateTime<Utc>,
    pub attempts: u32,
    pub max_attempts: u32,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobRecord {
    pub fn new(kind: JobKind, scheduled_at: DateTime<Utc>, max_attempts: u32) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(kind.type_name(), now),
            kind,
            scheduled_at,
            attempts: 0,
            max_attempts: max_attempts.max(1),
            status: JobStatus::Pending,
            created_at: now,
            processed_at: None,
            error: None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }

    /// Score of this record in the pending set.
    pub fn due_score(&self) -> i64 {
        self.scheduled_at.timestamp_millis()
    }

    /// Marks the start of an execution attempt.
    pub(crate) fn begin_attempt(&mut self) {
        self.attempts += 1;
        self.status = JobStatus::Processing;
    }

    pub fn to_member(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_member(member: &str) -> serde_json::Result<Self> {
        serde_json::from_str(member)
    }
}
