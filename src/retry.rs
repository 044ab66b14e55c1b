//! Retry/backoff state transitions.
//!
//! Every execution ends here: the outcome of one attempt is turned into the
//! record's next state and the collection it must be written to.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::job::{JobRecord, JobStatus};
use crate::storage::Collection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(base_delay: Duration) -> Self {
        Self { base_delay }
    }

    /// Delay before the next try, after `attempts` tries have been made:
    /// `base * 2^(attempts - 1)`, never less than one millisecond.
    pub fn delay_for(&self, attempts: u32) -> chrono::Duration {
        let exponent = attempts.saturating_sub(1).min(30);
        let base_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        let delay_ms = base_ms.saturating_mul(1u64 << exponent).max(1);
        i64::try_from(delay_ms)
            .ok()
            .and_then(chrono::Duration::try_milliseconds)
            .unwrap_or(chrono::Duration::MAX)
    }

    /// When the next try is due, clamped to the latest representable instant.
    pub fn retry_at(&self, now: DateTime<Utc>, attempts: u32) -> DateTime<Utc> {
        now.checked_add_signed(self.delay_for(attempts))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// Where a settled record goes next.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub record: JobRecord,
    pub collection: Collection,
    pub score: i64,
}

impl Transition {
    pub fn is_retry(&self) -> bool {
        self.collection == Collection::Pending
    }
}

/// Applies the outcome of the attempt just made to `record`.
pub fn settle(
    mut record: JobRecord,
    outcome: Result<(), String>,
    now: DateTime<Utc>,
    policy: &RetryPolicy,
) -> Transition {
    match outcome {
        Ok(()) => {
            record.status = JobStatus::Completed;
            record.processed_at = Some(now);
            Transition {
                record,
                collection: Collection::Completed,
                score: now.timestamp_millis(),
            }
        }
        Err(error) => {
            record.error = Some(error);
            if record.attempts < record.max_attempts {
                record.status = JobStatus::Retrying;
                record.scheduled_at = policy.retry_at(now, record.attempts);
                let score = record.due_score();
                Transition {
                    record,
                    collection: Collection::Pending,
                    score,
                }
            } else {
                record.status = JobStatus::Failed;
                record.processed_at = Some(now);
                Transition {
                    record,
                    collection: Collection::Failed,
                    score: now.timestamp_millis(),
                }
            }
        }
    }
}

/// Same bookkeeping for a member that could not be decoded into a
/// [`JobRecord`]. The raw JSON is annotated in place so the record stays
/// inspectable; anything that is not a JSON object goes straight to `failed`.
pub fn settle_malformed(
    member: &str,
    error: String,
    now: DateTime<Utc>,
    policy: &RetryPolicy,
    default_max_attempts: u32,
) -> (Collection, i64, String) {
    let failed_score = now.timestamp_millis();
    let mut value: Value = match serde_json::from_str(member) {
        Ok(value @ Value::Object(_)) => value,
        _ => return (Collection::Failed, failed_score, member.to_string()),
    };

    let attempts = value
        .get("attempts")
        .and_then(Value::as_u64)
        .unwrap_or(0)
        .saturating_add(1);
    let max_attempts = value
        .get("maxAttempts")
        .and_then(Value::as_u64)
        .unwrap_or(u64::from(default_max_attempts));

    value["attempts"] = attempts.into();
    value["error"] = error.into();

    let (collection, score) = if attempts < max_attempts {
        let next = policy.retry_at(now, u32::try_from(attempts).unwrap_or(u32::MAX));
        value["status"] = JobStatus::Retrying.as_str().into();
        value["scheduledAt"] = next.to_rfc3339().into();
        (Collection::Pending, next.timestamp_millis())
    } else {
        value["status"] = JobStatus::Failed.as_str().into();
        value["processedAt"] = now.to_rfc3339().into();
        (Collection::Failed, failed_score)
    };

    (collection, score, value.to_string())
}
