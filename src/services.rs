//! Narrow interfaces to the rest of the marketplace. Handlers reach storage
//! and external providers only through these traits.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::stats::QueueStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RentalStatus {
    Pending,
    Confirmed,
    Active,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rental {
    pub id: String,
    pub item_title: String,
    pub renter_id: String,
    pub renter_name: String,
    pub renter_email: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub status: RentalStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub id: String,
    pub rental_id: String,
    pub reviewer_id: String,
}

/// Aggregated marketplace activity over a time window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityCounts {
    pub new_users: u64,
    pub new_rentals: u64,
    pub completed_rentals: u64,
    pub new_reviews: u64,
    pub revenue_cents: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportPeriod {
    Daily,
    Weekly,
}

/// Every email the marketplace can send, each with its own parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "template", rename_all = "kebab-case")]
pub enum Email {
    Welcome {
        to: String,
        name: String,
    },
    RentalConfirmation {
        to: String,
        name: String,
        rental_id: String,
        item_title: String,
    },
    RentalReminder {
        to: String,
        name: String,
        rental_id: String,
        item_title: String,
        start_date: NaiveDate,
    },
    ReviewRequest {
        to: String,
        name: String,
        rental_id: String,
        item_title: String,
    },
    PasswordReset {
        to: String,
        reset_url: String,
    },
    AdminReport {
        period: ReportPeriod,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        counts: ActivityCounts,
    },
    AdminAlert {
        subject: String,
        message: String,
    },
}

impl Email {
    pub fn template(&self) -> &'static str {
        match self {
            Email::Welcome { .. } => "welcome",
            Email::RentalConfirmation { .. } => "rental-confirmation",
            Email::RentalReminder { .. } => "rental-reminder",
            Email::ReviewRequest { .. } => "review-request",
            Email::PasswordReset { .. } => "password-reset",
            Email::AdminReport { .. } => "admin-report",
            Email::AdminAlert { .. } => "admin-alert",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub rental_id: String,
    pub amount_cents: i64,
    pub currency: String,
    pub payment_method: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RepositoryError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RepositoryError::NotFound { .. })
    }
}

/// Access to persisted business entities.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn rental(&self, id: &str) -> Result<Rental, RepositoryError>;

    async fn rentals_starting_on(&self, date: NaiveDate) -> Result<Vec<Rental>, RepositoryError>;

    async fn review_by(
        &self,
        rental_id: &str,
        reviewer_id: &str,
    ) -> Result<Option<Review>, RepositoryError>;

    async fn set_rental_status(&self, id: &str, status: RentalStatus)
        -> Result<(), RepositoryError>;

    /// Deletes password-reset tokens that expired before `now`, returning how many went.
    async fn delete_expired_reset_tokens(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError>;

    async fn activity_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<ActivityCounts, RepositoryError>;
}

/// Email delivery. An `Err` marks the calling job as failed.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, email: &Email) -> anyhow::Result<()>;
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Captures the payment and returns the provider's transaction id.
    async fn capture(&self, request: &PaymentRequest) -> anyhow::Result<String>;
}

/// Receives periodic queue snapshots; alert thresholds live on the other side.
#[async_trait]
pub trait MonitoringSink: Send + Sync {
    async fn record(&self, stats: QueueStats);
}

/// The collaborators handed to every job handler.
#[derive(Clone)]
pub struct Collaborators {
    pub repository: Arc<dyn Repository>,
    pub notifier: Arc<dyn Notifier>,
    pub payments: Arc<dyn PaymentGateway>,
}

impl Collaborators {
    pub fn new(
        repository: Arc<dyn Repository>,
        notifier: Arc<dyn Notifier>,
        payments: Arc<dyn PaymentGateway>,
    ) -> Self {
        Self {
            repository,
            notifier,
            payments,
        }
    }
}
