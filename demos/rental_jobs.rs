use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Days, NaiveDate, Utc};
use tracing::info;

use rental_jobs::telemetry::init_tracing;
use rental_jobs::{
    ActivityCounts, Collaborators, Email, EnqueueOptions, JobKind, JobQueue, MonitoringSink,
    Notifier, PaymentGateway, PaymentRequest, QueueConfig, QueueStats, RecurringJob, Rental,
    RentalRef, RentalStatus, Repository, RepositoryError, Review, StoreConfig,
};

/// Rentals kept in memory for the demo.
#[derive(Default)]
struct MemoryRepository {
    rentals: Mutex<HashMap<String, Rental>>,
}

impl MemoryRepository {
    fn with_rental(rental: Rental) -> Self {
        let repository = Self::default();
        if let Ok(mut rentals) = repository.rentals.lock() {
            rentals.insert(rental.id.clone(), rental);
        }
        repository
    }

    fn snapshot(&self) -> Vec<Rental> {
        self.rentals
            .lock()
            .map(|r| r.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn rental(&self, id: &str) -> Result<Rental, RepositoryError> {
        self.snapshot()
            .into_iter()
            .find(|r| r.id == id)
            .ok_or_else(|| RepositoryError::not_found("rental", id))
    }

    async fn rentals_starting_on(&self, date: NaiveDate) -> Result<Vec<Rental>, RepositoryError> {
        Ok(self
            .snapshot()
            .into_iter()
            .filter(|r| r.start_date == date)
            .collect())
    }

    async fn review_by(&self, _: &str, _: &str) -> Result<Option<Review>, RepositoryError> {
        Ok(None)
    }

    async fn set_rental_status(&self, id: &str, status: RentalStatus) -> Result<(), RepositoryError> {
        let mut rentals = self
            .rentals
            .lock()
            .map_err(|_| RepositoryError::Other(anyhow::anyhow!("rental store poisoned")))?;
        match rentals.get_mut(id) {
            Some(rental) => {
                rental.status = status;
                Ok(())
            }
            None => Err(RepositoryError::not_found("rental", id)),
        }
    }

    async fn delete_expired_reset_tokens(&self, _: DateTime<Utc>) -> Result<u64, RepositoryError> {
        Ok(0)
    }

    async fn activity_between(
        &self,
        _: DateTime<Utc>,
        _: DateTime<Utc>,
    ) -> Result<ActivityCounts, RepositoryError> {
        Ok(ActivityCounts::default())
    }
}

struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, email: &Email) -> anyhow::Result<()> {
        info!(template = email.template(), "Sending email");
        Ok(())
    }
}

struct LogPayments;

#[async_trait]
impl PaymentGateway for LogPayments {
    async fn capture(&self, request: &PaymentRequest) -> anyhow::Result<String> {
        if request.amount_cents > 100_000 {
            anyhow::bail!("amount requires manual review");
        }
        info!(rental_id = %request.rental_id, amount_cents = request.amount_cents, "Captured payment");
        Ok(format!("txn-{}", request.rental_id))
    }
}

struct LogSink;

#[async_trait]
impl MonitoringSink for LogSink {
    async fn record(&self, stats: QueueStats) {
        info!(
            pending = stats.pending,
            active = stats.active,
            completed = stats.completed,
            failed = stats.failed,
            "Queue stats"
        );
    }
}

fn load_config() -> Result<QueueConfig, Box<dyn std::error::Error>> {
    match std::env::args().nth(1) {
        Some(path) => Ok(QueueConfig::load(path)?),
        None => {
            let mut config = QueueConfig {
                store: StoreConfig::Sqlite {
                    url: "sqlite://rental-jobs.db".into(),
                },
                stats_interval_ms: 10_000,
                ..QueueConfig::default()
            };
            config.apply_env()?;
            Ok(config)
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing(false);

    let config = load_config()?;
    let mut queue = JobQueue::connect(config).await?.with_monitoring(Arc::new(LogSink));

    let tomorrow = Utc::now()
        .date_naive()
        .checked_add_days(Days::new(1))
        .ok_or("date out of range")?;
    let repository = MemoryRepository::with_rental(Rental {
        id: "r-100".into(),
        item_title: "Camping tent".into(),
        renter_id: "u-7".into(),
        renter_name: "Robin".into(),
        renter_email: "robin@example.com".into(),
        start_date: tomorrow,
        end_date: tomorrow + Days::new(2),
        status: RentalStatus::Pending,
    });

    queue.start(Collaborators::new(
        Arc::new(repository),
        Arc::new(LogNotifier),
        Arc::new(LogPayments),
    ))?;

    queue
        .enqueue(
            JobKind::SendEmail(Email::Welcome {
                to: "robin@example.com".into(),
                name: "Robin".into(),
            }),
            EnqueueOptions::default(),
        )
        .await?;

    queue
        .enqueue(
            JobKind::PaymentProcessing(PaymentRequest {
                rental_id: "r-100".into(),
                amount_cents: 4_500,
                currency: "usd".into(),
                payment_method: "pm_card_visa".into(),
            }),
            EnqueueOptions::default(),
        )
        .await?;

    queue
        .enqueue(
            JobKind::RentalReminder(RentalRef::new("r-100")),
            EnqueueOptions::delayed(Duration::from_secs(5)),
        )
        .await?;

    // Declined by the gateway, so it retries and ends up in `failed`.
    queue
        .enqueue(
            JobKind::PaymentProcessing(PaymentRequest {
                rental_id: "r-100".into(),
                amount_cents: 250_000,
                currency: "usd".into(),
                payment_method: "pm_card_visa".into(),
            }),
            EnqueueOptions::default().max_attempts(2),
        )
        .await?;

    queue.register_recurring(RecurringJob::new(
        "rental_reminders",
        "*/30 * * * * *",
        JobKind::ReminderSweep(Default::default()),
    ))?;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
    let app = queue.health_router();
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "Health server stopped");
        }
    });

    info!("Running, stats at http://127.0.0.1:3000/stats. Press Ctrl+C to stop.");
    queue.wait_for_shutdown().await;

    Ok(())
}
