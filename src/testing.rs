//! In-memory collaborators and helpers shared by the unit tests.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::Notify;

use crate::handler::JobContext;
use crate::job::JobRecord;
use crate::producer::JobProducer;
use crate::services::{
    ActivityCounts, Collaborators, Email, MonitoringSink, Notifier, PaymentGateway,
    PaymentRequest, Rental, RentalStatus, Repository, RepositoryError, Review,
};
use crate::stats::QueueStats;
use crate::storage::{self, Collection, JobStore, SqliteStore, StorageError};

pub fn rental(id: &str, start_date: NaiveDate, status: RentalStatus) -> Rental {
    Rental {
        id: id.to_string(),
        item_title: "Cordless drill".to_string(),
        renter_id: format!("renter-{id}"),
        renter_name: "Sam".to_string(),
        renter_email: "sam@example.com".to_string(),
        start_date,
        end_date: start_date + chrono::Days::new(3),
        status,
    }
}

#[derive(Default)]
pub struct FakeRepository {
    rentals: Mutex<HashMap<String, Rental>>,
    reviews: Mutex<Vec<Review>>,
    activity: Mutex<ActivityCounts>,
    expired_tokens: AtomicU64,
    deleted_tokens: AtomicU64,
    unavailable: AtomicBool,
}

impl FakeRepository {
    pub fn add_rental(&self, rental: Rental) {
        self.rentals.lock().unwrap().insert(rental.id.clone(), rental);
    }

    pub fn add_review(&self, review: Review) {
        self.reviews.lock().unwrap().push(review);
    }

    pub fn rental_status(&self, id: &str) -> Option<RentalStatus> {
        self.rentals.lock().unwrap().get(id).map(|r| r.status)
    }

    pub fn set_activity(&self, counts: ActivityCounts) {
        *self.activity.lock().unwrap() = counts;
    }

    pub fn set_expired_tokens(&self, count: u64) {
        self.expired_tokens.store(count, Ordering::SeqCst);
    }

    pub fn deleted_tokens(&self) -> u64 {
        self.deleted_tokens.load(Ordering::SeqCst)
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), RepositoryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RepositoryError::Other(anyhow!("database unreachable")));
        }
        Ok(())
    }
}

#[async_trait]
impl Repository for FakeRepository {
    async fn rental(&self, id: &str) -> Result<Rental, RepositoryError> {
        self.check()?;
        self.rentals
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| RepositoryError::not_found("rental", id))
    }

    async fn rentals_starting_on(&self, date: NaiveDate) -> Result<Vec<Rental>, RepositoryError> {
        self.check()?;
        Ok(self
            .rentals
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.start_date == date)
            .cloned()
            .collect())
    }

    async fn review_by(
        &self,
        rental_id: &str,
        reviewer_id: &str,
    ) -> Result<Option<Review>, RepositoryError> {
        self.check()?;
        Ok(self
            .reviews
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.rental_id == rental_id && r.reviewer_id == reviewer_id)
            .cloned())
    }

    async fn set_rental_status(
        &self,
        id: &str,
        status: RentalStatus,
    ) -> Result<(), RepositoryError> {
        self.check()?;
        match self.rentals.lock().unwrap().get_mut(id) {
            Some(rental) => {
                rental.status = status;
                Ok(())
            }
            None => Err(RepositoryError::not_found("rental", id)),
        }
    }

    async fn delete_expired_reset_tokens(&self, _now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        self.check()?;
        let count = self.expired_tokens.swap(0, Ordering::SeqCst);
        self.deleted_tokens.fetch_add(count, Ordering::SeqCst);
        Ok(count)
    }

    async fn activity_between(
        &self,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
    ) -> Result<ActivityCounts, RepositoryError> {
        self.check()?;
        Ok(*self.activity.lock().unwrap())
    }
}

/// Records sent emails; can be told to fail or to be slow.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Email>>,
    failures_left: AtomicUsize,
    delay: Mutex<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    panic_next: AtomicBool,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Email> {
        self.sent.lock().unwrap().clone()
    }

    pub fn fail_next(&self, times: usize) {
        self.failures_left.store(times, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    /// The next send panics instead of returning.
    pub fn panic_next(&self) {
        self.panic_next.store(true, Ordering::SeqCst);
    }

    /// Highest number of sends observed running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, email: &Email) -> anyhow::Result<()> {
        if self.panic_next.swap(false, Ordering::SeqCst) {
            panic!("mail client crashed on {}", email.template());
        }
        let now_running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now_running, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let should_fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(anyhow!("mail provider rejected {}", email.template()));
        }

        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakePayments {
    captured: Mutex<Vec<PaymentRequest>>,
    declined: AtomicBool,
}

impl FakePayments {
    pub fn captured(&self) -> Vec<PaymentRequest> {
        self.captured.lock().unwrap().clone()
    }

    pub fn decline(&self) {
        self.declined.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl PaymentGateway for FakePayments {
    async fn capture(&self, request: &PaymentRequest) -> anyhow::Result<String> {
        if self.declined.load(Ordering::SeqCst) {
            return Err(anyhow!("card declined"));
        }
        let mut captured = self.captured.lock().unwrap();
        captured.push(request.clone());
        Ok(format!("txn-{}", captured.len()))
    }
}

#[derive(Default)]
pub struct RecordingSink {
    snapshots: Mutex<Vec<QueueStats>>,
}

impl RecordingSink {
    pub fn snapshots(&self) -> Vec<QueueStats> {
        self.snapshots.lock().unwrap().clone()
    }
}

#[async_trait]
impl MonitoringSink for RecordingSink {
    async fn record(&self, stats: QueueStats) {
        self.snapshots.lock().unwrap().push(stats);
    }
}

/// Wraps a store and fails every call while switched off.
pub struct FlakyStore {
    inner: Arc<dyn JobStore>,
    down: AtomicBool,
    removes_failing: AtomicBool,
}

impl FlakyStore {
    pub fn new(inner: Arc<dyn JobStore>) -> Self {
        Self {
            inner,
            down: AtomicBool::new(false),
            removes_failing: AtomicBool::new(false),
        }
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Only `remove` fails; reads and writes keep working.
    pub fn set_removes_failing(&self, failing: bool) {
        self.removes_failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> storage::Result<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl JobStore for FlakyStore {
    async fn enqueue(&self, collection: Collection, member: &str, score: i64) -> storage::Result<()> {
        self.check()?;
        self.inner.enqueue(collection, member, score).await
    }

    async fn pop_due(
        &self,
        collection: Collection,
        max_score: i64,
        limit: usize,
    ) -> storage::Result<Vec<String>> {
        self.check()?;
        self.inner.pop_due(collection, max_score, limit).await
    }

    async fn remove(&self, collection: Collection, member: &str) -> storage::Result<bool> {
        self.check()?;
        if self.removes_failing.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("remove rejected".into()));
        }
        self.inner.remove(collection, member).await
    }

    async fn count(&self, collection: Collection) -> storage::Result<u64> {
        self.check()?;
        self.inner.count(collection).await
    }

    async fn remove_older_than(&self, collection: Collection, cutoff_score: i64) -> storage::Result<u64> {
        self.check()?;
        self.inner.remove_older_than(collection, cutoff_score).await
    }
}

/// Fake collaborators wired into a handler context over an in-memory store.
pub struct Harness {
    pub ctx: JobContext,
    pub repository: Arc<FakeRepository>,
    pub notifier: Arc<RecordingNotifier>,
    pub payments: Arc<FakePayments>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_store(Arc::new(SqliteStore::in_memory().await.unwrap())).await
    }

    pub async fn with_store(store: Arc<dyn JobStore>) -> Self {
        let producer = JobProducer::new(store, Arc::new(Notify::new()), 3);
        let repository = Arc::new(FakeRepository::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let payments = Arc::new(FakePayments::default());

        let ctx = JobContext::new(
            Self::collaborators_from(&repository, &notifier, &payments),
            producer,
            chrono::Duration::days(30),
        );

        Self {
            ctx,
            repository,
            notifier,
            payments,
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Self::collaborators_from(&self.repository, &self.notifier, &self.payments)
    }

    fn collaborators_from(
        repository: &Arc<FakeRepository>,
        notifier: &Arc<RecordingNotifier>,
        payments: &Arc<FakePayments>,
    ) -> Collaborators {
        Collaborators::new(repository.clone(), notifier.clone(), payments.clone())
    }

    pub async fn records(&self, collection: Collection) -> Vec<JobRecord> {
        records_in(self.ctx.store().as_ref(), collection).await
    }
}

pub async fn records_in(store: &dyn JobStore, collection: Collection) -> Vec<JobRecord> {
    store
        .pop_due(collection, i64::MAX, 1_000)
        .await
        .unwrap()
        .iter()
        .map(|m| JobRecord::from_member(m).unwrap())
        .collect()
}

/// Polls `condition` until it holds or `timeout` passes.
pub async fn eventually<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
