use chrono::{Days, NaiveDate, Utc};
use tracing::{debug, info, warn};

use crate::handler::{JobContext, JobError, JobResult};
use crate::job::{JobKind, RentalRef, SweepArgs};
use crate::producer::EnqueueOptions;
use crate::services::Email;

fn tomorrow() -> Option<NaiveDate> {
    Utc::now().date_naive().checked_add_days(Days::new(1))
}

/// Reminds the renter the day before a rental starts.
///
/// The "starts tomorrow" guard is re-checked on every attempt, so a retry for
/// a rental that has since moved is skipped rather than sent late.
pub async fn remind(ctx: &JobContext, args: &RentalRef) -> JobResult {
    let rental = match ctx.repository.rental(&args.rental_id).await {
        Ok(rental) => rental,
        Err(e) if e.is_not_found() => {
            warn!(rental_id = %args.rental_id, "Rental vanished, skipping reminder");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    if Some(rental.start_date) != tomorrow() {
        debug!(
            rental_id = %rental.id,
            start_date = %rental.start_date,
            "Rental does not start tomorrow, skipping reminder"
        );
        return Ok(());
    }

    ctx.notifier
        .send(&Email::RentalReminder {
            to: rental.renter_email,
            name: rental.renter_name,
            rental_id: rental.id.clone(),
            item_title: rental.item_title,
            start_date: rental.start_date,
        })
        .await
        .map_err(JobError::Notification)?;

    info!(rental_id = %rental.id, "Rental reminder sent");
    Ok(())
}

/// Enqueues one `rental-reminder` per rental starting tomorrow.
pub async fn sweep(ctx: &JobContext, _args: &SweepArgs) -> JobResult {
    let Some(date) = tomorrow() else {
        return Ok(());
    };

    let rentals = ctx.repository.rentals_starting_on(date).await?;
    for rental in &rentals {
        ctx.producer
            .enqueue(
                JobKind::RentalReminder(RentalRef::new(rental.id.clone())),
                EnqueueOptions::default(),
            )
            .await?;
    }

    info!(date = %date, count = rentals.len(), "Queued rental reminders");
    Ok(())
}
