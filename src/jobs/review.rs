use tracing::{debug, info, warn};

use crate::handler::{JobContext, JobError, JobResult};
use crate::job::RentalRef;
use crate::services::{Email, RentalStatus};

/// Asks the renter for a review once a rental is completed, unless they
/// already left one.
pub async fn request_review(ctx: &JobContext, args: &RentalRef) -> JobResult {
    let rental = match ctx.repository.rental(&args.rental_id).await {
        Ok(rental) => rental,
        Err(e) if e.is_not_found() => {
            warn!(rental_id = %args.rental_id, "Rental vanished, skipping review request");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    if rental.status != RentalStatus::Completed {
        debug!(rental_id = %rental.id, status = ?rental.status, "Rental not completed yet");
        return Ok(());
    }

    if ctx
        .repository
        .review_by(&rental.id, &rental.renter_id)
        .await?
        .is_some()
    {
        debug!(rental_id = %rental.id, "Renter already reviewed this rental");
        return Ok(());
    }

    ctx.notifier
        .send(&Email::ReviewRequest {
            to: rental.renter_email,
            name: rental.renter_name,
            rental_id: rental.id.clone(),
            item_title: rental.item_title,
        })
        .await
        .map_err(JobError::Notification)?;

    info!(rental_id = %rental.id, "Review request sent");
    Ok(())
}
