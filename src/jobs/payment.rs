use tracing::info;

use crate::handler::{JobContext, JobError, JobResult};
use crate::services::{PaymentRequest, RentalStatus};

/// Captures the payment, then confirms the rental.
pub async fn process(ctx: &JobContext, request: &PaymentRequest) -> JobResult {
    let transaction_id = ctx
        .payments
        .capture(request)
        .await
        .map_err(JobError::Payment)?;

    ctx.repository
        .set_rental_status(&request.rental_id, RentalStatus::Confirmed)
        .await?;

    info!(
        rental_id = %request.rental_id,
        transaction_id = %transaction_id,
        amount_cents = request.amount_cents,
        "Payment captured, rental confirmed"
    );
    Ok(())
}
