use tracing::info;

use crate::handler::{JobContext, JobError, JobResult};
use crate::services::Email;

pub async fn send(ctx: &JobContext, email: &Email) -> JobResult {
    ctx.notifier
        .send(email)
        .await
        .map_err(JobError::Notification)?;

    info!(template = email.template(), "Email sent");
    Ok(())
}
