use chrono::Utc;
use tracing::info;

use crate::handler::{JobContext, JobResult};
use crate::job::CleanupArgs;
use crate::storage::Collection;

/// Deletes expired password-reset tokens and prunes old job history.
pub async fn cleanup(ctx: &JobContext, args: &CleanupArgs) -> JobResult {
    let now = Utc::now();
    let tokens = ctx.repository.delete_expired_reset_tokens(now).await?;

    let retention = args
        .retention_days
        .map(|days| chrono::Duration::days(i64::from(days)))
        .unwrap_or(ctx.retention);
    let cutoff = (now - retention).timestamp_millis();

    let mut pruned = 0;
    for collection in [Collection::Completed, Collection::Failed] {
        pruned += ctx.store().remove_older_than(collection, cutoff).await?;
    }

    info!(
        expired_tokens = tokens,
        pruned_jobs = pruned,
        retention_days = retention.num_days(),
        "Cleanup finished"
    );
    Ok(())
}
