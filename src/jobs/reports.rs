use chrono::{Duration, Utc};
use tracing::info;

use crate::handler::{JobContext, JobError, JobResult};
use crate::job::ReportArgs;
use crate::services::{Email, ReportPeriod};

pub async fn daily_stats(ctx: &JobContext, args: &ReportArgs) -> JobResult {
    report(ctx, args, ReportPeriod::Daily, Duration::days(1)).await
}

pub async fn weekly_report(ctx: &JobContext, args: &ReportArgs) -> JobResult {
    report(ctx, args, ReportPeriod::Weekly, Duration::weeks(1)).await
}

async fn report(
    ctx: &JobContext,
    args: &ReportArgs,
    period: ReportPeriod,
    window: Duration,
) -> JobResult {
    let to = args.window_end.unwrap_or_else(Utc::now);
    let from = to - window;
    let counts = ctx.repository.activity_between(from, to).await?;

    ctx.notifier
        .send(&Email::AdminReport {
            period,
            from,
            to,
            counts,
        })
        .await
        .map_err(JobError::Notification)?;

    info!(
        period = ?period,
        new_users = counts.new_users,
        new_rentals = counts.new_rentals,
        completed_rentals = counts.completed_rentals,
        "Activity report delivered"
    );
    Ok(())
}
