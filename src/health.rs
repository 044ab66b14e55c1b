//! Read-only HTTP view of the queue for monitoring.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tracing::warn;

use crate::job::JobRecord;
use crate::stats::{QueueStats, StatsReporter};
use crate::storage::Collection;

const DEFAULT_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
struct ListParams {
    limit: Option<usize>,
}

pub fn router(stats: StatsReporter) -> Router {
    Router::new()
        .route("/stats", get(queue_stats))
        .route("/jobs/{collection}", get(list_jobs))
        .with_state(stats)
}

async fn queue_stats(
    State(stats): State<StatsReporter>,
) -> Result<Json<QueueStats>, (StatusCode, String)> {
    stats.snapshot().await.map(Json).map_err(|e| {
        warn!(error = %e, "Stats unavailable");
        (StatusCode::SERVICE_UNAVAILABLE, e.to_string())
    })
}

/// Oldest records of a collection, by score.
async fn list_jobs(
    State(stats): State<StatsReporter>,
    Path(collection): Path<String>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<JobRecord>>, (StatusCode, String)> {
    let collection: Collection = collection
        .parse()
        .map_err(|e: String| (StatusCode::NOT_FOUND, e))?;
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT);

    let members = stats
        .store()
        .pop_due(collection, i64::MAX, limit)
        .await
        .map_err(|e| (StatusCode::SERVICE_UNAVAILABLE, e.to_string()))?;

    // Members that no longer decode are left to the failed view of the store.
    let records = members
        .iter()
        .filter_map(|m| JobRecord::from_member(m).ok())
        .collect();
    Ok(Json(records))
}
