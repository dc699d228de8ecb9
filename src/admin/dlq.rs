//! DLQ routes (§4.N): list, inspect, retry, remove, bulk retry, clean, stats.

use axum::extract::{Path, Query, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use super::error::AdminError;
use super::AdminState;
use crate::models::{DeadLetterEntry, DeadLetterId};
use crate::queue::{Queue, SendJob};

pub fn router<Q: Queue<SendJob> + 'static>() -> Router<AdminState<Q>> {
    Router::new()
        .route("/dlq", get(list::<Q>))
        .route("/dlq/stats", get(stats::<Q>))
        .route("/dlq/bulk-retry", post(bulk_retry::<Q>))
        .route("/dlq/clean", post(clean::<Q>))
        .route("/dlq/{job_id}", get(inspect::<Q>))
        .route("/dlq/{job_id}", delete(remove::<Q>))
        .route("/dlq/{job_id}/retry", post(retry::<Q>))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    #[serde(default = "default_limit")]
    limit: i64,
    #[serde(default)]
    offset: i64,
}

fn default_limit() -> i64 {
    50
}

async fn list<Q: Queue<SendJob> + 'static>(
    State(state): State<AdminState<Q>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<DeadLetterEntry>>, AdminError> {
    let entries = state.dead_letter.list(query.limit, query.offset).await?;
    Ok(Json(entries))
}

async fn inspect<Q: Queue<SendJob> + 'static>(
    State(state): State<AdminState<Q>>,
    Path(job_id): Path<DeadLetterId>,
) -> Result<Json<DeadLetterEntry>, AdminError> {
    state
        .dead_letter
        .find(job_id)
        .await?
        .map(Json)
        .ok_or_else(|| AdminError::NotFound(format!("dead letter {job_id} not found")))
}

async fn remove<Q: Queue<SendJob> + 'static>(
    State(state): State<AdminState<Q>>,
    Path(job_id): Path<DeadLetterId>,
) -> Result<(), AdminError> {
    state.dead_letter.remove(job_id).await?;
    Ok(())
}

#[derive(Debug, Serialize)]
struct RetryResult {
    job_id: DeadLetterId,
    requeued: bool,
}

/// Moves a dead letter back onto the send queue (§4.N: "manual retry (move
/// back to waiting)"), then deletes the dead-letter row.
async fn retry<Q: Queue<SendJob> + 'static>(
    State(state): State<AdminState<Q>>,
    Path(job_id): Path<DeadLetterId>,
) -> Result<Json<RetryResult>, AdminError> {
    let entry = state
        .dead_letter
        .find(job_id)
        .await?
        .ok_or_else(|| AdminError::NotFound(format!("dead letter {job_id} not found")))?;
    requeue(&state, &entry).await?;
    state.dead_letter.remove(job_id).await?;
    Ok(Json(RetryResult { job_id, requeued: true }))
}

#[derive(Debug, Deserialize)]
struct BulkRetryRequest {
    job_ids: Vec<DeadLetterId>,
}

#[derive(Debug, Serialize)]
struct BulkRetryResult {
    requeued: Vec<DeadLetterId>,
    failed: Vec<DeadLetterId>,
}

async fn bulk_retry<Q: Queue<SendJob> + 'static>(
    State(state): State<AdminState<Q>>,
    Json(body): Json<BulkRetryRequest>,
) -> Result<Json<BulkRetryResult>, AdminError> {
    let mut requeued = Vec::new();
    let mut failed = Vec::new();

    for job_id in body.job_ids {
        let outcome = async {
            let entry = state
                .dead_letter
                .find(job_id)
                .await?
                .ok_or_else(|| AdminError::NotFound(format!("dead letter {job_id} not found")))?;
            requeue(&state, &entry).await?;
            state.dead_letter.remove(job_id).await?;
            Ok::<(), AdminError>(())
        }
        .await;

        match outcome {
            Ok(()) => requeued.push(job_id),
            Err(_) => failed.push(job_id),
        }
    }

    Ok(Json(BulkRetryResult { requeued, failed }))
}

#[derive(Debug, Deserialize)]
struct CleanRequest {
    older_than_days: i32,
}

#[derive(Debug, Serialize)]
struct CleanResult {
    removed: u64,
}

async fn clean<Q: Queue<SendJob> + 'static>(
    State(state): State<AdminState<Q>>,
    Json(body): Json<CleanRequest>,
) -> Result<Json<CleanResult>, AdminError> {
    let removed = state.dead_letter.clean_older_than_days(body.older_than_days).await?;
    Ok(Json(CleanResult { removed }))
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    total: i64,
    old: i64,
    recent: i64,
    oldest_age_hours: Option<f64>,
    common_errors: Vec<(String, i64)>,
    verdict: &'static str,
}

async fn stats<Q: Queue<SendJob> + 'static>(
    State(state): State<AdminState<Q>>,
) -> Result<Json<StatsResponse>, AdminError> {
    let stats = state.dead_letter.stats().await?;
    let verdict = stats.verdict();
    Ok(Json(StatsResponse {
        total: stats.total,
        old: stats.old,
        recent: stats.recent,
        oldest_age_hours: stats.oldest_age_hours,
        common_errors: stats.common_errors,
        verdict,
    }))
}

async fn requeue<Q: Queue<SendJob> + 'static>(
    state: &AdminState<Q>,
    entry: &DeadLetterEntry,
) -> Result<(), AdminError> {
    let mut job: SendJob = serde_json::from_value(entry.data.0.clone())
        .map_err(|e| AdminError::BadRequest(format!("dead letter payload is not a valid send job: {e}")))?;
    job.attempt = 0;
    job.enqueued_at = chrono::Utc::now();
    state.send_queue.enqueue(job).await;
    Ok(())
}
