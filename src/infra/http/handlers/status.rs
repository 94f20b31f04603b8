//! Settings/summary endpoint: feed cursor position and aggregate counts.

use axum::Json;
use axum::extract::State;
use axum::response::IntoResponse;

use spola_api_types::{BatchStatusSummary, FeedStatus, StatusResponse};

use super::super::HttpState;
use super::super::error::ApiError;

/// `GET /api/v1/status`
pub async fn get_status(State(state): State<HttpState>) -> Result<impl IntoResponse, ApiError> {
    let pending = state.feed.pending_count().await.map_err(ApiError::repo)?;
    let oldest_enqueued_at = state
        .feed
        .oldest_enqueued_at()
        .await
        .map_err(ApiError::repo)?;
    let progress = state.scheduler.progress().await.map_err(ApiError::repo)?;
    let published_products = state
        .products
        .count_published()
        .await
        .map_err(ApiError::repo)?;
    let fingerprinted_products = state
        .products
        .count_fingerprinted()
        .await
        .map_err(ApiError::repo)?;

    Ok(Json(StatusResponse {
        feed: FeedStatus {
            pending,
            oldest_enqueued_at,
        },
        batch: BatchStatusSummary {
            status: progress.status.as_str().to_string(),
            processed_count: progress.processed_count,
            batch_count: progress.batch_count,
            last_product_id: progress.last_product_id,
        },
        published_products,
        fingerprinted_products,
    }))
}
