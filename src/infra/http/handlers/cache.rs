//! Cache manifest and operator flush handlers.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};

use super::super::HttpState;
use super::super::error::ApiError;

/// `GET /cache-manifest.json`: the externally-published freshness summary.
pub async fn get_manifest(State(state): State<HttpState>) -> Result<impl IntoResponse, ApiError> {
    let manifest = state.cache.manifest().await.map_err(ApiError::repo)?;
    Ok(Json(manifest))
}

#[derive(Debug, Serialize)]
pub struct FlushResponse {
    pub last_flush_time: i64,
}

/// `POST /api/v1/cache/flush`: advance the global flush boundary.
pub async fn flush_cache(State(state): State<HttpState>) -> Result<impl IntoResponse, ApiError> {
    let last_flush_time = state.cache.flush().await.map_err(ApiError::repo)?;
    Ok(Json(FlushResponse { last_flush_time }))
}

#[derive(Debug, Deserialize)]
pub struct FlushForRequest {
    pub fingerprint: String,
}

/// `POST /api/v1/cache/flush-for`: force-expire one computed response by
/// its request fingerprint.
pub async fn flush_for(
    State(state): State<HttpState>,
    Json(payload): Json<FlushForRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if payload.fingerprint.is_empty() {
        return Err(ApiError::bad_request("fingerprint must not be empty", None));
    }
    state
        .cache
        .flush_for(&payload.fingerprint)
        .await
        .map_err(ApiError::repo)?;
    Ok(StatusCode::ACCEPTED)
}
