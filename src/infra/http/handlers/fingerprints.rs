//! Fingerprint listing and single-entity debug handlers.

use std::collections::BTreeMap;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;
use uuid::Uuid;

use spola_api_types::{EntityFingerprint, FingerprintPage};

use crate::application::fingerprint::FingerprintError;

use super::super::HttpState;
use super::super::error::ApiError;

const DEFAULT_PAGE_LIMIT: u32 = 500;
const MAX_PAGE_LIMIT: u32 = 1000;

#[derive(Debug, Deserialize)]
pub struct FingerprintListQuery {
    pub cursor: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct FingerprintGetQuery {
    #[serde(default)]
    pub debug: bool,
}

fn encode_cursor(id: Uuid) -> String {
    URL_SAFE_NO_PAD.encode(id.as_bytes())
}

fn decode_cursor(cursor: &str) -> Result<Uuid, ApiError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(cursor)
        .map_err(|err| ApiError::invalid_cursor(Some(err.to_string())))?;
    Uuid::from_slice(&bytes).map_err(|err| ApiError::invalid_cursor(Some(err.to_string())))
}

/// `GET /api/v1/fingerprints`: bulk `{id: fingerprint}` listing for
/// published entities, cursor-paginated.
pub async fn list_fingerprints(
    State(state): State<HttpState>,
    Query(query): Query<FingerprintListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PAGE_LIMIT)
        .clamp(1, MAX_PAGE_LIMIT);
    let after = query
        .cursor
        .as_deref()
        .map(decode_cursor)
        .transpose()?;

    let pairs = state
        .products
        .list_published_fingerprints(after, limit)
        .await
        .map_err(ApiError::repo)?;

    let next_cursor = if pairs.len() as u32 == limit {
        pairs.last().map(|(id, _)| encode_cursor(*id))
    } else {
        None
    };

    let fingerprints: BTreeMap<Uuid, String> = pairs.into_iter().collect();
    Ok(Json(FingerprintPage {
        fingerprints,
        next_cursor,
    }))
}

/// `GET /api/v1/fingerprints/{id}`: single-entity fingerprint, with the
/// pre-digest projection when `?debug=true`.
pub async fn get_fingerprint(
    State(state): State<HttpState>,
    Path(id): Path<Uuid>,
    Query(query): Query<FingerprintGetQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let product = state
        .products
        .find_product(id)
        .await
        .map_err(ApiError::repo)?
        .ok_or_else(|| ApiError::not_found("product not found"))?;

    let projection = if query.debug {
        match state.engine.fingerprint_with_projection(id).await {
            Ok((_, projection)) => Some(projection),
            Err(FingerprintError::NoData) => None,
            Err(FingerprintError::Repo(err)) => return Err(ApiError::repo(err)),
        }
    } else {
        None
    };

    Ok(Json(EntityFingerprint {
        id,
        fingerprint: product.fingerprint,
        computed_at: product.fingerprint_computed_at,
        projection,
    }))
}
