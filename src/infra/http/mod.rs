//! HTTP surface: the read-side REST API, the cache manifest blob, and the
//! inbound mutation webhook.

pub mod error;
pub mod handlers;

use std::sync::Arc;

use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{get, post},
};

use crate::application::batch::BatchScheduler;
use crate::application::events::EventBus;
use crate::application::fingerprint::FingerprintEngine;
use crate::application::repos::{FeedBufferRepo, ProductsRepo};
use crate::cache::{CacheHttpState, CacheService, response_cache_layer};

#[derive(Clone)]
pub struct HttpState {
    pub products: Arc<dyn ProductsRepo>,
    pub engine: Arc<FingerprintEngine>,
    pub feed: Arc<dyn FeedBufferRepo>,
    pub scheduler: Arc<BatchScheduler>,
    pub cache: Arc<CacheService>,
    pub bus: Arc<EventBus>,
}

pub fn build_router(state: HttpState) -> Router {
    let cache_state = CacheHttpState {
        service: state.cache.clone(),
        scheduler: state.scheduler.clone(),
    };

    Router::new()
        .route("/api/v1/fingerprints", get(handlers::fingerprints::list_fingerprints))
        .route(
            "/api/v1/fingerprints/{id}",
            get(handlers::fingerprints::get_fingerprint),
        )
        .route("/api/v1/status", get(handlers::status::get_status))
        .route("/api/v1/events", post(handlers::events::post_event))
        .route("/api/v1/cache/flush", post(handlers::cache::flush_cache))
        .route("/api/v1/cache/flush-for", post(handlers::cache::flush_for))
        .route("/cache-manifest.json", get(handlers::cache::get_manifest))
        .layer(from_fn_with_state(cache_state, response_cache_layer))
        .with_state(state)
}
