//! Response cache middleware.
//!
//! Caches successful public GET responses keyed by the normalized request,
//! and serves validated hits. Privileged callers and responses computed
//! while a taxonomy registration is in flight bypass the shared cache.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, Method, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use time::OffsetDateTime;
use tracing::{debug, instrument};

use crate::application::batch::BatchScheduler;

use super::CacheService;
use super::keys::{ActorRole, RequestKey};
use super::store::CachedPayload;

/// Header privileged (internal/admin) callers send to skip the shared cache.
pub const PRIVILEGED_HEADER: &str = "x-spola-privileged";

#[derive(Clone)]
pub struct CacheHttpState {
    pub service: Arc<CacheService>,
    pub scheduler: Arc<BatchScheduler>,
}

#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn response_cache_layer(
    State(cache): State<CacheHttpState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !cache.service.is_enabled() {
        return next.run(request).await;
    }

    // Only cache GET requests.
    if request.method() != Method::GET {
        return next.run(request).await;
    }

    let role = detect_role(&request);
    let path = request.uri().path().to_string();
    let params = parse_params(request.uri().query().unwrap_or(""));
    let key = RequestKey::new(role, path, &params);

    if role == ActorRole::Public {
        match cache.service.get(&key).await {
            Ok(Some(hit)) => {
                debug!(cache = "response", outcome = "hit", "serving cached payload");
                return build_response(hit);
            }
            Ok(None) => {
                debug!(cache = "response", outcome = "miss", "executing handler");
            }
            Err(err) => {
                debug!(cache = "response", error = %err, "cache read failed, executing handler");
            }
        }
    }

    let response = next.run(request).await;

    if response.status() != StatusCode::OK || role != ActorRole::Public {
        return response;
    }

    let (parts, body) = response.into_parts();
    let limit = cache.service.config().max_body_bytes;
    let bytes = match axum::body::to_bytes(body, limit).await {
        Ok(bytes) => bytes,
        Err(_) => {
            // Body larger than the cacheable limit or collection failed.
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    // A response computed while a taxonomy registration is still pending
    // expansion may be partial; keep it out of the shared cache.
    let is_public = match cache.scheduler.pending_sweeps().await {
        Ok(pending) => pending.is_empty(),
        Err(_) => false,
    };

    let content_type = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("application/json")
        .to_string();

    cache.service.save(
        key,
        CachedPayload {
            content_type,
            body: bytes.clone(),
            created_at: OffsetDateTime::now_utc().unix_timestamp(),
        },
        is_public,
    );

    Response::from_parts(parts, Body::from(bytes))
}

fn detect_role(request: &Request<Body>) -> ActorRole {
    if request.headers().contains_key(PRIVILEGED_HEADER) {
        ActorRole::Privileged
    } else {
        ActorRole::Public
    }
}

fn parse_params(query: &str) -> Vec<(String, String)> {
    url::form_urlencoded::parse(query.as_bytes())
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect()
}

fn build_response(payload: CachedPayload) -> Response {
    let mut response = Response::new(Body::from(payload.body));
    if let Ok(value) = HeaderValue::from_str(&payload.content_type) {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::{Router, middleware::from_fn_with_state, routing::get};
    use tower::ServiceExt;

    use super::*;
    use crate::application::fingerprint::FingerprintEngine;
    use crate::application::ledger::FreshnessLedger;
    use crate::application::repos::ConfigStore;
    use crate::application::testing::{
        MemoryCatalog, MemoryConfigStore, MemoryFeedBuffer, MemoryJobsRepo,
    };
    use crate::cache::CacheConfig;
    use crate::domain::types::TermKind;
    use uuid::Uuid;

    fn fixture() -> (CacheHttpState, Arc<AtomicUsize>) {
        let catalog = Arc::new(MemoryCatalog::default());
        let store: Arc<dyn ConfigStore> = Arc::new(MemoryConfigStore::default());
        let ledger = Arc::new(FreshnessLedger::new(store.clone()));
        let engine = Arc::new(FingerprintEngine::new(catalog.clone(), catalog.clone()));
        let scheduler = Arc::new(BatchScheduler::new(
            catalog,
            engine,
            store.clone(),
            Arc::new(MemoryJobsRepo::default()),
            Arc::new(MemoryFeedBuffer::default()),
            25,
        ));
        let service = Arc::new(CacheService::new(CacheConfig::default(), ledger, store));
        (
            CacheHttpState { service, scheduler },
            Arc::new(AtomicUsize::new(0)),
        )
    }

    fn router(state: CacheHttpState, hits: Arc<AtomicUsize>) -> Router {
        Router::new()
            .route(
                "/payload",
                get(move || {
                    let hits = hits.clone();
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        "payload-body"
                    }
                }),
            )
            .layer(from_fn_with_state(state, response_cache_layer))
    }

    async fn get_path(router: &Router, path: &str, privileged: bool) -> (StatusCode, String) {
        let mut builder = Request::builder().uri(path);
        if privileged {
            builder = builder.header(PRIVILEGED_HEADER, "1");
        }
        let response = router
            .clone()
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    #[tokio::test]
    async fn second_public_request_is_served_from_cache() {
        let (state, hits) = fixture();
        let app = router(state, hits.clone());

        let (status, body) = get_path(&app, "/payload", false).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "payload-body");

        let (_, body) = get_path(&app, "/payload", false).await;
        assert_eq!(body, "payload-body");
        assert_eq!(hits.load(Ordering::SeqCst), 1, "handler ran only once");
    }

    #[tokio::test]
    async fn privileged_requests_bypass_the_cache() {
        let (state, hits) = fixture();
        let app = router(state, hits.clone());

        get_path(&app, "/payload", true).await;
        get_path(&app, "/payload", true).await;
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn pending_sweep_blocks_shared_caching() {
        let (state, hits) = fixture();
        state
            .scheduler
            .record_pending_sweep(TermKind::Tag, Uuid::new_v4())
            .await
            .unwrap();
        let app = router(state, hits.clone());

        get_path(&app, "/payload", false).await;
        get_path(&app, "/payload", false).await;
        // Both requests executed the handler: nothing was shared.
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn query_parameter_order_shares_one_entry() {
        let (state, hits) = fixture();
        let app = router(state, hits.clone());

        get_path(&app, "/payload?a=1&b=2", false).await;
        get_path(&app, "/payload?b=2&a=1", false).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        get_path(&app, "/payload?a=1&b=3", false).await;
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
