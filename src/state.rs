use crate::config::Settings;
use crate::database::Repository;
use crate::graph::GraphBackend;
use crate::handlers;
use crate::queue::EnrichmentCoordinator;
use crate::security::{
    middleware::{auth_middleware, rate_limit_middleware},
    ApiAuth, RateLimiter,
};
use crate::services::{IngestService, QueryService};
use axum::{
    extract::DefaultBodyLimit,
    http::HeaderValue,
    middleware,
    routing::{get, post},
    Extension, Router,
};
use std::sync::Arc;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{Any, CorsLayer},
    trace::{DefaultMakeSpan, TraceLayer},
};
use tracing::warn;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub repository: Arc<Repository>,
    pub ingest_service: Arc<IngestService>,
    pub query_service: Arc<QueryService>,
    pub coordinator: Arc<EnrichmentCoordinator>,
    pub graph: Arc<GraphBackend>,
    pub auth: Arc<ApiAuth>,
    pub rate_limiter: Arc<RateLimiter>,
}

pub fn build_router(state: AppState) -> Router {
    // Public routes (no auth, no rate limit)
    let public_routes = Router::new().route("/healthz", get(handlers::health::health_check));

    // Protected routes
    let protected_routes = Router::new()
        .route("/ingest", post(handlers::ingest::ingest_handler))
        .route("/query", post(handlers::query::query_handler))
        .route(
            "/query/fulltext-first",
            post(handlers::query::fulltext_first_handler),
        )
        .route(
            "/query/download-first",
            post(handlers::query::download_first_handler),
        )
        .route(
            "/enrichment/status/{base_id}",
            get(handlers::enrichment::status_handler),
        )
        .route("/enrichment/stats", get(handlers::enrichment::stats_handler))
        .route(
            "/enrichment/enqueue",
            post(handlers::enrichment::enqueue_handler),
        )
        .route("/enrichment/clear", post(handlers::enrichment::clear_handler))
        .route("/graph/entity/{name}", get(handlers::graph::entity_handler))
        .route("/collections", get(handlers::collections::collections_handler))
        .layer(middleware::from_fn(rate_limit_middleware))
        .layer(middleware::from_fn(auth_middleware));

    let mut app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        // Shared state
        .layer(Extension(state.repository))
        .layer(Extension(state.ingest_service))
        .layer(Extension(state.query_service))
        .layer(Extension(state.coordinator))
        .layer(Extension(state.graph))
        .layer(Extension(state.auth))
        .layer(Extension(state.rate_limiter))
        .layer(Extension(Arc::clone(&state.settings)))
        // Tracing + panic containment
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(false)),
        )
        .layer(CatchPanicLayer::new())
        // Body limit
        .layer(DefaultBodyLimit::max(state.settings.server.body_limit_bytes));

    // CORS is off unless an exact origin is configured.
    if let Some(origin) = &state.settings.security.cors_origin {
        match origin.parse::<HeaderValue>() {
            Ok(origin) => {
                app = app.layer(
                    CorsLayer::new()
                        .allow_origin(origin)
                        .allow_methods(Any)
                        .allow_headers(Any),
                );
            }
            Err(_) => warn!("Invalid CORS_ORIGIN value, CORS stays disabled"),
        }
    }

    app
}
