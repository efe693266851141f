use anyhow::Result;
use rag_engine::config::Settings;
use rag_engine::database::{DbPool, Repository};
use rag_engine::graph::GraphBackend;
use rag_engine::queue::{EnrichmentCoordinator, TaskQueue};
use rag_engine::routing::{FilterParser, QueryRouter};
use rag_engine::security::{ApiAuth, RateLimiter};
use rag_engine::services::strategies::assert_blend_weights;
use rag_engine::services::{
    BlobStore, EmbeddingProvider, EmbeddingService, IngestService, LlmService, QueryService,
};
use rag_engine::state::{build_router, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,rag_engine=debug".to_string()),
        )
        .with_target(true)
        .json()
        .init();

    info!("Starting rag-engine server...");

    // Blended scoring must stay a convex combination.
    assert_blend_weights();

    let settings = Settings::load()?;
    info!("Configuration loaded");

    let db_pool = DbPool::new(&settings.database).await?;
    db_pool.migrate(settings.database.vector_size).await?;
    info!("Database connection established");

    let repository = Arc::new(Repository::new(db_pool.clone()));
    let embedding_service = Arc::new(EmbeddingService::new(&settings.embedding));
    let embedder: Arc<dyn EmbeddingProvider> = embedding_service;
    let blob_store = Arc::new(BlobStore::new(&settings.blob)?);
    let task_queue = Arc::new(TaskQueue::new(
        db_pool.clone(),
        settings.enrichment.max_attempts,
    ));

    let llm = (settings.router.llm_enabled || settings.router.filter_llm_enabled).then(|| {
        Arc::new(LlmService::new(
            settings.router.llm_base_url.clone(),
            settings.router.llm_api_key.clone(),
        ))
    });
    let query_router = Arc::new(QueryRouter::new(settings.router.clone(), llm.clone()));
    let filter_parser = Arc::new(FilterParser::new(settings.router.clone(), llm));

    let graph = Arc::new(GraphBackend::new(db_pool.clone()));

    let ingest_service = Arc::new(IngestService::new(
        Arc::clone(&repository),
        Arc::clone(&embedder),
        Arc::clone(&blob_store),
        Arc::clone(&task_queue),
        settings.ingest.clone(),
        settings.enrichment.clone(),
    ));

    let query_service = Arc::new(QueryService::new(
        Arc::clone(&repository),
        Arc::clone(&embedder),
        Arc::clone(&graph),
        query_router,
        filter_parser,
        settings.query.clone(),
    ));

    let coordinator = Arc::new(EnrichmentCoordinator::new(
        db_pool.clone(),
        Arc::clone(&repository),
        settings.enrichment.max_attempts,
    ));

    // Stale-lease watchdog
    {
        let queue = Arc::clone(&task_queue);
        let interval_secs = settings.enrichment.watchdog_interval_secs.max(1);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
            loop {
                ticker.tick().await;
                if let Err(e) = queue.recover_stale().await {
                    warn!("Stale-lease recovery failed: {}", e);
                }
            }
        });
        info!("Stale-lease watchdog started ({}s interval)", interval_secs);
    }

    let auth = Arc::new(ApiAuth::new(settings.security.api_token.as_deref()));
    let rate_limiter = Arc::new(RateLimiter::new(
        settings.security.rate_limit_max,
        settings.security.rate_limit_window_ms,
    ));

    let settings = Arc::new(settings);
    let app = build_router(AppState {
        settings: Arc::clone(&settings),
        repository,
        ingest_service,
        query_service,
        coordinator,
        graph,
        auth,
        rate_limiter,
    });

    let addr = SocketAddr::from((
        settings.server.host.parse::<std::net::IpAddr>()?,
        settings.server.port,
    ));

    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    db_pool.close().await;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to install shutdown handler: {}", e);
        return;
    }
    info!("Shutdown signal received");
}
