use crate::queue::coordinator::{EnrichmentCoordinator, EnrichmentStatusReport, EnrichmentStats};
use crate::services::ingest_service::DEFAULT_COLLECTION;
use crate::utils::error::ApiError;
use axum::{
    extract::{rejection::JsonRejection, Extension, Path, Query},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub collection: Option<String>,
}

pub async fn status_handler(
    Extension(coordinator): Extension<Arc<EnrichmentCoordinator>>,
    Path(base_id): Path<String>,
    Query(params): Query<StatusQuery>,
) -> Result<Json<EnrichmentStatusReport>, ApiError> {
    let collection = params
        .collection
        .unwrap_or_else(|| DEFAULT_COLLECTION.to_string());
    let report = coordinator
        .get_status(&collection, &base_id)
        .await
        .map_err(|e| ApiError::Database(e.to_string()))?
        .ok_or_else(|| ApiError::NotFound(format!("document '{base_id}' not found")))?;
    Ok(Json(report))
}

pub async fn stats_handler(
    Extension(coordinator): Extension<Arc<EnrichmentCoordinator>>,
) -> Result<Json<EnrichmentStats>, ApiError> {
    let stats = coordinator
        .get_stats()
        .await
        .map_err(|e| ApiError::Database(e.to_string()))?;
    Ok(Json(stats))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueRequest {
    pub collection: Option<String>,
    #[serde(default)]
    pub force: bool,
    pub filter: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EnqueueResponse {
    pub ok: bool,
    pub enqueued: usize,
}

pub async fn enqueue_handler(
    Extension(coordinator): Extension<Arc<EnrichmentCoordinator>>,
    body: Result<Json<EnqueueRequest>, JsonRejection>,
) -> Result<Json<EnqueueResponse>, ApiError> {
    let Json(request) =
        body.map_err(|e| ApiError::Validation(format!("invalid request body: {e}")))?;
    let collection = request
        .collection
        .unwrap_or_else(|| DEFAULT_COLLECTION.to_string());

    info!(
        "Enrichment enqueue requested (collection={}, force={})",
        collection, request.force
    );
    let enqueued = coordinator
        .enqueue(&collection, request.force, request.filter.as_deref())
        .await
        .map_err(|e| ApiError::Database(e.to_string()))?;

    Ok(Json(EnqueueResponse { ok: true, enqueued }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearRequest {
    pub collection: String,
    pub filter: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub ok: bool,
    pub cleared: u64,
}

pub async fn clear_handler(
    Extension(coordinator): Extension<Arc<EnrichmentCoordinator>>,
    body: Result<Json<ClearRequest>, JsonRejection>,
) -> Result<Json<ClearResponse>, ApiError> {
    let Json(request) =
        body.map_err(|e| ApiError::Validation(format!("invalid request body: {e}")))?;

    info!("Queue clear requested (collection={})", request.collection);
    let cleared = coordinator
        .clear_queue(&request.collection, request.filter.as_deref())
        .await
        .map_err(|e| ApiError::Database(e.to_string()))?;

    Ok(Json(ClearResponse { ok: true, cleared }))
}
