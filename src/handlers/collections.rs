use crate::database::{CollectionStatsRow, Repository};
use crate::utils::error::ApiError;
use axum::{extract::Extension, Json};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct CollectionsResponse {
    pub ok: bool,
    pub collections: Vec<CollectionStatsRow>,
}

pub async fn collections_handler(
    Extension(repository): Extension<Arc<Repository>>,
) -> Result<Json<CollectionsResponse>, ApiError> {
    let collections = repository
        .collection_stats()
        .await
        .map_err(|e| ApiError::Database(e.to_string()))?;
    Ok(Json(CollectionsResponse {
        ok: true,
        collections,
    }))
}
