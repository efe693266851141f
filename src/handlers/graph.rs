use crate::config::Settings;
use crate::graph::{EntityRelationshipEdge, GraphBackend, ResolvedEntity};
use crate::utils::error::ApiError;
use axum::{
    extract::{Extension, Path},
    Json,
};
use serde::Serialize;
use std::sync::Arc;

const RELATIONSHIP_LIMIT: i64 = 100;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityResponse {
    pub entity: ResolvedEntity,
    pub relationships: Vec<EntityRelationshipEdge>,
}

pub async fn entity_handler(
    Extension(backend): Extension<Arc<GraphBackend>>,
    Extension(settings): Extension<Arc<Settings>>,
    Path(name): Path<String>,
) -> Result<Json<EntityResponse>, ApiError> {
    if !settings.query.graph_enabled {
        return Err(ApiError::ServiceUnavailable(
            "graph backend is disabled".to_string(),
        ));
    }

    let entity = backend
        .get_entity(&name)
        .await
        .map_err(|e| ApiError::Database(e.to_string()))?
        .ok_or_else(|| ApiError::NotFound(format!("entity '{name}' not found")))?;

    let relationships = backend
        .get_entity_relationships(entity.id, RELATIONSHIP_LIMIT)
        .await
        .map_err(|e| ApiError::Database(e.to_string()))?;

    Ok(Json(EntityResponse {
        entity,
        relationships,
    }))
}
