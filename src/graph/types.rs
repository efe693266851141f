use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedEntity {
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub mention_count: i32,
    /// The name the caller asked for, original casing preserved.
    pub requested_name: String,
}

#[derive(Debug, Clone)]
pub struct TraversalParams {
    pub max_depth: i32,
    pub max_entities: i64,
    pub time_limit_ms: i64,
    pub relationship_types: Option<Vec<String>>,
    pub include_documents: bool,
}

impl Default for TraversalParams {
    fn default() -> Self {
        Self {
            max_depth: 2,
            max_entities: 50,
            time_limit_ms: 5000,
            relationship_types: None,
            include_documents: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphEntity {
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub mention_count: i32,
    pub depth: i32,
    pub is_seed: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    pub relationship_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A root-to-leaf traversal path: entity names in visit order plus the
/// relationship type of each hop.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphPath {
    pub entities: Vec<String>,
    pub relationship_types: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TraversalMeta {
    pub capped: bool,
    pub timed_out: bool,
}

#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TraversalResult {
    pub entities: Vec<GraphEntity>,
    pub edges: Vec<GraphEdge>,
    pub paths: Vec<GraphPath>,
    pub meta: TraversalMeta,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityDocument {
    pub document_id: Uuid,
    pub base_id: String,
    pub source: String,
    pub entity_id: Uuid,
    pub entity_name: String,
    pub mention_count: i32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRelationshipEdge {
    pub source: String,
    pub target: String,
    pub relationship_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// `outbound` when the looked-up entity is the edge source.
    pub direction: String,
}
