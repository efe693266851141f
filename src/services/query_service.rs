use crate::config::QueryConfig;
use crate::database::{Repository, ScoredChunk};
use crate::filter::{translate_filter, FilterDsl};
use crate::graph::{
    EntityDocument, GraphBackend, GraphEdge, GraphEntity, GraphPath, ResolvedEntity, TraversalMeta,
};
use crate::routing::{FilterParser, QueryRouter, RouteInput, RouteMethod, Strategy};
use crate::services::embedding_service::EmbeddingProvider;
use crate::services::ingest_service::DEFAULT_COLLECTION;
use crate::utils::error::ApiError;
use pgvector::Vector;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub collection: Option<String>,
    #[serde(default)]
    pub query: String,
    pub top_k: Option<usize>,
    pub min_score: Option<f64>,
    pub filter: Option<FilterDsl>,
    #[serde(default)]
    pub graph_expand: bool,
    pub graph: Option<GraphParamsRequest>,
    pub strategy: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct GraphParamsRequest {
    pub max_depth: Option<i32>,
    pub max_entities: Option<i64>,
    pub time_limit_ms: Option<i64>,
    pub relationship_types: Option<Vec<String>>,
    pub include_documents: Option<bool>,
    pub seed_entities: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    pub ok: bool,
    pub results: Vec<QueryResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph: Option<GraphResult>,
    pub routing: RoutingInfo,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    /// External chunk reference, `"<chunkUUID>:<chunkIndex>"`.
    pub id: String,
    pub document_id: Uuid,
    pub base_id: String,
    pub source: String,
    pub chunk_index: i32,
    pub text: String,
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier1_meta: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier2_meta: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier3_meta: Option<Value>,
}

impl QueryResult {
    pub fn from_chunk(chunk: ScoredChunk, score: f64) -> Self {
        Self {
            id: chunk.external_id(),
            document_id: chunk.document_id,
            base_id: chunk.base_id,
            source: chunk.source,
            chunk_index: chunk.chunk_index,
            text: chunk.text,
            score,
            doc_type: chunk.doc_type,
            repo_id: chunk.repo_id,
            path: chunk.path,
            lang: chunk.lang,
            item_url: chunk.item_url,
            tier1_meta: chunk.tier1_meta,
            tier2_meta: chunk.tier2_meta,
            tier3_meta: chunk.tier3_meta,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingInfo {
    pub strategy: Strategy,
    pub confidence: f64,
    pub method: RouteMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<&'static str>,
    pub inferred_filter: bool,
}

#[derive(Debug, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GraphResult {
    pub entities: Vec<GraphEntity>,
    pub edges: Vec<GraphEdge>,
    pub paths: Vec<GraphPath>,
    pub meta: TraversalMeta,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documents: Option<Vec<EntityDocument>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub seeds: Vec<ResolvedEntity>,
}

/// Caches the query embedding so `embed()` runs at most once per request
/// regardless of which strategies end up running.
pub(crate) struct QueryEmbedder<'a> {
    embedder: &'a dyn EmbeddingProvider,
    query: &'a str,
    cached: Option<Vec<f32>>,
}

impl<'a> QueryEmbedder<'a> {
    pub(crate) fn new(embedder: &'a dyn EmbeddingProvider, query: &'a str) -> Self {
        Self {
            embedder,
            query,
            cached: None,
        }
    }

    pub(crate) async fn vector(&mut self) -> Result<Vector, ApiError> {
        if self.cached.is_none() {
            let mut vectors = self
                .embedder
                .embed(&[self.query.to_string()])
                .await
                .map_err(|e| ApiError::Upstream(e.to_string()))?;
            let vector = vectors
                .pop()
                .ok_or_else(|| ApiError::Upstream("embedder returned no vector".to_string()))?;
            self.cached = Some(vector);
        }
        Ok(Vector::from(self.cached.clone().unwrap_or_default()))
    }
}

/// Resolved knobs for one query, shared by every flow.
pub(crate) struct QueryPlan {
    pub(crate) collection: String,
    pub(crate) top_k: usize,
    pub(crate) min_score: f64,
    pub(crate) filter: Option<FilterDsl>,
    pub(crate) graph: GraphParamsRequest,
    pub(crate) graph_expand: bool,
}

pub struct QueryService {
    pub(crate) repository: Arc<Repository>,
    pub(crate) embedder: Arc<dyn EmbeddingProvider>,
    pub(crate) graph: Arc<GraphBackend>,
    pub(crate) router: Arc<QueryRouter>,
    pub(crate) filter_parser: Arc<FilterParser>,
    pub(crate) config: QueryConfig,
}

impl QueryService {
    pub fn new(
        repository: Arc<Repository>,
        embedder: Arc<dyn EmbeddingProvider>,
        graph: Arc<GraphBackend>,
        router: Arc<QueryRouter>,
        filter_parser: Arc<FilterParser>,
        config: QueryConfig,
    ) -> Self {
        Self {
            repository,
            embedder,
            graph,
            router,
            filter_parser,
            config,
        }
    }

    pub async fn query(&self, request: QueryRequest) -> Result<QueryResponse, ApiError> {
        let explicit = match request.strategy.as_deref() {
            Some(raw) => Some(Strategy::parse(raw).ok_or_else(|| {
                ApiError::Validation(format!("unknown strategy '{raw}'"))
            })?),
            None => None,
        };

        let decision = self
            .router
            .route(RouteInput {
                query: &request.query,
                explicit,
                has_filter: request.filter.is_some(),
                graph_expand: request.graph_expand,
            })
            .await;

        // No explicit filter: the parser may infer one from the free text.
        let mut inferred_filter = false;
        let filter = match request.filter {
            Some(filter) => Some(filter),
            None => match self.filter_parser.parse(&request.query).await {
                Some(inferred) => {
                    debug!("Filter inferred from query text");
                    inferred_filter = true;
                    Some(inferred)
                }
                None => None,
            },
        };

        let plan = QueryPlan {
            collection: request
                .collection
                .unwrap_or_else(|| DEFAULT_COLLECTION.to_string()),
            top_k: request.top_k.unwrap_or(self.config.default_top_k).clamp(1, 100),
            min_score: request
                .min_score
                .unwrap_or_else(|| default_min_score(&request.query)),
            filter,
            graph: request.graph.unwrap_or_default(),
            graph_expand: request.graph_expand,
        };

        let mut embedder = QueryEmbedder::new(self.embedder.as_ref(), &request.query);

        let (results, graph) = match decision.strategy {
            Strategy::Semantic => (self.semantic_flow(&plan, &mut embedder).await?, None),
            Strategy::Metadata => (self.metadata_flow(&plan).await?, None),
            Strategy::Graph => self.graph_flow(&plan, &mut embedder).await?,
            Strategy::Hybrid => {
                if plan.graph_expand || plan.filter.is_none() {
                    self.hybrid_graph_flow(&plan, &mut embedder).await?
                } else {
                    (self.hybrid_metadata_flow(&plan, &mut embedder).await?, None)
                }
            }
        };

        Ok(QueryResponse {
            ok: true,
            results,
            graph,
            routing: RoutingInfo {
                strategy: decision.strategy,
                confidence: decision.confidence,
                method: decision.method,
                rule: decision.rule,
                inferred_filter,
            },
        })
    }

    // ==================== Semantic ====================

    pub(crate) async fn semantic_flow(
        &self,
        plan: &QueryPlan,
        embedder: &mut QueryEmbedder<'_>,
    ) -> Result<Vec<QueryResult>, ApiError> {
        let filter = self.translated_filter(plan, 4)?;
        let vector = embedder.vector().await?;
        let max_distance = 1.0 - plan.min_score;

        let chunks = self
            .repository
            .semantic_search(
                &plan.collection,
                vector,
                max_distance,
                filter,
                plan.top_k as i64,
            )
            .await
            .map_err(|e| ApiError::Database(e.to_string()))?;

        Ok(chunks
            .into_iter()
            .map(|chunk| {
                let score = chunk.score;
                QueryResult::from_chunk(chunk, score)
            })
            .collect())
    }

    // ==================== Metadata ====================

    /// Structured-only flow: no embedding, newest first, score pinned at 1.
    pub(crate) async fn metadata_flow(&self, plan: &QueryPlan) -> Result<Vec<QueryResult>, ApiError> {
        let filter = self.translated_filter(plan, 2)?;

        let chunks = self
            .repository
            .metadata_search(&plan.collection, filter, plan.top_k as i64)
            .await
            .map_err(|e| ApiError::Database(e.to_string()))?;

        Ok(chunks
            .into_iter()
            .map(|chunk| QueryResult::from_chunk(chunk, 1.0))
            .collect())
    }

    /// Translates the plan's filter for a query whose fixed parameters end
    /// at `$offset`. User-supplied filters surface validation failures as
    /// 400s; inferred filters were already validated by the parser.
    pub(crate) fn translated_filter(
        &self,
        plan: &QueryPlan,
        offset: usize,
    ) -> Result<Option<(String, Vec<String>)>, ApiError> {
        match &plan.filter {
            Some(dsl) => {
                let fragment = translate_filter(dsl.clone(), offset)
                    .map_err(|e| ApiError::Validation(e.to_string()))?;
                if fragment.sql.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some((fragment.sql, fragment.params)))
                }
            }
            None => Ok(None),
        }
    }
}

/// Default minimum score scales with query specificity: short queries match
/// loosely, long ones demand closer neighbors.
pub(crate) fn default_min_score(query: &str) -> f64 {
    match query.split_whitespace().count() {
        0 | 1 => 0.3,
        2 => 0.4,
        3 | 4 => 0.5,
        _ => 0.6,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn min_score_defaults_follow_term_count() {
        assert_eq!(default_min_score("one"), 0.3);
        assert_eq!(default_min_score("two words"), 0.4);
        assert_eq!(default_min_score("three little words"), 0.5);
        assert_eq!(default_min_score("four little words here"), 0.5);
        assert_eq!(default_min_score("five or more words right here"), 0.6);
        assert_eq!(default_min_score(""), 0.3);
    }

    struct CountingEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for CountingEmbedder {
        async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts.iter().map(|_| vec![0.1, 0.2, 0.3]).collect())
        }
    }

    #[tokio::test]
    async fn query_embedding_happens_at_most_once() {
        let provider = CountingEmbedder {
            calls: AtomicUsize::new(0),
        };
        let mut embedder = QueryEmbedder::new(&provider, "some query");

        // Several strategies asking for the vector still cost one call.
        let first = embedder.vector().await.unwrap();
        let second = embedder.vector().await.unwrap();
        let third = embedder.vector().await.unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.to_vec(), second.to_vec());
        assert_eq!(second.to_vec(), third.to_vec());
    }
}
