use crate::database::ScoredChunk;
use crate::graph::TraversalParams;
use crate::services::query_service::{
    GraphResult, QueryEmbedder, QueryPlan, QueryResult, QueryService,
};
use crate::utils::error::ApiError;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};
use uuid::Uuid;

pub const SEMANTIC_WEIGHT: f64 = 0.85;
pub const MENTION_WEIGHT: f64 = 0.15;
pub const MENTION_CAP: i32 = 10;

/// At most this many distinct entity names are pulled out of seed chunks.
const SEED_ENTITY_CAP: usize = 50;

const CANDIDATE_HARD_CAP: usize = 500;

/// The blend must stay a convex combination; called once at startup.
pub fn assert_blend_weights() {
    assert!(
        (SEMANTIC_WEIGHT + MENTION_WEIGHT - 1.0).abs() < 1e-9,
        "blended scoring weights must sum to 1.0"
    );
}

pub(crate) fn blended_score(semantic: f64, mentions: i32) -> f64 {
    let mention_part = f64::from(mentions.clamp(0, MENTION_CAP)) / f64::from(MENTION_CAP);
    SEMANTIC_WEIGHT * semantic + MENTION_WEIGHT * mention_part
}

fn candidate_limit(top_k: usize) -> i64 {
    (top_k * 5).min(CANDIDATE_HARD_CAP) as i64
}

impl QueryService {
    // ==================== Hybrid: filter -> rerank ====================

    /// Phase 1 collects candidate ids from the filter alone; phase 2 embeds
    /// the query exactly once and reranks the candidates in a single batch.
    pub(crate) async fn hybrid_metadata_flow(
        &self,
        plan: &QueryPlan,
        embedder: &mut QueryEmbedder<'_>,
    ) -> Result<Vec<QueryResult>, ApiError> {
        let filter = self.translated_filter(plan, 2)?;
        let candidates = self
            .repository
            .filter_candidate_ids(&plan.collection, filter, candidate_limit(plan.top_k))
            .await
            .map_err(|e| ApiError::Database(e.to_string()))?;

        if candidates.is_empty() {
            // Nothing matched the filter; the embedder is never touched.
            return Ok(Vec::new());
        }

        let vector = embedder.vector().await?;
        let reranked = self
            .repository
            .rerank_chunks_by_ids(&candidates, vector)
            .await
            .map_err(|e| ApiError::Database(e.to_string()))?;

        Ok(reranked
            .into_iter()
            .filter(|chunk| chunk.score >= plan.min_score)
            .take(plan.top_k)
            .map(|chunk| {
                let score = chunk.score;
                QueryResult::from_chunk(chunk, score)
            })
            .collect())
    }

    // ==================== Hybrid: seed -> traverse -> rerank ====================

    pub(crate) async fn hybrid_graph_flow(
        &self,
        plan: &QueryPlan,
        embedder: &mut QueryEmbedder<'_>,
    ) -> Result<(Vec<QueryResult>, Option<GraphResult>), ApiError> {
        let vector = embedder.vector().await?;
        let filter = self.translated_filter(plan, 4)?;

        let seeds = self
            .repository
            .semantic_search(
                &plan.collection,
                vector.clone(),
                1.0 - plan.min_score,
                filter,
                self.config.seed_limit as i64,
            )
            .await
            .map_err(|e| ApiError::Database(e.to_string()))?;

        let seed_names = extract_entity_names(&seeds, SEED_ENTITY_CAP);
        if seed_names.is_empty() {
            let results = finalize(seeds.into_iter().map(seed_scored).collect(), plan);
            return Ok((
                results,
                Some(GraphResult {
                    warning: Some(
                        "No entities found in seed results to seed the graph".to_string(),
                    ),
                    ..Default::default()
                }),
            ));
        }

        let resolved = self
            .graph
            .resolve_entities(&seed_names)
            .await
            .map_err(|e| ApiError::Database(e.to_string()))?;
        if resolved.is_empty() {
            let results = finalize(seeds.into_iter().map(seed_scored).collect(), plan);
            return Ok((
                results,
                Some(GraphResult {
                    warning: Some("None of the seed entities could be resolved".to_string()),
                    ..Default::default()
                }),
            ));
        }

        let params = traversal_params(plan, self.config.graph_time_limit_ms);
        let seed_ids: Vec<Uuid> = resolved.iter().map(|e| e.id).collect();
        let traversal = self
            .graph
            .traverse(&seed_ids, &params)
            .await
            .map_err(|e| ApiError::Database(e.to_string()))?;

        let entity_ids: Vec<Uuid> = traversal.entities.iter().map(|e| e.id).collect();
        let documents = self
            .graph
            .get_entity_documents(&entity_ids, candidate_limit(plan.top_k))
            .await
            .map_err(|e| ApiError::Database(e.to_string()))?;

        // Per document, the strongest entity association wins.
        let mut mentions_by_doc: HashMap<Uuid, i32> = HashMap::new();
        for doc in &documents {
            let entry = mentions_by_doc.entry(doc.document_id).or_insert(0);
            *entry = (*entry).max(doc.mention_count);
        }
        let doc_ids: Vec<Uuid> = mentions_by_doc.keys().copied().collect();

        let graph_chunks = self
            .repository
            .rerank_chunks_by_documents(&doc_ids, vector)
            .await
            .map_err(|e| ApiError::Database(e.to_string()))?;

        // Merge pools: graph-pool scores blend semantic similarity with the
        // capped mention count; on collision the graph-pool score wins.
        let mut merged: HashMap<Uuid, (ScoredChunk, f64)> = HashMap::new();
        for chunk in seeds {
            let score = chunk.score;
            merged.insert(chunk.id, (chunk, score));
        }
        for chunk in graph_chunks {
            let mentions = mentions_by_doc.get(&chunk.document_id).copied().unwrap_or(0);
            let score = blended_score(chunk.score, mentions);
            merged.insert(chunk.id, (chunk, score));
        }

        let results = finalize(merged.into_values().collect(), plan);

        let include_documents = plan.graph.include_documents.unwrap_or(false);
        let warning = traversal.warnings.first().cloned();
        let graph = GraphResult {
            entities: traversal.entities,
            edges: traversal.edges,
            paths: traversal.paths,
            meta: traversal.meta,
            warning,
            documents: include_documents.then_some(documents),
            seeds: resolved,
        };

        Ok((results, Some(graph)))
    }

    // ==================== Pure graph ====================

    /// Semantic results plus a graph expansion. Graph-side failures degrade
    /// to an absent graph object instead of failing the query.
    pub(crate) async fn graph_flow(
        &self,
        plan: &QueryPlan,
        embedder: &mut QueryEmbedder<'_>,
    ) -> Result<(Vec<QueryResult>, Option<GraphResult>), ApiError> {
        let filter = self.translated_filter(plan, 4)?;
        let vector = embedder.vector().await?;

        let chunks = self
            .repository
            .semantic_search(
                &plan.collection,
                vector,
                1.0 - plan.min_score,
                filter,
                plan.top_k as i64,
            )
            .await
            .map_err(|e| ApiError::Database(e.to_string()))?;

        let seed_names = match &plan.graph.seed_entities {
            Some(explicit) if !explicit.is_empty() => explicit.clone(),
            _ => extract_entity_names(&chunks, SEED_ENTITY_CAP),
        };

        let results: Vec<QueryResult> = chunks
            .into_iter()
            .map(|chunk| {
                let score = chunk.score;
                QueryResult::from_chunk(chunk, score)
            })
            .collect();

        if seed_names.is_empty() {
            return Ok((results, None));
        }

        let resolved = match self.graph.resolve_entities(&seed_names).await {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!("Entity resolution failed, degrading graph result: {}", e);
                return Ok((results, None));
            }
        };
        if resolved.is_empty() {
            return Ok((results, None));
        }

        let params = traversal_params(plan, self.config.graph_time_limit_ms);
        let seed_ids: Vec<Uuid> = resolved.iter().map(|e| e.id).collect();
        let traversal = match self.graph.traverse(&seed_ids, &params).await {
            Ok(traversal) => traversal,
            Err(e) => {
                warn!("Graph traversal failed, degrading graph result: {}", e);
                return Ok((results, None));
            }
        };

        let include_documents = plan.graph.include_documents.unwrap_or(false);
        let documents = if include_documents {
            let entity_ids: Vec<Uuid> = traversal.entities.iter().map(|e| e.id).collect();
            match self
                .graph
                .get_entity_documents(&entity_ids, candidate_limit(plan.top_k))
                .await
            {
                Ok(docs) => Some(docs),
                Err(e) => {
                    debug!("Entity document join failed: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let warning = traversal.warnings.first().cloned();
        Ok((
            results,
            Some(GraphResult {
                entities: traversal.entities,
                edges: traversal.edges,
                paths: traversal.paths,
                meta: traversal.meta,
                warning,
                documents,
                seeds: resolved,
            }),
        ))
    }
}

fn seed_scored(chunk: ScoredChunk) -> (ScoredChunk, f64) {
    let score = chunk.score;
    (chunk, score)
}

/// Shared tail of every hybrid flow: min-score cut, descending sort,
/// truncate to top-k.
fn finalize(scored: Vec<(ScoredChunk, f64)>, plan: &QueryPlan) -> Vec<QueryResult> {
    let mut scored: Vec<(ScoredChunk, f64)> = scored
        .into_iter()
        .filter(|(_, score)| *score >= plan.min_score)
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored
        .into_iter()
        .take(plan.top_k)
        .map(|(chunk, score)| QueryResult::from_chunk(chunk, score))
        .collect()
}

fn traversal_params(plan: &QueryPlan, default_time_limit_ms: i64) -> TraversalParams {
    let defaults = TraversalParams::default();
    TraversalParams {
        max_depth: plan.graph.max_depth.unwrap_or(defaults.max_depth),
        max_entities: plan.graph.max_entities.unwrap_or(defaults.max_entities),
        time_limit_ms: plan.graph.time_limit_ms.unwrap_or(default_time_limit_ms),
        relationship_types: plan.graph.relationship_types.clone(),
        include_documents: plan.graph.include_documents.unwrap_or(false),
    }
}

/// Entity names carried by seed chunks: tier-2 uses `entities[].text`,
/// tier-3 uses `entities[].name`. Case-insensitive dedup, first casing
/// kept, capped.
fn extract_entity_names(chunks: &[ScoredChunk], cap: usize) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut names = Vec::new();

    fn push(seen: &mut HashSet<String>, names: &mut Vec<String>, name: &str) {
        let trimmed = name.trim();
        if !trimmed.is_empty() && seen.insert(trimmed.to_lowercase()) {
            names.push(trimmed.to_string());
        }
    }

    for chunk in chunks {
        if names.len() >= cap {
            break;
        }
        if let Some(entities) = chunk
            .tier2_meta
            .as_ref()
            .and_then(|m| m.get("entities"))
            .and_then(|e| e.as_array())
        {
            for entity in entities {
                if let Some(text) = entity.get("text").and_then(|t| t.as_str()) {
                    push(&mut seen, &mut names, text);
                }
            }
        }
        if let Some(entities) = chunk
            .tier3_meta
            .as_ref()
            .and_then(|m| m.get("entities"))
            .and_then(|e| e.as_array())
        {
            for entity in entities {
                if let Some(name) = entity.get("name").and_then(|n| n.as_str()) {
                    push(&mut seen, &mut names, name);
                }
            }
        }
    }

    names.truncate(cap);
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chunk_with_meta(tier2: Option<serde_json::Value>, tier3: Option<serde_json::Value>) -> ScoredChunk {
        ScoredChunk {
            id: Uuid::new_v4(),
            document_id: Uuid::new_v4(),
            chunk_index: 0,
            text: "text".to_string(),
            doc_type: None,
            repo_id: None,
            path: None,
            lang: None,
            item_url: None,
            tier1_meta: None,
            tier2_meta: tier2,
            tier3_meta: tier3,
            enrichment_status: "enriched".to_string(),
            source: "s".to_string(),
            base_id: "b".to_string(),
            score: 0.9,
        }
    }

    #[test]
    fn blend_weights_sum_to_one() {
        assert_blend_weights();
    }

    #[test]
    fn blended_score_caps_mentions_at_ten() {
        let uncapped = blended_score(0.8, 10);
        assert_eq!(blended_score(0.8, 25), uncapped);
        assert!((blended_score(1.0, 10) - 1.0).abs() < 1e-9);
        assert!((blended_score(0.8, 5) - (0.85 * 0.8 + 0.15 * 0.5)).abs() < 1e-9);
        assert!((blended_score(0.8, 0) - 0.85 * 0.8).abs() < 1e-9);
    }

    #[test]
    fn extracts_names_from_both_tiers_with_dedup() {
        let chunks = vec![
            chunk_with_meta(
                Some(json!({"entities": [{"text": "AuthService"}, {"text": "Postgres"}]})),
                Some(json!({"entities": [{"name": "authservice"}, {"name": "Redis"}]})),
            ),
            chunk_with_meta(None, Some(json!({"entities": [{"name": "Postgres"}]}))),
        ];
        let names = extract_entity_names(&chunks, 50);
        assert_eq!(names, vec!["AuthService", "Postgres", "Redis"]);
    }

    #[test]
    fn entity_extraction_respects_the_cap() {
        let entities: Vec<_> = (0..60).map(|i| json!({"text": format!("Entity{i}")})).collect();
        let chunks = vec![chunk_with_meta(Some(json!({"entities": entities})), None)];
        assert_eq!(extract_entity_names(&chunks, 50).len(), 50);
    }

    #[test]
    fn candidate_limit_is_capped() {
        assert_eq!(candidate_limit(8), 40);
        assert_eq!(candidate_limit(100), 500);
        assert_eq!(candidate_limit(200), 500);
    }
}
