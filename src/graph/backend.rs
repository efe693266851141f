use super::types::{
    EntityDocument, EntityRelationshipEdge, GraphEdge, GraphEntity, GraphPath, ResolvedEntity,
    TraversalParams, TraversalResult,
};
use crate::database::DbPool;
use anyhow::Result;
use sqlx::Row;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};
use uuid::Uuid;

/// Prefix resolution is skipped entirely when more than this many names
/// remain unresolved after the exact pass.
const PREFIX_RESOLVE_MAX: usize = 10;

const STATEMENT_TIMEOUT_CODE: &str = "57014";

pub struct GraphBackend {
    pool: DbPool,
}

impl GraphBackend {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    // ==================== Resolution ====================

    /// Resolves entity names to graph nodes: one exact (case-insensitive)
    /// pass, then one batched prefix pass for whatever is left. Names are
    /// deduplicated case-insensitively up front, keeping the first casing
    /// seen as `requested_name`.
    pub async fn resolve_entities(&self, names: &[String]) -> Result<Vec<ResolvedEntity>> {
        let mut seen = HashSet::new();
        let requested: Vec<String> = names
            .iter()
            .filter(|n| !n.trim().is_empty())
            .filter(|n| seen.insert(n.to_lowercase()))
            .cloned()
            .collect();
        if requested.is_empty() {
            return Ok(Vec::new());
        }

        let lowered: Vec<String> = requested.iter().map(|n| n.to_lowercase()).collect();

        let rows = sqlx::query(
            r#"SELECT id, name, type, description, mention_count
               FROM entities
               WHERE lower(name) = ANY($1)"#,
        )
        .bind(&lowered)
        .fetch_all(self.pool.get_pool())
        .await?;

        // Case variants share a lower form; group and pick per request.
        let mut by_lower: HashMap<String, Vec<(Uuid, String, String, Option<String>, i32)>> =
            HashMap::new();
        for row in rows {
            let name: String = row.get("name");
            by_lower.entry(name.to_lowercase()).or_default().push((
                row.get("id"),
                name,
                row.get("type"),
                row.get("description"),
                row.get("mention_count"),
            ));
        }

        let mut resolved = Vec::new();
        let mut unresolved = Vec::new();
        for requested_name in &requested {
            match by_lower.get(&requested_name.to_lowercase()) {
                Some(candidates) if candidates.len() == 1 => {
                    resolved.push(to_resolved(&candidates[0], requested_name));
                }
                Some(candidates) => {
                    // Ambiguous lower form: only the exact-case match wins.
                    match candidates.iter().find(|c| &c.1 == requested_name) {
                        Some(exact) => resolved.push(to_resolved(exact, requested_name)),
                        None => debug!(
                            "Skipping ambiguous entity name '{}' ({} case variants)",
                            requested_name,
                            candidates.len()
                        ),
                    }
                }
                None => unresolved.push(requested_name.clone()),
            }
        }

        if !unresolved.is_empty() && unresolved.len() <= PREFIX_RESOLVE_MAX {
            resolved.extend(self.resolve_by_prefix(&unresolved).await?);
        }

        Ok(resolved)
    }

    /// One batched LATERAL query for every unresolved name; a prefix is
    /// accepted only when it matches exactly one entity.
    async fn resolve_by_prefix(&self, names: &[String]) -> Result<Vec<ResolvedEntity>> {
        let patterns: Vec<String> = names.iter().map(|n| like_prefix_pattern(n)).collect();

        let rows = sqlx::query(
            r#"SELECT q.ordinality, e.id, e.name, e.type, e.description, e.mention_count
               FROM unnest($1::text[]) WITH ORDINALITY AS q(pattern, ordinality)
               CROSS JOIN LATERAL (
                   SELECT id, name, type, description, mention_count
                   FROM entities
                   WHERE lower(name) LIKE q.pattern
                   ORDER BY name
                   LIMIT 2
               ) e"#,
        )
        .bind(&patterns)
        .fetch_all(self.pool.get_pool())
        .await?;

        let mut by_request: HashMap<i64, Vec<(Uuid, String, String, Option<String>, i32)>> =
            HashMap::new();
        for row in rows {
            let ordinality: i64 = row.get("ordinality");
            by_request.entry(ordinality).or_default().push((
                row.get("id"),
                row.get("name"),
                row.get("type"),
                row.get("description"),
                row.get("mention_count"),
            ));
        }

        let mut resolved = Vec::new();
        for (i, requested_name) in names.iter().enumerate() {
            if let Some(candidates) = by_request.get(&((i + 1) as i64)) {
                if candidates.len() == 1 {
                    resolved.push(to_resolved(&candidates[0], requested_name));
                }
            }
        }
        Ok(resolved)
    }

    // ==================== Traversal ====================

    /// Bounded breadth-first expansion from the seed set. Runs inside a
    /// transaction with a database-level statement timeout; code 57014
    /// turns into a partial result instead of an error.
    pub async fn traverse(
        &self,
        seed_ids: &[Uuid],
        params: &TraversalParams,
    ) -> Result<TraversalResult> {
        if seed_ids.is_empty() {
            return Ok(TraversalResult::default());
        }

        let mut tx = self.pool.get_pool().begin().await?;
        sqlx::query(&format!(
            "SET LOCAL statement_timeout = {}",
            params.time_limit_ms.max(1)
        ))
        .execute(&mut *tx)
        .await?;

        let walk_sql = r#"
            WITH RECURSIVE walk AS (
                SELECT e.id, 0 AS depth, ARRAY[e.id] AS path,
                       ARRAY[]::text[] AS path_rel_types
                FROM entities e
                WHERE e.id = ANY($1)
              UNION ALL
                SELECT r.other_id, w.depth + 1, w.path || r.other_id,
                       w.path_rel_types || r.relationship_type
                FROM walk w
                JOIN LATERAL (
                    SELECT er.target_entity_id AS other_id, er.relationship_type
                    FROM entity_relationships er
                    WHERE er.source_entity_id = w.id
                    UNION ALL
                    SELECT er.source_entity_id AS other_id, er.relationship_type
                    FROM entity_relationships er
                    WHERE er.target_entity_id = w.id
                ) r ON TRUE
                WHERE w.depth < $2
                  AND NOT (r.other_id = ANY(w.path))
                  AND ($3::text[] IS NULL OR r.relationship_type = ANY($3))
            )
            SELECT dedup.id, dedup.depth, dedup.path, dedup.path_rel_types,
                   dedup.name, dedup.entity_type, dedup.description, dedup.mention_count
            FROM (
                SELECT DISTINCT ON (w.id)
                       w.id, w.depth, w.path, w.path_rel_types,
                       e.name, e.type AS entity_type, e.description, e.mention_count
                FROM walk w
                JOIN entities e ON e.id = w.id
                ORDER BY w.id, w.depth, w.path
            ) dedup
            ORDER BY dedup.depth, dedup.path
            LIMIT $4"#;

        let walk_result = sqlx::query(walk_sql)
            .bind(seed_ids)
            .bind(params.max_depth)
            .bind(&params.relationship_types)
            .bind(params.max_entities)
            .fetch_all(&mut *tx)
            .await;

        let rows = match walk_result {
            Ok(rows) => rows,
            Err(e) if is_statement_timeout(&e) => {
                warn!(
                    "Graph traversal hit the {}ms statement timeout",
                    params.time_limit_ms
                );
                tx.rollback().await.ok();
                let mut result = TraversalResult::default();
                result.meta.timed_out = true;
                result
                    .warnings
                    .push("Graph traversal timed out; returning partial results".to_string());
                return Ok(result);
            }
            Err(e) => return Err(e.into()),
        };

        let seed_set: HashSet<Uuid> = seed_ids.iter().copied().collect();
        let mut entities = Vec::with_capacity(rows.len());
        let mut raw_paths: Vec<(Vec<Uuid>, Vec<String>)> = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: Uuid = row.get("id");
            entities.push(GraphEntity {
                id,
                name: row.get("name"),
                entity_type: row.get("entity_type"),
                description: row.get("description"),
                mention_count: row.get("mention_count"),
                depth: row.get("depth"),
                is_seed: seed_set.contains(&id),
            });
            raw_paths.push((row.get("path"), row.get("path_rel_types")));
        }

        let capped = entities.len() as i64 == params.max_entities;
        let entity_ids: Vec<Uuid> = entities.iter().map(|e| e.id).collect();

        let edges_result = sqlx::query(
            r#"SELECT s.name AS source, t.name AS target,
                      er.relationship_type, er.description
               FROM entity_relationships er
               JOIN entities s ON s.id = er.source_entity_id
               JOIN entities t ON t.id = er.target_entity_id
               WHERE er.source_entity_id = ANY($1)
                 AND er.target_entity_id = ANY($1)
                 AND ($2::text[] IS NULL OR er.relationship_type = ANY($2))"#,
        )
        .bind(&entity_ids)
        .bind(&params.relationship_types)
        .fetch_all(&mut *tx)
        .await;

        let (edges, edge_timeout) = match edges_result {
            Ok(rows) => (
                rows.into_iter()
                    .map(|row| GraphEdge {
                        source: row.get("source"),
                        target: row.get("target"),
                        relationship_type: row.get("relationship_type"),
                        description: row.get("description"),
                    })
                    .collect(),
                false,
            ),
            Err(e) if is_statement_timeout(&e) => (Vec::new(), true),
            Err(e) => return Err(e.into()),
        };

        if edge_timeout {
            tx.rollback().await.ok();
        } else {
            tx.commit().await?;
        }

        let name_by_id: HashMap<Uuid, String> =
            entities.iter().map(|e| (e.id, e.name.clone())).collect();
        let paths = if edge_timeout {
            Vec::new()
        } else {
            leaf_paths(&raw_paths, &name_by_id)
        };

        let mut result = TraversalResult {
            entities,
            edges,
            paths,
            ..Default::default()
        };
        result.meta.capped = capped;
        result.meta.timed_out = edge_timeout;
        if edge_timeout {
            result
                .warnings
                .push("Graph traversal timed out; returning partial results".to_string());
        }
        Ok(result)
    }

    // ==================== Documents & lookups ====================

    pub async fn get_entity_documents(
        &self,
        entity_ids: &[Uuid],
        limit: i64,
    ) -> Result<Vec<EntityDocument>> {
        if entity_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            r#"SELECT m.document_id, d.base_id, d.source,
                      m.entity_id, e.name AS entity_name, m.mention_count
               FROM document_entity_mentions m
               JOIN documents d ON d.id = m.document_id
               JOIN entities e ON e.id = m.entity_id
               WHERE m.entity_id = ANY($1)
               ORDER BY m.mention_count DESC, d.created_at DESC
               LIMIT $2"#,
        )
        .bind(entity_ids)
        .bind(limit)
        .fetch_all(self.pool.get_pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| EntityDocument {
                document_id: row.get("document_id"),
                base_id: row.get("base_id"),
                source: row.get("source"),
                entity_id: row.get("entity_id"),
                entity_name: row.get("entity_name"),
                mention_count: row.get("mention_count"),
            })
            .collect())
    }

    pub async fn get_entity(&self, name: &str) -> Result<Option<ResolvedEntity>> {
        let rows = sqlx::query(
            r#"SELECT id, name, type, description, mention_count
               FROM entities
               WHERE lower(name) = lower($1)"#,
        )
        .bind(name)
        .fetch_all(self.pool.get_pool())
        .await?;

        if rows.is_empty() {
            return Ok(None);
        }
        // Exact case wins among variants.
        let row = rows
            .iter()
            .find(|r| r.get::<String, _>("name") == name)
            .unwrap_or(&rows[0]);

        Ok(Some(ResolvedEntity {
            id: row.get("id"),
            name: row.get("name"),
            entity_type: row.get("type"),
            description: row.get("description"),
            mention_count: row.get("mention_count"),
            requested_name: name.to_string(),
        }))
    }

    pub async fn get_entity_relationships(
        &self,
        entity_id: Uuid,
        limit: i64,
    ) -> Result<Vec<EntityRelationshipEdge>> {
        let rows = sqlx::query(
            r#"SELECT s.name AS source, t.name AS target,
                      er.relationship_type, er.description,
                      CASE WHEN er.source_entity_id = $1
                           THEN 'outbound' ELSE 'inbound' END AS direction
               FROM entity_relationships er
               JOIN entities s ON s.id = er.source_entity_id
               JOIN entities t ON t.id = er.target_entity_id
               WHERE er.source_entity_id = $1 OR er.target_entity_id = $1
               ORDER BY er.created_at
               LIMIT $2"#,
        )
        .bind(entity_id)
        .bind(limit)
        .fetch_all(self.pool.get_pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| EntityRelationshipEdge {
                source: row.get("source"),
                target: row.get("target"),
                relationship_type: row.get("relationship_type"),
                description: row.get("description"),
                direction: row.get("direction"),
            })
            .collect())
    }
}

fn to_resolved(
    candidate: &(Uuid, String, String, Option<String>, i32),
    requested_name: &str,
) -> ResolvedEntity {
    ResolvedEntity {
        id: candidate.0,
        name: candidate.1.clone(),
        entity_type: candidate.2.clone(),
        description: candidate.3.clone(),
        mention_count: candidate.4,
        requested_name: requested_name.to_string(),
    }
}

/// Lowercased prefix pattern with LIKE metacharacters escaped.
fn like_prefix_pattern(name: &str) -> String {
    let escaped = name
        .to_lowercase()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("{escaped}%")
}

fn is_statement_timeout(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some(STATEMENT_TIMEOUT_CODE))
}

/// A leaf path is one that is not a strict prefix of any other kept path.
fn leaf_paths(
    raw_paths: &[(Vec<Uuid>, Vec<String>)],
    name_by_id: &HashMap<Uuid, String>,
) -> Vec<GraphPath> {
    let mut leaves = Vec::new();
    'outer: for (i, (path, rel_types)) in raw_paths.iter().enumerate() {
        if path.len() < 2 {
            continue; // bare seeds are not paths
        }
        for (j, (other, _)) in raw_paths.iter().enumerate() {
            if i != j && other.len() > path.len() && other[..path.len()] == path[..] {
                continue 'outer;
            }
        }
        let mut names = Vec::with_capacity(path.len());
        for id in path {
            match name_by_id.get(id) {
                Some(name) => names.push(name.clone()),
                // A hop fell outside the entity cap; drop the path.
                None => continue 'outer,
            }
        }
        leaves.push(GraphPath {
            entities: names,
            relationship_types: rel_types.clone(),
        });
    }
    leaves
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_patterns_escape_metacharacters() {
        assert_eq!(like_prefix_pattern("Auth"), "auth%");
        assert_eq!(like_prefix_pattern("100%_Done"), "100\\%\\_done%");
    }

    #[test]
    fn leaf_paths_drop_strict_prefixes() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        let names: HashMap<Uuid, String> = [
            (a, "A".to_string()),
            (b, "B".to_string()),
            (c, "C".to_string()),
        ]
        .into_iter()
        .collect();

        let raw = vec![
            (vec![a], vec![]),
            (vec![a, b], vec!["uses".to_string()]),
            (
                vec![a, b, c],
                vec!["uses".to_string(), "calls".to_string()],
            ),
        ];

        let leaves = leaf_paths(&raw, &names);
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].entities, vec!["A", "B", "C"]);
        assert_eq!(leaves[0].relationship_types, vec!["uses", "calls"]);
    }

    #[test]
    fn leaf_paths_skip_hops_outside_the_cap() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let names: HashMap<Uuid, String> = [(a, "A".to_string())].into_iter().collect();
        let raw = vec![(vec![a, b], vec!["uses".to_string()])];
        assert!(leaf_paths(&raw, &names).is_empty());
    }
}
