use crate::database::{DbPool, Repository};
use anyhow::Result;
use serde::Serialize;
use serde_json::Value;
use sqlx::Row;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateStatus {
    Enriched,
    Pending,
    Mixed,
    Failed,
    None,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentStatusReport {
    pub base_id: String,
    pub status: AggregateStatus,
    pub total_chunks: usize,
    pub enriched: usize,
    pub pending: usize,
    pub failed: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentStats {
    pub queue: BTreeMap<String, i64>,
    pub chunks: BTreeMap<String, i64>,
}

/// Public surface around the enrichment queue: status lookups, aggregate
/// stats, bulk enqueue, and queue clearing.
pub struct EnrichmentCoordinator {
    pool: DbPool,
    repository: Arc<Repository>,
    max_attempts: i32,
}

impl EnrichmentCoordinator {
    pub fn new(pool: DbPool, repository: Arc<Repository>, max_attempts: i32) -> Self {
        Self {
            pool,
            repository,
            max_attempts,
        }
    }

    pub async fn get_status(
        &self,
        collection: &str,
        base_id: &str,
    ) -> Result<Option<EnrichmentStatusReport>> {
        let Some(document) = self
            .repository
            .get_document_by_base_id(collection, base_id)
            .await?
        else {
            return Ok(None);
        };

        let chunks = self.repository.get_chunk_statuses(document.id).await?;

        let mut enriched = 0;
        let mut pending = 0;
        let mut failed = 0;
        let mut none = 0;
        let mut errors = Vec::new();
        for chunk in &chunks {
            match chunk.enrichment_status.as_str() {
                "enriched" => enriched += 1,
                "pending" => pending += 1,
                "failed" => {
                    failed += 1;
                    if let Some(error) = chunk.tier3_meta.as_ref().and_then(|m| m.get("_error")) {
                        errors.push(error.clone());
                    }
                }
                _ => none += 1,
            }
        }

        let total = chunks.len();
        let status = if total == 0 || none == total {
            AggregateStatus::None
        } else if enriched == total {
            AggregateStatus::Enriched
        } else if failed == total {
            AggregateStatus::Failed
        } else if pending > 0 && enriched == 0 && failed == 0 {
            AggregateStatus::Pending
        } else {
            AggregateStatus::Mixed
        };

        Ok(Some(EnrichmentStatusReport {
            base_id: base_id.to_string(),
            status,
            total_chunks: total,
            enriched,
            pending,
            failed,
            errors,
        }))
    }

    pub async fn get_stats(&self) -> Result<EnrichmentStats> {
        let queue_rows = sqlx::query(
            "SELECT status, COUNT(*) AS count FROM enrichment_tasks GROUP BY status",
        )
        .fetch_all(self.pool.get_pool())
        .await?;
        let chunk_rows = sqlx::query(
            "SELECT enrichment_status, COUNT(*) AS count FROM chunks GROUP BY enrichment_status",
        )
        .fetch_all(self.pool.get_pool())
        .await?;

        let queue = queue_rows
            .into_iter()
            .map(|r| (r.get::<String, _>("status"), r.get::<i64, _>("count")))
            .collect();
        let chunks = chunk_rows
            .into_iter()
            .map(|r| {
                (
                    r.get::<String, _>("enrichment_status"),
                    r.get::<i64, _>("count"),
                )
            })
            .collect();

        Ok(EnrichmentStats { queue, chunks })
    }

    /// Bulk (re-)enqueue for a collection. One transaction: select the
    /// matching chunks, flip them to pending, insert one task per chunk.
    /// `force` re-enqueues already-enriched chunks; `filter` narrows by
    /// chunk text (web-search syntax, falling back to a substring match).
    pub async fn enqueue(
        &self,
        collection: &str,
        force: bool,
        filter: Option<&str>,
    ) -> Result<usize> {
        let mut tx = self.pool.get_pool().begin().await?;

        let mut sql = String::from(
            r#"SELECT c.id, d.base_id
               FROM chunks c
               JOIN documents d ON d.id = c.document_id
               WHERE d.collection = $1"#,
        );
        if !force {
            sql.push_str(" AND c.enrichment_status <> 'enriched'");
        }
        if filter.is_some() {
            sql.push_str(
                r#" AND (to_tsvector('english', c.text) @@ websearch_to_tsquery('english', $2)
                     OR c.text ILIKE '%' || $2 || '%')"#,
            );
        }
        sql.push_str(" ORDER BY d.base_id, c.chunk_index");

        let mut query = sqlx::query(&sql).bind(collection);
        if let Some(filter) = filter {
            query = query.bind(filter);
        }
        let rows = query.fetch_all(&mut *tx).await?;

        let mut enqueued = 0usize;
        for row in &rows {
            let chunk_id: uuid::Uuid = row.get("id");
            let base_id: String = row.get("base_id");
            let payload = serde_json::json!({
                "collection": collection,
                "baseId": base_id,
                "chunkId": chunk_id,
            });
            sqlx::query(
                r#"INSERT INTO enrichment_tasks
                       (queue, status, payload, chunk_id, collection, max_attempts)
                   VALUES ('enrichment', 'pending', $1, $2, $3, $4)"#,
            )
            .bind(&payload)
            .bind(chunk_id)
            .bind(collection)
            .bind(self.max_attempts)
            .execute(&mut *tx)
            .await?;
            sqlx::query(
                "UPDATE chunks SET enrichment_status = 'pending', updated_at = now() WHERE id = $1",
            )
            .bind(chunk_id)
            .execute(&mut *tx)
            .await?;
            enqueued += 1;
        }

        tx.commit().await?;
        info!(
            "Enqueued {} chunks for enrichment (collection={}, force={})",
            enqueued, collection, force
        );
        Ok(enqueued)
    }

    /// Removes non-completed tasks for a collection; the optional filter
    /// prunes by the owning chunk's text.
    pub async fn clear_queue(&self, collection: &str, filter: Option<&str>) -> Result<u64> {
        let mut sql = String::from(
            r#"DELETE FROM enrichment_tasks t
               WHERE t.collection = $1
                 AND t.status IN ('pending', 'processing', 'dead')"#,
        );
        if filter.is_some() {
            sql.push_str(
                r#" AND EXISTS (
                       SELECT 1 FROM chunks c
                       WHERE c.id = t.chunk_id
                         AND (to_tsvector('english', c.text) @@ websearch_to_tsquery('english', $2)
                              OR c.text ILIKE '%' || $2 || '%'))"#,
            );
        }

        let mut query = sqlx::query(&sql).bind(collection);
        if let Some(filter) = filter {
            query = query.bind(filter);
        }
        let result = query.execute(self.pool.get_pool()).await?;
        debug!(
            "Cleared {} queued tasks (collection={})",
            result.rows_affected(),
            collection
        );
        Ok(result.rows_affected())
    }
}
