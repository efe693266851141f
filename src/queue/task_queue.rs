use crate::database::{DbPool, EnrichmentTaskRow};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::{Postgres, Row, Transaction};
use tracing::{debug, info, warn};
use uuid::Uuid;

const QUEUE_NAME: &str = "enrichment";

/// Backoff schedule: 60s base, doubling per attempt, capped at an hour.
const BACKOFF_BASE_SECS: i64 = 60;
const BACKOFF_CAP_SECS: i64 = 3600;

pub fn backoff_seconds(attempt: i32) -> i64 {
    let exponent = (attempt - 1).clamp(0, 30) as u32;
    (BACKOFF_BASE_SECS.saturating_mul(1i64 << exponent)).min(BACKOFF_CAP_SECS)
}

/// A claimed task plus the chunk texts of the owning document, ordered by
/// chunk index, so a worker needs no follow-up query before enriching.
#[derive(Debug)]
pub struct ClaimedTask {
    pub task: EnrichmentTaskRow,
    pub chunk_texts: Vec<(Uuid, i32, String)>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentResult {
    #[serde(default)]
    pub tier2_meta: Option<Value>,
    #[serde(default)]
    pub tier3_meta: Option<Value>,
    #[serde(default)]
    pub entities: Vec<EnrichedEntity>,
    #[serde(default)]
    pub relationships: Vec<EnrichedRelationship>,
    #[serde(default)]
    pub document_summary: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedEntity {
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_mentions")]
    pub mentions: i32,
}

fn default_mentions() -> i32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedRelationship {
    pub source: String,
    pub target: String,
    pub relationship_type: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Durable enrichment queue on the relational store. At-most-once delivery
/// comes from `FOR UPDATE SKIP LOCKED` row claims; liveness comes from the
/// stale-lease watchdog.
pub struct TaskQueue {
    pool: DbPool,
    max_attempts: i32,
}

impl TaskQueue {
    pub fn new(pool: DbPool, max_attempts: i32) -> Self {
        Self { pool, max_attempts }
    }

    // ==================== Enqueue ====================

    /// Inserts one pending task per chunk inside the caller's transaction.
    /// Idempotence is the caller's concern.
    pub async fn enqueue_chunks(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        collection: &str,
        base_id: &str,
        chunk_ids: &[Uuid],
    ) -> Result<usize> {
        for chunk_id in chunk_ids {
            let payload = json!({
                "collection": collection,
                "baseId": base_id,
                "chunkId": chunk_id,
            });
            sqlx::query(
                r#"INSERT INTO enrichment_tasks
                       (queue, status, payload, chunk_id, collection, max_attempts)
                   VALUES ($1, 'pending', $2, $3, $4, $5)"#,
            )
            .bind(QUEUE_NAME)
            .bind(&payload)
            .bind(chunk_id)
            .bind(collection)
            .bind(self.max_attempts)
            .execute(&mut **tx)
            .await?;
        }
        debug!(
            "Enqueued {} enrichment tasks (collection={}, baseId={})",
            chunk_ids.len(),
            collection,
            base_id
        );
        Ok(chunk_ids.len())
    }

    // ==================== Claim ====================

    /// Claims the oldest runnable task. The skip-locked subselect guarantees
    /// concurrent claimers receive distinct rows or nothing.
    pub async fn claim(&self, worker_id: &str, lease_seconds: i64) -> Result<Option<ClaimedTask>> {
        let mut tx = self.pool.get_pool().begin().await?;

        let row = sqlx::query(
            r#"UPDATE enrichment_tasks
               SET status = 'processing',
                   leased_by = $1,
                   lease_expires_at = now() + make_interval(secs => $2),
                   started_at = now(),
                   attempt = attempt + 1,
                   updated_at = now()
               WHERE id = (
                   SELECT id FROM enrichment_tasks
                   WHERE status = 'pending' AND run_after <= now()
                   ORDER BY run_after, created_at
                   LIMIT 1
                   FOR UPDATE SKIP LOCKED
               )
               RETURNING id, queue, status, payload, chunk_id, collection,
                         attempt, max_attempts, run_after, leased_by,
                         lease_expires_at, error, created_at"#,
        )
        .bind(worker_id)
        .bind(lease_seconds as f64)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.commit().await?;
            return Ok(None);
        };

        let task = EnrichmentTaskRow {
            id: row.get("id"),
            queue: row.get("queue"),
            status: row.get("status"),
            payload: row.get("payload"),
            chunk_id: row.get("chunk_id"),
            collection: row.get("collection"),
            attempt: row.get("attempt"),
            max_attempts: row.get("max_attempts"),
            run_after: row.get("run_after"),
            leased_by: row.get("leased_by"),
            lease_expires_at: row.get("lease_expires_at"),
            error: row.get("error"),
            created_at: row.get("created_at"),
        };

        let base_id = task
            .payload
            .get("baseId")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let chunk_texts = sqlx::query(
            r#"SELECT c.id, c.chunk_index, c.text
               FROM chunks c
               JOIN documents d ON d.id = c.document_id
               WHERE d.collection = $1 AND d.base_id = $2
               ORDER BY c.chunk_index"#,
        )
        .bind(&task.collection)
        .bind(&base_id)
        .fetch_all(&mut *tx)
        .await?
        .into_iter()
        .map(|r| (r.get("id"), r.get("chunk_index"), r.get("text")))
        .collect();

        tx.commit().await?;

        debug!(
            "Worker {} claimed task {} (attempt {})",
            worker_id, task.id, task.attempt
        );
        Ok(Some(ClaimedTask { task, chunk_texts }))
    }

    // ==================== Complete ====================

    /// Applies an enrichment result atomically: entity/mention/relationship
    /// upserts, chunk tier-2/3 metadata, optional document summary, and the
    /// task's terminal state.
    pub async fn complete(&self, task_id: Uuid, result: &EnrichmentResult) -> Result<()> {
        let mut tx = self.pool.get_pool().begin().await?;

        let task_row = sqlx::query(
            "SELECT payload, chunk_id, collection FROM enrichment_tasks WHERE id = $1 FOR UPDATE",
        )
        .bind(task_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(task_row) = task_row else {
            anyhow::bail!("task {} not found", task_id);
        };
        let payload: Value = task_row.get("payload");
        let chunk_id: Option<Uuid> = task_row.get("chunk_id");
        let collection: String = task_row.get("collection");
        let base_id = payload
            .get("baseId")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let document_id: Option<Uuid> = sqlx::query_scalar(
            "SELECT id FROM documents WHERE collection = $1 AND base_id = $2",
        )
        .bind(&collection)
        .bind(&base_id)
        .fetch_optional(&mut *tx)
        .await?;

        // Entity upserts. Conflicts key on the lower(name) index so case
        // variants merge into the first-seen row.
        let mut entity_ids: std::collections::HashMap<String, Uuid> =
            std::collections::HashMap::new();
        for entity in &result.entities {
            let id: Uuid = sqlx::query_scalar(
                r#"INSERT INTO entities (name, type, description, mention_count, last_seen)
                   VALUES ($1, $2, $3, $4, now())
                   ON CONFLICT (lower(name))
                   DO UPDATE SET
                       mention_count = entities.mention_count + EXCLUDED.mention_count,
                       description = COALESCE(entities.description, EXCLUDED.description),
                       last_seen = now()
                   RETURNING id"#,
            )
            .bind(&entity.name)
            .bind(&entity.entity_type)
            .bind(&entity.description)
            .bind(entity.mentions.max(0))
            .fetch_one(&mut *tx)
            .await?;
            entity_ids.insert(entity.name.to_lowercase(), id);

            if let Some(doc_id) = document_id {
                sqlx::query(
                    r#"INSERT INTO document_entity_mentions (document_id, entity_id, mention_count)
                       VALUES ($1, $2, $3)
                       ON CONFLICT (document_id, entity_id)
                       DO UPDATE SET mention_count =
                           document_entity_mentions.mention_count + EXCLUDED.mention_count"#,
                )
                .bind(doc_id)
                .bind(id)
                .bind(entity.mentions.max(1))
                .execute(&mut *tx)
                .await?;
            }
        }

        for rel in &result.relationships {
            // Endpoints usually arrive in the same result's entity list;
            // otherwise fall back to a lookup of previously stored nodes.
            let source_id = match entity_ids.get(&rel.source.to_lowercase()) {
                Some(id) => Some(*id),
                None => lookup_entity_id(&mut tx, &rel.source).await?,
            };
            let target_id = match entity_ids.get(&rel.target.to_lowercase()) {
                Some(id) => Some(*id),
                None => lookup_entity_id(&mut tx, &rel.target).await?,
            };
            let (Some(source_id), Some(target_id)) = (source_id, target_id) else {
                warn!(
                    "Relationship '{}' -> '{}' references unknown entities; skipping edge",
                    rel.source, rel.target
                );
                continue;
            };
            sqlx::query(
                r#"INSERT INTO entity_relationships
                       (source_entity_id, target_entity_id, relationship_type, description)
                   VALUES ($1, $2, $3, $4)
                   ON CONFLICT (source_entity_id, target_entity_id, relationship_type)
                   DO UPDATE SET description =
                       COALESCE(entity_relationships.description, EXCLUDED.description)"#,
            )
            .bind(source_id)
            .bind(target_id)
            .bind(&rel.relationship_type)
            .bind(&rel.description)
            .execute(&mut *tx)
            .await?;
        }

        if let Some(chunk_id) = chunk_id {
            sqlx::query(
                r#"UPDATE chunks
                   SET tier2_meta = COALESCE($2, tier2_meta),
                       tier3_meta = COALESCE($3, tier3_meta),
                       enrichment_status = 'enriched',
                       updated_at = now()
                   WHERE id = $1"#,
            )
            .bind(chunk_id)
            .bind(&result.tier2_meta)
            .bind(&result.tier3_meta)
            .execute(&mut *tx)
            .await?;
        }

        if let (Some(doc_id), Some(summary)) = (document_id, &result.document_summary) {
            sqlx::query("UPDATE documents SET summary = $2, updated_at = now() WHERE id = $1")
                .bind(doc_id)
                .bind(summary)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query(
            r#"UPDATE enrichment_tasks
               SET status = 'completed', completed_at = now(), updated_at = now()
               WHERE id = $1"#,
        )
        .bind(task_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!("Task {} completed", task_id);
        Ok(())
    }

    // ==================== Fail ====================

    /// Retries with exponential backoff until attempts are exhausted, then
    /// dead-letters the task and marks the chunk failed with the error in
    /// its tier-3 metadata.
    pub async fn fail(&self, task_id: Uuid, error: &str) -> Result<()> {
        let mut tx = self.pool.get_pool().begin().await?;

        let row = sqlx::query(
            "SELECT attempt, max_attempts, chunk_id FROM enrichment_tasks WHERE id = $1 FOR UPDATE",
        )
        .bind(task_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            anyhow::bail!("task {} not found", task_id);
        };
        let attempt: i32 = row.get("attempt");
        let max_attempts: i32 = row.get("max_attempts");
        let chunk_id: Option<Uuid> = row.get("chunk_id");

        if attempt >= max_attempts {
            sqlx::query(
                r#"UPDATE enrichment_tasks
                   SET status = 'dead', error = $2,
                       leased_by = NULL, lease_expires_at = NULL,
                       updated_at = now()
                   WHERE id = $1"#,
            )
            .bind(task_id)
            .bind(error)
            .execute(&mut *tx)
            .await?;

            if let Some(chunk_id) = chunk_id {
                sqlx::query(
                    r#"UPDATE chunks
                       SET enrichment_status = 'failed',
                           tier3_meta = jsonb_set(COALESCE(tier3_meta, '{}'::jsonb),
                                                  '{_error}', to_jsonb($2::text)),
                           updated_at = now()
                       WHERE id = $1"#,
                )
                .bind(chunk_id)
                .bind(error)
                .execute(&mut *tx)
                .await?;
            }
            warn!("Task {} dead-lettered after {} attempts: {}", task_id, attempt, error);
        } else {
            let delay = backoff_seconds(attempt);
            sqlx::query(
                r#"UPDATE enrichment_tasks
                   SET status = 'pending', error = $2,
                       leased_by = NULL, lease_expires_at = NULL,
                       run_after = now() + make_interval(secs => $3),
                       updated_at = now()
                   WHERE id = $1"#,
            )
            .bind(task_id)
            .bind(error)
            .bind(delay as f64)
            .execute(&mut *tx)
            .await?;
            debug!(
                "Task {} failed (attempt {}), retrying in {}s: {}",
                task_id, attempt, delay, error
            );
        }

        tx.commit().await?;
        Ok(())
    }

    // ==================== Watchdog ====================

    /// Returns expired `processing` rows to `pending`. Run periodically.
    pub async fn recover_stale(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"UPDATE enrichment_tasks
               SET status = 'pending', leased_by = NULL, lease_expires_at = NULL,
                   run_after = now(), updated_at = now()
               WHERE status = 'processing' AND lease_expires_at < now()"#,
        )
        .execute(self.pool.get_pool())
        .await?;

        let recovered = result.rows_affected();
        if recovered > 0 {
            info!("Watchdog recovered {} stale leases", recovered);
        }
        Ok(recovered)
    }
}

async fn lookup_entity_id(
    tx: &mut Transaction<'_, Postgres>,
    name: &str,
) -> Result<Option<Uuid>> {
    Ok(
        sqlx::query_scalar("SELECT id FROM entities WHERE lower(name) = lower($1)")
            .bind(name)
            .fetch_optional(&mut **tx)
            .await?,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_from_sixty_seconds_and_caps_at_an_hour() {
        assert_eq!(backoff_seconds(1), 60);
        assert_eq!(backoff_seconds(2), 120);
        assert_eq!(backoff_seconds(3), 240);
        assert_eq!(backoff_seconds(4), 480);
        assert_eq!(backoff_seconds(5), 960);
        assert_eq!(backoff_seconds(6), 1920);
        assert_eq!(backoff_seconds(7), 3600);
        assert_eq!(backoff_seconds(8), 3600);
        assert_eq!(backoff_seconds(100), 3600);
    }

    #[test]
    fn enrichment_result_accepts_sparse_payloads() {
        let result: EnrichmentResult = serde_json::from_str(
            r#"{"entities": [{"name": "AuthService", "type": "service"}]}"#,
        )
        .unwrap();
        assert_eq!(result.entities.len(), 1);
        assert_eq!(result.entities[0].mentions, 1);
        assert!(result.tier2_meta.is_none());
        assert!(result.relationships.is_empty());
    }
}
