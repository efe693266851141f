use super::{
    ChunkStatusRow, CollectionStatsRow, DbPool, DocumentRow, NewChunk, NewDocument, ScoredChunk,
};
use anyhow::Result;
use pgvector::Vector;
use sqlx::{Postgres, Row, Transaction};
use tracing::debug;
use uuid::Uuid;

/// Column list shared by every query that produces a `ScoredChunk`; the
/// caller appends its own score expression.
const CHUNK_COLUMNS: &str = r#"c.id, c.document_id, c.chunk_index, c.text,
    c.doc_type, c.repo_id, c.path, c.lang, c.item_url,
    c.tier1_meta, c.tier2_meta, c.tier3_meta, c.enrichment_status,
    d.source, d.base_id"#;

pub struct Repository {
    pool: DbPool,
}

impl Repository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>> {
        Ok(self.pool.get_pool().begin().await?)
    }

    // ==================== Documents ====================

    /// Identity-based upsert. Returns `(id, effective_base_id, was_update)`
    /// or `None` when the identity already exists and `overwrite` is off.
    /// On conflict the stored `base_id` wins, so re-ingests keep the id the
    /// first ingest established.
    pub async fn upsert_document(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        doc: &NewDocument,
        overwrite: bool,
    ) -> Result<Option<(Uuid, String, bool)>> {
        let sql = if overwrite {
            r#"INSERT INTO documents
                   (base_id, collection, identity_key, source, doc_type,
                    repo_id, repo_url, path, lang, item_url, mime_type,
                    size_bytes, payload_checksum, raw_data, raw_key)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
               ON CONFLICT (collection, identity_key)
               DO UPDATE SET
                   source = EXCLUDED.source,
                   doc_type = EXCLUDED.doc_type,
                   repo_id = EXCLUDED.repo_id,
                   repo_url = EXCLUDED.repo_url,
                   path = EXCLUDED.path,
                   lang = EXCLUDED.lang,
                   item_url = EXCLUDED.item_url,
                   mime_type = EXCLUDED.mime_type,
                   size_bytes = EXCLUDED.size_bytes,
                   payload_checksum = EXCLUDED.payload_checksum,
                   raw_data = EXCLUDED.raw_data,
                   raw_key = EXCLUDED.raw_key,
                   ingested_at = now(),
                   updated_at = now()
               RETURNING id, base_id, (NOT (xmax = 0)) AS was_update"#
        } else {
            r#"INSERT INTO documents
                   (base_id, collection, identity_key, source, doc_type,
                    repo_id, repo_url, path, lang, item_url, mime_type,
                    size_bytes, payload_checksum, raw_data, raw_key)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
               ON CONFLICT (collection, identity_key) DO NOTHING
               RETURNING id, base_id, false AS was_update"#
        };

        let row = sqlx::query(sql)
            .bind(&doc.base_id)
            .bind(&doc.collection)
            .bind(&doc.identity_key)
            .bind(&doc.source)
            .bind(&doc.doc_type)
            .bind(&doc.repo_id)
            .bind(&doc.repo_url)
            .bind(&doc.path)
            .bind(&doc.lang)
            .bind(&doc.item_url)
            .bind(&doc.mime_type)
            .bind(doc.size_bytes)
            .bind(&doc.payload_checksum)
            .bind(&doc.raw_data)
            .bind(&doc.raw_key)
            .fetch_optional(&mut **tx)
            .await?;

        Ok(row.map(|r| (r.get("id"), r.get("base_id"), r.get("was_update"))))
    }

    pub async fn delete_chunks_for_document(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        document_id: Uuid,
    ) -> Result<u64> {
        let result = sqlx::query("DELETE FROM chunks WHERE document_id = $1")
            .bind(document_id)
            .execute(&mut **tx)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn insert_chunk(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        chunk: &NewChunk,
    ) -> Result<Uuid> {
        let id: Uuid = sqlx::query_scalar(
            r#"INSERT INTO chunks
                   (document_id, chunk_index, text, doc_type, repo_id, path,
                    lang, item_url, tier1_meta, enrichment_status)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
               RETURNING id"#,
        )
        .bind(chunk.document_id)
        .bind(chunk.chunk_index)
        .bind(&chunk.text)
        .bind(&chunk.doc_type)
        .bind(&chunk.repo_id)
        .bind(&chunk.path)
        .bind(&chunk.lang)
        .bind(&chunk.item_url)
        .bind(&chunk.tier1_meta)
        .bind(&chunk.enrichment_status)
        .fetch_one(&mut **tx)
        .await?;
        Ok(id)
    }

    pub async fn set_chunk_embedding(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        chunk_id: Uuid,
        embedding: Vector,
    ) -> Result<()> {
        sqlx::query("UPDATE chunks SET embedding = $2, updated_at = now() WHERE id = $1")
            .bind(chunk_id)
            .bind(embedding)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    pub async fn get_document_by_base_id(
        &self,
        collection: &str,
        base_id: &str,
    ) -> Result<Option<DocumentRow>> {
        let row = sqlx::query_as::<_, DocumentRow>(
            r#"SELECT id, base_id, collection, identity_key, source, doc_type,
                      repo_id, repo_url, path, lang, item_url, mime_type,
                      size_bytes, summary, raw_key, ingested_at, created_at
               FROM documents
               WHERE collection = $1 AND base_id = $2"#,
        )
        .bind(collection)
        .bind(base_id)
        .fetch_optional(self.pool.get_pool())
        .await?;
        Ok(row)
    }

    // ==================== Search ====================

    /// Cosine-distance search over embedded chunks. The optional filter
    /// fragment comes from the translator and starts its parameters at $5.
    pub async fn semantic_search(
        &self,
        collection: &str,
        query_vector: Vector,
        max_distance: f64,
        filter: Option<(String, Vec<String>)>,
        limit: i64,
    ) -> Result<Vec<ScoredChunk>> {
        let (filter_sql, filter_params) = filter.unwrap_or_default();
        let sql = format!(
            r#"SELECT {CHUNK_COLUMNS},
                      1 - (c.embedding <=> $1) AS score
               FROM chunks c
               JOIN documents d ON d.id = c.document_id
               WHERE d.collection = $2
                 AND c.embedding IS NOT NULL
                 AND (c.embedding <=> $1) <= $3{filter_sql}
               ORDER BY c.embedding <=> $1
               LIMIT $4"#,
        );

        let mut query = sqlx::query_as::<_, ScoredChunk>(&sql)
            .bind(query_vector)
            .bind(collection)
            .bind(max_distance)
            .bind(limit);
        for param in &filter_params {
            query = query.bind(param);
        }

        let chunks = query.fetch_all(self.pool.get_pool()).await?;
        debug!(
            "Semantic search returned {} chunks (collection={})",
            chunks.len(),
            collection
        );
        Ok(chunks)
    }

    /// Structured search: filter only, newest first, constant score. Never
    /// touches embeddings.
    pub async fn metadata_search(
        &self,
        collection: &str,
        filter: Option<(String, Vec<String>)>,
        limit: i64,
    ) -> Result<Vec<ScoredChunk>> {
        let (filter_sql, filter_params) = filter.unwrap_or_default();
        let sql = format!(
            r#"SELECT {CHUNK_COLUMNS},
                      1.0::float8 AS score
               FROM chunks c
               JOIN documents d ON d.id = c.document_id
               WHERE d.collection = $1{filter_sql}
               ORDER BY c.created_at DESC
               LIMIT $2"#,
        );

        let mut query = sqlx::query_as::<_, ScoredChunk>(&sql)
            .bind(collection)
            .bind(limit);
        for param in &filter_params {
            query = query.bind(param);
        }

        Ok(query.fetch_all(self.pool.get_pool()).await?)
    }

    /// Phase 1 of the filter-first hybrid flow: candidate chunk ids only.
    pub async fn filter_candidate_ids(
        &self,
        collection: &str,
        filter: Option<(String, Vec<String>)>,
        limit: i64,
    ) -> Result<Vec<Uuid>> {
        let (filter_sql, filter_params) = filter.unwrap_or_default();
        let sql = format!(
            r#"SELECT c.id
               FROM chunks c
               JOIN documents d ON d.id = c.document_id
               WHERE d.collection = $1{filter_sql}
               ORDER BY c.created_at DESC
               LIMIT $2"#,
        );

        let mut query = sqlx::query_scalar::<_, Uuid>(&sql)
            .bind(collection)
            .bind(limit);
        for param in &filter_params {
            query = query.bind(param);
        }

        Ok(query.fetch_all(self.pool.get_pool()).await?)
    }

    /// Phase 2 rerank: one batch, cosine order, no distance cutoff (the
    /// caller applies min-score).
    pub async fn rerank_chunks_by_ids(
        &self,
        ids: &[Uuid],
        query_vector: Vector,
    ) -> Result<Vec<ScoredChunk>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            r#"SELECT {CHUNK_COLUMNS},
                      1 - (c.embedding <=> $1) AS score
               FROM chunks c
               JOIN documents d ON d.id = c.document_id
               WHERE c.id = ANY($2) AND c.embedding IS NOT NULL
               ORDER BY c.embedding <=> $1"#,
        );

        Ok(sqlx::query_as::<_, ScoredChunk>(&sql)
            .bind(query_vector)
            .bind(ids)
            .fetch_all(self.pool.get_pool())
            .await?)
    }

    /// Graph-flow rerank: all chunks belonging to the mentioned documents,
    /// one batch against the cached query vector.
    pub async fn rerank_chunks_by_documents(
        &self,
        document_ids: &[Uuid],
        query_vector: Vector,
    ) -> Result<Vec<ScoredChunk>> {
        if document_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            r#"SELECT {CHUNK_COLUMNS},
                      1 - (c.embedding <=> $1) AS score
               FROM chunks c
               JOIN documents d ON d.id = c.document_id
               WHERE c.document_id = ANY($2) AND c.embedding IS NOT NULL
               ORDER BY c.embedding <=> $1"#,
        );

        Ok(sqlx::query_as::<_, ScoredChunk>(&sql)
            .bind(query_vector)
            .bind(document_ids)
            .fetch_all(self.pool.get_pool())
            .await?)
    }

    // ==================== Enrichment status ====================

    pub async fn get_chunk_statuses(&self, document_id: Uuid) -> Result<Vec<ChunkStatusRow>> {
        Ok(sqlx::query_as::<_, ChunkStatusRow>(
            r#"SELECT id, chunk_index, enrichment_status, tier3_meta
               FROM chunks
               WHERE document_id = $1
               ORDER BY chunk_index"#,
        )
        .bind(document_id)
        .fetch_all(self.pool.get_pool())
        .await?)
    }

    // ==================== Collections ====================

    pub async fn collection_stats(&self) -> Result<Vec<CollectionStatsRow>> {
        Ok(sqlx::query_as::<_, CollectionStatsRow>(
            r#"SELECT d.collection,
                      COUNT(DISTINCT d.id) AS documents,
                      COUNT(c.id) AS chunks,
                      COUNT(c.id) FILTER (WHERE c.enrichment_status = 'enriched') AS enriched,
                      COUNT(c.id) FILTER (WHERE c.enrichment_status = 'pending') AS pending,
                      COUNT(c.id) FILTER (WHERE c.enrichment_status = 'failed') AS failed
               FROM documents d
               LEFT JOIN chunks c ON c.document_id = d.id
               GROUP BY d.collection
               ORDER BY d.collection"#,
        )
        .fetch_all(self.pool.get_pool())
        .await?)
    }
}
