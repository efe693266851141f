use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct DocumentRow {
    pub id: Uuid,
    pub base_id: String,
    pub collection: String,
    pub identity_key: String,
    pub source: String,
    pub doc_type: String,
    pub repo_id: Option<String>,
    pub repo_url: Option<String>,
    pub path: Option<String>,
    pub lang: Option<String>,
    pub item_url: Option<String>,
    pub mime_type: Option<String>,
    pub size_bytes: Option<i64>,
    pub summary: Option<String>,
    pub raw_key: Option<String>,
    pub ingested_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Fields written when a document is first persisted. The surrogate id and
/// the effective base_id come back from the upsert.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub base_id: String,
    pub collection: String,
    pub identity_key: String,
    pub source: String,
    pub doc_type: String,
    pub repo_id: Option<String>,
    pub repo_url: Option<String>,
    pub path: Option<String>,
    pub lang: Option<String>,
    pub item_url: Option<String>,
    pub mime_type: Option<String>,
    pub size_bytes: Option<i64>,
    pub payload_checksum: Option<String>,
    pub raw_data: Option<Vec<u8>>,
    pub raw_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewChunk {
    pub document_id: Uuid,
    pub chunk_index: i32,
    pub text: String,
    pub doc_type: String,
    pub repo_id: Option<String>,
    pub path: Option<String>,
    pub lang: Option<String>,
    pub item_url: Option<String>,
    pub tier1_meta: Option<Value>,
    pub enrichment_status: String,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ChunkStatusRow {
    pub id: Uuid,
    pub chunk_index: i32,
    pub enrichment_status: String,
    pub tier3_meta: Option<Value>,
}

/// One scored search hit, chunk joined with its owning document.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ScoredChunk {
    pub id: Uuid,
    pub document_id: Uuid,
    pub chunk_index: i32,
    pub text: String,
    pub doc_type: Option<String>,
    pub repo_id: Option<String>,
    pub path: Option<String>,
    pub lang: Option<String>,
    pub item_url: Option<String>,
    pub tier1_meta: Option<Value>,
    pub tier2_meta: Option<Value>,
    pub tier3_meta: Option<Value>,
    pub enrichment_status: String,
    pub source: String,
    pub base_id: String,
    pub score: f64,
}

impl ScoredChunk {
    /// External chunk reference, `"<uuid>:<index>"`. Parsed back with
    /// `rsplit_once(':')` so a colon anywhere in the id part cannot break it.
    pub fn external_id(&self) -> String {
        format!("{}:{}", self.id, self.chunk_index)
    }
}

pub fn parse_external_chunk_id(external: &str) -> Option<(Uuid, i32)> {
    let (id_part, index_part) = external.rsplit_once(':')?;
    let id = Uuid::parse_str(id_part).ok()?;
    let index = index_part.parse().ok()?;
    Some((id, index))
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct CollectionStatsRow {
    pub collection: String,
    pub documents: i64,
    pub chunks: i64,
    pub enriched: i64,
    pub pending: i64,
    pub failed: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentTaskRow {
    pub id: Uuid,
    pub queue: String,
    pub status: String,
    pub payload: Value,
    pub chunk_id: Option<Uuid>,
    pub collection: String,
    pub attempt: i32,
    pub max_attempts: i32,
    pub run_after: DateTime<Utc>,
    pub leased_by: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, sqlx::postgres::PgRow> for EnrichmentTaskRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Self {
            id: row.try_get("id")?,
            queue: row.try_get("queue")?,
            status: row.try_get("status")?,
            payload: row.try_get("payload")?,
            chunk_id: row.try_get("chunk_id")?,
            collection: row.try_get("collection")?,
            attempt: row.try_get("attempt")?,
            max_attempts: row.try_get("max_attempts")?,
            run_after: row.try_get("run_after")?,
            leased_by: row.try_get("leased_by")?,
            lease_expires_at: row.try_get("lease_expires_at")?,
            error: row.try_get("error")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn external_chunk_id_round_trips() {
        let id = Uuid::new_v4();
        let external = format!("{}:{}", id, 7);
        assert_eq!(parse_external_chunk_id(&external), Some((id, 7)));
    }

    #[test]
    fn external_chunk_id_uses_last_colon() {
        // A colon earlier in the string must not confuse the parser.
        let id = Uuid::new_v4();
        let external = format!("{}:12", id);
        let (parsed, index) = parse_external_chunk_id(&external).unwrap();
        assert_eq!(parsed, id);
        assert_eq!(index, 12);
        assert_eq!(parse_external_chunk_id("not-a-uuid:3"), None);
        assert_eq!(parse_external_chunk_id("no-colon"), None);
    }
}
