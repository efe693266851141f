use crate::config::{EnrichmentConfig, IngestConfig};
use crate::database::{NewChunk, NewDocument, Repository};
use crate::document::{
    chunker::Chunker,
    detector::{DetectInput, DocType, DocTypeDetector},
    extractor::{ContentExtractor, ExtractionStrategy},
    tier1,
};
use crate::queue::TaskQueue;
use crate::services::blob_store::BlobStore;
use crate::services::embedding_service::EmbeddingProvider;
use crate::services::fetcher::{FetchError, UrlFetcher};
use crate::utils::error::ApiError;
use crate::utils::sanitize::{sanitize_json, strip_null_bytes, strip_null_bytes_opt};
use futures::future::join_all;
use pgvector::Vector;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

pub const DEFAULT_COLLECTION: &str = "docs";

/// Enrichment tasks are enqueued in groups of at most this many chunks.
const ENQUEUE_GROUP_SIZE: usize = 100;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestRequest {
    pub collection: Option<String>,
    #[serde(default)]
    pub overwrite: bool,
    pub enrich: Option<bool>,
    pub items: Vec<IngestItem>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct IngestItem {
    pub id: Option<String>,
    pub text: Option<String>,
    pub url: Option<String>,
    pub source: Option<String>,
    pub doc_type: Option<String>,
    pub repo_id: Option<String>,
    pub repo_url: Option<String>,
    pub path: Option<String>,
    pub lang: Option<String>,
    pub item_url: Option<String>,
    pub mime_type: Option<String>,
    pub metadata: Option<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestResponse {
    pub ok: bool,
    pub upserted: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fetched: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enrichment: Option<EnrichmentSummary>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<IngestItemError>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentSummary {
    pub enqueued: usize,
    pub doc_types: BTreeMap<String, usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestItemError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub status: Option<u16>,
    pub reason: String,
}

/// An item that survived fetching/validation and is ready for the
/// per-document transaction.
struct PreparedItem {
    item: IngestItem,
    identity_key: String,
    raw_bytes: Option<Vec<u8>>,
}

pub struct IngestService {
    repository: Arc<Repository>,
    embedder: Arc<dyn EmbeddingProvider>,
    blob_store: Arc<BlobStore>,
    fetcher: UrlFetcher,
    task_queue: Arc<TaskQueue>,
    chunker: Chunker,
    config: IngestConfig,
    enrichment: EnrichmentConfig,
}

impl IngestService {
    pub fn new(
        repository: Arc<Repository>,
        embedder: Arc<dyn EmbeddingProvider>,
        blob_store: Arc<BlobStore>,
        task_queue: Arc<TaskQueue>,
        config: IngestConfig,
        enrichment: EnrichmentConfig,
    ) -> Self {
        let fetcher = UrlFetcher::new(config.fetch_timeout_ms);
        Self {
            repository,
            embedder,
            blob_store,
            fetcher,
            task_queue,
            chunker: Chunker::new(1600, 200),
            config,
            enrichment,
        }
    }

    pub async fn ingest(&self, request: IngestRequest) -> Result<IngestResponse, ApiError> {
        let collection = request
            .collection
            .unwrap_or_else(|| DEFAULT_COLLECTION.to_string());
        let enrich = request.enrich.unwrap_or(self.enrichment.enabled);
        let overwrite = request.overwrite;

        let mut errors: Vec<IngestItemError> = Vec::new();

        // Partition: items that already carry text vs url-only items.
        let (text_items, url_items): (Vec<IngestItem>, Vec<IngestItem>) = request
            .items
            .into_iter()
            .partition(|item| item.text.is_some());

        let url_count = url_items.len();
        let (fetched_items, fetch_errors) = self.fetch_url_items(url_items).await;
        errors.extend(fetch_errors);
        let fetched = fetched_items.len();

        // Per-item processing is sequential so an embedder failure can be
        // attributed to a specific document.
        let mut upserted = 0usize;
        let mut skipped = 0usize;
        let mut enqueued = 0usize;
        let mut doc_types: BTreeMap<String, usize> = BTreeMap::new();

        let prepared = text_items
            .into_iter()
            .map(|item| self.prepare_text_item(item))
            .chain(fetched_items.into_iter().map(Ok))
            .collect::<Vec<Result<PreparedItem, IngestItemError>>>();

        for prepared in prepared {
            let prepared = match prepared {
                Ok(prepared) => prepared,
                Err(error) => {
                    errors.push(error);
                    continue;
                }
            };

            match self
                .upsert_one(&collection, prepared, overwrite, enrich)
                .await?
            {
                UpsertOutcome::Upserted {
                    doc_type,
                    enqueued: n,
                } => {
                    upserted += 1;
                    enqueued += n;
                    *doc_types.entry(doc_type).or_default() += 1;
                }
                UpsertOutcome::Skipped => skipped += 1,
            }
        }

        info!(
            "Ingest finished: upserted={} skipped={} fetched={} errors={} (collection={})",
            upserted,
            skipped,
            fetched,
            errors.len(),
            collection
        );

        Ok(IngestResponse {
            ok: true,
            upserted,
            skipped: (skipped > 0).then_some(skipped),
            fetched: (url_count > 0).then_some(fetched),
            enrichment: enrich.then(|| EnrichmentSummary {
                enqueued,
                doc_types,
            }),
            errors,
        })
    }

    // ==================== URL fetching ====================

    /// Bounded worker pool over the url-only items; each worker fetches,
    /// extracts, and hands back either a prepared item or a per-item error.
    async fn fetch_url_items(
        &self,
        items: Vec<IngestItem>,
    ) -> (Vec<PreparedItem>, Vec<IngestItemError>) {
        let semaphore = Arc::new(Semaphore::new(self.config.fetch_concurrency.max(1)));

        let futures = items.into_iter().map(|item| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                let _permit = semaphore.acquire().await.ok()?;
                Some(self.fetch_one(item).await)
            }
        });

        let mut prepared = Vec::new();
        let mut errors = Vec::new();
        for outcome in join_all(futures).await.into_iter().flatten() {
            match outcome {
                Ok(item) => prepared.push(item),
                Err(error) => errors.push(error),
            }
        }
        (prepared, errors)
    }

    async fn fetch_one(&self, mut item: IngestItem) -> Result<PreparedItem, IngestItemError> {
        let Some(url) = item.url.clone() else {
            return Err(IngestItemError {
                url: None,
                source: item.source.clone(),
                status: None,
                reason: "missing_text".to_string(),
            });
        };
        let item_error = |status: Option<u16>, reason: &str| IngestItemError {
            url: Some(url.clone()),
            source: None,
            status,
            reason: reason.to_string(),
        };

        let fetched = match self.fetcher.fetch(&url).await {
            Ok(fetched) => fetched,
            Err(FetchError::Ssrf(e)) => {
                warn!("SSRF blocked {}: {}", url, e);
                return Err(item_error(None, "ssrf_blocked"));
            }
            Err(FetchError::Status(status)) => {
                return Err(item_error(Some(status), "fetch_failed"));
            }
            Err(FetchError::Network(e)) => {
                debug!("Fetch failed for {}: {}", url, e);
                return Err(item_error(None, "fetch_failed"));
            }
        };

        let extracted = ContentExtractor::extract(&fetched.bytes, &fetched.content_type);

        if extracted.strategy == ExtractionStrategy::MetadataOnly {
            return Err(item_error(Some(fetched.status), "unsupported_content_type"));
        }
        let text = match extracted.text {
            Some(text) if !text.trim().is_empty() => text,
            _ => return Err(item_error(Some(fetched.status), "no_extractable_text")),
        };

        // Default source is origin + pathname of the resolved URL; this is
        // also the document identity for url items.
        let identity_key = normalize_url(&fetched.final_url).unwrap_or_else(|| url.clone());
        if item.source.is_none() {
            item.source = Some(identity_key.clone());
        }
        item.text = Some(text);
        item.mime_type = Some(extracted.content_type.clone());

        let mut fetch_meta = json!({
            "strategy": extracted.strategy.as_str(),
            "contentType": extracted.content_type,
            "status": fetched.status,
        });
        if let Some(title) = extracted.title {
            fetch_meta["title"] = json!(title);
        }
        if let Some(extra) = extracted.metadata {
            fetch_meta["extractor"] = extra;
        }
        let mut metadata = item.metadata.take().unwrap_or_else(|| json!({}));
        if let Some(obj) = metadata.as_object_mut() {
            obj.insert("fetch".to_string(), fetch_meta);
        }
        item.metadata = Some(metadata);

        Ok(PreparedItem {
            item,
            identity_key,
            raw_bytes: Some(fetched.bytes.to_vec()),
        })
    }

    fn prepare_text_item(&self, item: IngestItem) -> Result<PreparedItem, IngestItemError> {
        match &item.source {
            Some(source) => Ok(PreparedItem {
                identity_key: source.clone(),
                item,
                raw_bytes: None,
            }),
            None => Err(IngestItemError {
                url: item.url.clone(),
                source: None,
                status: None,
                reason: "missing_source".to_string(),
            }),
        }
    }

    // ==================== Per-document upsert ====================

    async fn upsert_one(
        &self,
        collection: &str,
        prepared: PreparedItem,
        overwrite: bool,
        enrich: bool,
    ) -> Result<UpsertOutcome, ApiError> {
        let PreparedItem {
            item,
            identity_key,
            raw_bytes,
        } = prepared;

        let source = match &item.source {
            Some(source) => strip_null_bytes(source),
            None => {
                return Err(ApiError::Internal("item without source survived".to_string()));
            }
        };
        let text = match &item.text {
            Some(text) => strip_null_bytes(text),
            None => {
                return Err(ApiError::Internal("item without text survived".to_string()));
            }
        };

        let base_id = item.id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());

        let doc_type = DocTypeDetector::detect(&DetectInput {
            explicit: item.doc_type.as_deref(),
            metadata: item.metadata.as_ref(),
            source_url: item.url.as_deref().or(item.item_url.as_deref()),
            source: Some(&source),
            content: Some(&text),
        });

        let tier1_meta = tier1::extract_tier1(doc_type, Some(&text), item.metadata.as_ref())
            .map(sanitize_json);

        let lang = item
            .lang
            .clone()
            .or_else(|| match doc_type {
                DocType::Code => tier1::lang_from_source(&source),
                _ => None,
            });

        let chunks = self.chunker.chunk(&text);

        // Raw payload: oversized bodies go to the blob store, small ones
        // are inlined; the checksum covers the payload either way. The raw
        // bytes are stored verbatim (never null-byte stripped).
        let payload_bytes = raw_bytes.unwrap_or_else(|| text.clone().into_bytes());
        let checksum = hex::encode(Sha256::digest(&payload_bytes));
        let size_bytes = payload_bytes.len() as i64;
        let (raw_data, raw_key) = if self.blob_store.should_offload(payload_bytes.len()) {
            let key = format!("{collection}/{checksum}");
            self.blob_store
                .put(&key, payload_bytes)
                .await
                .map_err(|e| ApiError::Upstream(e.to_string()))?;
            (None, Some(key))
        } else {
            (Some(payload_bytes), None)
        };

        let new_doc = NewDocument {
            base_id: strip_null_bytes(&base_id),
            collection: collection.to_string(),
            identity_key: strip_null_bytes(&identity_key),
            source: source.clone(),
            doc_type: doc_type.as_str().to_string(),
            repo_id: strip_null_bytes_opt(item.repo_id.as_deref()),
            repo_url: strip_null_bytes_opt(item.repo_url.as_deref()),
            path: strip_null_bytes_opt(item.path.as_deref()),
            lang: strip_null_bytes_opt(lang.as_deref()),
            item_url: strip_null_bytes_opt(item.item_url.as_deref().or(item.url.as_deref())),
            mime_type: strip_null_bytes_opt(item.mime_type.as_deref()),
            size_bytes: Some(size_bytes),
            payload_checksum: Some(checksum),
            raw_data,
            raw_key,
        };

        // One transaction per document: upsert, chunk rows, embeddings,
        // enrichment tasks, all on a single checked-out connection.
        let mut tx = self.repository.begin().await.map_err(to_db_error)?;

        let Some((doc_id, effective_base_id, was_update)) = self
            .repository
            .upsert_document(&mut tx, &new_doc, overwrite)
            .await
            .map_err(to_db_error)?
        else {
            tx.commit().await.map_err(|e| ApiError::Database(e.to_string()))?;
            debug!("Skipped existing identity {} (overwrite off)", identity_key);
            return Ok(UpsertOutcome::Skipped);
        };

        if was_update {
            let deleted = self
                .repository
                .delete_chunks_for_document(&mut tx, doc_id)
                .await
                .map_err(to_db_error)?;
            debug!("Replaced {} chunks of {}", deleted, effective_base_id);
        }

        let enrichment_status = if enrich { "pending" } else { "none" };
        let mut chunk_ids = Vec::with_capacity(chunks.len());
        for (index, chunk_text) in chunks.iter().enumerate() {
            let chunk = NewChunk {
                document_id: doc_id,
                chunk_index: index as i32,
                text: strip_null_bytes(chunk_text),
                doc_type: doc_type.as_str().to_string(),
                repo_id: new_doc.repo_id.clone(),
                path: new_doc.path.clone(),
                lang: new_doc.lang.clone(),
                item_url: new_doc.item_url.clone(),
                tier1_meta: tier1_meta.clone(),
                enrichment_status: enrichment_status.to_string(),
            };
            let id = self
                .repository
                .insert_chunk(&mut tx, &chunk)
                .await
                .map_err(to_db_error)?;
            chunk_ids.push(id);
        }

        // Embedder batches are the provider's concern; chunks are embedded
        // in index order and written back row by row.
        if !chunks.is_empty() {
            let vectors = self
                .embedder
                .embed(&chunks)
                .await
                .map_err(|e| ApiError::Upstream(e.to_string()))?;
            for (chunk_id, vector) in chunk_ids.iter().zip(vectors) {
                self.repository
                    .set_chunk_embedding(&mut tx, *chunk_id, Vector::from(vector))
                    .await
                    .map_err(to_db_error)?;
            }
        }

        let mut enqueued = 0usize;
        if enrich {
            for group in chunk_ids.chunks(ENQUEUE_GROUP_SIZE) {
                enqueued += self
                    .task_queue
                    .enqueue_chunks(&mut tx, collection, &effective_base_id, group)
                    .await
                    .map_err(to_db_error)?;
            }
        }

        tx.commit().await.map_err(|e| ApiError::Database(e.to_string()))?;

        Ok(UpsertOutcome::Upserted {
            doc_type: doc_type.as_str().to_string(),
            enqueued,
        })
    }
}

enum UpsertOutcome {
    Upserted { doc_type: String, enqueued: usize },
    Skipped,
}

fn to_db_error(e: anyhow::Error) -> ApiError {
    ApiError::Database(e.to_string())
}

/// Origin plus pathname, dropping query and fragment; the identity key for
/// url items.
fn normalize_url(raw: &str) -> Option<String> {
    let url = Url::parse(raw).ok()?;
    Some(format!("{}{}", url.origin().ascii_serialization(), url.path()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_normalization_keeps_origin_and_path() {
        assert_eq!(
            normalize_url("https://Example.com/a/b?q=1#frag").as_deref(),
            Some("https://example.com/a/b")
        );
        assert_eq!(
            normalize_url("http://example.com:8080/x").as_deref(),
            Some("http://example.com:8080/x")
        );
        assert!(normalize_url("not a url").is_none());
    }
}
