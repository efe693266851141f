pub mod blob_store;
pub mod embedding_service;
pub mod fetcher;
pub mod ingest_service;
pub mod llm_service;
pub mod query_service;
pub mod strategies;

pub use blob_store::BlobStore;
pub use embedding_service::{EmbeddingProvider, EmbeddingService};
pub use fetcher::{FetchError, UrlFetcher};
pub use ingest_service::IngestService;
pub use llm_service::LlmService;
pub use query_service::QueryService;
