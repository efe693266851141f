use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub blob: BlobConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub query: QueryConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_url")]
    pub url: String,
    #[serde(default = "default_pool_max")]
    pub pool_max_size: u32,
    #[serde(default = "default_pool_timeout")]
    pub pool_timeout_seconds: u64,
    #[serde(default = "default_vector_size")]
    pub vector_size: usize,
    /// One of `Cosine`, `Euclid`, `Dot`. Only cosine affects the generated
    /// operator today; the others are accepted for forward compatibility.
    #[serde(default = "default_distance")]
    pub distance: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbeddingConfig {
    /// `ollama` or `openai`.
    #[serde(default = "default_embed_provider")]
    pub provider: String,
    #[serde(default = "default_embed_model")]
    pub model: String,
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,
    #[serde(default)]
    pub openai_api_key: Option<String>,
    #[serde(default = "default_openai_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_vector_size")]
    pub dimension: usize,
    #[serde(default = "default_embed_batch")]
    pub batch_size: usize,
    #[serde(default = "default_embed_timeout")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RouterConfig {
    #[serde(default)]
    pub llm_enabled: bool,
    #[serde(default = "default_router_model")]
    pub llm_model: String,
    #[serde(default = "default_router_timeout")]
    pub llm_timeout_ms: u64,
    #[serde(default = "default_circuit_break")]
    pub circuit_break_ms: u64,
    #[serde(default)]
    pub filter_llm_enabled: bool,
    #[serde(default = "default_router_model")]
    pub filter_llm_model: String,
    #[serde(default = "default_filter_timeout")]
    pub filter_llm_timeout_ms: u64,
    #[serde(default = "default_llm_base_url")]
    pub llm_base_url: String,
    #[serde(default)]
    pub llm_api_key: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EnrichmentConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i32,
    #[serde(default = "default_lease_seconds")]
    pub lease_seconds: i64,
    #[serde(default = "default_watchdog_interval")]
    pub watchdog_interval_secs: u64,
    #[serde(default = "default_enqueue_batch")]
    pub enqueue_batch_size: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct SecurityConfig {
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default)]
    pub cors_origin: Option<String>,
    #[serde(default)]
    pub rate_limit_max: Option<u32>,
    #[serde(default = "default_rate_window")]
    pub rate_limit_window_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BlobConfig {
    #[serde(default = "default_blob_threshold")]
    pub threshold_bytes: usize,
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_ms: u64,
    #[serde(default = "default_max_items")]
    pub max_items: usize,
    #[serde(default = "default_max_urls")]
    pub max_urls: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct QueryConfig {
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
    #[serde(default = "default_seed_limit")]
    pub seed_limit: usize,
    #[serde(default = "default_graph_time_limit")]
    pub graph_time_limit_ms: i64,
    #[serde(default = "default_true")]
    pub graph_enabled: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_body_limit() -> usize {
    100 * 1024 * 1024
}
fn default_db_url() -> String {
    "postgres://localhost:5432/rag".to_string()
}
fn default_pool_max() -> u32 {
    10
}
fn default_pool_timeout() -> u64 {
    30
}
fn default_vector_size() -> usize {
    768
}
fn default_distance() -> String {
    "Cosine".to_string()
}
fn default_embed_provider() -> String {
    "ollama".to_string()
}
fn default_embed_model() -> String {
    "nomic-embed-text".to_string()
}
fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_openai_base_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_embed_batch() -> usize {
    500
}
fn default_embed_timeout() -> u64 {
    60
}
fn default_router_model() -> String {
    "llama3.2".to_string()
}
fn default_router_timeout() -> u64 {
    2000
}
fn default_circuit_break() -> u64 {
    30_000
}
fn default_filter_timeout() -> u64 {
    1500
}
fn default_llm_base_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_true() -> bool {
    true
}
fn default_max_attempts() -> i32 {
    3
}
fn default_lease_seconds() -> i64 {
    300
}
fn default_watchdog_interval() -> u64 {
    60
}
fn default_enqueue_batch() -> usize {
    100
}
fn default_rate_window() -> u64 {
    60_000
}
fn default_blob_threshold() -> usize {
    1024 * 1024
}
fn default_fetch_concurrency() -> usize {
    5
}
fn default_fetch_timeout() -> u64 {
    30_000
}
fn default_max_items() -> usize {
    1000
}
fn default_max_urls() -> usize {
    50
}
fn default_top_k() -> usize {
    8
}
fn default_seed_limit() -> usize {
    20
}
fn default_graph_time_limit() -> i64 {
    5000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_db_url(),
            pool_max_size: default_pool_max(),
            pool_timeout_seconds: default_pool_timeout(),
            vector_size: default_vector_size(),
            distance: default_distance(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embed_provider(),
            model: default_embed_model(),
            ollama_url: default_ollama_url(),
            openai_api_key: None,
            openai_base_url: default_openai_base_url(),
            dimension: default_vector_size(),
            batch_size: default_embed_batch(),
            timeout_seconds: default_embed_timeout(),
        }
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            llm_enabled: false,
            llm_model: default_router_model(),
            llm_timeout_ms: default_router_timeout(),
            circuit_break_ms: default_circuit_break(),
            filter_llm_enabled: false,
            filter_llm_model: default_router_model(),
            filter_llm_timeout_ms: default_filter_timeout(),
            llm_base_url: default_llm_base_url(),
            llm_api_key: None,
        }
    }
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: default_max_attempts(),
            lease_seconds: default_lease_seconds(),
            watchdog_interval_secs: default_watchdog_interval(),
            enqueue_batch_size: default_enqueue_batch(),
        }
    }
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            threshold_bytes: default_blob_threshold(),
            bucket: None,
            region: None,
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            fetch_concurrency: default_fetch_concurrency(),
            fetch_timeout_ms: default_fetch_timeout(),
            max_items: default_max_items(),
            max_urls: default_max_urls(),
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_top_k: default_top_k(),
            seed_limit: default_seed_limit(),
            graph_time_limit_ms: default_graph_time_limit(),
            graph_enabled: true,
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .add_source(File::with_name("config/settings").required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut settings: Settings = config.try_deserialize()?;
        settings.apply_env_overrides();
        Ok(settings)
    }

    /// Flat environment names take precedence over the layered config so
    /// deployments can configure the server without a settings file.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("DATABASE_URL") {
            self.database.url = v;
        } else if let Ok(v) = std::env::var("QDRANT_URL") {
            // Legacy deployments configured the store under this name.
            self.database.url = v;
        }
        if let Ok(v) = std::env::var("VECTOR_SIZE") {
            if let Ok(n) = v.parse() {
                self.database.vector_size = n;
                self.embedding.dimension = n;
            }
        }
        if let Ok(v) = std::env::var("DISTANCE") {
            self.database.distance = v;
        }
        if let Ok(v) = std::env::var("ENRICHMENT_ENABLED") {
            self.enrichment.enabled = matches!(v.as_str(), "1" | "true" | "yes");
        }
        if let Ok(v) = std::env::var("EMBED_PROVIDER") {
            self.embedding.provider = v;
        }
        if let Ok(v) = std::env::var("OLLAMA_URL") {
            self.embedding.ollama_url = v.clone();
            self.router.llm_base_url = v;
        }
        if let Ok(v) = std::env::var("OPENAI_API_KEY") {
            self.embedding.openai_api_key = Some(v);
        }
        if let Ok(v) = std::env::var("OPENAI_BASE_URL") {
            self.embedding.openai_base_url = v;
        }
        if let Ok(v) = std::env::var("ROUTER_LLM_ENABLED") {
            self.router.llm_enabled = matches!(v.as_str(), "1" | "true" | "yes");
        }
        if let Ok(v) = std::env::var("ROUTER_LLM_MODEL") {
            self.router.llm_model = v;
        }
        if let Ok(v) = std::env::var("ROUTER_LLM_TIMEOUT_MS") {
            if let Ok(n) = v.parse() {
                self.router.llm_timeout_ms = n;
            }
        }
        if let Ok(v) = std::env::var("ROUTER_LLM_CIRCUIT_BREAK_MS") {
            if let Ok(n) = v.parse() {
                self.router.circuit_break_ms = n;
            }
        }
        if let Ok(v) = std::env::var("ROUTER_FILTER_LLM_ENABLED") {
            self.router.filter_llm_enabled = matches!(v.as_str(), "1" | "true" | "yes");
        }
        if let Ok(v) = std::env::var("ROUTER_FILTER_LLM_MODEL") {
            self.router.filter_llm_model = v;
        }
        if let Ok(v) = std::env::var("ROUTER_FILTER_LLM_TIMEOUT_MS") {
            if let Ok(n) = v.parse() {
                self.router.filter_llm_timeout_ms = n;
            }
        }
        if let Ok(v) = std::env::var("BLOB_STORE_THRESHOLD_BYTES") {
            if let Ok(n) = v.parse() {
                self.blob.threshold_bytes = n;
            }
        }
        if let Ok(v) = std::env::var("RAG_API_TOKEN") {
            self.security.api_token = Some(v);
        }
        if let Ok(v) = std::env::var("CORS_ORIGIN") {
            self.security.cors_origin = Some(v);
        }
        if let Ok(v) = std::env::var("RATE_LIMIT_MAX") {
            if let Ok(n) = v.parse() {
                self.security.rate_limit_max = Some(n);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let settings = Settings::default();
        assert_eq!(settings.database.vector_size, 768);
        assert_eq!(settings.router.llm_timeout_ms, 2000);
        assert_eq!(settings.router.filter_llm_timeout_ms, 1500);
        assert_eq!(settings.router.circuit_break_ms, 30_000);
        assert_eq!(settings.embedding.batch_size, 500);
        assert_eq!(settings.ingest.fetch_concurrency, 5);
        assert_eq!(settings.query.default_top_k, 8);
        assert_eq!(settings.query.graph_time_limit_ms, 5000);
    }
}
