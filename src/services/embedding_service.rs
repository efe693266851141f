use crate::config::EmbeddingConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a [String],
    model: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Seam for tests and alternative backends; production use is the
/// OpenAI-format HTTP client below.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

pub struct EmbeddingService {
    client: Client,
    base_url: String,
    model: String,
    dimension: usize,
    api_key: Option<String>,
    batch_size: usize,
}

impl EmbeddingService {
    pub fn new(config: &EmbeddingConfig) -> Self {
        let (base_url, api_key) = match config.provider.as_str() {
            "openai" => (
                config.openai_base_url.clone(),
                config.openai_api_key.clone(),
            ),
            _ => (config.ollama_url.clone(), None),
        };

        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(config.timeout_seconds))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url,
            model: config.model.clone(),
            dimension: config.dimension,
            api_key,
            batch_size: config.batch_size.max(1),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// One HTTP round-trip for up to `batch_size` texts.
    async fn embed_batch_internal(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        debug!(
            "Embedding batch of {} texts using model {}",
            texts.len(),
            self.model
        );

        let url = format!("{}/v1/embeddings", self.base_url.trim_end_matches('/'));
        let request = EmbeddingRequest {
            input: texts,
            model: &self.model,
        };

        let mut builder = self.client.post(&url);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }

        let response = builder
            .json(&request)
            .send()
            .await
            .context("Failed to connect to embedding server")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Embedding API error ({}): {}", status, body);
        }

        let body: EmbeddingResponse = response
            .json()
            .await
            .context("Failed to parse embedding response (expected OpenAI format)")?;

        if body.data.len() != texts.len() {
            anyhow::bail!(
                "Embedding count mismatch: sent {}, got {}",
                texts.len(),
                body.data.len()
            );
        }

        let mut vectors = Vec::with_capacity(body.data.len());
        for data in body.data {
            if data.embedding.len() != self.dimension {
                anyhow::bail!(
                    "Embedding dimension mismatch: expected {}, got {}",
                    self.dimension,
                    data.embedding.len()
                );
            }
            vectors.push(data.embedding);
        }
        Ok(vectors)
    }
}

#[async_trait]
impl EmbeddingProvider for EmbeddingService {
    /// Splits the input into serial batches; each batch is exactly one call
    /// to the embedder.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut all = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            all.extend(self.embed_batch_internal(batch).await?);
        }
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn service_for(server: &MockServer, dimension: usize) -> EmbeddingService {
        let config = EmbeddingConfig {
            provider: "ollama".to_string(),
            model: "test-model".to_string(),
            ollama_url: server.base_url(),
            openai_api_key: None,
            openai_base_url: server.base_url(),
            dimension,
            batch_size: 2,
            timeout_seconds: 5,
        };
        EmbeddingService::new(&config)
    }

    #[tokio::test]
    async fn embeds_in_batches_of_configured_size() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/v1/embeddings");
            then.status(200).json_body(json!({
                "data": [
                    {"embedding": [0.1, 0.2]},
                    {"embedding": [0.3, 0.4]}
                ]
            }));
        });

        let service = service_for(&server, 2);
        let texts: Vec<String> = (0..4).map(|i| format!("text {i}")).collect();
        let vectors = service.embed(&texts).await.unwrap();

        assert_eq!(vectors.len(), 4);
        mock.assert_hits(2);
    }

    #[tokio::test]
    async fn rejects_dimension_mismatch() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/v1/embeddings");
            then.status(200)
                .json_body(json!({"data": [{"embedding": [0.1, 0.2, 0.3]}]}));
        });

        let service = service_for(&server, 2);
        let err = service.embed(&["x".to_string()]).await.unwrap_err();
        assert!(err.to_string().contains("dimension mismatch"));
    }

    #[tokio::test]
    async fn surfaces_non_2xx_as_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/v1/embeddings");
            then.status(500).body("boom");
        });

        let service = service_for(&server, 2);
        let err = service.embed(&["x".to_string()]).await.unwrap_err();
        assert!(err.to_string().contains("Embedding API error"));
    }
}
