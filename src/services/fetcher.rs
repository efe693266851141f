use crate::security::{SsrfError, SsrfGuard};
use anyhow::Result;
use bytes::Bytes;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("blocked by SSRF policy: {0}")]
    Ssrf(#[from] SsrfError),

    #[error("fetch returned status {0}")]
    Status(u16),

    #[error("fetch failed: {0}")]
    Network(String),
}

#[derive(Debug)]
pub struct FetchedUrl {
    pub url: String,
    pub final_url: String,
    pub status: u16,
    pub content_type: String,
    pub bytes: Bytes,
}

/// SSRF-checked URL fetcher. The connection is pinned to the address the
/// guard validated, so the checked IP is the dialed IP.
pub struct UrlFetcher {
    timeout: Duration,
}

impl UrlFetcher {
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    pub async fn fetch(&self, url: &str) -> Result<FetchedUrl, FetchError> {
        let target = SsrfGuard::check(url).await?;

        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .redirect(reqwest::redirect::Policy::none())
            .resolve(
                &target.hostname,
                SocketAddr::new(target.resolved_ip, target.port),
            )
            .build()
            .map_err(|e| FetchError::Network(e.to_string()))?;

        debug!(
            "Fetching {} ({} -> {})",
            url, target.hostname, target.resolved_ip
        );

        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let final_url = response.url().to_string();

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        Ok(FetchedUrl {
            url: url.to_string(),
            final_url,
            status: status.as_u16(),
            content_type,
            bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn blocked_url_never_reaches_the_network() {
        let fetcher = UrlFetcher::new(1000);
        let err = fetcher.fetch("https://192.168.1.1/admin").await.unwrap_err();
        assert!(matches!(err, FetchError::Ssrf(_)));
    }

    #[tokio::test]
    async fn fetches_from_a_local_mock() {
        use httpmock::prelude::*;
        // httpmock binds 127.0.0.1, which the guard rejects by design, so
        // this exercises the SSRF path end to end as well.
        let server = MockServer::start();
        let fetcher = UrlFetcher::new(1000);
        let err = fetcher
            .fetch(&format!("{}/page", server.base_url()))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Ssrf(_)));
    }
}
