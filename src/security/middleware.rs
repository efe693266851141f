use crate::utils::error::ApiError;
use axum::{
    extract::{ConnectInfo, Request},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Bearer-token check. Tokens are compared by digest so the comparison does
/// not leak length or prefix timing.
pub struct ApiAuth {
    token_digest: Option<[u8; 32]>,
}

impl ApiAuth {
    pub fn new(token: Option<&str>) -> Self {
        Self {
            token_digest: token.map(|t| Sha256::digest(t.as_bytes()).into()),
        }
    }

    pub fn validate(&self, headers: &HeaderMap) -> Result<(), ApiError> {
        let Some(expected) = &self.token_digest else {
            return Ok(()); // auth disabled
        };

        let provided = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or_else(|| ApiError::Auth("Unauthorized".to_string()))?;

        let digest: [u8; 32] = Sha256::digest(provided.as_bytes()).into();
        if &digest != expected {
            return Err(ApiError::Auth("Unauthorized".to_string()));
        }
        Ok(())
    }
}

pub async fn auth_middleware(request: Request, next: Next) -> Result<Response, ApiError> {
    let auth = request
        .extensions()
        .get::<Arc<ApiAuth>>()
        .cloned()
        .ok_or_else(|| ApiError::Internal("auth state not configured".to_string()))?;

    auth.validate(request.headers())?;
    Ok(next.run(request).await)
}

/// Fixed-window request counter per client IP. Unlimited when no maximum is
/// configured.
pub struct RateLimiter {
    max: Option<u32>,
    window: Duration,
    hits: Mutex<HashMap<IpAddr, (Instant, u32)>>,
}

impl RateLimiter {
    pub fn new(max: Option<u32>, window_ms: u64) -> Self {
        Self {
            max,
            window: Duration::from_millis(window_ms.max(1)),
            hits: Mutex::new(HashMap::new()),
        }
    }

    pub fn check(&self, ip: IpAddr) -> bool {
        let Some(max) = self.max else {
            return true;
        };
        let now = Instant::now();
        let mut hits = self.hits.lock();
        let entry = hits.entry(ip).or_insert((now, 0));
        if now.duration_since(entry.0) >= self.window {
            *entry = (now, 0);
        }
        entry.1 += 1;
        entry.1 <= max
    }
}

pub async fn rate_limit_middleware(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let limiter = request
        .extensions()
        .get::<Arc<RateLimiter>>()
        .cloned()
        .ok_or_else(|| ApiError::Internal("rate limiter not configured".to_string()))?;

    if !limiter.check(addr.ip()) {
        warn!("Rate limit exceeded for {}", addr.ip());
        return Err(ApiError::RateLimited("Too many requests".to_string()));
    }
    debug!("Request from {} within rate limit", addr.ip());
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with(token: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(token) = token {
            headers.insert(
                header::AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
            );
        }
        headers
    }

    #[test]
    fn auth_disabled_accepts_everything() {
        let auth = ApiAuth::new(None);
        assert!(auth.validate(&headers_with(None)).is_ok());
        assert!(auth.validate(&headers_with(Some("whatever"))).is_ok());
    }

    #[test]
    fn auth_rejects_missing_and_wrong_tokens() {
        let auth = ApiAuth::new(Some("secret-token"));
        assert!(matches!(
            auth.validate(&headers_with(None)),
            Err(ApiError::Auth(_))
        ));
        assert!(matches!(
            auth.validate(&headers_with(Some("wrong"))),
            Err(ApiError::Auth(_))
        ));
        assert!(auth.validate(&headers_with(Some("secret-token"))).is_ok());
    }

    #[test]
    fn rate_limiter_enforces_the_window_max() {
        let limiter = RateLimiter::new(Some(3), 60_000);
        let ip: IpAddr = "203.0.113.9".parse().unwrap();
        assert!(limiter.check(ip));
        assert!(limiter.check(ip));
        assert!(limiter.check(ip));
        assert!(!limiter.check(ip));

        // A different client has its own budget.
        let other: IpAddr = "203.0.113.10".parse().unwrap();
        assert!(limiter.check(other));
    }

    #[test]
    fn unconfigured_limiter_is_unlimited() {
        let limiter = RateLimiter::new(None, 1000);
        let ip: IpAddr = "203.0.113.9".parse().unwrap();
        for _ in 0..100 {
            assert!(limiter.check(ip));
        }
    }
}
