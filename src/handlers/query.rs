use crate::services::query_service::{QueryRequest, QueryResponse, QueryService};
use crate::utils::error::ApiError;
use axum::{
    extract::Extension,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::info;

pub async fn query_handler(
    Extension(service): Extension<Arc<QueryService>>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, ApiError> {
    validate_request(&request)?;
    info!(
        "Query request: {:?} (strategy={:?})",
        request.query, request.strategy
    );
    let response = service.query(request).await?;
    Ok(Json(response))
}

/// Text projection: the concatenated chunk texts of the top hits, or 404
/// when nothing matched.
pub async fn fulltext_first_handler(
    Extension(service): Extension<Arc<QueryService>>,
    Json(request): Json<QueryRequest>,
) -> Result<Response, ApiError> {
    validate_request(&request)?;
    let response = service.query(request).await?;
    if response.results.is_empty() {
        return Err(ApiError::NotFound("no matching chunks".to_string()));
    }

    let body = response
        .results
        .iter()
        .map(|r| r.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
        .into_response())
}

/// Binary projection: same content as the fulltext route but served as an
/// attachment with a filename derived from the top hit's source.
pub async fn download_first_handler(
    Extension(service): Extension<Arc<QueryService>>,
    Json(request): Json<QueryRequest>,
) -> Result<Response, ApiError> {
    validate_request(&request)?;
    let response = service.query(request).await?;
    let Some(first) = response.results.first() else {
        return Err(ApiError::NotFound("no matching chunks".to_string()));
    };

    let filename = safe_filename(&first.source);
    let body: Vec<u8> = response
        .results
        .iter()
        .map(|r| r.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
        .into_bytes();

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        body,
    )
        .into_response())
}

fn validate_request(request: &QueryRequest) -> Result<(), ApiError> {
    if let Some(top_k) = request.top_k {
        if !(1..=100).contains(&top_k) {
            return Err(ApiError::Validation(format!(
                "topK must be between 1 and 100, got {top_k}"
            )));
        }
    }
    if let Some(min_score) = request.min_score {
        if !(0.0..=1.0).contains(&min_score) {
            return Err(ApiError::Validation(format!(
                "minScore must be between 0 and 1, got {min_score}"
            )));
        }
    }
    Ok(())
}

/// Keeps the last path segment of the source and replaces anything outside
/// a conservative character set.
fn safe_filename(source: &str) -> String {
    let base = source
        .rsplit(['/', '\\'])
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("download");
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.trim_matches(['.', '_']).is_empty() {
        "download.txt".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(top_k: Option<usize>, min_score: Option<f64>) -> QueryRequest {
        QueryRequest {
            collection: None,
            query: "q".to_string(),
            top_k,
            min_score,
            filter: None,
            graph_expand: false,
            graph: None,
            strategy: None,
        }
    }

    #[test]
    fn validates_top_k_bounds() {
        assert!(validate_request(&request(Some(0), None)).is_err());
        assert!(validate_request(&request(Some(101), None)).is_err());
        assert!(validate_request(&request(Some(1), None)).is_ok());
        assert!(validate_request(&request(Some(100), None)).is_ok());
    }

    #[test]
    fn validates_min_score_bounds() {
        assert!(validate_request(&request(None, Some(-0.1))).is_err());
        assert!(validate_request(&request(None, Some(1.1))).is_err());
        assert!(validate_request(&request(None, Some(0.0))).is_ok());
        assert!(validate_request(&request(None, Some(1.0))).is_ok());
    }

    #[test]
    fn derives_safe_filenames() {
        assert_eq!(safe_filename("docs/report v2.pdf"), "report_v2.pdf");
        assert_eq!(
            safe_filename("https://example.com/a/page.html"),
            "page.html"
        );
        assert_eq!(safe_filename("///"), "download");
        assert_eq!(safe_filename("..."), "download.txt");
    }
}
