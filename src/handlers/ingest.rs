use crate::services::ingest_service::{IngestRequest, IngestResponse, IngestService};
use crate::utils::error::ApiError;
use axum::{extract::Extension, Json};
use std::sync::Arc;
use tracing::info;

const MAX_ITEMS: usize = 1000;
const MAX_URL_ITEMS: usize = 50;

pub async fn ingest_handler(
    Extension(service): Extension<Arc<IngestService>>,
    Json(request): Json<IngestRequest>,
) -> Result<Json<IngestResponse>, ApiError> {
    validate_request(&request)?;
    info!(
        "Ingest request: {} items (collection={:?}, overwrite={})",
        request.items.len(),
        request.collection,
        request.overwrite
    );

    let response = service.ingest(request).await?;
    Ok(Json(response))
}

fn validate_request(request: &IngestRequest) -> Result<(), ApiError> {
    if request.items.is_empty() {
        return Err(ApiError::Validation("items must not be empty".to_string()));
    }
    if request.items.len() > MAX_ITEMS {
        return Err(ApiError::Validation(format!(
            "too many items: {} (max {})",
            request.items.len(),
            MAX_ITEMS
        )));
    }

    let url_items = request
        .items
        .iter()
        .filter(|item| item.text.is_none() && item.url.is_some())
        .count();
    if url_items > MAX_URL_ITEMS {
        return Err(ApiError::Validation(format!(
            "too many url items: {url_items} (max {MAX_URL_ITEMS})"
        )));
    }

    for (index, item) in request.items.iter().enumerate() {
        if item.text.is_none() && item.url.is_none() {
            return Err(ApiError::Validation(format!(
                "item {index} has neither text nor url"
            )));
        }
        if let Some(url) = &item.url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ApiError::Validation(format!(
                    "item {index} has a non-HTTP url scheme"
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ingest_service::IngestItem;

    fn request_with(items: Vec<IngestItem>) -> IngestRequest {
        IngestRequest {
            collection: None,
            overwrite: false,
            enrich: None,
            items,
        }
    }

    fn text_item() -> IngestItem {
        IngestItem {
            text: Some("hello".to_string()),
            source: Some("test.txt".to_string()),
            ..Default::default()
        }
    }

    fn url_item(url: &str) -> IngestItem {
        IngestItem {
            url: Some(url.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn rejects_empty_and_oversized_requests() {
        assert!(validate_request(&request_with(vec![])).is_err());
        let items = (0..MAX_ITEMS + 1).map(|_| text_item()).collect();
        assert!(validate_request(&request_with(items)).is_err());
    }

    #[test]
    fn rejects_too_many_url_items() {
        let items = (0..MAX_URL_ITEMS + 1)
            .map(|i| url_item(&format!("https://example.com/{i}")))
            .collect();
        assert!(validate_request(&request_with(items)).is_err());
    }

    #[test]
    fn rejects_items_with_neither_text_nor_url() {
        let items = vec![IngestItem::default()];
        assert!(validate_request(&request_with(items)).is_err());
    }

    #[test]
    fn rejects_non_http_schemes() {
        let items = vec![url_item("ftp://example.com/file")];
        assert!(validate_request(&request_with(items)).is_err());
    }

    #[test]
    fn accepts_a_mixed_valid_request() {
        let items = vec![text_item(), url_item("https://example.com/page")];
        assert!(validate_request(&request_with(items)).is_ok());
    }
}
