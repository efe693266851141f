use scraper::{Html, Selector};
use serde_json::json;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionStrategy {
    Readability,
    PdfParse,
    Passthrough,
    Plaintext,
    MetadataOnly,
}

impl ExtractionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Readability => "readability",
            Self::PdfParse => "pdf-parse",
            Self::Passthrough => "passthrough",
            Self::Plaintext => "plaintext",
            Self::MetadataOnly => "metadata-only",
        }
    }
}

#[derive(Debug)]
pub struct ExtractedContent {
    pub text: Option<String>,
    pub title: Option<String>,
    pub strategy: ExtractionStrategy,
    pub content_type: String,
    pub metadata: Option<serde_json::Value>,
}

pub struct ContentExtractor;

impl ContentExtractor {
    /// Selects an extraction strategy from the MIME type and runs it. Parse
    /// failures never escape; they fall through to a lower-fidelity
    /// strategy and the `strategy` tag reports what actually ran.
    pub fn extract(bytes: &[u8], mime: &str) -> ExtractedContent {
        let content_type = normalize_content_type(mime);

        match content_type.as_str() {
            "text/html" => Self::extract_html(bytes, content_type),
            "application/pdf" => Self::extract_pdf(bytes, content_type),
            "text/plain" | "text/markdown" => ExtractedContent {
                text: Some(String::from_utf8_lossy(bytes).into_owned()),
                title: None,
                strategy: ExtractionStrategy::Passthrough,
                content_type,
                metadata: None,
            },
            "application/json" => {
                let raw = String::from_utf8_lossy(bytes).into_owned();
                let text = match serde_json::from_str::<serde_json::Value>(&raw) {
                    Ok(value) => serde_json::to_string_pretty(&value).unwrap_or(raw),
                    Err(_) => raw,
                };
                ExtractedContent {
                    text: Some(text),
                    title: None,
                    strategy: ExtractionStrategy::Passthrough,
                    content_type,
                    metadata: None,
                }
            }
            _ => {
                debug!("No extractor for content type {}", content_type);
                ExtractedContent {
                    text: None,
                    title: None,
                    strategy: ExtractionStrategy::MetadataOnly,
                    content_type,
                    metadata: None,
                }
            }
        }
    }

    fn extract_html(bytes: &[u8], content_type: String) -> ExtractedContent {
        let html = String::from_utf8_lossy(bytes);
        let document = Html::parse_document(&html);

        let title = Selector::parse("title").ok().and_then(|sel| {
            document
                .select(&sel)
                .next()
                .map(|el| el.text().collect::<String>().trim().to_string())
                .filter(|t| !t.is_empty())
        });

        // Article-first extraction; <article>/<main> carry the readable
        // content when present, body text is the low-fidelity fallback.
        for selector in ["article", "main"] {
            if let Ok(sel) = Selector::parse(selector) {
                if let Some(el) = document.select(&sel).next() {
                    let text = collect_text(el.text());
                    if !text.is_empty() {
                        return ExtractedContent {
                            text: Some(text),
                            title,
                            strategy: ExtractionStrategy::Readability,
                            content_type,
                            metadata: None,
                        };
                    }
                }
            }
        }

        let body_text = Selector::parse("body")
            .ok()
            .and_then(|sel| document.select(&sel).next())
            .map(|el| collect_text(el.text()))
            .filter(|t| !t.is_empty());

        match body_text {
            Some(text) => ExtractedContent {
                text: Some(text),
                title,
                strategy: ExtractionStrategy::Plaintext,
                content_type,
                metadata: None,
            },
            None => ExtractedContent {
                text: None,
                title,
                strategy: ExtractionStrategy::MetadataOnly,
                content_type,
                metadata: None,
            },
        }
    }

    fn extract_pdf(bytes: &[u8], content_type: String) -> ExtractedContent {
        use lopdf::Document;

        let doc = match Document::load_mem(bytes) {
            Ok(doc) => doc,
            Err(e) => {
                debug!("PDF parse failed, degrading to metadata-only: {}", e);
                return ExtractedContent {
                    text: None,
                    title: None,
                    strategy: ExtractionStrategy::MetadataOnly,
                    content_type,
                    metadata: None,
                };
            }
        };

        let page_count = doc.get_pages().len();
        let mut content = String::new();
        for page_num in 1..=page_count {
            if let Ok(text) = doc.extract_text(&[page_num as u32]) {
                content.push_str(&text);
                content.push('\n');
            }
        }

        let text = if content.trim().is_empty() {
            None
        } else {
            Some(content)
        };

        ExtractedContent {
            text,
            title: None,
            strategy: ExtractionStrategy::PdfParse,
            content_type,
            metadata: Some(json!({ "pageCount": page_count })),
        }
    }
}

fn normalize_content_type(mime: &str) -> String {
    mime.split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

fn collect_text<'a>(parts: impl Iterator<Item = &'a str>) -> String {
    let mut out = String::new();
    for part in parts {
        let trimmed = part.trim();
        if trimmed.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(trimmed);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_mime_parameters() {
        assert_eq!(normalize_content_type("Text/HTML; charset=UTF-8"), "text/html");
        assert_eq!(normalize_content_type("application/pdf"), "application/pdf");
    }

    #[test]
    fn extracts_article_text_with_title() {
        let html = b"<html><head><title>Post</title></head>\
            <body><nav>skip</nav><article><p>Hello</p><p>World</p></article></body></html>";
        let result = ContentExtractor::extract(html, "text/html; charset=utf-8");
        assert_eq!(result.strategy, ExtractionStrategy::Readability);
        assert_eq!(result.title.as_deref(), Some("Post"));
        let text = result.text.unwrap();
        assert!(text.contains("Hello"));
        assert!(text.contains("World"));
        assert!(!text.contains("skip"));
    }

    #[test]
    fn html_without_article_falls_back_to_body() {
        let html = b"<html><body><div>just a div</div></body></html>";
        let result = ContentExtractor::extract(html, "text/html");
        assert_eq!(result.strategy, ExtractionStrategy::Plaintext);
        assert!(result.text.unwrap().contains("just a div"));
    }

    #[test]
    fn json_is_pretty_printed_when_valid() {
        let result = ContentExtractor::extract(br#"{"a":1}"#, "application/json");
        assert_eq!(result.strategy, ExtractionStrategy::Passthrough);
        assert!(result.text.unwrap().contains("\"a\": 1"));

        let invalid = ContentExtractor::extract(b"{not json", "application/json");
        assert_eq!(invalid.text.as_deref(), Some("{not json"));
    }

    #[test]
    fn unknown_type_is_metadata_only() {
        let result = ContentExtractor::extract(b"\x89PNG", "image/png");
        assert_eq!(result.strategy, ExtractionStrategy::MetadataOnly);
        assert!(result.text.is_none());
    }

    #[test]
    fn broken_pdf_degrades_instead_of_erroring() {
        let result = ContentExtractor::extract(b"not a pdf at all", "application/pdf");
        assert_eq!(result.strategy, ExtractionStrategy::MetadataOnly);
        assert!(result.text.is_none());
    }
}
