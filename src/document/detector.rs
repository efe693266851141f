use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::debug;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocType {
    Code,
    Email,
    Slack,
    Meeting,
    Pdf,
    Image,
    Article,
    Text,
}

impl DocType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Email => "email",
            Self::Slack => "slack",
            Self::Meeting => "meeting",
            Self::Pdf => "pdf",
            Self::Image => "image",
            Self::Article => "article",
            Self::Text => "text",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "code" => Some(Self::Code),
            "email" => Some(Self::Email),
            "slack" => Some(Self::Slack),
            "meeting" => Some(Self::Meeting),
            "pdf" => Some(Self::Pdf),
            "image" => Some(Self::Image),
            "article" => Some(Self::Article),
            "text" => Some(Self::Text),
            _ => None,
        }
    }
}

static EMAIL_HEADER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?mi)^(from|to|subject|date|received|message-id):\s").expect("static regex")
});

static MEETING_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(meeting date|attendees|duration|platform:\s*(zoom|teams|meet|webex))\b")
        .expect("static regex")
});

const CODE_EXTENSIONS: &[&str] = &[
    "rs", "ts", "tsx", "js", "jsx", "py", "go", "java", "c", "cc", "cpp", "h", "hpp", "rb", "php",
    "swift", "kt", "scala", "sh", "sql", "cs", "ex", "exs", "zig", "lua",
];

const ARTICLE_EXTENSIONS: &[&str] = &["md", "markdown", "rst", "adoc", "html", "htm"];

const SLACK_SNIFF_MAX_BYTES: usize = 100 * 1024;

#[derive(Debug, Default)]
pub struct DetectInput<'a> {
    pub explicit: Option<&'a str>,
    pub metadata: Option<&'a Value>,
    pub source_url: Option<&'a str>,
    pub source: Option<&'a str>,
    pub content: Option<&'a str>,
}

pub struct DocTypeDetector;

impl DocTypeDetector {
    pub fn detect(input: &DetectInput<'_>) -> DocType {
        // 1. Explicit type wins.
        if let Some(doc_type) = input.explicit.and_then(DocType::parse) {
            return doc_type;
        }

        // 2. Metadata hints.
        if let Some(meta) = input.metadata.and_then(Value::as_object) {
            if meta.contains_key("channel") || meta.contains_key("threadId") {
                return DocType::Slack;
            }
            if meta.contains_key("from") && meta.contains_key("subject") {
                return DocType::Email;
            }
        }

        // 3. Source URL host.
        if let Some(host) = input
            .source_url
            .and_then(|raw| Url::parse(raw).ok())
            .and_then(|url| url.host_str().map(str::to_ascii_lowercase))
        {
            if host_matches(&host, "github.com") || host_matches(&host, "gitlab.com") {
                return DocType::Code;
            }
            if host_matches(&host, "slack.com") {
                return DocType::Slack;
            }
        }

        // 4. Content sniffing.
        if let Some(content) = input.content {
            let head: String = content.chars().take(500).collect();
            if EMAIL_HEADER_RE.is_match(&head) {
                return DocType::Email;
            }
            if content.len() < SLACK_SNIFF_MAX_BYTES {
                if let Ok(value) = serde_json::from_str::<Value>(content) {
                    if value.get("messages").map(Value::is_array).unwrap_or(false) {
                        return DocType::Slack;
                    }
                }
            }
            if MEETING_RE.is_match(content) {
                return DocType::Meeting;
            }
        }

        // 5. Extension table.
        if let Some(ext) = input.source.and_then(extension_of) {
            if CODE_EXTENSIONS.contains(&ext.as_str()) {
                return DocType::Code;
            }
            if ext == "pdf" {
                return DocType::Pdf;
            }
            if mime_guess::from_ext(&ext)
                .first()
                .map(|m| m.type_() == mime_guess::mime::IMAGE)
                .unwrap_or(false)
            {
                return DocType::Image;
            }
            if ARTICLE_EXTENSIONS.contains(&ext.as_str()) {
                return DocType::Article;
            }
        }

        debug!("Doc type defaulted to text (source={:?})", input.source);
        DocType::Text
    }
}

fn host_matches(host: &str, domain: &str) -> bool {
    host == domain || host.ends_with(&format!(".{domain}"))
}

fn extension_of(source: &str) -> Option<String> {
    let name = source.rsplit(['/', '\\']).next()?;
    let (_, ext) = name.rsplit_once('.')?;
    if ext.is_empty() {
        None
    } else {
        Some(ext.to_ascii_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn explicit_type_wins() {
        let input = DetectInput {
            explicit: Some("meeting"),
            source: Some("notes.rs"),
            ..Default::default()
        };
        assert_eq!(DocTypeDetector::detect(&input), DocType::Meeting);
    }

    #[test]
    fn metadata_hints_beat_url() {
        let meta = json!({"channel": "C123"});
        let input = DetectInput {
            metadata: Some(&meta),
            source_url: Some("https://github.com/owner/repo"),
            ..Default::default()
        };
        assert_eq!(DocTypeDetector::detect(&input), DocType::Slack);

        let meta = json!({"from": "a@b.c", "subject": "hi"});
        let input = DetectInput {
            metadata: Some(&meta),
            ..Default::default()
        };
        assert_eq!(DocTypeDetector::detect(&input), DocType::Email);
    }

    #[test]
    fn url_host_detection_includes_subdomains() {
        let input = DetectInput {
            source_url: Some("https://gist.github.com/foo"),
            ..Default::default()
        };
        assert_eq!(DocTypeDetector::detect(&input), DocType::Code);

        let input = DetectInput {
            source_url: Some("https://myteam.slack.com/archives/C1"),
            ..Default::default()
        };
        assert_eq!(DocTypeDetector::detect(&input), DocType::Slack);

        // Not a subdomain: must not match.
        let input = DetectInput {
            source_url: Some("https://notgithub.com/x"),
            ..Default::default()
        };
        assert_eq!(DocTypeDetector::detect(&input), DocType::Text);
    }

    #[test]
    fn sniffs_email_headers() {
        let content = "From: alice@example.com\nSubject: weekly sync\n\nbody";
        let input = DetectInput {
            content: Some(content),
            ..Default::default()
        };
        assert_eq!(DocTypeDetector::detect(&input), DocType::Email);
    }

    #[test]
    fn sniffs_slack_export_json() {
        let content = r#"{"messages": [{"user": "U1", "text": "hi"}]}"#;
        let input = DetectInput {
            content: Some(content),
            ..Default::default()
        };
        assert_eq!(DocTypeDetector::detect(&input), DocType::Slack);
    }

    #[test]
    fn sniffs_meeting_notes() {
        let content = "Attendees: alice, bob\nPlatform: Zoom\nnotes follow";
        let input = DetectInput {
            content: Some(content),
            ..Default::default()
        };
        assert_eq!(DocTypeDetector::detect(&input), DocType::Meeting);
    }

    #[test]
    fn extension_table_and_fallback() {
        let cases = [
            ("main.rs", DocType::Code),
            ("report.pdf", DocType::Pdf),
            ("photo.JPG", DocType::Image),
            ("readme.md", DocType::Article),
            ("notes", DocType::Text),
        ];
        for (source, expected) in cases {
            let input = DetectInput {
                source: Some(source),
                ..Default::default()
            };
            assert_eq!(DocTypeDetector::detect(&input), expected, "{source}");
        }
    }
}
