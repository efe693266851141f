use super::DocType;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};

static HEADER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?mi)^(from|to|subject|date):[ \t]*(.+)$").expect("static regex")
});

static MEETING_DATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)meeting date[:\s]+([^\n]+)").expect("static regex")
});

static PLATFORM_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)platform:\s*(zoom|teams|meet|webex)").expect("static regex")
});

/// Inline metadata extracted at ingest time. Tier-2/3 arrive later via the
/// enrichment queue; tier-1 is whatever is cheap enough to compute in the
/// request path.
pub fn extract_tier1(
    doc_type: DocType,
    text: Option<&str>,
    item_metadata: Option<&Value>,
) -> Option<Value> {
    match doc_type {
        DocType::Email => text.and_then(extract_email_headers),
        DocType::Slack => extract_slack_hints(item_metadata),
        DocType::Meeting => text.and_then(extract_meeting_hints),
        _ => None,
    }
}

fn extract_email_headers(text: &str) -> Option<Value> {
    let head: String = text.chars().take(2000).collect();
    let mut fields = Map::new();
    for caps in HEADER_RE.captures_iter(&head) {
        let key = caps[1].to_ascii_lowercase();
        let value = caps[2].trim().to_string();
        fields.entry(key).or_insert(Value::String(value));
    }
    if fields.is_empty() {
        None
    } else {
        Some(Value::Object(fields))
    }
}

fn extract_slack_hints(metadata: Option<&Value>) -> Option<Value> {
    let meta = metadata?.as_object()?;
    let mut fields = Map::new();
    for key in ["channel", "threadId"] {
        if let Some(value) = meta.get(key) {
            fields.insert(key.to_string(), value.clone());
        }
    }
    if fields.is_empty() {
        None
    } else {
        Some(Value::Object(fields))
    }
}

fn extract_meeting_hints(text: &str) -> Option<Value> {
    let mut fields = Map::new();
    if let Some(caps) = MEETING_DATE_RE.captures(text) {
        fields.insert("meetingDate".into(), json!(caps[1].trim()));
    }
    if let Some(caps) = PLATFORM_RE.captures(text) {
        fields.insert("platform".into(), json!(caps[1].to_ascii_lowercase()));
    }
    if fields.is_empty() {
        None
    } else {
        Some(Value::Object(fields))
    }
}

/// Short language code for code items, taken from the file extension. This
/// is what lands in the filterable `lang` column (`"rs"`, `"ts"`, ...).
pub fn lang_from_source(source: &str) -> Option<String> {
    let name = source.rsplit(['/', '\\']).next()?;
    let (_, ext) = name.rsplit_once('.')?;
    if ext.is_empty() || ext.len() > 8 {
        None
    } else {
        Some(ext.to_ascii_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_email_headers() {
        let text = "From: alice@example.com\nTo: bob@example.com\nSubject: Q3 report\n\nHi Bob,";
        let meta = extract_tier1(DocType::Email, Some(text), None).unwrap();
        assert_eq!(meta["from"], "alice@example.com");
        assert_eq!(meta["subject"], "Q3 report");
    }

    #[test]
    fn extracts_slack_channel() {
        let item_meta = json!({"channel": "C042", "threadId": "171.2", "ignored": true});
        let meta = extract_tier1(DocType::Slack, None, Some(&item_meta)).unwrap();
        assert_eq!(meta["channel"], "C042");
        assert_eq!(meta["threadId"], "171.2");
        assert!(meta.get("ignored").is_none());
    }

    #[test]
    fn extracts_meeting_platform() {
        let text = "Meeting Date: 2024-05-02\nAttendees: a, b\nPlatform: Zoom\n";
        let meta = extract_tier1(DocType::Meeting, Some(text), None).unwrap();
        assert_eq!(meta["platform"], "zoom");
        assert_eq!(meta["meetingDate"], "2024-05-02");
    }

    #[test]
    fn lang_comes_from_extension() {
        assert_eq!(lang_from_source("src/main.rs").as_deref(), Some("rs"));
        assert_eq!(lang_from_source("a/b/query.test.ts").as_deref(), Some("ts"));
        assert_eq!(lang_from_source("Makefile"), None);
    }
}
