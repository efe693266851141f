use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

/// Thin chat-completions client for the routing and filter-extraction
/// prompts. Callers own the timeout budget; a timed-out call surfaces as an
/// ordinary error so circuit breakers can count it.
pub struct LlmService {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl LlmService {
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url,
            api_key,
        }
    }

    pub async fn complete(
        &self,
        model: &str,
        system: &str,
        user: &str,
        timeout_ms: u64,
    ) -> Result<String> {
        let url = format!(
            "{}/v1/chat/completions",
            self.base_url.trim_end_matches('/')
        );
        let request = ChatRequest {
            model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: 0.0,
        };

        let mut builder = self.client.post(&url);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }

        let send = async {
            let response = builder
                .json(&request)
                .send()
                .await
                .context("Failed to connect to LLM server")?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                anyhow::bail!("LLM API error ({}): {}", status, body);
            }

            let body: ChatResponse = response
                .json()
                .await
                .context("Failed to parse chat completion response")?;
            let content = body
                .choices
                .into_iter()
                .next()
                .map(|c| c.message.content)
                .context("Empty choices in chat completion response")?;
            Ok(content)
        };

        match tokio::time::timeout(Duration::from_millis(timeout_ms), send).await {
            Ok(result) => result,
            Err(_) => {
                debug!("LLM call timed out after {}ms (model={})", timeout_ms, model);
                anyhow::bail!("LLM call timed out after {}ms", timeout_ms)
            }
        }
    }
}

/// Returns the first balanced top-level JSON object in `text`, tolerating
/// prose around it. String literals and escapes are respected so braces
/// inside values do not end the scan early.
pub fn extract_first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_object_from_surrounding_prose() {
        let text = "Sure! Here you go: {\"strategy\": \"graph\", \"confidence\": 0.9} hope that helps";
        assert_eq!(
            extract_first_json_object(text),
            Some("{\"strategy\": \"graph\", \"confidence\": 0.9}")
        );
    }

    #[test]
    fn handles_braces_inside_strings() {
        let text = r#"{"a": "b } c", "d": {"e": 1}}"#;
        assert_eq!(extract_first_json_object(text), Some(text));
    }

    #[test]
    fn returns_none_without_an_object() {
        assert_eq!(extract_first_json_object("no json here"), None);
        assert_eq!(extract_first_json_object("{unclosed"), None);
    }
}
