use super::circuit_breaker::CircuitBreaker;
use crate::config::RouterConfig;
use crate::filter::{translate_filter, FilterDsl};
use crate::services::llm_service::{extract_first_json_object, LlmService};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const FILTER_SYSTEM_PROMPT: &str = "You extract structured filters from search queries. \
Reply with a single JSON object of the form \
{\"conditions\": [...], \"combine\": \"and\"|\"or\"} and nothing else. \
Each condition is one of: \
{\"field\", \"op\": \"eq\"|\"ne\"|\"gt\"|\"gte\"|\"lt\"|\"lte\"|\"isNull\"|\"isNotNull\", \"value\"}, \
{\"field\", \"op\": \"in\"|\"notIn\", \"values\": [...]}, \
{\"field\", \"op\": \"between\"|\"notBetween\", \"range\": {\"low\", \"high\"}}. \
Allowed fields: docType, repoId, lang, path, mimeType, ingestedAt, createdAt, updatedAt. \
Comparison and range operators are only valid on ingestedAt, createdAt, updatedAt. \
If the query implies no filter, reply {\"conditions\": []}.";

/// Free-text to FilterDSL extraction. Independent of the router: its own
/// breaker, its own timeout, and it never fails the request; every error
/// path degrades to `None`.
pub struct FilterParser {
    config: RouterConfig,
    llm: Option<Arc<LlmService>>,
    breaker: CircuitBreaker,
}

impl FilterParser {
    pub fn new(config: RouterConfig, llm: Option<Arc<LlmService>>) -> Self {
        let breaker = CircuitBreaker::new(
            "filter-llm",
            Duration::from_millis(config.circuit_break_ms),
        );
        Self {
            config,
            llm,
            breaker,
        }
    }

    pub async fn parse(&self, query: &str) -> Option<FilterDsl> {
        if !self.config.filter_llm_enabled || query.trim().is_empty() {
            return None;
        }
        if !self.breaker.allow() {
            debug!("Filter parser breaker open, skipping extraction");
            return None;
        }
        let llm = self.llm.as_ref()?;

        let reply = match llm
            .complete(
                &self.config.filter_llm_model,
                FILTER_SYSTEM_PROMPT,
                query,
                self.config.filter_llm_timeout_ms,
            )
            .await
        {
            Ok(text) => text,
            Err(e) => {
                debug!("Filter LLM call failed: {}", e);
                self.breaker.record_failure();
                return None;
            }
        };

        let dsl: FilterDsl = match extract_first_json_object(&reply)
            .and_then(|json| serde_json::from_str(json).ok())
        {
            Some(dsl) => dsl,
            None => {
                debug!("Filter LLM reply had no parseable filter object");
                self.breaker.record_failure();
                return None;
            }
        };

        // Validation runs the candidate through the translator, which
        // rejects unknown fields and operators.
        match translate_filter(dsl.clone(), 0) {
            Ok(fragment) => {
                self.breaker.record_success();
                if fragment.sql.is_empty() {
                    // The model decided no filter applies.
                    return None;
                }
                Some(dsl)
            }
            Err(e) => {
                debug!("Inferred filter failed validation: {}", e);
                self.breaker.record_failure();
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterCondition;
    use httpmock::prelude::*;
    use serde_json::json;

    fn parser_for(server: &MockServer, enabled: bool) -> FilterParser {
        let config = RouterConfig {
            filter_llm_enabled: enabled,
            llm_base_url: server.base_url(),
            ..RouterConfig::default()
        };
        let llm = Arc::new(LlmService::new(server.base_url(), None));
        FilterParser::new(config, Some(llm))
    }

    fn chat_reply(server: &MockServer, content: &str) {
        let body = json!({
            "choices": [{"message": {"role": "assistant", "content": content}}]
        });
        server.mock(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(200).json_body(body);
        });
    }

    #[tokio::test]
    async fn disabled_flag_short_circuits() {
        let server = MockServer::start();
        let parser = parser_for(&server, false);
        assert!(parser.parse("typescript files").await.is_none());
    }

    #[tokio::test]
    async fn empty_query_short_circuits() {
        let server = MockServer::start();
        let parser = parser_for(&server, true);
        assert!(parser.parse("   ").await.is_none());
    }

    #[tokio::test]
    async fn valid_reply_is_parsed_and_validated() {
        let server = MockServer::start();
        chat_reply(
            &server,
            r#"{"conditions":[{"field":"lang","op":"eq","value":"ts"},
                {"field":"ingestedAt","op":"between",
                 "range":{"low":"2023-01-01","high":"2023-12-31"}}],"combine":"and"}"#,
        );

        let parser = parser_for(&server, true);
        let dsl = parser.parse("all typescript files from 2023").await.unwrap();
        let spec = dsl.into_spec();
        assert_eq!(spec.conditions.len(), 2);
        assert!(matches!(&spec.conditions[0], FilterCondition::Scalar { field, .. } if field == "lang"));
    }

    #[tokio::test]
    async fn invalid_field_degrades_to_none() {
        let server = MockServer::start();
        chat_reply(
            &server,
            r#"{"conditions":[{"field":"owner","op":"eq","value":"bob"}]}"#,
        );

        let parser = parser_for(&server, true);
        assert!(parser.parse("files owned by bob").await.is_none());
    }

    #[tokio::test]
    async fn unparseable_reply_degrades_to_none() {
        let server = MockServer::start();
        chat_reply(&server, "I could not find any filters, sorry!");

        let parser = parser_for(&server, true);
        assert!(parser.parse("whatever").await.is_none());
    }

    #[tokio::test]
    async fn empty_conditions_mean_no_filter() {
        let server = MockServer::start();
        chat_reply(&server, r#"{"conditions": []}"#);

        let parser = parser_for(&server, true);
        assert!(parser.parse("how does chunking work").await.is_none());
    }
}
