use super::circuit_breaker::CircuitBreaker;
use crate::config::RouterConfig;
use crate::services::llm_service::{extract_first_json_object, LlmService};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Semantic,
    Metadata,
    Graph,
    Hybrid,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Semantic => "semantic",
            Self::Metadata => "metadata",
            Self::Graph => "graph",
            Self::Hybrid => "hybrid",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "semantic" => Some(Self::Semantic),
            "metadata" => Some(Self::Metadata),
            "graph" => Some(Self::Graph),
            "hybrid" => Some(Self::Hybrid),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteMethod {
    Explicit,
    Rule,
    Llm,
    RuleFallback,
    Default,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoutingDecision {
    pub strategy: Strategy,
    pub confidence: f64,
    pub method: RouteMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<&'static str>,
}

#[derive(Debug, Clone, Copy)]
pub struct RouteInput<'a> {
    pub query: &'a str,
    pub explicit: Option<Strategy>,
    pub has_filter: bool,
    pub graph_expand: bool,
}

// who/what/which questions about a named thing lean on the graph.
static ENTITY_QUESTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(who|what|which) (is|are)\b").expect("static regex"));

// Multi-word PascalCase identifier, e.g. AuthService or HttpRequestParser.
static PASCAL_CASE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Z][a-z0-9]+(?:[A-Z][a-z0-9]+)+\b").expect("static regex"));

static FILTER_LIKE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(show|list|find) (all )?.*\b(in|from|of)\b").expect("static regex"));

static RELATIONAL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(related to|connected to|depends on|references)\b").expect("static regex")
});

#[derive(Debug, Deserialize)]
struct LlmRouteReply {
    strategy: String,
    confidence: f64,
}

/// Three-tier intent classifier: explicit strategy, then a rule engine,
/// then an LLM consulted only for low-confidence rule matches and guarded
/// by a circuit breaker.
pub struct QueryRouter {
    config: RouterConfig,
    llm: Option<Arc<LlmService>>,
    breaker: CircuitBreaker,
}

const ROUTER_SYSTEM_PROMPT: &str = "You classify search queries for a retrieval system. \
Reply with a single JSON object {\"strategy\": one of \"semantic\"|\"metadata\"|\"graph\"|\"hybrid\", \
\"confidence\": number between 0 and 1}. No other text.";

impl QueryRouter {
    pub fn new(config: RouterConfig, llm: Option<Arc<LlmService>>) -> Self {
        let breaker = CircuitBreaker::new(
            "router-llm",
            Duration::from_millis(config.circuit_break_ms),
        );
        Self {
            config,
            llm,
            breaker,
        }
    }

    pub async fn route(&self, input: RouteInput<'_>) -> RoutingDecision {
        // Tier 1: the caller already decided.
        if let Some(strategy) = input.explicit {
            return RoutingDecision {
                strategy,
                confidence: 1.0,
                method: RouteMethod::Explicit,
                rule: None,
            };
        }

        // Tier 2: rule engine, first match wins.
        let rule_match = self.apply_rules(&input);

        if let Some(decision) = &rule_match {
            if decision.confidence >= 0.8 {
                return decision.clone();
            }
            // Tier 3: low-confidence match, ask the LLM if it is available.
            if self.config.llm_enabled && self.breaker.allow() {
                if let Some(llm_decision) = self.consult_llm(input.query).await {
                    return llm_decision;
                }
                return RoutingDecision {
                    method: RouteMethod::RuleFallback,
                    ..decision.clone()
                };
            }
            return decision.clone();
        }

        RoutingDecision {
            strategy: Strategy::Semantic,
            confidence: 1.0,
            method: RouteMethod::Default,
            rule: None,
        }
    }

    fn apply_rules(&self, input: &RouteInput<'_>) -> Option<RoutingDecision> {
        let query = input.query.trim();
        let word_count = query.split_whitespace().count();

        let rule = |strategy, confidence, rule| RoutingDecision {
            strategy,
            confidence,
            method: RouteMethod::Rule,
            rule: Some(rule),
        };

        if input.has_filter && !query.is_empty() && word_count <= 3 && !input.graph_expand {
            return Some(rule(Strategy::Metadata, 1.0, "filter_short_query"));
        }
        if input.graph_expand && !input.has_filter {
            return Some(rule(Strategy::Graph, 1.0, "graph_expand"));
        }
        if input.graph_expand && input.has_filter {
            return Some(rule(Strategy::Hybrid, 1.0, "graph_expand_filter"));
        }
        if input.has_filter && query.is_empty() {
            return Some(rule(Strategy::Metadata, 1.0, "empty_query_filter"));
        }
        // A PascalCase mention inside relational phrasing ("related to
        // AuthService") is a relationship question, not an entity lookup.
        if ENTITY_QUESTION_RE.is_match(query)
            || (PASCAL_CASE_RE.is_match(query) && !RELATIONAL_RE.is_match(query))
        {
            return Some(rule(Strategy::Graph, 0.7, "entity_pattern"));
        }
        if FILTER_LIKE_RE.is_match(query) {
            return Some(rule(Strategy::Metadata, 0.6, "filter_like_pattern"));
        }
        if RELATIONAL_RE.is_match(query) {
            return Some(rule(Strategy::Hybrid, 0.6, "relational_pattern"));
        }

        None
    }

    async fn consult_llm(&self, query: &str) -> Option<RoutingDecision> {
        let llm = self.llm.as_ref()?;
        let result = llm
            .complete(
                &self.config.llm_model,
                ROUTER_SYSTEM_PROMPT,
                query,
                self.config.llm_timeout_ms,
            )
            .await;

        let reply = match result {
            Ok(text) => text,
            Err(e) => {
                debug!("Router LLM call failed: {}", e);
                self.breaker.record_failure();
                return None;
            }
        };

        let parsed: Option<LlmRouteReply> = extract_first_json_object(&reply)
            .and_then(|json| serde_json::from_str(json).ok());

        match parsed {
            Some(reply) if reply.confidence >= 0.5 => {
                if let Some(strategy) = Strategy::parse(&reply.strategy) {
                    self.breaker.record_success();
                    return Some(RoutingDecision {
                        strategy,
                        confidence: reply.confidence.clamp(0.0, 1.0),
                        method: RouteMethod::Llm,
                        rule: None,
                    });
                }
                self.breaker.record_failure();
                None
            }
            Some(_) => {
                // Well-formed but unsure; fall back to the rule match.
                self.breaker.record_success();
                None
            }
            None => {
                debug!("Router LLM returned unparseable reply");
                self.breaker.record_failure();
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> QueryRouter {
        QueryRouter::new(RouterConfig::default(), None)
    }

    fn input(query: &str) -> RouteInput<'_> {
        RouteInput {
            query,
            explicit: None,
            has_filter: false,
            graph_expand: false,
        }
    }

    #[tokio::test]
    async fn explicit_strategy_wins_with_full_confidence() {
        let decision = router()
            .route(RouteInput {
                explicit: Some(Strategy::Metadata),
                ..input("anything at all")
            })
            .await;
        assert_eq!(decision.strategy, Strategy::Metadata);
        assert_eq!(decision.method, RouteMethod::Explicit);
        assert_eq!(decision.confidence, 1.0);
    }

    #[tokio::test]
    async fn short_filtered_query_routes_to_metadata() {
        let decision = router()
            .route(RouteInput {
                has_filter: true,
                ..input("rust files")
            })
            .await;
        assert_eq!(decision.strategy, Strategy::Metadata);
        assert_eq!(decision.rule, Some("filter_short_query"));
        assert_eq!(decision.confidence, 1.0);
    }

    #[tokio::test]
    async fn graph_expand_routes_by_filter_presence() {
        let decision = router()
            .route(RouteInput {
                graph_expand: true,
                ..input("a query with several words here")
            })
            .await;
        assert_eq!(decision.strategy, Strategy::Graph);
        assert_eq!(decision.rule, Some("graph_expand"));

        let decision = router()
            .route(RouteInput {
                graph_expand: true,
                has_filter: true,
                ..input("a query with several words here")
            })
            .await;
        assert_eq!(decision.strategy, Strategy::Hybrid);
        assert_eq!(decision.rule, Some("graph_expand_filter"));
    }

    #[tokio::test]
    async fn empty_query_with_filter_is_metadata() {
        let decision = router()
            .route(RouteInput {
                has_filter: true,
                ..input("")
            })
            .await;
        assert_eq!(decision.strategy, Strategy::Metadata);
        assert_eq!(decision.rule, Some("empty_query_filter"));
    }

    #[tokio::test]
    async fn entity_patterns_route_to_graph() {
        let decision = router().route(input("who is the service owner")).await;
        assert_eq!(decision.strategy, Strategy::Graph);
        assert_eq!(decision.rule, Some("entity_pattern"));
        assert_eq!(decision.confidence, 0.7);

        let decision = router().route(input("how does AuthService handle retries")).await;
        assert_eq!(decision.rule, Some("entity_pattern"));
    }

    #[tokio::test]
    async fn relational_pattern_routes_to_hybrid() {
        let decision = router().route(input("related to AuthService")).await;
        assert_eq!(decision.strategy, Strategy::Hybrid);
        assert_eq!(decision.method, RouteMethod::Rule);
        assert_eq!(decision.rule, Some("relational_pattern"));
        assert_eq!(decision.confidence, 0.6);

        let decision = router().route(input("notes related to the billing outage")).await;
        assert_eq!(decision.rule, Some("relational_pattern"));
    }

    #[tokio::test]
    async fn filter_like_phrasing_routes_to_metadata() {
        let decision = router().route(input("list all documents from january")).await;
        assert_eq!(decision.strategy, Strategy::Metadata);
        assert_eq!(decision.rule, Some("filter_like_pattern"));
        assert_eq!(decision.confidence, 0.6);
    }

    #[tokio::test]
    async fn no_match_defaults_to_semantic() {
        let decision = router().route(input("how do retries back off over time")).await;
        assert_eq!(decision.strategy, Strategy::Semantic);
        assert_eq!(decision.method, RouteMethod::Default);
        assert_eq!(decision.confidence, 1.0);
    }
}
