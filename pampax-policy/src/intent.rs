//! Deterministic, rule-based intent classifier. Given the same query and
//! hints it always returns the same `IntentResult`; it never throws, and on
//! total uncertainty it falls back to `IntentResult::uncertain()`.

use once_cell::sync::Lazy;
use pampax_core::model::{EntityKind, ExtractedEntity, Intent, IntentResult};
use regex::Regex;

static FUNCTION_CALL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[a-z_][a-zA-Z0-9_]*\(\)").unwrap());
static CLASS_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[A-Z][a-zA-Z0-9]*[a-zA-Z]\b").unwrap());
static FILE_PATH: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[\w./-]+\.[a-zA-Z0-9]{1,6}\b").unwrap());
static ROUTE_PATH: Lazy<Regex> = Lazy::new(|| Regex::new(r"/[a-zA-Z0-9_\-{}:]+(?:/[a-zA-Z0-9_\-{}:]+)+").unwrap());
static ERROR_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\w*(?:Error|Exception)\b").unwrap());

const INCIDENT_KEYWORDS: &[&str] = &[
    "error", "exception", "crash", "crashed", "outage", "incident", "failing", "failed",
    "broken", "bug", "stack trace", "traceback", "panic", "500", "timeout",
];
const CONFIG_KEYWORDS: &[&str] = &[
    "config", "configuration", "settings", ".toml", ".yaml", ".yml", ".env", "environment variable",
    "env var",
];
const API_KEYWORDS: &[&str] = &[
    "endpoint", "route", "handler", "api", "controller", "rest", "graphql", "request", "response",
];

/// Optional caller-provided hints; currently unused by the rules below but
/// kept so callers have a stable extension point without a signature break.
#[derive(Debug, Clone, Default)]
pub struct ClassifyHints {
    pub repo: Option<String>,
    pub language: Option<String>,
}

fn keyword_score(query_lower: &str, keywords: &[&str]) -> (bool, f32) {
    let hits = keywords.iter().filter(|kw| query_lower.contains(*kw)).count();
    if hits == 0 {
        (false, 0.0)
    } else {
        (true, (0.6 + 0.1 * (hits.saturating_sub(1) as f32)).min(0.95))
    }
}

fn looks_like_bare_symbol(query: &str) -> bool {
    let trimmed = query.trim();
    if trimmed.is_empty() || trimmed.split_whitespace().count() > 3 {
        return false;
    }
    FUNCTION_CALL.is_match(trimmed) || CLASS_NAME.is_match(trimmed) || trimmed.contains("::") || trimmed.contains('.')
}

fn extract_entities(query: &str) -> Vec<ExtractedEntity> {
    let mut entities = Vec::new();

    for m in ERROR_NAME.find_iter(query) {
        entities.push(ExtractedEntity { text: m.as_str().to_string(), kind: EntityKind::Error });
    }
    for m in ROUTE_PATH.find_iter(query) {
        entities.push(ExtractedEntity { text: m.as_str().to_string(), kind: EntityKind::Route });
    }
    for m in FUNCTION_CALL.find_iter(query) {
        entities.push(ExtractedEntity { text: m.as_str().to_string(), kind: EntityKind::Function });
    }
    for m in FILE_PATH.find_iter(query) {
        entities.push(ExtractedEntity { text: m.as_str().to_string(), kind: EntityKind::File });
    }
    for m in CLASS_NAME.find_iter(query) {
        let text = m.as_str().to_string();
        if entities.iter().any(|e| e.text == text) {
            continue;
        }
        entities.push(ExtractedEntity { text, kind: EntityKind::Class });
    }

    entities
}

/// Stateless, deterministic intent classifier. Cheap to construct; holds no
/// mutable state.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntentClassifier;

impl IntentClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify `query`. Always returns a result; ambiguous or empty input
    /// falls back to `IntentResult::uncertain()`.
    pub fn classify(&self, query: &str, _hints: Option<&ClassifyHints>) -> IntentResult {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return IntentResult::uncertain();
        }

        let query_lower = trimmed.to_lowercase();
        let entities = extract_entities(trimmed);

        let (is_incident, incident_conf) = keyword_score(&query_lower, INCIDENT_KEYWORDS);
        if is_incident {
            return IntentResult {
                intent: Intent::Incident,
                confidence: incident_conf,
                entities,
                suggested_policies: vec!["incident".to_string()],
            };
        }

        let (is_config, config_conf) = keyword_score(&query_lower, CONFIG_KEYWORDS);
        if is_config {
            return IntentResult {
                intent: Intent::Config,
                confidence: config_conf,
                entities,
                suggested_policies: vec!["config".to_string()],
            };
        }

        let (is_api, api_conf) = keyword_score(&query_lower, API_KEYWORDS);
        if is_api {
            return IntentResult {
                intent: Intent::Api,
                confidence: api_conf,
                entities,
                suggested_policies: vec!["api".to_string()],
            };
        }

        if looks_like_bare_symbol(trimmed) {
            return IntentResult {
                intent: Intent::Symbol,
                confidence: 0.85,
                entities,
                suggested_policies: vec!["symbol".to_string()],
            };
        }

        IntentResult {
            intent: Intent::Search,
            confidence: 0.5,
            entities,
            suggested_policies: vec!["search".to_string()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_query_is_uncertain() {
        let result = IntentClassifier::new().classify("", None);
        assert_eq!(result.intent, Intent::Search);
        assert!((result.confidence - 0.5).abs() < f32::EPSILON);
        assert!(result.entities.is_empty());
    }

    #[test]
    fn incident_keywords_win() {
        let result = IntentClassifier::new().classify("why did the payment service crash with a NullPointerException", None);
        assert_eq!(result.intent, Intent::Incident);
        assert!(result.entities.iter().any(|e| e.kind == EntityKind::Error));
    }

    #[test]
    fn config_keywords_classify_as_config() {
        let result = IntentClassifier::new().classify("where is the database timeout set in config.toml", None);
        assert_eq!(result.intent, Intent::Config);
    }

    #[test]
    fn api_keywords_classify_as_api() {
        let result = IntentClassifier::new().classify("which handler serves the /api/v1/users route", None);
        assert_eq!(result.intent, Intent::Api);
        assert!(result.entities.iter().any(|e| e.kind == EntityKind::Route));
    }

    #[test]
    fn bare_identifier_classifies_as_symbol() {
        let result = IntentClassifier::new().classify("UserService::authenticate", None);
        assert_eq!(result.intent, Intent::Symbol);
    }

    #[test]
    fn classification_is_deterministic() {
        let classifier = IntentClassifier::new();
        let a = classifier.classify("how does retry_request() work", None);
        let b = classifier.classify("how does retry_request() work", None);
        assert_eq!(a.intent, b.intent);
        assert_eq!(a.confidence, b.confidence);
    }

    #[test]
    fn vague_query_falls_back_to_search() {
        let result = IntentClassifier::new().classify("what does this project do", None);
        assert_eq!(result.intent, Intent::Search);
    }
}
