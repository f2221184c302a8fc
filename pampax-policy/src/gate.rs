//! Deterministic, purely functional policy gate: `(IntentResult,
//! SearchContext) -> PolicyDecision`. Base policies are looked up per
//! intent, then five ordered adjustments are applied: repo override,
//! confidence, query length, budget, language.

use std::collections::HashMap;

use pampax_core::model::{Intent, IntentResult, PolicyDecision};
use regex::Regex;

/// The subset of `SearchContext` the gate reads from the caller.
#[derive(Debug, Clone, Default)]
pub struct SearchContext {
    pub repo: Option<String>,
    pub language: Option<String>,
    pub query_length: Option<usize>,
    pub budget: Option<u32>,
}

/// A per-repo policy override, applied before the confidence/length/budget/
/// language adjustments. Fields left `None` are untouched.
#[derive(Debug, Clone, Default)]
pub struct PolicyOverride {
    pub max_depth: Option<u8>,
    pub early_stop_threshold: Option<u8>,
    pub include_symbols: Option<bool>,
    pub include_files: Option<bool>,
    pub include_content: Option<bool>,
}

fn base_policy(intent: Intent) -> PolicyDecision {
    let (max_depth, early_stop_threshold, include_symbols, include_files, include_content) = match intent {
        Intent::Symbol => (2, 3, true, false, true),
        Intent::Config => (1, 2, false, true, true),
        Intent::Api => (2, 2, true, false, true),
        Intent::Incident => (3, 5, true, true, true),
        Intent::Search => (2, 10, true, true, true),
    };
    PolicyDecision {
        max_depth,
        include_symbols,
        include_files,
        include_content,
        early_stop_threshold,
        seed_weights: HashMap::new(),
    }
}

/// Turn a glob pattern (`*` wildcard, any number of occurrences) into a
/// compiled regex anchored at both ends.
fn compile_glob(pattern: &str) -> Regex {
    let mut regex_src = String::from("^");
    for part in pattern.split('*') {
        if !regex_src.ends_with('^') {
            regex_src.push_str(".*");
        }
        regex_src.push_str(&regex::escape(part));
    }
    regex_src.push('$');
    Regex::new(&regex_src).expect("glob-derived regex is always well-formed")
}

/// Length of the literal (non-wildcard) prefix before the first `*`, used
/// to break ties between multiple matching glob patterns.
fn literal_prefix_len(pattern: &str) -> usize {
    pattern.find('*').unwrap_or(pattern.len())
}

fn find_override<'a>(overrides: &'a HashMap<String, PolicyOverride>, repo: &str) -> Option<&'a PolicyOverride> {
    if let Some(exact) = overrides.get(repo) {
        return Some(exact);
    }

    let mut best: Option<(&str, &PolicyOverride, usize)> = None;
    for (pattern, ov) in overrides {
        if !pattern.contains('*') {
            continue;
        }
        if compile_glob(pattern).is_match(repo) {
            let prefix_len = literal_prefix_len(pattern);
            if best.as_ref().map_or(true, |(_, _, best_len)| prefix_len > *best_len) {
                best = Some((pattern, ov, prefix_len));
            }
        }
    }
    best.map(|(_, ov, _)| ov)
}

fn apply_override(policy: &mut PolicyDecision, ov: &PolicyOverride) {
    if let Some(v) = ov.max_depth {
        policy.max_depth = v;
    }
    if let Some(v) = ov.early_stop_threshold {
        policy.early_stop_threshold = v;
    }
    if let Some(v) = ov.include_symbols {
        policy.include_symbols = v;
    }
    if let Some(v) = ov.include_files {
        policy.include_files = v;
    }
    if let Some(v) = ov.include_content {
        policy.include_content = v;
    }
}

fn clamp_depth(depth: i16) -> u8 {
    depth.clamp(1, 10) as u8
}

fn clamp_early_stop(value: i16) -> u8 {
    value.clamp(1, 50) as u8
}

const LANGUAGE_BOOST_WEIGHT: f32 = 1.5;

static PYTHON_KEYS: [&str; 2] = ["definition", "implementation"];
static TYPESCRIPT_KEYS: [&str; 2] = ["handler", "middleware"];
static JAVA_KEYS: [&str; 1] = ["class"];
static GO_KEYS: [&str; 1] = ["package"];

fn language_boost_keys(language: &str) -> &'static [&'static str] {
    match language.to_lowercase().as_str() {
        "python" | "py" => &PYTHON_KEYS,
        "typescript" | "ts" => &TYPESCRIPT_KEYS,
        "java" => &JAVA_KEYS,
        "go" | "golang" => &GO_KEYS,
        _ => &[],
    }
}

/// Deterministic policy gate. Holds only the caller-supplied repo override
/// table; `decide` is a pure function of its inputs plus that table.
#[derive(Debug, Clone, Default)]
pub struct PolicyGate {
    overrides: HashMap<String, PolicyOverride>,
}

impl PolicyGate {
    pub fn new(overrides: HashMap<String, PolicyOverride>) -> Self {
        Self { overrides }
    }

    pub fn decide(&self, intent_result: &IntentResult, context: &SearchContext) -> PolicyDecision {
        let mut policy = base_policy(intent_result.intent);

        // 1. Repo override.
        if let Some(repo) = &context.repo {
            if let Some(ov) = find_override(&self.overrides, repo) {
                apply_override(&mut policy, ov);
            }
        }

        // 2. Confidence.
        let mut depth = policy.max_depth as i16;
        let mut early_stop = policy.early_stop_threshold as i16;
        if intent_result.confidence < 0.4 {
            depth -= 1;
            early_stop -= 1;
        } else if intent_result.confidence > 0.8 {
            depth += 1;
            early_stop += 2;
        }
        depth = depth.max(1);
        early_stop = early_stop.max(1);

        // 3. Query length.
        if let Some(len) = context.query_length {
            if len < 10 {
                depth += 1;
            } else if len > 50 {
                depth = (depth - 1).max(1);
                early_stop = (early_stop - 1).max(1);
            }
        }

        // 4. Budget.
        if let Some(budget) = context.budget {
            if budget < 2000 {
                policy.include_content = false;
                early_stop = (early_stop - 1).max(1);
            }
        }

        policy.max_depth = clamp_depth(depth);
        policy.early_stop_threshold = clamp_early_stop(early_stop);

        // 5. Language.
        if let Some(language) = &context.language {
            for key in language_boost_keys(language) {
                policy.seed_weights.insert((*key).to_string(), LANGUAGE_BOOST_WEIGHT);
            }
        }

        policy
    }
}

/// `validate(policy) -> errors[]`: empty iff the policy is well-formed.
pub fn validate(policy: &PolicyDecision) -> Vec<String> {
    let mut errors = Vec::new();
    if !(1..=10).contains(&policy.max_depth) {
        errors.push(format!("max_depth {} out of range [1, 10]", policy.max_depth));
    }
    if !(1..=50).contains(&policy.early_stop_threshold) {
        errors.push(format!("early_stop_threshold {} out of range [1, 50]", policy.early_stop_threshold));
    }
    for (key, weight) in &policy.seed_weights {
        if *weight < 0.0 || *weight > 5.0 {
            errors.push(format!("seed_weights[{key}] = {weight} out of range [0, 5]"));
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use pampax_core::model::{EntityKind, ExtractedEntity};

    fn intent_result(intent: Intent, confidence: f32) -> IntentResult {
        IntentResult {
            intent,
            confidence,
            entities: Vec::new(),
            suggested_policies: Vec::new(),
        }
    }

    #[test]
    fn base_policies_match_documented_table() {
        let gate = PolicyGate::default();
        let policy = gate.decide(&intent_result(Intent::Incident, 0.6), &SearchContext::default());
        assert_eq!(policy.max_depth, 3);
        assert_eq!(policy.early_stop_threshold, 5);
        assert!(policy.include_symbols && policy.include_files && policy.include_content);
    }

    #[test]
    fn low_confidence_reduces_depth_and_early_stop() {
        let gate = PolicyGate::default();
        let policy = gate.decide(&intent_result(Intent::Api, 0.2), &SearchContext::default());
        assert_eq!(policy.max_depth, 1);
        assert_eq!(policy.early_stop_threshold, 1);
    }

    #[test]
    fn high_confidence_increases_depth_and_early_stop() {
        let gate = PolicyGate::default();
        let policy = gate.decide(&intent_result(Intent::Api, 0.9), &SearchContext::default());
        assert_eq!(policy.max_depth, 3);
        assert_eq!(policy.early_stop_threshold, 4);
    }

    #[test]
    fn short_query_boosts_depth() {
        let gate = PolicyGate::default();
        let context = SearchContext { query_length: Some(5), ..Default::default() };
        let policy = gate.decide(&intent_result(Intent::Symbol, 0.6), &context);
        assert_eq!(policy.max_depth, 3);
    }

    #[test]
    fn small_budget_disables_content_and_lowers_early_stop() {
        let gate = PolicyGate::default();
        let context = SearchContext { budget: Some(1000), ..Default::default() };
        let policy = gate.decide(&intent_result(Intent::Search, 0.6), &context);
        assert!(!policy.include_content);
        assert_eq!(policy.early_stop_threshold, 9);
    }

    #[test]
    fn language_boost_sets_seed_weights() {
        let gate = PolicyGate::default();
        let context = SearchContext { language: Some("python".to_string()), ..Default::default() };
        let policy = gate.decide(&intent_result(Intent::Search, 0.6), &context);
        assert_eq!(policy.seed_weights.get("definition"), Some(&1.5));
        assert_eq!(policy.seed_weights.get("implementation"), Some(&1.5));
    }

    #[test]
    fn repo_glob_override_lifts_depth_before_other_adjustments() {
        let mut overrides = HashMap::new();
        overrides.insert(
            "*-frontend".to_string(),
            PolicyOverride { max_depth: Some(3), ..Default::default() },
        );
        let gate = PolicyGate::new(overrides);
        let context = SearchContext { repo: Some("my-frontend".to_string()), ..Default::default() };
        let policy = gate.decide(&intent_result(Intent::Api, 0.6), &context);
        assert_eq!(policy.max_depth, 3);
    }

    #[test]
    fn exact_repo_match_wins_over_glob() {
        let mut overrides = HashMap::new();
        overrides.insert("*-frontend".to_string(), PolicyOverride { max_depth: Some(3), ..Default::default() });
        overrides.insert("my-frontend".to_string(), PolicyOverride { max_depth: Some(7), ..Default::default() });
        let gate = PolicyGate::new(overrides);
        let context = SearchContext { repo: Some("my-frontend".to_string()), ..Default::default() };
        let policy = gate.decide(&intent_result(Intent::Api, 0.6), &context);
        assert_eq!(policy.max_depth, 7);
    }

    #[test]
    fn unknown_intent_confidence_exactly_half_with_empty_context_is_clamped_default() {
        let gate = PolicyGate::default();
        let policy = gate.decide(&intent_result(Intent::Search, 0.5), &SearchContext::default());
        assert_eq!(policy.max_depth, 2);
        assert_eq!(policy.early_stop_threshold, 10);
    }

    #[test]
    fn validate_passes_for_well_formed_policy() {
        let policy = base_policy(Intent::Search);
        assert!(validate(&policy).is_empty());
    }

    #[test]
    fn validate_flags_out_of_range_depth() {
        let mut policy = base_policy(Intent::Search);
        policy.max_depth = 0;
        assert!(!validate(&policy).is_empty());
    }

    #[test]
    fn validate_flags_out_of_range_seed_weight() {
        let mut policy = base_policy(Intent::Search);
        policy.seed_weights.insert("x".to_string(), 10.0);
        assert!(!validate(&policy).is_empty());
    }

    #[test]
    fn extracted_entity_kind_is_not_used_by_gate_but_constructible() {
        let _ = ExtractedEntity { text: "Foo".to_string(), kind: EntityKind::Class };
    }
}
