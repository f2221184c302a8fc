//! Session-scoped recorder of structured stopping conditions: why the
//! pipeline stopped early or degraded, with enough structure for a caller
//! to decide whether to keep going.

use std::collections::HashMap;

use pampax_core::model::{Severity, StoppingCondition, StoppingConditionType};
use serde::{Deserialize, Serialize};

/// Default trigger thresholds; all configurable per session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoppingThresholds {
    pub budget_warning_ratio: f32,
    pub budget_exhausted_ratio: f32,
    pub cache_hit_threshold: f32,
}

impl Default for StoppingThresholds {
    fn default() -> Self {
        Self { budget_warning_ratio: 0.9, budget_exhausted_ratio: 1.0, cache_hit_threshold: 0.8 }
    }
}

/// Recorded conditions grouped by severity, as `end_session` reports them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupedConditions {
    pub high: Vec<StoppingCondition>,
    pub medium: Vec<StoppingCondition>,
    pub low: Vec<StoppingCondition>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionMetrics {
    pub total_conditions: u32,
    pub high_count: u32,
    pub medium_count: u32,
    pub low_count: u32,
    pub search_failure_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub summary: String,
    pub conditions: Vec<StoppingCondition>,
    pub grouped: GroupedConditions,
    pub recommendations: Vec<String>,
    pub metrics: SessionMetrics,
}

/// Accumulates `StoppingCondition`s for one pipeline run.
#[derive(Debug, Clone)]
pub struct StoppingReasonEngine {
    thresholds: StoppingThresholds,
    conditions: Vec<StoppingCondition>,
}

impl StoppingReasonEngine {
    pub fn new(thresholds: StoppingThresholds) -> Self {
        Self { thresholds, conditions: Vec::new() }
    }

    pub fn record(&mut self, condition: StoppingCondition) {
        self.conditions.push(condition);
    }

    pub fn conditions(&self) -> &[StoppingCondition] {
        &self.conditions
    }

    /// Evaluate budget usage and record `BUDGET_WARNING`/`BUDGET_EXHAUSTED`
    /// as appropriate. No-op if neither threshold is crossed.
    pub fn check_budget(&mut self, used: u32, budget: u32, source: impl Into<String>) {
        if budget == 0 {
            return;
        }
        let ratio = used as f32 / budget as f32;
        let source = source.into();
        if ratio >= self.thresholds.budget_exhausted_ratio {
            let mut condition = StoppingCondition::new(
                StoppingConditionType::BudgetExhausted,
                source,
                format!("used {used} of {budget} token budget ({:.0}%)", ratio * 100.0),
            );
            condition.values.insert("used".to_string(), serde_json::json!(used));
            condition.values.insert("budget".to_string(), serde_json::json!(budget));
            condition.actionable.push("increase budget or enable more aggressive degradation".to_string());
            self.record(condition);
        } else if ratio >= self.thresholds.budget_warning_ratio {
            let mut condition = StoppingCondition::new(
                StoppingConditionType::BudgetWarning,
                source,
                format!("used {used} of {budget} token budget ({:.0}%)", ratio * 100.0),
            );
            condition.values.insert("used".to_string(), serde_json::json!(used));
            condition.values.insert("budget".to_string(), serde_json::json!(budget));
            self.record(condition);
        }
    }

    pub fn check_result_limit(&mut self, actual: u32, cap: u32, source: impl Into<String>) {
        if actual > cap {
            let mut condition = StoppingCondition::new(
                StoppingConditionType::ResultLimit,
                source,
                format!("{actual} results exceeds cap of {cap}"),
            );
            condition.values.insert("actual".to_string(), serde_json::json!(actual));
            condition.values.insert("cap".to_string(), serde_json::json!(cap));
            self.record(condition);
        }
    }

    pub fn check_cache_hit_rate(&mut self, hit_rate: f32, source: impl Into<String>) {
        if hit_rate < self.thresholds.cache_hit_threshold {
            let mut condition = StoppingCondition::new(
                StoppingConditionType::LowCacheHitRate,
                source,
                format!("cache hit rate {hit_rate:.2} below threshold {:.2}", self.thresholds.cache_hit_threshold),
            );
            condition.values.insert("hit_rate".to_string(), serde_json::json!(hit_rate));
            self.record(condition);
        }
    }

    pub fn record_search_failure(&mut self, source: impl Into<String>, reason: impl Into<String>) {
        self.record(StoppingCondition::new(StoppingConditionType::SearchFailure, source, reason.into()));
    }

    pub fn record_graph_traversal_limit(&mut self, source: impl Into<String>, reason: impl Into<String>) {
        self.record(StoppingCondition::new(StoppingConditionType::GraphTraversalLimit, source, reason.into()));
    }

    pub fn record_degradation_triggered(&mut self, source: impl Into<String>, reason: impl Into<String>) {
        self.record(StoppingCondition::new(StoppingConditionType::DegradationTriggered, source, reason.into()));
    }

    /// True iff any high-severity condition was recorded, `BUDGET_EXHAUSTED`
    /// was recorded, or three or more `SEARCH_FAILURE`s were recorded.
    pub fn should_stop(&self) -> bool {
        let search_failures = self.conditions.iter().filter(|c| c.condition_type == StoppingConditionType::SearchFailure).count();
        self.conditions.iter().any(|c| c.severity == Severity::High)
            || self.conditions.iter().any(|c| c.condition_type == StoppingConditionType::BudgetExhausted)
            || search_failures >= 3
    }

    pub fn end_session(&self) -> SessionSummary {
        let mut grouped = GroupedConditions::default();
        for condition in &self.conditions {
            match condition.severity {
                Severity::High => grouped.high.push(condition.clone()),
                Severity::Medium => grouped.medium.push(condition.clone()),
                Severity::Low => grouped.low.push(condition.clone()),
            }
        }

        let search_failure_count =
            self.conditions.iter().filter(|c| c.condition_type == StoppingConditionType::SearchFailure).count() as u32;

        let metrics = SessionMetrics {
            total_conditions: self.conditions.len() as u32,
            high_count: grouped.high.len() as u32,
            medium_count: grouped.medium.len() as u32,
            low_count: grouped.low.len() as u32,
            search_failure_count,
        };

        let recommendations = build_recommendations(&self.conditions);
        let summary = if self.conditions.is_empty() {
            "session completed with no stopping conditions".to_string()
        } else {
            format!(
                "session recorded {} condition(s): {} high, {} medium, {} low",
                metrics.total_conditions, metrics.high_count, metrics.medium_count, metrics.low_count
            )
        };

        SessionSummary { summary, conditions: self.conditions.clone(), grouped, recommendations, metrics }
    }
}

fn build_recommendations(conditions: &[StoppingCondition]) -> Vec<String> {
    let mut seen = HashMap::new();
    let mut recommendations = Vec::new();
    for condition in conditions {
        for action in &condition.actionable {
            if seen.insert(action.clone(), ()).is_none() {
                recommendations.push(action.clone());
            }
        }
    }
    if conditions.iter().any(|c| c.condition_type == StoppingConditionType::LowCacheHitRate) {
        recommendations.push("warm the cache or widen TTLs for this workload".to_string());
    }
    recommendations
}

/// Render `conditions` as a flat CSV with one row per condition.
pub fn export_csv(summary: &SessionSummary) -> String {
    let mut out = String::from("type,severity,source,explanation,timestamp\n");
    for condition in &summary.conditions {
        out.push_str(&format!(
            "{:?},{:?},{},{},{}\n",
            condition.condition_type,
            condition.severity,
            csv_escape(&condition.source),
            csv_escape(&condition.explanation),
            condition.timestamp.to_rfc3339(),
        ));
    }
    out
}

fn csv_escape(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

pub fn export_json(summary: &SessionSummary) -> Result<String, serde_json::Error> {
    serde_json::to_string(summary)
}
