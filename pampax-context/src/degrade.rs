//! Progressive degradation of a result set against a token budget. Five
//! monotone levels run from `None` (unchanged) to `Emergency` (path-only
//! stubs); the engine picks the least destructive level whose typical
//! savings cover the deficit, then applies it.

use std::time::Instant;

use once_cell::sync::Lazy;
use pampax_core::model::SpanKind;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Degradation aggressiveness, in ascending order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradeLevel {
    None,
    DropLowPriority,
    HeadTailTruncate,
    Capsule,
    AggressiveCapsuleDrop,
    Emergency,
}

impl DegradeLevel {
    pub fn strategy_name(self) -> &'static str {
        match self {
            DegradeLevel::None => "none",
            DegradeLevel::DropLowPriority => "drop_low_priority",
            DegradeLevel::HeadTailTruncate => "head_tail_truncate",
            DegradeLevel::Capsule => "capsule",
            DegradeLevel::AggressiveCapsuleDrop => "aggressive_capsule_drop",
            DegradeLevel::Emergency => "emergency",
        }
    }
}

/// Per-model quality-gating thresholds for capsule creation: the minimum
/// `qualityScore` level `N` will accept before falling back to the
/// one-line minimal capsule. Decreasing from `level1` to `emergency`
/// mirrors how aggressively each level is allowed to compress.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DegradeThresholds {
    pub level1: f32,
    pub level2: f32,
    pub level3: f32,
    pub level4: f32,
    pub emergency: f32,
}

impl DegradeThresholds {
    pub fn validate(&self) -> Result<(), String> {
        let values = [self.level1, self.level2, self.level3, self.level4, self.emergency];
        for v in values {
            if !(0.0..=1.0).contains(&v) || v <= 0.0 {
                return Err(format!("degrade threshold {v} must be in (0, 1]"));
            }
        }
        if !(self.level1 > self.level2 && self.level2 > self.level3 && self.level3 > self.level4 && self.level4 > self.emergency) {
            return Err("degrade thresholds must satisfy level1 > level2 > level3 > level4 > emergency".to_string());
        }
        Ok(())
    }

    fn threshold_for(&self, level: DegradeLevel) -> f32 {
        match level {
            DegradeLevel::DropLowPriority => self.level1,
            DegradeLevel::HeadTailTruncate => self.level2,
            DegradeLevel::Capsule | DegradeLevel::AggressiveCapsuleDrop => self.level3,
            DegradeLevel::Emergency => self.emergency,
            DegradeLevel::None => 1.0,
        }
    }
}

/// GPT-4's smaller context window earns it a stricter (higher) quality bar
/// at every level than Claude-3's.
pub fn gpt4_thresholds() -> DegradeThresholds {
    DegradeThresholds { level1: 0.95, level2: 0.85, level3: 0.7, level4: 0.55, emergency: 0.3 }
}

pub fn claude3_thresholds() -> DegradeThresholds {
    DegradeThresholds { level1: 0.85, level2: 0.7, level3: 0.55, level4: 0.4, emergency: 0.2 }
}

/// Pick a model's threshold table by name, falling back to the stricter
/// GPT-4 table for anything unrecognized (including the llama/mistral
/// families, which have no dedicated table of their own).
pub fn thresholds_for_model(model: &str) -> DegradeThresholds {
    if model.to_lowercase().contains("claude") {
        claude3_thresholds()
    } else {
        gpt4_thresholds()
    }
}

/// Coarse content category a capsule is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapsuleCategory {
    Code,
    Test,
    Doc,
}

fn capsule_category_for(span_kind: SpanKind) -> CapsuleCategory {
    match span_kind {
        SpanKind::Test => CapsuleCategory::Test,
        SpanKind::Comment => CapsuleCategory::Doc,
        SpanKind::Function | SpanKind::Class | SpanKind::Config | SpanKind::Other => CapsuleCategory::Code,
    }
}

fn span_weight(span_kind: SpanKind) -> f32 {
    match span_kind {
        SpanKind::Function | SpanKind::Class => 1.0,
        SpanKind::Config => 0.8,
        SpanKind::Test => 0.6,
        SpanKind::Other => 0.5,
        SpanKind::Comment => 0.3,
    }
}

/// An item subject to degradation. `tokens` is the caller's own tokenizer
/// count for `content`, so this module never needs to know which model's
/// ratio produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct DegradeItem {
    pub id: String,
    pub path: String,
    pub content: String,
    pub span_kind: SpanKind,
    pub score: f32,
    pub tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapsuleMetadata {
    pub kind: CapsuleCategory,
    pub quality_score: f32,
    pub compression_ratio: f32,
    pub preserved_elements: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DegradedItem {
    pub id: String,
    pub path: String,
    pub content: String,
    pub tokens: u32,
    pub capsule: Option<CapsuleMetadata>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedDegradation {
    pub level: DegradeLevel,
    pub strategy: String,
    pub capsules_created: u32,
    pub items_processed: u32,
    pub quality_score: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Savings {
    pub original_tokens: u32,
    pub degraded_tokens: u32,
    pub savings_percentage: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DegradePerformance {
    pub degradation_time_ms: u64,
    pub total_time_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DegradeResult {
    pub degraded: Vec<DegradedItem>,
    pub applied: AppliedDegradation,
    pub savings: Savings,
    pub performance: DegradePerformance,
}

static HEADER_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#{1,6}\s").unwrap());
static CODE_SIGNATURE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(pub\s+)?(async\s+)?(fn|struct|enum|trait|impl|class|interface|function|def)\s").unwrap());
static IMPORT_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*(use|import|from|#include)\s").unwrap());
static CONSTRUCTOR_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*(pub\s+)?(fn\s+new|constructor|__init__)\b").unwrap());
static TEST_HEADER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*(describe|it|#\[test\]|fn\s+test_|def\s+test_)").unwrap());
static ASSERTION_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(assert|expect|prop_assert)").unwrap());

/// Engine applying the five degrade levels against a per-model quality
/// gate. Stateless beyond the thresholds; cheap to construct per call.
#[derive(Debug, Clone, Copy)]
pub struct DegradePolicyEngine {
    thresholds: DegradeThresholds,
}

impl DegradePolicyEngine {
    pub fn new(thresholds: DegradeThresholds) -> Self {
        Self { thresholds }
    }

    pub fn degrade(&self, items: &[DegradeItem], budget: u32) -> DegradeResult {
        let start = Instant::now();
        let original_tokens: u32 = items.iter().map(|i| i.tokens).sum();

        if original_tokens <= budget || items.is_empty() {
            let degradation_time_ms = start.elapsed().as_millis() as u64;
            return DegradeResult {
                degraded: items
                    .iter()
                    .map(|i| DegradedItem { id: i.id.clone(), path: i.path.clone(), content: i.content.clone(), tokens: i.tokens, capsule: None })
                    .collect(),
                applied: AppliedDegradation {
                    level: DegradeLevel::None,
                    strategy: DegradeLevel::None.strategy_name().to_string(),
                    capsules_created: 0,
                    items_processed: items.len() as u32,
                    quality_score: 1.0,
                },
                savings: Savings { original_tokens, degraded_tokens: original_tokens, savings_percentage: 0.0 },
                performance: DegradePerformance { degradation_time_ms, total_time_ms: degradation_time_ms },
            };
        }

        let required_reduction = 1.0 - (budget as f32 / original_tokens as f32);
        let level = select_level(required_reduction);

        let (degraded, capsules_created, quality_score) = match level {
            DegradeLevel::DropLowPriority => (self.drop_low_priority(items, budget), 0, 1.0),
            DegradeLevel::HeadTailTruncate => (self.head_tail_truncate(items, budget), 0, 0.8),
            DegradeLevel::Capsule => self.capsule_pass(items, false),
            DegradeLevel::AggressiveCapsuleDrop => self.capsule_pass(items, true),
            DegradeLevel::Emergency => self.emergency_stubs(items),
            DegradeLevel::None => unreachable!("handled above"),
        };

        let degraded_tokens: u32 = degraded.iter().map(|i| i.tokens).sum();
        let savings_percentage = if original_tokens == 0 {
            0.0
        } else {
            100.0 * (original_tokens.saturating_sub(degraded_tokens)) as f32 / original_tokens as f32
        };

        let degradation_time_ms = start.elapsed().as_millis() as u64;
        DegradeResult {
            applied: AppliedDegradation {
                level,
                strategy: level.strategy_name().to_string(),
                capsules_created,
                items_processed: items.len() as u32,
                quality_score,
            },
            savings: Savings { original_tokens, degraded_tokens, savings_percentage },
            performance: DegradePerformance { degradation_time_ms, total_time_ms: degradation_time_ms },
            degraded,
        }
    }

    fn drop_low_priority(&self, items: &[DegradeItem], budget: u32) -> Vec<DegradedItem> {
        let mut ranked: Vec<&DegradeItem> = items.iter().collect();
        ranked.sort_by(|a, b| {
            let wa = a.score * span_weight(a.span_kind);
            let wb = b.score * span_weight(b.span_kind);
            wb.partial_cmp(&wa).unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut used = 0u32;
        let mut kept = Vec::new();
        for item in ranked {
            if used.saturating_add(item.tokens) <= budget {
                used += item.tokens;
                kept.push(DegradedItem { id: item.id.clone(), path: item.path.clone(), content: item.content.clone(), tokens: item.tokens, capsule: None });
            }
        }
        kept
    }

    fn head_tail_truncate(&self, items: &[DegradeItem], budget: u32) -> Vec<DegradedItem> {
        const MARKER: &str = "\n... [content omitted] ...\n";
        let per_item_budget = if items.is_empty() { 0 } else { budget / items.len() as u32 };

        items
            .iter()
            .map(|item| {
                if item.tokens <= per_item_budget || per_item_budget == 0 {
                    return DegradedItem { id: item.id.clone(), path: item.path.clone(), content: item.content.clone(), tokens: item.tokens, capsule: None };
                }

                let chars_per_token = item.content.chars().count() as f32 / item.tokens.max(1) as f32;
                let target_chars = (per_item_budget as f32 * chars_per_token).floor() as usize;
                let marker_chars = MARKER.chars().count();
                let keep_chars = target_chars.saturating_sub(marker_chars).max(2);
                let head_chars = keep_chars / 2;
                let tail_chars = keep_chars - head_chars;

                let chars: Vec<char> = item.content.chars().collect();
                let head: String = chars.iter().take(head_chars).collect();
                let tail: String = chars.iter().rev().take(tail_chars).collect::<Vec<_>>().into_iter().rev().collect();
                let content = format!("{head}{MARKER}{tail}");
                let tokens = (content.chars().count() as f32 / chars_per_token.max(0.01)).ceil() as u32;

                DegradedItem { id: item.id.clone(), path: item.path.clone(), content, tokens, capsule: None }
            })
            .collect()
    }

    fn capsule_pass(&self, items: &[DegradeItem], aggressive: bool) -> (Vec<DegradedItem>, u32, f32) {
        let level = if aggressive { DegradeLevel::AggressiveCapsuleDrop } else { DegradeLevel::Capsule };
        let threshold = self.thresholds.threshold_for(level);

        let source: Vec<&DegradeItem> = if aggressive {
            let mut ranked: Vec<&DegradeItem> = items.iter().collect();
            ranked.sort_by(|a, b| {
                let wa = a.score * span_weight(a.span_kind);
                let wb = b.score * span_weight(b.span_kind);
                wb.partial_cmp(&wa).unwrap_or(std::cmp::Ordering::Equal)
            });
            ranked.into_iter().take((items.len() + 1) / 2).collect()
        } else {
            items.iter().collect()
        };

        let mut degraded = Vec::new();
        let mut capsules_created = 0u32;
        let mut quality_sum = 0.0f32;

        for item in source {
            let capsule = create_capsule(item, threshold);
            quality_sum += capsule.metadata.quality_score;
            capsules_created += 1;
            degraded.push(DegradedItem {
                id: item.id.clone(),
                path: item.path.clone(),
                content: capsule.content,
                tokens: capsule.tokens,
                capsule: Some(capsule.metadata),
            });
        }

        let quality_score = if capsules_created == 0 { 1.0 } else { quality_sum / capsules_created as f32 };
        (degraded, capsules_created, quality_score)
    }

    fn emergency_stubs(&self, items: &[DegradeItem]) -> (Vec<DegradedItem>, u32, f32) {
        let degraded = items
            .iter()
            .map(|item| {
                let content = format!("// {} — content compressed", item.path);
                let chars_per_token = item.content.chars().count().max(1) as f32 / item.tokens.max(1) as f32;
                let tokens = (content.chars().count() as f32 / chars_per_token.max(0.01)).ceil().max(1.0) as u32;
                DegradedItem { id: item.id.clone(), path: item.path.clone(), content, tokens, capsule: None }
            })
            .collect();
        (degraded, 0, self.thresholds.emergency)
    }
}

struct Capsule {
    content: String,
    tokens: u32,
    metadata: CapsuleMetadata,
}

/// Build a kind-specific capsule for `item`. Falls back to the minimal
/// one-line capsule when the resulting `qualityScore` is below
/// `quality_threshold`.
fn create_capsule(item: &DegradeItem, quality_threshold: f32) -> Capsule {
    let category = capsule_category_for(item.span_kind);
    let chars_per_token = item.content.chars().count().max(1) as f32 / item.tokens.max(1) as f32;

    let (content, preserved_elements) = match category {
        CapsuleCategory::Code => build_code_capsule(&item.content),
        CapsuleCategory::Test => build_test_capsule(&item.content),
        CapsuleCategory::Doc => build_doc_capsule(&item.content),
    };

    let original_chars = item.content.chars().count().max(1);
    let capsule_chars = content.chars().count();
    let compression_ratio = capsule_chars as f32 / original_chars as f32;
    let quality_score = capsule_quality_score(preserved_elements.len(), compression_ratio);

    let (final_content, final_preserved, final_quality) = if quality_score < quality_threshold {
        (format!("// {} — content compressed", item.path), Vec::new(), quality_threshold.min(0.2).max(0.01))
    } else {
        (content, preserved_elements, quality_score)
    };

    let tokens = (final_content.chars().count() as f32 / chars_per_token.max(0.01)).ceil().max(1.0) as u32;
    let compression_ratio = final_content.chars().count() as f32 / original_chars as f32;

    Capsule {
        tokens,
        content: final_content,
        metadata: CapsuleMetadata { kind: category, quality_score: final_quality, compression_ratio, preserved_elements: final_preserved },
    }
}

fn capsule_quality_score(preserved_count: usize, compression_ratio: f32) -> f32 {
    if preserved_count == 0 {
        return 0.0;
    }
    (0.3 + 0.15 * preserved_count as f32 + 0.2 * (1.0 - compression_ratio).max(0.0)).min(1.0)
}

fn build_code_capsule(content: &str) -> (String, Vec<String>) {
    let mut preserved = Vec::new();
    let mut lines = Vec::new();
    for line in content.lines() {
        if IMPORT_LINE.is_match(line) || CODE_SIGNATURE.is_match(line) || CONSTRUCTOR_LINE.is_match(line) {
            preserved.push(line.trim().to_string());
            lines.push(line.to_string());
        }
    }
    if lines.is_empty() {
        return (content.to_string(), preserved);
    }
    lines.push("    /* ... */".to_string());
    (lines.join("\n"), preserved)
}

fn build_test_capsule(content: &str) -> (String, Vec<String>) {
    let mut preserved = Vec::new();
    let mut lines = Vec::new();
    for line in content.lines() {
        if TEST_HEADER.is_match(line) || ASSERTION_LINE.is_match(line.trim_start()) {
            preserved.push(line.trim().to_string());
            lines.push(line.to_string());
        }
    }
    (lines.join("\n"), preserved)
}

fn build_doc_capsule(content: &str) -> (String, Vec<String>) {
    let mut preserved = Vec::new();
    let mut out = Vec::new();
    let mut in_fence = false;
    let mut fence_lines: Vec<&str> = Vec::new();
    let mut took_paragraph_for_header = false;

    for line in content.lines() {
        if line.trim_start().starts_with("```") {
            if in_fence {
                fence_lines.push(line);
                if fence_lines.len() <= 40 {
                    out.extend(fence_lines.iter().map(|l| l.to_string()));
                }
                fence_lines.clear();
                in_fence = false;
            } else {
                in_fence = true;
                fence_lines.push(line);
            }
            continue;
        }
        if in_fence {
            fence_lines.push(line);
            continue;
        }
        if HEADER_LINE.is_match(line) {
            preserved.push(line.trim().to_string());
            out.push(line.to_string());
            took_paragraph_for_header = false;
            continue;
        }
        if !took_paragraph_for_header && !line.trim().is_empty() {
            out.push(line.to_string());
            took_paragraph_for_header = true;
        }
    }
    (out.join("\n"), preserved)
}

/// Internal, model-independent estimate of how much each level typically
/// recovers; used only to pick the least destructive level that can plausibly
/// cover `required_reduction`. Unrelated to `DegradeThresholds`, which gates
/// capsule quality once a level is already chosen.
fn select_level(required_reduction: f32) -> DegradeLevel {
    if required_reduction <= 0.0 {
        DegradeLevel::None
    } else if required_reduction <= 0.15 {
        DegradeLevel::DropLowPriority
    } else if required_reduction <= 0.35 {
        DegradeLevel::HeadTailTruncate
    } else if required_reduction <= 0.55 {
        DegradeLevel::Capsule
    } else if required_reduction <= 0.75 {
        DegradeLevel::AggressiveCapsuleDrop
    } else {
        DegradeLevel::Emergency
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, tokens: u32, score: f32, span_kind: SpanKind) -> DegradeItem {
        DegradeItem {
            id: id.to_string(),
            path: format!("src/{id}.rs"),
            content: "fn example() {\n    do_work();\n}\n".repeat((tokens as usize / 8).max(1)),
            span_kind,
            score,
            tokens,
        }
    }

    #[test]
    fn thresholds_must_be_strictly_decreasing() {
        assert!(gpt4_thresholds().validate().is_ok());
        let bad = DegradeThresholds { level1: 0.5, level2: 0.6, level3: 0.4, level4: 0.3, emergency: 0.1 };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn items_within_budget_are_returned_unchanged() {
        let engine = DegradePolicyEngine::new(gpt4_thresholds());
        let items = vec![item("a", 50, 0.9, SpanKind::Function)];
        let result = engine.degrade(&items, 1000);
        assert_eq!(result.applied.level, DegradeLevel::None);
        assert_eq!(result.degraded[0].content, items[0].content);
    }

    #[test]
    fn small_deficit_drops_low_priority_items_only() {
        let engine = DegradePolicyEngine::new(gpt4_thresholds());
        let items = vec![item("keep", 80, 0.95, SpanKind::Function), item("drop", 30, 0.1, SpanKind::Comment)];
        let result = engine.degrade(&items, 95);
        assert_eq!(result.applied.level, DegradeLevel::DropLowPriority);
        assert!(result.degraded.iter().any(|d| d.id == "keep"));
    }

    #[test]
    fn moderate_deficit_truncates_head_and_tail() {
        let engine = DegradePolicyEngine::new(gpt4_thresholds());
        let items = vec![item("a", 300, 0.8, SpanKind::Function)];
        let result = engine.degrade(&items, 220);
        assert_eq!(result.applied.level, DegradeLevel::HeadTailTruncate);
        assert!(result.degraded[0].content.contains("[content omitted]"));
    }

    #[test]
    fn heavy_deficit_produces_capsules_with_metadata() {
        let engine = DegradePolicyEngine::new(gpt4_thresholds());
        let items = vec![item("a", 1000, 0.8, SpanKind::Function)];
        let result = engine.degrade(&items, 450);
        assert_eq!(result.applied.level, DegradeLevel::Capsule);
        assert!(result.degraded[0].capsule.is_some());
    }

    #[test]
    fn extreme_deficit_falls_back_to_emergency_stubs() {
        let engine = DegradePolicyEngine::new(gpt4_thresholds());
        let items = vec![item("a", 2000, 0.8, SpanKind::Function)];
        let result = engine.degrade(&items, 50);
        assert_eq!(result.applied.level, DegradeLevel::Emergency);
        assert!(result.degraded[0].content.contains("content compressed"));
    }

    #[test]
    fn savings_percentage_is_non_negative_and_reflects_reduction() {
        let engine = DegradePolicyEngine::new(gpt4_thresholds());
        let items = vec![item("a", 1000, 0.8, SpanKind::Function)];
        let result = engine.degrade(&items, 300);
        assert!(result.savings.savings_percentage >= 0.0);
        assert!(result.savings.degraded_tokens <= result.savings.original_tokens);
    }

    #[test]
    fn doc_capsule_preserves_headers_and_first_paragraph() {
        let content = "# Title\nIntro paragraph.\nMore detail that should not survive.\n\n## Section\nFirst line of section.\nSecond line dropped.\n";
        let (capsule, preserved) = build_doc_capsule(content);
        assert!(capsule.contains("# Title"));
        assert!(capsule.contains("## Section"));
        assert_eq!(preserved.len(), 2);
    }

    #[test]
    fn code_capsule_keeps_signatures_and_drops_bodies() {
        let content = "use std::fmt;\n\npub fn run() {\n    let x = compute();\n    x + 1\n}\n";
        let (capsule, preserved) = build_code_capsule(content);
        assert!(capsule.contains("/* ... */"));
        assert!(preserved.iter().any(|p| p.starts_with("use")));
    }
}
