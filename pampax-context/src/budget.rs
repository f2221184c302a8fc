//! Token-budget tracking. `TokenBudgetTracker` holds a running `used`
//! counter against a fixed `budget`; `fit_to_budget` is the standalone
//! best-fit packer the degrade engine and context assembler both call to
//! select the richest subset of scored items that still fits.

use serde::{Deserialize, Serialize};

/// One accounted item in a `TokenBudgetTracker`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetItem {
    pub summary: String,
    pub tokens: u32,
}

/// Snapshot produced by `TokenBudgetTracker::report`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetReport {
    pub budget: u32,
    pub used: u32,
    pub remaining: u32,
    /// `used / budget`, in `[0, +inf)` — can exceed 1.0 once exhausted.
    pub percentage: f32,
    pub items: Vec<BudgetItem>,
}

/// Running token-budget ledger for one assembly pass.
#[derive(Debug, Clone, Default)]
pub struct TokenBudgetTracker {
    budget: u32,
    used: u32,
    items: Vec<BudgetItem>,
}

impl TokenBudgetTracker {
    pub fn new(budget: u32) -> Self {
        Self { budget, used: 0, items: Vec::new() }
    }

    /// Record an item and return the remaining budget.
    pub fn add_item(&mut self, summary: impl Into<String>, tokens: u32) -> u32 {
        self.used += tokens;
        self.items.push(BudgetItem { summary: summary.into(), tokens });
        self.remaining()
    }

    pub fn can_fit(&self, tokens: u32) -> bool {
        self.used.saturating_add(tokens) <= self.budget
    }

    pub fn remaining(&self) -> u32 {
        self.budget.saturating_sub(self.used)
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    pub fn budget(&self) -> u32 {
        self.budget
    }

    pub fn report(&self) -> BudgetReport {
        let percentage = if self.budget == 0 { 0.0 } else { self.used as f32 / self.budget as f32 };
        BudgetReport {
            budget: self.budget,
            used: self.used,
            remaining: self.remaining(),
            percentage,
            items: self.items.clone(),
        }
    }
}

/// A scored candidate passed to `fit_to_budget`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub id: String,
    pub summary: String,
    pub tokens: u32,
    pub score: f32,
}

/// One entry of `fit_to_budget`'s result: either the candidate unchanged,
/// or a truncation stub standing in for a candidate too large for the
/// budget outright.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResultItem {
    pub id: String,
    pub summary: String,
    pub tokens: u32,
    #[serde(rename = "_truncated")]
    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitToBudgetResult {
    pub results: Vec<FitResultItem>,
    pub token_report: BudgetReport,
}

/// Select the highest-scoring subset of `items` whose summed tokens fit
/// `budget`. Candidates whose own token count exceeds the *full* budget
/// can never be included whole, so they are replaced by a lightweight
/// truncation stub instead of being silently dropped. Among candidates
/// that do fit, selection is a best-fit-decreasing greedy pack: items are
/// tried in descending score order (ties broken by descending token count,
/// so the greedy pass prefers the largest fitting item among equally
/// relevant candidates), each one taken if it still fits what's left.
pub fn fit_to_budget(items: &[ScoredCandidate], budget: u32) -> FitToBudgetResult {
    if items.is_empty() {
        return FitToBudgetResult { results: Vec::new(), token_report: TokenBudgetTracker::new(budget).report() };
    }

    let mut tracker = TokenBudgetTracker::new(budget);
    let mut results = Vec::new();

    let (oversized, packable): (Vec<_>, Vec<_>) = items.iter().partition(|item| item.tokens > budget);

    for item in &oversized {
        let stub_summary = format!("{} (compressed from {} tokens to fit budget)", item.summary, item.tokens);
        let stub_tokens = 0;
        tracker.add_item(stub_summary.clone(), stub_tokens);
        results.push(FitResultItem { id: item.id.clone(), summary: stub_summary, tokens: stub_tokens, truncated: true });
    }

    let mut ordered: Vec<&ScoredCandidate> = packable;
    ordered.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.tokens.cmp(&a.tokens))
    });

    for item in ordered {
        if tracker.can_fit(item.tokens) {
            tracker.add_item(item.summary.clone(), item.tokens);
            results.push(FitResultItem { id: item.id.clone(), summary: item.summary.clone(), tokens: item.tokens, truncated: false });
        }
    }

    FitToBudgetResult { results, token_report: tracker.report() }
}
