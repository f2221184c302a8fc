//! Tokenization, token-budget tracking, progressive degradation under a
//! fixed budget, stopping-reason accounting, and the context assembler
//! that orchestrates every other crate's pipeline stage into one `Bundle`.

pub mod assembler;
pub mod budget;
pub mod degrade;
pub mod stopping;
pub mod tokenizer;

pub use assembler::{AssembleOptions, ContextAssembler};
pub use budget::{fit_to_budget, BudgetItem, BudgetReport, FitResultItem, FitToBudgetResult, ScoredCandidate, TokenBudgetTracker};
pub use degrade::{
    claude3_thresholds, gpt4_thresholds, thresholds_for_model, AppliedDegradation, CapsuleCategory, CapsuleMetadata, DegradeItem,
    DegradeLevel, DegradePerformance, DegradePolicyEngine, DegradeResult, DegradeThresholds, DegradedItem, Savings,
};
pub use stopping::{export_csv, export_json, GroupedConditions, SessionMetrics, SessionSummary, StoppingReasonEngine, StoppingThresholds};
pub use tokenizer::{FitResult, ModelProfile, Tokenizer, TokenizerFactory, TokenizerFamily};
