//! Deterministic intent classification and policy gating. Given an
//! identical query, hints and search context, classification and gating
//! always produce the same result — no network calls, no randomness.

pub mod gate;
pub mod intent;

pub use gate::{validate, PolicyGate, PolicyOverride, SearchContext};
pub use intent::{ClassifyHints, IntentClassifier};
