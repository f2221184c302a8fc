//! Model-specific tokenizers behind a uniform contract. No BPE
//! implementation is vendored here, so every family counts tokens by the
//! same `ceil(chars / chars_per_token)` estimate the teacher crate used for
//! its own token accounting; only the ratio and the context window differ
//! per model.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;

/// Tokenizer family, used only for registry lookups and explanation
/// output; it does not change the counting strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenizerFamily {
    Cl100kBase,
    ClaudeNative,
    LlamaSentencePiece,
    Default,
}

/// A registered model's tokenizer profile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelProfile {
    pub chars_per_token: f32,
    pub context_size: u32,
    pub max_tokens: u32,
    pub tokenizer_family: TokenizerFamily,
}

const DEFAULT_PROFILE: ModelProfile = ModelProfile {
    chars_per_token: 4.0,
    context_size: 4096,
    max_tokens: 4096,
    tokenizer_family: TokenizerFamily::Default,
};

static REGISTRY: Lazy<HashMap<&'static str, ModelProfile>> = Lazy::new(|| {
    let mut registry = HashMap::new();
    registry.insert(
        "gpt-4",
        ModelProfile { chars_per_token: 3.5, context_size: 8192, max_tokens: 4096, tokenizer_family: TokenizerFamily::Cl100kBase },
    );
    registry.insert(
        "gpt-3.5-turbo",
        ModelProfile { chars_per_token: 4.0, context_size: 16384, max_tokens: 4096, tokenizer_family: TokenizerFamily::Cl100kBase },
    );
    registry.insert(
        "claude-3",
        ModelProfile { chars_per_token: 4.0, context_size: 100_000, max_tokens: 8192, tokenizer_family: TokenizerFamily::ClaudeNative },
    );
    registry.insert(
        "llama",
        ModelProfile { chars_per_token: 3.8, context_size: 4096, max_tokens: 2048, tokenizer_family: TokenizerFamily::LlamaSentencePiece },
    );
    registry.insert(
        "mistral",
        ModelProfile { chars_per_token: 3.8, context_size: 8192, max_tokens: 2048, tokenizer_family: TokenizerFamily::LlamaSentencePiece },
    );
    registry
});

fn profile_for(model: &str) -> ModelProfile {
    REGISTRY.get(model.to_lowercase().as_str()).copied().unwrap_or(DEFAULT_PROFILE)
}

/// Result of `Tokenizer::fit_to_context`.
#[derive(Debug, Clone, PartialEq)]
pub struct FitResult {
    pub text: String,
    pub tokens: u32,
    pub truncated: bool,
    pub original_tokens: u32,
}

/// A tokenizer bound to one model's profile. Stateless beyond the profile
/// it was built from; cheap to share behind an `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct Tokenizer {
    model: String,
    profile: ModelProfile,
}

impl Tokenizer {
    fn new(model: &str) -> Self {
        Self { model: model.to_string(), profile: profile_for(model) }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn family(&self) -> TokenizerFamily {
        self.profile.tokenizer_family
    }

    /// `ceil(len(text) / chars_per_token)`. Empty text counts as 0.
    pub fn count_tokens(&self, text: &str) -> u32 {
        if text.is_empty() {
            return 0;
        }
        (text.chars().count() as f32 / self.profile.chars_per_token).ceil() as u32
    }

    /// Order-preserving batch counting; counts equal the per-item counts.
    pub fn count_tokens_batch(&self, texts: &[String]) -> Vec<u32> {
        texts.iter().map(|t| self.count_tokens(t)).collect()
    }

    pub fn context_size(&self) -> u32 {
        self.profile.context_size
    }

    pub fn max_tokens(&self) -> u32 {
        self.profile.max_tokens
    }

    /// The largest head-prefix of `text` whose token count is
    /// `≤ context_size - reserve`, reporting whether truncation occurred.
    pub fn fit_to_context(&self, text: &str, reserve: u32) -> FitResult {
        let original_tokens = self.count_tokens(text);
        let budget = self.profile.context_size.saturating_sub(reserve);

        if original_tokens <= budget {
            return FitResult { text: text.to_string(), tokens: original_tokens, truncated: false, original_tokens };
        }

        let max_chars = (budget as f32 * self.profile.chars_per_token).floor() as usize;
        let truncated_text = char_prefix(text, max_chars);
        let tokens = self.count_tokens(&truncated_text);
        FitResult { text: truncated_text, tokens, truncated: true, original_tokens }
    }
}

/// Take the first `max_chars` characters of `text`, respecting char
/// boundaries (not just byte boundaries, since `count_tokens` counts
/// chars).
fn char_prefix(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Builds and caches `Tokenizer`s per model name, so repeated `create`
/// calls for the same model return the same instance. Cache is clearable.
#[derive(Debug, Clone, Default)]
pub struct TokenizerFactory {
    cache: Arc<RwLock<HashMap<String, Arc<Tokenizer>>>>,
}

impl TokenizerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unknown models resolve to the `Default` profile rather than erroring
    /// — the contract never throws.
    pub fn create(&self, model: &str) -> Arc<Tokenizer> {
        if let Some(existing) = self.cache.read().unwrap().get(model) {
            return existing.clone();
        }
        let tokenizer = Arc::new(Tokenizer::new(model));
        self.cache.write().unwrap().insert(model.to_string(), tokenizer.clone());
        tokenizer
    }

    pub fn clear_cache(&self) {
        self.cache.write().unwrap().clear();
    }

    pub fn cached_models(&self) -> usize {
        self.cache.read().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_model_falls_back_to_default_profile() {
        let factory = TokenizerFactory::new();
        let tokenizer = factory.create("some-unreleased-model");
        assert_eq!(tokenizer.context_size(), 4096);
        assert_eq!(tokenizer.family(), TokenizerFamily::Default);
    }

    #[test]
    fn known_models_use_their_registered_profile() {
        let factory = TokenizerFactory::new();
        let gpt4 = factory.create("gpt-4");
        assert_eq!(gpt4.context_size(), 8192);
        let claude = factory.create("claude-3");
        assert_eq!(claude.context_size(), 100_000);
    }

    #[test]
    fn model_name_lookup_is_case_insensitive() {
        let factory = TokenizerFactory::new();
        assert_eq!(factory.create("GPT-4").context_size(), factory.create("gpt-4").context_size());
    }

    #[test]
    fn empty_text_counts_zero_tokens() {
        let factory = TokenizerFactory::new();
        assert_eq!(factory.create("gpt-4").count_tokens(""), 0);
    }

    #[test]
    fn repeated_create_returns_the_same_cached_instance() {
        let factory = TokenizerFactory::new();
        let a = factory.create("gpt-4");
        let b = factory.create("gpt-4");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(factory.cached_models(), 1);
    }

    #[test]
    fn clear_cache_forces_a_fresh_instance() {
        let factory = TokenizerFactory::new();
        let a = factory.create("gpt-4");
        factory.clear_cache();
        let b = factory.create("gpt-4");
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn batch_counting_is_order_preserving_and_matches_per_item() {
        let tokenizer = TokenizerFactory::new().create("gpt-4");
        let texts = vec!["hello".to_string(), "a longer bit of text here".to_string(), "".to_string()];
        let batch = tokenizer.count_tokens_batch(&texts);
        let per_item: Vec<u32> = texts.iter().map(|t| tokenizer.count_tokens(t)).collect();
        assert_eq!(batch, per_item);
    }

    #[test]
    fn fit_to_context_reports_truncation_when_over_budget() {
        let tokenizer = TokenizerFactory::new().create("gpt-4");
        let text = "x".repeat(100_000);
        let fit = tokenizer.fit_to_context(&text, 0);
        assert!(fit.truncated);
        assert!(fit.tokens <= tokenizer.context_size());
        assert!(fit.original_tokens > fit.tokens);
    }

    #[test]
    fn fit_to_context_is_noop_when_text_already_fits() {
        let tokenizer = TokenizerFactory::new().create("gpt-4");
        let fit = tokenizer.fit_to_context("short text", 100);
        assert!(!fit.truncated);
        assert_eq!(fit.text, "short text");
    }

    #[test]
    fn fit_to_context_reserve_shrinks_the_budget() {
        let tokenizer = TokenizerFactory::new().create("gpt-4");
        let text = "y".repeat(500);
        let generous = tokenizer.fit_to_context(&text, 0);
        let reserved = tokenizer.fit_to_context(&text, tokenizer.context_size() - 10);
        assert!(reserved.tokens <= generous.tokens);
    }
}
