//! Token counting for budgeting and cost estimation.
//!
//! Counts are approximations: models without a known tokenizer are counted
//! with the cl100k_base encoding. If even that encoder cannot be built,
//! every count degrades to `0` rather than failing the caller.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tiktoken_rs::{cl100k_base, get_bpe_from_model, CoreBPE};

/// Token counter with a per-model encoder cache.
pub struct TokenCounter {
    /// Resolved encoder per model name
    encoders: RwLock<HashMap<String, Arc<CoreBPE>>>,

    /// cl100k_base, used for unknown models
    fallback: Option<Arc<CoreBPE>>,
}

impl TokenCounter {
    pub fn new() -> Self {
        let fallback = match cl100k_base() {
            Ok(bpe) => Some(Arc::new(bpe)),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load cl100k_base, token counts will be zero");
                None
            }
        };

        Self {
            encoders: RwLock::new(HashMap::new()),
            fallback,
        }
    }

    /// Count tokens in `text` as seen by `model`.
    pub fn count(&self, text: &str, model: &str) -> u32 {
        if text.is_empty() {
            return 0;
        }

        match self.encoder_for(model) {
            Some(bpe) => {
                let tokens = bpe.encode_with_special_tokens(text).len();
                u32::try_from(tokens).unwrap_or(u32::MAX)
            }
            None => 0,
        }
    }

    fn encoder_for(&self, model: &str) -> Option<Arc<CoreBPE>> {
        if let Some(bpe) = self.encoders.read().get(model) {
            return Some(Arc::clone(bpe));
        }

        let resolved = match get_bpe_from_model(model) {
            Ok(bpe) => Arc::new(bpe),
            Err(_) => {
                tracing::debug!(model, "No tokenizer for model, using cl100k_base");
                Arc::clone(self.fallback.as_ref()?)
            }
        };

        self.encoders
            .write()
            .entry(model.to_string())
            .or_insert_with(|| Arc::clone(&resolved));

        Some(resolved)
    }
}

impl Default for TokenCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TokenCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCounter")
            .field("cached_models", &self.encoders.read().len())
            .field("fallback_loaded", &self.fallback.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_counting() {
        let counter = TokenCounter::new();

        assert!(counter.count("hello world", "gpt-4o") > 0);
        assert_eq!(counter.count("", "gpt-4o"), 0);
    }

    #[test]
    fn test_counting_is_deterministic() {
        let counter = TokenCounter::new();
        let text = "Token budgets bound how much history is replayed to the model.";

        let first = counter.count(text, "gpt-4o");
        let second = counter.count(text, "gpt-4o");
        assert_eq!(first, second);
    }

    #[test]
    fn test_unknown_model_uses_fallback_encoding() {
        let counter = TokenCounter::new();
        let text = "The quick brown fox jumps over the lazy dog.";

        let unknown = counter.count(text, "definitely-not-a-model");
        let reference = cl100k_base().unwrap().encode_with_special_tokens(text).len() as u32;
        assert_eq!(unknown, reference);
    }

    #[test]
    fn test_encoder_is_cached_per_model() {
        let counter = TokenCounter::new();
        counter.count("abc", "gpt-4");
        counter.count("def", "gpt-4");
        counter.count("ghi", "mystery-model");

        assert_eq!(counter.encoders.read().len(), 2);
    }

    #[test]
    fn test_unicode() {
        let counter = TokenCounter::new();
        assert!(counter.count("人工智能的未来趋势", "gpt-4o") > 0);
    }
}
