//! Caching layer for judge verdicts.
//!
//! Judging the same answer against the same context twice costs a model call
//! for no new information. Successful verdicts are cached in memory; failed
//! judge calls are never cached.

use moka::future::Cache;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use sift_core::JudgeVerdict;

/// Cache key for judge verdicts.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct VerdictKey {
    answer_hash: u64,
    context_hash: u64,
}

impl VerdictKey {
    /// Create a cache key from the judged answer and its (truncated) context.
    pub fn new(answer: &str, context: &[String]) -> Self {
        Self {
            answer_hash: hash_answer(answer),
            context_hash: hash_context(context),
        }
    }
}

/// Verdict cache using moka.
pub struct VerdictCache {
    cache: Cache<VerdictKey, JudgeVerdict>,
}

impl VerdictCache {
    pub fn new(max_entries: u64) -> Self {
        let cache = Cache::builder().max_capacity(max_entries).build();
        Self { cache }
    }

    pub async fn get(&self, key: &VerdictKey) -> Option<JudgeVerdict> {
        self.cache.get(key).await
    }

    pub async fn insert(&self, key: VerdictKey, verdict: JudgeVerdict) {
        self.cache.insert(key, verdict).await;
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }
}

impl Default for VerdictCache {
    fn default() -> Self {
        Self::new(1_000)
    }
}

fn hash_answer(answer: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    answer.hash(&mut hasher);
    hasher.finish()
}

fn hash_context(context: &[String]) -> u64 {
    let mut hasher = DefaultHasher::new();
    // length first so ["ab"] and ["a", "b"] differ
    context.len().hash(&mut hasher);
    for item in context {
        item.hash(&mut hasher);
    }
    hasher.finish()
}
