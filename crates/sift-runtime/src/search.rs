//! Web search used by the evaluator's fallback round.
//!
//! [`FallbackSearch`] is the never-failing interface the evaluator depends on.
//! [`RelevanceFilteredSearch`] adapts any fallible [`SearchBackend`] to it,
//! scoring hits by word overlap with the query and dropping weak ones.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Base relevance granted to every hit returned by the backend.
const RELEVANCE_FLOOR: f64 = 0.3;

/// One search hit handed to the evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Backend that produced the hit
    pub source: String,

    pub content: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance_score: Option<f64>,
}

/// Search that never fails: errors surface as an empty result.
#[async_trait]
pub trait FallbackSearch: Send + Sync {
    async fn search(&self, query: &str, max_results: usize, min_relevance: f64) -> Vec<SearchHit>;
}

/// Errors from a raw search backend.
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Search request failed: {0}")]
    Http(String),

    #[error("Search API returned status {0}")]
    Status(u16),

    #[error("Unreadable search response: {0}")]
    Parse(String),
}

/// A page returned by a search backend, before scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebPage {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// A raw web search API.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Backend name, recorded as the hit source.
    fn name(&self) -> &str;

    /// Fetch up to `count` pages for `query` in the given market (e.g. "en-US").
    async fn fetch(&self, query: &str, count: usize, market: &str)
        -> Result<Vec<WebPage>, SearchError>;
}

/// Adapts a [`SearchBackend`] into a [`FallbackSearch`].
pub struct RelevanceFilteredSearch<B> {
    backend: B,
}

impl<B: SearchBackend> RelevanceFilteredSearch<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

#[async_trait]
impl<B: SearchBackend> FallbackSearch for RelevanceFilteredSearch<B> {
    async fn search(&self, query: &str, max_results: usize, min_relevance: f64) -> Vec<SearchHit> {
        let pages = match self.backend.fetch(query, max_results, market_for(query)).await {
            Ok(pages) => pages,
            Err(e) => {
                tracing::warn!(
                    backend = self.backend.name(),
                    error = %e,
                    "Web search failed, continuing without results"
                );
                return Vec::new();
            }
        };

        let hits: Vec<SearchHit> = pages
            .into_iter()
            .filter_map(|page| {
                let content = if page.title.is_empty() {
                    page.snippet
                } else {
                    format!("{}\n{}", page.title, page.snippet)
                };
                let score = relevance(query, &content);
                (score >= min_relevance).then(|| SearchHit {
                    source: self.backend.name().to_string(),
                    content,
                    url: Some(page.url),
                    relevance_score: Some(score),
                })
            })
            .take(max_results)
            .collect();

        tracing::debug!(query = %query, hits = hits.len(), "Web search complete");
        hits
    }
}

/// Word-overlap relevance: `min(1, overlap / |query words| + 0.3)`.
///
/// Words are lowercased and split on whitespace. A query without words
/// scores `0.0`.
pub fn relevance(query: &str, content: &str) -> f64 {
    let query_words: HashSet<String> = words(query);
    if query_words.is_empty() {
        return 0.0;
    }

    let content_words = words(content);
    let overlap = query_words.intersection(&content_words).count();
    (overlap as f64 / query_words.len() as f64 + RELEVANCE_FLOOR).min(1.0)
}

fn words(text: &str) -> HashSet<String> {
    text.split_whitespace().map(str::to_lowercase).collect()
}

/// Search market for a query: "zh-CN" when it contains CJK ideographs.
pub fn market_for(query: &str) -> &'static str {
    if query
        .chars()
        .any(|c| ('\u{4e00}'..='\u{9fff}').contains(&c))
    {
        "zh-CN"
    } else {
        "en-US"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct StaticBackend {
        pages: Vec<WebPage>,
        markets: Mutex<Vec<String>>,
    }

    impl StaticBackend {
        fn new(pages: Vec<WebPage>) -> Self {
            Self {
                pages,
                markets: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SearchBackend for StaticBackend {
        fn name(&self) -> &str {
            "static"
        }

        async fn fetch(
            &self,
            _query: &str,
            count: usize,
            market: &str,
        ) -> Result<Vec<WebPage>, SearchError> {
            self.markets.lock().push(market.to_string());
            Ok(self.pages.iter().take(count).cloned().collect())
        }
    }

    struct BrokenBackend;

    #[async_trait]
    impl SearchBackend for BrokenBackend {
        fn name(&self) -> &str {
            "broken"
        }

        async fn fetch(&self, _: &str, _: usize, _: &str) -> Result<Vec<WebPage>, SearchError> {
            Err(SearchError::Status(503))
        }
    }

    fn page(url: &str, snippet: &str) -> WebPage {
        WebPage {
            title: String::new(),
            url: url.to_string(),
            snippet: snippet.to_string(),
        }
    }

    #[test]
    fn test_relevance_formula() {
        // 2 of 4 query words present: 0.5 + 0.3
        let score = relevance("solar panel efficiency trends", "Panel EFFICIENCY rose in 2024");
        assert!((score - 0.8).abs() < 1e-9);

        // full overlap is capped at 1.0
        assert_eq!(relevance("solar power", "solar power"), 1.0);

        // no overlap keeps the floor
        assert!((relevance("solar power", "unrelated text") - 0.3).abs() < 1e-9);

        assert_eq!(relevance("   ", "anything"), 0.0);
    }

    #[test]
    fn test_market_detection() {
        assert_eq!(market_for("battery prices"), "en-US");
        assert_eq!(market_for("电池价格"), "zh-CN");
    }

    #[tokio::test]
    async fn test_filters_by_min_relevance() {
        let backend = StaticBackend::new(vec![
            page("https://a.example", "battery prices fell sharply"),
            page("https://b.example", "weather report for tuesday"),
        ]);
        let search = RelevanceFilteredSearch::new(backend);

        let hits = search.search("battery prices", 5, 0.7).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].url.as_deref(), Some("https://a.example"));
        assert_eq!(hits[0].source, "static");
        assert_eq!(search.backend().markets.lock().as_slice(), ["en-US"]);
    }

    #[tokio::test]
    async fn test_truncates_to_max_results() {
        let pages = (0..10)
            .map(|i| page(&format!("https://{i}.example"), "battery prices"))
            .collect();
        let search = RelevanceFilteredSearch::new(StaticBackend::new(pages));

        let hits = search.search("battery prices", 3, 0.0).await;
        assert_eq!(hits.len(), 3);
    }

    #[tokio::test]
    async fn test_backend_error_yields_empty() {
        let search = RelevanceFilteredSearch::new(BrokenBackend);
        assert!(search.search("battery prices", 5, 0.7).await.is_empty());
    }
}
