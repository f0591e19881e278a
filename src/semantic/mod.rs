//! Semantic search trait boundary (§4.1, §4.6). The dispatcher only ever
//! talks to this narrow trait; a real embedding-backed implementation
//! lives behind the `semantic` feature and is not shipped by default. The
//! [`NullSemanticSearcher`] keeps the tier structurally present (so the
//! tiered fallback chain never has to special-case "no semantic search
//! configured") while returning nothing, matching §4.5's compatibility
//! rule that a missing embedding-model tag means semantic results are
//! simply absent rather than an error.

use crate::query::SearchResult;

/// A semantic-search backend. Implementors must never block past the
/// caller's deadline and must never raise — an unavailable or degraded
/// backend returns an empty vector, same as storage's BM25 tier on
/// failure (§4.1 "never raises").
pub trait SemanticSearcher: Send + Sync {
    fn search(&self, query: &str, limit: usize) -> Vec<SearchResult>;

    /// Whether this searcher is ready to serve queries. The dispatcher
    /// skips the tier entirely rather than calling `search` when this is
    /// `false`, so a disabled/misconfigured backend costs nothing.
    fn is_available(&self) -> bool {
        true
    }
}

/// The default backend when [`crate::config::SemanticConfig::enabled`] is
/// `false` or no embedding-compatible index was found during discovery.
pub struct NullSemanticSearcher;

impl SemanticSearcher for NullSemanticSearcher {
    fn search(&self, _query: &str, _limit: usize) -> Vec<SearchResult> {
        Vec::new()
    }

    fn is_available(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_searcher_is_unavailable_and_empty() {
        let searcher = NullSemanticSearcher;
        assert!(!searcher.is_available());
        assert!(searcher.search("anything", 10).is_empty());
    }
}
