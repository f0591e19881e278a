//! Query orchestration and result model (§4.6): the caller-facing shapes
//! the dispatcher returns, and the merge step that turns per-tier hits
//! into one deduplicated, ranked stream.
//!
//! Scores are non-comparable raw across tiers, so the merge step applies
//! per-tier min-max normalization over the query's own results before a
//! tier-priority-weighted sum (`final = w_plugin·plugin_norm +
//! w_semantic·semantic_norm + w_bm25·bm25_norm`), with a tier that
//! returned no result for an item contributing zero.

use serde::{Deserialize, Serialize};

use crate::types::SymbolKind;

/// Which tier produced a [`SearchResult`]. Ordering here is also the
/// dedup tie-break priority: plugin beats semantic beats bm25 (§4.1
/// Deduplication, §4.6 "Ties broken by source priority").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Bm25,
    Semantic,
    Plugin,
}

impl Source {
    /// Higher is better, matching the declared tie-break order.
    fn priority(self) -> u8 {
        match self {
            Source::Bm25 => 0,
            Source::Semantic => 1,
            Source::Plugin => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub file_path: String,
    pub language: Option<String>,
    pub start_line: u32,
    pub end_line: u32,
    pub snippet: String,
    /// Raw, tier-local score before merge normalization. After
    /// [`merge`] runs, this holds the final weighted score in `0..=1`.
    pub score: f64,
    pub source: Source,
    pub symbol_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolDefinition {
    pub name: String,
    pub kind: SymbolKind,
    pub file_path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub signature: Option<String>,
    pub doc: Option<String>,
    pub container: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub symbol_name: String,
    pub file_path: String,
    pub line: u32,
    pub column: u16,
    pub kind: crate::types::ReferenceKind,
}

/// Default tier weights from §4.6; overridable via [`crate::config::DispatcherConfig`].
#[derive(Debug, Clone, Copy)]
pub struct TierWeights {
    pub plugin: f64,
    pub semantic: f64,
    pub bm25: f64,
}

impl Default for TierWeights {
    fn default() -> Self {
        Self {
            plugin: 0.5,
            semantic: 0.35,
            bm25: 0.15,
        }
    }
}

/// The dedup key from §4.1/§9's open-question resolution: normalized file
/// path + start line, preferring `symbol_name` when present and falling
/// back to a hash of the snippet otherwise.
fn dedup_key(result: &SearchResult) -> (String, u32, String) {
    let normalized_path = result.file_path.replace('\\', "/");
    let disambiguator = match &result.symbol_name {
        Some(name) => name.clone(),
        None => snippet_hash(&result.snippet),
    };
    (normalized_path, result.start_line, disambiguator)
}

fn snippet_hash(snippet: &str) -> String {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    snippet.hash(&mut hasher);
    format!("{:x}", hasher.finish())
}

/// Min-max normalize `scores` to `0..=1`. A tier with a single result (or
/// all-equal scores) normalizes every value to `1.0` rather than dividing
/// by zero.
fn min_max_normalize(scores: &[f64]) -> Vec<f64> {
    if scores.is_empty() {
        return Vec::new();
    }
    let min = scores.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if (max - min).abs() < f64::EPSILON {
        return scores.iter().map(|_| 1.0).collect();
    }
    scores.iter().map(|s| (s - min) / (max - min)).collect()
}

/// Merge per-tier hits into one deduplicated, ranked list (§4.1 `search`,
/// §4.6 merge step). Each tier's scores are min-max normalized against
/// that tier's own results *before* collisions are resolved, so a tier's
/// internal ranking survives even though its raw scale doesn't compare to
/// another tier's.
pub fn merge(tiers: Vec<Vec<SearchResult>>, weights: TierWeights) -> Vec<SearchResult> {
    use std::collections::HashMap;

    // Normalize each tier's raw scores independently, then tag every
    // result with its tier-contribution so the weighted sum in the merge
    // loop below only ever sees 0..=1 inputs.
    let mut normalized: Vec<SearchResult> = Vec::new();
    for tier in tiers {
        let raw_scores: Vec<f64> = tier.iter().map(|r| r.score).collect();
        let norm_scores = min_max_normalize(&raw_scores);
        for (mut result, norm) in tier.into_iter().zip(norm_scores) {
            result.score = norm;
            normalized.push(result);
        }
    }

    let mut best_by_key: HashMap<(String, u32, String), SearchResult> = HashMap::new();
    for result in normalized {
        let key = dedup_key(&result);
        let weighted = weighted_contribution(&result, weights);
        match best_by_key.get(&key) {
            Some(existing) => {
                let existing_weighted = weighted_contribution(existing, weights);
                let existing_priority = existing.source.priority();
                let new_priority = result.source.priority();
                if weighted > existing_weighted
                    || ((weighted - existing_weighted).abs() < f64::EPSILON && new_priority > existing_priority)
                {
                    let mut replacement = result;
                    replacement.score = weighted;
                    best_by_key.insert(key, replacement);
                }
            }
            None => {
                let mut inserted = result;
                inserted.score = weighted;
                best_by_key.insert(key, inserted);
            }
        }
    }

    let mut merged: Vec<SearchResult> = best_by_key.into_values().collect();
    merged.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.source.priority().cmp(&a.source.priority()))
            .then_with(|| a.file_path.cmp(&b.file_path))
            .then_with(|| a.start_line.cmp(&b.start_line))
    });
    merged
}

fn weighted_contribution(result: &SearchResult, weights: TierWeights) -> f64 {
    match result.source {
        Source::Plugin => weights.plugin * result.score,
        Source::Semantic => weights.semantic * result.score,
        Source::Bm25 => weights.bm25 * result.score,
    }
}

/// The marker SQLite's own `snippet()` is asked to wrap matches in for the
/// file-content corpus (`storage::search::try_search_bm25`'s Code branch);
/// reused here so a caller can't tell, from the marker alone, which tier a
/// hit came from.
const SNIPPET_MARKER: char = '\u{2023}';

/// Cap a snippet at 160 characters, centered on the first match of
/// `needle`, with the matched span delimited by [`SNIPPET_MARKER`] on both
/// sides (§4.6: "matched tokens delimited"). Plugin/semantic snippets go
/// through [`crate::symbol::Symbol::snippet`] instead, which this
/// function does not touch.
pub fn centered_snippet(body: &str, needle: &str, max_len: usize) -> String {
    let chars: Vec<char> = body.chars().collect();
    let lower_body = body.to_ascii_lowercase();
    let lower_needle = needle.to_ascii_lowercase();
    let match_char_idx = (!lower_needle.trim().is_empty())
        .then(|| lower_body.find(&lower_needle))
        .flatten()
        .map(|byte_idx| lower_body[..byte_idx].chars().count());
    let needle_char_len = needle.chars().count();

    let (start_char, end_char) = if chars.len() <= max_len {
        (0, chars.len())
    } else {
        let half = max_len / 2;
        let anchor = match_char_idx.unwrap_or(0);
        let start = anchor.saturating_sub(half);
        let end = (start + max_len).min(chars.len());
        let start = end.saturating_sub(max_len).min(start);
        (start, end)
    };

    let mut snippet = String::new();
    if start_char > 0 {
        snippet.push_str("...");
    }
    for (offset, ch) in chars[start_char..end_char].iter().enumerate() {
        let absolute = start_char + offset;
        if match_char_idx == Some(absolute) {
            snippet.push(SNIPPET_MARKER);
        }
        if match_char_idx.map(|m| m + needle_char_len) == Some(absolute) {
            snippet.push(SNIPPET_MARKER);
        }
        snippet.push(*ch);
    }
    if match_char_idx.map(|m| m + needle_char_len) == Some(end_char) {
        snippet.push(SNIPPET_MARKER);
    }
    if end_char < chars.len() {
        snippet.push_str("...");
    }
    snippet
}
