//! The plugin framework (§4.3): the capability contract every language
//! adapter honors, a generic tree-based extractor usable for any grammar in
//! [`grammar::ALL`], and specialized extractors for the two languages
//! (Rust, Python) where cross-file import resolution earns its keep.

pub mod generic;
pub mod grammar;
pub mod python;
pub mod registry;
pub mod rust;

use crate::error::PluginError;
use crate::symbol::{ImportEdge, Symbol, SymbolReference};
use crate::types::{FileId, Language};

/// What `Parse` hands back to the indexing worker: everything extracted
/// from one file's content (§3 Symbol, Symbol reference, Import/include
/// edge). Parse is pure w.r.t. the content bytes — identical bytes yield
/// an identical `ParseResult`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseResult {
    pub symbols: Vec<Symbol>,
    pub imports: Vec<ImportEdge>,
    pub references: Vec<SymbolReference>,
}

/// A definition a plugin's optional fast-path `Lookup` can return directly,
/// without round-tripping through storage.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupHit {
    pub symbol: Symbol,
    pub file_path: String,
}

/// A search hit a plugin's optional fast-path `Search` can return.
#[derive(Debug, Clone, PartialEq)]
pub struct PluginSearchHit {
    pub file_path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub snippet: String,
    pub score: f64,
    pub symbol_name: Option<String>,
}

/// Context handed to a plugin's optional fast paths: enough to resolve a
/// symbol without reaching back into the dispatcher. Owned (rather than
/// borrowed) so the dispatcher can move it into the `spawn_blocking` task
/// that enforces the plugin load/call ceiling (§4.1).
#[derive(Debug, Clone)]
pub struct PluginContext {
    pub repository_root: std::path::PathBuf,
}

impl PluginContext {
    pub fn new(repository_root: impl Into<std::path::PathBuf>) -> Self {
        Self {
            repository_root: repository_root.into(),
        }
    }
}

/// The plugin contract (§4.3). Every capability beyond `extensions`,
/// `language_tag`, and `parse` is optional; a plugin that doesn't implement
/// one simply returns the default (`None` / empty), and the dispatcher
/// falls back to storage for that capability — this is the "nullable
/// function-valued fields" expression of optional capabilities from §9's
/// redesign notes, rather than duck typing on attribute presence.
pub trait Plugin: Send + Sync {
    /// File extensions this plugin claims, without the leading dot.
    fn extensions(&self) -> &'static [&'static str];

    fn language_tag(&self) -> Language;

    /// Parse must be pure w.r.t. `content`: identical bytes yield
    /// identical output. Errors are per-file and caught by the caller
    /// (§4.3 "Failure isolation") — they never abort an indexing pass.
    fn parse(&self, file_id: FileId, path: &str, content: &str) -> Result<ParseResult, PluginError>;

    /// Optional fast-path lookup; `None` means "no fast path", not "not
    /// found" — the dispatcher still tries storage afterward.
    fn lookup(&self, _symbol_name: &str, _context: &PluginContext) -> Option<LookupHit> {
        None
    }

    fn has_lookup(&self) -> bool {
        false
    }

    fn references(&self, _symbol_name: &str, _context: &PluginContext) -> Vec<SymbolReference> {
        Vec::new()
    }

    fn has_references(&self) -> bool {
        false
    }

    fn search(&self, _query: &str, _context: &PluginContext) -> Vec<PluginSearchHit> {
        Vec::new()
    }

    fn has_search(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Range;

    struct StubPlugin;

    impl Plugin for StubPlugin {
        fn extensions(&self) -> &'static [&'static str] {
            &["stub"]
        }

        fn language_tag(&self) -> Language {
            Language::new("stub")
        }

        fn parse(&self, file_id: FileId, _path: &str, _content: &str) -> Result<ParseResult, PluginError> {
            Ok(ParseResult {
                symbols: vec![Symbol::new(file_id, "x", crate::types::SymbolKind::Function, Range::new(1, 0, 1, 1))],
                imports: Vec::new(),
                references: Vec::new(),
            })
        }
    }

    #[test]
    fn default_capability_flags_are_all_off() {
        let plugin = StubPlugin;
        assert!(!plugin.has_lookup());
        assert!(!plugin.has_references());
        assert!(!plugin.has_search());
    }

    #[test]
    fn parse_is_pure_for_identical_bytes() {
        let plugin = StubPlugin;
        let a = plugin.parse(FileId(1), "x.stub", "anything").unwrap();
        let b = plugin.parse(FileId(1), "x.stub", "anything").unwrap();
        assert_eq!(a, b);
    }
}
