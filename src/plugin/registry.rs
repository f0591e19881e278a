//! Process-local plugin registry (§4.3 "Discovery and loading"): plugins
//! are registered once at startup, not discovered from disk at runtime.
//! The registry hands the dispatcher an extension → plugin map and a
//! language-tag → plugin map, both immutable after construction — there is
//! no mutable global singleton to race against (§9 redesign notes).
//!
//! Grounded on the teacher's `ParserFactory` (`parsing/factory.rs`): a
//! settings-aware constructor that decides which languages are active,
//! translated here from "construct on demand per call" to "construct once,
//! look up by extension or tag thereafter" to match the dispatcher's
//! lazy-load-with-ceiling requirement (§4.4).

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::Settings;
use crate::error::PluginError;
use crate::plugin::generic::GenericTreeExtractor;
use crate::plugin::grammar;
use crate::plugin::python::PythonPlugin;
use crate::plugin::rust::RustPlugin;
use crate::plugin::Plugin;

/// All plugins known to this process, indexed for the two lookups the
/// dispatcher actually performs: "what handles this file extension" and
/// "what handles this language tag".
pub struct PluginRegistry {
    by_extension: HashMap<&'static str, Arc<dyn Plugin>>,
    by_tag: HashMap<String, Arc<dyn Plugin>>,
}

impl PluginRegistry {
    /// Builds every plugin this binary ships with: the specialized Rust
    /// and Python extractors, and the generic tree extractor for every
    /// other registered grammar. `settings` is accepted (and threaded
    /// through to future per-language toggles) even though today every
    /// shipped language is unconditionally enabled, mirroring the
    /// teacher's `ParserFactory::new(settings)` shape.
    pub fn build(_settings: &Settings) -> Result<Self, PluginError> {
        Self::with_all_generic()
    }

    /// Every known grammar, specialized extractors where one exists and
    /// the generic extractor otherwise — used by `build` and by tests.
    pub fn with_all_generic() -> Result<Self, PluginError> {
        let mut plugins: Vec<Arc<dyn Plugin>> = vec![Arc::new(RustPlugin::new()?), Arc::new(PythonPlugin::new()?)];
        for grammar in [&grammar::JAVASCRIPT, &grammar::TYPESCRIPT, &grammar::GO] {
            plugins.push(Arc::new(GenericTreeExtractor::new(grammar)?));
        }
        Ok(Self::from_plugins(plugins))
    }

    fn from_plugins(plugins: Vec<Arc<dyn Plugin>>) -> Self {
        let mut by_extension = HashMap::new();
        let mut by_tag = HashMap::new();
        for plugin in plugins {
            for ext in plugin.extensions() {
                by_extension.insert(*ext, plugin.clone());
            }
            by_tag.insert(plugin.language_tag().0, plugin);
        }
        Self { by_extension, by_tag }
    }

    pub fn for_extension(&self, ext: &str) -> Option<Arc<dyn Plugin>> {
        let lower = ext.to_ascii_lowercase();
        self.by_extension.get(lower.as_str()).cloned()
    }

    pub fn for_path(&self, path: &std::path::Path) -> Option<Arc<dyn Plugin>> {
        let ext = path.extension()?.to_str()?;
        self.for_extension(ext)
    }

    pub fn for_tag(&self, tag: &str) -> Option<Arc<dyn Plugin>> {
        self.by_tag.get(tag).cloned()
    }

    pub fn language_tags(&self) -> Vec<String> {
        self.by_tag.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.by_tag.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_tag.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn resolves_plugin_by_extension_and_by_path() {
        let registry = PluginRegistry::with_all_generic().unwrap();
        assert!(registry.for_extension("rs").is_some());
        assert!(registry.for_path(Path::new("src/main.rs")).is_some());
        assert!(registry.for_path(Path::new("README")).is_none());
    }

    #[test]
    fn resolves_plugin_by_language_tag() {
        let registry = PluginRegistry::with_all_generic().unwrap();
        assert!(registry.for_tag("python").is_some());
        assert!(registry.for_tag("cobol").is_none());
    }

    #[test]
    fn every_registered_grammar_extension_resolves() {
        let registry = PluginRegistry::with_all_generic().unwrap();
        for grammar in grammar::ALL {
            for ext in grammar.extensions {
                assert!(registry.for_extension(ext).is_some(), "missing plugin for .{ext}");
            }
        }
    }
}
