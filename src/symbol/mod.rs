//! In-memory representations of the data model's Symbol, Symbol reference,
//! and Import/include edge entities (§3). These are plain value types; the
//! storage engine owns their persisted form.

use serde::{Deserialize, Serialize};

use crate::types::{FileId, Range, ReferenceId, ReferenceKind, SymbolId, SymbolKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Symbol {
    pub id: SymbolId,
    pub file_id: FileId,
    pub name: String,
    pub kind: SymbolKind,
    pub range: Range,
    pub signature: Option<String>,
    pub doc: Option<String>,
    pub container: Option<String>,
}

impl Symbol {
    pub fn new(file_id: FileId, name: impl Into<String>, kind: SymbolKind, range: Range) -> Self {
        Self {
            id: SymbolId(0),
            file_id,
            name: name.into(),
            kind,
            range,
            signature: None,
            doc: None,
            container: None,
        }
    }

    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    pub fn with_doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    pub fn with_container(mut self, container: impl Into<String>) -> Self {
        self.container = Some(container.into());
        self
    }

    /// First line of the signature, or the first line of the doc comment,
    /// whichever is longer — the plugin/semantic snippet rule from §4.6.
    pub fn snippet(&self) -> String {
        let sig_line = self
            .signature
            .as_deref()
            .and_then(|s| s.lines().next())
            .unwrap_or("");
        let doc_line = self.doc.as_deref().and_then(|s| s.lines().next()).unwrap_or("");
        if doc_line.len() > sig_line.len() {
            doc_line.to_string()
        } else {
            sig_line.to_string()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolReference {
    pub id: ReferenceId,
    pub symbol_name: String,
    pub file_id: FileId,
    pub line: u32,
    pub column: u16,
    pub kind: ReferenceKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportEdge {
    pub file_id: FileId,
    pub module_path: String,
    pub imported_name: Option<String>,
    pub alias: Option<String>,
    pub line: u32,
    pub is_relative: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snippet_prefers_the_longer_of_signature_and_doc() {
        let sym = Symbol::new(FileId(1), "greet", SymbolKind::Function, Range::new(1, 0, 1, 20))
            .with_signature("fn greet(name: &str)")
            .with_doc("Greets the caller by name, politely.");
        assert_eq!(sym.snippet(), "Greets the caller by name, politely.");
    }

    #[test]
    fn snippet_falls_back_to_signature_with_no_doc() {
        let sym = Symbol::new(FileId(1), "greet", SymbolKind::Function, Range::new(1, 0, 1, 20))
            .with_signature("fn greet(name: &str)");
        assert_eq!(sym.snippet(), "fn greet(name: &str)");
    }
}
