//! The generic tree-based extractor (§4.3 "Generic tree extractor"):
//! parameterized by a [`grammar::LanguageGrammar`], it matches grammar node
//! types against a small per-language mapping and yields names, line
//! ranges, and signatures — but no cross-file references. Serves as the
//! last-resort plugin for any language tag with a registered grammar but no
//! specialized adapter (Go, JavaScript, TypeScript ship with this alone).

use parking_lot::Mutex;
use tree_sitter::{Node, Parser};

use crate::error::PluginError;
use crate::plugin::grammar::LanguageGrammar;
use crate::plugin::{ParseResult, Plugin};
use crate::symbol::{ImportEdge, Symbol};
use crate::types::{FileId, Language, Range};

pub struct GenericTreeExtractor {
    grammar: &'static LanguageGrammar,
    parser: Mutex<Parser>,
}

impl GenericTreeExtractor {
    pub fn new(grammar: &'static LanguageGrammar) -> Result<Self, PluginError> {
        let mut parser = Parser::new();
        parser
            .set_language(&(grammar.language)())
            .map_err(|e| PluginError::ParseFailed {
                language: grammar.tag.to_string(),
                path: std::path::PathBuf::new(),
                reason: format!("failed to load grammar: {e}"),
            })?;
        Ok(Self {
            grammar,
            parser: Mutex::new(parser),
        })
    }

    fn symbol_kind_for(&self, node_kind: &str) -> Option<&crate::types::SymbolKind> {
        self.grammar
            .symbol_nodes
            .iter()
            .find(|m| m.node_kind == node_kind)
            .map(|m| &m.symbol_kind)
    }

    fn node_name<'c>(&self, node: Node, content: &'c str) -> Option<&'c str> {
        node.child_by_field_name("name")
            .map(|n| &content[n.byte_range()])
    }

    /// Like [`Self::node_name`], but also accepts a `type` field — Rust's
    /// `impl` blocks name their container via `impl_item`'s `type` field
    /// rather than a `name` field.
    fn container_name<'c>(&self, node: Node, content: &'c str) -> Option<&'c str> {
        node.child_by_field_name("name")
            .or_else(|| node.child_by_field_name("type"))
            .map(|n| &content[n.byte_range()])
    }

    /// Text of the node up to (but not including) its body, used as the
    /// signature; falls back to the first line of the node's own text.
    fn node_signature(&self, node: Node, content: &str) -> String {
        let full = &content[node.byte_range()];
        let body_start = node
            .child_by_field_name("body")
            .map(|b| b.start_byte() - node.start_byte());
        let head = match body_start {
            Some(offset) if offset <= full.len() => &full[..offset],
            _ => full,
        };
        head.lines().next().unwrap_or("").trim().to_string()
    }

    /// The immediately preceding `comment` sibling's text, if any — a
    /// language-agnostic stand-in for doc comments that works for `///`,
    /// `#`, and `//` conventions alike (specialized extractors refine this
    /// further for languages with a doc-comment convention worth the
    /// extra code).
    fn preceding_doc(&self, node: Node, content: &str) -> Option<String> {
        let mut sibling = node.prev_sibling();
        let mut lines = Vec::new();
        while let Some(s) = sibling {
            if s.kind().contains("comment") {
                lines.push(content[s.byte_range()].trim().to_string());
                sibling = s.prev_sibling();
            } else {
                break;
            }
        }
        if lines.is_empty() {
            None
        } else {
            lines.reverse();
            Some(lines.join("\n"))
        }
    }

    fn walk(
        &self,
        node: Node,
        content: &str,
        file_id: FileId,
        container: Option<&str>,
        symbols: &mut Vec<Symbol>,
        imports: &mut Vec<ImportEdge>,
        depth: usize,
    ) {
        if depth > 512 {
            tracing::warn!(language = self.grammar.tag, "generic extractor hit max recursion depth, truncating subtree");
            return;
        }

        let kind = node.kind();
        let mut next_container = container.map(str::to_string);

        if let Some(symbol_kind) = self.symbol_kind_for(kind) {
            if let Some(name) = self.node_name(node, content) {
                let range = Range::new(
                    node.start_position().row as u32 + 1,
                    node.start_position().column as u16,
                    node.end_position().row as u32 + 1,
                    node.end_position().column as u16,
                );
                let mut symbol = Symbol::new(file_id, name, symbol_kind.clone(), range)
                    .with_signature(self.node_signature(node, content));
                if let Some(doc) = self.preceding_doc(node, content) {
                    symbol = symbol.with_doc(doc);
                }
                if let Some(c) = container {
                    symbol = symbol.with_container(c);
                }
                symbols.push(symbol);

                if self.grammar.container_nodes.contains(&kind) {
                    next_container = Some(name.to_string());
                }
            }
        } else if self.grammar.container_nodes.contains(&kind) {
            if let Some(name) = self.container_name(node, content) {
                next_container = Some(name.to_string());
            }
        }

        if self.grammar.import_nodes.contains(&kind) {
            imports.push(ImportEdge {
                file_id,
                module_path: content[node.byte_range()].trim().to_string(),
                imported_name: None,
                alias: None,
                line: node.start_position().row as u32 + 1,
                is_relative: false,
            });
        }

        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            self.walk(
                child,
                content,
                file_id,
                next_container.as_deref(),
                symbols,
                imports,
                depth + 1,
            );
        }
    }
}

impl Plugin for GenericTreeExtractor {
    fn extensions(&self) -> &'static [&'static str] {
        self.grammar.extensions
    }

    fn language_tag(&self) -> Language {
        Language::new(self.grammar.tag)
    }

    fn parse(&self, file_id: FileId, path: &str, content: &str) -> Result<ParseResult, PluginError> {
        let tree = {
            let mut parser = self.parser.lock();
            parser.parse(content, None)
        }
        .ok_or_else(|| PluginError::ParseFailed {
            language: self.grammar.tag.to_string(),
            path: std::path::PathBuf::from(path),
            reason: "tree-sitter returned no parse tree".to_string(),
        })?;

        let mut symbols = Vec::new();
        let mut imports = Vec::new();
        self.walk(tree.root_node(), content, file_id, None, &mut symbols, &mut imports, 0);

        Ok(ParseResult {
            symbols,
            imports,
            references: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::grammar;

    #[test]
    fn extracts_a_rust_function_with_doc_comment() {
        let extractor = GenericTreeExtractor::new(&grammar::RUST).unwrap();
        let source = "/// Greets the caller.\nfn greet(name: &str) {\n    println!(\"{}\", name);\n}\n";
        let result = extractor.parse(FileId(1), "x.rs", source).unwrap();
        let greet = result.symbols.iter().find(|s| s.name == "greet").unwrap();
        assert_eq!(greet.range.start_line, 2);
        assert_eq!(greet.doc.as_deref(), Some("/// Greets the caller."));
        assert!(greet.signature.as_deref().unwrap().starts_with("fn greet"));
    }

    #[test]
    fn tracks_container_for_nested_methods() {
        let extractor = GenericTreeExtractor::new(&grammar::RUST).unwrap();
        let source = "struct Greeter;\nimpl Greeter {\n    fn greet(&self) {}\n}\n";
        let result = extractor.parse(FileId(1), "x.rs", source).unwrap();
        let greet = result.symbols.iter().find(|s| s.name == "greet").unwrap();
        assert_eq!(greet.container.as_deref(), Some("Greeter"));
    }

    #[test]
    fn parse_is_pure_across_repeated_calls() {
        let extractor = GenericTreeExtractor::new(&grammar::PYTHON).unwrap();
        let source = "def greet(name):\n    return name\n";
        let a = extractor.parse(FileId(1), "x.py", source).unwrap();
        let b = extractor.parse(FileId(1), "x.py", source).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn extracts_python_class_and_function() {
        let extractor = GenericTreeExtractor::new(&grammar::PYTHON).unwrap();
        let source = "def greet(name):\n    return name\n";
        let result = extractor.parse(FileId(1), "x.py", source).unwrap();
        assert_eq!(result.symbols.len(), 1);
        assert_eq!(result.symbols[0].name, "greet");
        assert_eq!(result.symbols[0].range.start_line, 1);
    }
}
