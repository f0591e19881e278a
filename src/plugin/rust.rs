//! Specialized Rust extractor (§4.3 "Specialized extractor"): the generic
//! tree extractor's symbol set, plus recursive `use` tree resolution so
//! multi-segment and grouped imports (`use foo::{bar, baz as qux}`) resolve
//! to one [`ImportEdge`] per leaf rather than one opaque blob per
//! statement. Grounded on the teacher's `RustParser::extract_use_tree`.

use parking_lot::Mutex;
use tree_sitter::{Node, Parser};

use crate::error::PluginError;
use crate::plugin::generic::GenericTreeExtractor;
use crate::plugin::grammar;
use crate::plugin::{ParseResult, Plugin};
use crate::symbol::ImportEdge;
use crate::types::{FileId, Language};

pub struct RustPlugin {
    generic: GenericTreeExtractor,
    parser: Mutex<Parser>,
}

impl RustPlugin {
    pub fn new() -> Result<Self, PluginError> {
        let generic = GenericTreeExtractor::new(&grammar::RUST)?;
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_rust::LANGUAGE.into())
            .map_err(|e| PluginError::ParseFailed {
                language: "rust".to_string(),
                path: std::path::PathBuf::new(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            generic,
            parser: Mutex::new(parser),
        })
    }

    fn extract_imports(&self, content: &str, file_id: FileId) -> Vec<ImportEdge> {
        let tree = {
            let mut parser = self.parser.lock();
            parser.parse(content, None)
        };
        let Some(tree) = tree else {
            return Vec::new();
        };
        let mut imports = Vec::new();
        collect_use_declarations(tree.root_node(), content, file_id, &mut imports);
        imports
    }
}

fn collect_use_declarations(node: Node, content: &str, file_id: FileId, imports: &mut Vec<ImportEdge>) {
    if node.kind() == "use_declaration" {
        if let Some(tree) = node.children(&mut node.walk()).find(|n| n.kind() == "use_tree") {
            let line = node.start_position().row as u32 + 1;
            walk_use_tree(tree, content, file_id, line, String::new(), imports);
        }
        return;
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_use_declarations(child, content, file_id, imports);
    }
}

fn walk_use_tree(
    node: Node,
    content: &str,
    file_id: FileId,
    line: u32,
    prefix: String,
    imports: &mut Vec<ImportEdge>,
) {
    let mut path = prefix.clone();
    for child in node.children(&mut node.walk()) {
        match child.kind() {
            "identifier" | "scoped_identifier" | "crate" | "self" | "super" => {
                let segment = &content[child.byte_range()];
                if !path.is_empty() {
                    path.push_str("::");
                }
                path.push_str(segment);
            }
            "use_as_clause" => {
                let alias = child
                    .child_by_field_name("alias")
                    .or_else(|| child.child_by_field_name("path"))
                    .map(|n| content[n.byte_range()].to_string());
                imports.push(ImportEdge {
                    file_id,
                    module_path: path.clone(),
                    imported_name: None,
                    alias,
                    line,
                    is_relative: path.starts_with("self") || path.starts_with("super"),
                });
                return;
            }
            "use_wildcard" => {
                imports.push(ImportEdge {
                    file_id,
                    module_path: path.clone(),
                    imported_name: Some("*".to_string()),
                    alias: None,
                    line,
                    is_relative: path.starts_with("self") || path.starts_with("super"),
                });
                return;
            }
            "use_list" => {
                for item in child.children(&mut child.walk()) {
                    if item.kind() == "use_tree" {
                        walk_use_tree(item, content, file_id, line, path.clone(), imports);
                    }
                }
                return;
            }
            _ => {}
        }
    }

    if !path.is_empty() && path != prefix {
        let (module_path, imported_name) = match path.rsplit_once("::") {
            Some((module, leaf)) => (module.to_string(), Some(leaf.to_string())),
            None => (path.clone(), None),
        };
        imports.push(ImportEdge {
            file_id,
            module_path,
            imported_name,
            alias: None,
            line,
            is_relative: path.starts_with("self") || path.starts_with("super"),
        });
    }
}

impl Plugin for RustPlugin {
    fn extensions(&self) -> &'static [&'static str] {
        grammar::RUST.extensions
    }

    fn language_tag(&self) -> Language {
        Language::new("rust")
    }

    fn parse(&self, file_id: FileId, path: &str, content: &str) -> Result<ParseResult, PluginError> {
        let mut result = self.generic.parse(file_id, path, content)?;
        result.imports = self.extract_imports(content, file_id);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_grouped_use_statement_into_one_edge_per_leaf() {
        let plugin = RustPlugin::new().unwrap();
        let source = "use std::collections::{HashMap, HashSet as Set};\n";
        let result = plugin.parse(FileId(1), "x.rs", source).unwrap();
        assert_eq!(result.imports.len(), 2);
        assert!(
            result
                .imports
                .iter()
                .any(|i| i.imported_name.as_deref() == Some("HashMap"))
        );
        let aliased = result
            .imports
            .iter()
            .find(|i| i.alias.as_deref() == Some("Set"))
            .unwrap();
        assert_eq!(aliased.module_path, "std::collections::HashSet");
    }

    #[test]
    fn resolves_glob_import() {
        let plugin = RustPlugin::new().unwrap();
        let source = "use std::io::*;\n";
        let result = plugin.parse(FileId(1), "x.rs", source).unwrap();
        assert_eq!(result.imports.len(), 1);
        assert_eq!(result.imports[0].imported_name.as_deref(), Some("*"));
    }

    #[test]
    fn still_extracts_symbols_via_the_generic_pass() {
        let plugin = RustPlugin::new().unwrap();
        let source = "fn greet() {}\n";
        let result = plugin.parse(FileId(1), "x.rs", source).unwrap();
        assert_eq!(result.symbols.len(), 1);
        assert_eq!(result.symbols[0].name, "greet");
    }
}
