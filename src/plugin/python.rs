//! Specialized Python extractor (§4.3): the generic tree extractor's
//! symbol set, plus `import`/`from ... import ...` resolution including
//! relative imports (`from . import x`, `from ..pkg import y`) and
//! docstring-as-doc-comment extraction (a Python function/class's first
//! statement, when it is a bare string literal, is its documentation —
//! unlike the generic extractor's "preceding comment" heuristic).

use parking_lot::Mutex;
use tree_sitter::{Node, Parser};

use crate::error::PluginError;
use crate::plugin::generic::GenericTreeExtractor;
use crate::plugin::grammar;
use crate::plugin::{ParseResult, Plugin};
use crate::symbol::ImportEdge;
use crate::types::{FileId, Language};

pub struct PythonPlugin {
    generic: GenericTreeExtractor,
    parser: Mutex<Parser>,
}

impl PythonPlugin {
    pub fn new() -> Result<Self, PluginError> {
        let generic = GenericTreeExtractor::new(&grammar::PYTHON)?;
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_python::LANGUAGE.into())
            .map_err(|e| PluginError::ParseFailed {
                language: "python".to_string(),
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
        collect_imports(tree.root_node(), content, file_id, &mut imports);
        imports
    }

    /// Fill in doc comments the generic pass missed: a Python doc string is
    /// the first statement in a function/class body, not a preceding
    /// comment, so the generic "preceding sibling comment" heuristic never
    /// finds it.
    fn attach_docstrings(&self, content: &str, file_id: FileId, result: &mut ParseResult) {
        let tree = {
            let mut parser = self.parser.lock();
            parser.parse(content, None)
        };
        let Some(tree) = tree else {
            return;
        };
        let mut docstrings = std::collections::HashMap::new();
        collect_docstrings(tree.root_node(), content, &mut docstrings);
        for symbol in &mut result.symbols {
            if symbol.doc.is_none() && symbol.file_id == file_id {
                if let Some(doc) = docstrings.get(&symbol.range.start_line) {
                    symbol.doc = Some(doc.clone());
                }
            }
        }
    }
}

fn collect_docstrings(node: Node, content: &str, out: &mut std::collections::HashMap<u32, String>) {
    if matches!(node.kind(), "function_definition" | "class_definition") {
        if let Some(body) = node.child_by_field_name("body") {
            if let Some(first_stmt) = body.named_child(0) {
                if first_stmt.kind() == "expression_statement" {
                    if let Some(string_node) = first_stmt.named_child(0) {
                        if string_node.kind() == "string" {
                            let line = node.start_position().row as u32 + 1;
                            let text = content[string_node.byte_range()].trim().to_string();
                            out.insert(line, text);
                        }
                    }
                }
            }
        }
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_docstrings(child, content, out);
    }
}

fn collect_imports(node: Node, content: &str, file_id: FileId, imports: &mut Vec<ImportEdge>) {
    let line = node.start_position().row as u32 + 1;
    match node.kind() {
        "import_statement" => {
            for child in node.named_children(&mut node.walk()) {
                match child.kind() {
                    "dotted_name" | "identifier" => imports.push(ImportEdge {
                        file_id,
                        module_path: content[child.byte_range()].to_string(),
                        imported_name: None,
                        alias: None,
                        line,
                        is_relative: false,
                    }),
                    "aliased_import" => {
                        let module = child
                            .child_by_field_name("name")
                            .map(|n| content[n.byte_range()].to_string())
                            .unwrap_or_default();
                        let alias = child
                            .child_by_field_name("alias")
                            .map(|n| content[n.byte_range()].to_string());
                        imports.push(ImportEdge {
                            file_id,
                            module_path: module,
                            imported_name: None,
                            alias,
                            line,
                            is_relative: false,
                        });
                    }
                    _ => {}
                }
            }
        }
        "import_from_statement" => {
            let module_node = node.child_by_field_name("module_name");
            let module_path = module_node
                .map(|n| content[n.byte_range()].to_string())
                .unwrap_or_default();
            let is_relative = module_path.starts_with('.');

            let mut saw_name = false;
            for child in node.named_children(&mut node.walk()) {
                match child.kind() {
                    "dotted_name" | "identifier" if Some(child) != module_node => {
                        saw_name = true;
                        imports.push(ImportEdge {
                            file_id,
                            module_path: module_path.clone(),
                            imported_name: Some(content[child.byte_range()].to_string()),
                            alias: None,
                            line,
                            is_relative,
                        });
                    }
                    "aliased_import" => {
                        saw_name = true;
                        let name = child
                            .child_by_field_name("name")
                            .map(|n| content[n.byte_range()].to_string());
                        let alias = child
                            .child_by_field_name("alias")
                            .map(|n| content[n.byte_range()].to_string());
                        imports.push(ImportEdge {
                            file_id,
                            module_path: module_path.clone(),
                            imported_name: name,
                            alias,
                            line,
                            is_relative,
                        });
                    }
                    "wildcard_import" => {
                        saw_name = true;
                        imports.push(ImportEdge {
                            file_id,
                            module_path: module_path.clone(),
                            imported_name: Some("*".to_string()),
                            alias: None,
                            line,
                            is_relative,
                        });
                    }
                    _ => {}
                }
            }
            if !saw_name && !module_path.is_empty() {
                imports.push(ImportEdge {
                    file_id,
                    module_path,
                    imported_name: None,
                    alias: None,
                    line,
                    is_relative,
                });
            }
        }
        _ => {}
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_imports(child, content, file_id, imports);
    }
}

impl Plugin for PythonPlugin {
    fn extensions(&self) -> &'static [&'static str] {
        grammar::PYTHON.extensions
    }

    fn language_tag(&self) -> Language {
        Language::new("python")
    }

    fn parse(&self, file_id: FileId, path: &str, content: &str) -> Result<ParseResult, PluginError> {
        let mut result = self.generic.parse(file_id, path, content)?;
        result.imports = self.extract_imports(content, file_id);
        self.attach_docstrings(content, file_id, &mut result);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cold_lookup_scenario_extracts_greet_at_line_one() {
        let plugin = PythonPlugin::new().unwrap();
        let source = "def greet(name):\n    return f\"hello {name}\"\n";
        let result = plugin.parse(FileId(1), "src/x.py", source).unwrap();
        assert_eq!(result.symbols.len(), 1);
        assert_eq!(result.symbols[0].name, "greet");
        assert_eq!(result.symbols[0].range.start_line, 1);
        assert_eq!(result.symbols[0].kind, crate::types::SymbolKind::Function);
    }

    #[test]
    fn resolves_relative_from_import() {
        let plugin = PythonPlugin::new().unwrap();
        let source = "from . import utils\nfrom ..pkg import helper as h\n";
        let result = plugin.parse(FileId(1), "x.py", source).unwrap();
        assert_eq!(result.imports.len(), 2);
        assert!(result.imports.iter().all(|i| i.is_relative));
        let aliased = result.imports.iter().find(|i| i.alias.as_deref() == Some("h")).unwrap();
        assert_eq!(aliased.imported_name.as_deref(), Some("helper"));
    }

    #[test]
    fn attaches_docstring_as_doc() {
        let plugin = PythonPlugin::new().unwrap();
        let source = "def greet(name):\n    \"\"\"Greets the caller.\"\"\"\n    return name\n";
        let result = plugin.parse(FileId(1), "x.py", source).unwrap();
        let greet = result.symbols.iter().find(|s| s.name == "greet").unwrap();
        assert_eq!(greet.doc.as_deref(), Some("\"\"\"Greets the caller.\"\"\""));
    }
}
