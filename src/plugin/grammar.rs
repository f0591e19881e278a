//! Per-language `tree-sitter` grammar registration and the small
//! node-type-to-symbol-kind mapping tables the generic extractor walks
//! against (§4.3 "Two shapes" — generic tree extractor).

use tree_sitter::Language as TsLanguage;

use crate::types::SymbolKind;

/// A node kind that introduces a symbol, paired with the kind it produces.
pub struct NodeMapping {
    pub node_kind: &'static str,
    pub symbol_kind: SymbolKind,
}

/// Everything the generic extractor needs to walk one language's tree:
/// the compiled grammar, which node kinds denote symbols, and which node
/// kinds establish a "container" (the enclosing class/impl/struct/module)
/// for nested symbols.
pub struct LanguageGrammar {
    pub tag: &'static str,
    pub extensions: &'static [&'static str],
    pub language: fn() -> TsLanguage,
    pub symbol_nodes: &'static [NodeMapping],
    pub container_nodes: &'static [&'static str],
    /// Node kinds the generic import-edge pass recurses into; not every
    /// grammar calls these "import" the same way.
    pub import_nodes: &'static [&'static str],
}

macro_rules! mapping {
    ($($node:literal => $kind:expr),+ $(,)?) => {
        &[$(NodeMapping { node_kind: $node, symbol_kind: $kind }),+]
    };
}

fn rust_language() -> TsLanguage {
    tree_sitter_rust::LANGUAGE.into()
}

fn python_language() -> TsLanguage {
    tree_sitter_python::LANGUAGE.into()
}

fn javascript_language() -> TsLanguage {
    tree_sitter_javascript::LANGUAGE.into()
}

fn typescript_language() -> TsLanguage {
    tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()
}

fn go_language() -> TsLanguage {
    tree_sitter_go::LANGUAGE.into()
}

pub const RUST: LanguageGrammar = LanguageGrammar {
    tag: "rust",
    extensions: &["rs"],
    language: rust_language,
    symbol_nodes: mapping![
        "function_item" => SymbolKind::Function,
        "struct_item" => SymbolKind::Type,
        "enum_item" => SymbolKind::Enum,
        "trait_item" => SymbolKind::Trait,
        "const_item" => SymbolKind::Constant,
        "static_item" => SymbolKind::Constant,
        "mod_item" => SymbolKind::Module,
        "type_item" => SymbolKind::Type,
        "field_declaration" => SymbolKind::Field,
    ],
    container_nodes: &["struct_item", "enum_item", "trait_item", "impl_item", "mod_item"],
    import_nodes: &["use_declaration"],
};

pub const PYTHON: LanguageGrammar = LanguageGrammar {
    tag: "python",
    extensions: &["py", "pyi"],
    language: python_language,
    symbol_nodes: mapping![
        "function_definition" => SymbolKind::Function,
        "class_definition" => SymbolKind::Class,
    ],
    container_nodes: &["class_definition"],
    import_nodes: &["import_statement", "import_from_statement"],
};

pub const JAVASCRIPT: LanguageGrammar = LanguageGrammar {
    tag: "javascript",
    extensions: &["js", "jsx", "mjs", "cjs"],
    language: javascript_language,
    symbol_nodes: mapping![
        "function_declaration" => SymbolKind::Function,
        "class_declaration" => SymbolKind::Class,
        "method_definition" => SymbolKind::Method,
    ],
    container_nodes: &["class_declaration", "class_body"],
    import_nodes: &["import_statement"],
};

pub const TYPESCRIPT: LanguageGrammar = LanguageGrammar {
    tag: "typescript",
    extensions: &["ts", "tsx", "mts", "cts"],
    language: typescript_language,
    symbol_nodes: mapping![
        "function_declaration" => SymbolKind::Function,
        "class_declaration" => SymbolKind::Class,
        "method_definition" => SymbolKind::Method,
        "interface_declaration" => SymbolKind::Interface,
        "type_alias_declaration" => SymbolKind::Type,
        "enum_declaration" => SymbolKind::Enum,
    ],
    container_nodes: &["class_declaration", "class_body", "interface_declaration"],
    import_nodes: &["import_statement"],
};

pub const GO: LanguageGrammar = LanguageGrammar {
    tag: "go",
    extensions: &["go"],
    language: go_language,
    symbol_nodes: mapping![
        "function_declaration" => SymbolKind::Function,
        "method_declaration" => SymbolKind::Method,
        "type_declaration" => SymbolKind::Type,
        "const_declaration" => SymbolKind::Constant,
    ],
    container_nodes: &["type_declaration"],
    import_nodes: &["import_declaration"],
};

pub const ALL: &[&LanguageGrammar] = &[&RUST, &PYTHON, &JAVASCRIPT, &TYPESCRIPT, &GO];

pub fn by_extension(ext: &str) -> Option<&'static LanguageGrammar> {
    let lower = ext.to_ascii_lowercase();
    ALL.iter().copied().find(|g| g.extensions.contains(&lower.as_str()))
}

pub fn by_tag(tag: &str) -> Option<&'static LanguageGrammar> {
    ALL.iter().copied().find(|g| g.tag == tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_grammar_compiles_a_language() {
        for grammar in ALL {
            let _ = (grammar.language)();
        }
    }

    #[test]
    fn by_extension_finds_rust() {
        assert_eq!(by_extension("rs").unwrap().tag, "rust");
        assert_eq!(by_extension("RS").unwrap().tag, "rust");
    }

    #[test]
    fn by_tag_finds_typescript() {
        assert_eq!(by_tag("typescript").unwrap().extensions, &["ts", "tsx", "mts", "cts"]);
    }
}
