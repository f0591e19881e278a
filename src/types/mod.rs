//! Core identifier and position types shared across the crate.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Non-zero handle to a [`crate::storage::Repository`] row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepositoryId(pub i64);

/// Non-zero handle to a `files` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileId(pub i64);

/// Non-zero handle to a `symbols` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SymbolId(pub i64);

/// Non-zero handle to a `symbol_references` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReferenceId(pub i64);

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for SymbolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 1-indexed line/column range, half-open on neither end (both inclusive of
/// the symbol's own extent, matching tree-sitter's row/column reporting
/// once adjusted to 1-indexing).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub start_line: u32,
    pub start_col: u16,
    pub end_line: u32,
    pub end_col: u16,
}

impl Range {
    pub fn new(start_line: u32, start_col: u16, end_line: u32, end_col: u16) -> Self {
        Self {
            start_line,
            start_col,
            end_line,
            end_col,
        }
    }

    /// True when `other` is entirely within `self`, inclusive.
    pub fn contains(&self, other: &Range) -> bool {
        (self.start_line, self.start_col as u32) <= (other.start_line, other.start_col as u32)
            && (other.end_line, other.end_col as u32) <= (self.end_line, self.end_col as u32)
    }
}

/// The kinds of program entities a plugin can extract. Specialized plugins
/// may report `Other(tag)` for language-specific concepts that don't map
/// onto the generic set (decorators, framework route handlers, and so on).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Function,
    Class,
    Method,
    Variable,
    Constant,
    Type,
    Interface,
    Module,
    Trait,
    Enum,
    Field,
    Import,
    Other(String),
}

impl SymbolKind {
    pub fn as_str(&self) -> &str {
        match self {
            SymbolKind::Function => "function",
            SymbolKind::Class => "class",
            SymbolKind::Method => "method",
            SymbolKind::Variable => "variable",
            SymbolKind::Constant => "constant",
            SymbolKind::Type => "type",
            SymbolKind::Interface => "interface",
            SymbolKind::Module => "module",
            SymbolKind::Trait => "trait",
            SymbolKind::Enum => "enum",
            SymbolKind::Field => "field",
            SymbolKind::Import => "import",
            SymbolKind::Other(tag) => tag.as_str(),
        }
    }

    pub fn from_str_loose(s: &str) -> Self {
        match s {
            "function" => SymbolKind::Function,
            "class" => SymbolKind::Class,
            "method" => SymbolKind::Method,
            "variable" => SymbolKind::Variable,
            "constant" => SymbolKind::Constant,
            "type" => SymbolKind::Type,
            "interface" => SymbolKind::Interface,
            "module" => SymbolKind::Module,
            "trait" => SymbolKind::Trait,
            "enum" => SymbolKind::Enum,
            "field" => SymbolKind::Field,
            "import" => SymbolKind::Import,
            other => SymbolKind::Other(other.to_string()),
        }
    }
}

/// Non-defining occurrence kind for a [`crate::symbol::SymbolReference`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    Call,
    Read,
    Write,
    Import,
    Other,
}

impl ReferenceKind {
    pub fn as_str(&self) -> &str {
        match self {
            ReferenceKind::Call => "call",
            ReferenceKind::Read => "read",
            ReferenceKind::Write => "write",
            ReferenceKind::Import => "import",
            ReferenceKind::Other => "other",
        }
    }

    pub fn from_str_loose(s: &str) -> Self {
        match s {
            "call" => ReferenceKind::Call,
            "read" => ReferenceKind::Read,
            "write" => ReferenceKind::Write,
            "import" => ReferenceKind::Import,
            _ => ReferenceKind::Other,
        }
    }
}

/// A language tag, e.g. `"rust"`, `"python"`. Kept as a thin newtype rather
/// than a closed enum so the plugin registry can register languages that
/// only have a generic grammar and no specialized adapter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Language(pub String);

impl Language {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Language {
    fn from(s: &str) -> Self {
        Language::new(s)
    }
}

/// Move kind recorded in the append-only `file_moves` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveKind {
    Rename,
    Relocate,
    Restructure,
}

impl MoveKind {
    pub fn as_str(&self) -> &str {
        match self {
            MoveKind::Rename => "rename",
            MoveKind::Relocate => "relocate",
            MoveKind::Restructure => "restructure",
        }
    }

    /// Classify a rename by how much of the path changed: same directory is
    /// a rename, same basename in a different directory is a relocate,
    /// anything else is a restructure.
    pub fn classify(old_path: &str, new_path: &str) -> Self {
        let old = std::path::Path::new(old_path);
        let new = std::path::Path::new(new_path);
        let same_dir = old.parent() == new.parent();
        let same_name = old.file_name() == new.file_name();
        match (same_dir, same_name) {
            (true, _) => MoveKind::Rename,
            (false, true) => MoveKind::Relocate,
            (false, false) => MoveKind::Restructure,
        }
    }
}
