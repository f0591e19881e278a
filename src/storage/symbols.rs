//! Symbol and reference persistence: `replace_symbols` and lookups by name
//! or file (§3 Symbol, Symbol reference; §4.2 "`replace_symbols`").

use rusqlite::params;

use crate::error::StorageError;
use crate::symbol::{ImportEdge, Symbol, SymbolReference};
use crate::types::{FileId, SymbolId, SymbolKind};

fn sqlite_err(operation: &'static str) -> impl Fn(rusqlite::Error) -> StorageError {
    move |source| StorageError::Sqlite { operation, source }
}

/// Delete every prior `symbols`/`symbol_references`/`imports` row for
/// `file_id`, insert the freshly extracted ones, and maintain the trigram
/// table — all inside the caller's transaction. FTS is kept in sync by the
/// triggers on `symbols` (§4.2 schema). This is the single place a file's
/// symbol set is replaced; a file's symbols live and die with its current
/// version (§3 Lifecycle).
pub fn replace_symbols(
    conn: &rusqlite::Connection,
    file_id: FileId,
    symbols: &[Symbol],
    references: &[SymbolReference],
    imports: &[ImportEdge],
) -> Result<Vec<SymbolId>, StorageError> {
    conn.execute(
        "DELETE FROM symbol_trigrams WHERE symbol_id IN (SELECT id FROM symbols WHERE file_id = ?1)",
        params![file_id.0],
    )
    .map_err(sqlite_err("replace_symbols_delete_trigrams"))?;
    conn.execute("DELETE FROM symbols WHERE file_id = ?1", params![file_id.0])
        .map_err(sqlite_err("replace_symbols_delete_symbols"))?;
    conn.execute(
        "DELETE FROM symbol_references WHERE file_id = ?1",
        params![file_id.0],
    )
    .map_err(sqlite_err("replace_symbols_delete_references"))?;
    conn.execute("DELETE FROM imports WHERE file_id = ?1", params![file_id.0])
        .map_err(sqlite_err("replace_symbols_delete_imports"))?;

    let mut inserted_ids = Vec::with_capacity(symbols.len());
    for symbol in symbols {
        conn.execute(
            "INSERT INTO symbols(file_id, name, kind, start_line, start_col, end_line, end_col, signature, doc, container)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                file_id.0,
                symbol.name,
                symbol.kind.as_str(),
                symbol.range.start_line,
                symbol.range.start_col,
                symbol.range.end_line,
                symbol.range.end_col,
                symbol.signature,
                symbol.doc,
                symbol.container,
            ],
        )
        .map_err(sqlite_err("replace_symbols_insert_symbol"))?;
        let id = SymbolId(conn.last_insert_rowid());
        inserted_ids.push(id);

        for trigram in crate::storage::trigram::trigrams(&symbol.name) {
            conn.execute(
                "INSERT INTO symbol_trigrams(symbol_id, trigram) VALUES (?1, ?2)",
                params![id.0, trigram],
            )
            .map_err(sqlite_err("replace_symbols_insert_trigram"))?;
        }
    }

    for reference in references {
        conn.execute(
            "INSERT INTO symbol_references(symbol_name, file_id, line, column, kind)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                reference.symbol_name,
                reference.file_id.0,
                reference.line,
                reference.column,
                reference.kind.as_str(),
            ],
        )
        .map_err(sqlite_err("replace_symbols_insert_reference"))?;
    }

    for import in imports {
        conn.execute(
            "INSERT INTO imports(file_id, module_path, imported_name, alias, line, is_relative)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                import.file_id.0,
                import.module_path,
                import.imported_name,
                import.alias,
                import.line,
                import.is_relative as i64,
            ],
        )
        .map_err(sqlite_err("replace_symbols_insert_import"))?;
    }

    Ok(inserted_ids)
}

fn row_to_symbol(row: &rusqlite::Row) -> rusqlite::Result<Symbol> {
    Ok(Symbol {
        id: SymbolId(row.get(0)?),
        file_id: FileId(row.get(1)?),
        name: row.get(2)?,
        kind: SymbolKind::from_str_loose(&row.get::<_, String>(3)?),
        range: crate::types::Range::new(row.get(4)?, row.get(5)?, row.get(6)?, row.get(7)?),
        signature: row.get(8)?,
        doc: row.get(9)?,
        container: row.get(10)?,
    })
}

const SYMBOL_COLUMNS: &str =
    "id, file_id, name, kind, start_line, start_col, end_line, end_col, signature, doc, container";

/// Exact-name lookup against non-deleted files, ordered so the first match
/// is the best candidate the symbol table itself can offer (shortest
/// container path, then lowest id for determinism). This is the "symbol
/// table first" half of `lookup` (§4.1).
pub fn find_symbols_by_name(
    conn: &rusqlite::Connection,
    name: &str,
    limit: usize,
) -> Result<Vec<(Symbol, String)>, StorageError> {
    let sql = format!(
        "SELECT s.{cols}, f.relative_path
         FROM symbols s JOIN files f ON f.id = s.file_id
         WHERE s.name = ?1 AND f.is_deleted = 0
         ORDER BY s.id ASC
         LIMIT ?2",
        cols = SYMBOL_COLUMNS
    );
    let mut stmt = conn.prepare(&sql).map_err(sqlite_err("find_symbols_by_name"))?;
    let rows = stmt
        .query_map(params![name, limit as i64], |row| {
            let symbol = row_to_symbol(row)?;
            let path: String = row.get(11)?;
            Ok((symbol, path))
        })
        .map_err(sqlite_err("find_symbols_by_name"))?;
    rows.collect::<Result<Vec<_>, _>>().map_err(sqlite_err("find_symbols_by_name"))
}

pub fn symbols_for_file(conn: &rusqlite::Connection, file_id: FileId) -> Result<Vec<Symbol>, StorageError> {
    let sql = format!("SELECT {SYMBOL_COLUMNS} FROM symbols WHERE file_id = ?1 ORDER BY start_line ASC");
    let mut stmt = conn.prepare(&sql).map_err(sqlite_err("symbols_for_file"))?;
    let rows = stmt
        .query_map(params![file_id.0], row_to_symbol)
        .map_err(sqlite_err("symbols_for_file"))?;
    rows.collect::<Result<Vec<_>, _>>().map_err(sqlite_err("symbols_for_file"))
}

/// Non-defining occurrences of `name`, joined against the owning file's
/// path so callers don't need a second round-trip.
pub fn find_references(
    conn: &rusqlite::Connection,
    name: &str,
    limit: usize,
) -> Result<Vec<(SymbolReference, String)>, StorageError> {
    let mut stmt = conn
        .prepare(
            "SELECT r.id, r.symbol_name, r.file_id, r.line, r.column, r.kind, f.relative_path
             FROM symbol_references r JOIN files f ON f.id = r.file_id
             WHERE r.symbol_name = ?1 AND f.is_deleted = 0
             ORDER BY f.relative_path ASC, r.line ASC
             LIMIT ?2",
        )
        .map_err(sqlite_err("find_references"))?;
    let rows = stmt
        .query_map(params![name, limit as i64], |row| {
            let reference = SymbolReference {
                id: crate::types::ReferenceId(row.get(0)?),
                symbol_name: row.get(1)?,
                file_id: FileId(row.get(2)?),
                line: row.get(3)?,
                column: row.get(4)?,
                kind: crate::types::ReferenceKind::from_str_loose(&row.get::<_, String>(5)?),
            };
            let path: String = row.get(6)?;
            Ok((reference, path))
        })
        .map_err(sqlite_err("find_references"))?;
    rows.collect::<Result<Vec<_>, _>>().map_err(sqlite_err("find_references"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::migrations::{CURRENT_SCHEMA_VERSION, migrate_to};
    use crate::storage::repository::upsert_repository;
    use crate::types::{ReferenceKind, SymbolId};
    use rusqlite::Connection;

    fn setup() -> (Connection, FileId) {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate_to(&mut conn, CURRENT_SCHEMA_VERSION).unwrap();
        let repo = upsert_repository(&conn, "hash", "/tmp/repo", None).unwrap();
        let (file_id, _) = crate::storage::files::upsert_file(&conn, repo, "src/x.py", "h1", Some("python"), 10, 0).unwrap();
        (conn, file_id)
    }

    #[test]
    fn replace_symbols_clears_prior_rows_for_the_file() {
        let (conn, file_id) = setup();
        let sym = Symbol::new(file_id, "greet", SymbolKind::Function, crate::types::Range::new(1, 0, 1, 20));
        replace_symbols(&conn, file_id, &[sym], &[], &[]).unwrap();
        assert_eq!(symbols_for_file(&conn, file_id).unwrap().len(), 1);

        let sym2 = Symbol::new(file_id, "farewell", SymbolKind::Function, crate::types::Range::new(3, 0, 3, 20));
        replace_symbols(&conn, file_id, &[sym2], &[], &[]).unwrap();
        let remaining = symbols_for_file(&conn, file_id).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].name, "farewell");
    }

    #[test]
    fn find_symbols_by_name_matches_exact_name() {
        let (conn, file_id) = setup();
        let sym = Symbol::new(file_id, "greet", SymbolKind::Function, crate::types::Range::new(1, 0, 1, 20));
        replace_symbols(&conn, file_id, &[sym], &[], &[]).unwrap();
        let found = find_symbols_by_name(&conn, "greet", 10).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].1, "src/x.py");
    }

    #[test]
    fn find_references_returns_rows_for_symbol_name() {
        let (conn, file_id) = setup();
        let reference = SymbolReference {
            id: crate::types::ReferenceId(0),
            symbol_name: "greet".into(),
            file_id,
            line: 5,
            column: 2,
            kind: ReferenceKind::Call,
        };
        replace_symbols(&conn, file_id, &[], std::slice::from_ref(&reference), &[]).unwrap();
        let found = find_references(&conn, "greet", 10).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0.line, 5);
        let _ = SymbolId(0);
    }
}
