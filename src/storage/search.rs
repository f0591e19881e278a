//! BM25 full-text search, trigram-based fuzzy search, and the storage
//! engine's `health()` report (§4.2 "Key operations").

use rusqlite::params;

use crate::error::StorageError;
use crate::query::centered_snippet;
use crate::storage::schema::{EXPECTED_TABLES, table_exists};
use crate::storage::trigram::{edit_distance, trigrams};

/// Which FTS corpus a BM25 query runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Corpus {
    /// `fts_symbols`: symbol name + doc.
    Symbols,
    /// `fts_code`: file path + body.
    Code,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bm25Hit {
    pub path: String,
    pub snippet: String,
    /// Raw BM25 score from SQLite, already negated so higher is better.
    pub score: f64,
    pub language: Option<String>,
}

fn sqlite_err(operation: &'static str) -> impl Fn(rusqlite::Error) -> StorageError {
    move |source| StorageError::Sqlite { operation, source }
}

/// Replace the `fts_code` row for `relative_path` with `content` (§3 "FTS
/// corpus ... one over file content"). Called by the indexing worker
/// alongside `replace_symbols` so a file's text becomes phrase-searchable
/// independent of whether its language's plugin extracted any symbols
/// from it (§4.4 step 5 "Replace").
pub fn replace_file_body(
    conn: &rusqlite::Connection,
    relative_path: &str,
    content: &str,
) -> Result<(), StorageError> {
    conn.execute("DELETE FROM fts_code WHERE file_path = ?1", params![relative_path])
        .map_err(sqlite_err("replace_file_body_delete"))?;
    conn.execute(
        "INSERT INTO fts_code(file_path, body) VALUES (?1, ?2)",
        params![relative_path, content],
    )
    .map_err(sqlite_err("replace_file_body_insert"))?;
    Ok(())
}

/// Query the requested corpus. Per §4.2: "Tries the requested FTS table
/// first; if that table is absent (older schema), silently falls back to
/// the alternative BM25 content table. Never raises; returns empty on all
/// failures." `rusqlite`'s FTS5 `bm25()` returns lower-is-better; we negate
/// it so callers can treat every tier's score as higher-is-better.
pub fn search_bm25(
    conn: &rusqlite::Connection,
    query: &str,
    corpus: Corpus,
    limit: usize,
    offset: usize,
) -> Vec<Bm25Hit> {
    if query.trim().is_empty() {
        return Vec::new();
    }
    match try_search_bm25(conn, query, corpus, limit, offset) {
        Ok(hits) if !hits.is_empty() => hits,
        Ok(_) => {
            let alternative = match corpus {
                Corpus::Symbols => Corpus::Code,
                Corpus::Code => Corpus::Symbols,
            };
            try_search_bm25(conn, query, alternative, limit, offset).unwrap_or_default()
        }
        Err(e) => {
            tracing::warn!(error = %e, ?corpus, "bm25 search failed, returning empty");
            Vec::new()
        }
    }
}

fn try_search_bm25(
    conn: &rusqlite::Connection,
    query: &str,
    corpus: Corpus,
    limit: usize,
    offset: usize,
) -> Result<Vec<Bm25Hit>, StorageError> {
    match corpus {
        Corpus::Symbols => {
            if !table_exists(conn, "fts_symbols")? {
                return Err(StorageError::MissingTable { table: "fts_symbols" });
            }
            let mut stmt = conn
                .prepare(
                    "SELECT s.name, coalesce(s.doc, s.signature, ''), bm25(fts_symbols) AS rank,
                            f.relative_path, f.language
                     FROM fts_symbols
                     JOIN symbols s ON s.id = fts_symbols.rowid
                     JOIN files f ON f.id = s.file_id
                     WHERE fts_symbols MATCH ?1 AND f.is_deleted = 0
                     ORDER BY rank
                     LIMIT ?2 OFFSET ?3",
                )
                .map_err(sqlite_err("search_bm25_symbols"))?;
            let rows = stmt
                .query_map(params![query, limit as i64, offset as i64], |row| {
                    let path: String = row.get(3)?;
                    let snippet: String = row.get(1)?;
                    let rank: f64 = row.get(2)?;
                    let language: Option<String> = row.get(4)?;
                    Ok(Bm25Hit {
                        path,
                        // §4.6: centered on the match, matched token
                        // delimited — fts_symbols has no SQLite `snippet()`
                        // helper of its own to lean on (the body here is
                        // doc/signature text, not the indexed column
                        // SQLite would snippet against), so this is built
                        // the same way the generic/plugin tiers build
                        // theirs.
                        snippet: centered_snippet(&snippet, query, 160),
                        score: -rank,
                        language,
                    })
                })
                .map_err(sqlite_err("search_bm25_symbols"))?;
            rows.collect::<Result<Vec<_>, _>>().map_err(sqlite_err("search_bm25_symbols"))
        }
        Corpus::Code => {
            if !table_exists(conn, "fts_code")? {
                return Err(StorageError::MissingTable { table: "fts_code" });
            }
            let mut stmt = conn
                .prepare(
                    "SELECT fts_code.file_path, snippet(fts_code, 1, '\u{2023}', '\u{2023}', '...', 20) AS snip,
                            bm25(fts_code) AS rank, f.language
                     FROM fts_code
                     JOIN files f ON f.relative_path = fts_code.file_path
                     WHERE fts_code MATCH ?1 AND f.is_deleted = 0
                     ORDER BY rank
                     LIMIT ?2 OFFSET ?3",
                )
                .map_err(sqlite_err("search_bm25_code"))?;
            let rows = stmt
                .query_map(params![query, limit as i64, offset as i64], |row| {
                    let path: String = row.get(0)?;
                    let snippet: String = row.get(1)?;
                    let rank: f64 = row.get(2)?;
                    let language: Option<String> = row.get(3)?;
                    Ok(Bm25Hit {
                        path,
                        snippet: truncate_snippet(&snippet),
                        score: -rank,
                        language,
                    })
                })
                .map_err(sqlite_err("search_bm25_code"))?;
            rows.collect::<Result<Vec<_>, _>>().map_err(sqlite_err("search_bm25_code"))
        }
    }
}

/// Cap a snippet at 160 characters, per §4.6.
fn truncate_snippet(s: &str) -> String {
    if s.chars().count() <= 160 {
        s.to_string()
    } else {
        s.chars().take(157).collect::<String>() + "..."
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FuzzyHit {
    pub symbol_id: crate::types::SymbolId,
    pub name: String,
    pub distance: usize,
}

/// Trigram candidate generation followed by edit-distance rescoring
/// (§4.2 `search_fuzzy`). Never raises; an empty/short query yields no
/// trigrams and therefore no candidates.
pub fn search_fuzzy(conn: &rusqlite::Connection, name: &str, limit: usize) -> Vec<FuzzyHit> {
    match try_search_fuzzy(conn, name, limit) {
        Ok(hits) => hits,
        Err(e) => {
            tracing::warn!(error = %e, "fuzzy search failed, returning empty");
            Vec::new()
        }
    }
}

fn try_search_fuzzy(
    conn: &rusqlite::Connection,
    name: &str,
    limit: usize,
) -> Result<Vec<FuzzyHit>, StorageError> {
    let query_trigrams = trigrams(name);
    if query_trigrams.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders = query_trigrams.iter().map(|_| "?").collect::<Vec<_>>().join(",");
    let sql = format!(
        "SELECT st.symbol_id, s.name, COUNT(*) AS overlap
         FROM symbol_trigrams st
         JOIN symbols s ON s.id = st.symbol_id
         JOIN files f ON f.id = s.file_id
         WHERE st.trigram IN ({placeholders}) AND f.is_deleted = 0
         GROUP BY st.symbol_id
         ORDER BY overlap DESC
         LIMIT ?"
    );
    let mut stmt = conn.prepare(&sql).map_err(sqlite_err("search_fuzzy_candidates"))?;
    let mut params: Vec<&dyn rusqlite::ToSql> =
        query_trigrams.iter().map(|t| t as &dyn rusqlite::ToSql).collect();
    let candidate_pool = (limit * 8).max(50) as i64;
    params.push(&candidate_pool);

    let rows = stmt
        .query_map(params.as_slice(), |row| {
            Ok((
                crate::types::SymbolId(row.get(0)?),
                row.get::<_, String>(1)?,
            ))
        })
        .map_err(sqlite_err("search_fuzzy_candidates"))?;
    let candidates = rows.collect::<Result<Vec<_>, _>>().map_err(sqlite_err("search_fuzzy_candidates"))?;

    let mut scored: Vec<FuzzyHit> = candidates
        .into_iter()
        .map(|(symbol_id, candidate_name)| FuzzyHit {
            distance: edit_distance(name, &candidate_name),
            symbol_id,
            name: candidate_name,
        })
        .collect();
    scored.sort_by_key(|hit| hit.distance);
    scored.truncate(limit);
    Ok(scored)
}

#[derive(Debug, Clone)]
pub struct HealthReport {
    pub tables_present: bool,
    pub fts_available: bool,
    pub wal_enabled: bool,
    pub schema_version: u32,
    pub warnings: Vec<String>,
}

/// §4.2 `health()`: "report listing: all expected tables present, FTS
/// available, WAL enabled, schema version, any warning messages."
pub fn health(conn: &rusqlite::Connection) -> HealthReport {
    let mut warnings = Vec::new();

    let schema_version = crate::storage::migrations::current_version(conn).unwrap_or(0);
    if schema_version == 0 {
        warnings.push("schema_version singleton is missing or unset".to_string());
    }

    let mut tables_present = true;
    for table in EXPECTED_TABLES {
        match table_exists(conn, table) {
            Ok(true) => {}
            Ok(false) => {
                tables_present = false;
                warnings.push(format!("missing table '{table}'"));
            }
            Err(e) => {
                tables_present = false;
                warnings.push(format!("error checking table '{table}': {e}"));
            }
        }
    }

    let fts_available = table_exists(conn, "fts_symbols").unwrap_or(false)
        && table_exists(conn, "fts_code").unwrap_or(false);
    if !fts_available {
        warnings.push("FTS virtual tables unavailable".to_string());
    }

    let journal_mode: String = conn
        .query_row("PRAGMA journal_mode", [], |row| row.get(0))
        .unwrap_or_default();
    let wal_enabled = journal_mode.eq_ignore_ascii_case("wal");
    if !wal_enabled {
        warnings.push(format!("journal_mode is '{journal_mode}', expected WAL"));
    }

    HealthReport {
        tables_present,
        fts_available,
        wal_enabled,
        schema_version,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::migrations::{CURRENT_SCHEMA_VERSION, migrate_to};
    use crate::storage::repository::upsert_repository;
    use crate::storage::symbols::replace_symbols;
    use crate::symbol::Symbol;
    use crate::types::{Range, SymbolKind};
    use rusqlite::Connection;

    fn setup() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate_to(&mut conn, CURRENT_SCHEMA_VERSION).unwrap();
        conn
    }

    #[test]
    fn health_reports_wal_and_expected_tables() {
        let conn = setup();
        conn.pragma_update(None, "journal_mode", "WAL").unwrap();
        let report = health(&conn);
        assert!(report.tables_present);
        assert!(report.fts_available);
        assert_eq!(report.schema_version, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn bm25_symbol_search_finds_matching_name() {
        let conn = setup();
        let repo = upsert_repository(&conn, "h", "/tmp", None).unwrap();
        let (file_id, _) = crate::storage::files::upsert_file(&conn, repo, "x.py", "h1", Some("python"), 1, 0).unwrap();
        let sym = Symbol::new(file_id, "greet", SymbolKind::Function, Range::new(1, 0, 1, 10))
            .with_doc("Greets the caller");
        replace_symbols(&conn, file_id, &[sym], &[], &[]).unwrap();

        let hits = search_bm25(&conn, "greet", Corpus::Symbols, 10, 0);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, "x.py");
    }

    #[test]
    fn fuzzy_search_ranks_closer_names_first() {
        let conn = setup();
        let repo = upsert_repository(&conn, "h", "/tmp", None).unwrap();
        let (file_id, _) = crate::storage::files::upsert_file(&conn, repo, "x.py", "h1", Some("python"), 1, 0).unwrap();
        let greet = Symbol::new(file_id, "greet", SymbolKind::Function, Range::new(1, 0, 1, 10));
        let great = Symbol::new(file_id, "great", SymbolKind::Function, Range::new(2, 0, 2, 10));
        replace_symbols(&conn, file_id, &[greet, great], &[], &[]).unwrap();

        let hits = search_fuzzy(&conn, "greet", 10);
        assert!(!hits.is_empty());
        assert_eq!(hits[0].name, "greet");
    }

    #[test]
    fn empty_query_returns_no_results_without_error() {
        let conn = setup();
        assert!(search_bm25(&conn, "", Corpus::Symbols, 10, 0).is_empty());
    }
}
