//! Full-text search over atom content
//!
//! Backed by an external-content FTS5 table that tracks non-deleted atoms
//! through conditional triggers, so results can never include tombstoned
//! content. The default mode treats input as plain words (escaped, AND-ed);
//! raw mode passes FTS5 query syntax through and surfaces syntax errors as
//! a typed failure instead of a generic database error.

use std::sync::Arc;

use rusqlite::{ErrorCode, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::atom::{AtomId, AtomKind};
use crate::storage::{Store, StoreError};

/// Result count when a query does not specify one.
pub const DEFAULT_SEARCH_LIMIT: u32 = 20;
/// Hard cap on result count.
pub const MAX_SEARCH_LIMIT: u32 = 100;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    /// Raw-mode query that FTS5 rejected.
    #[error("invalid search query {query:?}: {message}")]
    InvalidQuery { query: String, message: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("corrupt search row: {0}")]
    Corrupt(String),
}

impl From<rusqlite::Error> for SearchError {
    fn from(err: rusqlite::Error) -> Self {
        SearchError::Store(StoreError::from(err))
    }
}

pub type SearchResult<T> = std::result::Result<T, SearchError>;

// ============================================================================
// QUERY AND HITS
// ============================================================================

/// A search request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    /// User text. Blank input yields no results rather than an error.
    pub text: String,
    /// Restrict hits to one atom kind.
    pub kind: Option<AtomKind>,
    /// Maximum hits; 0 means the default page size.
    pub limit: u32,
    /// Pass `text` to FTS5 verbatim instead of escaping it.
    pub raw: bool,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: None,
            limit: DEFAULT_SEARCH_LIMIT,
            raw: false,
        }
    }
}

/// One search hit, best match first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub atom_id: AtomId,
    pub kind: AtomKind,
    /// Content excerpt with matches wrapped in `[` `]`.
    pub snippet: String,
}

// ============================================================================
// INDEX
// ============================================================================

/// Query surface over the FTS5 index. The index itself is maintained by
/// storage triggers; this type only reads.
pub struct SearchIndex {
    store: Arc<Store>,
}

impl SearchIndex {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Runs a search. Results are ranked by bm25, with recency and id as
    /// deterministic tie-breaks.
    pub fn search(&self, query: &SearchQuery) -> SearchResult<Vec<SearchHit>> {
        let match_expr = if query.raw {
            query.text.trim().to_string()
        } else {
            build_match_expression(&query.text)
        };
        if match_expr.is_empty() || query.limit == 0 {
            return Ok(Vec::new());
        }
        let limit = query.limit.min(MAX_SEARCH_LIMIT);

        let conn = self.store.lock()?;
        let mut stmt = conn.prepare(
            "SELECT a.uuid, a.kind, snippet(atoms_fts, 0, '[', ']', ' ... ', 10)
             FROM atoms_fts
             JOIN atoms a ON a.rowid = atoms_fts.rowid
             WHERE atoms_fts MATCH ?1
               AND a.is_deleted = 0
               AND (?2 IS NULL OR a.kind = ?2)
             ORDER BY bm25(atoms_fts), a.updated_at DESC, a.uuid ASC
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            params![match_expr, query.kind.map(|k| k.as_str()), limit],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        );

        let rows = match rows {
            Ok(rows) => rows,
            Err(err) if is_match_syntax_error(&err) => {
                return Err(SearchError::InvalidQuery {
                    query: query.text.clone(),
                    message: err.to_string(),
                });
            }
            Err(err) => return Err(SearchError::Store(StoreError::from(err))),
        };

        let mut hits = Vec::new();
        for row in rows {
            let (uuid, kind, snippet) = match row {
                Ok(values) => values,
                Err(err) if is_match_syntax_error(&err) => {
                    return Err(SearchError::InvalidQuery {
                        query: query.text.clone(),
                        message: err.to_string(),
                    });
                }
                Err(err) => return Err(SearchError::Store(StoreError::from(err))),
            };
            hits.push(SearchHit {
                atom_id: Uuid::parse_str(&uuid)
                    .map_err(|_| SearchError::Corrupt(format!("bad uuid {uuid:?}")))?,
                kind: AtomKind::parse_name(&kind)
                    .ok_or_else(|| SearchError::Corrupt(format!("bad kind {kind:?}")))?,
                snippet,
            });
        }

        debug!(query = %query.text, hits = hits.len(), "search completed");
        Ok(hits)
    }

    /// Number of rows currently indexed. Diagnostic surface for tests and
    /// integrity checks.
    ///
    /// `COUNT(*)` on an external-content FTS5 table is answered from the
    /// content table, not the index, so this counts the docsize shadow table
    /// instead - one row per indexed document.
    pub fn indexed_rows(&self) -> SearchResult<u64> {
        let conn = self.store.lock()?;
        let count: Option<i64> = conn
            .query_row("SELECT COUNT(*) FROM atoms_fts_docsize", [], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(count.unwrap_or(0) as u64)
    }
}

// ============================================================================
// QUERY BUILDING
// ============================================================================

/// Escapes user text into an FTS5 MATCH expression: each whitespace-separated
/// term becomes a quoted string (embedded quotes doubled), AND-ed together.
/// FTS5 operators in the input are matched literally, never interpreted.
fn build_match_expression(text: &str) -> String {
    text.split_whitespace()
        .map(|term| format!("\"{}\"", term.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// FTS5 reports bad MATCH syntax as a generic SQLITE_ERROR; telling it apart
/// from real database failures requires inspecting the message.
fn is_match_syntax_error(err: &rusqlite::Error) -> bool {
    if let rusqlite::Error::SqliteFailure(inner, Some(message)) = err {
        if inner.code == ErrorCode::Unknown || inner.extended_code == 1 {
            let lower = message.to_lowercase();
            return lower.contains("fts5")
                || lower.contains("malformed match expression")
                || lower.contains("unterminated string")
                || lower.contains("syntax error");
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_expression_quotes_terms() {
        assert_eq!(build_match_expression("hello"), "\"hello\"");
        assert_eq!(
            build_match_expression("  rust  sqlite "),
            "\"rust\" AND \"sqlite\""
        );
    }

    #[test]
    fn match_expression_neutralizes_operators() {
        assert_eq!(
            build_match_expression("a OR b"),
            "\"a\" AND \"OR\" AND \"b\""
        );
        assert_eq!(build_match_expression("say \"hi\""), "\"say\" AND \"\"\"hi\"\"\"");
    }

    #[test]
    fn blank_text_builds_empty_expression() {
        assert_eq!(build_match_expression(""), "");
        assert_eq!(build_match_expression("   \t"), "");
    }

    #[test]
    fn sqlite_errors_classify_through_the_store_layer() {
        let err = rusqlite::Error::QueryReturnedNoRows;
        assert!(matches!(
            SearchError::from(err),
            SearchError::Store(StoreError::Database(_))
        ));
    }
}
