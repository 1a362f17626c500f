//! Atom persistence
//!
//! All mutations run inside an IMMEDIATE transaction and finish with a
//! read-back of the stored row, so callers always receive the persisted
//! state rather than an in-memory echo. Reads see non-deleted atoms only.

use std::sync::Arc;

use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use tracing::debug;
use uuid::Uuid;

use crate::storage::{Store, StoreError};

use super::{
    Atom, AtomDraft, AtomId, AtomKind, AtomValidationError, TaskStatus, normalize_tag,
    normalize_tags, validate_window,
};

/// Page size substituted when a caller passes `limit = 0`.
pub const DEFAULT_LIST_LIMIT: u32 = 50;
/// Hard cap on any single page of results.
pub const MAX_LIST_LIMIT: u32 = 200;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error(transparent)]
    Validation(#[from] AtomValidationError),

    #[error("atom not found: {0}")]
    NotFound(AtomId),

    #[error("time range start ({start}) must be <= end ({end})")]
    InvalidRange { start: i64, end: i64 },

    #[error(transparent)]
    Store(#[from] StoreError),

    /// A stored row no longer decodes into an atom.
    #[error("corrupt atom row: {0}")]
    Corrupt(String),
}

impl From<rusqlite::Error> for RepoError {
    fn from(err: rusqlite::Error) -> Self {
        RepoError::Store(StoreError::from(err))
    }
}

pub type RepoResult<T> = std::result::Result<T, RepoError>;

// ============================================================================
// REPOSITORY
// ============================================================================

/// Repository for atoms and their tag links.
pub struct AtomRepository {
    store: Arc<Store>,
}

impl AtomRepository {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Validates and persists a new atom, returning the stored record.
    pub fn create(&self, draft: &AtomDraft) -> RepoResult<Atom> {
        draft.validate()?;
        let id = Uuid::new_v4();
        let kind = draft.kind_or_default();
        let tags = normalize_tags(&draft.tags);
        let now = now_ms();

        let mut conn = self.store.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO atoms (uuid, kind, content, task_status, start_at, end_at,
                                created_at, updated_at, is_deleted)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7, 0)",
            params![
                id.to_string(),
                kind.as_str(),
                draft.content,
                draft.task_status.map(|s| s.as_str()),
                draft.start_at,
                draft.end_at,
                now,
            ],
        )?;
        link_tags(&tx, id, &tags)?;
        let atom = read_back(&tx, id)?;
        tx.commit()?;

        debug!(atom_id = %id, kind = %kind, "created atom");
        Ok(atom)
    }

    /// Replaces the markdown body of a non-deleted atom.
    pub fn update_content(&self, id: AtomId, content: &str) -> RepoResult<Atom> {
        self.mutate(id, |tx| {
            tx.execute(
                "UPDATE atoms SET content = ?2, updated_at = ?3
                 WHERE uuid = ?1 AND is_deleted = 0",
                params![id.to_string(), content, now_ms()],
            )
        })
    }

    /// Sets or clears the lifecycle status. Status is kind-agnostic: a note
    /// may carry `done` just as a task does.
    pub fn update_status(&self, id: AtomId, status: Option<TaskStatus>) -> RepoResult<Atom> {
        self.mutate(id, |tx| {
            tx.execute(
                "UPDATE atoms SET task_status = ?2, updated_at = ?3
                 WHERE uuid = ?1 AND is_deleted = 0",
                params![id.to_string(), status.map(|s| s.as_str()), now_ms()],
            )
        })
    }

    /// Replaces the event window. The same start/end invariants as creation
    /// apply; on failure the stored values are untouched.
    pub fn update_event_times(
        &self,
        id: AtomId,
        start_at: Option<i64>,
        end_at: Option<i64>,
    ) -> RepoResult<Atom> {
        validate_window(start_at, end_at)?;
        self.mutate(id, |tx| {
            tx.execute(
                "UPDATE atoms SET start_at = ?2, end_at = ?3, updated_at = ?4
                 WHERE uuid = ?1 AND is_deleted = 0",
                params![id.to_string(), start_at, end_at, now_ms()],
            )
        })
    }

    /// Replaces the full tag set with the normalized form of `tags`.
    /// Passing an equivalent set (case or order differences included) is
    /// idempotent apart from the `updated_at` bump.
    pub fn set_tags(&self, id: AtomId, tags: &[String]) -> RepoResult<Atom> {
        let normalized = normalize_tags(tags);

        let mut conn = self.store.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let changed = tx.execute(
            "UPDATE atoms SET updated_at = ?2 WHERE uuid = ?1 AND is_deleted = 0",
            params![id.to_string(), now_ms()],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound(id));
        }
        tx.execute(
            "DELETE FROM atom_tags WHERE atom_uuid = ?1",
            params![id.to_string()],
        )?;
        link_tags(&tx, id, &normalized)?;
        let atom = read_back(&tx, id)?;
        tx.commit()?;
        Ok(atom)
    }

    /// Tombstones an atom. Workspace references pointing at it are filtered
    /// out of tree listings from the next read onward; nothing is erased.
    pub fn soft_delete(&self, id: AtomId) -> RepoResult<()> {
        let mut conn = self.store.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let changed = tx.execute(
            "UPDATE atoms SET is_deleted = 1, updated_at = ?2
             WHERE uuid = ?1 AND is_deleted = 0",
            params![id.to_string(), now_ms()],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound(id));
        }
        tx.commit()?;
        debug!(atom_id = %id, "soft-deleted atom");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Fetches a non-deleted atom, or `None` if missing or tombstoned.
    pub fn fetch(&self, id: AtomId) -> RepoResult<Option<Atom>> {
        let conn = self.store.lock()?;
        let row = conn
            .query_row(
                &format!("{ATOM_SELECT} WHERE uuid = ?1 AND is_deleted = 0"),
                params![id.to_string()],
                atom_from_row,
            )
            .optional()?;
        match row {
            Some(mut atom) => {
                atom.tags = load_tags(&conn, id)?;
                Ok(Some(atom))
            }
            None => Ok(None),
        }
    }

    /// Lists non-deleted atoms, newest-updated first, optionally restricted
    /// to one tag (matched in normalized form).
    pub fn list_by_tag(
        &self,
        tag: Option<&str>,
        limit: u32,
        offset: u32,
    ) -> RepoResult<Vec<Atom>> {
        let limit = clamp_limit(limit);
        let conn = self.store.lock()?;

        let mut atoms = match tag.and_then(normalize_tag) {
            Some(tag) => {
                let mut stmt = conn.prepare(&format!(
                    "{ATOM_SELECT}
                     JOIN atom_tags at ON at.atom_uuid = atoms.uuid
                     JOIN tags t ON t.id = at.tag_id
                     WHERE atoms.is_deleted = 0 AND t.name = ?1
                     ORDER BY atoms.updated_at DESC, atoms.uuid ASC
                     LIMIT ?2 OFFSET ?3"
                ))?;
                let rows = stmt.query_map(params![tag, limit, offset], atom_from_row)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "{ATOM_SELECT}
                     WHERE is_deleted = 0
                     ORDER BY updated_at DESC, uuid ASC
                     LIMIT ?1 OFFSET ?2"
                ))?;
                let rows = stmt.query_map(params![limit, offset], atom_from_row)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
        };
        attach_tags(&conn, &mut atoms)?;
        Ok(atoms)
    }

    /// Lists non-deleted atoms whose time window overlaps `[start, end)`.
    /// Point events (no `end_at`) match when their instant falls inside the
    /// range; untimed atoms never match. Ordered by start ascending.
    pub fn list_by_time_range(
        &self,
        start: i64,
        end: i64,
        limit: u32,
        offset: u32,
    ) -> RepoResult<Vec<Atom>> {
        if start > end {
            return Err(RepoError::InvalidRange { start, end });
        }
        let limit = clamp_limit(limit);
        let conn = self.store.lock()?;
        let mut stmt = conn.prepare(&format!(
            "{ATOM_SELECT}
             WHERE is_deleted = 0
               AND start_at IS NOT NULL
               AND start_at < ?2
               AND ((end_at IS NULL AND start_at >= ?1)
                    OR (end_at IS NOT NULL AND end_at > ?1))
             ORDER BY start_at ASC, end_at ASC, uuid ASC
             LIMIT ?3 OFFSET ?4"
        ))?;
        let rows = stmt.query_map(params![start, end, limit, offset], atom_from_row)?;
        let mut atoms = rows.collect::<Result<Vec<_>, _>>()?;
        attach_tags(&conn, &mut atoms)?;
        Ok(atoms)
    }

    /// Distinct tags attached to at least one non-deleted atom, name
    /// ascending.
    pub fn list_tags(&self) -> RepoResult<Vec<String>> {
        let conn = self.store.lock()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT t.name FROM tags t
             JOIN atom_tags at ON at.tag_id = t.id
             JOIN atoms a ON a.uuid = at.atom_uuid
             WHERE a.is_deleted = 0
             ORDER BY t.name ASC",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Runs one UPDATE against a non-deleted atom and reads back the result.
    fn mutate(
        &self,
        id: AtomId,
        update: impl FnOnce(&rusqlite::Transaction<'_>) -> rusqlite::Result<usize>,
    ) -> RepoResult<Atom> {
        let mut conn = self.store.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let changed = update(&tx)?;
        if changed == 0 {
            return Err(RepoError::NotFound(id));
        }
        let atom = read_back(&tx, id)?;
        tx.commit()?;
        Ok(atom)
    }
}

// ============================================================================
// ROW MAPPING
// ============================================================================

const ATOM_SELECT: &str = "SELECT atoms.uuid, atoms.kind, atoms.content, atoms.task_status,
        atoms.start_at, atoms.end_at, atoms.created_at, atoms.updated_at, atoms.is_deleted
 FROM atoms";

fn atom_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Atom> {
    let uuid: String = row.get(0)?;
    let kind: String = row.get(1)?;
    let status: Option<String> = row.get(3)?;
    Ok(Atom {
        id: Uuid::parse_str(&uuid).map_err(|_| invalid_column(0, "uuid"))?,
        kind: AtomKind::parse_name(&kind).ok_or_else(|| invalid_column(1, "kind"))?,
        content: row.get(2)?,
        tags: Vec::new(),
        task_status: match status {
            Some(s) => {
                Some(TaskStatus::parse_name(&s).ok_or_else(|| invalid_column(3, "task_status"))?)
            }
            None => None,
        },
        start_at: row.get(4)?,
        end_at: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
        is_deleted: row.get::<_, i64>(8)? != 0,
    })
}

/// Decode failure surfaced through rusqlite so `query_map` handles it like
/// any other row error.
fn invalid_column(idx: usize, name: &str) -> rusqlite::Error {
    rusqlite::Error::InvalidColumnType(idx, name.to_string(), rusqlite::types::Type::Text)
}

fn load_tags(conn: &Connection, id: AtomId) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT t.name FROM tags t
         JOIN atom_tags at ON at.tag_id = t.id
         WHERE at.atom_uuid = ?1
         ORDER BY t.name ASC",
    )?;
    let rows = stmt.query_map(params![id.to_string()], |row| row.get::<_, String>(0))?;
    rows.collect()
}

fn attach_tags(conn: &Connection, atoms: &mut [Atom]) -> rusqlite::Result<()> {
    for atom in atoms.iter_mut() {
        atom.tags = load_tags(conn, atom.id)?;
    }
    Ok(())
}

/// Inserts tag rows (creating names as needed) and links them to the atom.
/// Expects `tags` already normalized.
fn link_tags(tx: &rusqlite::Transaction<'_>, id: AtomId, tags: &[String]) -> rusqlite::Result<()> {
    for tag in tags {
        tx.execute("INSERT OR IGNORE INTO tags (name) VALUES (?1)", params![tag])?;
        tx.execute(
            "INSERT OR IGNORE INTO atom_tags (atom_uuid, tag_id)
             VALUES (?1, (SELECT id FROM tags WHERE name = ?2))",
            params![id.to_string(), tag],
        )?;
    }
    Ok(())
}

/// Reads the stored row back inside the writing transaction. Deleted rows
/// are visible here on purpose: `soft_delete` is the only caller path that
/// would ever see one, and it does not read back.
fn read_back(tx: &rusqlite::Transaction<'_>, id: AtomId) -> RepoResult<Atom> {
    let mut atom = tx
        .query_row(
            &format!("{ATOM_SELECT} WHERE uuid = ?1"),
            params![id.to_string()],
            atom_from_row,
        )
        .optional()?
        .ok_or_else(|| RepoError::Corrupt(format!("atom {id} vanished during write")))?;
    atom.tags = load_tags(tx, id)?;
    Ok(atom)
}

fn clamp_limit(limit: u32) -> u32 {
    if limit == 0 {
        DEFAULT_LIST_LIMIT
    } else {
        limit.min(MAX_LIST_LIMIT)
    }
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_clamping() {
        assert_eq!(clamp_limit(0), DEFAULT_LIST_LIMIT);
        assert_eq!(clamp_limit(7), 7);
        assert_eq!(clamp_limit(10_000), MAX_LIST_LIMIT);
    }
}
