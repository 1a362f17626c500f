//! Workspace tree operations
//!
//! Every mutation runs inside an IMMEDIATE transaction; structural checks
//! (parent exists, no cycle) happen inside the same transaction as the write
//! so a concurrent move cannot invalidate them between check and commit.

use std::sync::Arc;

use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use tracing::debug;
use uuid::Uuid;

use crate::atom::{AtomId, AtomKind, content_label, now_ms};
use crate::storage::{Store, StoreError};

use super::{DeleteMode, NodeId, NodePayload, WorkspaceNode};

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    #[error("display name must not be blank")]
    InvalidDisplayName,

    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("parent not found: {0}")]
    ParentNotFound(NodeId),

    #[error("node is not a folder: {0}")]
    NodeNotFolder(NodeId),

    #[error("parent is not a folder: {0}")]
    ParentNotFolder(NodeId),

    #[error("atom not found: {0}")]
    AtomNotFound(AtomId),

    #[error("atom is not a note: {0}")]
    AtomNotNote(AtomId),

    #[error("moving {node_id} under {parent_id} would create a cycle")]
    CycleDetected { node_id: NodeId, parent_id: NodeId },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("corrupt tree row: {0}")]
    Corrupt(String),
}

impl From<rusqlite::Error> for TreeError {
    fn from(err: rusqlite::Error) -> Self {
        TreeError::Store(StoreError::from(err))
    }
}

pub type TreeResult<T> = std::result::Result<T, TreeError>;

// ============================================================================
// SERVICE
// ============================================================================

/// Operations over the folder / note-reference hierarchy.
pub struct WorkspaceService {
    store: Arc<Store>,
}

impl WorkspaceService {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Lists the visible children of `parent` (`None` = workspace root):
    /// non-deleted nodes, minus note references whose atom has been
    /// tombstoned or is not a note. Folders come first, then references,
    /// each group ordered by label (case-insensitive) with node id as the
    /// tie-break.
    pub fn list_children(&self, parent: Option<NodeId>) -> TreeResult<Vec<WorkspaceNode>> {
        let conn = self.store.lock()?;
        if let Some(parent_id) = parent {
            let parent_node = load_node(&conn, parent_id)?
                .ok_or(TreeError::ParentNotFound(parent_id))?;
            if !parent_node.payload.is_folder() {
                return Err(TreeError::ParentNotFolder(parent_id));
            }
        }

        // A note_ref whose atom is tombstoned or not a note stays in storage
        // but never surfaces in a listing.
        let mut stmt = conn.prepare(&format!(
            "{NODE_SELECT}
             WHERE n.parent_uuid IS ?1 AND n.is_deleted = 0
               AND (n.kind = 'folder'
                    OR (a.uuid IS NOT NULL AND a.is_deleted = 0 AND a.kind = 'note'))"
        ))?;
        let rows = stmt.query_map(
            params![parent.map(|p| p.to_string())],
            node_from_row,
        )?;
        let mut children = rows
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .collect::<TreeResult<Vec<_>>>()?;

        children.sort_by(|a, b| {
            b.payload
                .is_folder()
                .cmp(&a.payload.is_folder())
                .then_with(|| {
                    a.payload
                        .label()
                        .to_lowercase()
                        .cmp(&b.payload.label().to_lowercase())
                })
                .then_with(|| a.node_id.cmp(&b.node_id))
        });
        Ok(children)
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Creates a folder under `parent` (`None` = root).
    pub fn create_folder(&self, parent: Option<NodeId>, name: &str) -> TreeResult<WorkspaceNode> {
        let name = name.trim();
        if name.is_empty() {
            return Err(TreeError::InvalidDisplayName);
        }

        let mut conn = self.store.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        require_folder_parent(&tx, parent)?;

        let id = Uuid::new_v4();
        let now = now_ms();
        let order = next_sort_order(&tx, parent)?;
        tx.execute(
            "INSERT INTO workspace_nodes
                 (node_uuid, kind, parent_uuid, atom_uuid, display_name,
                  sort_order, is_deleted, created_at, updated_at)
             VALUES (?1, 'folder', ?2, NULL, ?3, ?4, 0, ?5, ?5)",
            params![
                id.to_string(),
                parent.map(|p| p.to_string()),
                name,
                order,
                now,
            ],
        )?;
        let node = read_back(&tx, id)?;
        tx.commit()?;

        debug!(node_id = %id, name, "created folder");
        Ok(node)
    }

    /// Creates a reference to an existing note atom under `parent`. The atom
    /// must be a non-deleted note; other kinds are not placeable in the tree.
    pub fn create_note_ref(
        &self,
        parent: Option<NodeId>,
        atom_id: AtomId,
    ) -> TreeResult<WorkspaceNode> {
        let mut conn = self.store.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        require_folder_parent(&tx, parent)?;

        let kind: Option<String> = tx
            .query_row(
                "SELECT kind FROM atoms WHERE uuid = ?1 AND is_deleted = 0",
                params![atom_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        match kind.as_deref().and_then(AtomKind::parse_name) {
            Some(AtomKind::Note) => {}
            Some(_) => return Err(TreeError::AtomNotNote(atom_id)),
            None => return Err(TreeError::AtomNotFound(atom_id)),
        }

        let id = Uuid::new_v4();
        let now = now_ms();
        let order = next_sort_order(&tx, parent)?;
        tx.execute(
            "INSERT INTO workspace_nodes
                 (node_uuid, kind, parent_uuid, atom_uuid, display_name,
                  sort_order, is_deleted, created_at, updated_at)
             VALUES (?1, 'note_ref', ?2, ?3, NULL, ?4, 0, ?5, ?5)",
            params![
                id.to_string(),
                parent.map(|p| p.to_string()),
                atom_id.to_string(),
                order,
                now,
            ],
        )?;
        let node = read_back(&tx, id)?;
        tx.commit()?;

        debug!(node_id = %id, atom_id = %atom_id, "created note reference");
        Ok(node)
    }

    /// Renames a node. Generic over node kind at this layer; whether a kind
    /// is user-rename-eligible is the caller's policy. The name is stored
    /// uniformly, but for note references it is inert - listings keep
    /// projecting the label from the atom content.
    pub fn rename_node(&self, node_id: NodeId, new_name: &str) -> TreeResult<()> {
        let new_name = new_name.trim();
        if new_name.is_empty() {
            return Err(TreeError::InvalidDisplayName);
        }

        let mut conn = self.store.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let changed = tx.execute(
            "UPDATE workspace_nodes SET display_name = ?2, updated_at = ?3
             WHERE node_uuid = ?1 AND is_deleted = 0",
            params![node_id.to_string(), new_name, now_ms()],
        )?;
        if changed == 0 {
            return Err(TreeError::NodeNotFound(node_id));
        }
        tx.commit()?;
        Ok(())
    }

    /// Moves a node under a new parent at `target_order` among its visible
    /// siblings. Out-of-range positions clamp to the nearest valid slot and
    /// `None` appends at the tail. Moving a node under itself or any of its
    /// descendants fails with [`TreeError::CycleDetected`] and leaves the
    /// tree unchanged.
    pub fn move_node(
        &self,
        node_id: NodeId,
        new_parent: Option<NodeId>,
        target_order: Option<u32>,
    ) -> TreeResult<()> {
        let mut conn = self.store.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if load_node(&tx, node_id)?.is_none() {
            return Err(TreeError::NodeNotFound(node_id));
        }
        require_folder_parent(&tx, new_parent)?;

        // Cycle check inside the same transaction as the write: walk from
        // the target parent to the root and refuse if the moving node is on
        // the path. Self-parenting is the one-step case of the same walk.
        if let Some(parent_id) = new_parent {
            let mut cursor = Some(parent_id);
            while let Some(current) = cursor {
                if current == node_id {
                    return Err(TreeError::CycleDetected { node_id, parent_id });
                }
                cursor = parent_of(&tx, current)?;
            }
        }

        let mut siblings = visible_child_ids(&tx, new_parent)?;
        siblings.retain(|id| *id != node_id);
        let position = target_order
            .map_or(siblings.len(), |order| (order as usize).min(siblings.len()));
        siblings.insert(position, node_id);

        let now = now_ms();
        tx.execute(
            "UPDATE workspace_nodes SET parent_uuid = ?2, updated_at = ?3
             WHERE node_uuid = ?1",
            params![
                node_id.to_string(),
                new_parent.map(|p| p.to_string()),
                now,
            ],
        )?;
        resequence(&tx, &siblings, now)?;
        tx.commit()?;

        debug!(node_id = %node_id, parent = ?new_parent, position, "moved node");
        Ok(())
    }

    /// Deletes a note reference. The referenced atom is untouched.
    pub fn delete_note_ref(&self, node_id: NodeId) -> TreeResult<()> {
        let mut conn = self.store.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let node = load_node(&tx, node_id)?.ok_or(TreeError::NodeNotFound(node_id))?;
        if node.payload.is_folder() {
            return Err(TreeError::NodeNotFolder(node_id));
        }
        tx.execute(
            "UPDATE workspace_nodes SET is_deleted = 1, updated_at = ?2
             WHERE node_uuid = ?1",
            params![node_id.to_string(), now_ms()],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Deletes a folder with an explicit policy. `Dissolve` removes only the
    /// folder and re-homes its children under the folder's own parent;
    /// `DeleteAll` tombstones the entire subtree. Neither mode deletes atoms.
    pub fn delete_folder(&self, node_id: NodeId, mode: DeleteMode) -> TreeResult<()> {
        let mut conn = self.store.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let node = load_node(&tx, node_id)?.ok_or(TreeError::NodeNotFound(node_id))?;
        if !node.payload.is_folder() {
            return Err(TreeError::NodeNotFolder(node_id));
        }
        let now = now_ms();

        match mode {
            DeleteMode::Dissolve => {
                let children = visible_child_ids(&tx, Some(node_id))?;
                let mut order = next_sort_order(&tx, node.parent_id)?;
                for child in &children {
                    tx.execute(
                        "UPDATE workspace_nodes
                         SET parent_uuid = ?2, sort_order = ?3, updated_at = ?4
                         WHERE node_uuid = ?1",
                        params![
                            child.to_string(),
                            node.parent_id.map(|p| p.to_string()),
                            order,
                            now,
                        ],
                    )?;
                    order += 1;
                }
                tx.execute(
                    "UPDATE workspace_nodes SET is_deleted = 1, updated_at = ?2
                     WHERE node_uuid = ?1",
                    params![node_id.to_string(), now],
                )?;
                debug!(node_id = %node_id, promoted = children.len(), "dissolved folder");
            }
            DeleteMode::DeleteAll => {
                let affected = tx.execute(
                    "WITH RECURSIVE subtree(id) AS (
                         SELECT node_uuid FROM workspace_nodes WHERE node_uuid = ?1
                         UNION ALL
                         SELECT n.node_uuid FROM workspace_nodes n
                         JOIN subtree s ON n.parent_uuid = s.id
                         WHERE n.is_deleted = 0
                     )
                     UPDATE workspace_nodes SET is_deleted = 1, updated_at = ?2
                     WHERE node_uuid IN (SELECT id FROM subtree) AND is_deleted = 0",
                    params![node_id.to_string(), now],
                )?;
                debug!(node_id = %node_id, affected, "deleted folder subtree");
            }
        }
        tx.commit()?;
        Ok(())
    }
}

// ============================================================================
// ROW MAPPING AND HELPERS
// ============================================================================

const NODE_SELECT: &str = "SELECT n.node_uuid, n.parent_uuid, n.kind, n.atom_uuid,
        n.display_name, n.sort_order, n.created_at, n.updated_at, a.content
 FROM workspace_nodes n
 LEFT JOIN atoms a ON a.uuid = n.atom_uuid";

/// Maps a joined node row. Returned as a nested result so rusqlite errors
/// and decode errors stay distinguishable through `query_map`.
fn node_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TreeResult<WorkspaceNode>> {
    let node_uuid: String = row.get(0)?;
    let parent_uuid: Option<String> = row.get(1)?;
    let kind: String = row.get(2)?;
    let atom_uuid: Option<String> = row.get(3)?;
    let display_name: Option<String> = row.get(4)?;
    let sort_order: i64 = row.get(5)?;
    let created_at: i64 = row.get(6)?;
    let updated_at: i64 = row.get(7)?;
    let content: Option<String> = row.get(8)?;

    Ok(decode_node(
        node_uuid,
        parent_uuid,
        kind,
        atom_uuid,
        display_name,
        sort_order,
        created_at,
        updated_at,
        content,
    ))
}

#[allow(clippy::too_many_arguments)]
fn decode_node(
    node_uuid: String,
    parent_uuid: Option<String>,
    kind: String,
    atom_uuid: Option<String>,
    display_name: Option<String>,
    sort_order: i64,
    created_at: i64,
    updated_at: i64,
    content: Option<String>,
) -> TreeResult<WorkspaceNode> {
    let node_id = parse_uuid(&node_uuid)?;
    let parent_id = parent_uuid.as_deref().map(parse_uuid).transpose()?;
    let payload = match kind.as_str() {
        "folder" => NodePayload::Folder {
            name: display_name
                .ok_or_else(|| TreeError::Corrupt(format!("folder {node_id} has no name")))?,
        },
        "note_ref" => {
            let atom = atom_uuid
                .ok_or_else(|| TreeError::Corrupt(format!("note_ref {node_id} has no atom")))?;
            NodePayload::NoteRef {
                atom_id: parse_uuid(&atom)?,
                label: content_label(content.as_deref().unwrap_or_default()),
            }
        }
        other => {
            return Err(TreeError::Corrupt(format!(
                "node {node_id} has unknown kind {other:?}"
            )));
        }
    };
    Ok(WorkspaceNode {
        node_id,
        parent_id,
        payload,
        sort_order,
        created_at,
        updated_at,
    })
}

fn parse_uuid(value: &str) -> TreeResult<Uuid> {
    Uuid::parse_str(value).map_err(|_| TreeError::Corrupt(format!("bad uuid {value:?}")))
}

/// Loads a non-deleted node. Dangling note references are still loadable
/// here; hybrid visibility applies to listings, not to direct addressing.
fn load_node(conn: &Connection, id: NodeId) -> TreeResult<Option<WorkspaceNode>> {
    conn.query_row(
        &format!("{NODE_SELECT} WHERE n.node_uuid = ?1 AND n.is_deleted = 0"),
        params![id.to_string()],
        node_from_row,
    )
    .optional()?
    .transpose()
}

/// Checks that `parent` (when given) is a visible folder.
fn require_folder_parent(conn: &Connection, parent: Option<NodeId>) -> TreeResult<()> {
    if let Some(parent_id) = parent {
        let node = load_node(conn, parent_id)?.ok_or(TreeError::ParentNotFound(parent_id))?;
        if !node.payload.is_folder() {
            return Err(TreeError::ParentNotFolder(parent_id));
        }
    }
    Ok(())
}

fn parent_of(conn: &Connection, id: NodeId) -> TreeResult<Option<NodeId>> {
    let parent: Option<Option<String>> = conn
        .query_row(
            "SELECT parent_uuid FROM workspace_nodes WHERE node_uuid = ?1",
            params![id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    match parent.flatten() {
        Some(value) => Ok(Some(parse_uuid(&value)?)),
        None => Ok(None),
    }
}

/// Non-deleted children of `parent` in current sort_order, used for
/// resequencing after structural changes.
fn visible_child_ids(conn: &Connection, parent: Option<NodeId>) -> TreeResult<Vec<NodeId>> {
    let mut stmt = conn.prepare(
        "SELECT node_uuid FROM workspace_nodes
         WHERE parent_uuid IS ?1 AND is_deleted = 0
         ORDER BY sort_order ASC, node_uuid ASC",
    )?;
    let rows = stmt.query_map(params![parent.map(|p| p.to_string())], |row| {
        row.get::<_, String>(0)
    })?;
    let mut ids = Vec::new();
    for row in rows {
        ids.push(parse_uuid(&row?)?);
    }
    Ok(ids)
}

/// Next free placement slot under `parent`.
fn next_sort_order(conn: &Connection, parent: Option<NodeId>) -> TreeResult<i64> {
    let max: Option<i64> = conn.query_row(
        "SELECT MAX(sort_order) FROM workspace_nodes
         WHERE parent_uuid IS ?1 AND is_deleted = 0",
        params![parent.map(|p| p.to_string())],
        |row| row.get(0),
    )?;
    Ok(max.map_or(0, |m| m + 1))
}

/// Rewrites sort_order to match positions in `ordered`.
fn resequence(conn: &Connection, ordered: &[NodeId], now: i64) -> TreeResult<()> {
    for (position, id) in ordered.iter().enumerate() {
        conn.execute(
            "UPDATE workspace_nodes SET sort_order = ?2, updated_at = ?3
             WHERE node_uuid = ?1",
            params![id.to_string(), position as i64, now],
        )?;
    }
    Ok(())
}

fn read_back(tx: &rusqlite::Transaction<'_>, id: NodeId) -> TreeResult<WorkspaceNode> {
    load_node(tx, id)?.ok_or_else(|| TreeError::Corrupt(format!("node {id} vanished during write")))
}
