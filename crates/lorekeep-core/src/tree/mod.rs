//! Workspace tree - the organizational hierarchy
//!
//! Folders and note references form a forest over atoms. A note reference
//! points at a note atom without owning it: the same atom may appear under
//! several folders, and deleting a reference never touches the atom.
//! Visibility is hybrid - a reference whose atom has been tombstoned stays
//! in storage but is filtered out of every listing.

mod service;

pub use service::{TreeError, TreeResult, WorkspaceService};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::atom::AtomId;

/// Stable tree node identifier.
pub type NodeId = Uuid;

/// What a tree node is. Folder-with-atom and reference-without-atom are
/// unrepresentable here (and rejected by a CHECK constraint in storage).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodePayload {
    Folder {
        name: String,
    },
    NoteRef {
        atom_id: AtomId,
        /// Display label projected from the atom content at read time.
        label: String,
    },
}

impl NodePayload {
    pub fn is_folder(&self) -> bool {
        matches!(self, NodePayload::Folder { .. })
    }

    /// The label listings sort by: folder name, or the projected note label.
    pub fn label(&self) -> &str {
        match self {
            NodePayload::Folder { name } => name,
            NodePayload::NoteRef { label, .. } => label,
        }
    }
}

/// A persisted tree node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceNode {
    pub node_id: NodeId,
    /// `None` means the node sits at the workspace root.
    pub parent_id: Option<NodeId>,
    #[serde(flatten)]
    pub payload: NodePayload,
    /// Legacy placement key. Kept in storage for compatibility; listings
    /// order by label, not by this.
    pub sort_order: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// How to delete a folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteMode {
    /// Remove the folder and promote its children to the folder's parent.
    Dissolve,
    /// Tombstone the folder and its whole subtree. Atoms are untouched.
    DeleteAll,
}

impl DeleteMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeleteMode::Dissolve => "dissolve",
            DeleteMode::DeleteAll => "delete_all",
        }
    }

    pub fn parse_name(s: &str) -> Option<Self> {
        match s {
            "dissolve" => Some(DeleteMode::Dissolve),
            "delete_all" => Some(DeleteMode::DeleteAll),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_label_projection() {
        let folder = NodePayload::Folder {
            name: "Projects".into(),
        };
        assert!(folder.is_folder());
        assert_eq!(folder.label(), "Projects");

        let reference = NodePayload::NoteRef {
            atom_id: Uuid::new_v4(),
            label: "Meeting notes".into(),
        };
        assert!(!reference.is_folder());
        assert_eq!(reference.label(), "Meeting notes");
    }

    #[test]
    fn delete_mode_roundtrip() {
        for mode in [DeleteMode::Dissolve, DeleteMode::DeleteAll] {
            assert_eq!(DeleteMode::parse_name(mode.as_str()), Some(mode));
        }
        assert_eq!(DeleteMode::parse_name("purge"), None);
    }

    #[test]
    fn payload_serializes_tagged() {
        let json = serde_json::to_string(&NodePayload::Folder {
            name: "Inbox".into(),
        })
        .unwrap();
        assert!(json.contains("\"kind\":\"folder\""));
    }
}
