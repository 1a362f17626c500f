//! # Lorekeep Core
//!
//! Local-first personal knowledge base engine. Everything lives in one
//! embedded SQLite file:
//!
//! - **Atoms**: unified records for notes, tasks, and calendar events, with
//!   normalized tags, optional time windows, and soft delete throughout
//! - **Workspace Tree**: folders and note references forming a forest over
//!   atoms; a reference never owns its atom, and a tombstoned atom silently
//!   drops out of listings
//! - **Full-Text Search**: FTS5 index over atom content, kept exact by
//!   storage triggers, with an escaped default mode and a raw FTS5 mode
//! - **Storage**: WAL-mode connection with versioned, transactional
//!   migrations
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use lorekeep_core::{AtomDraft, AtomRepository, Store, StoreConfig, WorkspaceService};
//!
//! let store = Arc::new(Store::open(&StoreConfig::default())?);
//! let atoms = AtomRepository::new(store.clone());
//! let tree = WorkspaceService::new(store.clone());
//!
//! let note = atoms.create(&AtomDraft::note("# Reading list\n- The Rust Book"))?;
//! let folder = tree.create_folder(None, "Inbox")?;
//! tree.create_note_ref(Some(folder.node_id), note.id)?;
//! ```

#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULES
// ============================================================================

pub mod atom;
pub mod search;
pub mod storage;
pub mod tree;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

// Atom records and repository
pub use atom::{
    Atom, AtomDraft, AtomId, AtomKind, AtomRepository, AtomValidationError, RepoError,
    RepoResult, TaskStatus, content_label, normalize_tags,
};

// Storage layer
pub use storage::{Store, StoreConfig, StoreError};

// Workspace tree
pub use tree::{
    DeleteMode, NodeId, NodePayload, TreeError, TreeResult, WorkspaceNode, WorkspaceService,
};

// Full-text search
pub use search::{SearchError, SearchHit, SearchIndex, SearchQuery, SearchResult};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
