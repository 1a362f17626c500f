//! Database Migrations
//!
//! Schema migration definitions and the executor that applies them.
//! The applied version is mirrored to `PRAGMA user_version`, and all pending
//! steps run inside one transaction so a partial upgrade never persists.

use rusqlite::Connection;

use super::{Result, StoreError};

/// A database migration.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    /// Version number.
    pub version: u32,
    /// Description.
    pub description: &'static str,
    /// SQL to apply.
    pub up: &'static str,
}

/// Migration definitions.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Unified atoms table",
        up: MIGRATION_V1_UP,
    },
    Migration {
        version: 2,
        description: "Tags and atom/tag links",
        up: MIGRATION_V2_UP,
    },
    Migration {
        version: 3,
        description: "Workspace tree nodes",
        up: MIGRATION_V3_UP,
    },
    Migration {
        version: 4,
        description: "FTS5 content index, sync triggers and backfill",
        up: MIGRATION_V4_UP,
    },
];

/// V1: Canonical atom storage. One row per note/task/event, with
/// soft-delete tombstones. Timestamps are epoch milliseconds.
const MIGRATION_V1_UP: &str = r#"
CREATE TABLE atoms (
    uuid TEXT PRIMARY KEY,
    kind TEXT NOT NULL CHECK (kind IN ('note', 'task', 'event')),
    content TEXT NOT NULL,
    task_status TEXT CHECK (task_status IN ('todo', 'in_progress', 'done', 'cancelled')),
    start_at INTEGER,
    end_at INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    is_deleted INTEGER NOT NULL DEFAULT 0,

    -- an end boundary always comes with a start boundary, and never precedes it
    CHECK (end_at IS NULL OR (start_at IS NOT NULL AND end_at >= start_at))
);

CREATE INDEX idx_atoms_kind ON atoms(kind);
CREATE INDEX idx_atoms_updated ON atoms(updated_at);
CREATE INDEX idx_atoms_start ON atoms(start_at);
CREATE INDEX idx_atoms_deleted ON atoms(is_deleted);
"#;

/// V2: Normalized tag storage with a link table, replaced atomically
/// by the tag-replacement operation.
const MIGRATION_V2_UP: &str = r#"
CREATE TABLE tags (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE COLLATE NOCASE
);

CREATE TABLE atom_tags (
    atom_uuid TEXT NOT NULL REFERENCES atoms(uuid),
    tag_id INTEGER NOT NULL REFERENCES tags(id),
    PRIMARY KEY (atom_uuid, tag_id)
);

CREATE INDEX idx_atom_tags_tag ON atom_tags(tag_id);
"#;

/// V3: Workspace navigation tree. The CHECK constraint makes the
/// folder-with-atom state unrepresentable in storage as well as in the
/// Rust node type.
const MIGRATION_V3_UP: &str = r#"
CREATE TABLE workspace_nodes (
    node_uuid TEXT PRIMARY KEY,
    kind TEXT NOT NULL CHECK (kind IN ('folder', 'note_ref')),
    parent_uuid TEXT REFERENCES workspace_nodes(node_uuid),
    atom_uuid TEXT REFERENCES atoms(uuid),
    display_name TEXT,
    sort_order INTEGER NOT NULL DEFAULT 0,
    is_deleted INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,

    -- folders carry a name and no atom; note refs the reverse
    CHECK (
        (kind = 'folder' AND atom_uuid IS NULL AND display_name IS NOT NULL)
        OR (kind = 'note_ref' AND atom_uuid IS NOT NULL)
    )
);

CREATE INDEX idx_nodes_parent ON workspace_nodes(parent_uuid);
CREATE INDEX idx_nodes_atom ON workspace_nodes(atom_uuid);
"#;

/// V4: External-content FTS5 index over atom content.
///
/// The triggers keep the index entry for a row inserted, refreshed, or
/// removed inside the same transaction as the atom mutation, and keep
/// soft-deleted atoms out of the index entirely. The final INSERT is the
/// one-time backfill for stores that already contain atoms.
const MIGRATION_V4_UP: &str = r#"
CREATE VIRTUAL TABLE atoms_fts USING fts5(
    content,
    content='atoms',
    content_rowid='rowid'
);

CREATE TRIGGER atoms_fts_ai AFTER INSERT ON atoms WHEN NEW.is_deleted = 0 BEGIN
    INSERT INTO atoms_fts(rowid, content) VALUES (NEW.rowid, NEW.content);
END;

CREATE TRIGGER atoms_fts_ad AFTER DELETE ON atoms WHEN OLD.is_deleted = 0 BEGIN
    INSERT INTO atoms_fts(atoms_fts, rowid, content)
    VALUES ('delete', OLD.rowid, OLD.content);
END;

CREATE TRIGGER atoms_fts_au AFTER UPDATE ON atoms BEGIN
    INSERT INTO atoms_fts(atoms_fts, rowid, content)
    SELECT 'delete', OLD.rowid, OLD.content WHERE OLD.is_deleted = 0;
    INSERT INTO atoms_fts(rowid, content)
    SELECT NEW.rowid, NEW.content WHERE NEW.is_deleted = 0;
END;

INSERT INTO atoms_fts(rowid, content)
SELECT rowid, content FROM atoms WHERE is_deleted = 0;
"#;

/// Returns the latest migration version known by this binary.
pub fn latest_version() -> u32 {
    MIGRATIONS
        .iter()
        .map(|migration| migration.version)
        .max()
        .unwrap_or(0)
}

/// Current schema version from the database header.
pub fn current_version(conn: &Connection) -> Result<u32> {
    let version = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    Ok(version)
}

/// Applies all pending migrations on the provided connection.
///
/// Re-running when the stored version already matches the latest known
/// version is a no-op fast path that executes no DDL. A database produced by
/// a newer binary fails with [`StoreError::UnsupportedSchemaVersion`]. All
/// pending steps run in one transaction; `user_version` is advanced per step
/// inside it, so a mid-step failure rolls back to the pre-migration state.
pub fn apply_migrations(conn: &mut Connection) -> Result<u32> {
    validate_registry(MIGRATIONS)?;

    let from_version = current_version(conn)?;
    let latest = latest_version();

    if from_version > latest {
        return Err(StoreError::UnsupportedSchemaVersion {
            db_version: from_version,
            latest_supported: latest,
        });
    }
    if from_version == latest {
        return Ok(0);
    }

    let tx = conn.transaction()?;
    let mut applied = 0u32;
    for migration in MIGRATIONS {
        if migration.version <= from_version {
            continue;
        }
        tracing::info!(
            "applying migration v{}: {}",
            migration.version,
            migration.description
        );
        tx.execute_batch(migration.up)?;
        tx.execute_batch(&format!("PRAGMA user_version = {};", migration.version))?;
        applied += 1;
    }
    tx.commit()?;

    tracing::info!(
        "schema migrated from v{} to v{} ({} step(s))",
        from_version,
        latest,
        applied
    );
    Ok(applied)
}

fn validate_registry(migrations: &[Migration]) -> Result<()> {
    let mut previous = 0;
    for migration in migrations {
        if migration.version == 0 {
            return Err(StoreError::InvalidMigrationRegistry(
                "migration versions start at 1",
            ));
        }
        if migration.version <= previous {
            return Err(StoreError::InvalidMigrationRegistry(
                "migration versions must be strictly increasing",
            ));
        }
        previous = migration.version;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_rejects_non_increasing_versions() {
        let migrations = [
            Migration {
                version: 2,
                description: "a",
                up: "SELECT 1;",
            },
            Migration {
                version: 2,
                description: "b",
                up: "SELECT 1;",
            },
        ];
        let err = validate_registry(&migrations).unwrap_err();
        assert!(matches!(err, StoreError::InvalidMigrationRegistry(_)));
    }

    #[test]
    fn registry_rejects_version_zero() {
        let migrations = [Migration {
            version: 0,
            description: "zero",
            up: "SELECT 1;",
        }];
        let err = validate_registry(&migrations).unwrap_err();
        assert!(matches!(err, StoreError::InvalidMigrationRegistry(_)));
    }

    #[test]
    fn shipped_registry_is_valid() {
        validate_registry(MIGRATIONS).unwrap();
        assert_eq!(latest_version(), MIGRATIONS.last().unwrap().version);
    }
}
