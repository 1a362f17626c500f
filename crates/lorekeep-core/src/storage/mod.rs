//! SQLite store bootstrap
//!
//! Owns the embedded connection, applies pragmas and schema migrations, and
//! classifies lock contention into a distinct error so callers can tell
//! "try again later" apart from "the database is broken".

pub mod migrations;

pub use migrations::{apply_migrations, latest_version};

use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use directories::ProjectDirs;
use rusqlite::Connection;

/// Default bound on waiting for a competing writer.
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Database file name under the platform data directory.
const DEFAULT_DB_FILE: &str = "lorekeep.db";

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Connection/migration layer error.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The storage lock could not be acquired within the busy timeout.
    #[error("database is busy: {0}")]
    Busy(rusqlite::Error),
    /// Any other SQLite failure.
    #[error("database error: {0}")]
    Database(rusqlite::Error),
    /// Filesystem failure while preparing the database location.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// No platform data directory could be resolved.
    #[error("could not determine a data directory for the store")]
    NoDataDir,
    /// A previous caller panicked while holding the connection.
    #[error("store connection lock poisoned")]
    LockPoisoned,
    /// The compiled-in migration registry is malformed.
    #[error("invalid migration registry: {0}")]
    InvalidMigrationRegistry(&'static str),
    /// The on-disk schema was produced by a newer binary.
    #[error("database schema version {db_version} is newer than supported {latest_supported}")]
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        if is_busy(&err) {
            Self::Busy(err)
        } else {
            Self::Database(err)
        }
    }
}

/// Store result type.
pub type Result<T> = std::result::Result<T, StoreError>;

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(sqlite_err, _)
            if sqlite_err.code == rusqlite::ErrorCode::DatabaseBusy
                || sqlite_err.code == rusqlite::ErrorCode::DatabaseLocked
    )
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Explicit store configuration, passed in at construction time.
///
/// There is deliberately no process-global database path: every [`Store`]
/// carries its own location and settings.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database file path. `None` selects the platform data directory.
    pub path: Option<PathBuf>,
    /// Upper bound on waiting for a competing writer before failing
    /// with [`StoreError::Busy`].
    pub busy_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }
}

impl StoreConfig {
    /// Configuration for a store at an explicit file path.
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    fn resolve_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.path {
            return Ok(path.clone());
        }
        let proj_dirs =
            ProjectDirs::from("org", "lorekeep", "lorekeep").ok_or(StoreError::NoDataDir)?;
        let data_dir = proj_dirs.data_dir();
        std::fs::create_dir_all(data_dir)?;
        Ok(data_dir.join(DEFAULT_DB_FILE))
    }
}

// ============================================================================
// STORE
// ============================================================================

/// Owner of the single embedded SQLite connection.
///
/// All methods take `&self`; the connection lives behind a `Mutex`, making
/// `Store` `Send + Sync` so repositories can share it through `Arc<Store>`.
/// Lock scope is exactly one synchronous operation body - nothing in this
/// crate holds the connection across a suspension point.
#[derive(Debug)]
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Opens (or creates) the database described by `config` and applies
    /// all pending schema migrations.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let path = config.resolve_path()?;
        let mut conn = Connection::open(&path)?;
        Self::bootstrap(&mut conn, config.busy_timeout)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Opens a fresh in-memory database. Used by tests and previews.
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        Self::bootstrap(&mut conn, DEFAULT_BUSY_TIMEOUT)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Applies pragmas and migrations to a raw connection.
    fn bootstrap(conn: &mut Connection, busy_timeout: Duration) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )?;
        conn.busy_timeout(busy_timeout)?;
        migrations::apply_migrations(conn)?;
        Ok(())
    }

    /// Acquires the connection for one synchronous unit of work.
    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    /// Current schema version as recorded in the database header.
    pub fn schema_version(&self) -> Result<u32> {
        let conn = self.lock()?;
        let version = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
        Ok(version)
    }

    /// Unwraps the store back into its raw connection, for maintenance
    /// tooling that needs to step outside the repository APIs.
    pub fn into_connection(self) -> Result<Connection> {
        self.conn.into_inner().map_err(|_| StoreError::LockPoisoned)
    }
}
