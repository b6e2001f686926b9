//! Registry layer for dbclone.
//!
//! Provides SQLite-based persistence for the two entity kinds:
//! - Image: immutable master snapshot metadata (write-once)
//! - Clone: provisioned clone with mutable status
//!
//! Uses JSON blob pattern for flexibility with queryable columns for
//! filtering and index enforcement.

mod clones;
mod images;
mod schema;

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{Connection, OptionalExtension};

use dbclone_shared::errors::{CloneError, CloneResult};

pub use clones::{CloneFilter, CloneRecord, CloneStatus, CloneStore, NewClone};
pub use images::{ImageRecord, ImageStore, NewImage};

/// Helper macro to convert rusqlite errors to CloneError.
macro_rules! db_err {
    ($result:expr) => {
        $result.map_err(|e| CloneError::Database(e.to_string()))
    };
}

pub(crate) use db_err;

/// SQLite database handle.
///
/// Thread-safe via `parking_lot::Mutex`. Domain-specific stores
/// wrap this to provide their APIs (`ImageStore`, `CloneStore`).
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create the registry database.
    pub fn open(db_path: &Path) -> CloneResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = db_err!(Connection::open(db_path))?;
        Self::configure(&conn)?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory registry. Used by tests.
    pub fn open_in_memory() -> CloneResult<Self> {
        let conn = db_err!(Connection::open_in_memory())?;
        Self::configure(&conn)?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn configure(conn: &Connection) -> CloneResult<()> {
        // SQLite configuration
        // - WAL mode: Better concurrent read performance
        // - FULL sync: Maximum durability (fsync after each transaction)
        // - Foreign keys: Referential integrity (clones -> images)
        // - Busy timeout: generous, clone teardown can hold the write lock
        db_err!(conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=FULL;
            PRAGMA foreign_keys=ON;
            PRAGMA busy_timeout=30000;
            "
        ))?;
        Ok(())
    }

    /// Acquire the database connection.
    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    /// Initialize database schema.
    ///
    /// Order of operations:
    /// 1. Create schema_version table (safe, no dependencies)
    /// 2. Check current version
    /// 3. New DB: apply full schema
    ///    Existing DB with a different version: error (need matching dbclone)
    ///    Existing DB with same version: nothing to do
    fn init_schema(conn: &Connection) -> CloneResult<()> {
        db_err!(conn.execute_batch(schema::SCHEMA_VERSION_TABLE))?;

        let current_version: Option<i32> = db_err!(
            conn.query_row(
                "SELECT version FROM schema_version WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()
        )?;

        match current_version {
            None => {
                Self::apply_full_schema(conn)?;
            }
            Some(v) if v == schema::SCHEMA_VERSION => {
                // Already at current version - nothing to do
            }
            Some(v) => {
                // Strict version check: any mismatch is an error
                return Err(CloneError::Database(format!(
                    "Schema version mismatch: registry has v{}, process expects v{}. \
                     Use a matching dbclone version.",
                    v,
                    schema::SCHEMA_VERSION
                )));
            }
        }

        Ok(())
    }

    /// Apply full schema for a new database.
    fn apply_full_schema(conn: &Connection) -> CloneResult<()> {
        for sql in schema::all_schemas() {
            db_err!(conn.execute_batch(sql))?;
        }

        let now = Utc::now().to_rfc3339();
        db_err!(conn.execute(
            "INSERT INTO schema_version (id, version, updated_at) VALUES (1, ?1, ?2)",
            rusqlite::params![schema::SCHEMA_VERSION, now],
        ))?;

        tracing::info!(
            "Initialized registry schema version {}",
            schema::SCHEMA_VERSION
        );
        Ok(())
    }
}
