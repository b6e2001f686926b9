//! Storage binder: the interface to the external differencing-disk provider
//! and database engine.
//!
//! The orchestrator depends only on this trait, never on provider-specific
//! semantics. All primitives are idempotent and individually retryable:
//!
//! - `allocate_diff` called twice for the same diff location must not create
//!   two artifacts (providers dedup by diff location, which the orchestrator
//!   derives deterministically from the clone id).
//! - `mount` returns the same access path for the same diff location.
//! - `detach_database`, `unmount` and `delete_diff` return success when the
//!   target is already absent.

pub mod local;

pub use local::LocalDiskBinder;

use async_trait::async_trait;
use thiserror::Error;

use dbclone_shared::errors::CloneError;

pub type BinderResult<T> = Result<T, BinderError>;

/// Classified binder failure.
#[derive(Debug, Error)]
pub enum BinderError {
    /// Retryable storage/network fault.
    #[error("transient I/O fault: {0}")]
    Transient(String),

    /// A conflicting artifact already occupies the target location.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The base or target artifact is missing.
    #[error("not found: {0}")]
    NotFound(String),

    /// The provider or engine denied the operation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
}

impl BinderError {
    /// Classify a `std::io::Error` from a provider implementation.
    pub fn from_io(context: &str, err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::NotFound => BinderError::NotFound(format!("{}: {}", context, err)),
            ErrorKind::AlreadyExists => BinderError::AlreadyExists(format!("{}: {}", context, err)),
            ErrorKind::PermissionDenied => {
                BinderError::PermissionDenied(format!("{}: {}", context, err))
            }
            _ => BinderError::Transient(format!("{}: {}", context, err)),
        }
    }
}

impl From<BinderError> for CloneError {
    fn from(err: BinderError) -> Self {
        match err {
            BinderError::Transient(msg) => CloneError::TransientIo(msg),
            BinderError::PermissionDenied(msg) => CloneError::PermissionDenied(msg),
            // A missing base or a foreign artifact at a derived location
            // means the registry and external reality disagree; surfaced for
            // the operator, never guessed away.
            BinderError::AlreadyExists(msg) | BinderError::NotFound(msg) => {
                CloneError::Inconsistent(msg)
            }
        }
    }
}

/// Idempotent primitives over the differencing-disk provider and the
/// database engine.
#[async_trait]
pub trait StorageBinder: Send + Sync {
    /// Allocate a differencing disk at `diff_location` backed by
    /// `base_location`. Succeeds without side effects if the diff already
    /// exists for the same base.
    async fn allocate_diff(&self, base_location: &str, diff_location: &str) -> BinderResult<()>;

    /// Mount a differencing disk and return the access path exposed to the
    /// host. The access path is stable per diff location.
    async fn mount(&self, diff_location: &str) -> BinderResult<String>;

    /// Attach the database files under `access_path` to the engine instance.
    async fn attach_database(
        &self,
        access_path: &str,
        sql_instance: &str,
        database_name: &str,
    ) -> BinderResult<()>;

    /// Detach a database from the engine instance. Ok if already absent.
    async fn detach_database(&self, sql_instance: &str, database_name: &str) -> BinderResult<()>;

    /// Unmount an access path. Ok if already absent.
    async fn unmount(&self, access_path: &str) -> BinderResult<()>;

    /// Delete a differencing disk. Ok if already absent.
    async fn delete_diff(&self, diff_location: &str) -> BinderResult<()>;
}
