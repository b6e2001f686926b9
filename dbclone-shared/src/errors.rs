//! Error types used across the dbclone workspace.

use thiserror::Error;

/// Result type for dbclone operations.
pub type CloneResult<T> = Result<T, CloneError>;

/// Broad error classification used by callers that only care about the
/// category (retry decisions, CLI exit codes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Image or clone absent.
    NotFound,
    /// Duplicate attach point, image in use, operation already in progress.
    Conflict,
    /// Retryable storage/network fault.
    TransientIo,
    /// The storage provider or database engine denied the operation.
    PermissionDenied,
    /// Registry and external reality disagree; operator action required.
    Inconsistent,
    /// Everything else (database faults, config errors, bugs).
    Internal,
}

#[derive(Debug, Error)]
pub enum CloneError {
    /// Image not found in the catalog.
    #[error("image not found: {0}")]
    ImageNotFound(String),

    /// Clone not found in the registry, or already removed.
    #[error("clone not found: {0}")]
    CloneNotFound(String),

    /// An image with the same location is already registered.
    #[error("image already registered: {0}")]
    DuplicateImage(String),

    /// A live clone already occupies the target host/instance/database tuple.
    #[error("attach point already occupied: {0}")]
    DuplicateAttachPoint(String),

    /// Image still has live clones referencing it.
    #[error("image in use: {0}")]
    ImageInUse(String),

    /// Another operation is in flight for the same clone.
    #[error("operation already in progress: {0}")]
    OperationInProgress(String),

    /// Reference counter released below zero.
    #[error("invalid reference release: {0}")]
    InvalidRelease(String),

    /// Clone is in the wrong state for the requested operation.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Retryable storage or engine fault.
    #[error("transient I/O error: {0}")]
    TransientIo(String),

    /// The storage provider or database engine denied the operation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Registry and external state disagree.
    #[error("inconsistent state: {0}")]
    Inconsistent(String),

    /// Registry database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CloneError {
    /// Map the error onto the coarse taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CloneError::ImageNotFound(_) | CloneError::CloneNotFound(_) => ErrorKind::NotFound,
            CloneError::DuplicateImage(_)
            | CloneError::DuplicateAttachPoint(_)
            | CloneError::ImageInUse(_)
            | CloneError::OperationInProgress(_)
            | CloneError::InvalidState(_) => ErrorKind::Conflict,
            CloneError::TransientIo(_) => ErrorKind::TransientIo,
            CloneError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            CloneError::Inconsistent(_) => ErrorKind::Inconsistent,
            CloneError::InvalidRelease(_)
            | CloneError::Database(_)
            | CloneError::Config(_)
            | CloneError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// True if a retry of the failing step may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self.kind(), ErrorKind::TransientIo)
    }
}

// Implement From for common error types to enable `?` operator
impl From<std::io::Error> for CloneError {
    fn from(err: std::io::Error) -> Self {
        CloneError::Internal(format!("I/O error: {}", err))
    }
}

impl From<serde_json::Error> for CloneError {
    fn from(err: serde_json::Error) -> Self {
        CloneError::Internal(format!("JSON error: {}", err))
    }
}

impl From<String> for CloneError {
    fn from(err: String) -> Self {
        CloneError::Internal(err)
    }
}

impl From<&str> for CloneError {
    fn from(err: &str) -> Self {
        CloneError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            CloneError::ImageNotFound("img".into()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            CloneError::DuplicateAttachPoint("host/SQL01/Sales".into()).kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            CloneError::TransientIo("timeout".into()).kind(),
            ErrorKind::TransientIo
        );
        assert_eq!(
            CloneError::Inconsistent("mount missing".into()).kind(),
            ErrorKind::Inconsistent
        );
    }

    #[test]
    fn test_transient_flag() {
        assert!(CloneError::TransientIo("net".into()).is_transient());
        assert!(!CloneError::PermissionDenied("denied".into()).is_transient());
    }
}
