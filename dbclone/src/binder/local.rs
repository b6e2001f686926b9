//! Filesystem-backed binder for development and tests.
//!
//! Materializes differencing disks as files next to nothing fancier than a
//! JSON header, mount points as directories, and engine attachments as
//! marker files. Honors the full idempotency contract of `StorageBinder`,
//! which makes it good enough to exercise the orchestrator end to end on a
//! single machine. Production deployments implement `StorageBinder` against
//! a real snapshot provider and engine driver instead.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{BinderError, BinderResult, StorageBinder};

/// Header written into a locally allocated diff file.
#[derive(Debug, Serialize, Deserialize)]
struct DiffHeader {
    base_location: String,
}

/// Marker recording a database attachment.
#[derive(Debug, Serialize, Deserialize)]
struct AttachMarker {
    access_path: String,
}

pub struct LocalDiskBinder {
    mounts_dir: PathBuf,
    attachments_dir: PathBuf,
}

impl LocalDiskBinder {
    /// Create a binder rooted at `root`. Mount points live under
    /// `root/mounts`, attachment markers under `root/attachments`.
    pub fn new(root: &Path) -> BinderResult<Self> {
        let mounts_dir = root.join("mounts");
        let attachments_dir = root.join("attachments");
        std::fs::create_dir_all(&mounts_dir)
            .map_err(|e| BinderError::from_io("create mounts dir", e))?;
        std::fs::create_dir_all(&attachments_dir)
            .map_err(|e| BinderError::from_io("create attachments dir", e))?;
        Ok(Self {
            mounts_dir,
            attachments_dir,
        })
    }

    fn attach_marker_path(&self, sql_instance: &str, database_name: &str) -> PathBuf {
        self.attachments_dir
            .join(format!("{}__{}.json", sql_instance, database_name))
    }

    fn access_path_for(&self, diff_location: &str) -> PathBuf {
        let stem = Path::new(diff_location)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| diff_location.replace('/', "_"));
        self.mounts_dir.join(stem)
    }
}

#[async_trait]
impl StorageBinder for LocalDiskBinder {
    async fn allocate_diff(&self, base_location: &str, diff_location: &str) -> BinderResult<()> {
        let base = Path::new(base_location);
        if !base.exists() {
            return Err(BinderError::NotFound(format!(
                "base disk missing: {}",
                base_location
            )));
        }

        let diff = Path::new(diff_location);
        if diff.exists() {
            // Dedup by diff location: verify the existing artifact is ours.
            let content = std::fs::read_to_string(diff)
                .map_err(|e| BinderError::from_io("read existing diff", e))?;
            let header: DiffHeader = serde_json::from_str(&content).map_err(|_| {
                BinderError::AlreadyExists(format!(
                    "foreign artifact at diff location {}",
                    diff_location
                ))
            })?;
            if header.base_location != base_location {
                return Err(BinderError::AlreadyExists(format!(
                    "diff {} backed by {}, expected {}",
                    diff_location, header.base_location, base_location
                )));
            }
            tracing::debug!(diff_location, "diff already allocated");
            return Ok(());
        }

        if let Some(parent) = diff.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| BinderError::from_io("create diff dir", e))?;
        }
        let header = DiffHeader {
            base_location: base_location.to_string(),
        };
        let content = serde_json::to_string(&header)
            .map_err(|e| BinderError::Transient(format!("encode diff header: {}", e)))?;
        std::fs::write(diff, content).map_err(|e| BinderError::from_io("write diff", e))?;

        tracing::debug!(base_location, diff_location, "allocated diff disk");
        Ok(())
    }

    async fn mount(&self, diff_location: &str) -> BinderResult<String> {
        if !Path::new(diff_location).exists() {
            return Err(BinderError::NotFound(format!(
                "diff disk missing: {}",
                diff_location
            )));
        }

        let access_path = self.access_path_for(diff_location);
        std::fs::create_dir_all(&access_path)
            .map_err(|e| BinderError::from_io("create mount point", e))?;

        tracing::debug!(diff_location, access_path = %access_path.display(), "mounted diff disk");
        Ok(access_path.to_string_lossy().into_owned())
    }

    async fn attach_database(
        &self,
        access_path: &str,
        sql_instance: &str,
        database_name: &str,
    ) -> BinderResult<()> {
        if !Path::new(access_path).exists() {
            return Err(BinderError::NotFound(format!(
                "access path missing: {}",
                access_path
            )));
        }

        let marker_path = self.attach_marker_path(sql_instance, database_name);
        if marker_path.exists() {
            let content = std::fs::read_to_string(&marker_path)
                .map_err(|e| BinderError::from_io("read attach marker", e))?;
            let marker: AttachMarker = serde_json::from_str(&content)
                .map_err(|e| BinderError::Transient(format!("decode attach marker: {}", e)))?;
            if marker.access_path == access_path {
                tracing::debug!(sql_instance, database_name, "database already attached");
                return Ok(());
            }
            return Err(BinderError::AlreadyExists(format!(
                "{}/{} already attached from {}",
                sql_instance, database_name, marker.access_path
            )));
        }

        let marker = AttachMarker {
            access_path: access_path.to_string(),
        };
        let content = serde_json::to_string(&marker)
            .map_err(|e| BinderError::Transient(format!("encode attach marker: {}", e)))?;
        std::fs::write(&marker_path, content)
            .map_err(|e| BinderError::from_io("write attach marker", e))?;

        tracing::debug!(access_path, sql_instance, database_name, "attached database");
        Ok(())
    }

    async fn detach_database(&self, sql_instance: &str, database_name: &str) -> BinderResult<()> {
        let marker_path = self.attach_marker_path(sql_instance, database_name);
        match std::fs::remove_file(&marker_path) {
            Ok(()) => {
                tracing::debug!(sql_instance, database_name, "detached database");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BinderError::from_io("remove attach marker", e)),
        }
    }

    async fn unmount(&self, access_path: &str) -> BinderResult<()> {
        match std::fs::remove_dir_all(access_path) {
            Ok(()) => {
                tracing::debug!(access_path, "unmounted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BinderError::from_io("remove mount point", e)),
        }
    }

    async fn delete_diff(&self, diff_location: &str) -> BinderResult<()> {
        match std::fs::remove_file(diff_location) {
            Ok(()) => {
                tracing::debug!(diff_location, "deleted diff disk");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BinderError::from_io("remove diff", e)),
        }
    }
}
