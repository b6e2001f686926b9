//! Clone registry: durable records of provisioned clones.
//!
//! Each clone references exactly one image. Identity and reference fields
//! are immutable; `status` and `access_path` change during the lifecycle.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};

use dbclone_shared::errors::{CloneError, CloneResult};

use super::{db_err, Database};

/// Clone lifecycle status.
///
/// Provisioning and Disabling are in-flight states: rows stuck there are
/// picked up by reconcile. Failed rows stay visible for operator diagnosis
/// and are never dropped silently.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloneStatus {
    Provisioning,
    Enabled,
    Disabled,
    Disabling,
    Removed,
    Failed,
}

impl CloneStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloneStatus::Provisioning => "provisioning",
            CloneStatus::Enabled => "enabled",
            CloneStatus::Disabled => "disabled",
            CloneStatus::Disabling => "disabling",
            CloneStatus::Removed => "removed",
            CloneStatus::Failed => "failed",
        }
    }

    /// True while the clone's differencing disk depends on its base image,
    /// i.e. while the clone holds a reference for counting purposes.
    pub fn holds_reference(&self) -> bool {
        matches!(
            self,
            CloneStatus::Provisioning
                | CloneStatus::Enabled
                | CloneStatus::Disabled
                | CloneStatus::Disabling
        )
    }
}

impl fmt::Display for CloneStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CloneStatus {
    type Err = CloneError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "provisioning" => Ok(CloneStatus::Provisioning),
            "enabled" => Ok(CloneStatus::Enabled),
            "disabled" => Ok(CloneStatus::Disabled),
            "disabling" => Ok(CloneStatus::Disabling),
            "removed" => Ok(CloneStatus::Removed),
            "failed" => Ok(CloneStatus::Failed),
            other => Err(CloneError::Internal(format!(
                "unknown clone status: {}",
                other
            ))),
        }
    }
}

/// A provisioned clone.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CloneRecord {
    /// Unique identifier.
    pub clone_id: String,

    /// Image this clone was provisioned from.
    pub image_id: String,

    /// Path/URI of the clone's differencing disk, derived from the image
    /// location and the clone id.
    pub clone_location: String,

    /// Mount point exposed to the host. Set once the binder has mounted the
    /// differencing disk.
    pub access_path: Option<String>,

    pub host_name: String,
    pub sql_instance: String,
    pub database_name: String,

    pub status: CloneStatus,
    pub created_at: DateTime<Utc>,

    /// Last-activity timestamp; reconcile uses it to spot abandoned
    /// in-flight operations.
    pub updated_at: DateTime<Utc>,
}

impl CloneRecord {
    /// The attach point tuple as a display string.
    pub fn attach_point(&self) -> String {
        format!(
            "{}/{}/{}",
            self.host_name, self.sql_instance, self.database_name
        )
    }
}

/// Fields required to insert a new clone row.
#[derive(Clone, Debug)]
pub struct NewClone {
    pub clone_id: String,
    pub image_id: String,
    pub clone_location: String,
    pub host_name: String,
    pub sql_instance: String,
    pub database_name: String,
}

/// Filter for clone listings.
#[derive(Clone, Debug, Default)]
pub struct CloneFilter {
    pub image_id: Option<String>,
    pub host_name: Option<String>,
    pub status: Option<CloneStatus>,
}

/// Registry of provisioned clones.
#[derive(Clone)]
pub struct CloneStore {
    db: Database,
}

impl CloneStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a clone row with status Provisioning.
    ///
    /// This is the durability checkpoint for Create: a crash after this
    /// point leaves a recoverable intent, not a lost one. The partial unique
    /// index maps attach-point collisions to `DuplicateAttachPoint`.
    pub fn insert(&self, new: NewClone) -> CloneResult<CloneRecord> {
        let now = Utc::now();
        let record = CloneRecord {
            clone_id: new.clone_id,
            image_id: new.image_id,
            clone_location: new.clone_location,
            access_path: None,
            host_name: new.host_name,
            sql_instance: new.sql_instance,
            database_name: new.database_name,
            status: CloneStatus::Provisioning,
            created_at: now,
            updated_at: now,
        };

        let json = serde_json::to_string(&record)?;
        let conn = self.db.conn();
        let result = conn.execute(
            "INSERT INTO clones (id, image_id, status, host_name, sql_instance, database_name, updated_at, json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                record.clone_id,
                record.image_id,
                record.status.as_str(),
                record.host_name,
                record.sql_instance,
                record.database_name,
                record.updated_at.to_rfc3339(),
                json,
            ],
        );

        match result {
            Ok(_) => Ok(record),
            Err(rusqlite::Error::SqliteFailure(e, msg))
                if e.code == rusqlite::ErrorCode::ConstraintViolation
                    && msg
                        .as_deref()
                        .is_some_and(|m| m.contains("clones.host_name")) =>
            {
                Err(CloneError::DuplicateAttachPoint(record.attach_point()))
            }
            Err(e) => Err(CloneError::Database(e.to_string())),
        }
    }

    /// Fetch a clone by id. Fails with `CloneNotFound` if absent.
    pub fn get(&self, clone_id: &str) -> CloneResult<CloneRecord> {
        self.try_get(clone_id)?
            .ok_or_else(|| CloneError::CloneNotFound(clone_id.to_string()))
    }

    /// Fetch a clone by id, `None` if absent.
    pub fn try_get(&self, clone_id: &str) -> CloneResult<Option<CloneRecord>> {
        let conn = self.db.conn();
        let json: Option<String> = db_err!(
            conn.query_row(
                "SELECT json FROM clones WHERE id = ?1",
                rusqlite::params![clone_id],
                |row| row.get(0),
            )
            .optional()
        )?;

        json.map(|j| serde_json::from_str(&j).map_err(CloneError::from))
            .transpose()
    }

    /// Transition a clone to a new status, bumping `updated_at`.
    pub fn set_status(&self, clone_id: &str, status: CloneStatus) -> CloneResult<CloneRecord> {
        self.update(clone_id, |record| record.status = status)
    }

    /// Record the access path returned by the binder's mount step.
    pub fn set_access_path(&self, clone_id: &str, access_path: &str) -> CloneResult<CloneRecord> {
        let path = access_path.to_string();
        self.update(clone_id, move |record| record.access_path = Some(path))
    }

    /// Bump `updated_at` without changing anything else. Marks an in-flight
    /// operation as still alive so reconcile leaves it alone.
    pub fn touch(&self, clone_id: &str) -> CloneResult<CloneRecord> {
        self.update(clone_id, |_| {})
    }

    /// Read-modify-write under the connection lock.
    fn update(
        &self,
        clone_id: &str,
        mutate: impl FnOnce(&mut CloneRecord),
    ) -> CloneResult<CloneRecord> {
        let conn = self.db.conn();
        let json: Option<String> = db_err!(
            conn.query_row(
                "SELECT json FROM clones WHERE id = ?1",
                rusqlite::params![clone_id],
                |row| row.get(0),
            )
            .optional()
        )?;
        let json = json.ok_or_else(|| CloneError::CloneNotFound(clone_id.to_string()))?;

        let mut record: CloneRecord = serde_json::from_str(&json)?;
        mutate(&mut record);
        record.updated_at = Utc::now();

        let json = serde_json::to_string(&record)?;
        db_err!(conn.execute(
            "UPDATE clones SET status = ?2, updated_at = ?3, json = ?4 WHERE id = ?1",
            rusqlite::params![
                clone_id,
                record.status.as_str(),
                record.updated_at.to_rfc3339(),
                json,
            ],
        ))?;

        Ok(record)
    }

    /// List clones matching the filter, oldest first.
    pub fn list(&self, filter: &CloneFilter) -> CloneResult<Vec<CloneRecord>> {
        let conn = self.db.conn();
        let mut stmt = db_err!(conn.prepare("SELECT json FROM clones ORDER BY updated_at ASC"))?;
        let rows = db_err!(stmt.query_map([], |row| row.get::<_, String>(0)))?;

        let mut out = Vec::new();
        for json in rows {
            let json = db_err!(json)?;
            let record: CloneRecord = serde_json::from_str(&json)?;
            if let Some(image_id) = &filter.image_id {
                if &record.image_id != image_id {
                    continue;
                }
            }
            if let Some(host) = &filter.host_name {
                if &record.host_name != host {
                    continue;
                }
            }
            if let Some(status) = filter.status {
                if record.status != status {
                    continue;
                }
            }
            out.push(record);
        }
        Ok(out)
    }

    /// Find the non-removed clone occupying an attach point, if any.
    pub fn find_live_attach_point(
        &self,
        host_name: &str,
        sql_instance: &str,
        database_name: &str,
    ) -> CloneResult<Option<CloneRecord>> {
        let conn = self.db.conn();
        let json: Option<String> = db_err!(
            conn.query_row(
                "SELECT json FROM clones
                 WHERE host_name = ?1 AND sql_instance = ?2 AND database_name = ?3
                   AND status != 'removed'",
                rusqlite::params![host_name, sql_instance, database_name],
                |row| row.get(0),
            )
            .optional()
        )?;

        json.map(|j| serde_json::from_str(&j).map_err(CloneError::from))
            .transpose()
    }

    /// Per-image count of clones whose status holds a reference.
    ///
    /// The reference tracker rebuilds its cache from this projection.
    pub fn reference_counts(&self) -> CloneResult<HashMap<String, u64>> {
        let conn = self.db.conn();
        let mut stmt = db_err!(conn.prepare(
            "SELECT image_id, COUNT(*) FROM clones
             WHERE status IN ('provisioning', 'enabled', 'disabled', 'disabling')
             GROUP BY image_id"
        ))?;
        let rows = db_err!(stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        }))?;

        let mut counts = HashMap::new();
        for row in rows {
            let (image_id, count) = db_err!(row)?;
            counts.insert(image_id, count as u64);
        }
        Ok(counts)
    }

    /// Clones stuck in an in-flight status with no activity since `cutoff`.
    pub fn stale_in_flight(&self, cutoff: DateTime<Utc>) -> CloneResult<Vec<CloneRecord>> {
        let conn = self.db.conn();
        let mut stmt = db_err!(conn.prepare(
            "SELECT json FROM clones
             WHERE status IN ('provisioning', 'disabling') AND updated_at < ?1
             ORDER BY updated_at ASC"
        ))?;
        let rows = db_err!(stmt.query_map(rusqlite::params![cutoff.to_rfc3339()], |row| {
            row.get::<_, String>(0)
        }))?;

        let mut out = Vec::new();
        for json in rows {
            let json = db_err!(json)?;
            out.push(serde_json::from_str(&json)?);
        }
        Ok(out)
    }
}
