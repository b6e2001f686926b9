//! Image catalog: durable registry of master images.
//!
//! Read-heavy, append-mostly. Images are write-once; the only mutation is
//! the `retired` flag, and that is gated on zero live clones.

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use dbclone_shared::errors::{CloneError, CloneResult};

use super::{db_err, Database};

/// A registered master image.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImageRecord {
    /// Unique identifier.
    pub image_id: String,

    /// Human-readable name, usually the source database plus a timestamp.
    pub image_name: String,

    /// Path/URI to the master differencing-disk base. Read-only for the
    /// lifetime of any clone referencing it.
    pub image_location: String,

    /// Database the snapshot was captured from.
    pub source_database_name: String,

    /// Point in time the snapshot represents.
    pub source_database_timestamp: DateTime<Utc>,

    /// Size of the master disk in bytes.
    pub size_bytes: u64,

    pub created_at: DateTime<Utc>,

    /// Superseded images stay in the catalog but are hidden from default
    /// listings and refuse new clones.
    #[serde(default)]
    pub retired: bool,
}

/// Metadata produced by the external capture workflow.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewImage {
    pub image_name: String,
    pub image_location: String,
    pub source_database_name: String,
    pub source_database_timestamp: DateTime<Utc>,
    pub size_bytes: u64,
}

/// Catalog of master images.
#[derive(Clone)]
pub struct ImageStore {
    db: Database,
}

impl ImageStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Register a new image. Fails with `DuplicateImage` if an image with
    /// the same location already exists.
    pub fn register(&self, new: NewImage) -> CloneResult<ImageRecord> {
        let record = ImageRecord {
            image_id: Uuid::new_v4().to_string(),
            image_name: new.image_name,
            image_location: new.image_location,
            source_database_name: new.source_database_name,
            source_database_timestamp: new.source_database_timestamp,
            size_bytes: new.size_bytes,
            created_at: Utc::now(),
            retired: false,
        };

        let json = serde_json::to_string(&record)?;
        let conn = self.db.conn();

        // Connection lock held across the check and the insert.
        let existing: Option<String> = db_err!(
            conn.query_row(
                "SELECT id FROM images WHERE location = ?1",
                rusqlite::params![record.image_location],
                |row| row.get(0),
            )
            .optional()
        )?;
        if existing.is_some() {
            return Err(CloneError::DuplicateImage(record.image_location));
        }

        db_err!(conn.execute(
            "INSERT INTO images (id, name, location, retired, created_at, json)
             VALUES (?1, ?2, ?3, 0, ?4, ?5)",
            rusqlite::params![
                record.image_id,
                record.image_name,
                record.image_location,
                record.created_at.to_rfc3339(),
                json,
            ],
        ))?;

        tracing::info!(image_id = %record.image_id, location = %record.image_location, "registered image");
        Ok(record)
    }

    /// Fetch an image by id. Fails with `ImageNotFound` if absent.
    pub fn get(&self, image_id: &str) -> CloneResult<ImageRecord> {
        self.try_get(image_id)?
            .ok_or_else(|| CloneError::ImageNotFound(image_id.to_string()))
    }

    /// Fetch an image by id, `None` if absent.
    pub fn try_get(&self, image_id: &str) -> CloneResult<Option<ImageRecord>> {
        let conn = self.db.conn();
        let json: Option<String> = db_err!(
            conn.query_row(
                "SELECT json FROM images WHERE id = ?1",
                rusqlite::params![image_id],
                |row| row.get(0),
            )
            .optional()
        )?;

        json.map(|j| serde_json::from_str(&j).map_err(CloneError::from))
            .transpose()
    }

    /// List catalog entries, newest first.
    pub fn list(&self, include_retired: bool) -> CloneResult<Vec<ImageRecord>> {
        let conn = self.db.conn();
        let sql = if include_retired {
            "SELECT json FROM images ORDER BY created_at DESC"
        } else {
            "SELECT json FROM images WHERE retired = 0 ORDER BY created_at DESC"
        };

        let mut stmt = db_err!(conn.prepare(sql))?;
        let rows = db_err!(stmt.query_map([], |row| row.get::<_, String>(0)))?;

        let mut out = Vec::new();
        for json in rows {
            let json = db_err!(json)?;
            out.push(serde_json::from_str(&json)?);
        }
        Ok(out)
    }

    /// Retire an image, but only if no non-removed clone references it.
    ///
    /// The existence check and the update run in one transaction, so a clone
    /// row inserted concurrently cannot slip past the zero-check.
    pub fn retire_unreferenced(&self, image_id: &str) -> CloneResult<()> {
        let mut conn = self.db.conn();
        let tx = db_err!(conn.transaction())?;

        let exists: Option<i64> = db_err!(
            tx.query_row(
                "SELECT retired FROM images WHERE id = ?1",
                rusqlite::params![image_id],
                |row| row.get(0),
            )
            .optional()
        )?;
        match exists {
            None => return Err(CloneError::ImageNotFound(image_id.to_string())),
            Some(1) => return Ok(()), // retiring twice is a no-op
            Some(_) => {}
        }

        let blocking: i64 = db_err!(tx.query_row(
            "SELECT COUNT(*) FROM clones WHERE image_id = ?1 AND status != 'removed'",
            rusqlite::params![image_id],
            |row| row.get(0),
        ))?;
        if blocking > 0 {
            return Err(CloneError::ImageInUse(format!(
                "image {} referenced by {} clone(s)",
                image_id, blocking
            )));
        }

        db_err!(tx.execute(
            "UPDATE images SET retired = 1 WHERE id = ?1",
            rusqlite::params![image_id],
        ))?;
        db_err!(tx.commit())?;

        tracing::info!(image_id, "retired image");
        Ok(())
    }
}
