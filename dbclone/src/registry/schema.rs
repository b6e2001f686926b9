//! Registry schema definitions.
//!
//! Two entity tables:
//! - images: write-once master snapshot metadata
//! - clones: provisioned clones, mutable status, FK to images
//!
//! Each table has queryable columns for filtering/index enforcement + JSON
//! blob for the full record.

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

/// Schema version tracking table.
pub const SCHEMA_VERSION_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    version INTEGER NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

/// Images table schema.
///
/// Write-once rows; `retired` is the only column that ever changes.
/// `location` is UNIQUE: two images may not share a master disk.
pub const IMAGES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS images (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    location TEXT NOT NULL UNIQUE,
    retired INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    json TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_images_name ON images(name);
CREATE INDEX IF NOT EXISTS idx_images_retired ON images(retired);
"#;

/// Clones table schema.
///
/// Queryable columns: image_id, status, attach point, updated_at.
/// The partial unique index enforces the attach-point invariant: no two
/// non-removed clones may occupy the same (host, instance, database) tuple.
pub const CLONES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS clones (
    id TEXT PRIMARY KEY NOT NULL,
    image_id TEXT NOT NULL,
    status TEXT NOT NULL,
    host_name TEXT NOT NULL,
    sql_instance TEXT NOT NULL,
    database_name TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    json TEXT NOT NULL,
    FOREIGN KEY (image_id) REFERENCES images(id)
);

CREATE INDEX IF NOT EXISTS idx_clones_image_id ON clones(image_id);
CREATE INDEX IF NOT EXISTS idx_clones_status ON clones(status);
CREATE INDEX IF NOT EXISTS idx_clones_updated_at ON clones(updated_at);
CREATE UNIQUE INDEX IF NOT EXISTS idx_clones_attach_point
    ON clones(host_name, sql_instance, database_name)
    WHERE status != 'removed';
"#;

/// Get all schema creation statements.
pub fn all_schemas() -> Vec<&'static str> {
    vec![SCHEMA_VERSION_TABLE, IMAGES_TABLE, CLONES_TABLE]
}
