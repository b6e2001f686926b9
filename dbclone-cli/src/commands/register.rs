//! Register an image in the catalog from capture-workflow metadata.

use chrono::{DateTime, Utc};
use clap::Args;
use dbclone::NewImage;

use crate::cli::GlobalFlags;

#[derive(Args, Debug)]
pub struct RegisterArgs {
    /// Image name (e.g. Sales_20260801)
    pub name: String,

    /// Path/URI of the master differencing-disk base
    #[arg(long)]
    pub location: String,

    /// Name of the source database the snapshot was captured from
    #[arg(long, value_name = "NAME")]
    pub source_database: String,

    /// Snapshot instant as RFC 3339; defaults to now
    #[arg(long, value_name = "TIMESTAMP")]
    pub captured_at: Option<String>,

    /// Size of the master disk in bytes
    #[arg(long, default_value_t = 0)]
    pub size_bytes: u64,
}

pub fn execute(args: RegisterArgs, global: &GlobalFlags) -> anyhow::Result<()> {
    let captured_at = match &args.captured_at {
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map_err(|e| anyhow::anyhow!("invalid --captured-at '{}': {}", raw, e))?
            .with_timezone(&Utc),
        None => Utc::now(),
    };

    let orchestrator = global.create_orchestrator()?;
    let image = orchestrator.register_image(NewImage {
        image_name: args.name,
        image_location: args.location,
        source_database_name: args.source_database,
        source_database_timestamp: captured_at,
        size_bytes: args.size_bytes,
    })?;

    println!("{}", image.image_id);
    Ok(())
}
