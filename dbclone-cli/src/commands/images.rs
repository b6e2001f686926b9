//! List images in the catalog.

use std::io::Write;

use clap::Args;
use dbclone::ImageRecord;
use serde::Serialize;
use tabled::Tabled;

use crate::cli::GlobalFlags;
use crate::formatter::{self, OutputFormat};

#[derive(Args, Debug)]
pub struct ImagesArgs {
    /// Include retired images
    #[arg(short, long)]
    pub all: bool,

    /// Output format: table, json, yaml
    #[arg(long, default_value = "table")]
    pub format: String,
}

#[derive(Debug, Serialize, Tabled)]
struct ImageRow {
    #[tabled(rename = "IMAGE ID")]
    id: String,
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "SOURCE DB")]
    source_database: String,
    #[tabled(rename = "CAPTURED")]
    captured: String,
    #[tabled(rename = "SIZE")]
    size: String,
    #[tabled(rename = "RETIRED")]
    retired: bool,
}

impl From<&ImageRecord> for ImageRow {
    fn from(image: &ImageRecord) -> Self {
        Self {
            id: image.image_id.clone(),
            name: image.image_name.clone(),
            source_database: image.source_database_name.clone(),
            captured: formatter::format_time(&image.source_database_timestamp),
            size: format_size(image.size_bytes),
            retired: image.retired,
        }
    }
}

fn format_size(bytes: u64) -> String {
    const GIB: u64 = 1024 * 1024 * 1024;
    const MIB: u64 = 1024 * 1024;
    if bytes >= GIB {
        format!("{:.1} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.1} MiB", bytes as f64 / MIB as f64)
    } else {
        format!("{} B", bytes)
    }
}

pub fn execute(args: ImagesArgs, global: &GlobalFlags) -> anyhow::Result<()> {
    let orchestrator = global.create_orchestrator()?;
    let images = orchestrator.list_images(args.all)?;
    let rows: Vec<ImageRow> = images.iter().map(ImageRow::from).collect();

    let format = OutputFormat::from_str(&args.format)?;
    let mut stdout = std::io::stdout().lock();
    formatter::print_output(&mut stdout, &rows, format, |writer, rows| {
        writeln!(writer, "{}", formatter::create_table(rows))?;
        Ok(())
    })?;

    Ok(())
}
