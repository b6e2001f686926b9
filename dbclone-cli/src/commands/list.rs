//! List clones.

use std::io::Write;

use clap::Args;
use dbclone::{CloneFilter, CloneRecord, CloneStatus};
use serde::Serialize;
use tabled::Tabled;

use crate::cli::GlobalFlags;
use crate::formatter::{self, OutputFormat};

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Only clones of this image
    #[arg(long)]
    pub image: Option<String>,

    /// Only clones on this host
    #[arg(long)]
    pub host: Option<String>,

    /// Only clones in this status (provisioning, enabled, disabled,
    /// disabling, removed, failed)
    #[arg(long)]
    pub status: Option<String>,

    /// Output format: table, json, yaml
    #[arg(long, default_value = "table")]
    pub format: String,
}

#[derive(Debug, Serialize, Tabled)]
struct CloneRow {
    #[tabled(rename = "CLONE ID")]
    id: String,
    #[tabled(rename = "IMAGE")]
    image: String,
    #[tabled(rename = "ATTACH POINT")]
    attach_point: String,
    #[tabled(rename = "STATUS")]
    status: String,
    #[tabled(rename = "UPDATED")]
    updated: String,
}

impl From<&CloneRecord> for CloneRow {
    fn from(clone: &CloneRecord) -> Self {
        Self {
            id: clone.clone_id.clone(),
            image: clone.image_id.clone(),
            attach_point: clone.attach_point(),
            status: clone.status.to_string(),
            updated: formatter::format_time(&clone.updated_at),
        }
    }
}

pub fn execute(args: ListArgs, global: &GlobalFlags) -> anyhow::Result<()> {
    let status = args
        .status
        .as_deref()
        .map(|s| s.parse::<CloneStatus>())
        .transpose()?;

    let filter = CloneFilter {
        image_id: args.image,
        host_name: args.host,
        status,
    };

    let orchestrator = global.create_orchestrator()?;
    let clones = orchestrator.list_clones(&filter)?;
    let rows: Vec<CloneRow> = clones.iter().map(CloneRow::from).collect();

    let format = OutputFormat::from_str(&args.format)?;
    let mut stdout = std::io::stdout().lock();
    formatter::print_output(&mut stdout, &rows, format, |writer, rows| {
        writeln!(writer, "{}", formatter::create_table(rows))?;
        Ok(())
    })?;

    Ok(())
}
