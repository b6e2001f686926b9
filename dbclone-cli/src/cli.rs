//! CLI definition and argument parsing for dbclone-cli.
//! This module contains the main CLI structure, subcommands, and flag
//! definitions.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use dbclone::{CloneOrchestrator, LocalDiskBinder};

#[derive(Parser, Debug)]
#[command(name = "dbclone", author, version, about = "dbclone CLI")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalFlags,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
#[non_exhaustive]
pub enum Commands {
    /// Register an image produced by a capture workflow
    Register(crate::commands::register::RegisterArgs),

    /// List images
    Images(crate::commands::images::ImagesArgs),

    /// Retire an image (fails while clones reference it)
    Retire(crate::commands::retire::RetireArgs),

    /// Provision a clone from an image
    Create(crate::commands::create::CreateArgs),

    /// List clones
    #[command(visible_alias = "ls")]
    List(crate::commands::list::ListArgs),

    /// Remove one or more clones
    Rm(crate::commands::rm::RmArgs),

    /// Re-attach a disabled clone
    Enable(crate::commands::enable::EnableArgs),

    /// Detach a clone without destroying its storage
    Disable(crate::commands::disable::DisableArgs),

    /// Re-drive abandoned in-flight operations
    Reconcile(crate::commands::reconcile::ReconcileArgs),
}

// ============================================================================
// GLOBAL FLAGS
// ============================================================================

#[derive(Args, Debug, Clone)]
pub struct GlobalFlags {
    /// Enable debug output
    #[arg(long, global = true)]
    pub debug: bool,

    /// dbclone home directory
    #[arg(long, global = true, env = "DBCLONE_HOME")]
    pub home: Option<PathBuf>,
}

impl GlobalFlags {
    pub fn create_orchestrator(&self) -> anyhow::Result<CloneOrchestrator> {
        let home_dir = self.home.clone().unwrap_or_else(|| {
            let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
            path.push(".dbclone");
            path
        });

        let options = crate::config::load_config(&home_dir);

        let binder = LocalDiskBinder::new(&options.home_dir)
            .map_err(dbclone::CloneError::from)?;
        let orchestrator = CloneOrchestrator::new(options, Arc::new(binder))?;
        Ok(orchestrator)
    }
}
