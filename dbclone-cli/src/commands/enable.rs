//! Re-attach a disabled clone.

use clap::Args;

use crate::cli::GlobalFlags;

#[derive(Args, Debug)]
pub struct EnableArgs {
    /// Clone ID
    pub clone: String,
}

pub async fn execute(args: EnableArgs, global: &GlobalFlags) -> anyhow::Result<()> {
    let orchestrator = global.create_orchestrator()?;
    let record = orchestrator.enable_clone(&args.clone).await?;
    println!("{}", record.clone_id);
    Ok(())
}
