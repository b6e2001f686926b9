//! Detach a clone's database without destroying its storage.

use clap::Args;

use crate::cli::GlobalFlags;

#[derive(Args, Debug)]
pub struct DisableArgs {
    /// Clone ID
    pub clone: String,
}

pub async fn execute(args: DisableArgs, global: &GlobalFlags) -> anyhow::Result<()> {
    let orchestrator = global.create_orchestrator()?;
    let record = orchestrator.disable_clone(&args.clone).await?;
    println!("{}", record.clone_id);
    Ok(())
}
