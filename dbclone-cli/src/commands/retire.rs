//! Retire an image.

use clap::Args;

use crate::cli::GlobalFlags;

#[derive(Args, Debug)]
pub struct RetireArgs {
    /// Image ID
    pub image: String,
}

pub fn execute(args: RetireArgs, global: &GlobalFlags) -> anyhow::Result<()> {
    let orchestrator = global.create_orchestrator()?;
    orchestrator.retire_image(&args.image)?;
    println!("{}", args.image);
    Ok(())
}
