//! Provision a clone from an image.

use clap::Args;
use dbclone::CreateCloneRequest;

use crate::cli::GlobalFlags;

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Image ID to clone from
    pub image: String,

    /// Host the clone is exposed to
    #[arg(long)]
    pub host: String,

    /// Database engine instance to attach to (e.g. SQL01)
    #[arg(long)]
    pub instance: String,

    /// Database name for the attached clone
    #[arg(long, value_name = "NAME")]
    pub database: String,
}

pub async fn execute(args: CreateArgs, global: &GlobalFlags) -> anyhow::Result<()> {
    let orchestrator = global.create_orchestrator()?;
    let clone = orchestrator
        .create_clone(CreateCloneRequest {
            image_id: args.image,
            host_name: args.host,
            sql_instance: args.instance,
            database_name: args.database,
        })
        .await?;

    println!("{}", clone.clone_id);
    Ok(())
}
