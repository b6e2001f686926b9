//! Remove one or more clones.

use clap::Args;

use crate::cli::GlobalFlags;

#[derive(Args, Debug)]
pub struct RmArgs {
    /// Clone ID(s)
    #[arg(value_name = "CLONE", required = true, num_args = 1..)]
    pub clones: Vec<String>,
}

pub async fn execute(args: RmArgs, global: &GlobalFlags) -> anyhow::Result<()> {
    let orchestrator = global.create_orchestrator()?;

    let mut first_error = None;
    for clone_id in &args.clones {
        match orchestrator.remove_clone(clone_id).await {
            Ok(()) => println!("{}", clone_id),
            Err(e) => {
                eprintln!("Error: {}: {}", clone_id, e);
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}
