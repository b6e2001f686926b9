//! Re-drive abandoned in-flight operations.

use std::io::Write;

use clap::Args;

use crate::cli::GlobalFlags;
use crate::formatter::{self, OutputFormat};

#[derive(Args, Debug)]
pub struct ReconcileArgs {
    /// Output format: table, json, yaml
    #[arg(long, default_value = "table")]
    pub format: String,
}

pub async fn execute(args: ReconcileArgs, global: &GlobalFlags) -> anyhow::Result<()> {
    let orchestrator = global.create_orchestrator()?;
    let report = orchestrator.reconcile().await?;

    let format = OutputFormat::from_str(&args.format)?;
    let mut stdout = std::io::stdout().lock();
    formatter::print_output(&mut stdout, &report, format, |writer, report| {
        writeln!(
            writer,
            "resumed {}, completed {}, failed {}",
            report.resumed, report.completed, report.failed
        )?;
        Ok(())
    })?;

    Ok(())
}
