mod cli;
mod commands;
mod config;
mod formatter;

use std::process;

use clap::Parser;
use cli::Cli;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing based on --debug flag
    let level = if cli.global.debug { "debug" } else { "warn" };
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let result = match cli.command {
        cli::Commands::Register(args) => commands::register::execute(args, &cli.global),
        cli::Commands::Images(args) => commands::images::execute(args, &cli.global),
        cli::Commands::Retire(args) => commands::retire::execute(args, &cli.global),
        cli::Commands::Create(args) => commands::create::execute(args, &cli.global).await,
        cli::Commands::List(args) => commands::list::execute(args, &cli.global),
        cli::Commands::Rm(args) => commands::rm::execute(args, &cli.global).await,
        cli::Commands::Enable(args) => commands::enable::execute(args, &cli.global).await,
        cli::Commands::Disable(args) => commands::disable::execute(args, &cli.global).await,
        cli::Commands::Reconcile(args) => commands::reconcile::execute(args, &cli.global).await,
    };

    if let Err(error) = result {
        eprintln!("Error: {}", error);
        process::exit(1);
    }
}
