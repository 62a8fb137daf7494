mod cli;
mod context;
mod handlers;
mod output;

use clap::Parser;
use cli::{Cli, Commands};
use context::CliContext;
use tracing_subscriber::EnvFilter;

fn init_logging() -> anyhow::Result<()> {
    if let Ok(log_path) = std::env::var("KANBAN_SYNC_DEBUG_LOG") {
        let log_file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        tracing_subscriber::fmt()
            .with_writer(log_file)
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
            )
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_ansi(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging()?;

    let cli = Cli::parse();
    let ctx = CliContext::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Replay(args) => handlers::replay::handle(&ctx, args).await?,
        Commands::Check { snapshot } => handlers::replay::check(&snapshot)?,
        Commands::Position(args) => handlers::position::handle(args)?,
        Commands::Config => handlers::config::handle(&ctx)?,
    }

    Ok(())
}
