use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "kanban-sync")]
#[command(about = "Replay and inspect realtime board reconciliation", long_about = None)]
#[command(
    version,
    long_version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_COMMIT_HASH"), ")")
)]
pub struct Cli {
    /// Path to config file (or set KANBAN_SYNC_CONFIG env var)
    #[arg(long, global = true, value_name = "FILE", env = "KANBAN_SYNC_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Apply a stream of remote events to a board snapshot
    Replay(ReplayArgs),
    /// Report ordering and single-presence problems in a snapshot
    Check {
        #[arg(long, value_name = "FILE")]
        snapshot: PathBuf,
    },
    /// Compute the position for inserting at an index among siblings
    Position(PositionArgs),
    /// Print the effective configuration
    Config,
}

#[derive(Args)]
pub struct ReplayArgs {
    /// Board snapshot (JSON with boards, columns, cards, sprints)
    #[arg(long, value_name = "FILE")]
    pub snapshot: PathBuf,

    /// One event envelope per line
    #[arg(long, value_name = "FILE")]
    pub events: PathBuf,

    /// Board topic the events are published on. Defaults to the snapshot's first board.
    #[arg(long)]
    pub board: Option<i64>,

    /// Dispatch events directly instead of through the in-memory broker
    #[arg(long)]
    pub direct: bool,

    /// Write the resulting snapshot to this file
    #[arg(long, value_name = "FILE")]
    pub output: Option<PathBuf>,
}

#[derive(Args)]
pub struct PositionArgs {
    /// Sibling positions, comma separated, in any order
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    pub siblings: Vec<f64>,

    /// Target index among the siblings
    #[arg(long)]
    pub index: usize,
}
