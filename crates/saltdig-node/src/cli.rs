use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "saltdig", about = "Saltdig bounty settlement service", version)]
pub struct Cli {
    /// TOML configuration file; environment variables override it.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the API server with the periodic reconciler loop.
    Serve,
    /// Run one reconciliation pass and exit. Exit code 0 on success
    /// (per-bounty failures are logged and do not fail the run), 1 on
    /// fatal startup error.
    Reconcile,
}
