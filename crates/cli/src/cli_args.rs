use clap::{Parser, Subcommand};
use runledger_core::ids::{AgentId, ProjectId, RunId, TenantId};
use std::path::PathBuf;

/// Command line arguments for the runledger operator CLI
#[derive(Parser, Debug)]
#[clap(
    name = "runledger",
    about = "Inspect and maintain a runledger database",
    version
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Commands,

    /// TOML configuration file
    #[arg(short, long, global = true, env = "RUNLEDGER_CONFIG")]
    pub config: Option<PathBuf>,

    /// SQLite database, overrides `[database] path`
    #[arg(long, global = true, env = "RUNLEDGER_DB")]
    pub db: Option<PathBuf>,

    /// Tenant whose rows are read
    #[arg(short, long, global = true, env = "RUNLEDGER_TENANT")]
    pub tenant: Option<TenantId>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the database and apply the schema
    Init,
    /// Execution plan tools
    Plan {
        #[command(subcommand)]
        command: PlanCommands,
    },
    /// Dump a run's trajectory page by page
    Trajectory {
        run: RunId,
        /// Only these event types (repeatable)
        #[arg(long = "type")]
        types: Vec<String>,
        #[command(flatten)]
        page: PageArgs,
    },
    /// Aggregate statistics for a run's trajectory
    Stats { run: RunId },
    /// Dump the audit trail
    Audit {
        #[arg(long)]
        project: Option<ProjectId>,
        #[arg(long)]
        run: Option<RunId>,
        #[arg(long)]
        agent: Option<AgentId>,
        #[arg(long)]
        action: Option<String>,
        #[command(flatten)]
        page: PageArgs,
    },
}

#[derive(Subcommand, Debug)]
pub enum PlanCommands {
    /// Check a JSON plan document and print its dispatch rounds
    Validate { file: PathBuf },
}

#[derive(clap::Args, Debug, Clone, Default)]
pub struct PageArgs {
    /// Page size, clamped to `[events] max_page_size`
    #[arg(long)]
    pub limit: Option<usize>,
    /// Resume after a cursor printed by a previous call
    #[arg(long)]
    pub cursor: Option<String>,
    /// Follow cursors until the last page
    #[arg(long)]
    pub all: bool,
    /// Print one JSON object per line
    #[arg(long)]
    pub json: bool,
}
