//! Fathom — per-asset audit documents kept in step with content.
//!
//! # Usage
//!
//! ```text
//! fathom [--project <dir>] init
//! fathom [--project <dir>] audit [--json]
//! fathom [--project <dir>] status [--stale] [--json]
//! fathom [--project <dir>] diff <identity>
//! fathom [--project <dir>] deps <identity> [--json]
//! fathom [--project <dir>] refs <identity> [--json]
//! fathom [--project <dir>] search <terms>... [--kind <kind>] [--path-prefix <path>] [--limit <n>] [--json]
//! fathom [--project <dir>] daemon start|stop|status|reconcile|audit <identity>
//! ```

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    audit::AuditArgs,
    daemon::DaemonCommand,
    diff::DiffArgs,
    init::InitArgs,
    refs::{DepsArgs, RefsArgs, SearchArgs},
    status::StatusArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "fathom",
    version,
    about = "Keep Markdown audits of project content assets up to date",
    long_about = None,
)]
struct Cli {
    /// Project root (the directory holding `Content/`).
    #[arg(long, short = 'C', global = true, default_value = ".")]
    project: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a default config and the audit manifest.
    Init(InitArgs),

    /// Run one reconciliation pass to completion.
    Audit(AuditArgs),

    /// Show per-asset audit staleness.
    Status(StatusArgs),

    /// Show the unified diff a re-audit of one asset would write.
    Diff(DiffArgs),

    /// List the packages an asset references.
    Deps(DepsArgs),

    /// List the assets that reference a package.
    Refs(RefsArgs),

    /// Search indexed assets by name, kind or path.
    Search(SearchArgs),

    /// Run or talk to the background audit daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    let project = commands::resolve_project(&cli.project)?;
    match cli.command {
        Commands::Init(args) => args.run(&project),
        Commands::Audit(args) => args.run(&project),
        Commands::Status(args) => args.run(&project),
        Commands::Diff(args) => args.run(&project),
        Commands::Deps(args) => args.run(&project),
        Commands::Refs(args) => args.run(&project),
        Commands::Search(args) => args.run(&project),
        Commands::Daemon { command } => commands::daemon::run(command, &project),
    }
}
