//! `fathom daemon` — foreground runtime and its control socket.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Subcommand;
use serde_json::Value;

use fathom_daemon::paths::socket_path;
use fathom_daemon::{
    request_audit, request_reconcile, request_status, request_stop, start_blocking, DaemonError,
};

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Run the daemon in the foreground (watcher + audit loop + socket server).
    Start,
    /// Request graceful daemon shutdown over the project socket.
    Stop,
    /// Query daemon runtime status.
    Status,
    /// Start a reconciliation pass unless one is running.
    Reconcile,
    /// Force a re-audit of one asset.
    Audit {
        /// Package name, e.g. `/Game/UI/WBP_Menu`.
        identity: String,
    },
}

pub fn run(command: DaemonCommand, project: &Path) -> Result<()> {
    match command {
        DaemonCommand::Start => {
            start_blocking(project).context("daemon exited with error")?;
        }
        DaemonCommand::Stop => match request_stop(project) {
            Ok(()) => println!("daemon stop requested"),
            Err(DaemonError::DaemonNotRunning { .. }) => {
                println!("daemon is not running");
            }
            Err(err) => return Err(err).context("failed to stop daemon"),
        },
        DaemonCommand::Status => match request_status(project) {
            Ok(status) => print_json(&status)?,
            Err(DaemonError::DaemonNotRunning { .. }) => {
                print_json(&serde_json::json!({
                    "running": false,
                    "socket": socket_path(project).display().to_string(),
                }))?;
            }
            Err(err) => return Err(err).context("failed to query daemon status"),
        },
        DaemonCommand::Reconcile => {
            let reply = request_reconcile(project).context("failed to request reconciliation")?;
            if reply["triggered"].as_bool().unwrap_or(false) {
                println!("reconciliation pass started");
            } else {
                println!(
                    "reconciliation already running ({})",
                    reply["phase"].as_str().unwrap_or("unknown")
                );
            }
        }
        DaemonCommand::Audit { identity } => {
            let reply = request_audit(project, &identity)
                .with_context(|| format!("failed to audit '{identity}'"))?;
            print_json(&reply)?;
        }
    }

    Ok(())
}

fn print_json(value: &Value) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to render daemon JSON")?
    );
    Ok(())
}
