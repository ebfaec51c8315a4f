//! `fathom audit` — one reconciliation pass, run to completion.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::Local;
use clap::Args;
use colored::Colorize;

use fathom_daemon::{audit_once, init_tracing};

#[derive(Args, Debug)]
pub struct AuditArgs {
    /// Emit the pass report as JSON.
    #[arg(long)]
    pub json: bool,
}

impl AuditArgs {
    pub fn run(self, project: &Path) -> Result<()> {
        init_tracing();
        let report = audit_once(project)
            .with_context(|| format!("audit failed for '{}'", project.display()))?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to serialize audit report")?
            );
            return Ok(());
        }

        let Some(summary) = report.summary.as_ref() else {
            println!("No pass completed.");
            return Ok(());
        };
        println!(
            "Audited {} asset(s) in {} ms (finished {})",
            summary.scanned,
            report.duration_ms,
            summary.finished_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
        );
        println!("  stale:      {}", summary.stale);
        println!("  re-audited: {}", summary.re_audited.to_string().green());
        println!("  swept:      {}", summary.swept);
        let failed = summary.failed + report.failed_writes;
        if failed > 0 {
            println!("  failed:     {}", failed.to_string().red().bold());
        }
        if report.writes.abandoned > 0 {
            println!(
                "  {} write(s) still running at exit",
                report.writes.abandoned.to_string().yellow()
            );
        }
        Ok(())
    }
}
