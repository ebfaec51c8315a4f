//! `fathom status` — per-asset audit staleness.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use fathom_core::AssetKind;
use fathom_sync::{check, AuditStore, HostAdapter, KindFilter, Staleness};

use super::load_host;

/// Arguments for `fathom status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Only list assets whose audit is stale.
    #[arg(long)]
    pub stale: bool,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self, project: &Path) -> Result<()> {
        let (config, host) = load_host(project)?;
        let store = AuditStore::from_config(project, &config);
        let filter = KindFilter::from_config(&config);

        let mut report = build_report(&host, &store, &filter);
        if self.stale {
            report.assets.retain(|row| row.staleness.is_stale());
        }
        if self.json {
            print_json(report, config.schema_version)?;
            return Ok(());
        }

        print_table(report, config.schema_version);
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct AssetStatus {
    identity: String,
    kind: AssetKind,
    staleness: Staleness,
}

#[derive(Debug, Clone)]
struct StatusReport {
    total: usize,
    stale_count: usize,
    assets: Vec<AssetStatus>,
}

#[derive(Serialize)]
struct StatusReportJson {
    summary: StatusSummaryJson,
    assets: Vec<AssetStatusJson>,
}

#[derive(Serialize)]
struct StatusSummaryJson {
    schema_version: u32,
    assets: usize,
    stale: usize,
}

#[derive(Serialize)]
struct AssetStatusJson {
    identity: String,
    kind: AssetKind,
    status: &'static str,
    detail: String,
}

#[derive(Tabled)]
struct StatusTableRow {
    #[tabled(rename = "asset")]
    identity: String,
    #[tabled(rename = "kind")]
    kind: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "detail")]
    detail: String,
}

fn build_report<H: HostAdapter>(host: &H, store: &AuditStore, filter: &KindFilter) -> StatusReport {
    let mut assets = Vec::new();
    for candidate in host.enumerate_candidates(filter) {
        let staleness = match host.resolve_source_path(&candidate.identity) {
            Some(source) => check(&source, &store.path_for(&candidate.identity)),
            None => Staleness::Undetermined,
        };
        assets.push(AssetStatus {
            identity: candidate.identity.to_string(),
            kind: candidate.kind,
            staleness,
        });
    }

    let stale_count = assets.iter().filter(|a| a.staleness.is_stale()).count();
    StatusReport {
        total: assets.len(),
        stale_count,
        assets,
    }
}

fn print_json(report: StatusReport, schema_version: u32) -> Result<()> {
    let payload = StatusReportJson {
        summary: StatusSummaryJson {
            schema_version,
            assets: report.total,
            stale: report.stale_count,
        },
        assets: report
            .assets
            .into_iter()
            .map(|row| AssetStatusJson {
                status: staleness_key(&row.staleness),
                detail: staleness_detail(&row.staleness),
                identity: row.identity,
                kind: row.kind,
            })
            .collect(),
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&payload).context("failed to serialize status JSON")?
    );
    Ok(())
}

fn print_table(report: StatusReport, schema_version: u32) {
    println!(
        "Fathom v{} | schema v{} | {} assets | {} stale",
        env!("CARGO_PKG_VERSION"),
        schema_version,
        report.total,
        report.stale_count,
    );

    if report.assets.is_empty() {
        println!("No assets to show.");
        return;
    }

    let separator = "■".repeat(67).bright_black().to_string();
    println!("{separator}");
    println!(
        "Indicators: {} CURRENT  {} MISSING  {} CHANGED  {} UNKNOWN",
        staleness_indicator(&Staleness::Current),
        staleness_indicator(&Staleness::Missing),
        staleness_indicator(&Staleness::Changed {
            stored: String::new().into(),
            current: String::new().into(),
        }),
        staleness_indicator(&Staleness::Undetermined),
    );
    println!("{separator}");

    let rows: Vec<StatusTableRow> = report
        .assets
        .into_iter()
        .map(|row| StatusTableRow {
            status: format!(
                "{} {}",
                staleness_indicator(&row.staleness),
                staleness_label(&row.staleness)
            ),
            detail: staleness_detail(&row.staleness),
            identity: row.identity,
            kind: row.kind.label().to_string(),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    if report.stale_count > 0 {
        println!("Run 'fathom audit' to refresh stale audits.");
    }
}

fn staleness_key(staleness: &Staleness) -> &'static str {
    match staleness {
        Staleness::Current => "current",
        Staleness::Missing => "missing",
        Staleness::Changed { .. } => "changed",
        Staleness::Undetermined => "undetermined",
    }
}

fn staleness_label(staleness: &Staleness) -> &'static str {
    match staleness {
        Staleness::Current => "CURRENT",
        Staleness::Missing => "MISSING",
        Staleness::Changed { .. } => "CHANGED",
        Staleness::Undetermined => "UNKNOWN",
    }
}

fn staleness_indicator(staleness: &Staleness) -> String {
    match staleness {
        Staleness::Current => "■".green().bold().to_string(),
        Staleness::Missing => "■".bright_black().bold().to_string(),
        Staleness::Changed { .. } => "■".yellow().bold().to_string(),
        Staleness::Undetermined => "■".red().bold().to_string(),
    }
}

fn staleness_detail(staleness: &Staleness) -> String {
    match staleness {
        Staleness::Current => "up to date".to_string(),
        Staleness::Missing => "no audit or no hash line".to_string(),
        Staleness::Changed { stored, current } => {
            format!("{} → {}", short_hash(&stored.0), short_hash(&current.0))
        }
        Staleness::Undetermined => "source unreadable".to_string(),
    }
}

fn short_hash(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}
