//! `fathom deps`, `fathom refs` and `fathom search`: queries over the
//! content reference graph.

use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use fathom_core::{AssetIdentity, AssetKind};
use fathom_daemon::{FsHost, SearchQuery};

use super::load_host;

/// Packages an asset names.
#[derive(Args, Debug)]
pub struct DepsArgs {
    /// Package name, e.g. `/Game/UI/WBP_Menu`.
    pub identity: String,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

/// Assets that name a package.
#[derive(Args, Debug)]
pub struct RefsArgs {
    /// Package name, e.g. `/Game/UI/T_Logo`.
    pub identity: String,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

/// Ranked name search over indexed assets.
#[derive(Args, Debug)]
pub struct SearchArgs {
    /// Search terms; every term must match the name or the package path.
    pub terms: Vec<String>,

    /// Only assets of this kind.
    #[arg(long, value_parser = parse_kind)]
    pub kind: Option<AssetKind>,

    /// Only packages under this path, e.g. `/Game/UI/`.
    #[arg(long)]
    pub path_prefix: Option<String>,

    /// Maximum number of results.
    #[arg(long)]
    pub limit: Option<usize>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize, Tabled)]
struct PackageRow {
    #[tabled(rename = "package")]
    package: String,
    #[tabled(rename = "kind")]
    kind: String,
    #[tabled(rename = "on disk")]
    on_disk: bool,
}

#[derive(Serialize)]
struct PackageListJson<'a> {
    asset: &'a str,
    packages: &'a [PackageRow],
}

impl DepsArgs {
    pub fn run(self, project: &Path) -> Result<()> {
        let identity = AssetIdentity::from(self.identity.trim());
        let (_, host) = load_host(project)?;
        let Some(dependencies) = host.dependencies(&identity) else {
            bail!(
                "'{identity}' not found under {}",
                host.layout().root().display()
            );
        };
        let rows = package_rows(&host, &dependencies);
        print_packages(&identity, &rows, self.json, "depends on nothing")
    }
}

impl RefsArgs {
    pub fn run(self, project: &Path) -> Result<()> {
        let identity = AssetIdentity::from(self.identity.trim());
        let (_, host) = load_host(project)?;
        let referencers = host.referencers(&identity);
        if referencers.is_empty() && host.asset(&identity).is_none() {
            bail!(
                "'{identity}' not found under {}",
                host.layout().root().display()
            );
        }
        let rows = package_rows(&host, &referencers);
        print_packages(&identity, &rows, self.json, "is not referenced")
    }
}

impl SearchArgs {
    pub fn run(self, project: &Path) -> Result<()> {
        let query = SearchQuery {
            terms: self.terms.join(" "),
            kind: self.kind,
            path_prefix: self.path_prefix,
            limit: self.limit,
        };
        if query.is_empty() {
            bail!("give search terms, --kind or --path-prefix");
        }

        let (_, host) = load_host(project)?;
        let hits = host.search(&query);
        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&hits).context("failed to serialize search results")?
            );
            return Ok(());
        }

        if hits.is_empty() {
            println!("No matching assets.");
            return Ok(());
        }
        let rows: Vec<PackageRow> = hits
            .iter()
            .map(|hit| PackageRow {
                package: hit.package.to_string(),
                kind: kind_label(hit.kind),
                on_disk: true,
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}

fn package_rows(host: &FsHost, packages: &[AssetIdentity]) -> Vec<PackageRow> {
    packages
        .iter()
        .map(|package| {
            let asset = host.asset(package);
            PackageRow {
                package: package.to_string(),
                kind: kind_label(asset.as_ref().and_then(|a| a.kind)),
                on_disk: asset.is_some(),
            }
        })
        .collect()
}

fn print_packages(identity: &AssetIdentity, rows: &[PackageRow], json: bool, none: &str) -> Result<()> {
    if json {
        let payload = PackageListJson {
            asset: identity.as_str(),
            packages: rows,
        };
        println!(
            "{}",
            serde_json::to_string_pretty(&payload).context("failed to serialize packages")?
        );
        return Ok(());
    }

    if rows.is_empty() {
        println!("'{identity}' {none}.");
        return Ok(());
    }
    println!("{} ({})", identity.to_string().bold(), rows.len());
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    Ok(())
}

fn kind_label(kind: Option<AssetKind>) -> String {
    kind.map(|k| k.label().to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn parse_kind(raw: &str) -> Result<AssetKind, String> {
    AssetKind::all()
        .iter()
        .copied()
        .find(|kind| kind.to_string() == raw || kind.label().eq_ignore_ascii_case(raw))
        .ok_or_else(|| {
            let names: Vec<String> = AssetKind::all().iter().map(ToString::to_string).collect();
            format!("unknown kind '{raw}' (expected one of: {})", names.join(", "))
        })
}
