//! `fathom diff <identity>` — show the unified diff a re-audit would write.

use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::Args;

use fathom_core::{layout, AssetIdentity};
use fathom_detector::classify;
use fathom_renderer::Renderer;
use fathom_sync::{diff_snapshot, AuditStore, HostAdapter};

use super::load_host;

/// Arguments for `fathom diff`.
#[derive(Args, Debug)]
pub struct DiffArgs {
    /// Package name of the asset, e.g. `/Game/UI/WBP_Menu`.
    pub identity: String,
}

impl DiffArgs {
    pub fn run(self, project: &Path) -> Result<()> {
        let identity = AssetIdentity::from(self.identity.trim());
        let (config, host) = load_host(project)?;

        let kind = classify(&identity, &config.content_prefix, &config.kinds)
            .with_context(|| format!("'{identity}' is not audited"))?;
        if host.kind_of(&identity).is_none() {
            bail!(
                "'{identity}' not found under {}",
                host.layout().root().display()
            );
        }

        let renderer = Renderer::with_overrides(
            config.schema_version,
            Some(layout::templates_dir(project).as_path()),
        )
        .context("failed to load audit templates")?;
        let store = AuditStore::from_config(project, &config);
        let asset = host
            .load(&identity, kind)
            .with_context(|| format!("failed to load '{identity}'"))?;
        let snapshot = host.gather(&asset);

        match diff_snapshot(&store, &renderer, &snapshot)
            .with_context(|| format!("diff failed for '{identity}'"))?
        {
            None => println!("No differences for '{identity}'."),
            Some(diff) => {
                print!("{diff}");
                if !diff.ends_with('\n') {
                    println!();
                }
            }
        }
        Ok(())
    }
}
