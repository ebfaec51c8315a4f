//! `fathom init` — default config plus the audit manifest.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;

use fathom_core::{config, layout};
use fathom_sync::AuditStore;

/// Write `.fathom/config.yaml` (kept if present) and the audit manifest.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Stale entries re-audited per tick, written into a new config.
    #[arg(long)]
    pub batch_size: Option<usize>,
}

impl InitArgs {
    pub fn run(self, project: &Path) -> Result<()> {
        let existed = layout::config_path(project).exists();
        let mut config = config::init_at(project)
            .with_context(|| format!("failed to init '{}'", project.display()))?;

        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
            config::save_at(project, &config).context("failed to save config")?;
        }

        let store = AuditStore::from_config(project, &config);
        let manifest = store
            .write_manifest()
            .context("failed to write audit manifest")?;

        if existed {
            println!("✓ Using existing config at {}", layout::config_path(project).display());
        } else {
            println!("✓ Wrote {}", layout::config_path(project).display());
        }
        println!("  Audit root: {}", store.root().display());
        println!("  Manifest:   {}", manifest.display());
        Ok(())
    }
}
