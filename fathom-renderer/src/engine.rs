//! Tera rendering engine — [`TemplateEngine`] and [`Renderer`].
//!
//! # Template mapping
//!
//! | Kind              | Template                             |
//! |-------------------|--------------------------------------|
//! | Blueprint         | `audit/blueprint.md.tera`            |
//! | ControlRig        | `audit/control_rig.md.tera`          |
//! | DataTable         | `audit/data_table.md.tera`           |
//! | DataAsset         | `audit/data_asset.md.tera`           |
//! | UserDefinedStruct | `audit/user_defined_struct.md.tera`  |
//!
//! Every kind template includes `shared/_header.tera`, which emits the
//! `Hash: <fingerprint>` marker line the staleness check reads back.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tera::Tera;

use fathom_core::{AssetKind, AuditSnapshot, Fingerprint};

use crate::context::AuditContext;
use crate::error::RenderError;

// ---------------------------------------------------------------------------
// Embedded templates — baked into the binary at compile time via include_str!
// ---------------------------------------------------------------------------

const TPLS: &[(&str, &str)] = &[
    ("shared/_header.tera", include_str!("templates/_partials/header.tera")),
    ("shared/_sections.tera", include_str!("templates/_partials/sections.tera")),
    ("audit/blueprint.md.tera", include_str!("templates/blueprint.md.tera")),
    ("audit/control_rig.md.tera", include_str!("templates/control_rig.md.tera")),
    ("audit/data_table.md.tera", include_str!("templates/data_table.md.tera")),
    ("audit/data_asset.md.tera", include_str!("templates/data_asset.md.tera")),
    (
        "audit/user_defined_struct.md.tera",
        include_str!("templates/user_defined_struct.md.tera"),
    ),
];

/// Template rendered for each kind.
pub fn template_name(kind: AssetKind) -> &'static str {
    match kind {
        AssetKind::Blueprint => "audit/blueprint.md.tera",
        AssetKind::ControlRig => "audit/control_rig.md.tera",
        AssetKind::DataTable => "audit/data_table.md.tera",
        AssetKind::DataAsset => "audit/data_asset.md.tera",
        AssetKind::UserDefinedStruct => "audit/user_defined_struct.md.tera",
    }
}

// ---------------------------------------------------------------------------
// Template loading helpers
// ---------------------------------------------------------------------------

fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RenderError {
    RenderError::Io { path: path.into(), source }
}

fn normalize_template_name(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/").to_lowercase()
}

fn collect_template_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), RenderError> {
    let entries = std::fs::read_dir(dir).map_err(|e| io_err(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        let path = entry.path();
        let meta = entry.metadata().map_err(|e| io_err(&path, e))?;
        if meta.is_dir() {
            collect_template_files(&path, out)?;
        } else if meta.is_file() {
            out.push(path);
        }
    }
    Ok(())
}

fn load_user_templates(dir: &Path) -> Result<Vec<(String, String)>, RenderError> {
    if !dir.exists() {
        return Ok(vec![]);
    }
    let mut files = Vec::new();
    collect_template_files(dir, &mut files)?;
    let mut templates = Vec::new();
    for path in files {
        if path.extension().and_then(|s| s.to_str()) != Some("tera") {
            continue;
        }
        let rel = path.strip_prefix(dir).unwrap_or(path.as_path());
        let name = normalize_template_name(rel);
        let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        templates.push((name, contents));
    }
    Ok(templates)
}

fn build_tera(user_template_dir: Option<&Path>) -> Result<Tera, RenderError> {
    let mut templates: HashMap<String, String> = HashMap::new();
    for (name, content) in TPLS {
        templates.insert(normalize_template_name(Path::new(name)), (*content).to_string());
    }
    if let Some(dir) = user_template_dir {
        for (name, content) in load_user_templates(dir)? {
            templates.insert(name, content);
        }
    }

    let mut tera = Tera::default();
    let items: Vec<(String, String)> = templates.into_iter().collect();
    tera.add_raw_templates(items)?;
    Ok(tera)
}

/// LF line endings, no trailing spaces, at most one blank line in a row,
/// exactly one trailing newline.
fn normalize_output(raw: &str) -> String {
    let unix = raw.replace("\r\n", "\n");
    let mut out = String::with_capacity(unix.len());
    let mut blank_run = 0usize;
    for line in unix.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    let body = out.trim_matches('\n');
    format!("{body}\n")
}

// ---------------------------------------------------------------------------
// TemplateEngine
// ---------------------------------------------------------------------------

/// Tera-based engine for rendering templates with optional user overrides.
///
/// `user_template_dir` may contain `.tera` files that override embedded defaults.
/// Template names are normalised to lowercase and relative paths.
pub struct TemplateEngine {
    tera: Tera,
}

impl TemplateEngine {
    /// Construct a new [`TemplateEngine`], loading embedded templates plus any
    /// overrides found in `user_template_dir`.
    pub fn new(user_template_dir: Option<&Path>) -> Result<Self, RenderError> {
        let tera = build_tera(user_template_dir)?;
        Ok(TemplateEngine { tera })
    }

    /// Render the kind template for `ctx` and normalise the result.
    pub fn render(&self, ctx: &AuditContext, kind: AssetKind) -> Result<String, RenderError> {
        let tera_ctx = ctx.to_tera_context()?;
        let raw = self.tera.render(template_name(kind), &tera_ctx)?;
        Ok(normalize_output(&raw))
    }
}

// ---------------------------------------------------------------------------
// Renderer
// ---------------------------------------------------------------------------

/// Renders audit documents for one schema version.
///
/// Create once and share (`Arc<Renderer>`); rendering takes `&self` and
/// runs on background threads.
pub struct Renderer {
    engine: TemplateEngine,
    schema_version: u32,
}

impl Renderer {
    /// Construct a [`Renderer`] with embedded templates.
    pub fn new(schema_version: u32) -> Result<Self, RenderError> {
        Self::with_overrides(schema_version, None)
    }

    /// Construct a [`Renderer`] whose templates may be overridden from `dir`.
    pub fn with_overrides(schema_version: u32, dir: Option<&Path>) -> Result<Self, RenderError> {
        Ok(Renderer {
            engine: TemplateEngine::new(dir)?,
            schema_version,
        })
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    /// Render the Markdown audit document for `snapshot`.
    pub fn render(
        &self,
        snapshot: &AuditSnapshot,
        fingerprint: Option<&Fingerprint>,
    ) -> Result<String, RenderError> {
        let ctx = AuditContext::from_snapshot(snapshot, fingerprint, self.schema_version);
        self.engine.render(&ctx, snapshot.kind)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
