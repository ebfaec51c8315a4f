//! # fathom-renderer
//!
//! Tera-based template engine that turns [`fathom_core::AuditSnapshot`]s into
//! Markdown audit documents. Each document's header carries a
//! `Hash: <fingerprint>` line identifying the source bytes it was built from.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use fathom_core::{AssetIdentity, AssetKind, AuditSnapshot, Fingerprint};
//! use fathom_renderer::Renderer;
//!
//! fn render_one() {
//!     if let Ok(renderer) = Renderer::new(10) {
//!         let snap = AuditSnapshot::new(AssetIdentity::from("/Game/BP_Door"), AssetKind::Blueprint, None);
//!         if let Ok(doc) = renderer.render(&snap, Some(&Fingerprint::from("ab12"))) {
//!             println!("{doc}");
//!         }
//!     }
//! }
//! ```

pub mod context;
pub mod engine;
pub mod error;

pub use context::AuditContext;
pub use engine::{template_name, Renderer, TemplateEngine};
pub use error::RenderError;
