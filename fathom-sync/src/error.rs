//! Error types for fathom-sync.

use std::path::PathBuf;

use thiserror::Error;

use fathom_core::ConfigError;
use fathom_renderer::RenderError;

/// All errors that can arise from audit cache operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// An error from the rendering engine.
    #[error("render error: {0}")]
    Render(#[from] RenderError),

    /// Invalid or unreadable project configuration.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Manifest serialization/deserialization error.
    #[error("manifest JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The host could not provide an asset.
    #[error("host error: {0}")]
    Host(#[from] HostError),

    /// A background job did not produce a result.
    #[error("background task failed: {0}")]
    Task(#[from] TaskError),
}

/// Failures reported by a [`crate::host::HostAdapter`].
#[derive(Debug, Error)]
pub enum HostError {
    #[error("asset '{identity}' is not known to the host")]
    NotFound { identity: String },

    #[error("failed to load '{identity}': {reason}")]
    Load { identity: String, reason: String },

    #[error("host I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Why a [`crate::executor::BackgroundTask`] has no value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("background task panicked")]
    Panicked,

    #[error("background task was dropped before it ran")]
    Abandoned,
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
