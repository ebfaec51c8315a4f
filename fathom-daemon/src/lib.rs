//! Daemon runtime: filesystem asset host, content watcher, audit host loop
//! and the per-project control socket.

pub mod asset_graph;
mod error;
mod executor;
pub mod fs_host;
pub mod paths;
pub mod protocol;
mod runtime;

pub use asset_graph::{AssetGraph, IndexedAsset, SearchHit, SearchQuery};
pub use error::DaemonError;
pub use executor::TokioExecutor;
pub use fs_host::{extract_references, ContentLayout, FsAsset, FsHost};
pub use protocol::{
    request_audit, request_dependencies, request_reconcile, request_referencers, request_search,
    request_show, request_status, request_stop, send_request, DaemonRequest, DaemonResponse,
};
pub use runtime::{audit_once, host_events, init_tracing, run, start_blocking, HostEvent, OneShotReport};
