use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use notify::event::{ModifyKind, RenameMode};
use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};

use fathom_core::{config, AssetIdentity, AssetKind, AuditConfig};
use fathom_sync::{
    AuditSubsystem, DispatchOutcome, Executor, PassSummary, ReconciliationPhase,
    ShutdownReport, SubsystemStatus, TickResult,
};

use crate::asset_graph::SearchQuery;
use crate::error::{io_err, DaemonError};
use crate::executor::TokioExecutor;
use crate::fs_host::{ContentLayout, FsHost};
use crate::paths::{run_dir, socket_path, DEBOUNCE_WINDOW, ONE_SHOT_DRAIN_TIMEOUT};
use crate::protocol::{DaemonRequest, DaemonResponse};

/// Poll period of the one-shot pass while the background hash runs.
const ONE_SHOT_POLL: Duration = Duration::from_millis(5);

/// A content change, already mapped to asset identities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    Saved(AssetIdentity),
    Removed(AssetIdentity),
    Renamed { old: AssetIdentity, new: AssetIdentity },
}

#[derive(Debug, Clone)]
enum ControlCommand {
    Status,
    Reconcile,
    Audit(AssetIdentity),
    Dependencies(AssetIdentity),
    Referencers(AssetIdentity),
    Show(AssetIdentity),
    Search(SearchQuery),
}

struct ControlJob {
    command: ControlCommand,
    respond_to: oneshot::Sender<Result<Value, String>>,
}

/// Result of [`audit_once`].
#[derive(Debug, Clone, Serialize)]
pub struct OneShotReport {
    pub indexed: usize,
    pub summary: Option<PassSummary>,
    pub writes: ShutdownReport,
    pub failed_writes: usize,
    pub duration_ms: u128,
}

/// Start the daemon runtime for `project` and block until it exits.
pub fn start_blocking(project: &Path) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(project.to_path_buf()))
}

/// Run the daemon runtime: index scan, content watcher, audit host loop,
/// socket server and signal handler.
pub async fn run(project: PathBuf) -> Result<(), DaemonError> {
    let config = config::load_at(&project)?;
    ensure_runtime_dirs(&project, &config)?;

    let host = FsHost::from_config(&project, &config);
    host.begin_scan();
    let started_at_unix = unix_seconds_now();

    let (event_tx, event_rx) = mpsc::channel::<HostEvent>(256);
    let (control_tx, control_rx) = mpsc::channel::<ControlJob>(64);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let scan_handle = {
        let host = host.clone();
        tokio::spawn(async move { index_task(host).await })
    };

    let watcher_handle = {
        let shutdown = shutdown_tx.clone();
        let layout = host.layout().clone();
        tokio::spawn(async move {
            let result = watcher_task(layout, event_tx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let audit_handle = {
        let shutdown = shutdown_tx.clone();
        let project = project.clone();
        let host = host.clone();
        tokio::spawn(async move {
            let result = audit_host_task(
                project,
                host,
                config,
                event_rx,
                control_rx,
                shutdown.subscribe(),
                started_at_unix,
            )
            .await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let project = project.clone();
        tokio::spawn(async move {
            let result =
                socket_server_task(project, control_tx, shutdown.clone(), shutdown.subscribe())
                    .await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (scan_result, watcher_result, audit_result, socket_result, signal_result) = tokio::join!(
        scan_handle,
        watcher_handle,
        audit_handle,
        socket_handle,
        signal_handle
    );

    handle_join("index_scan", scan_result)?;
    handle_join("watcher", watcher_result)?;
    handle_join("audit_host", audit_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

/// Run one full reconciliation pass over `project` to completion, without
/// the watcher or socket.
pub fn audit_once(project: &Path) -> Result<OneShotReport, DaemonError> {
    let started = std::time::Instant::now();
    let config = config::load_at(project)?;
    let host = FsHost::from_config(project, &config);
    let indexed = host.scan()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    let executor: Arc<dyn Executor> = Arc::new(TokioExecutor::new(runtime.handle().clone()));
    let mut subsystem = AuditSubsystem::initialize(project, host, executor, config)?;

    while subsystem.is_ticking() {
        let result = subsystem.tick();
        if result == TickResult::Continue
            && subsystem.phase() == ReconciliationPhase::BackgroundHash
        {
            std::thread::sleep(ONE_SHOT_POLL);
        }
    }

    let writes = subsystem.drain_writes(ONE_SHOT_DRAIN_TIMEOUT);
    let summary = subsystem.last_pass().cloned();
    let failed_writes = subsystem.status().failed_writes;
    subsystem.shutdown();

    Ok(OneShotReport {
        indexed,
        summary,
        writes,
        failed_writes,
        duration_ms: started.elapsed().as_millis(),
    })
}

async fn index_task(host: FsHost) -> Result<(), DaemonError> {
    let started = Instant::now();
    let scanned = tokio::task::spawn_blocking(move || host.scan())
        .await
        .map_err(|err| DaemonError::Protocol(format!("index scan join error: {err}")))?;
    match scanned {
        Ok(count) => tracing::info!(
            assets = count,
            duration_ms = started.elapsed().as_millis() as u64,
            "content index ready"
        ),
        Err(err) => tracing::error!(error = %err, "content index scan failed"),
    }
    Ok(())
}

async fn watcher_task(
    layout: ContentLayout,
    event_tx: mpsc::Sender<HostEvent>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let root = layout.root().to_path_buf();
    if !root.exists() {
        fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
    }

    // Canonicalize so that FSEvents paths (which arrive as real paths, e.g.
    // /private/var/... on macOS) map back onto identities.
    let layout = match fs::canonicalize(&root) {
        Ok(canonical) => layout.rooted_at(canonical),
        Err(_) => layout,
    };

    let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut watcher: RecommendedWatcher = recommended_watcher(move |event| {
        let _ = raw_tx.send(event);
    })?;
    watcher.watch(layout.root(), RecursiveMode::Recursive)?;
    tracing::debug!(path = %layout.root().display(), "watching content directory");

    let mut pending = HashMap::<AssetIdentity, Instant>::new();
    let mut flush = tokio::time::interval(DEBOUNCE_WINDOW / 5);
    flush.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = flush.tick() => {
                for identity in take_settled(&mut pending, Instant::now(), DEBOUNCE_WINDOW) {
                    if event_tx.send(HostEvent::Saved(identity)).await.is_err() {
                        return Ok(());
                    }
                }
            }
            event = raw_rx.recv() => {
                let Some(event) = event else { break };
                let event = match event {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::warn!(error = %err, "watcher event error");
                        continue;
                    }
                };

                for host_event in host_events(&event, &layout) {
                    match host_event {
                        HostEvent::Saved(identity) => record_save(&mut pending, identity, Instant::now()),
                        other => {
                            if let HostEvent::Removed(ref identity) | HostEvent::Renamed { old: ref identity, .. } = other {
                                pending.remove(identity);
                            }
                            if event_tx.send(other).await.is_err() {
                                return Ok(());
                            }
                        }
                    }
                }
            }
        }
    }

    Ok(())
}

async fn audit_host_task(
    project: PathBuf,
    host: FsHost,
    config: AuditConfig,
    mut event_rx: mpsc::Receiver<HostEvent>,
    mut control_rx: mpsc::Receiver<ControlJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
    started_at_unix: u64,
) -> Result<(), DaemonError> {
    let executor: Arc<dyn Executor> =
        Arc::new(TokioExecutor::new(tokio::runtime::Handle::current()));
    let mut ticker = tokio::time::interval(config.tick_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut subsystem = AuditSubsystem::initialize(&project, host, executor, config)?;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = ticker.tick() => {
                if subsystem.is_ticking() {
                    subsystem.tick();
                } else {
                    subsystem.reap_writes();
                }
            }
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                apply_host_event(&mut subsystem, event);
            }
            job = control_rx.recv() => {
                let Some(job) = job else { break };
                let reply = handle_control(&mut subsystem, job.command, &project, started_at_unix);
                let _ = job.respond_to.send(reply);
            }
        }
    }

    let report = tokio::task::spawn_blocking(move || subsystem.shutdown())
        .await
        .map_err(|err| DaemonError::Protocol(format!("audit shutdown join error: {err}")))?;
    tracing::info!(
        completed = report.completed,
        abandoned = report.abandoned,
        "audit subsystem stopped",
    );
    Ok(())
}

async fn socket_server_task(
    project: PathBuf,
    control_tx: mpsc::Sender<ControlJob>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let run = run_dir(&project);
    if !run.exists() {
        fs::create_dir_all(&run).map_err(|e| io_err(&run, e))?;
    }

    let socket = socket_path(&project);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "daemon listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let control_tx = control_tx.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, control_tx, shutdown_tx).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    control_tx: mpsc::Sender<ControlJob>,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request: Result<DaemonRequest, _> = serde_json::from_str(&line);
        let request = match request {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let cmd = request.cmd.clone();
        let response = match parse_command(&request) {
            Ok(Some(command)) => match enqueue_control(&control_tx, command).await {
                Ok(data) => DaemonResponse::ok(data),
                Err(err) => DaemonResponse::error(err.to_string()),
            },
            Ok(None) => {
                let _ = shutdown_tx.send(());
                DaemonResponse::ok(json!({ "stopping": true }))
            }
            Err(message) => DaemonResponse::error(message),
        };

        write_response(&mut writer, &response).await?;
        if cmd == "stop" {
            break;
        }
    }

    Ok(())
}

/// `Ok(None)` is `stop`, which never reaches the audit host.
fn parse_command(request: &DaemonRequest) -> Result<Option<ControlCommand>, String> {
    match request.cmd.as_str() {
        "status" => Ok(Some(ControlCommand::Status)),
        "reconcile" => Ok(Some(ControlCommand::Reconcile)),
        "audit" => required_identity(request).map(|id| Some(ControlCommand::Audit(id))),
        "dependencies" => {
            required_identity(request).map(|id| Some(ControlCommand::Dependencies(id)))
        }
        "referencers" => required_identity(request).map(|id| Some(ControlCommand::Referencers(id))),
        "show" => required_identity(request).map(|id| Some(ControlCommand::Show(id))),
        "search" => {
            if request.search.is_empty() {
                Err("'search' requires 'terms', 'kind' or 'path_prefix'".to_string())
            } else {
                Ok(Some(ControlCommand::Search(request.search.clone())))
            }
        }
        "stop" => Ok(None),
        other => Err(format!("unknown command '{other}'")),
    }
}

fn required_identity(request: &DaemonRequest) -> Result<AssetIdentity, String> {
    match request.identity.as_deref().map(str::trim) {
        Some(identity) if !identity.is_empty() => Ok(AssetIdentity::from(identity)),
        _ => Err(format!("'{}' requires an 'identity'", request.cmd)),
    }
}

async fn enqueue_control(
    control_tx: &mpsc::Sender<ControlJob>,
    command: ControlCommand,
) -> Result<Value, DaemonError> {
    let (tx, rx) = oneshot::channel();
    control_tx
        .send(ControlJob {
            command,
            respond_to: tx,
        })
        .await
        .map_err(|_| DaemonError::ChannelClosed("control queue"))?;

    let outcome = rx
        .await
        .map_err(|_| DaemonError::ChannelClosed("control response"))?;
    outcome.map_err(DaemonError::Protocol)
}

// ---------------------------------------------------------------------------
// Audit host: runs on the task that owns the subsystem
// ---------------------------------------------------------------------------

fn apply_host_event(subsystem: &mut AuditSubsystem<FsHost>, event: HostEvent) {
    match event {
        HostEvent::Saved(identity) => {
            let Some(kind) = subsystem.host().upsert(&identity) else {
                tracing::debug!(identity = %identity, "saved artifact has no audited kind");
                return;
            };
            audit_saved(subsystem, &identity, kind);
        }
        HostEvent::Removed(identity) => {
            subsystem.host().forget(&identity);
            if let Err(err) = subsystem.on_asset_removed(&identity) {
                tracing::warn!(identity = %identity, error = %err, "failed to delete audit");
            }
        }
        HostEvent::Renamed { old, new } => {
            subsystem.host().forget(&old);
            if let Err(err) = subsystem.on_asset_renamed(&old, &new) {
                tracing::warn!(identity = %old, error = %err, "failed to delete audit");
            }
            if let Some(kind) = subsystem.host().upsert(&new) {
                audit_saved(subsystem, &new, kind);
            }
        }
    }
}

fn audit_saved(
    subsystem: &mut AuditSubsystem<FsHost>,
    identity: &AssetIdentity,
    kind: AssetKind,
) {
    match subsystem.audit_asset(identity, kind) {
        Ok(Some(DispatchOutcome::Dispatched)) => {
            tracing::debug!(identity = %identity, "re-audit dispatched");
        }
        Ok(Some(DispatchOutcome::InFlight)) => {
            tracing::debug!(identity = %identity, "re-audit already in flight");
        }
        Ok(None) => {
            tracing::debug!(identity = %identity, "save outside audit scope");
        }
        Err(err) => {
            tracing::warn!(identity = %identity, error = %err, "re-audit on save failed");
        }
    }
}

fn handle_control(
    subsystem: &mut AuditSubsystem<FsHost>,
    command: ControlCommand,
    project: &Path,
    started_at_unix: u64,
) -> Result<Value, String> {
    match command {
        ControlCommand::Status => Ok(build_status_payload(
            project,
            started_at_unix,
            subsystem.host().len(),
            subsystem.store().root(),
            &subsystem.status(),
        )),
        ControlCommand::Reconcile => {
            let triggered = subsystem.trigger_reconciliation_pass();
            if triggered {
                tracing::info!("reconciliation pass requested over socket");
            }
            Ok(json!({ "triggered": triggered, "phase": subsystem.phase() }))
        }
        ControlCommand::Audit(identity) => {
            let kind = subsystem
                .host()
                .kind_of(&identity)
                .ok_or_else(|| format!("asset '{identity}' is not indexed"))?;
            match subsystem.audit_asset(&identity, kind) {
                Ok(Some(outcome)) => Ok(json!({
                    "identity": identity.as_str(),
                    "outcome": outcome_label(outcome),
                    "audit_path": subsystem.store().path_for(&identity).display().to_string(),
                })),
                Ok(None) => Err(format!("asset '{identity}' is outside the audit scope")),
                Err(err) => Err(err.to_string()),
            }
        }
        ControlCommand::Dependencies(identity) => {
            let host = subsystem.host();
            let dependencies = host
                .dependencies(&identity)
                .ok_or_else(|| format!("asset '{identity}' is not indexed"))?;
            Ok(json!({
                "asset": identity.as_str(),
                "dependencies": package_entries(host, &dependencies),
            }))
        }
        ControlCommand::Referencers(identity) => {
            let host = subsystem.host();
            let referencers = host.referencers(&identity);
            if referencers.is_empty() && host.asset(&identity).is_none() {
                return Err(format!("asset '{identity}' is not indexed"));
            }
            Ok(json!({
                "asset": identity.as_str(),
                "referencers": package_entries(host, &referencers),
            }))
        }
        ControlCommand::Show(identity) => {
            let host = subsystem.host();
            let asset = host
                .asset(&identity)
                .ok_or_else(|| format!("asset '{identity}' is not indexed"))?;
            let audit_path = subsystem.store().path_for(&identity);
            Ok(json!({
                "package": identity.as_str(),
                "name": identity.short_name(),
                "kind": asset.kind,
                "disk_path": host.layout().source_path(&identity).map(|p| p.display().to_string()),
                "size_bytes": asset.size,
                "dependency_count": asset.dependencies.len(),
                "referencer_count": host.referencers(&identity).len(),
                "audited": asset.kind.is_some() && audit_path.is_file(),
                "audit_path": audit_path.display().to_string(),
            }))
        }
        ControlCommand::Search(query) => Ok(json!({
            "terms": query.terms,
            "results": subsystem.host().search(&query),
        })),
    }
}

/// One row per package: its kind when indexed, and whether it is on disk.
fn package_entries(host: &FsHost, packages: &[AssetIdentity]) -> Vec<Value> {
    packages
        .iter()
        .map(|package| {
            let asset = host.asset(package);
            json!({
                "package": package.as_str(),
                "kind": asset.as_ref().and_then(|a| a.kind),
                "on_disk": asset.is_some(),
            })
        })
        .collect()
}

fn build_status_payload(
    project: &Path,
    started_at_unix: u64,
    indexed_assets: usize,
    audit_root: &Path,
    status: &SubsystemStatus,
) -> Value {
    json!({
        "running": true,
        "project": project.display().to_string(),
        "started_at_unix": started_at_unix,
        "socket": socket_path(project).display().to_string(),
        "audit_root": audit_root.display().to_string(),
        "indexed_assets": indexed_assets,
        "phase": status.phase,
        "in_flight": status.in_flight,
        "pending_writes": status.pending_writes,
        "failed_writes": status.failed_writes,
        "last_pass": status.last_pass,
    })
}

fn outcome_label(outcome: DispatchOutcome) -> &'static str {
    match outcome {
        DispatchOutcome::Dispatched => "dispatched",
        DispatchOutcome::InFlight => "in_flight",
    }
}

// ---------------------------------------------------------------------------
// Watcher helpers
// ---------------------------------------------------------------------------

/// Map one notify event onto host events. Metadata-only changes (touch,
/// chmod) are ignored: they never change the fingerprint.
pub fn host_events(event: &Event, layout: &ContentLayout) -> Vec<HostEvent> {
    let identities = || event.paths.iter().filter_map(|p| layout.identity_for(p));
    match &event.kind {
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any) => {
            identities().map(HostEvent::Saved).collect()
        }
        EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            identities().map(HostEvent::Removed).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            identities().map(HostEvent::Saved).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() == 2 => {
            let old = layout.identity_for(&event.paths[0]);
            let new = layout.identity_for(&event.paths[1]);
            match (old, new) {
                (Some(old), Some(new)) => vec![HostEvent::Renamed { old, new }],
                (Some(old), None) => vec![HostEvent::Removed(old)],
                (None, Some(new)) => vec![HostEvent::Saved(new)],
                (None, None) => Vec::new(),
            }
        }
        EventKind::Modify(ModifyKind::Name(_)) => event
            .paths
            .iter()
            .filter_map(|p| {
                let identity = layout.identity_for(p)?;
                Some(if p.exists() {
                    HostEvent::Saved(identity)
                } else {
                    HostEvent::Removed(identity)
                })
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Note a save; it is released once no further save arrives for the window.
fn record_save(pending: &mut HashMap<AssetIdentity, Instant>, identity: AssetIdentity, now: Instant) {
    pending.insert(identity, now);
}

/// Identities whose last save is at least `window` old, sorted.
fn take_settled(
    pending: &mut HashMap<AssetIdentity, Instant>,
    now: Instant,
    window: Duration,
) -> Vec<AssetIdentity> {
    let mut settled: Vec<AssetIdentity> = pending
        .iter()
        .filter(|(_, seen_at)| now.duration_since(**seen_at) >= window)
        .map(|(identity, _)| identity.clone())
        .collect();
    for identity in &settled {
        pending.remove(identity);
    }
    settled.sort();
    settled
}

// ---------------------------------------------------------------------------
// Runtime plumbing
// ---------------------------------------------------------------------------

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn ensure_runtime_dirs(project: &Path, config: &AuditConfig) -> Result<(), DaemonError> {
    let run = run_dir(project);
    if !run.exists() {
        fs::create_dir_all(&run).map_err(|e| io_err(&run, e))?;
    }
    let content = crate::paths::content_root(project, &config.content_dir);
    if !content.exists() {
        fs::create_dir_all(&content).map_err(|e| io_err(&content, e))?;
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Install the `tracing` subscriber (and `log` bridge); `RUST_LOG` overrides
/// the default `info` filter. Safe to call more than once.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use fathom_core::layout;
    use fathom_sync::ThreadExecutor;
    use notify::event::{CreateKind, DataChange, MetadataKind, RemoveKind};
    use tempfile::TempDir;
    use tokio::time::advance;

    fn content_layout() -> ContentLayout {
        ContentLayout::new("/proj/Content", "/Game/", "uasset")
    }

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        paths
            .iter()
            .fold(Event::new(kind), |e, p| e.add_path(PathBuf::from(p)))
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn debounce_coalesces_rapid_saves() {
        let mut pending = HashMap::<AssetIdentity, Instant>::new();
        let identity = AssetIdentity::from("/Game/BP_Door");
        let mut released = 0usize;

        for _ in 0..5 {
            record_save(&mut pending, identity.clone(), Instant::now());
            released += take_settled(&mut pending, Instant::now(), DEBOUNCE_WINDOW).len();
            advance(Duration::from_millis(10)).await;
        }
        assert_eq!(released, 0, "nothing settles while saves keep arriving");

        advance(DEBOUNCE_WINDOW).await;
        released += take_settled(&mut pending, Instant::now(), DEBOUNCE_WINDOW).len();
        assert_eq!(released, 1, "rapid saves should collapse to one re-audit");
        assert!(pending.is_empty());
    }

    #[test]
    fn create_and_data_modify_are_saves() {
        let layout = content_layout();
        let created = event(EventKind::Create(CreateKind::File), &["/proj/Content/BP_A.uasset"]);
        let written = event(
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            &["/proj/Content/UI/WBP_B.uasset", "/proj/Content/readme.txt"],
        );
        assert_eq!(
            host_events(&created, &layout),
            vec![HostEvent::Saved("/Game/BP_A".into())]
        );
        assert_eq!(
            host_events(&written, &layout),
            vec![HostEvent::Saved("/Game/UI/WBP_B".into())]
        );
    }

    #[test]
    fn metadata_only_changes_are_ignored() {
        let touched = event(
            EventKind::Modify(ModifyKind::Metadata(MetadataKind::WriteTime)),
            &["/proj/Content/BP_A.uasset"],
        );
        assert!(host_events(&touched, &content_layout()).is_empty());
    }

    #[test]
    fn renames_map_to_rename_remove_or_save() {
        let layout = content_layout();
        let both = || EventKind::Modify(ModifyKind::Name(RenameMode::Both));
        assert_eq!(
            host_events(
                &event(both(), &["/proj/Content/BP_Old.uasset", "/proj/Content/BP_New.uasset"]),
                &layout
            ),
            vec![HostEvent::Renamed {
                old: "/Game/BP_Old".into(),
                new: "/Game/BP_New".into()
            }]
        );
        // Editors save through a temp file renamed over the artifact.
        assert_eq!(
            host_events(
                &event(both(), &["/proj/Content/BP_A.tmp", "/proj/Content/BP_A.uasset"]),
                &layout
            ),
            vec![HostEvent::Saved("/Game/BP_A".into())]
        );
        assert_eq!(
            host_events(
                &event(EventKind::Remove(RemoveKind::File), &["/proj/Content/BP_A.uasset"]),
                &layout
            ),
            vec![HostEvent::Removed("/Game/BP_A".into())]
        );
    }

    #[test]
    fn parse_command_validates_audit_identity() {
        assert!(matches!(
            parse_command(&DaemonRequest::new("reconcile")),
            Ok(Some(ControlCommand::Reconcile))
        ));
        assert!(matches!(parse_command(&DaemonRequest::new("stop")), Ok(None)));
        assert!(parse_command(&DaemonRequest::new("audit")).is_err());
        assert!(parse_command(&DaemonRequest::new("sync")).is_err());
        match parse_command(&DaemonRequest::new("audit").with_identity(" /Game/BP_A ")) {
            Ok(Some(ControlCommand::Audit(identity))) => assert_eq!(identity.as_str(), "/Game/BP_A"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    fn project_with_assets() -> (TempDir, AuditSubsystem<FsHost>) {
        let project = TempDir::new().expect("project");
        let content = project.path().join("Content");
        fs::create_dir_all(content.join("UI")).unwrap();
        fs::write(content.join("UI/WBP_Menu.uasset"), b"menu /Game/UI/T_Logo.T_Logo").unwrap();
        fs::write(content.join("DT_Loot.uasset"), b"loot").unwrap();

        let config = AuditConfig::default();
        let host = FsHost::from_config(project.path(), &config);
        host.scan().expect("scan");
        let subsystem =
            AuditSubsystem::initialize(project.path(), host, Arc::new(ThreadExecutor), config)
                .expect("initialize");
        (project, subsystem)
    }

    #[test]
    fn saved_event_writes_document_and_removed_event_deletes_it() {
        let (project, mut subsystem) = project_with_assets();
        let identity = AssetIdentity::from("/Game/UI/WBP_Menu");
        let doc = layout::audit_root(project.path(), 10).join("UI/WBP_Menu.md");

        apply_host_event(&mut subsystem, HostEvent::Saved(identity.clone()));
        let report = subsystem.drain_writes(Duration::from_secs(5));
        assert_eq!(report.completed, 1);
        let text = fs::read_to_string(&doc).expect("document written");
        assert!(text.contains("/Game/UI/T_Logo"), "references listed:\n{text}");

        apply_host_event(&mut subsystem, HostEvent::Removed(identity.clone()));
        assert!(!doc.exists());
        assert_eq!(subsystem.host().kind_of(&identity), None);
    }

    #[test]
    fn renamed_event_moves_the_document() {
        let (project, mut subsystem) = project_with_assets();
        let content = project.path().join("Content");
        let old = AssetIdentity::from("/Game/DT_Loot");
        let new = AssetIdentity::from("/Game/DT_Treasure");

        apply_host_event(&mut subsystem, HostEvent::Saved(old.clone()));
        subsystem.drain_writes(Duration::from_secs(5));
        fs::rename(content.join("DT_Loot.uasset"), content.join("DT_Treasure.uasset")).unwrap();

        apply_host_event(&mut subsystem, HostEvent::Renamed { old: old.clone(), new: new.clone() });
        subsystem.drain_writes(Duration::from_secs(5));

        let store = subsystem.store();
        assert!(!store.exists(&store.path_for(&old)));
        assert!(store.exists(&store.path_for(&new)));
    }

    #[test]
    fn control_status_and_audit_replies() {
        let (project, mut subsystem) = project_with_assets();

        let status = handle_control(&mut subsystem, ControlCommand::Status, project.path(), 1_000)
            .expect("status");
        assert_eq!(status["running"], json!(true));
        assert_eq!(status["indexed_assets"], json!(2));
        assert_eq!(status["started_at_unix"], json!(1_000u64));
        assert_eq!(status["phase"], json!("waiting_for_store"));

        let reply = handle_control(
            &mut subsystem,
            ControlCommand::Audit("/Game/DT_Loot".into()),
            project.path(),
            1_000,
        )
        .expect("audit");
        assert_eq!(reply["outcome"], json!("dispatched"));

        let err = handle_control(
            &mut subsystem,
            ControlCommand::Audit("/Game/SM_Rock".into()),
            project.path(),
            1_000,
        )
        .unwrap_err();
        assert!(err.contains("not indexed"));

        let reconcile =
            handle_control(&mut subsystem, ControlCommand::Reconcile, project.path(), 1_000)
                .expect("reconcile");
        assert_eq!(reconcile["triggered"], json!(false), "startup pass still armed");
        subsystem.drain_writes(Duration::from_secs(5));
    }

    #[test]
    fn control_dependency_and_referencer_replies() {
        let (project, mut subsystem) = project_with_assets();
        let content = project.path().join("Content");
        fs::write(content.join("UI/T_Logo.uasset"), b"pixels").unwrap();
        subsystem.host().upsert(&"/Game/UI/T_Logo".into());

        let deps = handle_control(
            &mut subsystem,
            ControlCommand::Dependencies("/Game/UI/WBP_Menu".into()),
            project.path(),
            1_000,
        )
        .expect("dependencies");
        assert_eq!(deps["asset"], json!("/Game/UI/WBP_Menu"));
        assert_eq!(
            deps["dependencies"],
            json!([{ "package": "/Game/UI/T_Logo", "kind": null, "on_disk": true }])
        );

        let refs = handle_control(
            &mut subsystem,
            ControlCommand::Referencers("/Game/UI/T_Logo".into()),
            project.path(),
            1_000,
        )
        .expect("referencers");
        assert_eq!(
            refs["referencers"],
            json!([{ "package": "/Game/UI/WBP_Menu", "kind": "blueprint", "on_disk": true }])
        );

        let unreferenced = handle_control(
            &mut subsystem,
            ControlCommand::Referencers("/Game/DT_Loot".into()),
            project.path(),
            1_000,
        )
        .expect("indexed but unreferenced");
        assert_eq!(unreferenced["referencers"], json!([]));

        for command in [
            ControlCommand::Dependencies("/Game/BP_Nope".into()),
            ControlCommand::Referencers("/Game/BP_Nope".into()),
            ControlCommand::Show("/Game/BP_Nope".into()),
        ] {
            let err = handle_control(&mut subsystem, command, project.path(), 1_000).unwrap_err();
            assert!(err.contains("not indexed"), "{err}");
        }
    }

    #[test]
    fn referencers_follow_saves_and_removals() {
        let (project, mut subsystem) = project_with_assets();
        let content = project.path().join("Content");
        let logo = AssetIdentity::from("/Game/UI/T_Logo");
        let referencers = |subsystem: &AuditSubsystem<FsHost>| subsystem.host().referencers(&logo);
        assert_eq!(referencers(&subsystem), vec![AssetIdentity::from("/Game/UI/WBP_Menu")]);

        fs::write(content.join("DT_Loot.uasset"), b"loot /Game/UI/T_Logo").unwrap();
        apply_host_event(&mut subsystem, HostEvent::Saved("/Game/DT_Loot".into()));
        assert_eq!(
            referencers(&subsystem),
            vec![AssetIdentity::from("/Game/DT_Loot"), AssetIdentity::from("/Game/UI/WBP_Menu")]
        );

        fs::remove_file(content.join("UI/WBP_Menu.uasset")).unwrap();
        apply_host_event(&mut subsystem, HostEvent::Removed("/Game/UI/WBP_Menu".into()));
        assert_eq!(referencers(&subsystem), vec![AssetIdentity::from("/Game/DT_Loot")]);
        subsystem.drain_writes(Duration::from_secs(5));
    }

    #[test]
    fn control_search_and_show_replies() {
        let (project, mut subsystem) = project_with_assets();

        let found = handle_control(
            &mut subsystem,
            ControlCommand::Search(SearchQuery::terms("loot")),
            project.path(),
            1_000,
        )
        .expect("search");
        assert_eq!(found["terms"], json!("loot"));
        assert_eq!(
            found["results"],
            json!([{ "package": "/Game/DT_Loot", "name": "DT_Loot", "kind": "data_table", "score": 1 }])
        );

        let under_ui = handle_control(
            &mut subsystem,
            ControlCommand::Search(SearchQuery {
                path_prefix: Some("/Game/UI/".to_string()),
                ..SearchQuery::default()
            }),
            project.path(),
            1_000,
        )
        .expect("browse");
        assert_eq!(under_ui["results"][0]["package"], json!("/Game/UI/WBP_Menu"));
        assert_eq!(under_ui["results"].as_array().map(Vec::len), Some(1));

        let shown = handle_control(
            &mut subsystem,
            ControlCommand::Show("/Game/UI/WBP_Menu".into()),
            project.path(),
            1_000,
        )
        .expect("show");
        assert_eq!(shown["kind"], json!("blueprint"));
        assert_eq!(shown["size_bytes"], json!(27));
        assert_eq!(shown["dependency_count"], json!(1));
        assert_eq!(shown["referencer_count"], json!(0));
        assert_eq!(shown["audited"], json!(false));
    }

    #[test]
    fn parse_command_validates_query_commands() {
        assert!(matches!(
            parse_command(&DaemonRequest::new("dependencies").with_identity("/Game/BP_A")),
            Ok(Some(ControlCommand::Dependencies(_)))
        ));
        assert!(matches!(
            parse_command(&DaemonRequest::new("show").with_identity("/Game/BP_A")),
            Ok(Some(ControlCommand::Show(_)))
        ));
        let err = parse_command(&DaemonRequest::new("referencers")).unwrap_err();
        assert_eq!(err, "'referencers' requires an 'identity'");
        assert!(parse_command(&DaemonRequest::new("search")).is_err());
        assert!(matches!(
            parse_command(&DaemonRequest::search(SearchQuery::terms("door"))),
            Ok(Some(ControlCommand::Search(ref q))) if q.terms == "door"
        ));
    }
}
