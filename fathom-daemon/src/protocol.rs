//! Newline-delimited JSON control protocol over the project's daemon socket.
//!
//! One request line in, one response line out:
//!
//! ```text
//! {"cmd":"status"}
//! {"cmd":"reconcile"}
//! {"cmd":"audit","identity":"/Game/UI/WBP_Menu"}
//! {"cmd":"dependencies","identity":"/Game/UI/WBP_Menu"}
//! {"cmd":"referencers","identity":"/Game/UI/T_Logo"}
//! {"cmd":"show","identity":"/Game/UI/WBP_Menu"}
//! {"cmd":"search","terms":"menu","kind":"blueprint","path_prefix":"/Game/UI/","limit":20}
//! {"cmd":"stop"}
//! ```

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::asset_graph::SearchQuery;
use crate::error::{io_err, DaemonError};
use crate::paths::socket_path;

/// JSON newline-delimited request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonRequest {
    pub cmd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    /// Only read by `search`.
    #[serde(flatten)]
    pub search: SearchQuery,
}

impl DaemonRequest {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            identity: None,
            search: SearchQuery::default(),
        }
    }

    pub fn search(query: SearchQuery) -> Self {
        Self {
            search: query,
            ..Self::new("search")
        }
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }
}

/// JSON newline-delimited response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DaemonResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Send one JSON request to the project's daemon socket and return one response.
pub fn send_request(
    project: &Path,
    request: &DaemonRequest,
) -> Result<DaemonResponse, DaemonError> {
    let socket = socket_path(project);
    if !socket.exists() {
        return Err(DaemonError::DaemonNotRunning { socket });
    }

    let mut stream = UnixStream::connect(&socket).map_err(|err| {
        if matches!(
            err.kind(),
            std::io::ErrorKind::NotFound
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
        ) {
            DaemonError::DaemonNotRunning {
                socket: socket.clone(),
            }
        } else {
            io_err(&socket, err)
        }
    })?;

    let payload = serde_json::to_string(request)?;
    stream
        .write_all(payload.as_bytes())
        .map_err(|e| io_err(&socket, e))?;
    stream.write_all(b"\n").map_err(|e| io_err(&socket, e))?;
    stream.flush().map_err(|e| io_err(&socket, e))?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    let read = reader
        .read_line(&mut line)
        .map_err(|e| io_err(&socket, e))?;
    if read == 0 {
        return Err(DaemonError::Protocol(
            "daemon closed connection before responding".to_string(),
        ));
    }

    let response: DaemonResponse = serde_json::from_str(line.trim_end())?;
    Ok(response)
}

/// Query daemon status, retrying briefly while a freshly started daemon binds.
pub fn request_status(project: &Path) -> Result<Value, DaemonError> {
    let request = DaemonRequest::new("status");

    let mut last_not_running: Option<DaemonError> = None;
    for attempt in 0..5 {
        match send_request(project, &request) {
            Ok(response) => return response_into_data(response),
            Err(err @ DaemonError::DaemonNotRunning { .. }) => {
                last_not_running = Some(err);
                if attempt < 4 {
                    sleep(Duration::from_millis(100));
                    continue;
                }
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_not_running.unwrap_or_else(|| {
        DaemonError::Protocol("daemon status retry loop exited unexpectedly".to_string())
    }))
}

pub fn request_stop(project: &Path) -> Result<(), DaemonError> {
    let response = send_request(project, &DaemonRequest::new("stop"))?;
    response_into_data(response).map(|_| ())
}

/// Arm a reconciliation pass. The reply carries `triggered: false` when one
/// is already running.
pub fn request_reconcile(project: &Path) -> Result<Value, DaemonError> {
    let response = send_request(project, &DaemonRequest::new("reconcile"))?;
    response_into_data(response)
}

/// Force a re-audit of one identity.
pub fn request_audit(project: &Path, identity: &str) -> Result<Value, DaemonError> {
    let response = send_request(
        project,
        &DaemonRequest::new("audit").with_identity(identity),
    )?;
    response_into_data(response)
}

/// Packages `identity` names.
pub fn request_dependencies(project: &Path, identity: &str) -> Result<Value, DaemonError> {
    query_identity(project, "dependencies", identity)
}

/// Indexed assets naming `identity`.
pub fn request_referencers(project: &Path, identity: &str) -> Result<Value, DaemonError> {
    query_identity(project, "referencers", identity)
}

/// Index entry of one asset with its edge counts.
pub fn request_show(project: &Path, identity: &str) -> Result<Value, DaemonError> {
    query_identity(project, "show", identity)
}

pub fn request_search(project: &Path, query: &SearchQuery) -> Result<Value, DaemonError> {
    let response = send_request(project, &DaemonRequest::search(query.clone()))?;
    response_into_data(response)
}

fn query_identity(project: &Path, cmd: &str, identity: &str) -> Result<Value, DaemonError> {
    let response = send_request(project, &DaemonRequest::new(cmd).with_identity(identity))?;
    response_into_data(response)
}

fn response_into_data(response: DaemonResponse) -> Result<Value, DaemonError> {
    if response.ok {
        Ok(response.data.unwrap_or(Value::Null))
    } else {
        Err(DaemonError::Protocol(
            response
                .error
                .unwrap_or_else(|| "unknown daemon error".to_string()),
        ))
    }
}
