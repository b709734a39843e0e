//! Local IPC server for `agent-relay-ctl` commands.
//!
//! Listens on a named pipe (Windows) or Unix domain socket (Linux/macOS)
//! using the `interprocess` crate. Accepts line-delimited JSON commands
//! and routes them to the supervisor, the session coordinator, or the
//! sibling launcher.
//!
//! ## Protocol
//!
//! Request (one JSON object per line):
//! ```json
//! {"command": "spawn", "cmd": "python3 -i", "input": "print(1)"}
//! {"command": "input", "handle": 1, "text": "print(2)"}
//! {"command": "ask", "prompt": "summarize the diff", "session_id": "abc"}
//! {"command": "relaunch", "dir": "/work/other"}
//! ```
//!
//! Response (one JSON object per line):
//! ```json
//! {"ok": true, "data": { ... } }
//! {"ok": false, "error": "process 7 not found"}
//! ```

use std::path::Path;
use std::sync::Arc;

use interprocess::local_socket::{tokio::prelude::*, GenericNamespaced, ListenerOptions};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::invocation::{InvocationOutcome, InvocationRequest};
use crate::process::{EventReceiver, ProcessEvent, ProcessHandle};
use crate::relaunch::{launch_sibling, SiblingLaunch};
use crate::state::AppState;
use crate::{AppError, Result};

/// Inbound IPC request from `agent-relay-ctl`.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct IpcRequest {
    /// Command verb.
    pub command: String,
    /// Process handle (for `input`, `close`, `output`, `kill`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<ProcessHandle>,
    /// Shell command line (for `spawn`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<String>,
    /// Initial stdin line (for `spawn`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    /// Stdin line (for `input`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Prompt text (for `ask`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// Conversation to resume (for `ask`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Resume the latest conversation (for `ask`).
    #[serde(default, rename = "continue")]
    pub continue_latest: bool,
    /// Target directory (for `relaunch`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
}

/// Outbound IPC response to `agent-relay-ctl`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct IpcResponse {
    /// Whether the command succeeded.
    pub ok: bool,
    /// Payload on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Error message on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IpcResponse {
    fn success(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

impl From<AppError> for IpcResponse {
    fn from(err: AppError) -> Self {
        Self::error(err.to_string())
    }
}

/// Spawn the IPC server task.
///
/// # Errors
///
/// Returns `AppError::Ipc` if the listener cannot be created.
pub fn spawn_ipc_server(
    state: Arc<AppState>,
    ct: CancellationToken,
) -> Result<tokio::task::JoinHandle<()>> {
    let name = state.config.ipc_name.clone();

    let listener_name = name
        .clone()
        .to_ns_name::<GenericNamespaced>()
        .map_err(|err| AppError::Ipc(format!("invalid ipc socket name '{name}': {err}")))?;

    let listener = ListenerOptions::new()
        .name(listener_name)
        .create_tokio()
        .map_err(|err| AppError::Ipc(format!("failed to create ipc listener: {err}")))?;

    info!(ipc_name = %name, "IPC server listening");

    let handle = tokio::spawn(async move {
        let span = info_span!("ipc_server", name = %name);
        async move {
            loop {
                tokio::select! {
                    () = ct.cancelled() => {
                        info!("IPC server shutting down");
                        break;
                    }
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok(stream) => {
                                let state = Arc::clone(&state);
                                tokio::spawn(handle_connection(stream, state));
                            }
                            Err(err) => {
                                warn!(%err, "IPC accept failed");
                            }
                        }
                    }
                }
            }
        }
        .instrument(span)
        .await;
    });

    Ok(handle)
}

/// Handle a single IPC client connection.
async fn handle_connection(stream: interprocess::local_socket::tokio::Stream, state: Arc<AppState>) {
    let span = info_span!("ipc_conn");
    async move {
        let (reader, mut writer) = stream.split();
        let mut buf_reader = BufReader::new(reader);
        let mut line = String::new();

        loop {
            line.clear();
            match buf_reader.read_line(&mut line).await {
                Ok(0) => break, // EOF
                Ok(_) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }

                    let response = match serde_json::from_str::<IpcRequest>(trimmed) {
                        Ok(request) => dispatch_command(&request, &state).await,
                        Err(err) => IpcResponse::error(format!("invalid json: {err}")),
                    };

                    let mut response_line = serde_json::to_string(&response).unwrap_or_else(|_| {
                        r#"{"ok":false,"error":"serialization failed"}"#.to_owned()
                    });
                    response_line.push('\n');

                    if let Err(err) = writer.write_all(response_line.as_bytes()).await {
                        warn!(%err, "failed to write ipc response");
                        break;
                    }
                }
                Err(err) => {
                    warn!(%err, "ipc read error");
                    break;
                }
            }
        }

        debug!("IPC connection closed");
    }
    .instrument(span)
    .await;
}

/// Route an IPC command to the appropriate handler.
pub async fn dispatch_command(request: &IpcRequest, state: &Arc<AppState>) -> IpcResponse {
    let span = info_span!("ipc_command", command = %request.command);
    async move {
        match request.command.as_str() {
            "spawn" => handle_spawn(request, state).await,
            "input" => handle_input(request, state).await,
            "close" => handle_close(request, state).await,
            "output" => handle_output(request, state).await,
            "list" => handle_list(state).await,
            "kill" => handle_kill(request, state).await,
            "ask" => handle_ask(request, state).await,
            "cancel" => handle_cancel(state).await,
            "relaunch" => handle_relaunch(request, state),
            other => IpcResponse::error(format!("unknown command: {other}")),
        }
    }
    .instrument(span)
    .await
}

fn require_handle(request: &IpcRequest) -> std::result::Result<ProcessHandle, IpcResponse> {
    request
        .handle
        .ok_or_else(|| IpcResponse::error("missing required 'handle' field"))
}

fn not_found(handle: ProcessHandle) -> IpcResponse {
    IpcResponse::error(format!("process {handle} not found"))
}

/// Spawn an interactive process; its events are logged until it exits.
async fn handle_spawn(request: &IpcRequest, state: &Arc<AppState>) -> IpcResponse {
    let Some(ref cmd) = request.cmd else {
        return IpcResponse::error("missing required 'cmd' field");
    };

    match state.supervisor.spawn(cmd, request.input.as_deref()).await {
        Ok(spawned) => {
            tokio::spawn(log_process_events(spawned.handle, spawned.events));
            IpcResponse::success(json!({ "handle": spawned.handle, "pid": spawned.pid }))
        }
        Err(err) => err.into(),
    }
}

async fn log_process_events(handle: ProcessHandle, mut events: EventReceiver) {
    while let Some(event) = events.recv().await {
        match event {
            ProcessEvent::Output { stream, text, .. } => {
                debug!(handle, stream = stream.as_str(), %text, "process output");
            }
            ProcessEvent::Exited { exit_code, .. } => {
                info!(handle, ?exit_code, "process exited");
                break;
            }
            ProcessEvent::Failed { reason, .. } => {
                warn!(handle, %reason, "process failed");
                break;
            }
        }
    }
}

/// Write one line to a process's stdin.
async fn handle_input(request: &IpcRequest, state: &Arc<AppState>) -> IpcResponse {
    let handle = match require_handle(request) {
        Ok(handle) => handle,
        Err(response) => return response,
    };
    let Some(ref text) = request.text else {
        return IpcResponse::error("missing required 'text' field");
    };

    if state.supervisor.send_input(handle, text).await {
        IpcResponse::success(json!({ "handle": handle, "sent": true }))
    } else {
        not_found(handle)
    }
}

/// Close a process's stdin.
async fn handle_close(request: &IpcRequest, state: &Arc<AppState>) -> IpcResponse {
    let handle = match require_handle(request) {
        Ok(handle) => handle,
        Err(response) => return response,
    };

    if state.supervisor.close_input(handle).await {
        IpcResponse::success(json!({ "handle": handle, "closed": true }))
    } else {
        not_found(handle)
    }
}

/// Return everything a live process has printed so far.
async fn handle_output(request: &IpcRequest, state: &Arc<AppState>) -> IpcResponse {
    let handle = match require_handle(request) {
        Ok(handle) => handle,
        Err(response) => return response,
    };

    match state.supervisor.output(handle).await {
        Some(output) => IpcResponse::success(json!({ "handle": handle, "output": output })),
        None => not_found(handle),
    }
}

/// List live processes and whether an invocation is in flight.
async fn handle_list(state: &Arc<AppState>) -> IpcResponse {
    let processes = state.supervisor.list().await;
    let invocation_active = state.coordinator.is_active().await;
    IpcResponse::success(json!({
        "processes": processes,
        "invocation_active": invocation_active,
    }))
}

/// Terminate a process, escalating to a forced kill after the grace period.
async fn handle_kill(request: &IpcRequest, state: &Arc<AppState>) -> IpcResponse {
    let handle = match require_handle(request) {
        Ok(handle) => handle,
        Err(response) => return response,
    };

    if state.supervisor.kill(handle).await {
        info!(handle, "process killed via IPC");
        IpcResponse::success(json!({ "handle": handle, "killed": true }))
    } else {
        not_found(handle)
    }
}

/// Run one invocation to completion, superseding any active one.
async fn handle_ask(request: &IpcRequest, state: &Arc<AppState>) -> IpcResponse {
    let Some(ref prompt) = request.prompt else {
        return IpcResponse::error("missing required 'prompt' field");
    };

    let invocation = InvocationRequest::new(
        state.config.working_dir().to_path_buf(),
        prompt.clone(),
        request.session_id.as_deref(),
        request.continue_latest,
    );

    let outcome = state
        .coordinator
        .run(&state.client, invocation, |event| {
            let kind = event.get("type").and_then(Value::as_str).unwrap_or("unknown");
            debug!(event_type = kind, "agent event");
        })
        .await;

    match outcome {
        Ok(InvocationOutcome::Completed(result)) => match serde_json::to_value(&result) {
            Ok(data) => IpcResponse::success(data),
            Err(err) => IpcResponse::error(format!("failed to encode result: {err}")),
        },
        Ok(InvocationOutcome::Cancelled) => IpcResponse::success(json!({ "cancelled": true })),
        Err(err) => err.into(),
    }
}

/// Cancel the active invocation, if any.
async fn handle_cancel(state: &Arc<AppState>) -> IpcResponse {
    let cancelled = state.coordinator.cancel_current().await;
    IpcResponse::success(json!({ "cancelled": cancelled }))
}

/// Start a sibling instance bound to another directory.
fn handle_relaunch(request: &IpcRequest, state: &Arc<AppState>) -> IpcResponse {
    let Some(ref dir) = request.dir else {
        return IpcResponse::error("missing required 'dir' field");
    };
    let Some(ref config_path) = state.config_path else {
        return IpcResponse::error("relaunch requires the instance to be started with --config");
    };

    let launch = std::env::current_exe()
        .map_err(|err| AppError::Process(format!("cannot resolve current executable: {err}")))
        .and_then(|exe| {
            SiblingLaunch::new(exe, config_path.clone(), Path::new(dir), &state.config.ipc_name)
        });

    match launch.and_then(|launch| launch_sibling(&launch).map(|()| launch)) {
        Ok(launch) => IpcResponse::success(json!({
            "working_dir": launch.working_dir,
            "ipc_name": launch.ipc_name,
        })),
        Err(err) => err.into(),
    }
}
