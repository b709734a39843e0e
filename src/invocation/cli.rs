//! [`InvocationBackend`] that drives the agent CLI in `stream-json` mode.
//!
//! Each attempt runs
//!
//! ```text
//! <cli> -p --output-format stream-json --verbose [--model M]
//!       [--resume ID | --continue] [--permission-mode P] [cli_args…] -- <prompt>
//! ```
//!
//! in the request's work directory with `kill_on_drop(true)`. Stdout is
//! framed by [`EventLineCodec`] and every line is parsed as one JSON event.
//! A bounded tail of stderr is kept so a non-zero exit can be reported
//! with its cause.

use std::process::{ExitStatus, Stdio};

use futures_util::StreamExt;
use serde_json::Value;
use tokio::io::AsyncRead;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio_util::codec::{BytesCodec, FramedRead};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::backend::{AttemptRequest, EventItem, InvocationBackend, StartFuture};
use super::codec::EventLineCodec;
use super::error::InvocationError;
use super::Continuation;
use crate::config::InvocationConfig;

/// Buffered events between the reader task and the session client.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Bytes of stderr kept for error reporting.
const STDERR_TAIL_BYTES: usize = 4096;

/// Agent CLI backend.
#[derive(Debug, Clone)]
pub struct ClaudeCliBackend {
    config: InvocationConfig,
}

impl ClaudeCliBackend {
    /// Create a backend from the invocation settings.
    #[must_use]
    pub fn new(config: InvocationConfig) -> Self {
        Self { config }
    }

    /// Command-line arguments for one attempt.
    #[must_use]
    pub fn build_args(&self, request: &AttemptRequest) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-p".into(),
            "--output-format".into(),
            "stream-json".into(),
            "--verbose".into(),
        ];

        if let Some(ref model) = request.model {
            args.push("--model".into());
            args.push(model.clone());
        }

        match request.continuation {
            Continuation::Fresh => {}
            Continuation::Resume(ref id) => {
                args.push("--resume".into());
                args.push(id.clone());
            }
            Continuation::ContinueLatest => args.push("--continue".into()),
        }

        if let Some(ref mode) = self.config.permission_mode {
            args.push("--permission-mode".into());
            args.push(mode.clone());
        }

        args.extend(self.config.cli_args.iter().cloned());
        args.push("--".into());
        args.push(request.prompt.clone());
        args
    }
}

impl InvocationBackend for ClaudeCliBackend {
    fn start(&self, request: AttemptRequest, cancel: CancellationToken) -> StartFuture<'_> {
        Box::pin(async move {
            let args = self.build_args(&request);
            let mut cmd = Command::new(&self.config.cli);
            cmd.args(&args)
                .current_dir(&request.work_dir)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);

            let mut child = cmd.spawn().map_err(|err| {
                InvocationError::other(format!("failed to start {}: {err}", self.config.cli))
            })?;

            let stdout = child
                .stdout
                .take()
                .ok_or_else(|| InvocationError::other("failed to capture agent stdout"))?;
            let stderr = child
                .stderr
                .take()
                .ok_or_else(|| InvocationError::other("failed to capture agent stderr"))?;

            info!(
                pid = child.id(),
                model = request.model.as_deref().unwrap_or("default"),
                continuation = request.continuation.kind(),
                "agent attempt started"
            );

            let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
            let span = info_span!("agent_attempt", pid = child.id());
            tokio::spawn(run_attempt(child, stdout, stderr, tx, cancel).instrument(span));
            Ok(rx)
        })
    }
}

/// Pump stdout events into `tx` until EOF or cancellation, then report
/// the exit status.
async fn run_attempt(
    mut child: Child,
    stdout: ChildStdout,
    stderr: ChildStderr,
    tx: mpsc::Sender<EventItem>,
    cancel: CancellationToken,
) {
    let stderr_task = tokio::spawn(collect_tail(stderr, STDERR_TAIL_BYTES));
    let mut framed = FramedRead::new(stdout, EventLineCodec::new());

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                abort_child(&mut child).await;
                stderr_task.abort();
                let _ = tx.send(Err(InvocationError::aborted())).await;
                return;
            }

            item = framed.next() => match item {
                None => break,
                Some(Ok(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<Value>(&line) {
                        Ok(event) => {
                            if tx.send(Ok(event)).await.is_err() {
                                debug!("event consumer gone, stopping attempt");
                                abort_child(&mut child).await;
                                stderr_task.abort();
                                return;
                            }
                        }
                        Err(err) => {
                            warn!(%err, raw_line = %line, "unparseable agent event, skipping");
                        }
                    }
                }
                Some(Err(err)) => {
                    // The stream is finished after an error; stop the child
                    // rather than wait on a process nobody is reading.
                    warn!(%err, "agent stdout read failed, stopping attempt");
                    abort_child(&mut child).await;
                    stderr_task.abort();
                    let _ = tx
                        .send(Err(InvocationError::other(format!(
                            "agent stdout read failed: {err}"
                        ))))
                        .await;
                    return;
                }
            }
        }
    }

    let status = tokio::select! {
        biased;

        () = cancel.cancelled() => {
            abort_child(&mut child).await;
            stderr_task.abort();
            let _ = tx.send(Err(InvocationError::aborted())).await;
            return;
        }

        status = child.wait() => status,
    };

    let stderr_tail = stderr_task.await.unwrap_or_default();

    match status {
        Ok(status) if status.success() => {
            debug!("agent attempt finished");
        }
        Ok(status) => {
            let err =
                InvocationError::process_exit(status.code(), exit_signal(status), &stderr_tail);
            warn!(exit_code = status.code(), error = %err, "agent attempt failed");
            let _ = tx.send(Err(err)).await;
        }
        Err(err) => {
            let _ = tx
                .send(Err(InvocationError::other(format!(
                    "failed to wait for agent process: {err}"
                ))))
                .await;
        }
    }
}

#[cfg(unix)]
fn exit_signal(status: ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: ExitStatus) -> Option<i32> {
    None
}

async fn abort_child(child: &mut Child) {
    if let Err(err) = child.start_kill() {
        debug!(%err, "agent process already gone");
    }
    let _ = child.wait().await;
    info!("agent attempt aborted");
}

/// Read `reader` to EOF, keeping only the last `limit` bytes.
///
/// A read error ends collection with what was gathered so far. The
/// reader is dropped on return, so a child still writing to the pipe
/// gets `EPIPE` instead of blocking.
async fn collect_tail<R>(reader: R, limit: usize) -> String
where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(reader, BytesCodec::new());
    let mut tail: Vec<u8> = Vec::new();

    while let Some(chunk) = framed.next().await {
        match chunk {
            Ok(chunk) => {
                tail.extend_from_slice(&chunk);
                if tail.len() > limit * 2 {
                    tail.drain(..tail.len() - limit);
                }
            }
            Err(err) => {
                warn!(%err, "agent stderr read failed, keeping partial tail");
                break;
            }
        }
    }
    drop(framed);

    if tail.len() > limit {
        tail.drain(..tail.len() - limit);
    }
    String::from_utf8_lossy(&tail).into_owned()
}
