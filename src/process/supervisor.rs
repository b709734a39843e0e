//! Process supervisor: spawn, feed, list, and tear down child processes.
//!
//! Every spawned process gets:
//! - a monotonically increasing [`ProcessHandle`],
//! - two reader tasks (stdout, stderr) feeding its [`OutputMux`],
//! - one exit-waiter task that owns the [`Child`], publishes exactly one
//!   terminal event and deregisters the handle.
//!
//! `kill` sends the graceful signal, waits out the grace period, then
//! asks the exit waiter to force-kill. The handle disappears from the
//! registry only once the exit waiter has confirmed the exit.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::output::{pump_stream, EventReceiver, OutputMux, OutputStream, ProcessHandle};
use super::registry::{
    InputSink, KillTarget, ManagedProcess, ProcessInfo, ProcessRegistry, ReapedFlag,
};
use super::signal;
use crate::config::ProcessConfig;
use crate::{AppError, Result};

/// Upper bound on waiting for exit confirmation after a forced kill.
const FORCE_KILL_CONFIRM_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of a successful [`ProcessSupervisor::spawn`].
#[derive(Debug)]
pub struct SpawnedProcess {
    /// Handle identifying the process for later calls.
    pub handle: ProcessHandle,
    /// OS process id, when available.
    pub pid: Option<u32>,
    /// Subscription registered before any output was read.
    pub events: EventReceiver,
    /// Mux for registering further subscribers.
    pub output: OutputMux,
}

/// Owns the lifecycle of every child process started through it.
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    working_dir: PathBuf,
    config: ProcessConfig,
    registry: ProcessRegistry,
}

impl ProcessSupervisor {
    /// Create a supervisor bound to `working_dir`, tracking processes in
    /// `registry`.
    #[must_use]
    pub fn new(working_dir: PathBuf, config: ProcessConfig, registry: ProcessRegistry) -> Self {
        Self {
            working_dir,
            config,
            registry,
        }
    }

    /// Directory every process is started in.
    #[must_use]
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// The registry this supervisor mutates.
    #[must_use]
    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    /// Spawn `command` through the configured shell.
    ///
    /// If `initial_input` is given it is written to stdin, followed by a
    /// newline, right after the process starts. Never waits for the
    /// process to finish.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Process` if the OS refuses to start the process
    /// or its stdio pipes cannot be captured.
    pub async fn spawn(
        &self,
        command: &str,
        initial_input: Option<&str>,
    ) -> Result<SpawnedProcess> {
        let span = info_span!("spawn_process", command);
        async move {
            let (shell, flag) = self.config.shell_invocation();
            let mut cmd = Command::new(&shell);
            cmd.arg(flag)
                .arg(command)
                .current_dir(&self.working_dir)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);

            #[cfg(unix)]
            cmd.process_group(0);

            let mut child = cmd
                .spawn()
                .map_err(|err| AppError::Process(format!("failed to spawn `{command}`: {err}")))?;

            let stdin = child
                .stdin
                .take()
                .ok_or_else(|| AppError::Process("failed to capture process stdin".into()))?;
            let stdout = child
                .stdout
                .take()
                .ok_or_else(|| AppError::Process("failed to capture process stdout".into()))?;
            let stderr = child
                .stderr
                .take()
                .ok_or_else(|| AppError::Process("failed to capture process stderr".into()))?;

            let pid = child.id();
            let stdin: InputSink = Arc::new(Mutex::new(Some(stdin)));
            let force_kill = CancellationToken::new();
            let reaped = ReapedFlag::default();
            let (exited_tx, exited_rx) = watch::channel(false);

            // The mux and the caller's subscription exist before the
            // readers start, so the caller sees every byte.
            let handle = self.registry.allocate_handle().await;
            let output = OutputMux::new(handle);
            let events = output.subscribe().await;
            self.registry
                .insert(
                    handle,
                    ManagedProcess {
                        command: command.to_owned(),
                        started_at: Utc::now(),
                        pid,
                        stdin: Arc::clone(&stdin),
                        output: output.clone(),
                        force_kill: force_kill.clone(),
                        reaped: reaped.clone(),
                        exited: exited_rx,
                    },
                )
                .await;

            info!(handle, pid, "process spawned");

            let stdout_task = tokio::spawn(pump_stream(output.clone(), OutputStream::Stdout, stdout));
            let stderr_task = tokio::spawn(pump_stream(output.clone(), OutputStream::Stderr, stderr));

            tokio::spawn(
                watch_exit(ExitWatch {
                    handle,
                    pid,
                    child,
                    readers: [stdout_task, stderr_task],
                    output: output.clone(),
                    force_kill,
                    reaped,
                    exited: exited_tx,
                    registry: self.registry.clone(),
                    drain: self.config.output_drain(),
                })
                .instrument(info_span!("exit_waiter", handle)),
            );

            if let Some(text) = initial_input {
                if !write_line(handle, &stdin, text).await {
                    warn!(handle, "initial input could not be delivered");
                }
            }

            Ok(SpawnedProcess {
                handle,
                pid,
                events,
                output,
            })
        }
        .instrument(span)
        .await
    }

    /// Write `text` plus a newline to the stdin of `handle`.
    ///
    /// Returns `false` without side effects if the handle is not live.
    /// Concurrent calls for the same handle are serialized.
    pub async fn send_input(&self, handle: ProcessHandle, text: &str) -> bool {
        let Some(stdin) = self.registry.input_sink(handle).await else {
            debug!(handle, "send_input: unknown handle");
            return false;
        };
        write_line(handle, &stdin, text).await
    }

    /// Close the stdin of `handle` so the process observes EOF.
    ///
    /// Returns `false` if the handle is unknown or its input was already
    /// closed.
    pub async fn close_input(&self, handle: ProcessHandle) -> bool {
        let Some(stdin) = self.registry.input_sink(handle).await else {
            return false;
        };

        let Some(mut pipe) = stdin.lock().await.take() else {
            return false;
        };
        if let Err(err) = pipe.shutdown().await {
            warn!(handle, %err, "failed to shut down process stdin");
        }
        info!(handle, "process stdin closed");
        true
    }

    /// Ordered snapshot of all live processes.
    pub async fn list(&self) -> Vec<ProcessInfo> {
        self.registry.snapshot().await
    }

    /// Whether `handle` is still live.
    pub async fn is_running(&self, handle: ProcessHandle) -> bool {
        self.registry.contains(handle).await
    }

    /// Accumulated output of a live process.
    pub async fn output(&self, handle: ProcessHandle) -> Option<String> {
        match self.registry.output(handle).await {
            Some(mux) => Some(mux.snapshot().await),
            None => None,
        }
    }

    /// Add a subscriber to a live process.
    pub async fn subscribe(&self, handle: ProcessHandle) -> Option<EventReceiver> {
        match self.registry.output(handle).await {
            Some(mux) => Some(mux.subscribe().await),
            None => None,
        }
    }

    /// Terminate `handle`: graceful signal, grace period, forced kill.
    ///
    /// Returns `false` without side effects if the handle is unknown.
    /// On `true` the process has exited and been deregistered, unless the
    /// OS failed to confirm the forced kill in time (logged).
    pub async fn kill(&self, handle: ProcessHandle) -> bool {
        let Some(target) = self.registry.kill_target(handle).await else {
            debug!(handle, "kill: unknown handle");
            return false;
        };

        let grace = self.config.grace_period();
        let drain = self.config.output_drain();
        async move {
            if target.reaped.is_set() {
                debug!("process already reaped, waiting for output drain");
                if !wait_for_exit(target.exited, drain + FORCE_KILL_CONFIRM_TIMEOUT).await {
                    warn!("exit not published after output drain");
                }
                return true;
            }

            let signalled = target.live_pid().is_some_and(signal::terminate_gracefully);
            if signalled {
                info!(pid = target.pid, ?grace, "graceful termination signal sent");
                if wait_for_exit(target.exited.clone(), grace).await {
                    info!("process exited after graceful signal");
                    return true;
                }
                warn!("process did not exit within grace period, forcing kill");
            }

            target.force_kill.cancel();
            if wait_for_exit(target.exited, FORCE_KILL_CONFIRM_TIMEOUT).await {
                info!("process exited after forced kill");
            } else {
                warn!("exit not confirmed after forced kill");
            }
            true
        }
        .instrument(info_span!("kill_process", handle))
        .await
    }

    /// Send the graceful termination signal to every live process without
    /// waiting. Returns the handles that were signalled; processes that
    /// already exited but are still draining output are skipped.
    pub async fn kill_all(&self) -> Vec<ProcessHandle> {
        let targets: Vec<KillTarget> = self
            .registry
            .kill_targets()
            .await
            .into_iter()
            .filter(|target| !target.reaped.is_set())
            .collect();
        info!(count = targets.len(), "terminating all processes");
        targets.iter().map(signal_target).collect()
    }
}

fn signal_target(target: &KillTarget) -> ProcessHandle {
    if !target.live_pid().is_some_and(signal::terminate_gracefully) {
        target.force_kill.cancel();
    }
    target.handle
}

async fn wait_for_exit(mut exited: watch::Receiver<bool>, limit: Duration) -> bool {
    tokio::time::timeout(limit, exited.wait_for(|done| *done))
        .await
        .is_ok_and(|res| res.is_ok())
}

async fn write_line(handle: ProcessHandle, stdin: &InputSink, text: &str) -> bool {
    let mut guard = stdin.lock().await;
    let Some(pipe) = guard.as_mut() else {
        debug!(handle, "process stdin already closed");
        return false;
    };

    let mut line = String::with_capacity(text.len() + 1);
    line.push_str(text);
    line.push('\n');

    let written = async {
        pipe.write_all(line.as_bytes()).await?;
        pipe.flush().await
    }
    .await;

    match written {
        Ok(()) => {
            debug!(handle, bytes = line.len(), "input written");
            true
        }
        Err(err) => {
            warn!(handle, %err, "write to process stdin failed");
            false
        }
    }
}

struct ExitWatch {
    handle: ProcessHandle,
    pid: Option<u32>,
    child: Child,
    readers: [JoinHandle<()>; 2],
    output: OutputMux,
    force_kill: CancellationToken,
    reaped: ReapedFlag,
    exited: watch::Sender<bool>,
    registry: ProcessRegistry,
    drain: Duration,
}

/// Await process exit, flush the readers, deregister and publish.
async fn watch_exit(ctx: ExitWatch) {
    let ExitWatch {
        handle,
        pid,
        mut child,
        mut readers,
        output,
        force_kill,
        reaped,
        exited,
        registry,
        drain,
    } = ctx;

    let status = tokio::select! {
        status = child.wait() => status,
        () = force_kill.cancelled() => {
            if !pid.is_some_and(signal::terminate_forcefully) {
                if let Err(err) = child.start_kill() {
                    warn!(%err, "failed to force-kill process");
                }
            }
            child.wait().await
        }
    };
    reaped.mark();

    let flushed = tokio::time::timeout(drain, async {
        for reader in &mut readers {
            let _ = reader.await;
        }
    })
    .await;
    if flushed.is_err() {
        warn!(?drain, "output still open after exit, closing readers");
        for reader in &readers {
            reader.abort();
        }
    }

    registry.remove(handle).await;

    match status {
        Ok(status) => {
            info!(exit_code = status.code(), "process exited");
            output.finish_exited(status.code()).await;
        }
        Err(err) => {
            warn!(%err, "failed to collect process exit status");
            output
                .finish_failed(format!("failed to wait for process: {err}"))
                .await;
        }
    }

    let _ = exited.send(true);
}
