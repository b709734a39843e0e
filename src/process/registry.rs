//! Shared table of live supervised processes.
//!
//! The registry is the only shared mutable state on the process side. It
//! is created by the owner of the supervisor and passed into
//! [`ProcessSupervisor::new`](super::ProcessSupervisor::new); a single
//! async mutex guards both the handle counter and the process map.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::process::ChildStdin;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;

use super::output::{OutputMux, ProcessHandle};

/// Shared, exclusively-owned input sink of one process.
pub(crate) type InputSink = Arc<Mutex<Option<ChildStdin>>>;

/// Set by the exit waiter as soon as the child has been reaped. From then
/// on the pid may belong to an unrelated process and must not be signalled.
#[derive(Debug, Clone, Default)]
pub(crate) struct ReapedFlag(Arc<AtomicBool>);

impl ReapedFlag {
    pub(crate) fn mark(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub(crate) fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Public snapshot of one live process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessInfo {
    /// Supervisor-issued handle.
    pub handle: ProcessHandle,
    /// Shell command line the process was started with.
    pub command: String,
    /// Wall-clock start time.
    pub started_at: DateTime<Utc>,
    /// OS process id, when the platform reported one.
    pub pid: Option<u32>,
}

/// Registry entry for one live process.
#[derive(Debug)]
pub(crate) struct ManagedProcess {
    pub(crate) command: String,
    pub(crate) started_at: DateTime<Utc>,
    pub(crate) pid: Option<u32>,
    pub(crate) stdin: InputSink,
    pub(crate) output: OutputMux,
    /// Fired by `kill` to make the exit waiter force-kill the child.
    pub(crate) force_kill: CancellationToken,
    pub(crate) reaped: ReapedFlag,
    /// Flips to `true` once the exit waiter has deregistered the process.
    pub(crate) exited: watch::Receiver<bool>,
}

/// What `kill` needs from an entry, cloned out so the lock is not held
/// across the grace period.
#[derive(Debug, Clone)]
pub(crate) struct KillTarget {
    pub(crate) handle: ProcessHandle,
    pub(crate) pid: Option<u32>,
    pub(crate) force_kill: CancellationToken,
    pub(crate) reaped: ReapedFlag,
    pub(crate) exited: watch::Receiver<bool>,
}

impl KillTarget {
    /// Pid that is still safe to signal: known and not yet reaped.
    pub(crate) fn live_pid(&self) -> Option<u32> {
        self.pid.filter(|_| !self.reaped.is_set())
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    last_handle: ProcessHandle,
    processes: BTreeMap<ProcessHandle, ManagedProcess>,
}

/// Handle-to-process map shared between the supervisor and its
/// per-process exit waiters.
#[derive(Debug, Clone, Default)]
pub struct ProcessRegistry {
    inner: Arc<Mutex<RegistryState>>,
}

impl ProcessRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live processes.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.processes.len()
    }

    /// Whether no process is live.
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.processes.is_empty()
    }

    /// Whether `handle` denotes a live process.
    pub async fn contains(&self, handle: ProcessHandle) -> bool {
        self.inner.lock().await.processes.contains_key(&handle)
    }

    /// Issue the next handle.
    ///
    /// Handles are strictly increasing for the lifetime of the registry
    /// and are never reused, even after the process is removed.
    pub(crate) async fn allocate_handle(&self) -> ProcessHandle {
        let mut state = self.inner.lock().await;
        state.last_handle += 1;
        state.last_handle
    }

    pub(crate) async fn insert(&self, handle: ProcessHandle, process: ManagedProcess) {
        self.inner.lock().await.processes.insert(handle, process);
    }

    /// Remove `handle`. Returns `false` if it was already gone.
    pub(crate) async fn remove(&self, handle: ProcessHandle) -> bool {
        self.inner.lock().await.processes.remove(&handle).is_some()
    }

    pub(crate) async fn input_sink(&self, handle: ProcessHandle) -> Option<InputSink> {
        self.inner
            .lock()
            .await
            .processes
            .get(&handle)
            .map(|p| Arc::clone(&p.stdin))
    }

    pub(crate) async fn output(&self, handle: ProcessHandle) -> Option<OutputMux> {
        self.inner
            .lock()
            .await
            .processes
            .get(&handle)
            .map(|p| p.output.clone())
    }

    pub(crate) async fn kill_target(&self, handle: ProcessHandle) -> Option<KillTarget> {
        self.inner
            .lock()
            .await
            .processes
            .get(&handle)
            .map(|p| to_kill_target(handle, p))
    }

    pub(crate) async fn kill_targets(&self) -> Vec<KillTarget> {
        self.inner
            .lock()
            .await
            .processes
            .iter()
            .map(|(handle, p)| to_kill_target(*handle, p))
            .collect()
    }

    /// Snapshot of all live processes, ordered by handle.
    pub async fn snapshot(&self) -> Vec<ProcessInfo> {
        self.inner
            .lock()
            .await
            .processes
            .iter()
            .map(|(handle, p)| ProcessInfo {
                handle: *handle,
                command: p.command.clone(),
                started_at: p.started_at,
                pid: p.pid,
            })
            .collect()
    }
}

fn to_kill_target(handle: ProcessHandle, process: &ManagedProcess) -> KillTarget {
    KillTarget {
        handle,
        pid: process.pid,
        force_kill: process.force_kill.clone(),
        reaped: process.reaped.clone(),
        exited: process.exited.clone(),
    }
}
