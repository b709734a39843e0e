//! Termination signals for supervised process groups.
//!
//! On Unix every child is the leader of its own process group, so both
//! signals go to the whole group and shell pipelines do not leave
//! orphans behind. Other platforms have no graceful signal; callers fall
//! back to a forced kill when [`terminate_gracefully`] returns `false`.

#[cfg(unix)]
use nix::errno::Errno;
#[cfg(unix)]
use nix::sys::signal::{killpg, Signal};
#[cfg(unix)]
use nix::unistd::Pid;
#[cfg(unix)]
use tracing::{debug, warn};

/// Send SIGTERM to the process group led by `pid`.
///
/// Returns `true` if the signal was delivered.
#[cfg(unix)]
#[must_use]
pub fn terminate_gracefully(pid: u32) -> bool {
    signal_group(pid, Signal::SIGTERM)
}

/// Send SIGKILL to the process group led by `pid`.
///
/// Returns `true` if the signal was delivered.
#[cfg(unix)]
#[must_use]
pub fn terminate_forcefully(pid: u32) -> bool {
    signal_group(pid, Signal::SIGKILL)
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: Signal) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        warn!(pid, "pid out of range, cannot signal");
        return false;
    };

    match killpg(Pid::from_raw(raw), signal) {
        Ok(()) => true,
        Err(Errno::ESRCH) => {
            debug!(pid, %signal, "process group already gone");
            false
        }
        Err(err) => {
            warn!(pid, %signal, %err, "failed to signal process group");
            false
        }
    }
}

/// No graceful termination signal exists on this platform.
#[cfg(not(unix))]
#[must_use]
pub fn terminate_gracefully(_pid: u32) -> bool {
    false
}

/// Group signalling is unavailable; the exit waiter kills the child itself.
#[cfg(not(unix))]
#[must_use]
pub fn terminate_forcefully(_pid: u32) -> bool {
    false
}
