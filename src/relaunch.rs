//! Fire-and-forget launch of a sibling instance for another directory.
//!
//! The sibling is a separate OS process running this same binary with a
//! different working directory and IPC name. It is deliberately kept out
//! of the process registry: it is not killed on drop, not listed, and not
//! terminated on shutdown.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::info;

use crate::{AppError, Result};

/// Everything needed to start a sibling instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiblingLaunch {
    /// Binary to run (normally the current executable).
    pub executable: PathBuf,
    /// Config file the sibling loads.
    pub config_path: PathBuf,
    /// Working directory the sibling is pointed at.
    pub working_dir: PathBuf,
    /// IPC name the sibling listens on.
    pub ipc_name: String,
}

impl SiblingLaunch {
    /// Build a launch for `working_dir`, deriving the IPC name from
    /// `base_ipc_name` and the directory's name.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if `working_dir` is not an existing
    /// directory.
    pub fn new(
        executable: PathBuf,
        config_path: PathBuf,
        working_dir: &Path,
        base_ipc_name: &str,
    ) -> Result<Self> {
        let working_dir = working_dir
            .canonicalize()
            .ok()
            .filter(|dir| dir.is_dir())
            .ok_or_else(|| {
                AppError::NotFound(format!("directory {} does not exist", working_dir.display()))
            })?;
        let ipc_name = sibling_ipc_name(base_ipc_name, &working_dir);
        Ok(Self {
            executable,
            config_path,
            working_dir,
            ipc_name,
        })
    }

    /// Command-line arguments passed to the sibling.
    #[must_use]
    pub fn args(&self) -> Vec<String> {
        vec![
            "--config".into(),
            self.config_path.to_string_lossy().into_owned(),
            "--workspace".into(),
            self.working_dir.to_string_lossy().into_owned(),
            "--ipc-name".into(),
            self.ipc_name.clone(),
        ]
    }
}

/// `<base>-<dir name>` with every non-alphanumeric character replaced.
#[must_use]
pub fn sibling_ipc_name(base: &str, working_dir: &Path) -> String {
    let leaf = working_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let leaf: String = leaf
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    let leaf = leaf.trim_matches('-');
    if leaf.is_empty() {
        format!("{base}-sibling")
    } else {
        format!("{base}-{leaf}")
    }
}

/// Start the sibling and return without waiting on it.
///
/// # Errors
///
/// Returns `AppError::Process` if the OS refuses to start the binary.
pub fn launch_sibling(launch: &SiblingLaunch) -> Result<()> {
    let mut cmd = Command::new(&launch.executable);
    cmd.args(launch.args())
        .current_dir(&launch.working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(false);

    // Own process group: a ctrl-c aimed at this instance must not reach
    // the sibling.
    #[cfg(unix)]
    cmd.process_group(0);

    let child = cmd
        .spawn()
        .map_err(|err| AppError::Process(format!("failed to launch sibling: {err}")))?;

    info!(
        pid = child.id(),
        working_dir = %launch.working_dir.display(),
        ipc_name = %launch.ipc_name,
        "sibling instance launched"
    );
    Ok(())
}
