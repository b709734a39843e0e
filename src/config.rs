//! Global configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Process supervisor settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ProcessConfig {
    /// Shell program used to interpret command lines.
    ///
    /// Defaults to `sh` on Unix and `cmd` on Windows. The flag passed before
    /// the command line (`-c` / `/C`) is chosen from the shell's name.
    #[serde(default)]
    pub shell: Option<String>,
    /// Seconds between the graceful and the forceful termination signal.
    #[serde(default = "default_grace_period_seconds")]
    pub grace_period_seconds: u64,
    /// How long the exit waiter lets stream readers flush after exit.
    #[serde(default = "default_output_drain_millis")]
    pub output_drain_millis: u64,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            shell: None,
            grace_period_seconds: default_grace_period_seconds(),
            output_drain_millis: default_output_drain_millis(),
        }
    }
}

impl ProcessConfig {
    /// Grace period as a [`Duration`].
    #[must_use]
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_seconds)
    }

    /// Output drain window as a [`Duration`].
    #[must_use]
    pub fn output_drain(&self) -> Duration {
        Duration::from_millis(self.output_drain_millis)
    }

    /// Resolve the shell program and the flag that precedes the command line.
    #[must_use]
    pub fn shell_invocation(&self) -> (String, &'static str) {
        let shell = self.shell.clone().unwrap_or_else(|| {
            if cfg!(windows) {
                "cmd".to_owned()
            } else {
                "sh".to_owned()
            }
        });
        let stem = Path::new(&shell)
            .file_stem()
            .map(|s| s.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        let flag = if stem == "cmd" { "/C" } else { "-c" };
        (shell, flag)
    }
}

/// Streaming invocation settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct InvocationConfig {
    /// Agent CLI binary that produces the `stream-json` event stream.
    #[serde(default = "default_cli")]
    pub cli: String,
    /// Extra arguments appended after the generated ones.
    #[serde(default)]
    pub cli_args: Vec<String>,
    /// Model for the first attempt; `None` leaves the choice to the CLI.
    #[serde(default)]
    pub default_model: Option<String>,
    /// Model used for the single automatic retry.
    #[serde(default = "default_fallback_model")]
    pub fallback_model: String,
    /// Optional `--permission-mode` value.
    #[serde(default)]
    pub permission_mode: Option<String>,
}

impl Default for InvocationConfig {
    fn default() -> Self {
        Self {
            cli: default_cli(),
            cli_args: Vec::new(),
            default_model: None,
            fallback_model: default_fallback_model(),
            permission_mode: None,
        }
    }
}

fn default_grace_period_seconds() -> u64 {
    5
}

fn default_output_drain_millis() -> u64 {
    2000
}

fn default_cli() -> String {
    "claude".into()
}

fn default_fallback_model() -> String {
    "sonnet".into()
}

fn default_ipc_name() -> String {
    "agent-relay".into()
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Directory every spawned process and invocation runs in.
    pub working_dir: PathBuf,
    /// Named pipe / Unix socket identifier for the control surface.
    #[serde(default = "default_ipc_name")]
    pub ipc_name: String,
    /// Process supervisor settings.
    #[serde(default)]
    pub process: ProcessConfig,
    /// Streaming invocation settings.
    #[serde(default)]
    pub invocation: InvocationConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Replace the working directory, canonicalizing the new value.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the directory does not exist.
    pub fn set_working_dir(&mut self, dir: impl AsRef<Path>) -> Result<()> {
        self.working_dir = canonical_dir(dir.as_ref(), "working_dir override")?;
        Ok(())
    }

    /// Absolute path to the working directory.
    #[must_use]
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    fn validate(&mut self) -> Result<()> {
        if self.process.grace_period_seconds == 0 {
            return Err(AppError::Config(
                "process.grace_period_seconds must be greater than zero".into(),
            ));
        }

        if self.invocation.cli.trim().is_empty() {
            return Err(AppError::Config("invocation.cli must not be empty".into()));
        }

        if self.invocation.fallback_model.trim().is_empty() {
            return Err(AppError::Config(
                "invocation.fallback_model must not be empty".into(),
            ));
        }

        if self.ipc_name.trim().is_empty() {
            return Err(AppError::Config("ipc_name must not be empty".into()));
        }

        self.working_dir = canonical_dir(&self.working_dir, "working_dir")?;
        Ok(())
    }
}

fn canonical_dir(dir: &Path, label: &str) -> Result<PathBuf> {
    let canonical = dir
        .canonicalize()
        .map_err(|err| AppError::Config(format!("{label} invalid: {err}")))?;
    if !canonical.is_dir() {
        return Err(AppError::Config(format!(
            "{label} is not a directory: {}",
            canonical.display()
        )));
    }
    Ok(canonical)
}
