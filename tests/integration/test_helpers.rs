//! Shared helpers for integration tests.
//!
//! Builds supervisors and application state over temporary directories
//! and writes stand-in agent CLI scripts.

use std::path::{Path, PathBuf};
use std::time::Duration;

use agent_relay::config::{GlobalConfig, ProcessConfig};
use agent_relay::process::{EventReceiver, ProcessEvent, ProcessRegistry, ProcessSupervisor};

/// Supervisor rooted at `dir` with a short grace period and drain window.
pub fn supervisor(dir: &Path, grace_period_seconds: u64) -> ProcessSupervisor {
    let config = ProcessConfig {
        shell: Some("sh".into()),
        grace_period_seconds,
        output_drain_millis: 500,
    };
    ProcessSupervisor::new(dir.to_path_buf(), config, ProcessRegistry::new())
}

/// Minimal config over `dir` that runs `cli` as the agent binary.
pub fn test_config(dir: &Path, cli: &Path) -> GlobalConfig {
    let toml = format!(
        r#"
working_dir = '{dir}'
ipc_name = "agent-relay-test"

[process]
shell = "sh"
grace_period_seconds = 1
output_drain_millis = 500

[invocation]
cli = '{cli}'
default_model = "opus"
fallback_model = "sonnet"
"#,
        dir = dir.display(),
        cli = cli.display(),
    );
    GlobalConfig::from_toml_str(&toml).expect("test config")
}

/// Drain `events` until a terminal event arrives or `limit` passes.
///
/// Returns the concatenated output chunks and the terminal event, if any.
pub async fn collect_until_terminal(
    events: &mut EventReceiver,
    limit: Duration,
) -> (String, Option<ProcessEvent>) {
    let mut chunks = String::new();
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        match tokio::time::timeout_at(deadline, events.recv()).await {
            Ok(Some(ProcessEvent::Output { text, .. })) => chunks.push_str(&text),
            Ok(Some(terminal)) => return (chunks, Some(terminal)),
            Ok(None) | Err(_) => return (chunks, None),
        }
    }
}

/// Wait until the concatenated output contains `needle`.
pub async fn wait_for_output(events: &mut EventReceiver, needle: &str, limit: Duration) -> String {
    let mut chunks = String::new();
    let deadline = tokio::time::Instant::now() + limit;
    while !chunks.contains(needle) {
        match tokio::time::timeout_at(deadline, events.recv()).await {
            Ok(Some(ProcessEvent::Output { text, .. })) => chunks.push_str(&text),
            other => panic!("expected output containing {needle:?}, got {other:?} after {chunks:?}"),
        }
    }
    chunks
}

/// Write an executable shell script standing in for the agent CLI.
///
/// The script sees the generated arguments in `"$@"`.
#[cfg(unix)]
pub fn write_fake_cli(dir: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("fake-agent");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    let mut perms = std::fs::metadata(&path).expect("metadata").permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).expect("chmod");
    path
}
