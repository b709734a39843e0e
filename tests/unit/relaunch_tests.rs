use std::path::{Path, PathBuf};

use agent_relay::relaunch::{sibling_ipc_name, SiblingLaunch};
use agent_relay::AppError;

#[test]
fn ipc_name_derives_from_directory_leaf() {
    assert_eq!(
        sibling_ipc_name("agent-relay", Path::new("/work/My Project")),
        "agent-relay-my-project"
    );
    assert_eq!(sibling_ipc_name("relay", Path::new("/")), "relay-sibling");
}

#[test]
fn launch_targets_canonical_directory() {
    let temp = tempfile::tempdir().expect("tempdir");
    let dir = temp.path().join("other");
    std::fs::create_dir(&dir).unwrap();

    let launch = SiblingLaunch::new(
        PathBuf::from("/usr/bin/agent-relay"),
        PathBuf::from("/etc/relay.toml"),
        &dir,
        "agent-relay",
    )
    .expect("launch");

    assert_eq!(launch.working_dir, dir.canonicalize().unwrap());
    assert_eq!(launch.ipc_name, "agent-relay-other");

    let args = launch.args();
    assert_eq!(args[0], "--config");
    assert_eq!(args[1], "/etc/relay.toml");
    assert_eq!(args[2], "--workspace");
    assert_eq!(args[4], "--ipc-name");
    assert_eq!(args[5], "agent-relay-other");
}

#[test]
fn missing_directory_is_not_found() {
    let temp = tempfile::tempdir().expect("tempdir");
    let err = SiblingLaunch::new(
        PathBuf::from("agent-relay"),
        PathBuf::from("relay.toml"),
        &temp.path().join("missing"),
        "agent-relay",
    )
    .expect_err("must fail");
    assert!(matches!(err, AppError::NotFound(_)));
}

#[test]
fn file_is_not_a_valid_target() {
    let temp = tempfile::tempdir().expect("tempdir");
    let file = temp.path().join("notes.txt");
    std::fs::write(&file, "x").unwrap();
    assert!(SiblingLaunch::new(
        PathBuf::from("agent-relay"),
        PathBuf::from("relay.toml"),
        &file,
        "agent-relay",
    )
    .is_err());
}
