//! Display format and classification of application and invocation errors.

use agent_relay::invocation::{classify_message, FailureKind, InvocationError};
use agent_relay::AppError;

#[test]
fn app_error_display_is_prefixed_by_domain() {
    assert_eq!(AppError::Config("bad".into()).to_string(), "config: bad");
    assert_eq!(AppError::Process("bad".into()).to_string(), "process: bad");
    assert_eq!(AppError::Invocation("bad".into()).to_string(), "invocation: bad");
    assert_eq!(AppError::Ipc("bad".into()).to_string(), "ipc: bad");
    assert_eq!(AppError::NotFound("bad".into()).to_string(), "not found: bad");
    assert_eq!(AppError::Io("bad".into()).to_string(), "io: bad");
}

#[test]
fn io_error_converts_to_io_variant() {
    let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
    let err: AppError = io.into();
    assert!(matches!(err, AppError::Io(ref msg) if msg.contains("pipe closed")));
}

#[test]
fn exit_code_one_is_retryable() {
    let err = InvocationError::process_exit(Some(1), None, "rate limited");
    assert_eq!(err.kind, FailureKind::Unavailable);
    assert!(err.is_retryable());
    assert!(err.message.contains("rate limited"));
}

#[test]
fn other_exit_codes_are_not_retryable() {
    let err = InvocationError::process_exit(Some(2), None, "");
    assert_eq!(err.kind, FailureKind::Other);
    assert!(!err.is_retryable());
}

#[test]
fn killed_by_foreign_signal_is_not_an_abort() {
    let err = InvocationError::process_exit(None, Some(15), "oom");
    assert_eq!(err.kind, FailureKind::Other);
    assert!(!err.is_retryable());
    assert_eq!(err.message, "agent process killed by signal 15: oom");
}

#[test]
fn signal_names_in_text_are_not_aborts() {
    assert_eq!(classify_message("received SIGTERM"), FailureKind::Other);
    assert_eq!(classify_message("terminated by signal 9"), FailureKind::Other);
}

#[test]
fn text_classification_recognises_exit_code_one() {
    assert_eq!(
        classify_message("Claude Code process exited with code 1"),
        FailureKind::Unavailable
    );
    assert_eq!(classify_message("exit code: 1"), FailureKind::Unavailable);
}

#[test]
fn text_classification_ignores_other_codes() {
    assert_eq!(classify_message("process exited with code 12"), FailureKind::Other);
    assert_eq!(classify_message("connection reset"), FailureKind::Other);
}

#[test]
fn text_classification_prefers_abort() {
    assert_eq!(
        classify_message("AbortError: exited with code 1"),
        FailureKind::Aborted
    );
    assert_eq!(classify_message("operation aborted"), FailureKind::Aborted);
}
