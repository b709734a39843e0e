//! `ClaudeCliBackend` driven end to end against a stand-in CLI script.

#![cfg(unix)]

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use agent_relay::invocation::{
    ClaudeCliBackend, InvocationOutcome, InvocationRequest, ModelUsed, SessionClient,
};
use agent_relay::AppError;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::test_helpers::{test_config, write_fake_cli};

const RECORD_CALL: &str = r#"echo "$*" >> "$(dirname "$0")/calls.log""#;

const EMIT_CONVERSATION: &str = r##"
echo '{"type":"system","subtype":"init","session_id":"cli-1"}'
echo 'not json at all'
echo '{"type":"assistant","session_id":"cli-1","message":{"content":[{"type":"text","text":"hello from cli"}]}}'
echo '{"type":"result","session_id":"cli-1","result":"hello from cli","total_cost_usd":0.01,"duration_ms":5}'
"##;

fn client(dir: &Path, body: &str) -> SessionClient {
    let cli = write_fake_cli(dir, body);
    let config = test_config(dir, &cli);
    let backend = Arc::new(ClaudeCliBackend::new(config.invocation.clone()));
    SessionClient::new(backend, &config.invocation)
}

fn calls(dir: &Path) -> Vec<String> {
    std::fs::read_to_string(dir.join("calls.log"))
        .unwrap_or_default()
        .lines()
        .map(str::to_owned)
        .collect()
}

fn request(dir: &Path, session_id: Option<&str>) -> InvocationRequest {
    InvocationRequest::new(dir, "what changed?", session_id, false)
}

#[tokio::test]
async fn stream_is_parsed_into_result() {
    let temp = tempfile::tempdir().expect("tempdir");
    let client = client(temp.path(), &format!("{RECORD_CALL}\n{EMIT_CONVERSATION}"));

    let mut types = Vec::new();
    let outcome = client
        .invoke(request(temp.path(), None), &CancellationToken::new(), |event: &Value| {
            types.push(event["type"].as_str().unwrap_or_default().to_owned());
        })
        .await
        .expect("invoke");

    let result = outcome.result().expect("completed");
    assert_eq!(result.final_text, "hello from cli");
    assert_eq!(result.continuation_id.as_deref(), Some("cli-1"));
    assert_eq!(result.model_used, ModelUsed::Default);
    assert_eq!(result.cost_usd, Some(0.01));
    assert_eq!(types, vec!["system", "assistant", "result"], "bad line skipped");

    let calls = calls(temp.path());
    assert_eq!(calls.len(), 1);
    assert!(calls[0].contains("--output-format stream-json"));
    assert!(calls[0].contains("--model opus"));
    assert!(calls[0].ends_with("-- what changed?"));
}

#[tokio::test]
async fn exit_code_one_falls_back_to_second_model() {
    let temp = tempfile::tempdir().expect("tempdir");
    let body = format!(
        "{RECORD_CALL}\ncase \"$*\" in\n  *'--model opus'*) echo 'rate limit exceeded' >&2; exit 1 ;;\nesac\n{EMIT_CONVERSATION}"
    );
    let client = client(temp.path(), &body);

    let outcome = client
        .invoke(request(temp.path(), None), &CancellationToken::new(), |_: &Value| {})
        .await
        .expect("invoke");

    let result = outcome.result().expect("completed");
    assert_eq!(result.model_used, ModelUsed::Fallback);
    assert_eq!(result.final_text, "hello from cli");

    let calls = calls(temp.path());
    assert_eq!(calls.len(), 2);
    assert!(calls[1].contains("--model sonnet"));
}

#[tokio::test]
async fn other_exit_code_surfaces_stderr() {
    let temp = tempfile::tempdir().expect("tempdir");
    let body = format!("{RECORD_CALL}\necho 'unknown option --frobnicate' >&2\nexit 2");
    let client = client(temp.path(), &body);

    let err = client
        .invoke(request(temp.path(), None), &CancellationToken::new(), |_: &Value| {})
        .await
        .expect_err("must fail");

    assert!(matches!(err, AppError::Invocation(ref msg) if msg.contains("--frobnicate")));
    assert_eq!(calls(temp.path()).len(), 1);
}

#[tokio::test]
async fn both_attempts_failing_is_reported_once() {
    let temp = tempfile::tempdir().expect("tempdir");
    let body = format!("{RECORD_CALL}\necho 'overloaded' >&2\nexit 1");
    let client = client(temp.path(), &body);

    let err = client
        .invoke(request(temp.path(), None), &CancellationToken::new(), |_: &Value| {})
        .await
        .expect_err("must fail");

    assert!(err.to_string().contains("exhausted"));
    assert_eq!(calls(temp.path()).len(), 2);
}

#[tokio::test]
async fn resume_id_reaches_the_cli() {
    let temp = tempfile::tempdir().expect("tempdir");
    let client = client(temp.path(), &format!("{RECORD_CALL}\n{EMIT_CONVERSATION}"));

    client
        .invoke(
            request(temp.path(), Some("`prev-42`")),
            &CancellationToken::new(),
            |_: &Value| {},
        )
        .await
        .expect("invoke");

    assert!(calls(temp.path())[0].contains("--resume prev-42"));
}

#[tokio::test]
async fn cancellation_stops_the_cli() {
    let temp = tempfile::tempdir().expect("tempdir");
    let body = format!(
        "{RECORD_CALL}\necho '{{\"type\":\"system\",\"session_id\":\"slow\"}}'\nexec sleep 30"
    );
    let client = client(temp.path(), &body);
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    let started = Instant::now();
    let outcome = client
        .invoke(request(temp.path(), None), &cancel, move |_: &Value| trigger.cancel())
        .await
        .expect("invoke");

    assert_eq!(outcome, InvocationOutcome::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(calls(temp.path()).len(), 1, "cancellation is never retried");
}

#[tokio::test]
async fn oversized_event_line_does_not_end_the_stream() {
    let temp = tempfile::tempdir().expect("tempdir");
    // 17 MB of filler without a newline, past the 16 MiB event limit.
    let body = format!(
        "{RECORD_CALL}\nhead -c 17000000 /dev/zero | tr '\\0' x\necho\n{EMIT_CONVERSATION}"
    );
    let client = client(temp.path(), &body);

    let outcome = tokio::time::timeout(
        Duration::from_secs(60),
        client.invoke(request(temp.path(), None), &CancellationToken::new(), |_: &Value| {}),
    )
    .await
    .expect("invocation finishes")
    .expect("invoke");

    let result = outcome.result().expect("completed");
    assert_eq!(result.final_text, "hello from cli");
    assert_eq!(calls(temp.path()).len(), 1);
}

#[tokio::test]
async fn external_kill_is_a_failure_not_a_cancellation() {
    let temp = tempfile::tempdir().expect("tempdir");
    let body = format!(
        "{RECORD_CALL}\necho '{{\"type\":\"system\",\"subtype\":\"init\",\"session_id\":\"doomed\"}}'\nkill -9 $$"
    );
    let client = client(temp.path(), &body);

    let err = client
        .invoke(request(temp.path(), None), &CancellationToken::new(), |_: &Value| {})
        .await
        .expect_err("a foreign SIGKILL must surface as an error");

    assert!(
        matches!(err, AppError::Invocation(ref msg) if msg.contains("signal 9")),
        "unexpected error: {err}"
    );
    assert_eq!(calls(temp.path()).len(), 1, "signal exits are not retried");
}
