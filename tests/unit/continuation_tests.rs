use agent_relay::invocation::{
    sanitize_continuation_id, Continuation, InvocationRequest, StreamTracker, NO_RESPONSE,
};
use serde_json::json;

#[test]
fn sanitizes_ids_copied_from_chat() {
    assert_eq!(sanitize_continuation_id("  abc-123  "), "abc-123");
    assert_eq!(sanitize_continuation_id("`abc-123`"), "abc-123");
    assert_eq!(sanitize_continuation_id("```\nabc-123\n```"), "abc-123");
    assert_eq!(sanitize_continuation_id("```text\nabc-123\n```"), "abc-123");
    assert_eq!(sanitize_continuation_id("abc\r\n-123"), "abc-123");
}

#[test]
fn sanitizing_only_noise_yields_empty() {
    assert_eq!(sanitize_continuation_id("``` ```"), "");
    assert_eq!(sanitize_continuation_id("\n\n"), "");
}

#[test]
fn id_takes_precedence_over_continue_latest() {
    assert_eq!(
        Continuation::from_parts(Some("abc"), true),
        Continuation::Resume("abc".into())
    );
}

#[test]
fn empty_id_falls_back_to_flag() {
    assert_eq!(
        Continuation::from_parts(Some(" `` "), true),
        Continuation::ContinueLatest
    );
    assert_eq!(Continuation::from_parts(None, false), Continuation::Fresh);
}

#[test]
fn request_sanitizes_id() {
    let req = InvocationRequest::new("/tmp", "hello", Some("```\nxyz\n```"), false);
    assert_eq!(req.continuation, Continuation::Resume("xyz".into()));
    assert_eq!(req.continuation.kind(), "resume");
}

#[test]
fn tracker_keeps_last_session_id() {
    let mut tracker = StreamTracker::default();
    tracker.observe(&json!({ "type": "system", "session_id": "one" }));
    tracker.observe(&json!({ "type": "user", "session_id": "" }));
    tracker.observe(&json!({ "type": "result", "session_id": "two" }));

    assert_eq!(tracker.continuation_id(), Some("two"));
    assert_eq!(tracker.events_seen(), 3);
}

#[test]
fn tracker_joins_text_blocks_and_skips_tool_use() {
    let mut tracker = StreamTracker::default();
    tracker.observe(&json!({
        "type": "assistant",
        "message": { "content": [
            { "type": "text", "text": "line one" },
            { "type": "tool_use", "name": "Bash", "input": {} },
            { "type": "text", "text": "line two" }
        ] }
    }));

    assert_eq!(tracker.final_text(), "line one\nline two");
}

#[test]
fn tracker_without_text_reports_placeholder() {
    let mut tracker = StreamTracker::default();
    tracker.observe(&json!({ "type": "system", "subtype": "init" }));
    assert_eq!(tracker.final_text(), NO_RESPONSE);
}

#[test]
fn tracker_reads_legacy_cost_field() {
    let mut tracker = StreamTracker::default();
    tracker.observe(&json!({ "type": "result", "cost_usd": 0.5, "duration_ms": 10 }));
    assert_eq!(tracker.cost_usd(), Some(0.5));
    assert_eq!(tracker.duration_ms(), Some(10));
}
