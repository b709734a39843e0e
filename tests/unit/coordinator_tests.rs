//! Single in-flight invocation semantics of `SessionCoordinator`.

use std::path::PathBuf;
use std::sync::Arc;

use agent_relay::coordinator::{ActiveInvocation, SessionCoordinator};
use agent_relay::invocation::{InvocationOutcome, InvocationRequest};
use serde_json::Value;
use tokio::sync::Notify;

use super::scripted_backend::{client_for, conversation, init, ScriptedBackend, Step};

fn request(prompt: &str) -> InvocationRequest {
    InvocationRequest::new(PathBuf::from("/tmp"), prompt, None, false)
}

#[tokio::test]
async fn start_new_cancels_previous_ticket() {
    let coordinator = SessionCoordinator::new(ActiveInvocation::new());

    let first = coordinator.start_new().await;
    assert!(!first.is_cancelled());

    let second = coordinator.start_new().await;
    assert!(first.is_cancelled());
    assert!(!second.is_cancelled());
    assert!(second.id() > first.id());
}

#[tokio::test]
async fn cancel_current_is_idempotent() {
    let coordinator = SessionCoordinator::new(ActiveInvocation::new());
    assert!(!coordinator.cancel_current().await);

    let ticket = coordinator.start_new().await;
    assert!(coordinator.is_active().await);
    assert!(coordinator.cancel_current().await);
    assert!(ticket.is_cancelled());
    assert!(!coordinator.is_active().await);
    assert!(!coordinator.cancel_current().await);
}

#[tokio::test]
async fn late_finish_does_not_clear_successor() {
    let coordinator = SessionCoordinator::new(ActiveInvocation::new());
    let first = coordinator.start_new().await;
    let second = coordinator.start_new().await;

    coordinator.finish(&first).await;
    assert!(coordinator.is_active().await);

    coordinator.finish(&second).await;
    assert!(!coordinator.is_active().await);
}

#[tokio::test]
async fn new_invocation_supersedes_running_one() {
    let backend = ScriptedBackend::new(vec![
        Step::Hang(vec![init("a")]),
        Step::Events(conversation("b", "answer b")),
    ]);
    let client = client_for(backend.clone());
    let coordinator = SessionCoordinator::new(ActiveInvocation::new());

    let started = Arc::new(Notify::new());
    let first = {
        let coordinator = coordinator.clone();
        let client = client.clone();
        let started = Arc::clone(&started);
        tokio::spawn(async move {
            coordinator
                .run(&client, request("a"), move |_: &Value| started.notify_one())
                .await
        })
    };

    started.notified().await;
    assert!(coordinator.is_active().await);

    let second = coordinator
        .run(&client, request("b"), |_: &Value| {})
        .await
        .expect("second invocation");
    assert_eq!(second.result().expect("completed").final_text, "answer b");

    let first = first.await.expect("join").expect("first invocation");
    assert_eq!(first, InvocationOutcome::Cancelled);

    assert_eq!(backend.calls(), 2);
    assert!(!coordinator.is_active().await);
}

#[tokio::test]
async fn cancel_current_stops_running_invocation() {
    let backend = ScriptedBackend::new(vec![Step::Hang(vec![init("a")])]);
    let client = client_for(backend);
    let coordinator = SessionCoordinator::new(ActiveInvocation::new());

    let started = Arc::new(Notify::new());
    let running = {
        let coordinator = coordinator.clone();
        let started = Arc::clone(&started);
        tokio::spawn(async move {
            coordinator
                .run(&client, request("a"), move |_: &Value| started.notify_one())
                .await
        })
    };

    started.notified().await;
    assert!(coordinator.cancel_current().await);

    let outcome = running.await.expect("join").expect("invocation");
    assert!(outcome.is_cancelled());
}

#[tokio::test]
async fn aborted_run_releases_the_slot() {
    let backend = ScriptedBackend::new(vec![Step::Hang(vec![init("a")])]);
    let client = client_for(backend);
    let coordinator = SessionCoordinator::new(ActiveInvocation::new());

    let started = Arc::new(Notify::new());
    let running = {
        let coordinator = coordinator.clone();
        let started = Arc::clone(&started);
        tokio::spawn(async move {
            coordinator
                .run(&client, request("a"), move |_: &Value| started.notify_one())
                .await
        })
    };

    started.notified().await;
    assert!(coordinator.is_active().await);

    running.abort();
    assert!(running.await.expect_err("aborted").is_cancelled());
    assert!(!coordinator.is_active().await);
    assert!(!coordinator.cancel_current().await, "nothing left to cancel");
}

#[tokio::test]
async fn timed_out_run_does_not_block_the_next_one() {
    let backend = ScriptedBackend::new(vec![
        Step::Hang(vec![init("slow")]),
        Step::Events(conversation("fast", "done")),
    ]);
    let client = client_for(backend);
    let coordinator = SessionCoordinator::new(ActiveInvocation::new());

    let timed_out = tokio::time::timeout(
        std::time::Duration::from_millis(200),
        coordinator.run(&client, request("slow"), |_: &Value| {}),
    )
    .await;
    assert!(timed_out.is_err());
    assert!(!coordinator.is_active().await);

    let outcome = coordinator
        .run(&client, request("fast"), |_: &Value| {})
        .await
        .expect("invocation");
    assert_eq!(outcome.result().expect("completed").final_text, "done");
}
