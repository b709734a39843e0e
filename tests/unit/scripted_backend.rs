//! In-memory `InvocationBackend` that replays a fixed script per attempt.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use agent_relay::config::InvocationConfig;
use agent_relay::invocation::backend::StartFuture;
use agent_relay::invocation::{AttemptRequest, InvocationBackend, InvocationError, SessionClient};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// What one attempt does.
pub enum Step {
    /// Emit the events, then close the stream cleanly.
    Events(Vec<Value>),
    /// Emit the events, then end with the error.
    EventsThenFail(Vec<Value>, InvocationError),
    /// Refuse to start.
    FailToStart(InvocationError),
    /// Emit the events, then stay open until cancelled.
    Hang(Vec<Value>),
}

#[derive(Default)]
pub struct ScriptedBackend {
    steps: Mutex<VecDeque<Step>>,
    calls: AtomicUsize,
    requests: Mutex<Vec<AttemptRequest>>,
}

impl ScriptedBackend {
    pub fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            ..Self::default()
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<AttemptRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl InvocationBackend for ScriptedBackend {
    fn start(&self, request: AttemptRequest, cancel: CancellationToken) -> StartFuture<'_> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);
        let step = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Step::Events(Vec::new()));

        Box::pin(async move {
            let (tx, rx) = mpsc::channel(64);
            match step {
                Step::FailToStart(err) => return Err(err),
                Step::Events(events) => {
                    tokio::spawn(async move {
                        for event in events {
                            let _ = tx.send(Ok(event)).await;
                        }
                    });
                }
                Step::EventsThenFail(events, err) => {
                    tokio::spawn(async move {
                        for event in events {
                            let _ = tx.send(Ok(event)).await;
                        }
                        let _ = tx.send(Err(err)).await;
                    });
                }
                Step::Hang(events) => {
                    tokio::spawn(async move {
                        for event in events {
                            let _ = tx.send(Ok(event)).await;
                        }
                        cancel.cancelled().await;
                        let _ = tx.send(Err(InvocationError::aborted())).await;
                    });
                }
            }
            Ok(rx)
        })
    }
}

pub fn client_for(backend: Arc<ScriptedBackend>) -> SessionClient {
    let config = InvocationConfig {
        default_model: Some("opus".into()),
        fallback_model: "sonnet".into(),
        ..InvocationConfig::default()
    };
    SessionClient::new(backend, &config)
}

pub fn init(session_id: &str) -> Value {
    json!({ "type": "system", "subtype": "init", "session_id": session_id })
}

pub fn assistant(session_id: &str, text: &str) -> Value {
    json!({
        "type": "assistant",
        "session_id": session_id,
        "message": { "content": [ { "type": "text", "text": text } ] }
    })
}

pub fn result(session_id: &str, text: &str) -> Value {
    json!({
        "type": "result",
        "subtype": "success",
        "session_id": session_id,
        "result": text,
        "total_cost_usd": 0.0125,
        "duration_ms": 1800
    })
}

pub fn conversation(session_id: &str, text: &str) -> Vec<Value> {
    vec![
        init(session_id),
        assistant(session_id, text),
        result(session_id, text),
    ]
}
