//! Streaming session client for the external agent.
//!
//! - `backend`: the [`InvocationBackend`] seam (one call per attempt).
//! - `cli`: backend that runs the agent CLI in `stream-json` mode.
//! - `client`: [`SessionClient::invoke`] with the single-retry fallback policy.
//! - `codec`: NDJSON framing for the CLI's stdout.
//! - `error`: [`InvocationError`] and its failure classification.
//! - `sanitize`: cleanup of operator-supplied continuation ids.
//! - `tracker`: continuation id / final text extraction.

pub mod backend;
pub mod cli;
pub mod client;
pub mod codec;
pub mod error;
pub mod sanitize;
pub mod tracker;

use std::path::PathBuf;

use serde::Serialize;

pub use backend::{AttemptRequest, EventItem, EventStream, InvocationBackend};
pub use cli::ClaudeCliBackend;
pub use client::SessionClient;
pub use error::{classify_message, FailureKind, InvocationError};
pub use sanitize::sanitize_continuation_id;
pub use tracker::{StreamTracker, NO_RESPONSE};

/// How an invocation resumes prior conversation state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Continuation {
    /// Start a new conversation.
    Fresh,
    /// Resume the conversation with this id.
    Resume(String),
    /// Resume the most recent conversation in the work directory.
    ContinueLatest,
}

impl Continuation {
    /// Build from the caller's optional id and `continue_latest` flag.
    ///
    /// The id is sanitized first; a non-empty id takes precedence over
    /// `continue_latest`.
    #[must_use]
    pub fn from_parts(continuation_id: Option<&str>, continue_latest: bool) -> Self {
        let id = continuation_id
            .map(sanitize_continuation_id)
            .filter(|id| !id.is_empty());
        match id {
            Some(id) => Self::Resume(id),
            None if continue_latest => Self::ContinueLatest,
            None => Self::Fresh,
        }
    }

    /// Short label used in logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Fresh => "fresh",
            Self::Resume(_) => "resume",
            Self::ContinueLatest => "continue",
        }
    }
}

/// Caller-facing parameters of [`SessionClient::invoke`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationRequest {
    /// Directory the call runs in.
    pub work_dir: PathBuf,
    /// Prompt text.
    pub prompt: String,
    /// How prior conversation state is resumed.
    pub continuation: Continuation,
}

impl InvocationRequest {
    /// Build a request, sanitizing `continuation_id`.
    #[must_use]
    pub fn new(
        work_dir: impl Into<PathBuf>,
        prompt: impl Into<String>,
        continuation_id: Option<&str>,
        continue_latest: bool,
    ) -> Self {
        Self {
            work_dir: work_dir.into(),
            prompt: prompt.into(),
            continuation: Continuation::from_parts(continuation_id, continue_latest),
        }
    }
}

/// Which model configuration serviced a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelUsed {
    /// The configured default.
    Default,
    /// The fallback used by the automatic retry.
    Fallback,
}

/// Result of a completed invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvocationResult {
    /// Last assistant text, or [`NO_RESPONSE`].
    pub final_text: String,
    /// Id for resuming this conversation later.
    pub continuation_id: Option<String>,
    /// Monetary cost reported by the terminal event.
    pub cost_usd: Option<f64>,
    /// Elapsed time reported by the terminal event.
    pub duration_ms: Option<u64>,
    /// Default or fallback configuration.
    pub model_used: ModelUsed,
    /// Concrete model name, if one was requested explicitly.
    pub model: Option<String>,
}

/// Outcome of [`SessionClient::invoke`] that is not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum InvocationOutcome {
    /// The stream ran to completion.
    Completed(InvocationResult),
    /// The invocation was cancelled or superseded.
    Cancelled,
}

impl InvocationOutcome {
    /// Whether the invocation was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// The completed result, if any.
    #[must_use]
    pub fn result(&self) -> Option<&InvocationResult> {
        match self {
            Self::Completed(result) => Some(result),
            Self::Cancelled => None,
        }
    }
}
