//! Structured failures of a single invocation attempt.
//!
//! Backends classify their own failures where the information is
//! structured (the CLI backend knows the exit code). Errors that only
//! exist as text go through [`classify_message`], which recognises the
//! exit-code-1 signature the agent CLI reports when the requested model
//! is rate limited or unavailable.

use std::fmt::{Display, Formatter};
use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

/// Exit code the agent CLI uses for rate-limit / availability failures.
pub const UNAVAILABLE_EXIT_CODE: i32 = 1;

static EXIT_CODE_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| compile(r"(?i)exit(?:ed with)? code:?\s*(-?\d+)"));

static ABORT_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| compile(r"(?i)\b(aborted|abort ?error)\b"));

fn compile(pattern: &str) -> Option<Regex> {
    Regex::new(pattern)
        .map_err(|err| warn!(%err, pattern, "failed to compile failure classifier"))
        .ok()
}

/// Failure classes that drive the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Rate-limit / availability class; retried once on the fallback model.
    Unavailable,
    /// The attempt was aborted by our own cancellation signal.
    Aborted,
    /// Anything else; surfaced immediately.
    Other,
}

/// Failure of one invocation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationError {
    /// Classification used by the retry policy.
    pub kind: FailureKind,
    /// Human-readable cause.
    pub message: String,
}

impl InvocationError {
    /// Build an error with an explicit classification.
    #[must_use]
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Build an error of kind [`FailureKind::Other`].
    #[must_use]
    pub fn other(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Other, message)
    }

    /// Build an error of kind [`FailureKind::Aborted`].
    #[must_use]
    pub fn aborted() -> Self {
        Self::new(FailureKind::Aborted, "invocation aborted")
    }

    /// Classify a non-zero process exit.
    ///
    /// `signal` is the terminating signal when there is no exit code.
    /// A signal we did not send (OOM killer, an external `kill`) is an
    /// ordinary failure; only our own cancellation path yields
    /// [`FailureKind::Aborted`]. `detail` is appended to the message
    /// (typically the stderr tail).
    #[must_use]
    pub fn process_exit(code: Option<i32>, signal: Option<i32>, detail: &str) -> Self {
        let kind = match code {
            Some(UNAVAILABLE_EXIT_CODE) => FailureKind::Unavailable,
            _ => FailureKind::Other,
        };
        let head = match (code, signal) {
            (Some(c), _) => format!("agent process exited with code {c}"),
            (None, Some(sig)) => format!("agent process killed by signal {sig}"),
            (None, None) => "agent process exited without a status".to_owned(),
        };
        let detail = detail.trim();
        let message = if detail.is_empty() {
            head
        } else {
            format!("{head}: {detail}")
        };
        Self::new(kind, message)
    }

    /// Classify an error known only by its message text.
    #[must_use]
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(classify_message(&message), message)
    }

    /// Whether the retry policy should re-run this attempt on the fallback.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind == FailureKind::Unavailable
    }
}

impl Display for InvocationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for InvocationError {}

/// Classify an error message by its text.
///
/// Abort signatures win over exit codes: a process killed because we
/// cancelled it is never retried.
#[must_use]
pub fn classify_message(message: &str) -> FailureKind {
    if ABORT_PATTERN
        .as_ref()
        .is_some_and(|re| re.is_match(message))
    {
        return FailureKind::Aborted;
    }

    let code = EXIT_CODE_PATTERN
        .as_ref()
        .and_then(|re| re.captures(message))
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<i32>().ok());

    match code {
        Some(UNAVAILABLE_EXIT_CODE) => FailureKind::Unavailable,
        _ => FailureKind::Other,
    }
}
