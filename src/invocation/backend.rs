//! Seam between the session client and the external streaming call.
//!
//! One [`InvocationBackend::start`] call is one attempt. The backend owns
//! whatever runs the call (a child process, a connection) and pushes
//! parsed events into the returned channel. A failure that ends the
//! attempt is delivered as the final `Err` item; a clean end of stream
//! simply closes the channel.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::error::InvocationError;
use super::Continuation;

/// One item of an attempt's event stream.
pub type EventItem = std::result::Result<Value, InvocationError>;

/// Receiving end of an attempt's event stream.
pub type EventStream = mpsc::Receiver<EventItem>;

/// Boxed future returned by [`InvocationBackend::start`].
pub type StartFuture<'a> =
    Pin<Box<dyn Future<Output = std::result::Result<EventStream, InvocationError>> + Send + 'a>>;

/// Parameters of a single attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRequest {
    /// Directory the call runs in.
    pub work_dir: PathBuf,
    /// Prompt text.
    pub prompt: String,
    /// How prior conversation state is resumed.
    pub continuation: Continuation,
    /// Model override; `None` uses the backend's default.
    pub model: Option<String>,
}

/// External streaming compute primitive.
pub trait InvocationBackend: Send + Sync {
    /// Start one attempt.
    ///
    /// The backend must stop producing events and release its resources
    /// once `cancel` fires, ending the stream with an
    /// [`Aborted`](super::error::FailureKind::Aborted) error or by closing it.
    ///
    /// # Errors
    ///
    /// Returns [`InvocationError`] if the attempt cannot be started at all.
    fn start(&self, request: AttemptRequest, cancel: CancellationToken) -> StartFuture<'_>;
}
