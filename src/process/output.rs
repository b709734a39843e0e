//! Output multiplexer for supervised processes.
//!
//! Each process gets one [`OutputMux`]. Two reader tasks (stdout and
//! stderr) push decoded text into it; the mux appends every chunk to the
//! accumulated buffer and fans it out to all registered subscribers. The
//! exit waiter closes the mux with exactly one terminal event.
//!
//! Subscribers are unbounded `mpsc` receivers so no chunk is ever dropped
//! for a slow consumer. Ordering is preserved per stream; stdout and
//! stderr chunks interleave in arrival order.

use std::char::REPLACEMENT_CHARACTER;
use std::sync::Arc;

use futures_util::StreamExt;
use serde::Serialize;
use tokio::io::AsyncRead;
use tokio::sync::{mpsc, Mutex};
use tokio_util::codec::{BytesCodec, FramedRead};
use tracing::{debug, warn};

/// Supervisor-issued identifier of one process. Never reused.
pub type ProcessHandle = u64;

/// Receiving end of a process subscription.
pub type EventReceiver = mpsc::UnboundedReceiver<ProcessEvent>;

/// Which standard stream a chunk of output came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

impl OutputStream {
    /// Lowercase stream name used in logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

/// Event delivered to process subscribers.
///
/// `Exited` and `Failed` are terminal and mutually exclusive: each
/// subscriber sees at most one of them, and nothing after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// A decoded chunk of output.
    Output {
        /// Process the chunk belongs to.
        handle: ProcessHandle,
        /// Stream the chunk was read from.
        stream: OutputStream,
        /// Decoded text.
        text: String,
    },
    /// The process exited and its exit status was collected.
    Exited {
        /// Process that exited.
        handle: ProcessHandle,
        /// OS exit code; `None` when terminated by a signal.
        exit_code: Option<i32>,
        /// Full accumulated output of both streams.
        output: String,
    },
    /// The exit status could not be determined.
    Failed {
        /// Process that failed.
        handle: ProcessHandle,
        /// Underlying cause.
        reason: String,
    },
}

impl ProcessEvent {
    /// Whether this is a completion or error event.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Output { .. })
    }
}

#[derive(Debug, Default)]
struct MuxState {
    subscribers: Vec<mpsc::UnboundedSender<ProcessEvent>>,
    buffer: String,
    terminal: Option<ProcessEvent>,
}

/// Fan-out point for one process's output and terminal event.
#[derive(Debug, Clone)]
pub struct OutputMux {
    handle: ProcessHandle,
    state: Arc<Mutex<MuxState>>,
}

impl OutputMux {
    /// Create an empty mux for `handle`.
    #[must_use]
    pub fn new(handle: ProcessHandle) -> Self {
        Self {
            handle,
            state: Arc::new(Mutex::new(MuxState::default())),
        }
    }

    /// Handle of the process this mux belongs to.
    #[must_use]
    pub fn handle(&self) -> ProcessHandle {
        self.handle
    }

    /// Register a new subscriber.
    ///
    /// The subscriber receives every chunk published from now on, then the
    /// terminal event. If the process already finished, only the terminal
    /// event is delivered and the channel closes right after.
    pub async fn subscribe(&self) -> EventReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock().await;
        if let Some(ref terminal) = state.terminal {
            let _ = tx.send(terminal.clone());
        } else {
            state.subscribers.push(tx);
        }
        rx
    }

    /// Snapshot of everything published so far.
    pub async fn snapshot(&self) -> String {
        self.state.lock().await.buffer.clone()
    }

    /// Append `text` to the buffer and deliver it to every subscriber.
    pub(crate) async fn publish(&self, stream: OutputStream, text: String) {
        if text.is_empty() {
            return;
        }

        let mut state = self.state.lock().await;
        if state.terminal.is_some() {
            debug!(
                handle = self.handle,
                stream = stream.as_str(),
                "output after terminal event discarded"
            );
            return;
        }

        state.buffer.push_str(&text);
        let event = ProcessEvent::Output {
            handle: self.handle,
            stream,
            text,
        };
        state
            .subscribers
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Publish the completion event. Returns `false` if a terminal event
    /// was already published.
    pub(crate) async fn finish_exited(&self, exit_code: Option<i32>) -> bool {
        let handle = self.handle;
        self.finish(|buffer| ProcessEvent::Exited {
            handle,
            exit_code,
            output: buffer.to_owned(),
        })
        .await
    }

    /// Publish the error event. Returns `false` if a terminal event was
    /// already published.
    pub(crate) async fn finish_failed(&self, reason: String) -> bool {
        let handle = self.handle;
        self.finish(|_| ProcessEvent::Failed { handle, reason }).await
    }

    async fn finish(&self, build: impl FnOnce(&str) -> ProcessEvent) -> bool {
        let mut state = self.state.lock().await;
        if state.terminal.is_some() {
            return false;
        }

        let event = build(&state.buffer);
        for tx in state.subscribers.drain(..) {
            let _ = tx.send(event.clone());
        }
        state.terminal = Some(event);
        true
    }
}

/// Read `reader` until EOF, publishing decoded chunks into `mux`.
///
/// A read error stops this stream only; the sibling stream and the exit
/// waiter are unaffected.
pub(crate) async fn pump_stream<R>(mux: OutputMux, stream: OutputStream, reader: R)
where
    R: AsyncRead + Unpin + Send,
{
    let handle = mux.handle();
    let mut framed = FramedRead::new(reader, BytesCodec::new());
    let mut decoder = Utf8Decoder::default();

    while let Some(item) = framed.next().await {
        match item {
            Ok(chunk) => {
                let text = decoder.decode(&chunk);
                mux.publish(stream, text).await;
            }
            Err(err) => {
                warn!(
                    handle,
                    stream = stream.as_str(),
                    %err,
                    "output read failed, stopping reader"
                );
                break;
            }
        }
    }

    mux.publish(stream, decoder.finish()).await;
    debug!(handle, stream = stream.as_str(), "output stream closed");
}

/// Incremental UTF-8 decoder.
///
/// Holds back an incomplete trailing sequence until the next chunk
/// completes it. Invalid bytes become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    /// Decode `chunk`, returning all text that is complete so far.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);

        let mut out = String::with_capacity(self.pending.len());
        let mut start = 0;
        loop {
            match std::str::from_utf8(&self.pending[start..]) {
                Ok(valid) => {
                    out.push_str(valid);
                    start = self.pending.len();
                    break;
                }
                Err(err) => {
                    let valid_end = start + err.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[start..valid_end]));
                    if let Some(len) = err.error_len() {
                        out.push(REPLACEMENT_CHARACTER);
                        start = valid_end + len;
                    } else {
                        start = valid_end;
                        break;
                    }
                }
            }
        }

        self.pending.drain(..start);
        out
    }

    /// Flush whatever is left at end of stream.
    pub fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}
