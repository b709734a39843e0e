//! NDJSON framing for the agent CLI's `stream-json` output.
//!
//! Wraps [`LinesCodec`] with a maximum line length so a runaway or
//! unterminated event cannot exhaust memory. An oversized line is logged
//! and dropped inside the decoder: the inner codec discards bytes up to
//! the next newline and decoding resumes there. The error never reaches
//! `FramedRead`, which would otherwise end the stream.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};
use tracing::warn;

use crate::{AppError, Result};

/// Maximum accepted event line: 16 MiB.
///
/// Assistant events embed whole tool results, so this is far larger than
/// a typical protocol line limit.
pub const MAX_EVENT_LINE_BYTES: usize = 16 * 1024 * 1024;

/// Line decoder for `stream-json` output.
#[derive(Debug)]
pub struct EventLineCodec {
    inner: LinesCodec,
    dropped: u64,
}

impl EventLineCodec {
    /// Create a codec with the default [`MAX_EVENT_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(MAX_EVENT_LINE_BYTES)
    }

    /// Create a codec with a custom line limit.
    #[must_use]
    pub fn with_max_length(max: usize) -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(max),
            dropped: 0,
        }
    }

    /// Number of oversized lines dropped so far.
    #[must_use]
    pub fn dropped_lines(&self) -> u64 {
        self.dropped
    }

    fn note_dropped(&mut self) {
        self.dropped += 1;
        warn!(
            max_bytes = self.inner.max_length(),
            dropped = self.dropped,
            "agent event line too long, skipping"
        );
    }
}

impl Default for EventLineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for EventLineCodec {
    type Item = String;
    type Error = AppError;

    // After `MaxLineLengthExceeded` the inner codec is in discard mode, so
    // the retry either skips to the next newline or consumes the buffer.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            match self.inner.decode(src) {
                Err(LinesCodecError::MaxLineLengthExceeded) => self.note_dropped(),
                other => return other.map_err(map_io_error),
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            match self.inner.decode_eof(src) {
                Err(LinesCodecError::MaxLineLengthExceeded) => self.note_dropped(),
                other => return other.map_err(map_io_error),
            }
        }
    }
}

fn map_io_error(err: LinesCodecError) -> AppError {
    match err {
        LinesCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
        LinesCodecError::MaxLineLengthExceeded => {
            AppError::Invocation("event line too long".into())
        }
    }
}
