//! Extraction of session state from the `stream-json` event stream.
//!
//! Events are forwarded to the caller verbatim; the tracker only pulls
//! out the few fields the client needs to report a result:
//!
//! | Event                        | Extracted                                   |
//! |------------------------------|---------------------------------------------|
//! | any event with `session_id`  | continuation id (last one wins)             |
//! | `assistant` with text blocks | candidate final text (last one wins)        |
//! | `result`                     | `total_cost_usd`, `duration_ms`, `result`   |

use serde_json::Value;

/// Final text reported when the stream produced no assistant text.
pub const NO_RESPONSE: &str = "(no response)";

/// Running state of one invocation attempt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamTracker {
    continuation_id: Option<String>,
    last_text: Option<String>,
    result_text: Option<String>,
    cost_usd: Option<f64>,
    duration_ms: Option<u64>,
    events_seen: u64,
}

impl StreamTracker {
    /// Fold one event into the tracked state.
    pub fn observe(&mut self, event: &Value) {
        self.events_seen += 1;

        if let Some(id) = event.get("session_id").and_then(Value::as_str) {
            if !id.is_empty() {
                self.continuation_id = Some(id.to_owned());
            }
        }

        match event.get("type").and_then(Value::as_str) {
            Some("assistant") => {
                if let Some(text) = assistant_text(event) {
                    self.last_text = Some(text);
                }
            }
            Some("result") => {
                self.cost_usd = event
                    .get("total_cost_usd")
                    .or_else(|| event.get("cost_usd"))
                    .and_then(Value::as_f64)
                    .or(self.cost_usd);
                self.duration_ms = event
                    .get("duration_ms")
                    .and_then(Value::as_u64)
                    .or(self.duration_ms);
                if let Some(text) = event.get("result").and_then(Value::as_str) {
                    if !text.trim().is_empty() {
                        self.result_text = Some(text.to_owned());
                    }
                }
            }
            _ => {}
        }
    }

    /// Last continuation id seen in the stream.
    #[must_use]
    pub fn continuation_id(&self) -> Option<&str> {
        self.continuation_id.as_deref()
    }

    /// Cost reported by the terminal event.
    #[must_use]
    pub fn cost_usd(&self) -> Option<f64> {
        self.cost_usd
    }

    /// Elapsed time reported by the terminal event.
    #[must_use]
    pub fn duration_ms(&self) -> Option<u64> {
        self.duration_ms
    }

    /// Number of events observed.
    #[must_use]
    pub fn events_seen(&self) -> u64 {
        self.events_seen
    }

    /// Final text: the last assistant text, else the terminal `result`
    /// text, else [`NO_RESPONSE`].
    #[must_use]
    pub fn final_text(&self) -> String {
        self.last_text
            .as_deref()
            .or(self.result_text.as_deref())
            .unwrap_or(NO_RESPONSE)
            .to_owned()
    }

    /// Consume the tracker, returning the continuation id.
    #[must_use]
    pub fn into_continuation_id(self) -> Option<String> {
        self.continuation_id
    }
}

/// Join the `text` content blocks of an assistant message.
fn assistant_text(event: &Value) -> Option<String> {
    let blocks = event.get("message")?.get("content")?.as_array()?;
    let text = blocks
        .iter()
        .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|block| block.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join("\n");

    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}
