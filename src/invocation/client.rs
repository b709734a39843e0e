//! Session client: one external streaming call with a single fallback retry.
//!
//! [`SessionClient::invoke`] runs the first attempt on the default model.
//! If that attempt fails with an [`Unavailable`](FailureKind::Unavailable)
//! error, the whole attempt is re-run once on the fallback model. Every
//! other failure surfaces immediately. Cancellation, whether observed on
//! the token or reported by the backend as an abort, always yields
//! [`InvocationOutcome::Cancelled`] and never triggers the retry.

use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::backend::{AttemptRequest, InvocationBackend};
use super::error::{FailureKind, InvocationError};
use super::tracker::StreamTracker;
use super::{InvocationOutcome, InvocationRequest, InvocationResult, ModelUsed};
use crate::config::InvocationConfig;
use crate::{AppError, Result};

/// How one attempt ended when it did not fail.
enum AttemptEnd {
    Completed(StreamTracker),
    Cancelled,
}

/// Drives invocations against an [`InvocationBackend`].
#[derive(Clone)]
pub struct SessionClient {
    backend: Arc<dyn InvocationBackend>,
    default_model: Option<String>,
    fallback_model: String,
}

impl std::fmt::Debug for SessionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionClient")
            .field("default_model", &self.default_model)
            .field("fallback_model", &self.fallback_model)
            .finish_non_exhaustive()
    }
}

impl SessionClient {
    /// Create a client using the model settings from `config`.
    #[must_use]
    pub fn new(backend: Arc<dyn InvocationBackend>, config: &InvocationConfig) -> Self {
        Self {
            backend,
            default_model: config.default_model.clone(),
            fallback_model: config.fallback_model.clone(),
        }
    }

    /// Model used for the automatic retry.
    #[must_use]
    pub fn fallback_model(&self) -> &str {
        &self.fallback_model
    }

    /// Run one invocation, forwarding every event to `on_event`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Invocation` for a non-retryable failure, or when
    /// both the default and the fallback attempt failed (both causes are
    /// included in the message).
    pub async fn invoke<F>(
        &self,
        request: InvocationRequest,
        cancel: &CancellationToken,
        mut on_event: F,
    ) -> Result<InvocationOutcome>
    where
        F: FnMut(&Value) + Send,
    {
        let span = info_span!(
            "invoke",
            work_dir = %request.work_dir.display(),
            continuation = request.continuation.kind()
        );

        async move {
            let default_model = self.default_model.clone();
            let first = self
                .attempt(&request, default_model.clone(), cancel, &mut on_event)
                .await;

            let first_err = match first {
                Ok(AttemptEnd::Completed(tracker)) => {
                    return Ok(completed(tracker, ModelUsed::Default, default_model));
                }
                Ok(AttemptEnd::Cancelled) => return Ok(cancelled()),
                Err(err) if is_cancellation(&err, cancel) => return Ok(cancelled()),
                Err(err) if !err.is_retryable() => {
                    warn!(error = %err, "invocation failed");
                    return Err(AppError::Invocation(err.message));
                }
                Err(err) => err,
            };

            let fallback = self.fallback_model.clone();
            warn!(
                error = %first_err,
                fallback = %fallback,
                "default model unavailable, retrying once on fallback"
            );

            match self
                .attempt(&request, Some(fallback.clone()), cancel, &mut on_event)
                .await
            {
                Ok(AttemptEnd::Completed(tracker)) => {
                    Ok(completed(tracker, ModelUsed::Fallback, Some(fallback)))
                }
                Ok(AttemptEnd::Cancelled) => Ok(cancelled()),
                Err(err) if is_cancellation(&err, cancel) => Ok(cancelled()),
                Err(err) => {
                    warn!(error = %err, "fallback attempt failed");
                    Err(AppError::Invocation(format!(
                        "default model failed: {first_err}; fallback model {fallback} also \
                         failed: {err} (both default and fallback attempts were exhausted)"
                    )))
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn attempt<F>(
        &self,
        request: &InvocationRequest,
        model: Option<String>,
        cancel: &CancellationToken,
        on_event: &mut F,
    ) -> std::result::Result<AttemptEnd, InvocationError>
    where
        F: FnMut(&Value) + Send,
    {
        if cancel.is_cancelled() {
            return Ok(AttemptEnd::Cancelled);
        }

        let attempt = AttemptRequest {
            work_dir: request.work_dir.clone(),
            prompt: request.prompt.clone(),
            continuation: request.continuation.clone(),
            model,
        };

        let mut events = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(AttemptEnd::Cancelled),
            started = self.backend.start(attempt, cancel.clone()) => started?,
        };

        let mut tracker = StreamTracker::default();
        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    debug!(events = tracker.events_seen(), "invocation cancelled mid-stream");
                    return Ok(AttemptEnd::Cancelled);
                }

                item = events.recv() => match item {
                    None => return Ok(AttemptEnd::Completed(tracker)),
                    Some(Ok(event)) => {
                        tracker.observe(&event);
                        on_event(&event);
                    }
                    Some(Err(err)) => return Err(err),
                }
            }
        }
    }
}

fn is_cancellation(err: &InvocationError, cancel: &CancellationToken) -> bool {
    err.kind == FailureKind::Aborted || cancel.is_cancelled()
}

fn cancelled() -> InvocationOutcome {
    info!("invocation cancelled");
    InvocationOutcome::Cancelled
}

fn completed(tracker: StreamTracker, model_used: ModelUsed, model: Option<String>) -> InvocationOutcome {
    let result = InvocationResult {
        final_text: tracker.final_text(),
        cost_usd: tracker.cost_usd(),
        duration_ms: tracker.duration_ms(),
        continuation_id: tracker.into_continuation_id(),
        model_used,
        model,
    };
    info!(
        model_used = ?result.model_used,
        continuation_id = result.continuation_id.as_deref(),
        cost_usd = result.cost_usd,
        duration_ms = result.duration_ms,
        "invocation completed"
    );
    InvocationOutcome::Completed(result)
}
