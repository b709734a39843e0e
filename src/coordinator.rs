//! Session coordinator: at most one in-flight invocation per instance.
//!
//! The coordinator owns the only cancellation handle of the active
//! invocation. Starting a new invocation cancels the previous one before
//! the new ticket is handed out, so the superseded stream loop observes
//! cancellation no later than the new one requests its first event.
//! A `run` future dropped before completion cancels its invocation and
//! releases the slot.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::invocation::{InvocationOutcome, InvocationRequest, SessionClient};
use crate::Result;

/// Cancellation handle for one invocation.
#[derive(Debug, Clone)]
pub struct InvocationTicket {
    id: u64,
    token: CancellationToken,
}

impl InvocationTicket {
    /// Monotonic ticket id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Token observed by the invocation's stream loop.
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Whether this invocation was cancelled or superseded.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[derive(Debug, Default)]
struct SlotState {
    last_id: u64,
    active: Option<InvocationTicket>,
}

/// Holder of the single active invocation handle.
///
/// Created by the owner of the coordinator and passed into
/// [`SessionCoordinator::new`].
#[derive(Debug, Clone, Default)]
pub struct ActiveInvocation {
    inner: Arc<Mutex<SlotState>>,
}

impl ActiveInvocation {
    /// Create an empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn clear_if_active(state: &mut SlotState, id: u64) {
    if state.active.as_ref().is_some_and(|t| t.id == id) {
        state.active = None;
        debug!(ticket = id, "invocation finished");
    }
}

/// Releases the slot when a `run` future ends, including when it is
/// dropped mid-invocation (caller timeout, aborted task).
struct SlotGuard {
    slot: ActiveInvocation,
    ticket: InvocationTicket,
    completed: bool,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if !self.completed {
            self.ticket.token.cancel();
            info!(ticket = self.ticket.id, "invocation dropped before completion");
        }

        let id = self.ticket.id;
        if let Ok(mut state) = self.slot.inner.try_lock() {
            clear_if_active(&mut state, id);
            return;
        }
        let slot = self.slot.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    clear_if_active(&mut *slot.inner.lock().await, id);
                });
            }
            Err(_) => warn!(ticket = id, "no runtime to release invocation slot"),
        }
    }
}

/// Enforces "only one in-flight invocation".
#[derive(Debug, Clone)]
pub struct SessionCoordinator {
    slot: ActiveInvocation,
}

impl SessionCoordinator {
    /// Create a coordinator over `slot`.
    #[must_use]
    pub fn new(slot: ActiveInvocation) -> Self {
        Self { slot }
    }

    /// Cancel the active invocation, if any, and install a new one.
    pub async fn start_new(&self) -> InvocationTicket {
        let mut state = self.slot.inner.lock().await;
        if let Some(previous) = state.active.take() {
            previous.token.cancel();
            info!(ticket = previous.id, "active invocation superseded");
        }

        state.last_id += 1;
        let ticket = InvocationTicket {
            id: state.last_id,
            token: CancellationToken::new(),
        };
        state.active = Some(ticket.clone());
        debug!(ticket = ticket.id, "invocation started");
        ticket
    }

    /// Cancel and clear the active invocation.
    ///
    /// Returns whether one was active. Idempotent.
    pub async fn cancel_current(&self) -> bool {
        let previous = self.slot.inner.lock().await.active.take();
        match previous {
            Some(ticket) => {
                ticket.token.cancel();
                info!(ticket = ticket.id, "active invocation cancelled");
                true
            }
            None => false,
        }
    }

    /// Clear the slot if it still holds `ticket`.
    ///
    /// A superseded invocation finishing late never clears its successor.
    pub async fn finish(&self, ticket: &InvocationTicket) {
        clear_if_active(&mut *self.slot.inner.lock().await, ticket.id);
    }

    /// Whether an invocation is in flight.
    pub async fn is_active(&self) -> bool {
        self.slot.inner.lock().await.active.is_some()
    }

    /// Start a new invocation through `client`, superseding any active one.
    ///
    /// # Errors
    ///
    /// Propagates the client's error unchanged; the coordinator never
    /// retries.
    pub async fn run<F>(
        &self,
        client: &SessionClient,
        request: InvocationRequest,
        on_event: F,
    ) -> Result<InvocationOutcome>
    where
        F: FnMut(&Value) + Send,
    {
        let mut guard = SlotGuard {
            slot: self.slot.clone(),
            ticket: self.start_new().await,
            completed: false,
        };
        let outcome = client
            .invoke(request, guard.ticket.token(), on_event)
            .await;
        guard.completed = true;
        drop(guard);
        outcome
    }
}
