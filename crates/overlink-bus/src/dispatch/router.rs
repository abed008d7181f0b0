//! Per-type handler registry and dispatcher.
//!
//! Registration is **replace, not accumulate**: a second `register_handler`
//! for the same type evicts the previous handler. Overlay teardown/recreate
//! depends on this, so do not turn it into a fan-out list.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use dashmap::DashMap;

use overlink_core::error::Result;
use overlink_core::protocol::MessageType;

/// Handler for one message type. Receives raw payload bytes and owns its decode.
///
/// `Ok(true)` means handled, `Ok(false)` means seen but not handled. Errors and
/// panics are caught by the router and never reach the transport read loop.
pub trait MessageHandler: Send + Sync {
    fn handle_message(&self, payload: &[u8]) -> Result<bool>;
}

impl<F> MessageHandler for F
where
    F: Fn(&[u8]) -> Result<bool> + Send + Sync,
{
    fn handle_message(&self, payload: &[u8]) -> Result<bool> {
        self(payload)
    }
}

/// Detailed dispatch result (used for metrics; `route_message` folds it to bool).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Handled,
    NotHandled,
    NoHandler,
    Failed,
}

impl RouteOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            RouteOutcome::Handled => "handled",
            RouteOutcome::NotHandled => "not_handled",
            RouteOutcome::NoHandler => "no_handler",
            RouteOutcome::Failed => "failed",
        }
    }
}

/// Type -> handler table shared by one or more transports.
#[derive(Default)]
pub struct MessageRouter {
    handlers: DashMap<MessageType, Arc<dyn MessageHandler>>,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self {
            handlers: DashMap::new(),
        }
    }

    /// Store `handler` for `ty`, returning the handler it replaced (last writer wins).
    pub fn register_handler(
        &self,
        ty: MessageType,
        handler: Arc<dyn MessageHandler>,
    ) -> Option<Arc<dyn MessageHandler>> {
        let prev = self.handlers.insert(ty, handler);
        if prev.is_some() {
            tracing::debug!(%ty, "handler replaced");
        } else {
            tracing::debug!(%ty, "handler registered");
        }
        prev
    }

    /// Closure convenience for `register_handler`.
    pub fn register_fn<F>(&self, ty: MessageType, f: F) -> Option<Arc<dyn MessageHandler>>
    where
        F: Fn(&[u8]) -> Result<bool> + Send + Sync + 'static,
    {
        self.register_handler(ty, Arc::new(f))
    }

    /// Remove the handler for `ty`. Clearing an empty slot is a no-op.
    pub fn clear_handlers(&self, ty: MessageType) -> bool {
        let removed = self.handlers.remove(&ty).is_some();
        if removed {
            tracing::debug!(%ty, "handler cleared");
        }
        removed
    }

    pub fn clear_all(&self) {
        self.handlers.clear();
        tracing::debug!("all handlers cleared");
    }

    pub fn has_handler(&self, ty: MessageType) -> bool {
        self.handlers.contains_key(&ty)
    }

    pub fn registered_types(&self) -> Vec<MessageType> {
        let mut v: Vec<MessageType> = self.handlers.iter().map(|e| *e.key()).collect();
        v.sort();
        v
    }

    /// Dispatch and report what happened.
    pub fn dispatch(&self, ty: MessageType, payload: &[u8]) -> RouteOutcome {
        // Clone the handler out so the shard lock is released before it runs;
        // a handler may re-register or clear itself.
        let Some(handler) = self.handlers.get(&ty).map(|e| Arc::clone(e.value())) else {
            tracing::debug!(%ty, len = payload.len(), "no handler, message dropped");
            return RouteOutcome::NoHandler;
        };

        match catch_unwind(AssertUnwindSafe(|| handler.handle_message(payload))) {
            Ok(Ok(true)) => {
                tracing::trace!(%ty, len = payload.len(), "message handled");
                RouteOutcome::Handled
            }
            Ok(Ok(false)) => {
                tracing::debug!(%ty, "handler declined message");
                RouteOutcome::NotHandled
            }
            Ok(Err(e)) => {
                tracing::warn!(%ty, error = %e, "handler failed");
                RouteOutcome::Failed
            }
            Err(_) => {
                tracing::error!(%ty, "handler panicked");
                RouteOutcome::Failed
            }
        }
    }

    /// Route one message. `false` when nothing handled it.
    pub fn route_message(&self, ty: MessageType, payload: &[u8]) -> bool {
        self.dispatch(ty, payload) == RouteOutcome::Handled
    }
}
