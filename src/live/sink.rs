//! Callback handle given to the transport's live subscription.

use crate::engine::Inner;
use crate::error::{Result, SyncError, TransportError};
use crate::live::LiveOutcome;
use crate::types::{Message, ScopeId};
use std::sync::Weak;

/// A running live subscription owned by the transport.
pub trait LiveSubscription: Send {
    /// Stop delivering events. Must be safe to call more than once.
    fn cancel(&mut self);
}

/// Where the transport delivers live traffic for one scope activation.
///
/// A sink outlives neither its activation nor the engine: once the scope is
/// deactivated, every call is a no-op.
#[derive(Clone)]
pub struct LiveSink {
    scope: ScopeId,
    epoch: u64,
    engine: Weak<Inner>,
}

impl LiveSink {
    pub(crate) fn new(scope: ScopeId, epoch: u64, engine: Weak<Inner>) -> Self {
        Self {
            scope,
            epoch,
            engine,
        }
    }

    pub fn scope(&self) -> &ScopeId {
        &self.scope
    }

    /// A message was pushed. Re-deliveries are fine.
    pub fn on_event(&self, message: Message) -> LiveOutcome {
        match self.engine.upgrade() {
            Some(engine) => engine.live_event(&self.scope, self.epoch, message),
            None => LiveOutcome::Stale,
        }
    }

    /// The stream failed. The transport is expected to reconnect.
    pub fn on_error(&self, error: TransportError) {
        if let Some(engine) = self.engine.upgrade() {
            engine.live_error(&self.scope, self.epoch, error);
        }
    }

    /// A dropped stream resumed; refetch the newest page to close the gap.
    pub fn on_reconnect(&self) -> Result<()> {
        match self.engine.upgrade() {
            Some(engine) => engine.resync(&self.scope, self.epoch),
            None => Err(SyncError::Cancelled {
                scope: self.scope.clone(),
            }),
        }
    }

    /// The stream ended for good.
    pub fn on_close(&self) {
        if let Some(engine) = self.engine.upgrade() {
            engine.live_closed(&self.scope, self.epoch);
        }
    }
}

impl std::fmt::Debug for LiveSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveSink")
            .field("scope", &self.scope)
            .field("epoch", &self.epoch)
            .finish()
    }
}
