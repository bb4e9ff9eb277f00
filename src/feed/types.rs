//! Feed types for published views.

use crate::engine::MergedView;
use crate::types::ScopeId;
use serde::{Deserialize, Serialize};

/// Configuration for a view feed.
#[derive(Clone, Debug)]
pub struct FeedConfig {
    /// Max buffered events before dropping subscriber.
    /// Default: 1000
    pub buffer_size: usize,

    /// Filter criteria.
    pub filter: FeedFilter,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1000,
            filter: FeedFilter::all(),
        }
    }
}

/// Filter criteria for view feeds.
#[derive(Clone, Debug, Default)]
pub struct FeedFilter {
    /// Only these scopes (None = every scope).
    pub scopes: Option<Vec<ScopeId>>,

    /// Include view snapshots.
    pub include_views: bool,

    /// Include error events.
    pub include_errors: bool,
}

impl FeedFilter {
    /// Views and errors for every scope.
    pub fn all() -> Self {
        Self {
            scopes: None,
            include_views: true,
            include_errors: true,
        }
    }

    /// Views and errors for one scope.
    pub fn scope(scope: ScopeId) -> Self {
        Self {
            scopes: Some(vec![scope]),
            ..Self::all()
        }
    }

    pub(crate) fn matches_scope(&self, scope: &ScopeId) -> bool {
        match &self.scopes {
            Some(scopes) => scopes.contains(scope),
            None => true,
        }
    }
}

/// Events emitted by view feeds.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ViewEvent {
    /// A new merged view was published.
    View { view: MergedView },

    /// An operation on the scope failed.
    Error { scope: ScopeId, message: String },

    /// The scope was deactivated; no further views follow.
    Deactivated { scope: ScopeId },

    /// This feed was dropped.
    Dropped { reason: DropReason },
}

/// Why a feed was dropped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// Explicitly unsubscribed.
    Unsubscribed,
}

/// Unique identifier for a feed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FeedId(pub u64);

/// Handle to receive a feed.
pub struct FeedHandle {
    pub id: FeedId,
    /// Channel to receive events.
    pub receiver: crossbeam_channel::Receiver<ViewEvent>,
}

impl FeedHandle {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<ViewEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<ViewEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<ViewEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Drain everything currently buffered.
    pub fn drain(&self) -> Vec<ViewEvent> {
        self.receiver.try_iter().collect()
    }
}
