//! Feed manager for broadcasting published views.

use crate::engine::MergedView;
use crate::types::ScopeId;
use crossbeam_channel::{bounded, Sender};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

use super::types::{DropReason, FeedConfig, FeedHandle, FeedId, ViewEvent};

/// Internal feed state.
struct Feed {
    config: FeedConfig,
    sender: Sender<ViewEvent>,
}

impl Feed {
    /// Try to send an event. Returns false if buffer is full (feed will be dropped).
    fn try_send(&self, event: ViewEvent) -> bool {
        self.sender.try_send(event).is_ok()
    }

    fn wants_view(&self, scope: &ScopeId) -> bool {
        self.config.filter.include_views && self.config.filter.matches_scope(scope)
    }

    fn wants_error(&self, scope: &ScopeId) -> bool {
        self.config.filter.include_errors && self.config.filter.matches_scope(scope)
    }
}

/// Manages feeds and broadcasts view events.
pub struct ViewFeed {
    /// Active feeds by ID.
    feeds: RwLock<HashMap<FeedId, Feed>>,
    /// Counter for generating feed IDs.
    next_id: AtomicU64,
}

impl ViewFeed {
    pub fn new() -> Self {
        Self {
            feeds: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Create a new feed.
    pub fn subscribe(&self, config: FeedConfig) -> FeedHandle {
        let id = FeedId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(config.buffer_size);

        self.feeds.write().insert(id, Feed { config, sender });

        FeedHandle { id, receiver }
    }

    /// Remove a feed.
    pub fn unsubscribe(&self, id: FeedId) {
        if let Some(feed) = self.feeds.write().remove(&id) {
            // Best effort
            let _ = feed.sender.try_send(ViewEvent::Dropped {
                reason: DropReason::Unsubscribed,
            });
        }
    }

    pub fn feed_count(&self) -> usize {
        self.feeds.read().len()
    }

    // --- Broadcasting ---

    pub fn broadcast_view(&self, view: &MergedView) {
        let scope = view.scope.clone();
        let event = ViewEvent::View { view: view.clone() };
        self.broadcast(|feed| feed.wants_view(&scope), event);
    }

    pub fn broadcast_error(&self, scope: &ScopeId, message: String) {
        let event = ViewEvent::Error {
            scope: scope.clone(),
            message,
        };
        self.broadcast(|feed| feed.wants_error(scope), event);
    }

    /// Deactivation goes to every feed watching the scope.
    pub fn broadcast_deactivated(&self, scope: &ScopeId) {
        let event = ViewEvent::Deactivated {
            scope: scope.clone(),
        };
        self.broadcast(|feed| feed.config.filter.matches_scope(scope), event);
    }

    /// Internal broadcast helper. Drops feeds that fail to receive.
    fn broadcast<F>(&self, filter: F, event: ViewEvent)
    where
        F: Fn(&Feed) -> bool,
    {
        let mut to_remove = Vec::new();

        {
            let feeds = self.feeds.read();
            for (id, feed) in feeds.iter() {
                if filter(feed) && !feed.try_send(event.clone()) {
                    to_remove.push(*id);
                }
            }
        }

        if !to_remove.is_empty() {
            let mut feeds = self.feeds.write();
            for id in to_remove {
                if let Some(feed) = feeds.remove(&id) {
                    warn!(feed = id.0, "Dropping slow view feed");
                    let _ = feed.sender.try_send(ViewEvent::Dropped {
                        reason: DropReason::BufferOverflow,
                    });
                }
            }
        }
    }
}

impl Default for ViewFeed {
    fn default() -> Self {
        Self::new()
    }
}
