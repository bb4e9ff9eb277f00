//! Per-scope reconciliation state.

use crate::engine::merge::merge;
use crate::engine::pagination::Pagination;
use crate::known::KnownIds;
use crate::live::{LiveBuffer, LiveOutcome, LiveSubscription};
use crate::pages::PageStore;
use crate::search::SearchPredicate;
use crate::types::{Message, MessageId, Page, PageRequest, ScopeId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Lifecycle phase of a scope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopePhase {
    Uninitialized,
    /// Waiting for the first page under the current search.
    Loading,
    /// History loaded; live events apply immediately.
    Ready,
    /// Search changed; history being discarded.
    Resetting,
}

/// Snapshot published after every applied mutation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MergedView {
    pub scope: ScopeId,
    /// Increments with every publication for this activation.
    pub revision: u64,
    pub phase: ScopePhase,
    pub search: String,
    pub offset: u64,
    pub limit: u32,
    /// 1-based page number of `offset`.
    pub page: u64,
    pub has_more: bool,
    pub live_attached: bool,
    /// Live events waiting for the scope to become ready.
    pub deferred: usize,
    /// Last failure, cleared by the next successful load.
    pub error: Option<String>,
    /// Ordered, de-duplicated, search-filtered messages.
    pub messages: Vec<Message>,
}

/// Pages, live tail and the ids they hold.
///
/// Every mutation goes through here so `known` stays the exact union of the
/// other two.
#[derive(Debug, Default)]
pub struct ReconciliationState {
    pub pages: PageStore,
    pub live: LiveBuffer,
    pub known: KnownIds,
}

impl ReconciliationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commit a fetched page; returns how many messages were new.
    ///
    /// A page entry that is the server copy of a pending optimistic send
    /// replaces it, the same as a live echo would.
    pub fn commit_page(&mut self, scope: &ScopeId, page: Page) -> usize {
        for message in &page.messages {
            if !scope.contains(message) || self.known.contains(&message.id) {
                continue;
            }
            if let Some(temporary) = self.live.take_echo(message, &mut self.known) {
                debug!(scope = %scope, temporary = %temporary, id = %message.id, "Page confirmed optimistic echo");
            }
        }
        self.pages.commit(scope, page, &mut self.known)
    }

    /// Apply a pushed message.
    pub fn apply_event(&mut self, scope: &ScopeId, message: Message) -> LiveOutcome {
        self.live.insert(scope, message, &mut self.known)
    }

    pub fn push_optimistic(&mut self, message: Message) {
        self.live.push_optimistic(message, &mut self.known);
    }

    pub fn confirm(&mut self, scope: &ScopeId, temporary: &MessageId, confirmed: Message) -> LiveOutcome {
        self.live.confirm(scope, temporary, confirmed, &mut self.known)
    }

    pub fn retract(&mut self, temporary: &MessageId) -> bool {
        self.live.retract(temporary, &mut self.known)
    }

    /// Forget history, keeping the live tail.
    pub fn reset_history(&mut self) -> usize {
        self.pages.reset(&mut self.known)
    }

    /// Replay events held during a reset through the normal dedup path.
    pub fn replay_deferred(&mut self, scope: &ScopeId) -> usize {
        self.live
            .take_deferred()
            .into_iter()
            .map(|message| self.live.insert(scope, message, &mut self.known))
            .filter(LiveOutcome::is_change)
            .count()
    }

    /// Every stored page plus the live tail.
    pub fn merged(&self, predicate: &SearchPredicate) -> Vec<Message> {
        merge(self.pages.messages(), self.live.messages(), predicate)
    }

    /// Pages up to `offset` plus the live tail. Only history is windowed.
    pub fn merged_through(&self, offset: u64, predicate: &SearchPredicate) -> Vec<Message> {
        merge(self.pages.messages_through(offset), self.live.messages(), predicate)
    }

    /// Whether `known` equals the union of page and live ids.
    pub fn is_consistent(&self) -> bool {
        let held = self.pages.message_count() + self.live.len();
        held == self.known.len()
            && self.pages.messages().all(|m| self.known.contains(&m.id))
            && self.live.messages().all(|m| self.known.contains(&m.id))
    }
}

/// Everything the engine tracks for one active scope.
pub(crate) struct ScopeState {
    pub scope: ScopeId,
    /// Activation this state belongs to.
    pub epoch: u64,
    /// Bumped on every search change.
    pub generation: u64,
    pub phase: ScopePhase,
    pub predicate: SearchPredicate,
    pub pagination: Pagination,
    pub sync: ReconciliationState,
    pub subscription: Option<Box<dyn LiveSubscription>>,
    pub error: Option<String>,
    /// Offset of the last paging load that failed, for `retry`.
    pub failed_offset: Option<u64>,
    /// Cleared on deactivation; late results are dropped after that.
    pub active: bool,
    revision: u64,
    view: Arc<MergedView>,
}

impl ScopeState {
    pub fn new(scope: ScopeId, epoch: u64, predicate: SearchPredicate, limit: u32) -> Self {
        let pagination = Pagination::new(limit);
        let view = Arc::new(MergedView {
            scope: scope.clone(),
            revision: 0,
            phase: ScopePhase::Uninitialized,
            search: predicate.term().to_string(),
            offset: 0,
            limit,
            page: 1,
            has_more: true,
            live_attached: false,
            deferred: 0,
            error: None,
            messages: Vec::new(),
        });
        Self {
            scope,
            epoch,
            generation: 0,
            phase: ScopePhase::Uninitialized,
            predicate,
            pagination,
            sync: ReconciliationState::new(),
            subscription: None,
            error: None,
            failed_offset: None,
            active: true,
            revision: 0,
            view,
        }
    }

    /// Whether a result tagged with `epoch`/`generation` may still apply.
    pub fn is_current(&self, epoch: u64, generation: u64) -> bool {
        self.active && self.epoch == epoch && self.generation == generation
    }

    pub fn request_for(&self, offset: u64) -> PageRequest {
        PageRequest {
            scope: self.scope.clone(),
            offset,
            limit: self.pagination.limit(),
            search: self.predicate.term().to_string(),
        }
    }

    pub fn has_more(&self) -> bool {
        self.sync.pages.has_more(self.pagination.offset())
    }

    /// Move to `Ready` and apply anything deferred meanwhile.
    pub fn enter_ready(&mut self) -> usize {
        self.phase = ScopePhase::Ready;
        let scope = self.scope.clone();
        self.sync.replay_deferred(&scope)
    }

    /// Rebuild the published view from current state.
    pub fn rebuild_view(&mut self) -> Arc<MergedView> {
        self.revision += 1;
        let view = Arc::new(MergedView {
            scope: self.scope.clone(),
            revision: self.revision,
            phase: self.phase,
            search: self.predicate.term().to_string(),
            offset: self.pagination.offset(),
            limit: self.pagination.limit(),
            page: self.pagination.page_number(),
            has_more: self.has_more(),
            live_attached: self.subscription.is_some(),
            deferred: self.sync.live.deferred_len(),
            error: self.error.clone(),
            messages: self
                .sync
                .merged_through(self.pagination.offset(), &self.predicate),
        });
        self.view = Arc::clone(&view);
        view
    }

    pub fn view(&self) -> Arc<MergedView> {
        Arc::clone(&self.view)
    }
}
