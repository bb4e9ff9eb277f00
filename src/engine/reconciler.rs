//! The reconciliation engine tying pages, live events and observers together.

use crate::engine::state::{MergedView, ScopePhase, ScopeState};
use crate::error::{Result, SyncError, TransportError};
use crate::feed::{FeedConfig, FeedHandle, FeedId, ViewFeed};
use crate::live::{LiveOutcome, LiveSink};
use crate::pages::{Claim, InFlightLoads};
use crate::search::SearchPredicate;
use crate::transport::ChatTransport;
use crate::types::{Message, MessageId, Page, PageRequest, PageSummary, ScopeId, Timestamp};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// Engine configuration.
#[derive(Clone, Debug)]
pub struct ReconcilerConfig {
    /// Messages per history page.
    pub page_limit: u32,

    /// Longest accepted search term, in characters.
    pub max_search_len: usize,

    /// Longest accepted outgoing message, in characters.
    pub max_message_len: usize,

    /// Sender of optimistic entries. Must be the id the server attributes
    /// our sends to; echoes are only matched against it.
    pub local_sender_id: String,
    pub local_sender_name: String,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            page_limit: 50,
            max_search_len: 256,
            max_message_len: 4096,
            local_sender_id: "local".to_string(),
            local_sender_name: "You".to_string(),
        }
    }
}

/// Why a page is being loaded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LoadPurpose {
    /// First page after activation or a search change.
    Initial,
    /// Paging to another offset.
    Navigate(u64),
    /// Closing a gap after the live stream reconnected.
    Resync,
}

/// Outcome shared with coalesced followers.
#[derive(Clone, Debug)]
enum LoadFailure {
    Transport(TransportError),
    Cancelled,
}

type SharedLoad = std::result::Result<PageSummary, LoadFailure>;

type ScopeSlot = Arc<Mutex<ScopeState>>;

/// Shared engine state. Live sinks hold a weak reference to it.
pub(crate) struct Inner {
    config: ReconcilerConfig,
    transport: Arc<dyn ChatTransport>,
    scopes: RwLock<HashMap<ScopeId, ScopeSlot>>,
    loads: InFlightLoads<SharedLoad>,
    feed: ViewFeed,
    next_epoch: AtomicU64,
    next_temporary: AtomicU64,
    this: Weak<Inner>,
}

/// Reconciles paged history and live events into one view per scope.
///
/// Cheap to clone; clones share the same scopes.
#[derive(Clone)]
pub struct Reconciler {
    inner: Arc<Inner>,
}

impl Reconciler {
    pub fn new<T: ChatTransport + 'static>(transport: Arc<T>, config: ReconcilerConfig) -> Self {
        let transport: Arc<dyn ChatTransport> = transport;
        let inner = Arc::new_cyclic(|this| Inner {
            config,
            transport,
            scopes: RwLock::new(HashMap::new()),
            loads: InFlightLoads::new(),
            feed: ViewFeed::new(),
            next_epoch: AtomicU64::new(1),
            next_temporary: AtomicU64::new(1),
            this: this.clone(),
        });
        Self { inner }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.inner.config
    }

    /// Start viewing a scope: load the newest page, then attach the live stream.
    ///
    /// Activating a scope that is already active applies `search` to it.
    pub fn activate(&self, scope: &ScopeId, search: &str) -> Result<Arc<MergedView>> {
        self.inner.activate(scope, search)
    }

    /// Stop viewing a scope. In-flight results for it are discarded on arrival.
    pub fn deactivate(&self, scope: &ScopeId) -> Result<()> {
        self.inner.deactivate(scope)
    }

    /// Change the search term, resetting history and pagination.
    pub fn set_search(&self, scope: &ScopeId, term: &str) -> Result<Arc<MergedView>> {
        self.inner.set_search(scope, term)
    }

    /// Load the next older page. A no-op when there is nothing more.
    pub fn next_page(&self, scope: &ScopeId) -> Result<Arc<MergedView>> {
        self.inner.next_page(scope)
    }

    /// Go back one page. A no-op at the first page.
    pub fn prev_page(&self, scope: &ScopeId) -> Result<Arc<MergedView>> {
        self.inner.prev_page(scope)
    }

    /// Send a message with an optimistic local echo.
    pub fn send(&self, scope: &ScopeId, text: &str) -> Result<Message> {
        self.inner.send(scope, text)
    }

    /// Re-attempt what failed: the initial or post-reset load, a paging load,
    /// or the live attach.
    pub fn retry(&self, scope: &ScopeId) -> Result<Arc<MergedView>> {
        self.inner.retry(scope)
    }

    /// Messages of the last published view.
    pub fn get_merged_view(&self, scope: &ScopeId) -> Result<Vec<Message>> {
        Ok(self.inner.slot(scope)?.lock().view().messages.clone())
    }

    /// Full last published view.
    pub fn view(&self, scope: &ScopeId) -> Result<Arc<MergedView>> {
        Ok(self.inner.slot(scope)?.lock().view())
    }

    /// Whether older history may exist past the current offset.
    pub fn has_more(&self, scope: &ScopeId) -> Result<bool> {
        Ok(self.inner.slot(scope)?.lock().has_more())
    }

    pub fn is_active(&self, scope: &ScopeId) -> bool {
        self.inner.scopes.read().contains_key(scope)
    }

    pub fn active_scopes(&self) -> Vec<ScopeId> {
        self.inner.scopes.read().keys().cloned().collect()
    }

    /// Observe published views.
    pub fn subscribe_views(&self, config: FeedConfig) -> FeedHandle {
        self.inner.feed.subscribe(config)
    }

    pub fn unsubscribe_views(&self, id: FeedId) {
        self.inner.feed.unsubscribe(id)
    }

    /// Number of distinct page requests currently being fetched.
    pub fn loads_in_flight(&self) -> usize {
        self.inner.loads.len()
    }
}

impl Inner {
    fn slot(&self, scope: &ScopeId) -> Result<ScopeSlot> {
        self.scopes
            .read()
            .get(scope)
            .cloned()
            .ok_or_else(|| SyncError::ScopeNotActive(scope.clone()))
    }

    fn publish(&self, state: &mut ScopeState) -> Arc<MergedView> {
        let view = state.rebuild_view();
        debug!(
            scope = %state.scope,
            revision = view.revision,
            phase = ?view.phase,
            messages = view.messages.len(),
            "Published view"
        );
        self.feed.broadcast_view(&view);
        view
    }

    fn parse_search(&self, term: &str) -> Result<SearchPredicate> {
        SearchPredicate::parse(term, self.config.max_search_len)
    }

    // --- Lifecycle ---

    fn activate(&self, scope: &ScopeId, search: &str) -> Result<Arc<MergedView>> {
        let predicate = self.parse_search(search)?;
        if self.config.page_limit == 0 {
            return Err(SyncError::Validation {
                field: "page_limit",
                reason: "page limit must be positive".to_string(),
            });
        }

        let epoch = self.next_epoch.fetch_add(1, Ordering::SeqCst);
        let slot = {
            let mut scopes = self.scopes.write();
            if scopes.contains_key(scope) {
                drop(scopes);
                return self.set_search(scope, search);
            }
            let state = ScopeState::new(scope.clone(), epoch, predicate, self.config.page_limit);
            let slot = Arc::new(Mutex::new(state));
            scopes.insert(scope.clone(), Arc::clone(&slot));
            slot
        };
        info!(scope = %scope, epoch, "Activated scope");

        let (request, generation) = {
            let mut state = slot.lock();
            state.phase = ScopePhase::Loading;
            self.publish(&mut state);
            (state.request_for(0), state.generation)
        };

        self.load(&slot, request, epoch, generation, LoadPurpose::Initial)?;
        self.attach(&slot, epoch, generation)?;
        let view = slot.lock().view();
        Ok(view)
    }

    fn deactivate(&self, scope: &ScopeId) -> Result<()> {
        let slot = self
            .scopes
            .write()
            .remove(scope)
            .ok_or_else(|| SyncError::ScopeNotActive(scope.clone()))?;

        let subscription = {
            let mut state = slot.lock();
            state.active = false;
            state.subscription.take()
        };
        if let Some(mut subscription) = subscription {
            subscription.cancel();
        }

        self.feed.broadcast_deactivated(scope);
        info!(scope = %scope, "Deactivated scope");
        Ok(())
    }

    fn set_search(&self, scope: &ScopeId, term: &str) -> Result<Arc<MergedView>> {
        let predicate = self.parse_search(term)?;
        let slot = self.slot(scope)?;

        let (request, epoch, generation, detached) = {
            let mut state = slot.lock();
            if state.predicate == predicate {
                return Ok(state.view());
            }

            state.phase = ScopePhase::Resetting;
            let detached = state.subscription.take();
            let dropped = state.sync.reset_history();
            state.pagination.reset();
            state.predicate = predicate;
            state.generation += 1;
            state.error = None;
            state.failed_offset = None;
            info!(
                scope = %scope,
                search = %state.predicate.term(),
                dropped,
                "Search changed, history reset"
            );

            state.phase = ScopePhase::Loading;
            self.publish(&mut state);
            (state.request_for(0), state.epoch, state.generation, detached)
        };

        if let Some(mut subscription) = detached {
            subscription.cancel();
        }

        self.load(&slot, request, epoch, generation, LoadPurpose::Initial)?;
        self.attach(&slot, epoch, generation)?;
        let view = slot.lock().view();
        Ok(view)
    }

    fn retry(&self, scope: &ScopeId) -> Result<Arc<MergedView>> {
        let slot = self.slot(scope)?;

        let (phase, attached, failed, epoch, generation) = {
            let state = slot.lock();
            let failed = state
                .failed_offset
                .map(|offset| (offset, state.request_for(offset)));
            (
                state.phase,
                state.subscription.is_some(),
                failed,
                state.epoch,
                state.generation,
            )
        };

        match phase {
            ScopePhase::Loading | ScopePhase::Uninitialized => {
                let request = slot.lock().request_for(0);
                self.load(&slot, request, epoch, generation, LoadPurpose::Initial)?;
                self.attach(&slot, epoch, generation)?;
            }
            ScopePhase::Ready => {
                if failed.is_none() && attached {
                    debug!(scope = %scope, "Nothing to retry");
                }
                if let Some((offset, request)) = failed {
                    info!(scope = %scope, offset, "Retrying page load");
                    self.load(&slot, request, epoch, generation, LoadPurpose::Navigate(offset))?;
                }
                if !attached {
                    self.attach(&slot, epoch, generation)?;
                }
            }
            ScopePhase::Resetting => debug!(scope = %scope, "Nothing to retry while resetting"),
        }

        let view = slot.lock().view();
        Ok(view)
    }

    // --- Pagination ---

    fn next_page(&self, scope: &ScopeId) -> Result<Arc<MergedView>> {
        let slot = self.slot(scope)?;

        let (request, epoch, generation, offset) = {
            let state = slot.lock();
            if state.phase != ScopePhase::Ready {
                debug!(scope = %scope, phase = ?state.phase, "Ignoring next page while not ready");
                return Ok(state.view());
            }
            match state.pagination.next_offset(state.has_more()) {
                Some(offset) => (state.request_for(offset), state.epoch, state.generation, offset),
                None => {
                    debug!(scope = %scope, "No older history");
                    return Ok(state.view());
                }
            }
        };

        self.load(&slot, request, epoch, generation, LoadPurpose::Navigate(offset))?;
        let view = slot.lock().view();
        Ok(view)
    }

    fn prev_page(&self, scope: &ScopeId) -> Result<Arc<MergedView>> {
        let slot = self.slot(scope)?;

        let (request, epoch, generation, offset) = {
            let mut state = slot.lock();
            if state.phase != ScopePhase::Ready {
                return Ok(state.view());
            }
            let Some(offset) = state.pagination.prev_offset() else {
                return Ok(state.view());
            };
            if state.sync.pages.contains(offset) {
                state.pagination.move_to(offset);
                return Ok(self.publish(&mut state));
            }
            (state.request_for(offset), state.epoch, state.generation, offset)
        };

        self.load(&slot, request, epoch, generation, LoadPurpose::Navigate(offset))?;
        let view = slot.lock().view();
        Ok(view)
    }

    // --- Page loading ---

    /// Fetch and apply a page, sharing identical in-flight requests.
    fn load(
        &self,
        slot: &ScopeSlot,
        request: PageRequest,
        epoch: u64,
        generation: u64,
        purpose: LoadPurpose,
    ) -> Result<PageSummary> {
        loop {
            match self.loads.claim(&request) {
                Claim::Follower(receiver) => {
                    debug!(scope = %request.scope, offset = request.offset, "Joining in-flight load");
                    match receiver.recv() {
                        Ok(Ok(summary)) => {
                            return Ok(PageSummary {
                                coalesced: true,
                                ..summary
                            })
                        }
                        Ok(Err(LoadFailure::Transport(source))) => {
                            return Err(fetch_failure(&request, source))
                        }
                        // The leader belonged to an older activation or
                        // search; fetch again if ours is still current.
                        Ok(Err(LoadFailure::Cancelled)) | Err(_) => {
                            if !slot.lock().is_current(epoch, generation) {
                                return Err(SyncError::Cancelled {
                                    scope: request.scope.clone(),
                                });
                            }
                        }
                    }
                }
                Claim::Leader => {
                    let outcome = self.fetch_and_apply(slot, &request, epoch, generation, purpose);
                    let followers = self.loads.complete(&request, outcome.clone());
                    if followers > 0 {
                        debug!(scope = %request.scope, offset = request.offset, followers, "Shared page load");
                    }
                    return outcome.map_err(|failure| match failure {
                        LoadFailure::Transport(source) => fetch_failure(&request, source),
                        LoadFailure::Cancelled => SyncError::Cancelled {
                            scope: request.scope.clone(),
                        },
                    });
                }
            }
        }
    }

    fn fetch_and_apply(
        &self,
        slot: &ScopeSlot,
        request: &PageRequest,
        epoch: u64,
        generation: u64,
        purpose: LoadPurpose,
    ) -> SharedLoad {
        debug!(
            scope = %request.scope,
            offset = request.offset,
            search = %request.search,
            purpose = ?purpose,
            "Fetching page"
        );

        let fetched = self.transport.fetch_page(request);

        let mut state = slot.lock();
        if !state.is_current(epoch, generation) {
            debug!(scope = %request.scope, offset = request.offset, "Discarding stale page");
            return Err(LoadFailure::Cancelled);
        }

        let messages = match fetched {
            Ok(messages) => messages,
            Err(error) => {
                warn!(
                    scope = %request.scope,
                    offset = request.offset,
                    search = %request.search,
                    error = %error,
                    "Page load failed"
                );
                let failure = fetch_failure(request, error.clone());
                if let LoadPurpose::Navigate(offset) = purpose {
                    state.failed_offset = Some(offset);
                }
                state.error = Some(failure.to_string());
                self.feed.broadcast_error(&request.scope, failure.to_string());
                self.publish(&mut state);
                return Err(LoadFailure::Transport(error));
            }
        };

        let page = Page::from_fetch(request, messages);
        let fetched_count = page.messages.len();
        let is_full = page.is_full;
        let added = state.sync.commit_page(&request.scope, page);

        match purpose {
            LoadPurpose::Initial => {
                let replayed = state.enter_ready();
                if replayed > 0 {
                    debug!(scope = %request.scope, replayed, "Replayed deferred live events");
                }
            }
            LoadPurpose::Navigate(offset) => {
                state.pagination.move_to(offset);
                state.failed_offset = None;
            }
            LoadPurpose::Resync => {}
        }
        state.error = None;
        self.publish(&mut state);

        Ok(PageSummary {
            offset: request.offset,
            fetched: fetched_count,
            added,
            is_full,
            coalesced: false,
        })
    }

    // --- Live stream ---

    /// Attach the live stream if the scope is ready and has none.
    fn attach(&self, slot: &ScopeSlot, epoch: u64, generation: u64) -> Result<()> {
        let scope = {
            let state = slot.lock();
            if !state.is_current(epoch, generation) {
                return Err(SyncError::Cancelled {
                    scope: state.scope.clone(),
                });
            }
            if state.phase != ScopePhase::Ready || state.subscription.is_some() {
                return Ok(());
            }
            state.scope.clone()
        };

        let sink = LiveSink::new(scope.clone(), epoch, self.this.clone());
        match self.transport.subscribe(&scope, sink) {
            Ok(mut subscription) => {
                let mut state = slot.lock();
                let wanted = state.is_current(epoch, generation)
                    && state.phase == ScopePhase::Ready
                    && state.subscription.is_none();
                if !wanted {
                    drop(state);
                    subscription.cancel();
                    return Ok(());
                }
                state.subscription = Some(subscription);
                state.error = None;
                info!(scope = %scope, epoch, "Live stream attached");
                self.publish(&mut state);
                Ok(())
            }
            Err(source) => {
                warn!(scope = %scope, error = %source, "Live subscribe failed");
                let failure = SyncError::SubscriptionFailure {
                    scope: scope.clone(),
                    source,
                };
                let mut state = slot.lock();
                if state.is_current(epoch, generation) {
                    state.error = Some(failure.to_string());
                    self.feed.broadcast_error(&scope, failure.to_string());
                    self.publish(&mut state);
                }
                Err(failure)
            }
        }
    }

    pub(crate) fn live_event(&self, scope: &ScopeId, epoch: u64, message: Message) -> LiveOutcome {
        let Ok(slot) = self.slot(scope) else {
            return LiveOutcome::Stale;
        };
        let mut state = slot.lock();
        if !state.active || state.epoch != epoch {
            return LiveOutcome::Stale;
        }

        if state.phase != ScopePhase::Ready {
            debug!(scope = %scope, message_id = %message.id, phase = ?state.phase, "Deferring live event");
            state.sync.live.defer(message);
            self.publish(&mut state);
            return LiveOutcome::Deferred;
        }

        let message_id = message.id.clone();
        let outcome = state.sync.apply_event(scope, message);
        match &outcome {
            LiveOutcome::Duplicate => debug!(scope = %scope, message_id = %message_id, "Duplicate live event"),
            LiveOutcome::ForeignScope => {
                debug!(scope = %scope, message_id = %message_id, "Live event for another chat")
            }
            _ => {}
        }
        if outcome.is_change() {
            self.publish(&mut state);
        }
        outcome
    }

    pub(crate) fn live_error(&self, scope: &ScopeId, epoch: u64, source: TransportError) {
        let Ok(slot) = self.slot(scope) else {
            return;
        };
        let mut state = slot.lock();
        if !state.active || state.epoch != epoch {
            return;
        }
        warn!(scope = %scope, error = %source, "Live stream error");
        let failure = SyncError::SubscriptionFailure {
            scope: scope.clone(),
            source,
        };
        state.error = Some(failure.to_string());
        self.feed.broadcast_error(scope, failure.to_string());
        self.publish(&mut state);
    }

    pub(crate) fn live_closed(&self, scope: &ScopeId, epoch: u64) {
        let Ok(slot) = self.slot(scope) else {
            return;
        };
        let mut state = slot.lock();
        if !state.active || state.epoch != epoch {
            return;
        }
        if state.subscription.take().is_some() {
            info!(scope = %scope, "Live stream closed");
            self.publish(&mut state);
        }
    }

    /// Refetch the newest page after the live stream reconnected.
    pub(crate) fn resync(&self, scope: &ScopeId, epoch: u64) -> Result<()> {
        let slot = self.slot(scope)?;
        let (request, generation) = {
            let state = slot.lock();
            if !state.active || state.epoch != epoch {
                return Err(SyncError::Cancelled {
                    scope: scope.clone(),
                });
            }
            if state.phase != ScopePhase::Ready {
                // The pending initial load covers the gap.
                return Ok(());
            }
            (state.request_for(0), state.generation)
        };

        info!(scope = %scope, "Live stream reconnected, resyncing newest page");
        let summary = self.load(&slot, request, epoch, generation, LoadPurpose::Resync)?;
        if summary.added > 0 {
            info!(scope = %scope, added = summary.added, "Resync closed a gap");
        }
        Ok(())
    }

    // --- Sending ---

    fn send(&self, scope: &ScopeId, text: &str) -> Result<Message> {
        if text.trim().is_empty() {
            return Err(SyncError::Validation {
                field: "text",
                reason: "message must not be empty".to_string(),
            });
        }
        if text.chars().count() > self.config.max_message_len {
            return Err(SyncError::Validation {
                field: "text",
                reason: format!("message longer than {} characters", self.config.max_message_len),
            });
        }

        let slot = self.slot(scope)?;
        let temporary = MessageId::temporary(self.next_temporary.fetch_add(1, Ordering::SeqCst));
        let epoch = {
            let mut state = slot.lock();
            state.sync.push_optimistic(Message {
                id: temporary.clone(),
                chat_id: scope.chat_id.clone(),
                sender_id: self.config.local_sender_id.clone(),
                sender_name: self.config.local_sender_name.clone(),
                text: text.to_string(),
                inserted_at: Timestamp::now(),
            });
            self.publish(&mut state);
            state.epoch
        };
        debug!(scope = %scope, temporary = %temporary, "Optimistic echo inserted");

        let sent = self.transport.send_message(scope, text);

        let mut state = slot.lock();
        let current = state.active && state.epoch == epoch;
        match sent {
            Ok(confirmed) => {
                if current {
                    let outcome = state.sync.confirm(scope, &temporary, confirmed.clone());
                    debug!(scope = %scope, temporary = %temporary, id = %confirmed.id, outcome = ?outcome, "Send confirmed");
                    self.publish(&mut state);
                }
                Ok(confirmed)
            }
            Err(source) => {
                warn!(scope = %scope, error = %source, "Send failed, retracting optimistic echo");
                let failure = SyncError::SendFailure {
                    scope: scope.clone(),
                    source,
                };
                if current {
                    state.sync.retract(&temporary);
                    state.error = Some(failure.to_string());
                    self.feed.broadcast_error(scope, failure.to_string());
                    self.publish(&mut state);
                }
                Err(failure)
            }
        }
    }
}

fn fetch_failure(request: &PageRequest, source: TransportError) -> SyncError {
    SyncError::FetchFailure {
        scope: request.scope.clone(),
        offset: request.offset,
        search: request.search.clone(),
        source,
    }
}
