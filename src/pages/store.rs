//! Page store keyed by pagination offset.

use crate::known::{KnownIds, Origin};
use crate::ordering::OrderKey;
use crate::types::{Message, Page, ScopeId};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// A page as committed to the store.
#[derive(Debug)]
struct StoredPage {
    /// Messages this page contributed, in policy order.
    messages: Vec<Message>,
    /// Fullness of the most recent fetch of this offset.
    is_full: bool,
}

/// Fetched history for one scope.
#[derive(Debug, Default)]
pub struct PageStore {
    pages: BTreeMap<u64, StoredPage>,
}

impl PageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commit a successfully fetched page.
    ///
    /// Messages already known (from another page or the live tail) are
    /// discarded, as are messages from a different chat. Re-fetching a stored
    /// offset unions into it. Returns the number of messages added.
    pub fn commit(&mut self, scope: &ScopeId, page: Page, known: &mut KnownIds) -> usize {
        let offset = page.offset;
        let mut added = Vec::new();

        for message in page.messages {
            if !scope.contains(&message) {
                warn!(
                    scope = %scope,
                    offset,
                    message_id = %message.id,
                    chat_id = %message.chat_id,
                    "Dropping page entry from another chat"
                );
                continue;
            }
            if known.insert(message.id.clone(), Origin::Page(offset)) {
                added.push(message);
            } else {
                debug!(scope = %scope, offset, message_id = %message.id, "Duplicate page entry");
            }
        }

        let count = added.len();
        let stored = self.pages.entry(offset).or_insert_with(|| StoredPage {
            messages: Vec::new(),
            is_full: page.is_full,
        });
        stored.is_full = page.is_full;
        stored.messages.extend(added);
        stored.messages.sort_by_cached_key(OrderKey::of);

        count
    }

    /// Drop every page and forget the ids they contributed.
    ///
    /// Ids owned by the live tail are left alone.
    pub fn reset(&mut self, known: &mut KnownIds) -> usize {
        let mut removed = 0;
        for (_, page) in std::mem::take(&mut self.pages) {
            for message in page.messages {
                if let Some(Origin::Page(_)) = known.origin(&message.id) {
                    known.remove(&message.id);
                    removed += 1;
                }
            }
        }
        removed
    }

    /// False only if the last fetch of `offset` returned a short page.
    pub fn has_more(&self, offset: u64) -> bool {
        self.pages.get(&offset).map_or(true, |p| p.is_full)
    }

    pub fn contains(&self, offset: u64) -> bool {
        self.pages.contains_key(&offset)
    }

    /// All stored messages, page by page.
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.pages.values().flat_map(|p| p.messages.iter())
    }

    /// Messages of the pages from the newest up to and including `offset`.
    pub fn messages_through(&self, offset: u64) -> impl Iterator<Item = &Message> {
        self.pages.range(..=offset).flat_map(|(_, p)| p.messages.iter())
    }

    pub fn message_count(&self) -> usize {
        self.pages.values().map(|p| p.messages.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}
