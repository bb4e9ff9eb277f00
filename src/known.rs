//! The set of message ids a scope has already materialized.

use crate::types::MessageId;
use std::collections::HashMap;

/// Where a known id currently lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Origin {
    /// Stored in the history page at this offset.
    Page(u64),
    /// Held by the live tail.
    Live,
}

/// Deduplication index.
///
/// Kept equal to the union of ids in the page store and the live tail. A
/// candidate whose id is already here is discarded.
#[derive(Debug, Default)]
pub struct KnownIds {
    ids: HashMap<MessageId, Origin>,
}

impl KnownIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.ids.contains_key(id)
    }

    pub fn origin(&self, id: &MessageId) -> Option<Origin> {
        self.ids.get(id).copied()
    }

    /// Record a new id. Returns false if it was already known.
    pub fn insert(&mut self, id: MessageId, origin: Origin) -> bool {
        if self.ids.contains_key(&id) {
            return false;
        }
        self.ids.insert(id, origin);
        true
    }

    pub fn remove(&mut self, id: &MessageId) -> Option<Origin> {
        self.ids.remove(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MessageId, Origin)> {
        self.ids.iter().map(|(id, origin)| (id, *origin))
    }
}
