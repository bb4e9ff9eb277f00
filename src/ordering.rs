//! Message identity and display order.
//!
//! Messages are ordered by `inserted_at` ascending with ties broken by id, so
//! the merge result does not depend on arrival order. Identity is the id
//! alone.

use crate::types::{Message, MessageId, Timestamp};
use std::cmp::Ordering;

/// Sort key implementing the ordering policy.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OrderKey {
    pub inserted_at: Timestamp,
    pub id: MessageId,
}

impl OrderKey {
    pub fn of(message: &Message) -> Self {
        Self {
            inserted_at: message.inserted_at,
            id: message.id.clone(),
        }
    }
}

/// Total order over messages.
pub fn compare(a: &Message, b: &Message) -> Ordering {
    a.inserted_at
        .cmp(&b.inserted_at)
        .then_with(|| a.id.cmp(&b.id))
}

/// Two messages are the same message iff their ids match.
pub fn same_message(a: &Message, b: &Message) -> bool {
    a.id == b.id
}

/// Whether a slice is in policy order with no repeated id.
pub fn is_canonical(messages: &[Message]) -> bool {
    messages
        .windows(2)
        .all(|w| compare(&w[0], &w[1]) == Ordering::Less)
}
