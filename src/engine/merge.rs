//! The merged view as a pure function of its inputs.

use crate::ordering::compare;
use crate::search::SearchPredicate;
use crate::types::{Message, MessageId};
use std::collections::HashMap;

/// Sorted, de-duplicated union of history and live messages.
///
/// On an id collision the live copy wins; among live copies the last one
/// wins. Only messages matching `predicate` are returned.
pub fn merge<'a, H, L>(history: H, live: L, predicate: &SearchPredicate) -> Vec<Message>
where
    H: IntoIterator<Item = &'a Message>,
    L: IntoIterator<Item = &'a Message>,
{
    let mut by_id: HashMap<&MessageId, &Message> = HashMap::new();
    for message in live {
        by_id.insert(&message.id, message);
    }
    for message in history {
        by_id.entry(&message.id).or_insert(message);
    }

    let mut merged: Vec<Message> = by_id
        .into_values()
        .filter(|m| predicate.matches(m))
        .cloned()
        .collect();
    merged.sort_by(compare);
    merged
}
