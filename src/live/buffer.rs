//! Live tail with optimistic echoes and deferred events.

use crate::known::{KnownIds, Origin};
use crate::ordering::OrderKey;
use crate::types::{Message, MessageId, ScopeId};
use std::collections::{BTreeMap, HashMap, VecDeque};

/// What happened to a pushed or confirmed message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LiveOutcome {
    /// Added to the live tail.
    Inserted,
    /// Id already known; nothing changed.
    Duplicate,
    /// Message belongs to another chat.
    ForeignScope,
    /// Replaced an optimistic entry.
    Confirmed { temporary: MessageId },
    /// Held until the scope is ready again.
    Deferred,
    /// The scope is no longer active.
    Stale,
}

impl LiveOutcome {
    /// Whether the visible state changed.
    pub fn is_change(&self) -> bool {
        matches!(self, LiveOutcome::Inserted | LiveOutcome::Confirmed { .. })
    }
}

/// An optimistic entry waiting for its authoritative copy.
#[derive(Debug)]
struct PendingEcho {
    temporary: MessageId,
    sender_id: String,
    text: String,
}

impl PendingEcho {
    fn is_echo(&self, message: &Message) -> bool {
        self.sender_id == message.sender_id && self.text == message.text.trim()
    }
}

/// Messages received from the live stream for one scope.
#[derive(Debug, Default)]
pub struct LiveBuffer {
    /// Ordered live tail.
    tail: BTreeMap<OrderKey, Message>,

    /// Id to tail key, for removal.
    keys: HashMap<MessageId, OrderKey>,

    /// Unconfirmed local sends, oldest first.
    pending: Vec<PendingEcho>,

    /// Events received while the scope was not ready.
    deferred: VecDeque<Message>,
}

impl LiveBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a pushed message.
    ///
    /// A known id is a no-op. A message from the local sender whose text
    /// matches an outstanding optimistic entry is taken as that entry's echo
    /// and replaces it.
    pub fn insert(&mut self, scope: &ScopeId, message: Message, known: &mut KnownIds) -> LiveOutcome {
        if known.contains(&message.id) {
            return LiveOutcome::Duplicate;
        }
        if !scope.contains(&message) {
            return LiveOutcome::ForeignScope;
        }

        if let Some(temporary) = self.take_echo(&message, known) {
            self.push(message, known);
            return LiveOutcome::Confirmed { temporary };
        }

        self.push(message, known);
        LiveOutcome::Inserted
    }

    /// Drop the optimistic entry `message` is the authoritative copy of.
    ///
    /// Used for server copies that arrive through a page instead of the
    /// stream; the caller stores `message` itself.
    pub fn take_echo(&mut self, message: &Message, known: &mut KnownIds) -> Option<MessageId> {
        let index = self.pending.iter().position(|p| p.is_echo(message))?;
        let temporary = self.pending.remove(index).temporary;
        self.remove(&temporary, known);
        Some(temporary)
    }

    /// Insert a local echo under a temporary id.
    pub fn push_optimistic(&mut self, message: Message, known: &mut KnownIds) {
        self.pending.push(PendingEcho {
            temporary: message.id.clone(),
            sender_id: message.sender_id.clone(),
            text: message.text.trim().to_string(),
        });
        self.push(message, known);
    }

    /// Replace an optimistic entry with the copy returned by the server.
    ///
    /// If the live echo already replaced it, the confirmed copy is a
    /// duplicate and nothing changes.
    pub fn confirm(
        &mut self,
        scope: &ScopeId,
        temporary: &MessageId,
        confirmed: Message,
        known: &mut KnownIds,
    ) -> LiveOutcome {
        self.pending.retain(|p| &p.temporary != temporary);
        let had_temporary = self.remove(temporary, known);

        if known.contains(&confirmed.id) {
            return if had_temporary {
                LiveOutcome::Confirmed {
                    temporary: temporary.clone(),
                }
            } else {
                LiveOutcome::Duplicate
            };
        }
        if !scope.contains(&confirmed) {
            return LiveOutcome::ForeignScope;
        }

        self.push(confirmed, known);
        LiveOutcome::Confirmed {
            temporary: temporary.clone(),
        }
    }

    /// Remove an optimistic entry whose send failed.
    ///
    /// Returns false if it was already replaced by its echo.
    pub fn retract(&mut self, temporary: &MessageId, known: &mut KnownIds) -> bool {
        self.pending.retain(|p| &p.temporary != temporary);
        self.remove(temporary, known)
    }

    /// Hold an event until the scope is ready.
    pub fn defer(&mut self, message: Message) {
        self.deferred.push_back(message);
    }

    /// Take deferred events in arrival order.
    pub fn take_deferred(&mut self) -> Vec<Message> {
        self.deferred.drain(..).collect()
    }

    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.keys.contains_key(id)
    }

    /// Live tail in policy order.
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.tail.values()
    }

    pub fn len(&self) -> usize {
        self.tail.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tail.is_empty()
    }

    fn push(&mut self, message: Message, known: &mut KnownIds) {
        let key = OrderKey::of(&message);
        known.insert(message.id.clone(), Origin::Live);
        self.keys.insert(message.id.clone(), key.clone());
        self.tail.insert(key, message);
    }

    fn remove(&mut self, id: &MessageId, known: &mut KnownIds) -> bool {
        match self.keys.remove(id) {
            Some(key) => {
                self.tail.remove(&key);
                known.remove(id);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Timestamp;

    fn scope() -> ScopeId {
        ScopeId::parse("6f1c2a7e-33d4-4b7e-9d55-0a1b2c3d4e5f", "c1").unwrap()
    }

    fn msg(id: &str, t: i64, text: &str) -> Message {
        Message {
            id: id.into(),
            chat_id: "c1".to_string(),
            sender_id: "u1".to_string(),
            sender_name: "Ann".to_string(),
            text: text.to_string(),
            inserted_at: Timestamp(t),
        }
    }

    fn local(id: &str, t: i64, text: &str) -> Message {
        Message {
            sender_id: "local".to_string(),
            ..msg(id, t, text)
        }
    }

    fn ids(buffer: &LiveBuffer) -> Vec<String> {
        buffer.messages().map(|m| m.id.to_string()).collect()
    }

    #[test]
    fn test_insert_orders_and_dedups() {
        let mut buffer = LiveBuffer::new();
        let mut known = KnownIds::new();

        assert_eq!(buffer.insert(&scope(), msg("m3", 3, "c"), &mut known), LiveOutcome::Inserted);
        assert_eq!(buffer.insert(&scope(), msg("m1", 1, "a"), &mut known), LiveOutcome::Inserted);
        assert_eq!(buffer.insert(&scope(), msg("m3", 3, "c"), &mut known), LiveOutcome::Duplicate);

        assert_eq!(ids(&buffer), vec!["m1", "m3"]);
        assert_eq!(known.len(), 2);
    }

    #[test]
    fn test_foreign_chat_ignored() {
        let mut buffer = LiveBuffer::new();
        let mut known = KnownIds::new();
        let mut other = msg("x", 1, "a");
        other.chat_id = "c2".to_string();

        assert_eq!(buffer.insert(&scope(), other, &mut known), LiveOutcome::ForeignScope);
        assert!(buffer.is_empty());
        assert!(known.is_empty());
    }

    #[test]
    fn test_echo_replaces_optimistic() {
        let mut buffer = LiveBuffer::new();
        let mut known = KnownIds::new();
        buffer.push_optimistic(local("tmp-1", 10, "hi"), &mut known);

        let outcome = buffer.insert(&scope(), local("m4", 11, "hi "), &mut known);
        assert_eq!(
            outcome,
            LiveOutcome::Confirmed {
                temporary: "tmp-1".into()
            }
        );
        assert_eq!(ids(&buffer), vec!["m4"]);
        assert!(!known.contains(&"tmp-1".into()));
        assert_eq!(buffer.pending_len(), 0);

        // The send response arriving afterwards is a duplicate.
        let outcome = buffer.confirm(&scope(), &"tmp-1".into(), local("m4", 11, "hi"), &mut known);
        assert_eq!(outcome, LiveOutcome::Duplicate);
        assert_eq!(ids(&buffer), vec!["m4"]);
    }

    #[test]
    fn test_same_text_from_another_sender_is_not_an_echo() {
        let mut buffer = LiveBuffer::new();
        let mut known = KnownIds::new();
        buffer.push_optimistic(local("tmp-1", 10, "hi"), &mut known);

        let mut other = msg("o1", 11, "hi");
        other.sender_id = "someone-else".to_string();
        assert_eq!(buffer.insert(&scope(), other, &mut known), LiveOutcome::Inserted);
        assert_eq!(ids(&buffer), vec!["tmp-1", "o1"]);
        assert_eq!(buffer.pending_len(), 1);
    }

    #[test]
    fn test_take_echo_for_page_copy() {
        let mut buffer = LiveBuffer::new();
        let mut known = KnownIds::new();
        buffer.push_optimistic(local("tmp-1", 10, "hi"), &mut known);

        assert_eq!(buffer.take_echo(&msg("o1", 11, "hi"), &mut known), None);
        assert_eq!(
            buffer.take_echo(&local("srv-1", 11, "hi"), &mut known),
            Some("tmp-1".into())
        );
        assert!(buffer.is_empty());
        assert!(known.is_empty());
        assert_eq!(buffer.pending_len(), 0);
    }

    #[test]
    fn test_confirm_before_echo() {
        let mut buffer = LiveBuffer::new();
        let mut known = KnownIds::new();
        buffer.push_optimistic(local("tmp-1", 10, "hi"), &mut known);

        let outcome = buffer.confirm(&scope(), &"tmp-1".into(), msg("m4", 11, "hi"), &mut known);
        assert!(outcome.is_change());
        assert_eq!(buffer.insert(&scope(), msg("m4", 11, "hi"), &mut known), LiveOutcome::Duplicate);
        assert_eq!(ids(&buffer), vec!["m4"]);
    }

    #[test]
    fn test_retract_removes_phantom() {
        let mut buffer = LiveBuffer::new();
        let mut known = KnownIds::new();
        buffer.push_optimistic(local("tmp-1", 10, "hi"), &mut known);

        assert!(buffer.retract(&"tmp-1".into(), &mut known));
        assert!(buffer.is_empty());
        assert!(known.is_empty());
        assert!(!buffer.retract(&"tmp-1".into(), &mut known));
    }

    #[test]
    fn test_deferred_keeps_arrival_order() {
        let mut buffer = LiveBuffer::new();
        buffer.defer(msg("m2", 2, "b"));
        buffer.defer(msg("m1", 1, "a"));
        assert_eq!(buffer.deferred_len(), 2);

        let drained: Vec<_> = buffer.take_deferred().into_iter().map(|m| m.id.0).collect();
        assert_eq!(drained, vec!["m2", "m1"]);
        assert_eq!(buffer.deferred_len(), 0);
    }
}
