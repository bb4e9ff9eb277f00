//! Core types for chat reconciliation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::error::{Result, SyncError};

/// Prefix reserved for ids of optimistic local echoes.
const TEMPORARY_PREFIX: &str = "tmp-";

/// Opaque message identifier, unique within a scope.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        MessageId(id.into())
    }

    /// Id for an optimistic entry that has not been confirmed yet.
    pub fn temporary(n: u64) -> Self {
        MessageId(format!("{TEMPORARY_PREFIX}{n}"))
    }

    pub fn is_temporary(&self) -> bool {
        self.0.starts_with(TEMPORARY_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({})", self.0)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        MessageId(s.to_string())
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        MessageId(s)
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or_default();
        Timestamp(micros)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// A conversation: one chat within one bot.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeId {
    pub bot_id: Uuid,
    pub chat_id: String,
}

impl ScopeId {
    /// Validate raw identifiers and build a scope.
    ///
    /// The bot id must be a UUID and the chat id must be non-empty. Nothing
    /// is fetched for a scope that fails here.
    pub fn parse(bot_id: &str, chat_id: &str) -> Result<Self> {
        let bot_id = Uuid::parse_str(bot_id.trim()).map_err(|e| SyncError::Validation {
            field: "bot_id",
            reason: e.to_string(),
        })?;
        Self::new(bot_id, chat_id)
    }

    pub fn new(bot_id: Uuid, chat_id: &str) -> Result<Self> {
        let chat_id = chat_id.trim();
        if chat_id.is_empty() {
            return Err(SyncError::Validation {
                field: "chat_id",
                reason: "chat id must not be empty".to_string(),
            });
        }
        Ok(Self {
            bot_id,
            chat_id: chat_id.to_string(),
        })
    }

    /// Whether a message belongs to this scope.
    ///
    /// Live subscriptions are bot-wide, so only the chat is compared.
    pub fn contains(&self, message: &Message) -> bool {
        message.chat_id == self.chat_id
    }
}

impl fmt::Debug for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScopeId({}/{})", self.bot_id, self.chat_id)
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bot_id, self.chat_id)
    }
}

/// A single chat message, either fetched or pushed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Sole deduplication key.
    pub id: MessageId,

    /// Chat this message was posted in.
    pub chat_id: String,

    pub sender_id: String,

    pub sender_name: String,

    pub text: String,

    /// Not strictly increasing across senders.
    pub inserted_at: Timestamp,
}

impl Message {
    pub fn is_temporary(&self) -> bool {
        self.id.is_temporary()
    }
}

/// Parameters of one history fetch.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PageRequest {
    pub scope: ScopeId,
    pub offset: u64,
    pub limit: u32,
    /// Normalized search term; empty means unfiltered.
    pub search: String,
}

/// A contiguous slice of history at some offset under some search term.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Page {
    pub offset: u64,
    pub limit: u32,
    pub search: String,
    pub messages: Vec<Message>,
    /// The page came back with `limit` entries, so older data may exist.
    pub is_full: bool,
}

impl Page {
    /// Annotate fetched messages with the fullness flag.
    pub fn from_fetch(request: &PageRequest, messages: Vec<Message>) -> Self {
        let is_full = messages.len() == request.limit as usize;
        Self {
            offset: request.offset,
            limit: request.limit,
            search: request.search.clone(),
            messages,
            is_full,
        }
    }
}

/// Outcome of applying a page to a scope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSummary {
    pub offset: u64,
    /// Messages returned by the transport.
    pub fetched: usize,
    /// Messages that were new to the scope.
    pub added: usize,
    pub is_full: bool,
    /// This caller shared another caller's in-flight request.
    pub coalesced: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temporary_ids() {
        let id = MessageId::temporary(7);
        assert!(id.is_temporary());
        assert_eq!(id.as_str(), "tmp-7");
        assert!(!MessageId::new("m1").is_temporary());
    }

    #[test]
    fn test_scope_parse_rejects_bad_bot_id() {
        let result = ScopeId::parse("not-a-uuid", "chat-1");
        assert!(matches!(
            result,
            Err(SyncError::Validation { field: "bot_id", .. })
        ));
    }

    #[test]
    fn test_scope_parse_rejects_empty_chat() {
        let result = ScopeId::parse("6f1c2a7e-33d4-4b7e-9d55-0a1b2c3d4e5f", "   ");
        assert!(matches!(
            result,
            Err(SyncError::Validation { field: "chat_id", .. })
        ));
    }

    #[test]
    fn test_page_fullness() {
        let scope = ScopeId::parse("6f1c2a7e-33d4-4b7e-9d55-0a1b2c3d4e5f", "c1").unwrap();
        let request = PageRequest {
            scope,
            offset: 0,
            limit: 2,
            search: String::new(),
        };
        let msg = Message {
            id: "m1".into(),
            chat_id: "c1".to_string(),
            sender_id: "u1".to_string(),
            sender_name: "Ann".to_string(),
            text: "hi".to_string(),
            inserted_at: Timestamp(1),
        };
        assert!(!Page::from_fetch(&request, vec![msg.clone()]).is_full);
        assert!(Page::from_fetch(&request, vec![msg.clone(), msg]).is_full);
    }
}
