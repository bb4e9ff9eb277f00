//! Boundary to the query/subscription layer.
//!
//! Everything about how bytes move (HTTP, websockets, auth headers, timeouts)
//! lives behind this trait. Calls block the calling thread; the engine never
//! holds a lock across them.

use crate::error::TransportError;
use crate::live::{LiveSink, LiveSubscription};
use crate::types::{Message, PageRequest, ScopeId};

pub trait ChatTransport: Send + Sync {
    /// Fetch one page of history, newest first, filtered by `request.search`.
    fn fetch_page(&self, request: &PageRequest) -> Result<Vec<Message>, TransportError>;

    /// Start pushing new messages for the scope's bot into `sink`.
    ///
    /// Delivery may be duplicated. Messages for other chats of the same bot
    /// may be pushed and are ignored.
    fn subscribe(
        &self,
        scope: &ScopeId,
        sink: LiveSink,
    ) -> Result<Box<dyn LiveSubscription>, TransportError>;

    /// Post a message and return the stored copy.
    fn send_message(&self, scope: &ScopeId, text: &str) -> Result<Message, TransportError>;
}
