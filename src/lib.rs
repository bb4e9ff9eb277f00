//! # chatsync
//!
//! Client-side reconciliation of a paged chat history with a live message
//! stream. Pages and pushed messages arrive independently and possibly more
//! than once; the engine keeps one ordered, de-duplicated view per chat.
//!
//! ## Core Concepts
//!
//! - **Scope**: one chat of one bot, with its own search term and paging
//! - **Pages**: history fetched by offset, committed all-or-nothing
//! - **Live tail**: pushed messages and optimistic local echoes
//! - **Known ids**: the dedup index over pages and live tail
//! - **Views**: every applied change publishes a new merged snapshot
//!
//! ## Example
//!
//! ```ignore
//! use chatsync::{Reconciler, ReconcilerConfig, ScopeId};
//!
//! let reconciler = Reconciler::new(Arc::new(transport), ReconcilerConfig::default());
//! let scope = ScopeId::parse(bot_id, chat_id)?;
//!
//! // Load the newest page and attach the live stream
//! let view = reconciler.activate(&scope, "")?;
//!
//! // Older history
//! reconciler.next_page(&scope)?;
//!
//! // Search resets paging and reloads
//! reconciler.set_search(&scope, "hello")?;
//!
//! // Optimistic send
//! reconciler.send(&scope, "hi there")?;
//!
//! reconciler.deactivate(&scope)?;
//! ```

pub mod engine;
pub mod error;
pub mod feed;
pub mod known;
pub mod live;
pub mod ordering;
pub mod pages;
pub mod search;
pub mod transport;
pub mod types;

// Re-exports
pub use engine::{
    merge, MergedView, Pagination, ReconciliationState, Reconciler, ReconcilerConfig, ScopePhase,
};
pub use error::{Result, SyncError, TransportError};
pub use feed::{DropReason, FeedConfig, FeedFilter, FeedHandle, FeedId, ViewEvent, ViewFeed};
pub use known::{KnownIds, Origin};
pub use live::{LiveBuffer, LiveOutcome, LiveSink, LiveSubscription};
pub use ordering::{compare, is_canonical, same_message, OrderKey};
pub use pages::{InFlightLoads, PageStore};
pub use search::SearchPredicate;
pub use transport::ChatTransport;
pub use types::*;
