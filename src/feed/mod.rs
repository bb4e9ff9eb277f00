//! Observers of published merged views.
//!
//! Every time a scope's merged view changes, the new snapshot is broadcast
//! to matching feed subscribers:
//! - View snapshots (one per applied event or page)
//! - Errors surfaced for a scope
//! - Scope deactivation
//!
//! Feeds use bounded buffers; a subscriber that falls behind is dropped.
//!
//! # Example
//!
//! ```ignore
//! let handle = reconciler.subscribe_views(FeedConfig {
//!     filter: FeedFilter::scope(scope.clone()),
//!     ..Default::default()
//! });
//!
//! loop {
//!     match handle.recv() {
//!         Ok(ViewEvent::View { view }) => render(&view.messages),
//!         Ok(ViewEvent::Error { message, .. }) => show_error(&message),
//!         Ok(ViewEvent::Deactivated { .. }) | Ok(ViewEvent::Dropped { .. }) => break,
//!         Err(_) => break,
//!     }
//! }
//! ```

mod manager;
mod types;

pub use manager::ViewFeed;
pub use types::{DropReason, FeedConfig, FeedFilter, FeedHandle, FeedId, ViewEvent};
