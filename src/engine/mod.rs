//! Reconciliation engine.
//!
//! One [`ScopeState`](state::ScopeState) per active scope, driven through
//! `Uninitialized -> Loading -> Ready -> Resetting -> Loading -> Ready`.
//! Page loads and live events mutate it only under its lock, and each
//! mutation publishes exactly one new [`MergedView`].

mod merge;
mod pagination;
mod reconciler;
mod state;

pub use merge::merge;
pub use pagination::Pagination;
pub use reconciler::{Reconciler, ReconcilerConfig};
pub use state::{MergedView, ReconciliationState, ScopePhase};

pub(crate) use reconciler::Inner;
