//! Historical pages.
//!
//! Pages are fetched by offset and kept until the scope is reset. Identical
//! concurrent fetches are coalesced so a page is applied once.

mod inflight;
mod store;

pub use inflight::{Claim, InFlightLoads};
pub use store::PageStore;
