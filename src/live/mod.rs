//! Live message stream handling.
//!
//! The transport pushes messages through a [`LiveSink`]; the engine applies
//! them to a per-scope [`LiveBuffer`]. Delivery is at-least-once, so every
//! insertion goes through the known-id check.

mod buffer;
mod sink;

pub use buffer::{LiveBuffer, LiveOutcome};
pub use sink::{LiveSink, LiveSubscription};
