//! Dispatch module exports.
//!
//! Re-exports the message router and handler trait so transports, shells and
//! overlay code can depend on this module directly.

pub mod router;

pub use router::{MessageHandler, MessageRouter, RouteOutcome};
