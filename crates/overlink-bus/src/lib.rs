//! overlink bus library entry.
//!
//! Wires the two transports (single-peer stream, multi-client registry), the
//! per-type message router, transport-bound service shells and the overlay
//! control protocol. Consumed by the `overlink-bridge` binary and by
//! integration tests.

#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

pub mod bridge;
pub mod config;
pub mod dispatch;
pub mod obs;
pub mod overlay;
pub mod shell;
pub mod transport;

pub use dispatch::{MessageHandler, MessageRouter};
pub use shell::{MessageSink, ServiceShell, ShellHooks};
pub use transport::{Transport, TransportEvents, TransportKind};
