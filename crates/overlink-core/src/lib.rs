//! overlink core: transport-agnostic wire protocol and error types.
//!
//! This crate defines the frame format, the closed message-type table and the
//! typed payload schemas shared by the host-side and control-surface sides of
//! the bus. It depends on no async runtime or logging stack, so the
//! instrumented side can link it without pulling in an executor.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here
//! (`#![deny(clippy::panic, clippy::unwrap_used, clippy::expect_used)]`).
//! All fallible paths must surface as `OverlinkError`/`Result` so a malformed
//! frame from a foreign process never crashes the reader.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod protocol;

/// Shared result type.
pub use error::{ErrorCode, OverlinkError, Result};
