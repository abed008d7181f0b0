//! Transport layer.
//!
//! Both carriers speak the same envelope (`overlink_core::protocol`):
//! - `stream`: one duplex Unix socket, one active peer (server or client role)
//! - `registry`: N bound clients, broadcast send, per-client lifecycle
//!
//! Transports never see the router. They push decoded frames and lifecycle
//! events into a `TransportEvents` sink owned by the service shell.

pub mod codec;
pub mod registry;
pub mod stream;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use overlink_core::error::{OverlinkError, Result};
use overlink_core::protocol::{Frame, MessageType};

pub use registry::{ClientConnection, RegistryBinding, RegistryOptions, RegistryTransport};
pub use stream::{ReconnectPolicy, StreamClient, StreamServer, StreamStatus};

/// Peer identity as seen by one transport (connection seq or registry client id).
pub type PeerId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    StreamServer,
    StreamClient,
    Registry,
}

impl TransportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransportKind::StreamServer => "stream_server",
            TransportKind::StreamClient => "stream_client",
            TransportKind::Registry => "registry",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event sink a transport reports into. Called from transport tasks.
pub trait TransportEvents: Send + Sync + 'static {
    fn on_message(&self, peer: PeerId, frame: Frame);
    fn on_connected(&self, peer: PeerId);
    fn on_disconnected(&self, peer: PeerId);
    /// A client-role connect round gave up after `attempts` tries.
    fn on_connection_failed(&self, _attempts: u32) {}
    /// A peer sent bytes that failed framing. The connection is dropped after this.
    fn on_decode_error(&self, _peer: PeerId, _err: &OverlinkError) {}
}

/// The single capability a service shell needs from a carrier.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    fn kind(&self) -> TransportKind;

    /// Bind/connect and start background tasks. Events flow into `events`
    /// until `stop`.
    async fn start(&self, events: Arc<dyn TransportEvents>) -> Result<()>;

    /// Cancel every task and drop every peer. Idempotent and non-blocking.
    fn stop(&self);

    /// Write one frame. Returns the number of peers that accepted it.
    async fn send(&self, ty: MessageType, payload: &[u8]) -> Result<usize>;

    fn is_connected(&self) -> bool;

    /// Peers attached right now.
    fn peers(&self) -> Vec<PeerId>;

    /// Snapshot for logs and diagnostics.
    fn status(&self) -> serde_json::Value;
}
