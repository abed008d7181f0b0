//! Transport-bound service shells.
//!
//! A shell owns exactly one transport, starts it on creation and pipes every
//! decoded frame into a shared `MessageRouter`. Callers only see `send` and
//! connection hooks; the transport itself stays private.

use std::sync::{Arc, RwLock, Weak};
use std::time::Instant;

use async_trait::async_trait;

use overlink_core::error::{OverlinkError, Result};
use overlink_core::protocol::{Frame, MessageType, Payload};

use crate::dispatch::{MessageRouter, RouteOutcome};
use crate::obs::BusMetrics;
use crate::transport::{
    ClientConnection, PeerId, RegistryBinding, RegistryTransport, Transport, TransportEvents,
    TransportKind,
};

/// Connection lifecycle callbacks re-exposed to shell owners. All optional.
pub trait ShellHooks: Send + Sync + 'static {
    fn on_client_connected(&self, _peer: PeerId) {}
    fn on_client_disconnected(&self, _peer: PeerId) {}
    fn on_connection_failed(&self, _attempts: u32) {}
}

/// Outbound half of a shell, as seen by protocol objects.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send_frame(&self, ty: MessageType, payload: &[u8]) -> Result<usize>;
}

/// Encode and send a typed payload through any sink.
pub async fn send_payload<P: Payload>(sink: &dyn MessageSink, msg: &P) -> Result<usize> {
    let body = msg.encode_to_bytes();
    sink.send_frame(P::TYPE, &body).await
}

// --------------------
// Event bridge: transport -> router + hooks + metrics
// --------------------

struct ShellEvents {
    name: String,
    kind: TransportKind,
    router: Arc<MessageRouter>,
    hooks: RwLock<Vec<Weak<dyn ShellHooks>>>,
    metrics: Arc<BusMetrics>,
}

impl ShellEvents {
    fn hooks(&self) -> Vec<Arc<dyn ShellHooks>> {
        let mut hooks = self.hooks.write().unwrap_or_else(|e| e.into_inner());
        hooks.retain(|h| h.strong_count() > 0);
        hooks.iter().filter_map(Weak::upgrade).collect()
    }
}

impl TransportEvents for ShellEvents {
    fn on_message(&self, peer: PeerId, frame: Frame) {
        let kind = self.kind.as_str();
        let ty = frame.ty.as_str();
        self.metrics
            .frames_received
            .inc(&[("transport", kind), ("type", ty)]);

        let started = Instant::now();
        let outcome = self.router.dispatch(frame.ty, &frame.payload);
        self.metrics
            .dispatch_duration
            .observe(&[("type", ty)], started.elapsed());

        match outcome {
            RouteOutcome::Handled => {}
            RouteOutcome::Failed => self.metrics.handler_failures.inc(&[("type", ty)]),
            other => {
                tracing::debug!(shell = %self.name, peer, %ty, outcome = other.as_str(), "message not handled");
                self.metrics
                    .unrouted
                    .inc(&[("type", ty), ("outcome", other.as_str())]);
            }
        }
    }

    fn on_connected(&self, peer: PeerId) {
        self.metrics
            .peers_connected
            .inc(&[("transport", self.kind.as_str())]);
        for h in self.hooks() {
            h.on_client_connected(peer);
        }
    }

    fn on_disconnected(&self, peer: PeerId) {
        self.metrics
            .peers_connected
            .dec(&[("transport", self.kind.as_str())]);
        for h in self.hooks() {
            h.on_client_disconnected(peer);
        }
    }

    fn on_connection_failed(&self, attempts: u32) {
        self.metrics
            .connection_failures
            .inc(&[("transport", self.kind.as_str())]);
        for h in self.hooks() {
            h.on_connection_failed(attempts);
        }
    }

    fn on_decode_error(&self, _peer: PeerId, err: &OverlinkError) {
        self.metrics
            .decode_errors
            .inc(&[("transport", self.kind.as_str()), ("code", err.code().as_str())]);
    }
}

// --------------------
// Shell
// --------------------

/// One running transport plus the router it feeds.
pub struct ServiceShell<T: Transport + ?Sized> {
    name: String,
    transport: Arc<T>,
    events: Arc<ShellEvents>,
    metrics: Arc<BusMetrics>,
}

impl<T: Transport + ?Sized> ServiceShell<T> {
    /// Start `transport` and wire it to `router`.
    pub async fn start(
        name: impl Into<String>,
        transport: Arc<T>,
        router: Arc<MessageRouter>,
        metrics: Arc<BusMetrics>,
    ) -> Result<Self> {
        let name = name.into();
        let kind = transport.kind();
        let events = Arc::new(ShellEvents {
            name: name.clone(),
            kind,
            router,
            hooks: RwLock::new(Vec::new()),
            metrics: Arc::clone(&metrics),
        });

        let sink: Arc<dyn TransportEvents> = events.clone();
        transport.start(sink).await?;
        tracing::info!(shell = %name, %kind, "service shell started");

        Ok(Self {
            name,
            transport,
            events,
            metrics,
        })
    }

    /// Register connection hooks. Peers already attached are reported through
    /// `on_client_connected` right away; later events follow as they happen.
    ///
    /// Held weakly: protocol objects usually own an `Arc` of this shell, and
    /// the caller keeps the hooks alive.
    pub fn add_hooks(&self, hooks: Arc<dyn ShellHooks>) {
        self.events
            .hooks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::downgrade(&hooks));
        for peer in self.transport.peers() {
            hooks.on_client_connected(peer);
        }
    }

    /// Peers attached right now.
    pub fn peers(&self) -> Vec<PeerId> {
        self.transport.peers()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> TransportKind {
        self.transport.kind()
    }

    pub fn router(&self) -> &Arc<MessageRouter> {
        &self.events.router
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub fn status(&self) -> serde_json::Value {
        self.transport.status()
    }

    pub async fn send(&self, ty: MessageType, payload: &[u8]) -> Result<usize> {
        let kind = self.kind().as_str();
        match self.transport.send(ty, payload).await {
            Ok(n) => {
                self.metrics
                    .frames_sent
                    .inc(&[("transport", kind), ("type", ty.as_str())]);
                Ok(n)
            }
            Err(e) => {
                tracing::debug!(shell = %self.name, %ty, error = %e, "send failed");
                self.metrics
                    .send_failures
                    .inc(&[("transport", kind), ("code", e.code().as_str())]);
                Err(e)
            }
        }
    }

    pub async fn send_payload<P: Payload>(&self, msg: &P) -> Result<usize> {
        let body = msg.encode_to_bytes();
        self.send(P::TYPE, &body).await
    }

    /// Stop the transport. Peers get their disconnect events; later sends fail
    /// with `NotConnected`.
    pub fn shutdown(&self) {
        self.transport.stop();
        tracing::info!(shell = %self.name, "service shell stopped");
    }
}

impl<T: Transport + ?Sized> Drop for ServiceShell<T> {
    fn drop(&mut self) {
        self.transport.stop();
    }
}

#[async_trait]
impl<T: Transport + ?Sized> MessageSink for ServiceShell<T> {
    async fn send_frame(&self, ty: MessageType, payload: &[u8]) -> Result<usize> {
        self.send(ty, payload).await
    }
}

impl ServiceShell<RegistryTransport> {
    /// Liveness indicator: `client_count() > 0` means someone is listening.
    pub fn client_count(&self) -> usize {
        self.transport.client_count()
    }

    pub fn clients(&self) -> Vec<ClientConnection> {
        self.transport.clients()
    }

    pub fn bind(&self, label: impl Into<String>) -> Result<RegistryBinding> {
        self.transport.bind(label)
    }

    pub fn unbind_client(&self, id: PeerId) -> bool {
        self.transport.unbind_client(id)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::transport::RegistryOptions;

    use super::*;

    #[derive(Default)]
    struct Tally {
        up: AtomicUsize,
        down: AtomicUsize,
    }

    impl ShellHooks for Tally {
        fn on_client_connected(&self, _peer: PeerId) {
            self.up.fetch_add(1, Ordering::SeqCst);
        }
        fn on_client_disconnected(&self, _peer: PeerId) {
            self.down.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn shell_routes_counts_and_reports_hooks() {
        let router = Arc::new(MessageRouter::new());
        let metrics = Arc::new(BusMetrics::default());
        let shell = ServiceShell::start(
            "test",
            Arc::new(RegistryTransport::new(RegistryOptions::default())),
            Arc::clone(&router),
            Arc::clone(&metrics),
        )
        .await
        .unwrap();
        let tally = Arc::new(Tally::default());
        shell.add_hooks(tally.clone());

        router.register_fn(MessageType::VirtualKeyboardInput, |_| Ok(true));

        let client = shell.bind("ui").unwrap();
        client.send(MessageType::VirtualKeyboardInput, &[0; 9]).unwrap();
        client.send(MessageType::ConfigUpdate, &[]).unwrap();

        assert_eq!(
            metrics.frames_received.get(&[("transport", "registry"), ("type", "VIRTUAL_KEYBOARD_INPUT")]),
            1
        );
        assert_eq!(
            metrics.unrouted.get(&[("type", "CONFIG_UPDATE"), ("outcome", "no_handler")]),
            1
        );
        assert_eq!(metrics.peers_connected.get(&[("transport", "registry")]), 1);

        drop(client);
        assert_eq!(tally.up.load(Ordering::SeqCst), 1);
        assert_eq!(tally.down.load(Ordering::SeqCst), 1);
        assert_eq!(metrics.peers_connected.get(&[("transport", "registry")]), 0);

        shell.shutdown();
        let err = shell.send(MessageType::OverlayControl, &[1]).await.unwrap_err();
        assert_eq!(err.code().as_str(), "NOT_CONNECTED");
        assert_eq!(
            metrics.send_failures.get(&[("transport", "registry"), ("code", "NOT_CONNECTED")]),
            1
        );
    }
}
