//! Multi-client registry transport.
//!
//! Clients are bound either in-process (`bind`) or through a Unix socket
//! (`serve`); each one gets its own bounded outbound queue, so broadcasts keep
//! per-client order without one slow client stalling the rest.
//!
//! - `send` broadcasts over a snapshot of the client list (lossy `try_send`)
//! - inbound frames go to the event sink, and optionally to every other client
//! - unbinding is idempotent; a dropped binding counts as client death

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use serde::Serialize;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use overlink_core::error::{OverlinkError, Result};
use overlink_core::protocol::{decode_exact, Frame, MessageType};

use crate::transport::codec::{encode_outbound, write_frame, FrameReader};
use crate::transport::{PeerId, Transport, TransportEvents, TransportKind};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Construction options.
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    /// Serve Unix-socket clients on this path when started.
    pub socket_path: Option<PathBuf>,
    /// Rebroadcast inbound client frames to every other client.
    pub relay_inbound: bool,
    /// Per-client outbound queue depth.
    pub queue_depth: usize,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            socket_path: None,
            relay_inbound: true,
            queue_depth: 256,
        }
    }
}

/// One bound client, as exposed to liveness checks.
#[derive(Debug, Clone, Serialize)]
pub struct ClientConnection {
    pub id: PeerId,
    pub label: String,
    pub connected_at: SystemTime,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistryStatus {
    pub running: bool,
    pub clients: Vec<ClientConnection>,
    pub frames_broadcast: u64,
    pub frames_received: u64,
    pub frames_relayed: u64,
    pub frames_dropped: u64,
}

struct ClientEntry {
    info: ClientConnection,
    tx: mpsc::Sender<Bytes>,
    tasks: Vec<JoinHandle<()>>,
}

#[derive(Default)]
struct RegistryStats {
    frames_broadcast: AtomicU64,
    frames_received: AtomicU64,
    frames_relayed: AtomicU64,
    frames_dropped: AtomicU64,
}

struct RegistryInner {
    opts: RegistryOptions,
    clients: DashMap<PeerId, ClientEntry>,
    seq: AtomicU64,
    running: AtomicBool,
    events: RwLock<Option<Arc<dyn TransportEvents>>>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    served: Mutex<Vec<PathBuf>>,
    stats: RegistryStats,
}

impl RegistryInner {
    fn events(&self) -> Option<Arc<dyn TransportEvents>> {
        self.events
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn attach(&self, label: String) -> Result<(PeerId, mpsc::Receiver<Bytes>)> {
        if !self.running.load(Ordering::Acquire) {
            return Err(OverlinkError::NotConnected);
        }
        let (tx, rx) = mpsc::channel(self.opts.queue_depth.max(1));
        let id = self.seq.fetch_add(1, Ordering::Relaxed);
        let info = ClientConnection {
            id,
            label,
            connected_at: SystemTime::now(),
        };
        tracing::info!(client_id = id, label = %info.label, "client bound");
        self.clients.insert(
            id,
            ClientEntry {
                info,
                tx,
                tasks: Vec::new(),
            },
        );
        if let Some(ev) = self.events() {
            ev.on_connected(id);
        }
        Ok((id, rx))
    }

    /// Remove a client. `false` if it was already gone.
    fn detach(&self, id: PeerId, reason: &'static str) -> bool {
        let Some((_, entry)) = self.clients.remove(&id) else {
            return false;
        };
        for t in entry.tasks {
            t.abort();
        }
        tracing::info!(client_id = id, label = %entry.info.label, reason, "client unbound");
        if let Some(ev) = self.events() {
            ev.on_disconnected(id);
        }
        true
    }

    /// Fan `wire` out to every client except `except`. Returns accepted count.
    fn broadcast(&self, wire: &Bytes, except: Option<PeerId>) -> usize {
        let targets: Vec<(PeerId, mpsc::Sender<Bytes>)> = self
            .clients
            .iter()
            .filter(|e| Some(*e.key()) != except)
            .map(|e| (*e.key(), e.value().tx.clone()))
            .collect();

        let mut delivered = 0;
        for (id, tx) in targets {
            match tx.try_send(wire.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(client_id = id, "client queue full, frame dropped");
                }
                Err(TrySendError::Closed(_)) => {
                    self.detach(id, "channel closed");
                }
            }
        }
        delivered
    }

    fn inbound(&self, from: PeerId, frame: Frame) {
        self.stats.frames_received.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(client_id = from, ty = %frame.ty, len = frame.payload.len(), "frame from client");
        if self.opts.relay_inbound {
            let n = self.broadcast(&frame.encode(), Some(from));
            self.stats.frames_relayed.fetch_add(n as u64, Ordering::Relaxed);
        }
        if let Some(ev) = self.events() {
            ev.on_message(from, frame);
        }
    }

    fn snapshot(&self) -> Vec<ClientConnection> {
        let mut v: Vec<ClientConnection> =
            self.clients.iter().map(|e| e.value().info.clone()).collect();
        v.sort_by_key(|c| c.id);
        v
    }
}

// --------------------
// Bindings
// --------------------

/// In-process client handle. Dropping it unbinds the client.
pub struct RegistryBinding {
    id: PeerId,
    rx: mpsc::Receiver<Bytes>,
    inner: Arc<RegistryInner>,
    released: bool,
}

impl RegistryBinding {
    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn is_bound(&self) -> bool {
        !self.released && self.inner.clients.contains_key(&self.id)
    }

    /// Next broadcast frame. `None` once the client is unbound and drained.
    pub async fn recv(&mut self) -> Option<Frame> {
        loop {
            let wire = self.rx.recv().await?;
            match decode_exact(wire) {
                Ok(frame) => return Some(frame),
                Err(e) => tracing::warn!(client_id = self.id, error = %e, "dropping malformed broadcast"),
            }
        }
    }

    /// Non-blocking variant of `recv`.
    pub fn try_recv(&mut self) -> Option<Frame> {
        while let Ok(wire) = self.rx.try_recv() {
            match decode_exact(wire) {
                Ok(frame) => return Some(frame),
                Err(e) => tracing::warn!(client_id = self.id, error = %e, "dropping malformed broadcast"),
            }
        }
        None
    }

    /// Send a frame to the service. Routed on the caller's task.
    pub fn send(&self, ty: MessageType, payload: &[u8]) -> Result<()> {
        if !self.is_bound() {
            return Err(OverlinkError::NotConnected);
        }
        let frame = decode_exact(encode_outbound(ty, payload)?)?;
        self.inner.inbound(self.id, frame);
        Ok(())
    }

    pub fn unbind(mut self) {
        self.release("unbound");
    }

    fn release(&mut self, reason: &'static str) {
        if !self.released {
            self.released = true;
            self.inner.detach(self.id, reason);
        }
    }
}

impl Drop for RegistryBinding {
    fn drop(&mut self) {
        self.release("binding dropped");
    }
}

// --------------------
// Transport
// --------------------

pub struct RegistryTransport {
    inner: Arc<RegistryInner>,
}

impl RegistryTransport {
    pub fn new(opts: RegistryOptions) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(RegistryInner {
                opts,
                clients: DashMap::new(),
                seq: AtomicU64::new(1),
                running: AtomicBool::new(false),
                events: RwLock::new(None),
                shutdown,
                tasks: Mutex::new(Vec::new()),
                served: Mutex::new(Vec::new()),
                stats: RegistryStats::default(),
            }),
        }
    }

    /// Attach an in-process client. Fails with `NotConnected` before `start`.
    pub fn bind(&self, label: impl Into<String>) -> Result<RegistryBinding> {
        let (id, rx) = self.inner.attach(label.into())?;
        Ok(RegistryBinding {
            id,
            rx,
            inner: Arc::clone(&self.inner),
            released: false,
        })
    }

    /// Force-unbind a client by id. Idempotent.
    pub fn unbind_client(&self, id: PeerId) -> bool {
        self.inner.detach(id, "unbound by service")
    }

    pub fn client_count(&self) -> usize {
        self.inner.clients.len()
    }

    pub fn clients(&self) -> Vec<ClientConnection> {
        self.inner.snapshot()
    }

    pub fn registry_status(&self) -> RegistryStatus {
        let s = &self.inner.stats;
        RegistryStatus {
            running: self.inner.running.load(Ordering::Acquire),
            clients: self.inner.snapshot(),
            frames_broadcast: s.frames_broadcast.load(Ordering::Relaxed),
            frames_received: s.frames_received.load(Ordering::Relaxed),
            frames_relayed: s.frames_relayed.load(Ordering::Relaxed),
            frames_dropped: s.frames_dropped.load(Ordering::Relaxed),
        }
    }

    /// Accept socket clients on `path`; each connection becomes one bound client.
    pub fn serve(&self, path: &Path) -> Result<()> {
        if !self.inner.running.load(Ordering::Acquire) {
            return Err(OverlinkError::NotConnected);
        }
        match std::fs::remove_file(path) {
            Ok(()) => tracing::debug!(path = %path.display(), "removed stale socket"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(OverlinkError::TransportSetup(format!(
                    "cannot clear {}: {e}",
                    path.display()
                )))
            }
        }
        let listener = UnixListener::bind(path)
            .map_err(|e| OverlinkError::TransportSetup(format!("bind {}: {e}", path.display())))?;
        lock(&self.inner.served).push(path.to_path_buf());
        tracing::info!(path = %path.display(), "registry serving socket clients");

        let inner = Arc::clone(&self.inner);
        let mut shutdown = inner.shutdown.subscribe();
        let task = tokio::spawn(async move {
            let mut accepted: u64 = 0;
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    res = listener.accept() => match res {
                        Ok((stream, _)) => {
                            accepted += 1;
                            match inner.attach(format!("socket-{accepted}")) {
                                Ok((id, rx)) => spawn_socket_client(&inner, id, rx, stream),
                                Err(e) => tracing::debug!(error = %e, "registry stopped, refusing client"),
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                        }
                    }
                }
            }
            tracing::debug!("registry accept loop stopped");
        });
        lock(&self.inner.tasks).push(task);
        Ok(())
    }
}

fn spawn_socket_client(
    inner: &Arc<RegistryInner>,
    id: PeerId,
    mut rx: mpsc::Receiver<Bytes>,
    stream: UnixStream,
) {
    let (rd, mut wr) = stream.into_split();

    let w_inner = Arc::clone(inner);
    let writer = tokio::spawn(async move {
        while let Some(wire) = rx.recv().await {
            if let Err(e) = write_frame(&mut wr, &wire).await {
                tracing::debug!(client_id = id, error = %e, "client write failed");
                break;
            }
        }
        w_inner.detach(id, "write closed");
    });

    let r_inner = Arc::clone(inner);
    let mut shutdown = inner.shutdown.subscribe();
    let reader = tokio::spawn(async move {
        let mut frames = FrameReader::new(rd);
        let reason = loop {
            tokio::select! {
                _ = shutdown.changed() => break "shutdown",
                res = frames.next_frame() => match res {
                    Ok(Some(frame)) => r_inner.inbound(id, frame),
                    Ok(None) => break "eof",
                    Err(e) if e.is_connection_fatal() => {
                        tracing::warn!(client_id = id, error = %e, "framing violation, dropping client");
                        if let Some(ev) = r_inner.events() {
                            ev.on_decode_error(id, &e);
                        }
                        break "framing";
                    }
                    Err(e) => {
                        tracing::debug!(client_id = id, error = %e, "client read failed");
                        break "read error";
                    }
                }
            }
        };
        r_inner.detach(id, reason);
    });

    match inner.clients.get_mut(&id) {
        Some(mut entry) => entry.tasks = vec![writer, reader],
        None => {
            writer.abort();
            reader.abort();
        }
    }
}

#[async_trait]
impl Transport for RegistryTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Registry
    }

    async fn start(&self, events: Arc<dyn TransportEvents>) -> Result<()> {
        *self.inner.events.write().unwrap_or_else(|e| e.into_inner()) = Some(events);
        self.inner.shutdown.send_replace(false);
        self.inner.running.store(true, Ordering::Release);
        tracing::info!(relay_inbound = self.inner.opts.relay_inbound, "registry transport started");

        if let Some(path) = self.inner.opts.socket_path.clone() {
            if let Err(e) = self.serve(&path) {
                self.stop();
                return Err(e);
            }
        }
        Ok(())
    }

    fn stop(&self) {
        let was_running = self.inner.running.swap(false, Ordering::AcqRel);
        self.inner.shutdown.send_replace(true);
        for t in lock(&self.inner.tasks).drain(..) {
            t.abort();
        }
        let ids: Vec<PeerId> = self.inner.clients.iter().map(|e| *e.key()).collect();
        for id in ids {
            self.inner.detach(id, "stopped");
        }
        for path in lock(&self.inner.served).drain(..) {
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::debug!(path = %path.display(), error = %e, "socket cleanup skipped");
            }
        }
        *self.inner.events.write().unwrap_or_else(|e| e.into_inner()) = None;
        if was_running {
            tracing::info!("registry transport stopped");
        }
    }

    async fn send(&self, ty: MessageType, payload: &[u8]) -> Result<usize> {
        if !self.inner.running.load(Ordering::Acquire) {
            return Err(OverlinkError::NotConnected);
        }
        let wire = encode_outbound(ty, payload)?;
        let n = self.inner.broadcast(&wire, None);
        if n == 0 && self.inner.clients.is_empty() {
            return Err(OverlinkError::NotConnected);
        }
        self.inner.stats.frames_broadcast.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(%ty, len = payload.len(), clients = n, "frame broadcast");
        Ok(n)
    }

    fn is_connected(&self) -> bool {
        self.inner.running.load(Ordering::Acquire) && !self.inner.clients.is_empty()
    }

    fn peers(&self) -> Vec<PeerId> {
        self.inner.snapshot().into_iter().map(|c| c.id).collect()
    }

    fn status(&self) -> serde_json::Value {
        serde_json::to_value(self.registry_status()).unwrap_or(serde_json::Value::Null)
    }
}

impl Drop for RegistryTransport {
    fn drop(&mut self) {
        self.stop();
    }
}
