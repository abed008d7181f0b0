//! Single-peer duplex stream transport over a Unix domain socket.
//!
//! Server role binds a well-known path and accepts; a new inbound connection
//! preempts the current one (old peer's disconnect fires before the new
//! peer's connect). Client role connects with bounded exponential backoff and
//! reconnects on loss until stopped.
//!
//! Every connection gets one read task. Decoded frames are handed to the
//! event sink on that task, so per-connection order is preserved.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use overlink_core::error::{OverlinkError, Result};
use overlink_core::protocol::MessageType;

use crate::transport::codec::{encode_outbound, write_frame, FrameReader};
use crate::transport::{PeerId, Transport, TransportEvents, TransportKind};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

// --------------------
// Reconnect policy
// --------------------

/// Client-role retry schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Attempts per round before `on_connection_failed` fires. 0 = never give up.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_millis(2000),
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Delay after the `attempt`-th failure (1-based): doubles, capped at `max_backoff`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << shift)
            .min(self.max_backoff)
    }
}

// --------------------
// Shared endpoint state
// --------------------

struct PeerLink {
    id: PeerId,
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    closed: AtomicBool,
    gone: Notify,
    reader: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Default)]
struct LinkStats {
    frames_sent: AtomicU64,
    frames_received: AtomicU64,
    connection_attempts: AtomicU64,
    connections: AtomicU64,
}

/// Diagnostics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct StreamStatus {
    pub kind: TransportKind,
    pub path: String,
    pub connected: bool,
    pub peer: Option<PeerId>,
    pub frames_sent: u64,
    pub frames_received: u64,
    pub connection_attempts: u64,
    pub connections: u64,
}

struct Endpoint {
    kind: TransportKind,
    path: PathBuf,
    current: Mutex<Option<Arc<PeerLink>>>,
    events: RwLock<Option<Arc<dyn TransportEvents>>>,
    seq: AtomicU64,
    stats: LinkStats,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    bound: AtomicBool,
}

impl Endpoint {
    fn new(kind: TransportKind, path: PathBuf) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            kind,
            path,
            current: Mutex::new(None),
            events: RwLock::new(None),
            seq: AtomicU64::new(1),
            stats: LinkStats::default(),
            shutdown,
            tasks: Mutex::new(Vec::new()),
            bound: AtomicBool::new(false),
        })
    }

    fn events(&self) -> Option<Arc<dyn TransportEvents>> {
        self.events
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn set_events(&self, events: Option<Arc<dyn TransportEvents>>) {
        *self.events.write().unwrap_or_else(|e| e.into_inner()) = events;
    }

    fn current(&self) -> Option<Arc<PeerLink>> {
        lock(&self.current).clone()
    }

    /// Make `stream` the active peer, preempting any previous one.
    fn install(self: &Arc<Self>, stream: UnixStream) -> Arc<PeerLink> {
        let (rd, wr) = stream.into_split();
        let id = self.seq.fetch_add(1, Ordering::Relaxed);
        let link = Arc::new(PeerLink {
            id,
            writer: tokio::sync::Mutex::new(wr),
            closed: AtomicBool::new(false),
            gone: Notify::new(),
            reader: Mutex::new(None),
        });

        let prev = lock(&self.current).replace(Arc::clone(&link));
        if let Some(prev) = prev {
            self.close_link(&prev, "preempted");
        }

        self.stats.connections.fetch_add(1, Ordering::Relaxed);
        tracing::info!(kind = %self.kind, peer = id, path = %self.path.display(), "peer connected");
        if let Some(ev) = self.events() {
            ev.on_connected(id);
        }

        let handle = tokio::spawn(read_loop(
            Arc::clone(self),
            Arc::clone(&link),
            FrameReader::new(rd),
            self.shutdown.subscribe(),
        ));
        *lock(&link.reader) = Some(handle);
        link
    }

    /// Tear down one link. Only the first caller fires the disconnect event.
    fn close_link(&self, link: &Arc<PeerLink>, reason: &'static str) {
        if link.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        {
            let mut cur = lock(&self.current);
            if cur.as_ref().is_some_and(|c| c.id == link.id) {
                *cur = None;
            }
        }
        if let Some(h) = lock(&link.reader).take() {
            h.abort();
        }
        link.gone.notify_one();

        tracing::info!(kind = %self.kind, peer = link.id, reason, "peer disconnected");
        if let Some(ev) = self.events() {
            ev.on_disconnected(link.id);
        }
    }

    async fn send(&self, ty: MessageType, payload: &[u8]) -> Result<usize> {
        let wire = encode_outbound(ty, payload)?;
        let Some(link) = self.current() else {
            return Err(OverlinkError::NotConnected);
        };
        if link.closed.load(Ordering::Acquire) {
            return Err(OverlinkError::NotConnected);
        }

        let res = {
            let mut w = link.writer.lock().await;
            write_frame(&mut *w, &wire).await
        };
        match res {
            Ok(()) => {
                self.stats.frames_sent.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(kind = %self.kind, peer = link.id, %ty, len = payload.len(), "frame sent");
                Ok(1)
            }
            Err(e) => {
                tracing::warn!(kind = %self.kind, peer = link.id, %ty, error = %e, "write failed");
                self.close_link(&link, "write failed");
                Err(OverlinkError::NotConnected)
            }
        }
    }

    fn stop(&self) {
        self.shutdown.send_replace(true);
        for t in lock(&self.tasks).drain(..) {
            t.abort();
        }
        if let Some(link) = self.current() {
            self.close_link(&link, "stopped");
        }
        if self.bound.swap(false, Ordering::AcqRel) {
            if let Err(e) = std::fs::remove_file(&self.path) {
                tracing::debug!(path = %self.path.display(), error = %e, "socket cleanup skipped");
            }
        }
        self.set_events(None);
    }

    fn status(&self) -> StreamStatus {
        let cur = self.current();
        StreamStatus {
            kind: self.kind,
            path: self.path.display().to_string(),
            connected: cur.is_some(),
            peer: cur.map(|l| l.id),
            frames_sent: self.stats.frames_sent.load(Ordering::Relaxed),
            frames_received: self.stats.frames_received.load(Ordering::Relaxed),
            connection_attempts: self.stats.connection_attempts.load(Ordering::Relaxed),
            connections: self.stats.connections.load(Ordering::Relaxed),
        }
    }
}

async fn read_loop(
    ep: Arc<Endpoint>,
    link: Arc<PeerLink>,
    mut reader: FrameReader<tokio::net::unix::OwnedReadHalf>,
    mut shutdown: watch::Receiver<bool>,
) {
    let reason = loop {
        tokio::select! {
            _ = shutdown.changed() => break "shutdown",
            res = reader.next_frame() => match res {
                Ok(Some(frame)) => {
                    ep.stats.frames_received.fetch_add(1, Ordering::Relaxed);
                    tracing::trace!(kind = %ep.kind, peer = link.id, ty = %frame.ty, len = frame.payload.len(), "frame received");
                    if let Some(ev) = ep.events() {
                        ev.on_message(link.id, frame);
                    }
                }
                Ok(None) => break "eof",
                Err(e) if e.is_connection_fatal() => {
                    tracing::warn!(kind = %ep.kind, peer = link.id, error = %e, "framing violation, dropping peer");
                    if let Some(ev) = ep.events() {
                        ev.on_decode_error(link.id, &e);
                    }
                    break "framing";
                }
                Err(e) => {
                    tracing::debug!(kind = %ep.kind, peer = link.id, error = %e, "read failed");
                    break "read error";
                }
            }
        }
    };
    ep.close_link(&link, reason);
}

/// Wait for shutdown or `d`, whichever comes first. `true` when shutting down.
async fn sleep_or_shutdown(d: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(d) => false,
        _ = shutdown.changed() => true,
    }
}

// --------------------
// Server role
// --------------------

/// Listening side. At most one active peer.
pub struct StreamServer {
    ep: Arc<Endpoint>,
}

impl StreamServer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            ep: Endpoint::new(TransportKind::StreamServer, path.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.ep.path
    }

    pub fn stream_status(&self) -> StreamStatus {
        self.ep.status()
    }
}

#[async_trait]
impl Transport for StreamServer {
    fn kind(&self) -> TransportKind {
        TransportKind::StreamServer
    }

    async fn start(&self, events: Arc<dyn TransportEvents>) -> Result<()> {
        let ep = Arc::clone(&self.ep);
        // A live listener owns the path; unlinking it would orphan that listener.
        if ep.bound.load(Ordering::Acquire) {
            return Err(OverlinkError::TransportSetup(format!(
                "already listening on {}",
                ep.path.display()
            )));
        }
        match std::fs::remove_file(&ep.path) {
            Ok(()) => tracing::debug!(path = %ep.path.display(), "removed stale socket"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(OverlinkError::TransportSetup(format!(
                    "cannot clear {}: {e}",
                    ep.path.display()
                )))
            }
        }
        let listener = UnixListener::bind(&ep.path).map_err(|e| {
            OverlinkError::TransportSetup(format!("bind {}: {e}", ep.path.display()))
        })?;

        ep.bound.store(true, Ordering::Release);
        ep.set_events(Some(events));
        ep.shutdown.send_replace(false);
        tracing::info!(path = %ep.path.display(), "stream server listening");

        let mut shutdown = ep.shutdown.subscribe();
        let acceptor = Arc::clone(&ep);
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    res = listener.accept() => match res {
                        Ok((stream, _)) => {
                            acceptor.stats.connection_attempts.fetch_add(1, Ordering::Relaxed);
                            acceptor.install(stream);
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                            if sleep_or_shutdown(Duration::from_millis(50), &mut shutdown).await {
                                break;
                            }
                        }
                    }
                }
            }
            tracing::debug!(path = %acceptor.path.display(), "accept loop stopped");
        });
        lock(&ep.tasks).push(task);
        Ok(())
    }

    fn stop(&self) {
        self.ep.stop();
    }

    async fn send(&self, ty: MessageType, payload: &[u8]) -> Result<usize> {
        self.ep.send(ty, payload).await
    }

    fn is_connected(&self) -> bool {
        self.ep.current().is_some()
    }

    fn peers(&self) -> Vec<PeerId> {
        self.ep.current().map(|l| l.id).into_iter().collect()
    }

    fn status(&self) -> serde_json::Value {
        serde_json::to_value(self.ep.status()).unwrap_or(serde_json::Value::Null)
    }
}

impl Drop for StreamServer {
    fn drop(&mut self) {
        self.ep.stop();
    }
}

// --------------------
// Client role
// --------------------

enum Round {
    Connected(UnixStream),
    Exhausted(u32),
    Cancelled,
}

/// Connecting side. Reconnects until stopped.
pub struct StreamClient {
    ep: Arc<Endpoint>,
    policy: ReconnectPolicy,
}

impl StreamClient {
    pub fn new(path: impl Into<PathBuf>, policy: ReconnectPolicy) -> Self {
        Self {
            ep: Endpoint::new(TransportKind::StreamClient, path.into()),
            policy,
        }
    }

    pub fn path(&self) -> &Path {
        &self.ep.path
    }

    pub fn stream_status(&self) -> StreamStatus {
        self.ep.status()
    }
}

async fn connect_round(
    ep: &Endpoint,
    policy: &ReconnectPolicy,
    shutdown: &mut watch::Receiver<bool>,
) -> Round {
    let mut attempt: u32 = 0;
    loop {
        attempt = attempt.saturating_add(1);
        ep.stats.connection_attempts.fetch_add(1, Ordering::Relaxed);
        match UnixStream::connect(&ep.path).await {
            Ok(stream) => return Round::Connected(stream),
            Err(e) => {
                tracing::debug!(path = %ep.path.display(), attempt, error = %e, "connect failed");
                if policy.max_attempts != 0 && attempt >= policy.max_attempts {
                    return Round::Exhausted(attempt);
                }
                if sleep_or_shutdown(policy.delay_for(attempt), shutdown).await {
                    return Round::Cancelled;
                }
            }
        }
    }
}

async fn client_loop(ep: Arc<Endpoint>, policy: ReconnectPolicy) {
    let mut shutdown = ep.shutdown.subscribe();
    loop {
        if *shutdown.borrow() {
            break;
        }
        match connect_round(&ep, &policy, &mut shutdown).await {
            Round::Connected(stream) => {
                let link = ep.install(stream);
                tokio::select! {
                    _ = link.gone.notified() => {}
                    _ = shutdown.changed() => break,
                }
                tracing::info!(path = %ep.path.display(), "connection lost, reconnecting");
                if sleep_or_shutdown(policy.initial_backoff, &mut shutdown).await {
                    break;
                }
            }
            Round::Exhausted(attempts) => {
                tracing::warn!(path = %ep.path.display(), attempt = attempts, "connect round failed");
                if let Some(ev) = ep.events() {
                    ev.on_connection_failed(attempts);
                }
                if sleep_or_shutdown(policy.max_backoff, &mut shutdown).await {
                    break;
                }
            }
            Round::Cancelled => break,
        }
    }
    tracing::debug!(path = %ep.path.display(), "client loop stopped");
}

#[async_trait]
impl Transport for StreamClient {
    fn kind(&self) -> TransportKind {
        TransportKind::StreamClient
    }

    async fn start(&self, events: Arc<dyn TransportEvents>) -> Result<()> {
        if !lock(&self.ep.tasks).is_empty() {
            return Err(OverlinkError::TransportSetup(format!(
                "already connecting to {}",
                self.ep.path.display()
            )));
        }
        self.ep.set_events(Some(events));
        self.ep.shutdown.send_replace(false);
        tracing::info!(path = %self.ep.path.display(), "stream client starting");
        let task = tokio::spawn(client_loop(Arc::clone(&self.ep), self.policy.clone()));
        lock(&self.ep.tasks).push(task);
        Ok(())
    }

    fn stop(&self) {
        self.ep.stop();
    }

    async fn send(&self, ty: MessageType, payload: &[u8]) -> Result<usize> {
        self.ep.send(ty, payload).await
    }

    fn is_connected(&self) -> bool {
        self.ep.current().is_some()
    }

    fn peers(&self) -> Vec<PeerId> {
        self.ep.current().map(|l| l.id).into_iter().collect()
    }

    fn status(&self) -> serde_json::Value {
        serde_json::to_value(self.ep.status()).unwrap_or(serde_json::Value::Null)
    }
}

impl Drop for StreamClient {
    fn drop(&mut self) {
        self.ep.stop();
    }
}
