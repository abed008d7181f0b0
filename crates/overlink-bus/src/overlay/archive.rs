//! Archive info request/reply and archive seek.

use std::sync::{Arc, Mutex, Weak};

use tokio::sync::watch;

use overlink_core::error::{OverlinkError, Result};
use overlink_core::protocol::payload::{ArchiveInfo, ArchivePositionSetRequest};
use overlink_core::protocol::{MessageType, Payload};

use crate::dispatch::MessageRouter;
use crate::overlay::spawn_send;
use crate::shell::{send_payload, MessageSink};

#[derive(Debug, Default)]
struct RequestState {
    awaiting: bool,
    requests: u64,
    replies: u64,
}

/// Asking side (control surface). Tracks whether it asked; replies that
/// arrive unasked are still recorded.
pub struct ArchiveRequester {
    sink: Arc<dyn MessageSink>,
    state: Mutex<RequestState>,
    latest: watch::Sender<Option<ArchiveInfo>>,
}

impl ArchiveRequester {
    pub fn new(sink: Arc<dyn MessageSink>) -> Arc<Self> {
        let (latest, _) = watch::channel(None);
        Arc::new(Self {
            sink,
            state: Mutex::new(RequestState::default()),
            latest,
        })
    }

    fn state(&self) -> std::sync::MutexGuard<'_, RequestState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register the ARCHIVE_INFO reply handler (replaces any previous one).
    pub fn install(self: &Arc<Self>, router: &MessageRouter) {
        let weak: Weak<Self> = Arc::downgrade(self);
        router.register_fn(MessageType::ArchiveInfo, move |payload| match weak.upgrade() {
            Some(this) => this.on_reply(payload),
            None => Ok(false),
        });
    }

    pub fn uninstall(&self, router: &MessageRouter) {
        router.clear_handlers(MessageType::ArchiveInfo);
    }

    /// Send the empty request. `awaiting` is set before the send so a fast
    /// reply cannot race it.
    pub async fn request(&self) -> Result<()> {
        {
            let mut s = self.state();
            s.awaiting = true;
            s.requests += 1;
        }
        match send_payload(self.sink.as_ref(), &ArchiveInfo::request()).await {
            Ok(_) => Ok(()),
            Err(e) => {
                self.state().awaiting = false;
                Err(e)
            }
        }
    }

    /// Fire-and-forget seek.
    pub async fn seek(&self, seconds: f32) -> Result<()> {
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(OverlinkError::Payload(format!("invalid seek position {seconds}")));
        }
        send_payload(self.sink.as_ref(), &ArchivePositionSetRequest { seconds }).await?;
        Ok(())
    }

    pub fn is_awaiting(&self) -> bool {
        self.state().awaiting
    }

    pub fn replies(&self) -> u64 {
        self.state().replies
    }

    pub fn latest(&self) -> Option<ArchiveInfo> {
        *self.latest.borrow()
    }

    /// Watch replies as they arrive.
    pub fn subscribe(&self) -> watch::Receiver<Option<ArchiveInfo>> {
        self.latest.subscribe()
    }

    fn on_reply(&self, payload: &[u8]) -> Result<bool> {
        let info = ArchiveInfo::decode(payload)?;
        let asked = {
            let mut s = self.state();
            s.replies += 1;
            std::mem::replace(&mut s.awaiting, false)
        };
        if asked {
            tracing::debug!(duration_ms = info.duration_ms, "archive info reply");
        } else {
            tracing::debug!(duration_ms = info.duration_ms, "unsolicited archive info accepted");
        }
        self.latest.send_replace(Some(info));
        Ok(true)
    }
}

/// What the answering side knows about the running archive.
pub trait ArchiveSource: Send + Sync + 'static {
    /// `None` when no archive is playing.
    fn current_archive(&self) -> Option<ArchiveInfo>;

    /// Apply a seek. `false` if it could not be applied.
    fn seek_to(&self, seconds: f32) -> bool;
}

/// Answering side (host). Replies to empty ARCHIVE_INFO requests and forwards
/// seeks to its `ArchiveSource`.
pub struct ArchiveResponder {
    sink: Arc<dyn MessageSink>,
    source: Arc<dyn ArchiveSource>,
}

impl ArchiveResponder {
    pub fn new(sink: Arc<dyn MessageSink>, source: Arc<dyn ArchiveSource>) -> Arc<Self> {
        Arc::new(Self { sink, source })
    }

    pub fn install(self: &Arc<Self>, router: &MessageRouter) {
        let weak = Arc::downgrade(self);
        router.register_fn(MessageType::ArchiveInfo, move |payload| match weak.upgrade() {
            Some(this) => this.on_request(payload),
            None => Ok(false),
        });
        let weak = Arc::downgrade(self);
        router.register_fn(MessageType::ArchivePositionSetRequest, move |payload| {
            match weak.upgrade() {
                Some(this) => this.on_seek(payload),
                None => Ok(false),
            }
        });
    }

    pub fn uninstall(&self, router: &MessageRouter) {
        router.clear_handlers(MessageType::ArchiveInfo);
        router.clear_handlers(MessageType::ArchivePositionSetRequest);
    }

    fn on_request(&self, payload: &[u8]) -> Result<bool> {
        let asked = ArchiveInfo::decode(payload)?;
        if asked != ArchiveInfo::request() {
            // A populated instance is somebody else's reply (relayed), not a request.
            return Ok(false);
        }
        let reply = self.source.current_archive().unwrap_or_default();
        tracing::debug!(duration_ms = reply.duration_ms, "answering archive info request");
        spawn_send(Arc::clone(&self.sink), MessageType::ArchiveInfo, reply.encode_to_bytes());
        Ok(true)
    }

    fn on_seek(&self, payload: &[u8]) -> Result<bool> {
        let req = ArchivePositionSetRequest::decode(payload)?;
        tracing::debug!(seconds = req.seconds, "archive seek");
        Ok(self.source.seek_to(req.seconds))
    }
}
