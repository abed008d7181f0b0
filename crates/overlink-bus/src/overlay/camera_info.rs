//! Camera-info streaming: the host-side `PoseStreamer` and the overlay-side
//! `CameraInfoChannel` state machine.
//!
//! ```text
//! Idle --start sent--> Streaming --stop sent | peer disconnect--> Idle
//! ```
//!
//! Inside Streaming the overlay shows a placeholder until a valid,
//! non-connecting pose younger than `stale_after` has arrived. There is no
//! ack frame; data frames are the liveness signal.
//!
//! Both sides track which peers their shell has attached. On a registry shell
//! one client leaving does not end a stream another client still watches;
//! only the last peer going away resets the state.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::task::JoinHandle;

use overlink_core::error::{OverlinkError, Result};
use overlink_core::protocol::payload::{CameraInfoOverlayControl, CameraPose, OverlayAction};
use overlink_core::protocol::{MessageType, Payload};

use crate::dispatch::MessageRouter;
use crate::shell::{send_payload, MessageSink, ShellHooks};
use crate::transport::PeerId;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Peers the owning shell reported as attached.
#[derive(Default)]
struct AttachedPeers(Mutex<HashSet<PeerId>>);

impl AttachedPeers {
    fn attach(&self, peer: PeerId) {
        lock(&self.0).insert(peer);
    }

    /// Forget `peer`. `true` when no peer is left.
    fn detach(&self, peer: PeerId) -> bool {
        let mut peers = lock(&self.0);
        peers.remove(&peer);
        peers.is_empty()
    }
}

// --------------------
// Host side
// --------------------

/// Where the streamer reads the current pose from.
pub trait PoseSource: Send + Sync + 'static {
    /// `None` (or an invalid pose) while the host has nothing to report yet.
    fn current_pose(&self) -> Option<CameraPose>;
}

impl<F> PoseSource for F
where
    F: Fn() -> Option<CameraPose> + Send + Sync + 'static,
{
    fn current_pose(&self) -> Option<CameraPose> {
        self()
    }
}

/// Latest pose received from upstream, served while younger than `stale_after`.
///
/// Lets a relay re-emit an upstream feed at its own cadence: once upstream goes
/// quiet the source reports nothing and the streamer falls back to placeholders.
pub struct LatestPose {
    stale_after: Duration,
    last: Mutex<Option<(CameraPose, Instant)>>,
}

impl LatestPose {
    pub fn new(stale_after: Duration) -> Arc<Self> {
        Arc::new(Self {
            stale_after,
            last: Mutex::new(None),
        })
    }

    pub fn record(&self, pose: CameraPose) {
        *lock(&self.last) = Some((pose, Instant::now()));
    }

    pub fn current_at(&self, now: Instant) -> Option<CameraPose> {
        lock(&self.last)
            .as_ref()
            .filter(|(_, at)| now.saturating_duration_since(*at) <= self.stale_after)
            .map(|(pose, _)| pose.clone())
    }
}

impl PoseSource for LatestPose {
    fn current_pose(&self) -> Option<CameraPose> {
        self.current_at(Instant::now())
    }
}

/// Pushes CAMERA_DATA at a fixed cadence while the camera-info overlay is on.
pub struct PoseStreamer {
    sink: Arc<dyn MessageSink>,
    source: Arc<dyn PoseSource>,
    interval: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
    sent: Arc<AtomicU64>,
    peers: AttachedPeers,
}

impl PoseStreamer {
    pub fn new(
        sink: Arc<dyn MessageSink>,
        source: Arc<dyn PoseSource>,
        interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            sink,
            source,
            interval: interval.max(Duration::from_millis(1)),
            task: Mutex::new(None),
            sent: Arc::new(AtomicU64::new(0)),
            peers: AttachedPeers::default(),
        })
    }

    /// Register the OVERLAY_CONTROL_CAMERA_INFO handler.
    pub fn install(self: &Arc<Self>, router: &MessageRouter) {
        let weak: Weak<Self> = Arc::downgrade(self);
        router.register_fn(MessageType::OverlayControlCameraInfo, move |payload| {
            match weak.upgrade() {
                Some(this) => this.handle_control(payload),
                None => Ok(false),
            }
        });
    }

    pub fn uninstall(&self, router: &MessageRouter) {
        router.clear_handlers(MessageType::OverlayControlCameraInfo);
        self.stop_streaming();
    }

    pub fn is_streaming(&self) -> bool {
        lock(&self.task).as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn frames_sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Start the feed. `Ok(false)` if it was already running.
    pub fn start_streaming(&self) -> Result<bool> {
        let mut slot = lock(&self.task);
        if slot.as_ref().is_some_and(|t| !t.is_finished()) {
            return Ok(false);
        }
        let rt = tokio::runtime::Handle::try_current()
            .map_err(|e| OverlinkError::HandlerFailure(format!("no runtime for pose stream: {e}")))?;

        let sink = Arc::downgrade(&self.sink);
        let source = Arc::clone(&self.source);
        let sent = Arc::clone(&self.sent);
        let interval = self.interval;
        *slot = Some(rt.spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                let Some(sink) = sink.upgrade() else { break };
                let pose = match source.current_pose() {
                    Some(p) if p.is_valid => CameraPose {
                        is_connecting: Some(false),
                        ..p
                    },
                    _ => CameraPose::connecting(),
                };
                match sink.send_frame(MessageType::CameraData, &pose.encode_to_bytes()).await {
                    Ok(_) => {
                        sent.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => tracing::trace!(error = %e, "pose frame not sent"),
                }
            }
        }));
        tracing::info!(interval_ms = interval.as_millis() as u64, "pose streaming started");
        Ok(true)
    }

    /// Stop the feed. `false` if it was not running.
    pub fn stop_streaming(&self) -> bool {
        match lock(&self.task).take() {
            Some(t) => {
                t.abort();
                tracing::info!("pose streaming stopped");
                true
            }
            None => false,
        }
    }

    /// Apply one OVERLAY_CONTROL_CAMERA_INFO payload. `Ok(false)` for actions
    /// that are not camera-info start/stop.
    pub fn handle_control(&self, payload: &[u8]) -> Result<bool> {
        let cmd = CameraInfoOverlayControl::decode(payload)?;
        match cmd.action() {
            OverlayAction::StartCameraInfoOverlay => {
                self.start_streaming()?;
                Ok(true)
            }
            OverlayAction::StopCameraInfoOverlay => {
                self.stop_streaming();
                Ok(true)
            }
            other => {
                tracing::debug!(action = ?other, "ignored camera-info control action");
                Ok(false)
            }
        }
    }
}

impl ShellHooks for PoseStreamer {
    fn on_client_connected(&self, peer: PeerId) {
        self.peers.attach(peer);
    }

    fn on_client_disconnected(&self, peer: PeerId) {
        if self.peers.detach(peer) {
            self.stop_streaming();
        } else {
            tracing::debug!(peer, "peer left, pose stream kept for the others");
        }
    }
}

impl Drop for PoseStreamer {
    fn drop(&mut self) {
        if let Some(t) = lock(&self.task).take() {
            t.abort();
        }
    }
}

// --------------------
// Overlay side
// --------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    Idle,
    Streaming,
}

/// What the camera-info overlay should render right now.
#[derive(Debug, Clone, PartialEq)]
pub enum PoseDisplay {
    /// Channel idle; overlay not shown.
    Hidden,
    /// Streaming, but no fresh valid pose (host still connecting or feed stale).
    Placeholder,
    Live(CameraPose),
}

struct ChannelInner {
    state: ChannelState,
    last: Option<(CameraPose, Instant)>,
    frames: u64,
}

pub struct CameraInfoChannel {
    sink: Arc<dyn MessageSink>,
    stale_after: Duration,
    inner: Mutex<ChannelInner>,
    peers: AttachedPeers,
}

impl CameraInfoChannel {
    pub fn new(sink: Arc<dyn MessageSink>, stale_after: Duration) -> Arc<Self> {
        Arc::new(Self {
            sink,
            stale_after,
            inner: Mutex::new(ChannelInner {
                state: ChannelState::Idle,
                last: None,
                frames: 0,
            }),
            peers: AttachedPeers::default(),
        })
    }

    /// Register the CAMERA_DATA handler.
    pub fn install(self: &Arc<Self>, router: &MessageRouter) {
        let weak: Weak<Self> = Arc::downgrade(self);
        router.register_fn(MessageType::CameraData, move |payload| match weak.upgrade() {
            Some(this) => this.on_pose(payload),
            None => Ok(false),
        });
    }

    pub fn uninstall(&self, router: &MessageRouter) {
        router.clear_handlers(MessageType::CameraData);
    }

    pub fn state(&self) -> ChannelState {
        lock(&self.inner).state
    }

    pub fn frames_received(&self) -> u64 {
        lock(&self.inner).frames
    }

    /// Idle -> Streaming. A no-op while already streaming. On send failure the
    /// channel stays Idle.
    pub async fn start(&self) -> Result<()> {
        {
            let mut inner = lock(&self.inner);
            if inner.state == ChannelState::Streaming {
                return Ok(());
            }
            inner.state = ChannelState::Streaming;
            inner.last = None;
        }
        if let Err(e) = send_payload(self.sink.as_ref(), &CameraInfoOverlayControl::start()).await {
            lock(&self.inner).state = ChannelState::Idle;
            return Err(e);
        }
        tracing::debug!("camera-info channel streaming");
        Ok(())
    }

    /// Streaming -> Idle. The local state is reset even when the peer is gone.
    pub async fn stop(&self) -> Result<()> {
        {
            let mut inner = lock(&self.inner);
            inner.state = ChannelState::Idle;
            inner.last = None;
        }
        match send_payload(self.sink.as_ref(), &CameraInfoOverlayControl::stop()).await {
            Ok(_) | Err(OverlinkError::NotConnected) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub fn display(&self) -> PoseDisplay {
        self.display_at(Instant::now())
    }

    pub fn display_at(&self, now: Instant) -> PoseDisplay {
        let inner = lock(&self.inner);
        if inner.state == ChannelState::Idle {
            return PoseDisplay::Hidden;
        }
        match &inner.last {
            Some((pose, at))
                if now.saturating_duration_since(*at) <= self.stale_after
                    && pose.is_valid
                    && !pose.is_connecting() =>
            {
                PoseDisplay::Live(pose.clone())
            }
            _ => PoseDisplay::Placeholder,
        }
    }

    fn on_pose(&self, payload: &[u8]) -> Result<bool> {
        let pose = CameraPose::decode(payload)?;
        let mut inner = lock(&self.inner);
        if inner.state == ChannelState::Idle {
            // Late frame after stop.
            return Ok(false);
        }
        inner.frames += 1;
        inner.last = Some((pose, Instant::now()));
        Ok(true)
    }
}

impl ShellHooks for CameraInfoChannel {
    fn on_client_connected(&self, peer: PeerId) {
        self.peers.attach(peer);
    }

    fn on_client_disconnected(&self, peer: PeerId) {
        if !self.peers.detach(peer) {
            tracing::debug!(peer, "peer left, camera-info channel still has a feed");
            return;
        }
        let mut inner = lock(&self.inner);
        if inner.state == ChannelState::Streaming {
            tracing::debug!(peer, "peer lost, camera-info channel idle");
        }
        inner.state = ChannelState::Idle;
        inner.last = None;
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        frames: Mutex<Vec<(MessageType, Vec<u8>)>>,
        offline: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl MessageSink for Recorder {
        async fn send_frame(&self, ty: MessageType, payload: &[u8]) -> Result<usize> {
            if self.offline.load(Ordering::SeqCst) {
                return Err(OverlinkError::NotConnected);
            }
            lock(&self.frames).push((ty, payload.to_vec()));
            Ok(1)
        }
    }

    fn live_pose() -> CameraPose {
        CameraPose {
            is_valid: true,
            fov: 50.0,
            ..CameraPose::default()
        }
    }

    #[tokio::test]
    async fn start_is_idempotent_and_stop_resets() {
        let rec = Arc::new(Recorder::default());
        let ch = CameraInfoChannel::new(rec.clone(), Duration::from_secs(1));

        ch.start().await.unwrap();
        ch.start().await.unwrap();
        assert_eq!(ch.state(), ChannelState::Streaming);
        assert_eq!(lock(&rec.frames).len(), 1);

        ch.stop().await.unwrap();
        assert_eq!(ch.state(), ChannelState::Idle);
        assert_eq!(ch.display(), PoseDisplay::Hidden);
    }

    #[tokio::test]
    async fn failed_start_stays_idle() {
        let rec = Arc::new(Recorder::default());
        rec.offline.store(true, Ordering::SeqCst);
        let ch = CameraInfoChannel::new(rec.clone(), Duration::from_secs(1));

        assert!(ch.start().await.is_err());
        assert_eq!(ch.state(), ChannelState::Idle);
        // Stopping with no peer is still fine.
        ch.stop().await.unwrap();
    }

    #[tokio::test]
    async fn placeholder_until_live_then_stale() {
        let rec = Arc::new(Recorder::default());
        let ch = CameraInfoChannel::new(rec, Duration::from_millis(500));
        ch.start().await.unwrap();
        assert_eq!(ch.display(), PoseDisplay::Placeholder);

        assert!(ch.on_pose(&CameraPose::connecting().encode_to_bytes()).unwrap());
        assert_eq!(ch.display(), PoseDisplay::Placeholder);

        assert!(ch.on_pose(&live_pose().encode_to_bytes()).unwrap());
        assert_eq!(ch.display(), PoseDisplay::Live(live_pose()));

        let later = Instant::now() + Duration::from_secs(2);
        assert_eq!(ch.display_at(later), PoseDisplay::Placeholder);
    }

    #[tokio::test]
    async fn disconnect_returns_to_idle_and_drops_late_frames() {
        let rec = Arc::new(Recorder::default());
        let ch = CameraInfoChannel::new(rec, Duration::from_secs(1));
        ch.start().await.unwrap();
        ch.on_client_disconnected(7);

        assert_eq!(ch.state(), ChannelState::Idle);
        assert!(!ch.on_pose(&live_pose().encode_to_bytes()).unwrap());
        assert_eq!(ch.frames_received(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn streamer_sends_placeholders_until_source_is_valid() {
        let rec = Arc::new(Recorder::default());
        let ready = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = Arc::clone(&ready);
        let source = move || {
            if flag.load(Ordering::SeqCst) {
                Some(live_pose())
            } else {
                None
            }
        };
        let streamer = PoseStreamer::new(rec.clone(), Arc::new(source), Duration::from_millis(100));

        assert!(streamer.handle_control(&CameraInfoOverlayControl::start().encode_to_bytes()).unwrap());
        assert!(!streamer.start_streaming().unwrap());

        tokio::time::sleep(Duration::from_millis(250)).await;
        ready.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(streamer.handle_control(&CameraInfoOverlayControl::stop().encode_to_bytes()).unwrap());
        assert!(!streamer.is_streaming());

        let frames = lock(&rec.frames).clone();
        assert!(frames.len() >= 4);
        let first = CameraPose::decode(&frames[0].1).unwrap();
        assert_eq!(first.is_connecting, Some(true));
        let last = CameraPose::decode(&frames[frames.len() - 1].1).unwrap();
        assert!(last.is_valid);
        assert_eq!(last.is_connecting, Some(false));
        assert!(frames.iter().all(|(ty, _)| *ty == MessageType::CameraData));
    }

    #[test]
    fn latest_pose_goes_stale() {
        let latest = LatestPose::new(Duration::from_millis(500));
        assert!(latest.current_pose().is_none());

        latest.record(live_pose());
        assert_eq!(latest.current_pose(), Some(live_pose()));
        let later = Instant::now() + Duration::from_secs(1);
        assert!(latest.current_at(later).is_none());
    }

    #[tokio::test]
    async fn channel_stays_streaming_while_another_peer_remains() {
        let rec = Arc::new(Recorder::default());
        let ch = CameraInfoChannel::new(rec, Duration::from_secs(1));
        ch.on_client_connected(1);
        ch.on_client_connected(2);
        ch.start().await.unwrap();

        ch.on_client_disconnected(1);
        assert_eq!(ch.state(), ChannelState::Streaming);
        assert!(ch.on_pose(&live_pose().encode_to_bytes()).unwrap());

        ch.on_client_disconnected(2);
        assert_eq!(ch.state(), ChannelState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn streamer_stops_only_when_the_last_peer_leaves() {
        let rec = Arc::new(Recorder::default());
        let streamer = PoseStreamer::new(rec, Arc::new(|| Some(live_pose())), Duration::from_millis(100));
        streamer.on_client_connected(1);
        streamer.on_client_connected(2);
        assert!(streamer.start_streaming().unwrap());

        streamer.on_client_disconnected(2);
        assert!(streamer.is_streaming());
        streamer.on_client_disconnected(2);
        assert!(streamer.is_streaming());

        streamer.on_client_disconnected(1);
        assert!(!streamer.is_streaming());
    }
}
