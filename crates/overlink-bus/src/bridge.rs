//! Process wiring for the `overlink-bridge` binary.
//!
//! - stream shell (server or client role) facing the host
//! - optional registry shell (socket-served) facing control surfaces
//! - every frame type is forwarded between the two, in order, through one
//!   queue per direction
//! - host poses are cached and re-emitted to control surfaces at
//!   `overlay.pose_interval_ms` while one of them has the camera-info overlay
//!   on; a cache older than `overlay.stale_after_ms` turns into placeholders
//! - CAMERA_OVERLAY_REQUEST is answered locally with START_OVERLAY
//!
//! Startup errors are returned, never panicked.

use std::sync::{Arc, Weak};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use overlink_core::error::{OverlinkError, Result};
use overlink_core::protocol::payload::CameraPose;
use overlink_core::protocol::{MessageType, Payload};

use crate::config::{BusConfig, StreamRole};
use crate::dispatch::{MessageHandler, MessageRouter};
use crate::obs::BusMetrics;
use crate::overlay::{CameraOverlayResponder, LatestPose, PoseStreamer};
use crate::shell::{MessageSink, ServiceShell};
use crate::transport::{RegistryTransport, StreamClient, StreamServer, Transport};

const FORWARD_QUEUE: usize = 1024;

/// Pushes one type's payloads into a direction queue.
struct Forwarder {
    ty: MessageType,
    tx: mpsc::Sender<(MessageType, Bytes)>,
}

impl MessageHandler for Forwarder {
    fn handle_message(&self, payload: &[u8]) -> Result<bool> {
        self.tx
            .try_send((self.ty, Bytes::copy_from_slice(payload)))
            .map_err(|e| OverlinkError::HandlerFailure(format!("forward {}: {e}", self.ty)))?;
        Ok(true)
    }
}

fn spawn_forward_task(
    label: &'static str,
    target: Weak<dyn MessageSink>,
    mut rx: mpsc::Receiver<(MessageType, Bytes)>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some((ty, body)) = rx.recv().await {
            let Some(sink) = target.upgrade() else { break };
            match sink.send_frame(ty, &body).await {
                Ok(n) => tracing::trace!(direction = label, %ty, peers = n, "forwarded"),
                Err(e) => tracing::debug!(direction = label, %ty, error = %e, "forward dropped"),
            }
        }
    })
}

pub struct Bridge {
    metrics: Arc<BusMetrics>,
    stream: Arc<ServiceShell<dyn Transport>>,
    registry: Option<Arc<ServiceShell<RegistryTransport>>>,
    pose_stream: Option<Arc<PoseStreamer>>,
    _camera_overlay: Arc<CameraOverlayResponder>,
    tasks: Vec<JoinHandle<()>>,
}

impl Bridge {
    pub async fn start(cfg: BusConfig) -> Result<Self> {
        let metrics = Arc::new(BusMetrics::default());
        let stream_router = Arc::new(MessageRouter::new());
        let registry_router = Arc::new(MessageRouter::new());

        let transport: Arc<dyn Transport> = match cfg.stream.role {
            StreamRole::Server => Arc::new(StreamServer::new(cfg.stream.socket_path.clone())),
            StreamRole::Client => Arc::new(StreamClient::new(
                cfg.stream.socket_path.clone(),
                cfg.stream.reconnect_policy(),
            )),
        };
        let stream = Arc::new(
            ServiceShell::start("host", transport, Arc::clone(&stream_router), Arc::clone(&metrics))
                .await?,
        );

        let registry = if cfg.registry.enabled {
            let shell = ServiceShell::start(
                "control",
                Arc::new(RegistryTransport::new(cfg.registry.options())),
                Arc::clone(&registry_router),
                Arc::clone(&metrics),
            )
            .await;
            match shell {
                Ok(s) => Some(Arc::new(s)),
                Err(e) => {
                    stream.shutdown();
                    return Err(e);
                }
            }
        } else {
            None
        };

        let latest = LatestPose::new(cfg.overlay.stale_after());
        let mut tasks = Vec::new();
        let mut pose_stream = None;
        if let Some(reg) = &registry {
            let (tx, rx) = mpsc::channel(FORWARD_QUEUE);
            let sink: Arc<dyn MessageSink> = reg.clone();
            tasks.push(spawn_forward_task("host->control", Arc::downgrade(&sink), rx));
            for ty in MessageType::ALL {
                if matches!(ty, MessageType::CameraData | MessageType::CameraOverlayRequest) {
                    continue;
                }
                stream_router.register_handler(ty, Arc::new(Forwarder { ty, tx: tx.clone() }));
            }

            let (tx, rx) = mpsc::channel(FORWARD_QUEUE);
            let sink: Arc<dyn MessageSink> = stream.clone();
            tasks.push(spawn_forward_task("control->host", Arc::downgrade(&sink), rx));
            for ty in MessageType::ALL {
                registry_router.register_handler(ty, Arc::new(Forwarder { ty, tx: tx.clone() }));
            }

            let control_sink: Arc<dyn MessageSink> = reg.clone();
            let streamer = PoseStreamer::new(
                control_sink,
                latest.clone(),
                cfg.overlay.pose_interval(),
            );
            reg.add_hooks(streamer.clone());

            // Camera-info start/stop reaches the host and drives the local re-emitter.
            let to_host = Forwarder {
                ty: MessageType::OverlayControlCameraInfo,
                tx,
            };
            let weak = Arc::downgrade(&streamer);
            registry_router.register_fn(MessageType::OverlayControlCameraInfo, move |payload| {
                let forwarded = to_host.handle_message(payload)?;
                match weak.upgrade() {
                    Some(streamer) => Ok(streamer.handle_control(payload)? || forwarded),
                    None => Ok(forwarded),
                }
            });
            pose_stream = Some(streamer);
        }

        let cache = Arc::clone(&latest);
        stream_router.register_fn(MessageType::CameraData, move |payload| {
            let pose = CameraPose::decode(payload)?;
            if tracing::enabled!(tracing::Level::DEBUG) {
                match pose.to_json() {
                    Ok(json) => tracing::debug!(pose = %json, "camera pose"),
                    Err(e) => tracing::debug!(error = %e, "camera pose not printable"),
                }
            }
            cache.record(pose);
            Ok(true)
        });

        let stream_sink: Arc<dyn MessageSink> = stream.clone();
        let camera_overlay = CameraOverlayResponder::new(stream_sink);
        camera_overlay.install(&stream_router);

        tracing::info!(
            role = ?cfg.stream.role,
            stream = %cfg.stream.socket_path.display(),
            registry = cfg.registry.enabled,
            pose_interval_ms = cfg.overlay.pose_interval_ms,
            stale_after_ms = cfg.overlay.stale_after_ms,
            "bridge started"
        );

        Ok(Self {
            metrics,
            stream,
            registry,
            pose_stream,
            _camera_overlay: camera_overlay,
            tasks,
        })
    }

    pub fn metrics(&self) -> &Arc<BusMetrics> {
        &self.metrics
    }

    pub fn stream(&self) -> &Arc<ServiceShell<dyn Transport>> {
        &self.stream
    }

    pub fn registry(&self) -> Option<&Arc<ServiceShell<RegistryTransport>>> {
        self.registry.as_ref()
    }

    pub fn status(&self) -> serde_json::Value {
        serde_json::json!({
            "stream": self.stream.status(),
            "registry": self.registry.as_ref().map(|r| r.status()),
            "pose_stream": self.pose_stream.as_ref().map(|p| serde_json::json!({
                "streaming": p.is_streaming(),
                "frames_sent": p.frames_sent(),
            })),
        })
    }

    pub fn shutdown(&self) {
        for t in &self.tasks {
            t.abort();
        }
        if let Some(p) = &self.pose_stream {
            p.stop_streaming();
        }
        if let Some(reg) = &self.registry {
            reg.shutdown();
        }
        self.stream.shutdown();
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        for t in &self.tasks {
            t.abort();
        }
    }
}
