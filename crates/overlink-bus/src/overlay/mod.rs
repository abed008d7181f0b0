//! Overlay control protocol built on top of a shell and a router.
//!
//! Three exchange shapes share the same bus:
//! - request/reply (`archive`): empty ARCHIVE_INFO asks, populated one answers
//! - fire-and-forget (`control`): overlay start/stop, no reply
//! - streaming (`camera_info`): start/stop control drives a fixed-rate pose feed
//!
//! Protocol state lives in these objects, never in the transport. Handlers
//! hold `Weak` references so a router never keeps its owner alive.

pub mod archive;
pub mod camera_info;
pub mod control;

use std::sync::Arc;

use bytes::Bytes;

use overlink_core::protocol::MessageType;

use crate::shell::MessageSink;

pub use archive::{ArchiveRequester, ArchiveResponder, ArchiveSource};
pub use camera_info::{
    CameraInfoChannel, ChannelState, LatestPose, PoseDisplay, PoseSource, PoseStreamer,
};
pub use control::{CameraOverlayResponder, OverlayControlReceiver, OverlayKind};

/// Send from inside a synchronous handler without blocking the read loop.
pub(crate) fn spawn_send(sink: Arc<dyn MessageSink>, ty: MessageType, body: Bytes) {
    let Ok(rt) = tokio::runtime::Handle::try_current() else {
        tracing::warn!(%ty, "no runtime to send reply on, dropped");
        return;
    };
    rt.spawn(async move {
        if let Err(e) = sink.send_frame(ty, &body).await {
            tracing::debug!(%ty, error = %e, "reply not sent");
        }
    });
}
