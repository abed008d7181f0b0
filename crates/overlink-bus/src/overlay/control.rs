//! Fire-and-forget overlay control.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;

use overlink_core::error::Result;
use overlink_core::protocol::payload::{CameraOverlayRequest, OverlayAction, OverlayControlCommand};
use overlink_core::protocol::{MessageType, Payload};

use crate::dispatch::MessageRouter;
use crate::overlay::spawn_send;
use crate::shell::MessageSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlayKind {
    Main,
    CameraInfo,
}

impl OverlayKind {
    fn from_action(action: OverlayAction) -> Option<(Self, bool)> {
        match action {
            OverlayAction::StartOverlay => Some((OverlayKind::Main, true)),
            OverlayAction::StopOverlay => Some((OverlayKind::Main, false)),
            OverlayAction::StartCameraInfoOverlay => Some((OverlayKind::CameraInfo, true)),
            OverlayAction::StopCameraInfoOverlay => Some((OverlayKind::CameraInfo, false)),
            OverlayAction::Unknown(_) => None,
        }
    }
}

type ChangeFn = Box<dyn Fn(OverlayKind, bool) + Send + Sync>;

/// Applies OVERLAY_CONTROL commands to a set of active overlays.
///
/// Idempotent: repeating a start or stop is handled but does not call
/// `on_change` again.
pub struct OverlayControlReceiver {
    active: Mutex<HashSet<OverlayKind>>,
    on_change: ChangeFn,
}

impl OverlayControlReceiver {
    pub fn new(on_change: impl Fn(OverlayKind, bool) + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            active: Mutex::new(HashSet::new()),
            on_change: Box::new(on_change),
        })
    }

    fn active(&self) -> MutexGuard<'_, HashSet<OverlayKind>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn install(self: &Arc<Self>, router: &MessageRouter) {
        let weak = Arc::downgrade(self);
        router.register_fn(MessageType::OverlayControl, move |payload| match weak.upgrade() {
            Some(this) => this.on_command(payload),
            None => Ok(false),
        });
    }

    pub fn uninstall(&self, router: &MessageRouter) {
        router.clear_handlers(MessageType::OverlayControl);
    }

    pub fn is_active(&self, kind: OverlayKind) -> bool {
        self.active().contains(&kind)
    }

    /// Apply one action. `false` only for actions outside the known set.
    pub fn apply(&self, action: OverlayAction) -> bool {
        let Some((kind, on)) = OverlayKind::from_action(action) else {
            tracing::debug!(?action, "unknown overlay action");
            return false;
        };
        let changed = {
            let mut active = self.active();
            if on {
                active.insert(kind)
            } else {
                active.remove(&kind)
            }
        };
        if changed {
            tracing::info!(?kind, on, "overlay state changed");
            (self.on_change)(kind, on);
        } else {
            tracing::debug!(?kind, on, "overlay already in requested state");
        }
        true
    }

    fn on_command(&self, payload: &[u8]) -> Result<bool> {
        let cmd = OverlayControlCommand::decode(payload)?;
        Ok(self.apply(cmd.action))
    }
}

/// Answers CAMERA_OVERLAY_REQUEST with OVERLAY_CONTROL{START_OVERLAY}.
pub struct CameraOverlayResponder {
    sink: Arc<dyn MessageSink>,
}

impl CameraOverlayResponder {
    pub fn new(sink: Arc<dyn MessageSink>) -> Arc<Self> {
        Arc::new(Self { sink })
    }

    pub fn install(self: &Arc<Self>, router: &MessageRouter) {
        let weak = Arc::downgrade(self);
        router.register_fn(MessageType::CameraOverlayRequest, move |payload| {
            match weak.upgrade() {
                Some(this) => this.on_request(payload),
                None => Ok(false),
            }
        });
    }

    pub fn uninstall(&self, router: &MessageRouter) {
        router.clear_handlers(MessageType::CameraOverlayRequest);
    }

    fn on_request(&self, payload: &[u8]) -> Result<bool> {
        CameraOverlayRequest::decode(payload)?;
        tracing::debug!("camera overlay requested, starting overlay");
        let reply = OverlayControlCommand::new(OverlayAction::StartOverlay);
        spawn_send(Arc::clone(&self.sink), MessageType::OverlayControl, reply.encode_to_bytes());
        Ok(true)
    }
}
