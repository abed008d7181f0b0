//! Message type registry.
//!
//! The id table is closed and append-only: new kinds get new ids, existing ids
//! are never renumbered or reused. Id 0 is reserved and never travels on the wire.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{OverlinkError, Result};

/// Every message kind the bus can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    /// Camera pose telemetry (host -> overlay).
    CameraData,
    /// Archive info; the empty instance is the request, the populated one the reply.
    ArchiveInfo,
    /// Seek the running archive.
    ArchivePositionSetRequest,
    /// Ask the control surface to start the camera overlay.
    CameraOverlayRequest,
    /// General overlay start/stop.
    OverlayControl,
    /// Camera-info overlay start/stop (drives pose streaming).
    OverlayControlCameraInfo,
    /// Config patch (full or partial).
    ConfigUpdate,
    /// Virtual keyboard injection.
    VirtualKeyboardInput,
    /// Virtual joystick injection.
    VirtualJoystickInput,
    /// Camera background colour.
    CameraBackgroundColor,
}

impl MessageType {
    /// All registered types, in id order.
    pub const ALL: [MessageType; 10] = [
        MessageType::CameraData,
        MessageType::ArchiveInfo,
        MessageType::ArchivePositionSetRequest,
        MessageType::CameraOverlayRequest,
        MessageType::OverlayControl,
        MessageType::OverlayControlCameraInfo,
        MessageType::ConfigUpdate,
        MessageType::VirtualKeyboardInput,
        MessageType::VirtualJoystickInput,
        MessageType::CameraBackgroundColor,
    ];

    /// Wire id.
    pub fn id(self) -> u32 {
        match self {
            MessageType::CameraData => 1,
            MessageType::ArchiveInfo => 2,
            MessageType::ArchivePositionSetRequest => 3,
            MessageType::CameraOverlayRequest => 4,
            MessageType::OverlayControl => 5,
            MessageType::OverlayControlCameraInfo => 6,
            MessageType::ConfigUpdate => 7,
            MessageType::VirtualKeyboardInput => 8,
            MessageType::VirtualJoystickInput => 9,
            MessageType::CameraBackgroundColor => 10,
        }
    }

    /// Resolve a wire id. Reserved (0) and unregistered ids fail closed.
    pub fn from_id(id: u32) -> Result<Self> {
        match id {
            1 => Ok(MessageType::CameraData),
            2 => Ok(MessageType::ArchiveInfo),
            3 => Ok(MessageType::ArchivePositionSetRequest),
            4 => Ok(MessageType::CameraOverlayRequest),
            5 => Ok(MessageType::OverlayControl),
            6 => Ok(MessageType::OverlayControlCameraInfo),
            7 => Ok(MessageType::ConfigUpdate),
            8 => Ok(MessageType::VirtualKeyboardInput),
            9 => Ok(MessageType::VirtualJoystickInput),
            10 => Ok(MessageType::CameraBackgroundColor),
            other => Err(OverlinkError::UnknownType(other)),
        }
    }

    /// Log-friendly name.
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::CameraData => "CAMERA_DATA",
            MessageType::ArchiveInfo => "ARCHIVE_INFO",
            MessageType::ArchivePositionSetRequest => "ARCHIVE_POSITION_SET_REQUEST",
            MessageType::CameraOverlayRequest => "CAMERA_OVERLAY_REQUEST",
            MessageType::OverlayControl => "OVERLAY_CONTROL",
            MessageType::OverlayControlCameraInfo => "OVERLAY_CONTROL_CAMERA_INFO",
            MessageType::ConfigUpdate => "CONFIG_UPDATE",
            MessageType::VirtualKeyboardInput => "VIRTUAL_KEYBOARD_INPUT",
            MessageType::VirtualJoystickInput => "VIRTUAL_JOYSTICK_INPUT",
            MessageType::CameraBackgroundColor => "CAMERA_BACKGROUND_COLOR",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
