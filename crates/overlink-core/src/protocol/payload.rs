//! Typed payload schemas, one per `MessageType`.
//!
//! Layouts are fixed-width big-endian and parsed through `bytes::Buf` with
//! `remaining()` checks, so truncated input yields `OverlinkError::Payload`
//! instead of a panic. Enum fields outside the known range decode to an
//! explicit `Unknown(raw)` variant.

use std::collections::BTreeMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{OverlinkError, Result};
use crate::protocol::types::MessageType;

/// A message body bound to exactly one `MessageType`.
pub trait Payload: Sized {
    /// The frame type that carries this payload.
    const TYPE: MessageType;

    fn encode(&self, out: &mut BytesMut);

    fn decode(buf: &[u8]) -> Result<Self>;

    fn encode_to_bytes(&self) -> Bytes {
        let mut out = BytesMut::new();
        self.encode(&mut out);
        out.freeze()
    }
}

fn need(buf: &[u8], n: usize, what: &str) -> Result<()> {
    if buf.remaining() < n {
        return Err(OverlinkError::Payload(format!(
            "{what}: need {n} bytes, have {}",
            buf.remaining()
        )));
    }
    Ok(())
}

// --------------------
// Enums
// --------------------

/// Camera control mode reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum CameraMode {
    SystemCamera,
    Free,
    FirstPerson,
    Follow,
    Unknown(u8),
}

impl From<u8> for CameraMode {
    fn from(raw: u8) -> Self {
        match raw {
            0 => CameraMode::SystemCamera,
            1 => CameraMode::Free,
            2 => CameraMode::FirstPerson,
            3 => CameraMode::Follow,
            other => CameraMode::Unknown(other),
        }
    }
}

impl From<CameraMode> for u8 {
    fn from(m: CameraMode) -> u8 {
        match m {
            CameraMode::SystemCamera => 0,
            CameraMode::Free => 1,
            CameraMode::FirstPerson => 2,
            CameraMode::Follow => 3,
            CameraMode::Unknown(raw) => raw,
        }
    }
}

impl CameraMode {
    pub fn as_str(self) -> &'static str {
        match self {
            CameraMode::SystemCamera => "SYSTEM_CAMERA",
            CameraMode::Free => "FREE",
            CameraMode::FirstPerson => "FIRST_PERSON",
            CameraMode::Follow => "FOLLOW",
            CameraMode::Unknown(_) => "UNKNOWN",
        }
    }
}

/// Kind of scene the host is rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum SceneType {
    None,
    FesLive,
    WithLive,
    Story,
    Unknown(u8),
}

impl From<u8> for SceneType {
    fn from(raw: u8) -> Self {
        match raw {
            0 => SceneType::None,
            1 => SceneType::FesLive,
            2 => SceneType::WithLive,
            3 => SceneType::Story,
            other => SceneType::Unknown(other),
        }
    }
}

impl From<SceneType> for u8 {
    fn from(s: SceneType) -> u8 {
        match s {
            SceneType::None => 0,
            SceneType::FesLive => 1,
            SceneType::WithLive => 2,
            SceneType::Story => 3,
            SceneType::Unknown(raw) => raw,
        }
    }
}

impl SceneType {
    pub fn as_str(self) -> &'static str {
        match self {
            SceneType::None => "NONE",
            SceneType::FesLive => "FES_LIVE",
            SceneType::WithLive => "WITH_LIVE",
            SceneType::Story => "STORY",
            SceneType::Unknown(_) => "UNKNOWN",
        }
    }
}

/// Overlay lifecycle action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum OverlayAction {
    StartOverlay,
    StopOverlay,
    StartCameraInfoOverlay,
    StopCameraInfoOverlay,
    Unknown(u8),
}

impl From<u8> for OverlayAction {
    fn from(raw: u8) -> Self {
        match raw {
            1 => OverlayAction::StartOverlay,
            2 => OverlayAction::StopOverlay,
            3 => OverlayAction::StartCameraInfoOverlay,
            4 => OverlayAction::StopCameraInfoOverlay,
            other => OverlayAction::Unknown(other),
        }
    }
}

impl From<OverlayAction> for u8 {
    fn from(a: OverlayAction) -> u8 {
        match a {
            OverlayAction::StartOverlay => 1,
            OverlayAction::StopOverlay => 2,
            OverlayAction::StartCameraInfoOverlay => 3,
            OverlayAction::StopCameraInfoOverlay => 4,
            OverlayAction::Unknown(raw) => raw,
        }
    }
}

/// Whether a config patch replaces everything or only the named fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum ConfigUpdateKind {
    Full,
    Partial,
    Unknown(u8),
}

impl From<u8> for ConfigUpdateKind {
    fn from(raw: u8) -> Self {
        match raw {
            0 => ConfigUpdateKind::Full,
            1 => ConfigUpdateKind::Partial,
            other => ConfigUpdateKind::Unknown(other),
        }
    }
}

impl From<ConfigUpdateKind> for u8 {
    fn from(k: ConfigUpdateKind) -> u8 {
        match k {
            ConfigUpdateKind::Full => 0,
            ConfigUpdateKind::Partial => 1,
            ConfigUpdateKind::Unknown(raw) => raw,
        }
    }
}

// --------------------
// Camera pose
// --------------------

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    #[serde(default)]
    pub x: f32,
    #[serde(default)]
    pub y: f32,
    #[serde(default)]
    pub z: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quat {
    #[serde(default)]
    pub x: f32,
    #[serde(default)]
    pub y: f32,
    #[serde(default)]
    pub z: f32,
    #[serde(default = "default_w")]
    pub w: f32,
}

fn default_w() -> f32 {
    1.0
}

impl Default for Quat {
    fn default() -> Self {
        Self { x: 0.0, y: 0.0, z: 0.0, w: 1.0 }
    }
}

const POSE_FLAG_VALID: u8 = 0x01;
const POSE_FLAG_CONNECTING_PRESENT: u8 = 0x02;
const POSE_FLAG_CONNECTING: u8 = 0x04;
const POSE_LEN: usize = 1 + 3 * 4 + 4 * 4 + 4 + 1 + 1;

/// Camera pose telemetry emitted by the host while the camera-info overlay runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraPose {
    #[serde(default)]
    pub is_valid: bool,
    #[serde(default)]
    pub position: Vec3,
    #[serde(default)]
    pub rotation: Quat,
    #[serde(default = "default_fov")]
    pub fov: f32,
    #[serde(default = "default_mode")]
    pub mode: CameraMode,
    #[serde(default = "default_scene")]
    pub scene_type: SceneType,
    /// `None` when the sender did not state it; `Some(true)` while the host is
    /// up but not yet producing valid data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_connecting: Option<bool>,
}

fn default_fov() -> f32 {
    60.0
}
fn default_mode() -> CameraMode {
    CameraMode::SystemCamera
}
fn default_scene() -> SceneType {
    SceneType::None
}

impl Default for CameraPose {
    fn default() -> Self {
        Self {
            is_valid: false,
            position: Vec3::default(),
            rotation: Quat::default(),
            fov: default_fov(),
            mode: default_mode(),
            scene_type: default_scene(),
            is_connecting: None,
        }
    }
}

impl CameraPose {
    /// Placeholder frame sent while the host has no valid pose yet.
    pub fn connecting() -> Self {
        Self {
            is_connecting: Some(true),
            ..Self::default()
        }
    }

    /// Presence-aware read: absent counts as not connecting.
    pub fn is_connecting(&self) -> bool {
        self.is_connecting.unwrap_or(false)
    }

    /// JSON form used by debug tooling.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| OverlinkError::Payload(format!("pose json: {e}")))
    }

    pub fn from_json(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|e| OverlinkError::Payload(format!("pose json: {e}")))
    }
}

impl Payload for CameraPose {
    const TYPE: MessageType = MessageType::CameraData;

    fn encode(&self, out: &mut BytesMut) {
        let mut flags = 0u8;
        if self.is_valid {
            flags |= POSE_FLAG_VALID;
        }
        if let Some(c) = self.is_connecting {
            flags |= POSE_FLAG_CONNECTING_PRESENT;
            if c {
                flags |= POSE_FLAG_CONNECTING;
            }
        }
        out.reserve(POSE_LEN);
        out.put_u8(flags);
        out.put_f32(self.position.x);
        out.put_f32(self.position.y);
        out.put_f32(self.position.z);
        out.put_f32(self.rotation.x);
        out.put_f32(self.rotation.y);
        out.put_f32(self.rotation.z);
        out.put_f32(self.rotation.w);
        out.put_f32(self.fov);
        out.put_u8(self.mode.into());
        out.put_u8(self.scene_type.into());
    }

    fn decode(mut buf: &[u8]) -> Result<Self> {
        need(buf, POSE_LEN, "camera pose")?;
        let flags = buf.get_u8();
        let position = Vec3 {
            x: buf.get_f32(),
            y: buf.get_f32(),
            z: buf.get_f32(),
        };
        let rotation = Quat {
            x: buf.get_f32(),
            y: buf.get_f32(),
            z: buf.get_f32(),
            w: buf.get_f32(),
        };
        let fov = buf.get_f32();
        let mode = CameraMode::from(buf.get_u8());
        let scene_type = SceneType::from(buf.get_u8());
        let is_connecting = if flags & POSE_FLAG_CONNECTING_PRESENT != 0 {
            Some(flags & POSE_FLAG_CONNECTING != 0)
        } else {
            None
        };

        Ok(Self {
            is_valid: flags & POSE_FLAG_VALID != 0,
            position,
            rotation,
            fov,
            mode,
            scene_type,
            is_connecting,
        })
    }
}

// --------------------
// Archive
// --------------------

/// Archive duration. The zero instance is also the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveInfo {
    pub duration_ms: u64,
}

impl ArchiveInfo {
    pub fn request() -> Self {
        Self::default()
    }
}

impl Payload for ArchiveInfo {
    const TYPE: MessageType = MessageType::ArchiveInfo;

    // A zero duration is written as an empty body, like an unset field.
    fn encode(&self, out: &mut BytesMut) {
        if self.duration_ms != 0 {
            out.put_u64(self.duration_ms);
        }
    }

    fn decode(mut buf: &[u8]) -> Result<Self> {
        if buf.is_empty() {
            return Ok(Self::default());
        }
        need(buf, 8, "archive info")?;
        Ok(Self {
            duration_ms: buf.get_u64(),
        })
    }
}

/// Seek request for the running archive.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ArchivePositionSetRequest {
    pub seconds: f32,
}

impl Payload for ArchivePositionSetRequest {
    const TYPE: MessageType = MessageType::ArchivePositionSetRequest;

    fn encode(&self, out: &mut BytesMut) {
        out.put_f32(self.seconds);
    }

    fn decode(mut buf: &[u8]) -> Result<Self> {
        need(buf, 4, "archive position")?;
        Ok(Self {
            seconds: buf.get_f32(),
        })
    }
}

// --------------------
// Overlay control
// --------------------

/// Empty request asking the control surface to bring up the camera overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CameraOverlayRequest;

impl Payload for CameraOverlayRequest {
    const TYPE: MessageType = MessageType::CameraOverlayRequest;

    fn encode(&self, _out: &mut BytesMut) {}

    fn decode(_buf: &[u8]) -> Result<Self> {
        Ok(Self)
    }
}

/// Start/stop a named overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayControlCommand {
    pub action: OverlayAction,
}

impl OverlayControlCommand {
    pub fn new(action: OverlayAction) -> Self {
        Self { action }
    }

    fn decode_action(mut buf: &[u8]) -> Result<Self> {
        need(buf, 1, "overlay control")?;
        Ok(Self {
            action: OverlayAction::from(buf.get_u8()),
        })
    }
}

impl Payload for OverlayControlCommand {
    const TYPE: MessageType = MessageType::OverlayControl;

    fn encode(&self, out: &mut BytesMut) {
        out.put_u8(self.action.into());
    }

    fn decode(buf: &[u8]) -> Result<Self> {
        Self::decode_action(buf)
    }
}

/// The same command body sent on the camera-info control type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraInfoOverlayControl(pub OverlayControlCommand);

impl CameraInfoOverlayControl {
    pub fn start() -> Self {
        Self(OverlayControlCommand::new(OverlayAction::StartCameraInfoOverlay))
    }

    pub fn stop() -> Self {
        Self(OverlayControlCommand::new(OverlayAction::StopCameraInfoOverlay))
    }

    pub fn action(&self) -> OverlayAction {
        self.0.action
    }
}

impl Payload for CameraInfoOverlayControl {
    const TYPE: MessageType = MessageType::OverlayControlCameraInfo;

    fn encode(&self, out: &mut BytesMut) {
        self.0.encode(out);
    }

    fn decode(buf: &[u8]) -> Result<Self> {
        OverlayControlCommand::decode_action(buf).map(Self)
    }
}

// --------------------
// Config
// --------------------

/// Longest field name the wire form can carry (u8 length prefix).
pub const MAX_CONFIG_NAME_LEN: usize = u8::MAX as usize;
/// Most fields one patch can carry (u16 count).
pub const MAX_CONFIG_FIELDS: usize = u16::MAX as usize;

/// Config patch with named numeric fields (booleans travel as 0/1).
///
/// Every name fits the u8 length prefix and the field count fits the u16
/// header; `with` refuses anything else, so encoding never loses a field.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigUpdatePatch {
    pub kind: ConfigUpdateKind,
    fields: BTreeMap<String, f64>,
}

impl ConfigUpdatePatch {
    pub fn new(kind: ConfigUpdateKind) -> Self {
        Self {
            kind,
            fields: BTreeMap::new(),
        }
    }

    /// Set `name` to `value`.
    pub fn with(mut self, name: impl Into<String>, value: f64) -> Result<Self> {
        let name = name.into();
        if name.len() > MAX_CONFIG_NAME_LEN {
            return Err(OverlinkError::Payload(format!(
                "config field name is {} bytes, limit {MAX_CONFIG_NAME_LEN}",
                name.len()
            )));
        }
        if self.fields.len() >= MAX_CONFIG_FIELDS && !self.fields.contains_key(&name) {
            return Err(OverlinkError::Payload(format!(
                "config patch already holds {MAX_CONFIG_FIELDS} fields"
            )));
        }
        self.fields.insert(name, value);
        Ok(self)
    }

    pub fn with_flag(self, name: impl Into<String>, on: bool) -> Result<Self> {
        self.with(name, if on { 1.0 } else { 0.0 })
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.fields.get(name).copied()
    }

    pub fn fields(&self) -> &BTreeMap<String, f64> {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Payload for ConfigUpdatePatch {
    const TYPE: MessageType = MessageType::ConfigUpdate;

    fn encode(&self, out: &mut BytesMut) {
        out.put_u8(self.kind.into());
        out.put_u16(self.fields.len() as u16);
        for (name, value) in &self.fields {
            out.put_u8(name.len() as u8);
            out.put_slice(name.as_bytes());
            out.put_f64(*value);
        }
    }

    fn decode(mut buf: &[u8]) -> Result<Self> {
        need(buf, 3, "config update header")?;
        let kind = ConfigUpdateKind::from(buf.get_u8());
        let count = buf.get_u16() as usize;
        let mut fields = BTreeMap::new();
        for _ in 0..count {
            need(buf, 1, "config field name length")?;
            let name_len = buf.get_u8() as usize;
            need(buf, name_len + 8, "config field")?;
            let name = std::str::from_utf8(&buf[..name_len])
                .map_err(|e| OverlinkError::Payload(format!("config field name utf8: {e}")))?
                .to_owned();
            buf.advance(name_len);
            fields.insert(name, buf.get_f64());
        }
        Ok(Self { kind, fields })
    }
}

// --------------------
// Virtual input
// --------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualKeyEvent {
    pub key_code: i32,
    pub action: i32,
    pub repeat: bool,
}

impl Payload for VirtualKeyEvent {
    const TYPE: MessageType = MessageType::VirtualKeyboardInput;

    fn encode(&self, out: &mut BytesMut) {
        out.put_i32(self.key_code);
        out.put_i32(self.action);
        out.put_u8(u8::from(self.repeat));
    }

    fn decode(mut buf: &[u8]) -> Result<Self> {
        need(buf, 9, "virtual key")?;
        Ok(Self {
            key_code: buf.get_i32(),
            action: buf.get_i32(),
            repeat: buf.get_u8() != 0,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualJoystickEvent {
    pub action: i32,
    pub left_stick_x: f32,
    pub left_stick_y: f32,
    pub right_stick_x: f32,
    pub right_stick_y: f32,
    pub left_trigger: f32,
    pub right_trigger: f32,
    pub hat_x: f32,
    pub hat_y: f32,
}

impl Payload for VirtualJoystickEvent {
    const TYPE: MessageType = MessageType::VirtualJoystickInput;

    fn encode(&self, out: &mut BytesMut) {
        out.put_i32(self.action);
        for v in [
            self.left_stick_x,
            self.left_stick_y,
            self.right_stick_x,
            self.right_stick_y,
            self.left_trigger,
            self.right_trigger,
            self.hat_x,
            self.hat_y,
        ] {
            out.put_f32(v);
        }
    }

    fn decode(mut buf: &[u8]) -> Result<Self> {
        need(buf, 4 + 8 * 4, "virtual joystick")?;
        Ok(Self {
            action: buf.get_i32(),
            left_stick_x: buf.get_f32(),
            left_stick_y: buf.get_f32(),
            right_stick_x: buf.get_f32(),
            right_stick_y: buf.get_f32(),
            left_trigger: buf.get_f32(),
            right_trigger: buf.get_f32(),
            hat_x: buf.get_f32(),
            hat_y: buf.get_f32(),
        })
    }
}

/// RGBA in 0..=1.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CameraBackgroundColor {
    pub red: f32,
    pub green: f32,
    pub blue: f32,
    pub alpha: f32,
}

impl Payload for CameraBackgroundColor {
    const TYPE: MessageType = MessageType::CameraBackgroundColor;

    fn encode(&self, out: &mut BytesMut) {
        out.put_f32(self.red);
        out.put_f32(self.green);
        out.put_f32(self.blue);
        out.put_f32(self.alpha);
    }

    fn decode(mut buf: &[u8]) -> Result<Self> {
        need(buf, 16, "background color")?;
        Ok(Self {
            red: buf.get_f32(),
            green: buf.get_f32(),
            blue: buf.get_f32(),
            alpha: buf.get_f32(),
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn out_of_range_enums_decode_to_unknown() {
        let mut wire = CameraPose::default().encode_to_bytes().to_vec();
        let n = wire.len();
        wire[n - 2] = 42;
        wire[n - 1] = 200;
        let pose = CameraPose::decode(&wire).unwrap();
        assert_eq!(pose.mode, CameraMode::Unknown(42));
        assert_eq!(pose.scene_type, SceneType::Unknown(200));
        assert_eq!(u8::from(pose.mode), 42);

        let cmd = OverlayControlCommand::decode(&[9]).unwrap();
        assert_eq!(cmd.action, OverlayAction::Unknown(9));
    }

    #[test]
    fn connecting_presence_is_preserved() {
        for flag in [None, Some(false), Some(true)] {
            let pose = CameraPose {
                is_connecting: flag,
                ..CameraPose::default()
            };
            let back = CameraPose::decode(&pose.encode_to_bytes()).unwrap();
            assert_eq!(back.is_connecting, flag);
        }
    }

    #[test]
    fn truncated_pose_is_a_payload_error() {
        let wire = CameraPose::default().encode_to_bytes();
        let err = CameraPose::decode(&wire[..wire.len() - 1]).unwrap_err();
        assert_eq!(err.code().as_str(), "PAYLOAD");
    }

    #[test]
    fn empty_archive_info_is_the_request() {
        assert!(ArchiveInfo::request().encode_to_bytes().is_empty());
        assert_eq!(ArchiveInfo::decode(&[]).unwrap(), ArchiveInfo::request());
        assert!(ArchiveInfo::decode(&[0, 1, 2]).is_err());
    }

    #[test]
    fn config_patch_rejects_bad_utf8_name() {
        let mut wire = BytesMut::new();
        wire.put_u8(1);
        wire.put_u16(1);
        wire.put_u8(2);
        wire.put_slice(&[0xFF, 0xFE]);
        wire.put_f64(1.0);
        assert!(ConfigUpdatePatch::decode(&wire).is_err());
    }
}
