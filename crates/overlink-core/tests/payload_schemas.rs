//! Typed payload tests: schema binding, JSON debug form and realistic values.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use overlink_core::protocol::payload::{
    ArchiveInfo, ArchivePositionSetRequest, CameraBackgroundColor, CameraInfoOverlayControl,
    CameraMode, CameraPose, ConfigUpdateKind, ConfigUpdatePatch, OverlayAction, MAX_CONFIG_NAME_LEN,
    OverlayControlCommand, Quat, SceneType, Vec3, VirtualJoystickEvent, VirtualKeyEvent,
};
use overlink_core::protocol::{Frame, MessageType, Payload};

mod vector_loader;
use vector_loader::read_vector_file;

#[test]
fn pose_json_min_uses_defaults() {
    let pose = CameraPose::from_json(&read_vector_file("pose_json_min.json")).unwrap();
    assert!(pose.is_valid);
    assert_eq!(pose.fov, 45.5);
    assert_eq!(pose.rotation, Quat::default());
    assert_eq!(pose.mode, CameraMode::SystemCamera);
    assert_eq!(pose.is_connecting, None);
}

#[test]
fn pose_json_full_maps_unknown_scene() {
    let pose = CameraPose::from_json(&read_vector_file("pose_json_full.json")).unwrap();
    assert_eq!(pose.position, Vec3 { x: 1.5, y: -2.0, z: 3.25 });
    assert_eq!(pose.mode, CameraMode::FirstPerson);
    assert_eq!(pose.scene_type, SceneType::Unknown(7));
    assert_eq!(pose.is_connecting, Some(false));

    let back = CameraPose::from_json(&pose.to_json().unwrap()).unwrap();
    assert_eq!(back, pose);
}

#[test]
fn live_pose_survives_the_wire() {
    let pose = CameraPose {
        is_valid: true,
        position: Vec3 { x: 0.25, y: 1.6, z: -4.0 },
        rotation: Quat { x: 0.0, y: 0.38268343, z: 0.0, w: 0.9238795 },
        fov: 32.5,
        mode: CameraMode::Follow,
        scene_type: SceneType::WithLive,
        is_connecting: Some(false),
    };
    let frame = Frame::from_payload(&pose);
    assert_eq!(frame.ty, MessageType::CameraData);
    let decoded = overlink_core::protocol::decode_exact(frame.encode()).unwrap();
    assert_eq!(decoded.decode_payload::<CameraPose>().unwrap(), pose);
}

#[test]
fn decode_payload_checks_the_frame_type() {
    let frame = Frame::from_payload(&ArchivePositionSetRequest { seconds: 42.5 });
    let err = frame.decode_payload::<ArchiveInfo>().unwrap_err();
    assert_eq!(err.code().as_str(), "PAYLOAD");
    assert_eq!(frame.decode_payload::<ArchivePositionSetRequest>().unwrap().seconds, 42.5);
}

#[test]
fn overlay_commands_share_a_body_but_not_a_type() {
    let general = OverlayControlCommand::new(OverlayAction::StartOverlay);
    let info = CameraInfoOverlayControl::start();
    assert_eq!(Frame::from_payload(&general).ty, MessageType::OverlayControl);
    assert_eq!(Frame::from_payload(&info).ty, MessageType::OverlayControlCameraInfo);
    assert_eq!(info.encode_to_bytes().to_vec(), vec![3u8]);
    assert_eq!(CameraInfoOverlayControl::stop().action(), OverlayAction::StopCameraInfoOverlay);
}

#[test]
fn sensitivity_patch_keeps_named_fields() {
    let patch = ConfigUpdatePatch::new(ConfigUpdateKind::Full)
        .with("cameraMovementSensitivity", 1.25)
        .and_then(|p| p.with("cameraVerticalSensitivity", 0.8))
        .and_then(|p| p.with("cameraFovSensitivity", 1.0))
        .and_then(|p| p.with("cameraRotationSensitivity", 2.0))
        .and_then(|p| p.with_flag("enableFreeCamera", true))
        .unwrap();

    let back = ConfigUpdatePatch::decode(&patch.encode_to_bytes()).unwrap();
    assert_eq!(back.kind, ConfigUpdateKind::Full);
    assert_eq!(back.get("cameraMovementSensitivity"), Some(1.25));
    assert_eq!(back.get("enableFreeCamera"), Some(1.0));
    assert_eq!(back.len(), 5);
    assert_eq!(back, patch);
}

#[test]
fn config_patch_with_missing_field_bytes_fails() {
    let patch = ConfigUpdatePatch::new(ConfigUpdateKind::Partial)
        .with("targetFrameRate", 60.0)
        .unwrap();
    let wire = patch.encode_to_bytes();
    assert!(ConfigUpdatePatch::decode(&wire[..wire.len() - 3]).is_err());
}

#[test]
fn config_patch_refuses_names_the_wire_cannot_hold() {
    let longest = "a".repeat(MAX_CONFIG_NAME_LEN);
    let patch = ConfigUpdatePatch::new(ConfigUpdateKind::Partial)
        .with(longest.clone(), 1.0)
        .and_then(|p| p.with(format!("{}b", &longest[1..]), 2.0))
        .unwrap();
    let back = ConfigUpdatePatch::decode(&patch.encode_to_bytes()).unwrap();
    assert_eq!(back, patch);
    assert_eq!(back.len(), 2);

    // Two names sharing a 255-byte prefix must not collapse into one field.
    let err = patch.with("a".repeat(300), 3.0).unwrap_err();
    assert_eq!(err.code().as_str(), "PAYLOAD");
    let err = ConfigUpdatePatch::new(ConfigUpdateKind::Partial)
        .with(format!("{}b", "a".repeat(300)), 4.0)
        .unwrap_err();
    assert_eq!(err.code().as_str(), "PAYLOAD");
}

#[test]
fn input_events_decode_field_by_field() {
    let key = VirtualKeyEvent { key_code: 51, action: 0, repeat: false };
    assert_eq!(VirtualKeyEvent::decode(&key.encode_to_bytes()).unwrap(), key);

    let stick = VirtualJoystickEvent {
        action: 2,
        right_stick_x: 0.5,
        right_stick_y: -0.75,
        ..VirtualJoystickEvent::default()
    };
    let back = VirtualJoystickEvent::decode(&stick.encode_to_bytes()).unwrap();
    assert_eq!(back.right_stick_y, -0.75);
    assert_eq!(back.left_trigger, 0.0);

    let color = CameraBackgroundColor { red: 0.0, green: 1.0, blue: 0.0, alpha: 1.0 };
    assert_eq!(CameraBackgroundColor::decode(&color.encode_to_bytes()).unwrap(), color);
}
