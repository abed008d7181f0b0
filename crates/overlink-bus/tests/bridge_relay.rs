#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use overlink_bus::bridge::Bridge;
use overlink_bus::config;
use overlink_bus::dispatch::MessageRouter;
use overlink_bus::obs::BusMetrics;
use overlink_bus::shell::ServiceShell;
use overlink_bus::transport::{ReconnectPolicy, StreamClient};
use overlink_core::protocol::payload::{
    CameraInfoOverlayControl, CameraOverlayRequest, CameraPose, OverlayAction, OverlayControlCommand,
};
use overlink_core::protocol::{MessageType, Payload};

use common::{eventually, sock};

fn policy() -> ReconnectPolicy {
    ReconnectPolicy {
        initial_backoff: Duration::from_millis(20),
        max_backoff: Duration::from_millis(100),
        max_attempts: 0,
    }
}

/// Router whose handlers record every payload of the given types.
fn recording_router(types: &[MessageType]) -> (Arc<MessageRouter>, Arc<Mutex<Vec<(MessageType, Vec<u8>)>>>) {
    let router = Arc::new(MessageRouter::new());
    let seen = Arc::new(Mutex::new(Vec::new()));
    for &ty in types {
        let seen = Arc::clone(&seen);
        router.register_fn(ty, move |payload| {
            seen.lock().unwrap().push((ty, payload.to_vec()));
            Ok(true)
        });
    }
    (router, seen)
}

#[tokio::test]
async fn bridge_relays_between_host_and_control_surfaces() {
    let dir = tempfile::tempdir().unwrap();
    let host_path = sock(dir.path(), "host");
    let control_path = sock(dir.path(), "control");
    let cfg = config::load_from_str(&format!(
        "version: 1\nstream:\n  socket_path: \"{}\"\nregistry:\n  socket_path: \"{}\"\noverlay:\n  pose_interval_ms: 20\n  stale_after_ms: 300\n",
        host_path.display(),
        control_path.display()
    ))
    .unwrap();
    let bridge = Bridge::start(cfg).await.unwrap();

    let metrics = Arc::new(BusMetrics::default());
    let (host_router, host_seen) = recording_router(&[
        MessageType::OverlayControl,
        MessageType::OverlayControlCameraInfo,
    ]);
    let host = ServiceShell::start(
        "host",
        Arc::new(StreamClient::new(&host_path, policy())),
        host_router,
        Arc::clone(&metrics),
    )
    .await
    .unwrap();

    let (ui_router, ui_seen) = recording_router(&[MessageType::CameraData]);
    let ui = ServiceShell::start(
        "ui",
        Arc::new(StreamClient::new(&control_path, policy())),
        ui_router,
        Arc::clone(&metrics),
    )
    .await
    .unwrap();

    eventually("host attached", || host.is_connected() && bridge.stream().is_connected()).await;
    eventually("ui attached", || {
        bridge.registry().map(|r| r.client_count()) == Some(1)
    })
    .await;

    // Nothing asked for poses yet: host frames are cached, not broadcast.
    host.send_payload(&CameraPose::connecting()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(ui_seen.lock().unwrap().is_empty());

    // control surface -> host, and the bridge starts re-emitting poses
    ui.send_payload(&CameraInfoOverlayControl::start()).await.unwrap();
    eventually("control relayed", || {
        host_seen
            .lock()
            .unwrap()
            .iter()
            .any(|(ty, _)| *ty == MessageType::OverlayControlCameraInfo)
    })
    .await;
    eventually("placeholder poses", || !ui_seen.lock().unwrap().is_empty()).await;
    let (ty, body) = ui_seen.lock().unwrap()[0].clone();
    assert_eq!(ty, MessageType::CameraData);
    assert_eq!(CameraPose::decode(&body).unwrap().is_connecting, Some(true));

    // host -> control surface at the configured cadence
    let live = CameraPose {
        is_valid: true,
        fov: 64.0,
        ..CameraPose::default()
    };
    host.send_payload(&live).await.unwrap();
    eventually("live pose relayed", || {
        ui_seen.lock().unwrap().iter().any(|(_, body)| {
            let pose = CameraPose::decode(body).unwrap();
            pose.is_valid && pose.fov == 64.0 && pose.is_connecting == Some(false)
        })
    })
    .await;
    assert_eq!(bridge.status()["pose_stream"]["streaming"], serde_json::json!(true));

    // A host that goes quiet turns back into placeholders after stale_after_ms.
    eventually("stale feed falls back to placeholders", || {
        ui_seen
            .lock()
            .unwrap()
            .last()
            .is_some_and(|(_, body)| CameraPose::decode(body).unwrap().is_connecting == Some(true))
    })
    .await;

    // camera overlay request is answered by the bridge itself
    host.send_payload(&CameraOverlayRequest).await.unwrap();
    eventually("overlay start answered", || {
        host_seen.lock().unwrap().iter().any(|(ty, body)| {
            *ty == MessageType::OverlayControl
                && OverlayControlCommand::decode(body).unwrap().action == OverlayAction::StartOverlay
        })
    })
    .await;

    let status = bridge.status();
    assert_eq!(status["stream"]["connected"], serde_json::json!(true));
    assert!(bridge.metrics().render().contains("overlink_frames_received_total"));

    bridge.shutdown();
    eventually("host sees bridge go away", || !host.is_connected()).await;
    assert!(!host_path.exists());
    assert!(!control_path.exists());
}

#[tokio::test]
async fn bridge_without_registry_still_answers_overlay_requests() {
    let dir = tempfile::tempdir().unwrap();
    let host_path = sock(dir.path(), "solo");
    let cfg = config::load_from_str(&format!(
        "version: 1\nstream:\n  socket_path: \"{}\"\nregistry:\n  enabled: false\n",
        host_path.display()
    ))
    .unwrap();
    let bridge = Bridge::start(cfg).await.unwrap();
    assert!(bridge.registry().is_none());

    let (host_router, host_seen) = recording_router(&[MessageType::OverlayControl]);
    let host = ServiceShell::start(
        "host",
        Arc::new(StreamClient::new(&host_path, policy())),
        host_router,
        Arc::new(BusMetrics::default()),
    )
    .await
    .unwrap();
    eventually("host attached", || host.is_connected()).await;

    host.send_payload(&CameraPose::connecting()).await.unwrap();
    host.send_payload(&CameraOverlayRequest).await.unwrap();
    eventually("overlay start answered", || !host_seen.lock().unwrap().is_empty()).await;

    let m = bridge.metrics();
    eventually("pose handled", || {
        m.frames_received
            .get(&[("transport", "stream_server"), ("type", "CAMERA_DATA")])
            == 1
    })
    .await;
    assert_eq!(m.handler_failures.total(), 0);
}
