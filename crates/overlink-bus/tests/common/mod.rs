#![allow(dead_code)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use overlink_bus::transport::{PeerId, TransportEvents};
use overlink_core::error::OverlinkError;
use overlink_core::protocol::{Frame, MessageType};

pub const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Connected(PeerId),
    Disconnected(PeerId),
    Message(PeerId, MessageType, Vec<u8>),
    Failed(u32),
    DecodeError(PeerId, &'static str),
}

/// Event sink that forwards everything into a channel the test can await.
pub struct Recorder {
    tx: mpsc::UnboundedSender<Event>,
}

impl Recorder {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl TransportEvents for Recorder {
    fn on_message(&self, peer: PeerId, frame: Frame) {
        let _ = self.tx.send(Event::Message(peer, frame.ty, frame.payload.to_vec()));
    }
    fn on_connected(&self, peer: PeerId) {
        let _ = self.tx.send(Event::Connected(peer));
    }
    fn on_disconnected(&self, peer: PeerId) {
        let _ = self.tx.send(Event::Disconnected(peer));
    }
    fn on_connection_failed(&self, attempts: u32) {
        let _ = self.tx.send(Event::Failed(attempts));
    }
    fn on_decode_error(&self, peer: PeerId, err: &OverlinkError) {
        let _ = self.tx.send(Event::DecodeError(peer, err.code().as_str()));
    }
}

pub async fn next(rx: &mut mpsc::UnboundedReceiver<Event>) -> Event {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Skip events until one matches.
pub async fn wait_for(
    rx: &mut mpsc::UnboundedReceiver<Event>,
    pred: impl Fn(&Event) -> bool,
) -> Event {
    loop {
        let ev = next(rx).await;
        if pred(&ev) {
            return ev;
        }
    }
}

pub async fn wait_connected(rx: &mut mpsc::UnboundedReceiver<Event>) -> PeerId {
    match wait_for(rx, |e| matches!(e, Event::Connected(_))).await {
        Event::Connected(id) => id,
        other => panic!("unexpected {other:?}"),
    }
}

/// Poll `cond` until it holds or the wait budget runs out.
pub async fn eventually(what: &str, cond: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !cond() {
        if tokio::time::Instant::now() > deadline {
            panic!("condition never held: {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub fn sock(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.sock"))
}
