//! Async frame reader/writer over any tokio byte stream.
//!
//! Framing itself lives in `overlink_core::protocol::frame`; this module only
//! moves bytes between a socket and a `BytesMut` buffer.

use std::collections::VecDeque;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use overlink_core::error::{OverlinkError, Result};
use overlink_core::protocol::frame::TYPE_ID_LEN;
use overlink_core::protocol::{drain_frames, encode_frame, Frame, MessageType, MAX_FRAME_LEN};

const READ_CHUNK: usize = 8 * 1024;

/// Buffered frame reader. Partial frames survive across reads.
pub struct FrameReader<R> {
    inner: R,
    buf: BytesMut,
    pending: VecDeque<Frame>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(READ_CHUNK),
            pending: VecDeque::new(),
        }
    }

    /// Next complete frame. `Ok(None)` on clean EOF.
    ///
    /// A framing error is terminal: the buffer is no longer aligned and the
    /// caller must drop the connection.
    pub async fn next_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Ok(Some(frame));
            }

            let frames = drain_frames(&mut self.buf)?;
            if !frames.is_empty() {
                self.pending.extend(frames);
                continue;
            }

            self.buf.reserve(READ_CHUNK);
            let n = self.inner.read_buf(&mut self.buf).await?;
            if n == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(OverlinkError::Framing(format!(
                    "peer closed with {} bytes of a partial frame buffered",
                    self.buf.len()
                )));
            }
        }
    }
}

/// Encode for sending, refusing payloads the receiving side would reject.
pub fn encode_outbound(ty: MessageType, payload: &[u8]) -> Result<bytes::Bytes> {
    if payload.len() + TYPE_ID_LEN > MAX_FRAME_LEN {
        return Err(OverlinkError::Framing(format!(
            "payload of {} bytes exceeds frame limit",
            payload.len()
        )));
    }
    Ok(encode_frame(ty, payload))
}

/// Write one pre-encoded frame and flush.
pub async fn write_frame<W: AsyncWrite + Unpin>(w: &mut W, wire: &[u8]) -> Result<()> {
    w.write_all(wire).await?;
    w.flush().await?;
    Ok(())
}
