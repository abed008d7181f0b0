//! Length-prefixed envelope framing (panic-free).
//!
//! ```text
//! [u32 BE: len = 4 + payload.len()][u32 BE: type id][payload]
//! ```
//!
//! Parsing rules:
//! - Never index (`buf[0]`); always use `Buf` and `remaining()` checks.
//! - Never `unwrap()` / `expect()` / `panic!()` in production paths.
//! - Fail closed: a bad length or unknown id is an error, never a resync.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{OverlinkError, Result};
use crate::protocol::payload::Payload;
use crate::protocol::types::MessageType;

/// Size of the length prefix.
pub const LEN_PREFIX: usize = 4;
/// Size of the type id that the length covers.
pub const TYPE_ID_LEN: usize = 4;
/// Upper bound on the declared length (type id + payload).
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// One decoded envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Message type.
    pub ty: MessageType,
    /// Opaque payload (zero-copy slice of the read buffer).
    pub payload: Bytes,
}

impl Frame {
    pub fn new(ty: MessageType, payload: impl Into<Bytes>) -> Self {
        Self {
            ty,
            payload: payload.into(),
        }
    }

    /// Build a frame from a typed payload.
    pub fn from_payload<P: Payload>(msg: &P) -> Self {
        Self {
            ty: P::TYPE,
            payload: msg.encode_to_bytes(),
        }
    }

    /// Decode the payload as `P`, checking that the frame actually carries `P`.
    pub fn decode_payload<P: Payload>(&self) -> Result<P> {
        if self.ty != P::TYPE {
            return Err(OverlinkError::Payload(format!(
                "frame carries {} but {} was requested",
                self.ty,
                P::TYPE
            )));
        }
        P::decode(&self.payload)
    }

    /// Serialize to wire bytes.
    pub fn encode(&self) -> Bytes {
        encode_frame(self.ty, &self.payload)
    }
}

/// Result of an incremental decode attempt.
#[derive(Debug, PartialEq)]
pub enum FrameStatus {
    /// A full frame was parsed; `consumed` bytes may be discarded from the buffer.
    Complete { frame: Frame, consumed: usize },
    /// The buffer holds only a prefix of the next frame.
    NeedMoreData,
}

/// Encode `(ty, payload)` into one wire frame.
pub fn encode_frame(ty: MessageType, payload: &[u8]) -> Bytes {
    let declared = TYPE_ID_LEN + payload.len();
    let mut out = BytesMut::with_capacity(LEN_PREFIX + declared);
    out.put_u32(declared as u32);
    out.put_u32(ty.id());
    out.put_slice(payload);
    out.freeze()
}

/// Read only the declared length from a buffer that holds at least the prefix.
///
/// Lets a transport validate the header before waiting for the body.
pub fn peek_declared_len(buf: &[u8]) -> Result<Option<usize>> {
    let mut cur = buf;
    if cur.remaining() < LEN_PREFIX {
        return Ok(None);
    }
    let declared = cur.get_u32() as usize;
    check_declared_len(declared)?;
    Ok(Some(declared))
}

fn check_declared_len(declared: usize) -> Result<()> {
    if declared < TYPE_ID_LEN {
        return Err(OverlinkError::Framing(format!(
            "declared length {declared} shorter than type id"
        )));
    }
    if declared > MAX_FRAME_LEN {
        return Err(OverlinkError::Framing(format!(
            "declared length {declared} exceeds maximum {MAX_FRAME_LEN}"
        )));
    }
    Ok(())
}

/// Decode the next frame from the front of `buf`.
///
/// Returns `NeedMoreData` while the buffer holds only part of a frame. Any
/// header violation is an error and the caller must drop the connection.
pub fn decode_frame(buf: &[u8]) -> Result<FrameStatus> {
    let Some(declared) = peek_declared_len(buf)? else {
        return Ok(FrameStatus::NeedMoreData);
    };

    let total = LEN_PREFIX + declared;
    if buf.len() < total {
        return Ok(FrameStatus::NeedMoreData);
    }

    let mut body = &buf[LEN_PREFIX..total];
    let ty = MessageType::from_id(body.get_u32())?;
    let payload = Bytes::copy_from_slice(body);

    Ok(FrameStatus::Complete {
        frame: Frame { ty, payload },
        consumed: total,
    })
}

/// Decode a buffer that must contain exactly one frame.
///
/// Used where the carrier delivers whole frames (registry transport): a short
/// buffer and trailing bytes are both length mismatches.
pub fn decode_exact(buf: Bytes) -> Result<Frame> {
    match decode_frame(&buf)? {
        FrameStatus::Complete { frame, consumed } if consumed == buf.len() => Ok(frame),
        FrameStatus::Complete { consumed, .. } => Err(OverlinkError::Framing(format!(
            "declared frame of {consumed} bytes but buffer holds {}",
            buf.len()
        ))),
        FrameStatus::NeedMoreData => Err(OverlinkError::Framing(format!(
            "truncated frame ({} bytes)",
            buf.len()
        ))),
    }
}

/// Pull every complete frame out of a growable read buffer.
///
/// Consumed bytes are split off; a trailing partial frame stays in `buf`.
pub fn drain_frames(buf: &mut BytesMut) -> Result<Vec<Frame>> {
    let mut frames = Vec::new();
    loop {
        match decode_frame(buf)? {
            FrameStatus::Complete { frame, consumed } => {
                buf.advance(consumed);
                frames.push(frame);
            }
            FrameStatus::NeedMoreData => return Ok(frames),
        }
    }
}
