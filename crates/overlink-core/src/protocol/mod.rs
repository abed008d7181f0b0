//! Wire protocol: envelope framing, the message type registry, and payload schemas.
//!
//! Every frame on either transport is `[len][type id][payload]`. The type id
//! selects exactly one payload schema. All parsers are panic-free: malformed
//! input is reported as `OverlinkError` so a bad peer can only cost its own
//! connection.

pub mod frame;
pub mod payload;
pub mod types;

pub use frame::{decode_exact, decode_frame, drain_frames, encode_frame, Frame, FrameStatus, MAX_FRAME_LEN};
pub use payload::Payload;
pub use types::MessageType;
