//! overlink: a typed message bus between a host process and its control surfaces.
//!
//! Depend on this crate alone to get both halves:
//! - [`core`]: envelope framing, the message type table, and payload schemas.
//! - [`bus`]: transports, the router, service shells, and the overlay protocol.
//!
//! ```
//! use overlink::core::protocol::{decode_exact, encode_frame, MessageType};
//!
//! let wire = encode_frame(MessageType::OverlayControl, &[1]);
//! let frame = decode_exact(wire).unwrap();
//! assert_eq!(frame.ty, MessageType::OverlayControl);
//!
//! let router = overlink::bus::MessageRouter::new();
//! assert!(!router.route_message(frame.ty, &frame.payload));
//! ```

pub mod core {
    pub use overlink_core::*;
}

pub mod bus {
    pub use overlink_bus::*;
}
