//! Hand-rolled WebSocket wire format: the upgrade handshake and text frames.
//!
//! Only the subset the duel protocol needs is implemented. Every inbound frame
//! is treated as one complete UTF-8 text message: the FIN bit and the opcode
//! are read but not interpreted, so fragmented messages, ping/pong and close
//! frames are not supported. Outbound frames are always single unmasked text
//! frames.

pub mod frame;
pub mod handshake;

pub use frame::{FrameError, apply_mask, encode_frame, read_frame, write_frame};
pub use handshake::{
    HandshakeError, WEBSOCKET_GUID, accept_key, handshake_response, read_handshake,
};
