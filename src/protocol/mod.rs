//! Protocol module - envelopes and NUL-delimited framing.
//!
//! This module implements the wire format:
//! - JSON-RPC 2.0 envelope type with kind classification
//! - Frame buffer splitting the byte stream on the NUL delimiter

mod envelope;
mod frame_buffer;

pub use envelope::{Envelope, EnvelopeKind, RpcErrorObject, JSONRPC_VERSION};
pub use frame_buffer::{decode, encode, FrameBuffer, Frames, DEFAULT_MAX_FRAME_SIZE, DELIMITER};
