//! Transport module - socket handling.
//!
//! Provides the TCP connection to a core. The engine splits the stream into
//! a read half (owned by the read loop) and a write half (owned by the
//! writer task).

mod tcp;

pub use tcp::{open, CONTROL_PORT, PLAIN_PORT};
