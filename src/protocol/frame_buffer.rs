//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for buffer management. Every document on the wire
//! is terminated by a single NUL byte, so extraction is a scan for the
//! delimiter. A small state machine handles oversized documents:
//! - `Accumulating`: buffering bytes until the next delimiter
//! - `Discarding`: an oversized document is being skipped up to its delimiter
//!
//! # Example
//!
//! ```
//! use qrc_client::protocol::{encode, FrameBuffer};
//! use qrc_client::protocol::Envelope;
//!
//! let mut buffer = FrameBuffer::new();
//! let bytes = encode(&Envelope::notification("EngineStatus", None)).unwrap();
//!
//! // Data arrives in arbitrary chunks from the socket
//! assert_eq!(buffer.feed(&bytes[..5]).count(), 0);
//! let frames: Vec<_> = buffer.feed(&bytes[5..]).collect();
//! assert_eq!(frames.len(), 1);
//! ```

use bytes::{Bytes, BytesMut};

use super::Envelope;
use crate::error::{QrcError, Result};

/// Byte terminating every document on the wire.
pub const DELIMITER: u8 = 0x00;

/// Default maximum document size (4 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

const INITIAL_CAPACITY: usize = 16 * 1024;

/// Serialize an envelope and append the delimiter.
pub fn encode(envelope: &Envelope) -> Result<Bytes> {
    let mut bytes = serde_json::to_vec(envelope)?;
    bytes.push(DELIMITER);
    Ok(Bytes::from(bytes))
}

/// Parse one document (without its delimiter).
pub fn decode(document: &[u8]) -> Result<Envelope> {
    serde_json::from_slice(document).map_err(|e| QrcError::MalformedEnvelope(e.to_string()))
}

#[derive(Debug, Clone, Copy)]
enum State {
    Accumulating,
    /// Skipping the tail of an oversized document.
    Discarding { dropped: usize },
}

/// Buffer for accumulating incoming bytes and extracting complete envelopes.
pub struct FrameBuffer {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Maximum allowed document size, delimiter excluded.
    max_frame_size: usize,
    /// Prefix of `buffer` already known to contain no delimiter.
    scanned: usize,
}

impl FrameBuffer {
    /// Create a new frame buffer with the default maximum document size.
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a new frame buffer with a custom maximum document size.
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(INITIAL_CAPACITY),
            state: State::Accumulating,
            max_frame_size,
            scanned: 0,
        }
    }

    /// Push data into the buffer and lazily extract complete envelopes.
    ///
    /// Each item is either a decoded envelope or the error for one unit
    /// (`FrameTooLarge`, `MalformedEnvelope`); an error never ends the
    /// sequence early. Items not consumed before the iterator is dropped
    /// are produced by the next call.
    pub fn feed(&mut self, data: &[u8]) -> Frames<'_> {
        self.buffer.extend_from_slice(data);
        Frames { buffer: self }
    }

    fn next_frame(&mut self) -> Option<Result<Envelope>> {
        loop {
            match self.state {
                State::Accumulating => {
                    let found = self.buffer[self.scanned..]
                        .iter()
                        .position(|&b| b == DELIMITER)
                        .map(|pos| self.scanned + pos);

                    let Some(end) = found else {
                        if self.buffer.len() > self.max_frame_size {
                            let size = self.buffer.len();
                            self.buffer.clear();
                            self.scanned = 0;
                            self.state = State::Discarding { dropped: size };
                            return Some(Err(QrcError::FrameTooLarge {
                                size,
                                max: self.max_frame_size,
                            }));
                        }
                        self.scanned = self.buffer.len();
                        return None;
                    };

                    let unit = self.buffer.split_to(end + 1);
                    self.scanned = 0;
                    let document = &unit[..end];

                    if document.len() > self.max_frame_size {
                        return Some(Err(QrcError::FrameTooLarge {
                            size: document.len(),
                            max: self.max_frame_size,
                        }));
                    }
                    if document.iter().all(u8::is_ascii_whitespace) {
                        continue;
                    }
                    return Some(decode(document));
                }

                State::Discarding { dropped } => {
                    match self.buffer.iter().position(|&b| b == DELIMITER) {
                        Some(pos) => {
                            let _ = self.buffer.split_to(pos + 1);
                            tracing::debug!(dropped = dropped + pos, "skipped oversized frame");
                            self.state = State::Accumulating;
                        }
                        None => {
                            self.state = State::Discarding {
                                dropped: dropped + self.buffer.len(),
                            };
                            self.buffer.clear();
                            return None;
                        }
                    }
                }
            }
        }
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.scanned = 0;
        self.state = State::Accumulating;
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match self.state {
            State::Accumulating => "Accumulating",
            State::Discarding { .. } => "Discarding",
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Lazy sequence of envelopes extracted by [`FrameBuffer::feed`].
pub struct Frames<'a> {
    buffer: &'a mut FrameBuffer,
}

impl Iterator for Frames<'_> {
    type Item = Result<Envelope>;

    fn next(&mut self) -> Option<Self::Item> {
        self.buffer.next_frame()
    }
}
