//! Reassembly buffer for inbound chunks.
//!
//! Uses `bytes::BytesMut` for buffer management. Chunks of one object must
//! arrive in monotonically increasing offset order; an `is_first` chunk
//! restarts reassembly. Sequence errors surface as [`ChunkError`] so the
//! session layer can force renegotiation.

use bytes::{Bytes, BytesMut};
use thiserror::Error;

use super::wire_format::{ChunkHeader, CHUNK_HEADER_SIZE};

/// A protocol violation detected while validating an inbound chunk.
///
/// Any of these drops the partial reassembly and forces the session layer
/// into local-initiated renegotiation.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ChunkError {
    /// Chunk is too short to carry a header and at least one payload byte.
    #[error("chunk of {0} bytes is too short")]
    TooShort(usize),

    /// The is_first flag does not match the reassembly state.
    #[error("first-chunk flag does not match reassembly state")]
    FirstFlagMismatch,

    /// A continuation chunk's offset does not equal the bytes received so far.
    #[error("continuation offset {got} does not match received byte count {expected}")]
    OffsetMismatch {
        /// Offset announced by the chunk.
        got: u32,
        /// Bytes accumulated so far.
        expected: u32,
    },

    /// The chunk's payload would run past the announced total size.
    #[error("chunk payload overruns the announced total size")]
    Overrun,
}

/// Accumulates inbound chunk payloads until an object is complete.
#[derive(Debug, Default)]
pub struct Reassembler {
    /// Payload bytes accumulated so far.
    buffer: BytesMut,
    /// Total payload size announced by the object's first chunk.
    total_size: usize,
}

impl Reassembler {
    /// Create an empty reassembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate one chunk (header + payload) and accumulate its payload.
    ///
    /// Returns:
    /// - `Ok(Some(payload))` when the object is complete; `payload` is the
    ///   full accumulated byte sequence (JSON text plus NUL terminator)
    /// - `Ok(None)` when more chunks are needed
    /// - `Err(...)` on a protocol violation; the partial reassembly is
    ///   dropped and the caller must renegotiate the session
    pub fn push(&mut self, chunk: &[u8]) -> Result<Option<Bytes>, ChunkError> {
        if chunk.len() <= CHUNK_HEADER_SIZE {
            self.clear();
            return Err(ChunkError::TooShort(chunk.len()));
        }
        let header = match ChunkHeader::decode(chunk) {
            Some(header) => header,
            None => {
                self.clear();
                return Err(ChunkError::TooShort(chunk.len()));
            }
        };
        let payload = &chunk[CHUNK_HEADER_SIZE..];

        let expecting_first = self.buffer.is_empty();
        if header.is_first != expecting_first {
            self.clear();
            return Err(ChunkError::FirstFlagMismatch);
        }

        if header.is_first {
            self.total_size = header.value as usize;
        } else {
            if header.value as usize != self.buffer.len() {
                let expected = self.buffer.len() as u32;
                self.clear();
                return Err(ChunkError::OffsetMismatch {
                    got: header.value,
                    expected,
                });
            }
            if self.buffer.len() + payload.len() > self.total_size {
                self.clear();
                return Err(ChunkError::Overrun);
            }
        }

        self.buffer.extend_from_slice(payload);

        if self.buffer.len() >= self.total_size {
            let payload = self.buffer.split().freeze();
            self.total_size = 0;
            return Ok(Some(payload));
        }
        Ok(None)
    }

    /// Drop any partial reassembly and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.total_size = 0;
    }

    /// Bytes accumulated so far.
    pub fn received(&self) -> usize {
        self.buffer.len()
    }

    /// Whether no reassembly is in progress.
    pub fn is_idle(&self) -> bool {
        self.buffer.is_empty()
    }
}
