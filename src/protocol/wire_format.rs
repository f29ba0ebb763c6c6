//! Wire format encoding and decoding.
//!
//! Implements the 4-byte chunk header:
//! ```text
//! ┌───────────────────────────────┬───────────┐
//! │ 31-bit value `n`              │ is_first  │
//! │ uint32 LE, bits 0-30          │ bit 31    │
//! └───────────────────────────────┴───────────┘
//! ```
//!
//! On the first chunk of an object `n` is the total payload size in bytes
//! (JSON text plus NUL terminator); on continuation chunks `n` is the byte
//! offset of the chunk's first payload byte.
//!
//! Also implements the 6-byte `ResetComplete` capability payload:
//! ```text
//! ┌─────────────┬─────────────┬──────────────┬──────────────┐
//! │ min_version │ max_version │ max_tx_chunk │ max_rx_chunk │
//! │ 1 byte      │ 1 byte      │ uint16 BE    │ uint16 BE    │
//! └─────────────┴─────────────┴──────────────┴──────────────┘
//! ```

/// Lowest protocol version this build speaks.
pub const PROTOCOL_MIN_VERSION: u8 = 1;

/// Highest protocol version this build speaks.
pub const PROTOCOL_MAX_VERSION: u8 = 1;

/// Largest chunk payload this build will transmit.
pub const MAX_TX_CHUNK_SIZE: u16 = 1000;

/// Largest chunk payload this build will accept.
pub const MAX_RX_CHUNK_SIZE: u16 = 1000;

/// Chunk header size in bytes (fixed, exactly 4).
pub const CHUNK_HEADER_SIZE: usize = 4;

/// `ResetComplete` capability payload size in bytes (fixed, exactly 6).
pub const CAPABILITIES_SIZE: usize = 6;

/// Largest object payload representable in the 31-bit size field.
pub const MAX_OBJECT_BYTES: usize = i32::MAX as usize;

/// Top bit of header byte 3 marks the opening chunk of an object.
const IS_FIRST_MASK: u8 = 0x80;

/// Decoded chunk header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    /// Whether this chunk opens a new object.
    pub is_first: bool,
    /// Total payload size (first chunk) or byte offset (continuation).
    pub value: u32,
}

impl ChunkHeader {
    /// Header for the opening chunk of an object of `total_size` bytes.
    pub fn first(total_size: u32) -> Self {
        Self {
            is_first: true,
            value: total_size,
        }
    }

    /// Header for a continuation chunk starting at byte `offset`.
    pub fn continuation(offset: u32) -> Self {
        Self {
            is_first: false,
            value: offset,
        }
    }

    /// Encode the header to bytes (Little Endian, top bit = is_first).
    ///
    /// # Example
    ///
    /// ```
    /// use postwire::protocol::ChunkHeader;
    ///
    /// let header = ChunkHeader::first(8);
    /// assert_eq!(header.encode(), [0x08, 0x00, 0x00, 0x80]);
    /// ```
    pub fn encode(&self) -> [u8; CHUNK_HEADER_SIZE] {
        let n = self.value;
        [
            (n & 0xff) as u8,
            ((n >> 8) & 0xff) as u8,
            ((n >> 16) & 0xff) as u8,
            ((n >> 24) & 0x7f) as u8 | if self.is_first { IS_FIRST_MASK } else { 0 },
        ]
    }

    /// Decode a header from the start of `buf`.
    ///
    /// Returns `None` if the buffer is shorter than [`CHUNK_HEADER_SIZE`].
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < CHUNK_HEADER_SIZE {
            return None;
        }
        let value = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3] & !IS_FIRST_MASK]);
        Some(Self {
            is_first: buf[3] & IS_FIRST_MASK != 0,
            value,
        })
    }
}

/// Protocol capabilities advertised in a `ResetComplete` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Lowest supported protocol version.
    pub min_version: u8,
    /// Highest supported protocol version.
    pub max_version: u8,
    /// Largest chunk payload the peer will transmit.
    pub max_tx_chunk_size: u16,
    /// Largest chunk payload the peer will accept.
    pub max_rx_chunk_size: u16,
}

impl Default for Capabilities {
    /// The capabilities of this build.
    fn default() -> Self {
        Self {
            min_version: PROTOCOL_MIN_VERSION,
            max_version: PROTOCOL_MAX_VERSION,
            max_tx_chunk_size: MAX_TX_CHUNK_SIZE,
            max_rx_chunk_size: MAX_RX_CHUNK_SIZE,
        }
    }
}

impl Capabilities {
    /// Encode capabilities to the 6-byte `ResetComplete` payload.
    pub fn encode(&self) -> [u8; CAPABILITIES_SIZE] {
        [
            self.min_version,
            self.max_version,
            (self.max_tx_chunk_size >> 8) as u8,
            (self.max_tx_chunk_size & 0xff) as u8,
            (self.max_rx_chunk_size >> 8) as u8,
            (self.max_rx_chunk_size & 0xff) as u8,
        ]
    }

    /// Decode a `ResetComplete` payload.
    ///
    /// Returns `None` unless `buf` is exactly [`CAPABILITIES_SIZE`] bytes.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() != CAPABILITIES_SIZE {
            return None;
        }
        Some(Self {
            min_version: buf[0],
            max_version: buf[1],
            max_tx_chunk_size: u16::from_be_bytes([buf[2], buf[3]]),
            max_rx_chunk_size: u16::from_be_bytes([buf[4], buf[5]]),
        })
    }

    /// Negotiate session parameters against a remote peer's capabilities.
    ///
    /// The session is accepted iff the two version ranges overlap. The
    /// negotiated version is the highest both sides speak; each direction's
    /// chunk size is the smaller of what the sender will transmit and what
    /// the receiver will accept.
    ///
    /// Returns `None` if the version ranges are disjoint or any negotiated
    /// parameter would be zero.
    pub fn negotiate(&self, remote: &Capabilities) -> Option<SessionParams> {
        if remote.min_version > self.max_version || self.min_version > remote.max_version {
            return None;
        }
        let params = SessionParams {
            version: self.max_version.min(remote.max_version),
            tx_chunk_size: self.max_tx_chunk_size.min(remote.max_rx_chunk_size),
            rx_chunk_size: self.max_rx_chunk_size.min(remote.max_tx_chunk_size),
        };
        if params.version == 0 || params.tx_chunk_size == 0 || params.rx_chunk_size == 0 {
            return None;
        }
        Some(params)
    }
}

/// Negotiated session parameters.
///
/// All fields are zero outside an open session and non-zero inside one;
/// [`SessionParams::is_negotiated`] distinguishes the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionParams {
    /// Negotiated protocol version.
    pub version: u8,
    /// Largest chunk payload we may transmit this session.
    pub tx_chunk_size: u16,
    /// Largest chunk payload we may receive this session.
    pub rx_chunk_size: u16,
}

impl SessionParams {
    /// Whether these parameters belong to an open session.
    #[inline]
    pub fn is_negotiated(&self) -> bool {
        self.version != 0
    }

    /// Reset all parameters to zero (session closed).
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_encode_decode_roundtrip() {
        let original = ChunkHeader::first(2500);
        let decoded = ChunkHeader::decode(&original.encode()).unwrap();
        assert_eq!(original, decoded);

        let original = ChunkHeader::continuation(1000);
        let decoded = ChunkHeader::decode(&original.encode()).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_header_little_endian_byte_order() {
        let header = ChunkHeader::continuation(0x0102_0304);
        assert_eq!(header.encode(), [0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn test_header_first_flag_in_top_bit() {
        // Total size 8 with is_first: [0x08, 0x00, 0x00, 0x80].
        let header = ChunkHeader::first(8);
        assert_eq!(header.encode(), [0x08, 0x00, 0x00, 0x80]);

        // Offset 8 without is_first: top bit clear.
        let header = ChunkHeader::continuation(8);
        assert_eq!(header.encode(), [0x08, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_header_value_is_31_bits() {
        let header = ChunkHeader::first(0x7fff_ffff);
        let bytes = header.encode();
        assert_eq!(bytes, [0xff, 0xff, 0xff, 0xff]);

        let decoded = ChunkHeader::decode(&bytes).unwrap();
        assert!(decoded.is_first);
        assert_eq!(decoded.value, 0x7fff_ffff);
    }

    #[test]
    fn test_header_decode_too_short() {
        assert!(ChunkHeader::decode(&[0x01, 0x02, 0x03]).is_none());
        assert!(ChunkHeader::decode(&[]).is_none());
    }

    #[test]
    fn test_capabilities_encode_byte_layout() {
        let caps = Capabilities::default();
        // min=1, max=1, tx=1000 (0x03E8), rx=1000 (0x03E8).
        assert_eq!(caps.encode(), [1, 1, 0x03, 0xE8, 0x03, 0xE8]);
    }

    #[test]
    fn test_capabilities_decode_roundtrip() {
        let caps = Capabilities {
            min_version: 2,
            max_version: 5,
            max_tx_chunk_size: 0x1234,
            max_rx_chunk_size: 0x00FF,
        };
        let decoded = Capabilities::decode(&caps.encode()).unwrap();
        assert_eq!(caps, decoded);
    }

    #[test]
    fn test_capabilities_decode_rejects_wrong_length() {
        assert!(Capabilities::decode(&[1, 1, 0, 100, 0]).is_none());
        assert!(Capabilities::decode(&[1, 1, 0, 100, 0, 100, 0]).is_none());
        assert!(Capabilities::decode(&[]).is_none());
    }

    #[test]
    fn test_negotiate_identical_peers() {
        let local = Capabilities::default();
        let params = local.negotiate(&Capabilities::default()).unwrap();
        assert_eq!(params.version, 1);
        assert_eq!(params.tx_chunk_size, 1000);
        assert_eq!(params.rx_chunk_size, 1000);
        assert!(params.is_negotiated());
    }

    #[test]
    fn test_negotiate_version_ranges_disjoint() {
        let local = Capabilities::default();
        let remote = Capabilities {
            min_version: 2,
            max_version: 3,
            ..Capabilities::default()
        };
        assert!(local.negotiate(&remote).is_none());
        assert!(remote.negotiate(&local).is_none());
    }

    #[test]
    fn test_negotiate_overlapping_ranges_pick_highest_common() {
        let local = Capabilities {
            min_version: 1,
            max_version: 3,
            ..Capabilities::default()
        };
        let remote = Capabilities {
            min_version: 2,
            max_version: 5,
            ..Capabilities::default()
        };
        let params = local.negotiate(&remote).unwrap();
        assert_eq!(params.version, 3);
    }

    #[test]
    fn test_negotiate_chunk_sizes_cross_minimum() {
        let local = Capabilities {
            max_tx_chunk_size: 1000,
            max_rx_chunk_size: 500,
            ..Capabilities::default()
        };
        let remote = Capabilities {
            max_tx_chunk_size: 800,
            max_rx_chunk_size: 200,
            ..Capabilities::default()
        };
        let params = local.negotiate(&remote).unwrap();
        // We transmit at most what the remote accepts.
        assert_eq!(params.tx_chunk_size, 200);
        // We receive at most what we accept.
        assert_eq!(params.rx_chunk_size, 500);
    }

    #[test]
    fn test_negotiate_rejects_zero_chunk_size() {
        let local = Capabilities::default();
        let remote = Capabilities {
            max_rx_chunk_size: 0,
            ..Capabilities::default()
        };
        assert!(local.negotiate(&remote).is_none());
    }

    #[test]
    fn test_session_params_reset() {
        let mut params = SessionParams {
            version: 1,
            tx_chunk_size: 1000,
            rx_chunk_size: 1000,
        };
        assert!(params.is_negotiated());

        params.reset();
        assert_eq!(params, SessionParams::default());
        assert!(!params.is_negotiated());
    }
}
