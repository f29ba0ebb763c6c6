//! Key/value dictionaries exchanged with the lower transport.
//!
//! Every unit handed to (or received from) the lower transport is a small
//! ordered dictionary of string keys to byte-array or integer values. The
//! transport core only ever uses the four keys in [`keys`]; inbound
//! dictionaries are dispatched on the first recognized key and parsed into
//! the [`InboundMessage`] tagged enum.

use bytes::{BufMut, Bytes, BytesMut};

use super::wire_format::{Capabilities, ChunkHeader};

/// Wire key names, exact strings.
pub mod keys {
    /// Asks the remote to restart session negotiation.
    pub const RESET_REQUEST: &str = "ResetRequest";
    /// Carries the sender's capabilities (6-byte payload).
    pub const RESET_COMPLETE: &str = "ResetComplete";
    /// Carries one chunk of a fragmented object (4-byte header + payload).
    pub const CHUNK: &str = "Chunk";
    /// Reports that negotiation failed (1-byte error code payload).
    pub const UNSUPPORTED_ERROR: &str = "UnsupportedError";
}

/// A value in an app-message dictionary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvValue {
    /// Unsigned integer tuple.
    Uint(u32),
    /// Byte-array tuple.
    Bytes(Bytes),
}

impl KvValue {
    /// The value's bytes; integer tuples yield an empty slice.
    pub fn as_bytes(&self) -> Bytes {
        match self {
            KvValue::Bytes(bytes) => bytes.clone(),
            KvValue::Uint(_) => Bytes::new(),
        }
    }
}

/// An ordered key/value dictionary for the lower transport.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AppMessage {
    entries: Vec<(String, KvValue)>,
}

impl AppMessage {
    /// Create an empty dictionary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry.
    pub fn insert(&mut self, key: impl Into<String>, value: KvValue) {
        self.entries.push((key.into(), value));
    }

    /// Look up the first entry with the given key.
    pub fn get(&self, key: &str) -> Option<&KvValue> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Iterate entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &KvValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the dictionary is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Build a `ResetRequest` dictionary.
    pub fn reset_request() -> Self {
        let mut message = Self::new();
        message.insert(keys::RESET_REQUEST, KvValue::Uint(0));
        message
    }

    /// Build a `ResetComplete` dictionary advertising `capabilities`.
    pub fn reset_complete(capabilities: &Capabilities) -> Self {
        let mut message = Self::new();
        message.insert(
            keys::RESET_COMPLETE,
            KvValue::Bytes(Bytes::copy_from_slice(&capabilities.encode())),
        );
        message
    }

    /// Build an `UnsupportedError` dictionary carrying `reason`.
    pub fn unsupported_error(reason: UnsupportedReason) -> Self {
        let mut message = Self::new();
        message.insert(
            keys::UNSUPPORTED_ERROR,
            KvValue::Bytes(Bytes::copy_from_slice(&[reason.code()])),
        );
        message
    }

    /// Build a `Chunk` dictionary from a header and payload slice.
    pub fn chunk(header: ChunkHeader, payload: Bytes) -> Self {
        let mut buf = BytesMut::with_capacity(header.encode().len() + payload.len());
        buf.put_slice(&header.encode());
        buf.put_slice(&payload);

        let mut message = Self::new();
        message.insert(keys::CHUNK, KvValue::Bytes(buf.freeze()));
        message
    }
}

/// Why a `ResetComplete` was rejected, as reported on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsupportedReason {
    /// The peers' version ranges do not overlap.
    UnsupportedVersion,
    /// The capability payload was not the expected size.
    MalformedResetComplete,
}

impl UnsupportedReason {
    /// Wire error code.
    pub fn code(&self) -> u8 {
        match self {
            UnsupportedReason::UnsupportedVersion => 1,
            UnsupportedReason::MalformedResetComplete => 2,
        }
    }
}

/// An inbound dictionary, dispatched on the first recognized key.
///
/// Unrecognized keys are skipped; a dictionary with no recognized key at all
/// parses to `None` and is ignored by the transport core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    /// The remote asks us to restart negotiation. Value is opaque.
    ResetRequest,
    /// The remote's capabilities (validated later; may be malformed).
    ResetComplete(Bytes),
    /// One chunk of a fragmented object.
    Chunk(Bytes),
    /// The remote rejected our capabilities. Value is opaque.
    UnsupportedError,
}

impl InboundMessage {
    /// Parse a dictionary into its tagged form.
    pub fn parse(message: &AppMessage) -> Option<Self> {
        for (key, value) in message.iter() {
            match key {
                keys::RESET_REQUEST => return Some(InboundMessage::ResetRequest),
                keys::RESET_COMPLETE => {
                    return Some(InboundMessage::ResetComplete(value.as_bytes()))
                }
                keys::CHUNK => return Some(InboundMessage::Chunk(value.as_bytes())),
                keys::UNSUPPORTED_ERROR => return Some(InboundMessage::UnsupportedError),
                _ => continue,
            }
        }
        None
    }
}
