//! Protocol module - wire format, app-message dictionaries, and reassembly.
//!
//! This module implements the wire level of the transport:
//! - 4-byte chunk header encoding/decoding
//! - 6-byte capability payload for session negotiation
//! - key/value dictionaries handed to the lower transport
//! - reassembly buffer for inbound chunks

mod app_message;
mod reassembler;
mod wire_format;

pub use app_message::{keys, AppMessage, InboundMessage, KvValue, UnsupportedReason};
pub use reassembler::{ChunkError, Reassembler};
pub use wire_format::{
    Capabilities, ChunkHeader, SessionParams, CAPABILITIES_SIZE, CHUNK_HEADER_SIZE,
    MAX_OBJECT_BYTES, MAX_RX_CHUNK_SIZE, MAX_TX_CHUNK_SIZE, PROTOCOL_MAX_VERSION,
    PROTOCOL_MIN_VERSION,
};
