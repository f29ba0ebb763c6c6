//! Object codec - JSON values to and from their wire form.
//!
//! An object travels as its JSON text encoded as UTF-8 with a single NUL
//! terminator appended. The UTF-8 bytes are the canonical form; the JSON
//! value is produced only after full reassembly.
//!
//! # Example
//!
//! ```
//! use postwire::codec::ObjectCodec;
//! use serde_json::json;
//!
//! let encoded = ObjectCodec::encode(&json!({"a": 1})).unwrap();
//! assert_eq!(encoded.as_ref(), b"{\"a\":1}\0");
//!
//! let decoded = ObjectCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, json!({"a": 1}));
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use serde_json::Value;

use crate::error::{PostwireError, Result};
use crate::protocol::MAX_OBJECT_BYTES;

/// Codec for the UTF-8 + NUL object framing.
pub struct ObjectCodec;

impl ObjectCodec {
    /// Serialize a JSON value to its wire form.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails or the result exceeds the
    /// 31-bit wire size limit.
    pub fn encode(value: &Value) -> Result<Bytes> {
        Self::frame(&serde_json::to_string(value)?)
    }

    /// Frame already-serialized JSON text: UTF-8 bytes plus NUL terminator.
    ///
    /// # Errors
    ///
    /// Returns [`PostwireError::ObjectTooLarge`] if the framed payload would
    /// not fit the 31-bit wire size field.
    pub fn frame(json: &str) -> Result<Bytes> {
        let size = json.len() + 1;
        if size > MAX_OBJECT_BYTES {
            return Err(PostwireError::ObjectTooLarge { size });
        }
        let mut buf = BytesMut::with_capacity(size);
        buf.put_slice(json.as_bytes());
        buf.put_u8(0);
        Ok(buf.freeze())
    }

    /// Decode a complete wire payload back into a JSON value.
    ///
    /// # Errors
    ///
    /// Returns an error if the terminator is missing, the bytes are not
    /// valid UTF-8, or the text is not valid JSON.
    pub fn decode(payload: &[u8]) -> Result<Value> {
        let body = match payload.split_last() {
            Some((&0, body)) => body,
            _ => return Err(PostwireError::MissingTerminator),
        };
        let text = std::str::from_utf8(body)?;
        Ok(serde_json::from_str(text)?)
    }
}
