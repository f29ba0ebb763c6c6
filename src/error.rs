//! Error types for postwire.

use thiserror::Error;

/// Main error type for all postwire operations.
#[derive(Debug, Error)]
pub enum PostwireError {
    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Reassembled payload was not valid UTF-8.
    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// Reassembled payload did not end in the NUL terminator.
    #[error("payload is missing the trailing NUL terminator")]
    MissingTerminator,

    /// Object is too large for the 31-bit wire size field.
    #[error("object of {size} bytes exceeds the wire size limit")]
    ObjectTooLarge {
        /// Serialized size including the terminator byte.
        size: usize,
    },

    /// The raw app-message API is not available on this transport.
    #[error("sendAppMessage is not available on this transport")]
    SendAppMessageUnavailable,
}

/// Result type alias using PostwireError.
pub type Result<T> = std::result::Result<T, PostwireError>;
