//! Codec error types.

use thiserror::Error;

/// Errors produced while turning frames into payloads or back.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The frame body was not valid JSON for the stream's payload type.
    #[error("failed to decode payload: {0}")]
    Decode(#[source] serde_json::Error),
    /// A payload could not be serialized.
    #[error("failed to encode payload: {0}")]
    Encode(#[source] serde_json::Error),
    /// A binary frame did not carry UTF-8 text.
    #[error("frame is not valid UTF-8")]
    InvalidUtf8(#[from] std::str::Utf8Error),
}

/// Result type for codec operations.
pub type Result<T> = std::result::Result<T, CodecError>;
