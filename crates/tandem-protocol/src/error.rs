//! Error types for the protocol layer.

/// Errors that can occur while encoding, decoding, or validating
/// wire payloads.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (a value can't be represented as JSON).
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),

    /// The bytes are malformed or don't match the expected shape.
    #[error("failed to decode message: {0}")]
    Decode(#[source] serde_json::Error),

    /// A required field is missing or an event payload is malformed.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// A workspace path failed validation (too long, `..` segment).
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// A code payload exceeds the size limit.
    #[error("payload of {size} bytes exceeds the {limit}-byte limit")]
    PayloadTooLarge { size: usize, limit: usize },
}
