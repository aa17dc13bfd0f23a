//! Codec trait and the JSON implementation.
//!
//! The hub doesn't care how events are serialized — it needs something
//! that implements [`Codec`]. The editor clients speak JSON, so
//! [`JsonCodec`] is the default (and, today, only) implementation; a
//! binary codec could be added behind a feature without touching any
//! other code.

use serde::{de::DeserializeOwned, Serialize};

use crate::ProtocolError;

/// Encodes values to bytes and decodes bytes back.
///
/// `Send + Sync + 'static` because the codec is stored in long-lived
/// server state shared across connection tasks.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Encode`] if serialization fails.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Decode`] if the bytes are malformed or
    /// don't match the expected type.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

/// A [`Codec`] using JSON via `serde_json`.
///
/// Human-readable: events can be inspected in browser DevTools and
/// pasted straight into tests.
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClientEvent, ServerEvent};

    #[test]
    fn test_json_codec_round_trips_client_event() {
        let codec = JsonCodec;
        let ev = ClientEvent::CodeChange {
            code: "fn main() {}".into(),
        };
        let bytes = codec.encode(&ev).unwrap();
        let back: ClientEvent = codec.decode(&bytes).unwrap();
        assert_eq!(ev, back);
    }

    #[test]
    fn test_json_codec_round_trips_server_event() {
        let codec = JsonCodec;
        let ev = ServerEvent::MonitoringStarted;
        let bytes = codec.encode(&ev).unwrap();
        let back: ServerEvent = codec.decode(&bytes).unwrap();
        assert_eq!(ev, back);
    }

    #[test]
    fn test_json_codec_decode_garbage_fails() {
        let codec = JsonCodec;
        let result: Result<ClientEvent, _> = codec.decode(b"not json");
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }
}
