//! Session Stream Codec
//!
//! JSON encoding and decoding for the session wire protocol. Every inbound
//! message must carry a `type` discriminator; anything malformed or
//! unknown is a [`CodecError`] that the reader drops and logs at debug
//! level, since wire noise over a reconnecting transport is expected.

use super::messages::{ClientMessage, ServerMessage};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Message has no `type` discriminator.
    #[error("missing `type` discriminator")]
    MissingType,

    /// Unknown message type.
    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    /// Invalid message format.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
}

/// Known inbound discriminators, used to distinguish an unknown type from
/// a known type with a malformed body.
const SERVER_MESSAGE_TYPES: &[&str] = &[
    "heartbeat_ack",
    "reconnect_result",
    "simulator_started",
    "simulator_stopped",
    "order_result",
    "exchange_data",
    "session_invalidated",
    "connection_replaced",
];

/// JSON codec for the session stream.
#[derive(Debug, Default, Clone)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode one inbound text frame into a [`ServerMessage`].
    ///
    /// # Errors
    ///
    /// Returns an error if JSON parsing fails, the discriminator is
    /// missing or unknown, or the body does not match the discriminator.
    pub fn decode(&self, text: &str) -> Result<ServerMessage, CodecError> {
        let trimmed = text.trim();
        if !trimmed.starts_with('{') {
            let preview: String = trimmed.chars().take(50).collect();
            return Err(CodecError::InvalidFormat(format!(
                "expected JSON object, got: {preview}..."
            )));
        }

        let value: serde_json::Value = serde_json::from_str(trimmed)?;
        let msg_type = value
            .get("type")
            .and_then(|v| v.as_str())
            .ok_or(CodecError::MissingType)?;

        if !SERVER_MESSAGE_TYPES.contains(&msg_type) {
            return Err(CodecError::UnknownMessageType(msg_type.to_string()));
        }

        Ok(serde_json::from_value(value)?)
    }

    /// Encode an outbound message to a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode(&self, message: &ClientMessage) -> Result<String, CodecError> {
        Ok(serde_json::to_string(message)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_heartbeat_ack() {
        let codec = JsonCodec::new();
        let msg = codec
            .decode(r#"{"type":"heartbeat_ack","client_time_ms":100,"server_time_ms":130}"#)
            .unwrap();

        assert!(matches!(msg, ServerMessage::HeartbeatAck { .. }));
    }

    #[test]
    fn decode_rejects_missing_type() {
        let codec = JsonCodec::new();
        let err = codec.decode(r#"{"sequence":1}"#).unwrap_err();
        assert!(matches!(err, CodecError::MissingType));
    }

    #[test]
    fn decode_rejects_unknown_type() {
        let codec = JsonCodec::new();
        let err = codec.decode(r#"{"type":"price_blast"}"#).unwrap_err();
        assert!(matches!(err, CodecError::UnknownMessageType(t) if t == "price_blast"));
    }

    #[test]
    fn decode_rejects_non_object() {
        let codec = JsonCodec::new();
        assert!(matches!(
            codec.decode("[1,2,3]"),
            Err(CodecError::InvalidFormat(_))
        ));
    }

    #[test]
    fn decode_rejects_malformed_known_type() {
        let codec = JsonCodec::new();
        // Known discriminator, body missing required fields.
        let err = codec.decode(r#"{"type":"heartbeat_ack"}"#).unwrap_err();
        assert!(matches!(err, CodecError::Json(_)));
    }

    #[test]
    fn encode_round_trips_through_wire_shape() {
        let codec = JsonCodec::new();
        let msg = ClientMessage::StopSimulator {
            request_id: "stop_simulator-9-zz".to_string(),
        };

        let json = codec.encode(&msg).unwrap();
        assert!(json.contains(r#""type":"stop_simulator""#));
        assert!(json.contains(r#""request_id":"stop_simulator-9-zz""#));
    }
}
