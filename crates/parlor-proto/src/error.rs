//! Protocol error types.
//!
//! Errors are split by recoverability: a malformed envelope or unknown
//! event type affects a single frame and never the stream, while a
//! payload that names a known type but fails to decode is reported with
//! enough context to log usefully.

use thiserror::Error;

/// Errors produced while encoding or decoding wire frames.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The envelope itself could not be parsed as JSON.
    #[error("malformed frame: {reason}")]
    MalformedFrame {
        /// Parser diagnostic.
        reason: String,
    },

    /// The envelope parsed but its `type` is not one we know.
    ///
    /// Unknown types are expected under forward compatibility: newer
    /// servers may emit events older clients ignore.
    #[error("unknown event type: {event_type}")]
    UnknownEventType {
        /// The unrecognized `type` discriminator.
        event_type: String,
    },

    /// The `data` map did not match the schema for a known event type.
    #[error("invalid payload for {event_type}: {reason}")]
    InvalidPayload {
        /// Event type whose payload failed to decode.
        event_type: String,
        /// Decoder diagnostic.
        reason: String,
    },

    /// A command could not be serialized.
    ///
    /// This indicates a bug (command structs always serialize) and is
    /// surfaced rather than swallowed so it cannot pass silently.
    #[error("failed to encode command {command}: {reason}")]
    EncodeFailed {
        /// Command name that failed to encode.
        command: String,
        /// Serializer diagnostic.
        reason: String,
    },
}

impl ProtocolError {
    /// Returns true if this error affects only the offending frame.
    ///
    /// Droppable errors are logged and skipped; the inbound stream
    /// continues. Only encode failures indicate a local bug.
    pub fn is_droppable(&self) -> bool {
        matches!(
            self,
            Self::MalformedFrame { .. }
                | Self::UnknownEventType { .. }
                | Self::InvalidPayload { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_level_errors_are_droppable() {
        assert!(ProtocolError::MalformedFrame { reason: "eof".into() }.is_droppable());
        assert!(ProtocolError::UnknownEventType { event_type: "hologram".into() }.is_droppable());
        assert!(
            ProtocolError::InvalidPayload { event_type: "new_message".into(), reason: "x".into() }
                .is_droppable()
        );
    }

    #[test]
    fn encode_failures_are_not_droppable() {
        let err = ProtocolError::EncodeFailed { command: "send_message".into(), reason: "x".into() };
        assert!(!err.is_droppable());
    }
}
