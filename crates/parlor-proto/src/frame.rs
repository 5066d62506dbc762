//! Envelope types for the JSON wire format.
//!
//! A frame is the transport-layer unit: one JSON object per message.
//! Envelopes hold the routing discriminator plus an untyped `data` map;
//! typed decoding happens later in [`crate::ServerEvent::from_frame`].
//! This split lets the dispatcher route (and drop) frames without
//! committing to a payload schema, which is what keeps unknown event
//! types harmless.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{RoomId, error::ProtocolError};

/// Client-to-server command envelope.
///
/// Wire shape: `{ "command": string, "room_id"?: string, "data": object }`.
///
/// # Invariants
///
/// - `data` is always present on the wire, even when empty. Servers
///   route on `command` and read `data` unconditionally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandFrame {
    /// Command discriminator (`join_room`, `send_message`, ...).
    pub command: String,

    /// Target room, when the command is room-scoped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_id: Option<RoomId>,

    /// Command arguments.
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl CommandFrame {
    /// Serialize to the wire string.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::EncodeFailed {
            command: self.command.clone(),
            reason: e.to_string(),
        })
    }
}

/// Server-to-client event envelope.
///
/// Wire shape: `{ "type": string, "success": bool, "error"?: string,
/// "data": object }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFrame {
    /// Event discriminator (`new_message`, `user_typing`, ...).
    #[serde(rename = "type")]
    pub kind: String,

    /// Whether the server processed the triggering command successfully.
    #[serde(default = "default_success")]
    pub success: bool,

    /// Error description, present when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Event payload.
    #[serde(default)]
    pub data: Map<String, Value>,
}

fn default_success() -> bool {
    true
}

impl EventFrame {
    /// Parse an envelope from raw wire text.
    ///
    /// # Errors
    ///
    /// `ProtocolError::MalformedFrame` if the text is not a JSON object
    /// of the expected shape. Malformed frames are dropped by the
    /// dispatcher; the stream continues.
    pub fn decode(raw: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(raw)
            .map_err(|e| ProtocolError::MalformedFrame { reason: e.to_string() })
    }

    /// Serialize to the wire string (used by test fixtures and fakes).
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::EncodeFailed {
            command: self.kind.clone(),
            reason: e.to_string(),
        })
    }
}
