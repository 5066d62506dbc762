//! Error types for the session core.
//!
//! Strongly-typed errors per the failure taxonomy: local command
//! failures are returned to the caller immediately (never thrown
//! across the dispatch loop), protocol problems are dropped at the
//! frame level, and exhausted reconnection is the one fatal case.

use parlor_proto::{MessageId, ProtocolError, RoomId};
use thiserror::Error;

/// Errors returned by the session state machine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// A command was issued while the connection was down.
    ///
    /// Returned to the caller synchronously so it can queue or notify;
    /// the session itself does not buffer commands.
    #[error("cannot {command}: not connected")]
    NotConnected {
        /// Command that was refused.
        command: &'static str,
    },

    /// A command referenced a room the store does not know.
    #[error("unknown room: {room_id}")]
    UnknownRoom {
        /// Room that was referenced.
        room_id: RoomId,
    },

    /// A command referenced a message not present in the room buffer.
    #[error("unknown message {message_id} in room {room_id}")]
    UnknownMessage {
        /// Room that was searched.
        room_id: RoomId,
        /// Message that was referenced.
        message_id: MessageId,
    },

    /// Wire encoding failed (indicates a local bug, not peer input).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// All reconnect attempts were consumed.
    ///
    /// Terminal: the session will not dial again until the caller
    /// explicitly reconnects (manual reload/retry).
    #[error("connectivity lost after {attempts} reconnect attempts")]
    ReconnectExhausted {
        /// Number of attempts that were made.
        attempts: u32,
    },
}

impl SessionError {
    /// Returns true if this error requires external intervention.
    ///
    /// Everything else is either recovered locally (dropped frames) or
    /// surfaced as a transient failure the caller can retry.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ReconnectExhausted { .. })
    }
}
