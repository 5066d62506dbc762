//! Client commands.
//!
//! Every client intent maps to exactly one command name. The enum is
//! the typed form; [`Command::into_frame`] lowers it to the wire
//! envelope with the arguments in the `data` map.
//!
//! # Invariants
//!
//! - Command Uniqueness: each variant maps to exactly one command name
//!   (`name()` is an exhaustive match, so adding a variant without a
//!   name fails to compile).
//! - Room Scoping: every command in this protocol is room-scoped and
//!   carries `room_id` in the envelope, not in `data`.

use serde_json::{Map, Value, json};

use crate::{
    MessageId, MessageKind, RoomId,
    error::ProtocolError,
    frame::CommandFrame,
};

/// A client-to-server command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Enter a room and mark it active.
    JoinRoom {
        /// Room to join.
        room_id: RoomId,
    },

    /// Leave a room.
    LeaveRoom {
        /// Room to leave.
        room_id: RoomId,
    },

    /// Send a message.
    SendMessage {
        /// Target room.
        room_id: RoomId,
        /// Client-assigned temporary id, echoed nowhere; reconciliation
        /// matches on content (see the session reconciler).
        local_id: MessageId,
        /// Message body.
        content: String,
        /// Content category.
        kind: MessageKind,
    },

    /// Replace the content of an existing message.
    EditMessage {
        /// Room containing the message.
        room_id: RoomId,
        /// Server-assigned message id.
        message_id: MessageId,
        /// New content.
        content: String,
    },

    /// Soft-delete a message.
    DeleteMessage {
        /// Room containing the message.
        room_id: RoomId,
        /// Server-assigned message id.
        message_id: MessageId,
    },

    /// Add a reaction to a message.
    AddReaction {
        /// Room containing the message.
        room_id: RoomId,
        /// Target message.
        message_id: MessageId,
        /// Reaction key (emoji shortcode or similar).
        key: String,
    },

    /// Remove a reaction from a message.
    RemoveReaction {
        /// Room containing the message.
        room_id: RoomId,
        /// Target message.
        message_id: MessageId,
        /// Reaction key.
        key: String,
    },

    /// Signal that the user started composing.
    TypingStart {
        /// Room being typed in.
        room_id: RoomId,
    },

    /// Signal that the user stopped composing.
    TypingStop {
        /// Room being typed in.
        room_id: RoomId,
    },

    /// Request a page of older messages.
    ///
    /// Pages are prepended to the local buffer, so callers must walk
    /// oldest-first relative to what they already hold: pass the id of
    /// the oldest buffered message as `before`.
    FetchHistory {
        /// Room to page through.
        room_id: RoomId,
        /// Fetch messages strictly older than this id. `None` fetches
        /// the newest page.
        before: Option<MessageId>,
        /// Maximum number of messages to return.
        limit: u32,
    },

    /// Advance the server-side read cursor.
    ReadMessages {
        /// Room whose messages were read.
        room_id: RoomId,
        /// Read up to and including this message. `None` means
        /// everything currently delivered.
        up_to: Option<MessageId>,
    },
}

impl Command {
    /// Wire name of this command.
    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinRoom { .. } => "join_room",
            Self::LeaveRoom { .. } => "leave_room",
            Self::SendMessage { .. } => "send_message",
            Self::EditMessage { .. } => "edit_message",
            Self::DeleteMessage { .. } => "delete_message",
            Self::AddReaction { .. } => "add_reaction",
            Self::RemoveReaction { .. } => "remove_reaction",
            Self::TypingStart { .. } => "typing_start",
            Self::TypingStop { .. } => "typing_stop",
            Self::FetchHistory { .. } => "fetch_history",
            Self::ReadMessages { .. } => "read_messages",
        }
    }

    /// Room this command targets.
    pub fn room_id(&self) -> &RoomId {
        match self {
            Self::JoinRoom { room_id }
            | Self::LeaveRoom { room_id }
            | Self::SendMessage { room_id, .. }
            | Self::EditMessage { room_id, .. }
            | Self::DeleteMessage { room_id, .. }
            | Self::AddReaction { room_id, .. }
            | Self::RemoveReaction { room_id, .. }
            | Self::TypingStart { room_id }
            | Self::TypingStop { room_id }
            | Self::FetchHistory { room_id, .. }
            | Self::ReadMessages { room_id, .. } => room_id,
        }
    }

    /// Lower to the wire envelope.
    pub fn into_frame(self) -> Result<CommandFrame, ProtocolError> {
        let name = self.name();
        let room_id = self.room_id().clone();

        let data = match self {
            Self::JoinRoom { .. }
            | Self::LeaveRoom { .. }
            | Self::TypingStart { .. }
            | Self::TypingStop { .. } => json!({}),
            Self::SendMessage { local_id, content, kind, .. } => {
                json!({ "local_id": local_id, "content": content, "kind": kind })
            },
            Self::EditMessage { message_id, content, .. } => {
                json!({ "message_id": message_id, "content": content })
            },
            Self::DeleteMessage { message_id, .. } => json!({ "message_id": message_id }),
            Self::AddReaction { message_id, key, .. }
            | Self::RemoveReaction { message_id, key, .. } => {
                json!({ "message_id": message_id, "key": key })
            },
            Self::FetchHistory { before, limit, .. } => {
                json!({ "before": before, "limit": limit })
            },
            Self::ReadMessages { up_to, .. } => json!({ "up_to": up_to }),
        };

        let data = as_object(data, name)?;
        Ok(CommandFrame { command: name.to_string(), room_id: Some(room_id), data })
    }
}

fn as_object(value: Value, command: &str) -> Result<Map<String, Value>, ProtocolError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(ProtocolError::EncodeFailed {
            command: command.to_string(),
            reason: format!("command data must be an object, got {other}"),
        }),
    }
}
