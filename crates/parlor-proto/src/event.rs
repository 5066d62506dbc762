//! Server events.
//!
//! [`ServerEvent`] is the tagged-variant form of the outbound envelope:
//! one variant per protocol `type`, decoded from [`EventFrame::data`].
//! Handlers match on it exhaustively, so adding a variant forces every
//! dispatcher to handle it at compile time.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    MessageId, MessageKind, Role, RoomId, RoomKind, UserId,
    error::ProtocolError,
    frame::EventFrame,
};

/// Room description as sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomInfo {
    /// Unique room id.
    pub id: RoomId,
    /// Display name, absent for direct rooms.
    #[serde(default)]
    pub name: Option<String>,
    /// Room category.
    pub kind: RoomKind,
    /// Creation time, unix milliseconds.
    pub created_at: i64,
    /// Count of active members.
    pub member_count: u32,
    /// Denormalized newest message, if any.
    #[serde(default)]
    pub last_message: Option<MessageInfo>,
    /// Unread count for the viewing client.
    #[serde(default)]
    pub unread_count: u32,
    /// Arbitrary room metadata.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Member description as sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberInfo {
    /// User id, unique per (room, user).
    pub user_id: UserId,
    /// Display name.
    pub display_name: String,
    /// Role within the room.
    pub role: Role,
    /// Whether the user is currently online.
    #[serde(default)]
    pub online: bool,
    /// Last-read timestamp, unix milliseconds.
    #[serde(default)]
    pub last_read_at: Option<i64>,
}

/// Message as sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageInfo {
    /// Server-assigned globally unique id.
    pub id: MessageId,
    /// Room the message belongs to.
    pub room_id: RoomId,
    /// Sender id; `None` for system messages.
    #[serde(default)]
    pub sender_id: Option<UserId>,
    /// Content category.
    pub kind: MessageKind,
    /// Message body (placeholder text once deleted).
    pub content: String,
    /// Creation time, unix milliseconds.
    pub created_at: i64,
    /// Last update time, unix milliseconds.
    pub updated_at: i64,
    /// Whether the content has been edited.
    #[serde(default)]
    pub edited: bool,
    /// Whether the message has been soft-deleted.
    #[serde(default)]
    pub deleted: bool,
    /// Reaction key to the set of users who reacted with it.
    ///
    /// Absent keys mean zero reactions of that kind; the server never
    /// sends a key with an empty set.
    #[serde(default)]
    pub reactions: BTreeMap<String, BTreeSet<UserId>>,
    /// Arbitrary message metadata.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Handshake acknowledgement payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedData {
    /// Server-assigned session id.
    pub session_id: String,
    /// User the bearer credential resolved to.
    pub user_id: UserId,
}

/// One page of room history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryPage {
    /// Room the page belongs to.
    pub room_id: RoomId,
    /// Messages in chronological order, all strictly older than
    /// anything previously delivered for this room.
    pub messages: Vec<MessageInfo>,
    /// Whether older pages remain.
    #[serde(default)]
    pub has_more: bool,
}

/// A single reaction addition or removal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionChange {
    /// Room containing the message.
    pub room_id: RoomId,
    /// Target message.
    pub message_id: MessageId,
    /// Reaction key.
    pub key: String,
    /// User whose reaction changed.
    pub user_id: UserId,
}

/// All server-to-client event types.
///
/// # Invariants
///
/// - Each variant corresponds to exactly one wire `type` string; the
///   mapping is exhaustive in [`ServerEvent::from_frame`].
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// Auth handshake completed; the session is live.
    Connected(ConnectedData),

    /// Initial (or refreshed) room listing.
    RoomList {
        /// Rooms visible to this user.
        rooms: Vec<RoomInfo>,
    },

    /// The client (or the server on reconnect) joined a room.
    RoomJoined {
        /// Room that was joined.
        room: RoomInfo,
        /// Full member list at join time.
        members: Vec<MemberInfo>,
    },

    /// Another user joined a room.
    UserJoined {
        /// Room that gained a member.
        room_id: RoomId,
        /// The new member.
        member: MemberInfo,
    },

    /// A user left a room.
    UserLeft {
        /// Room that lost a member.
        room_id: RoomId,
        /// Departed user.
        user_id: UserId,
        /// Display name at departure time, for the system message.
        display_name: String,
    },

    /// A message arrived.
    NewMessage {
        /// The message.
        message: MessageInfo,
    },

    /// Confirmation of a message this client sent.
    MessageSent {
        /// Authoritative message (server id, server timestamps).
        message: MessageInfo,
    },

    /// A page of older messages.
    MessageHistory(HistoryPage),

    /// A user started typing.
    UserTyping {
        /// Room being typed in.
        room_id: RoomId,
        /// Typing user.
        user_id: UserId,
    },

    /// A user explicitly stopped typing.
    UserTypingStopped {
        /// Room being typed in.
        room_id: RoomId,
        /// User who stopped.
        user_id: UserId,
    },

    /// A reaction was added.
    ReactionAdded(ReactionChange),

    /// A reaction was removed.
    ReactionRemoved(ReactionChange),

    /// A message was edited in place.
    MessageEdited {
        /// Room containing the message.
        room_id: RoomId,
        /// Edited message id.
        message_id: MessageId,
        /// New content.
        content: String,
        /// Edit time, unix milliseconds.
        updated_at: i64,
    },

    /// A message was soft-deleted.
    MessageDeleted {
        /// Room containing the message.
        room_id: RoomId,
        /// Deleted message id.
        message_id: MessageId,
    },

    /// Application-level error response.
    ///
    /// Transient and non-fatal: surfaced to the user, never mutates
    /// room state, never terminates the stream.
    Error {
        /// Error description.
        message: String,
    },
}

impl ServerEvent {
    /// Decode a parsed envelope into a typed event.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::UnknownEventType` for a `type` we do not know
    ///   (caller logs and drops it — forward compatibility).
    /// - `ProtocolError::InvalidPayload` if `data` does not match the
    ///   schema for a known type (also dropped without terminating the
    ///   stream).
    pub fn from_frame(frame: EventFrame) -> Result<Self, ProtocolError> {
        let kind = frame.kind;
        let data = Value::Object(frame.data);

        match kind.as_str() {
            "connected" => decode(&kind, data).map(Self::Connected),
            "room_list" => {
                #[derive(Deserialize)]
                struct Payload {
                    rooms: Vec<RoomInfo>,
                }
                decode::<Payload>(&kind, data).map(|p| Self::RoomList { rooms: p.rooms })
            },
            "room_joined" => {
                #[derive(Deserialize)]
                struct Payload {
                    room: RoomInfo,
                    #[serde(default)]
                    members: Vec<MemberInfo>,
                }
                decode::<Payload>(&kind, data)
                    .map(|p| Self::RoomJoined { room: p.room, members: p.members })
            },
            "user_joined" => {
                #[derive(Deserialize)]
                struct Payload {
                    room_id: RoomId,
                    member: MemberInfo,
                }
                decode::<Payload>(&kind, data)
                    .map(|p| Self::UserJoined { room_id: p.room_id, member: p.member })
            },
            "user_left" => {
                #[derive(Deserialize)]
                struct Payload {
                    room_id: RoomId,
                    user_id: UserId,
                    #[serde(default)]
                    display_name: String,
                }
                decode::<Payload>(&kind, data).map(|p| Self::UserLeft {
                    room_id: p.room_id,
                    user_id: p.user_id,
                    display_name: p.display_name,
                })
            },
            "new_message" => {
                #[derive(Deserialize)]
                struct Payload {
                    message: MessageInfo,
                }
                decode::<Payload>(&kind, data).map(|p| Self::NewMessage { message: p.message })
            },
            "message_sent" => {
                #[derive(Deserialize)]
                struct Payload {
                    message: MessageInfo,
                }
                decode::<Payload>(&kind, data).map(|p| Self::MessageSent { message: p.message })
            },
            "message_history" => decode(&kind, data).map(Self::MessageHistory),
            "user_typing" => {
                decode::<TypingPayload>(&kind, data)
                    .map(|p| Self::UserTyping { room_id: p.room_id, user_id: p.user_id })
            },
            "user_typing_stopped" => {
                decode::<TypingPayload>(&kind, data)
                    .map(|p| Self::UserTypingStopped { room_id: p.room_id, user_id: p.user_id })
            },
            "reaction_added" => decode(&kind, data).map(Self::ReactionAdded),
            "reaction_removed" => decode(&kind, data).map(Self::ReactionRemoved),
            "message_edited" => {
                #[derive(Deserialize)]
                struct Payload {
                    room_id: RoomId,
                    message_id: MessageId,
                    content: String,
                    updated_at: i64,
                }
                decode::<Payload>(&kind, data).map(|p| Self::MessageEdited {
                    room_id: p.room_id,
                    message_id: p.message_id,
                    content: p.content,
                    updated_at: p.updated_at,
                })
            },
            "message_deleted" => {
                #[derive(Deserialize)]
                struct Payload {
                    room_id: RoomId,
                    message_id: MessageId,
                }
                decode::<Payload>(&kind, data).map(|p| Self::MessageDeleted {
                    room_id: p.room_id,
                    message_id: p.message_id,
                })
            },
            "error" => {
                // The description lives in the envelope's `error` field;
                // some servers also mirror it into data.message.
                let message = frame
                    .error
                    .or_else(|| {
                        data.get("message").and_then(Value::as_str).map(ToString::to_string)
                    })
                    .unwrap_or_else(|| "unspecified server error".to_string());
                Ok(Self::Error { message })
            },
            _ => Err(ProtocolError::UnknownEventType { event_type: kind }),
        }
    }
}

#[derive(Deserialize)]
struct TypingPayload {
    room_id: RoomId,
    user_id: UserId,
}

fn decode<T: serde::de::DeserializeOwned>(
    kind: &str,
    data: Value,
) -> Result<T, ProtocolError> {
    serde_json::from_value(data).map_err(|e| ProtocolError::InvalidPayload {
        event_type: kind.to_string(),
        reason: e.to_string(),
    })
}
