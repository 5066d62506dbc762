//! Room, member, and message model.
//!
//! These are the in-memory shapes the store mutates. They mirror the
//! wire payloads in `parlor-proto` but add local-only state the server
//! never sees: delivery status for optimistic messages and the
//! placeholder substitution for soft deletes.

use std::collections::{BTreeMap, BTreeSet};

use parlor_proto::{
    MemberInfo, MessageId, MessageInfo, MessageKind, Role, RoomId, RoomInfo, RoomKind, UserId,
};
use serde_json::{Map, Value};

/// Content substituted into soft-deleted messages.
///
/// The record is retained (position, id, reactions) so ordering and
/// reply chains stay intact; only the content is replaced.
pub const DELETED_PLACEHOLDER: &str = "[deleted]";

/// Delivery status of a message from this client's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Locally originated, shown optimistically, awaiting confirmation.
    Pending,
    /// Server-confirmed (or server-originated).
    Confirmed,
    /// Confirmation never arrived within the ack timeout.
    ///
    /// Failed messages stay in the buffer so the user can retry; they
    /// are never silently dropped.
    Failed,
}

/// A message in a room buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Server-assigned id, or the client-assigned temporary id while
    /// delivery is [`Delivery::Pending`].
    pub id: MessageId,
    /// Room the message belongs to.
    pub room_id: RoomId,
    /// Sender; `None` for system messages.
    pub sender_id: Option<UserId>,
    /// Content category.
    pub kind: MessageKind,
    /// Message body.
    pub content: String,
    /// Creation time, unix milliseconds. Zero until confirmed for
    /// locally-originated messages (server timestamps are
    /// authoritative and arrive with the confirmation).
    pub created_at: i64,
    /// Last update time, unix milliseconds.
    pub updated_at: i64,
    /// Whether the content has been edited.
    pub edited: bool,
    /// Whether the message has been soft-deleted.
    pub deleted: bool,
    /// Delivery status.
    pub delivery: Delivery,
    /// Reaction key to the set of users who reacted with it.
    pub reactions: BTreeMap<String, BTreeSet<UserId>>,
    /// Arbitrary message metadata.
    pub metadata: Map<String, Value>,
}

impl Message {
    /// Build a confirmed message from a wire payload.
    pub fn from_info(info: MessageInfo) -> Self {
        Self {
            id: info.id,
            room_id: info.room_id,
            sender_id: info.sender_id,
            kind: info.kind,
            content: info.content,
            created_at: info.created_at,
            updated_at: info.updated_at,
            edited: info.edited,
            deleted: info.deleted,
            delivery: Delivery::Confirmed,
            reactions: info.reactions,
            metadata: info.metadata,
        }
    }

    /// Build a provisional message for optimistic display.
    pub fn provisional(
        local_id: MessageId,
        room_id: RoomId,
        sender_id: UserId,
        kind: MessageKind,
        content: String,
    ) -> Self {
        Self {
            id: local_id,
            room_id,
            sender_id: Some(sender_id),
            kind,
            content,
            created_at: 0,
            updated_at: 0,
            edited: false,
            deleted: false,
            delivery: Delivery::Pending,
            reactions: BTreeMap::new(),
            metadata: Map::new(),
        }
    }

    /// Build a synthetic system message (membership announcements).
    pub fn system(id: MessageId, room_id: RoomId, content: String) -> Self {
        Self {
            id,
            room_id,
            sender_id: None,
            kind: MessageKind::System,
            content,
            created_at: 0,
            updated_at: 0,
            edited: false,
            deleted: false,
            delivery: Delivery::Confirmed,
            reactions: BTreeMap::new(),
            metadata: Map::new(),
        }
    }

    /// Add `user` to the reaction set for `key`.
    ///
    /// Idempotent: returns false (and changes nothing) if the user had
    /// already reacted with this key.
    pub fn add_reaction(&mut self, key: &str, user: &UserId) -> bool {
        self.reactions.entry(key.to_string()).or_default().insert(user.clone())
    }

    /// Remove `user` from the reaction set for `key`.
    ///
    /// A key whose set becomes empty is removed from the map entirely,
    /// never retained. Returns false if the user had not reacted.
    pub fn remove_reaction(&mut self, key: &str, user: &UserId) -> bool {
        let Some(users) = self.reactions.get_mut(key) else {
            return false;
        };
        let removed = users.remove(user);
        if users.is_empty() {
            self.reactions.remove(key);
        }
        removed
    }

    /// Replace content in place (edit semantics).
    pub fn apply_edit(&mut self, content: String, updated_at: i64) {
        self.content = content;
        self.edited = true;
        self.updated_at = updated_at;
    }

    /// Soft-delete: the record stays, the content is replaced.
    pub fn apply_delete(&mut self) {
        self.content = DELETED_PLACEHOLDER.to_string();
        self.deleted = true;
    }
}

/// A user's participation record in a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    /// User id, unique per (room, user).
    pub user_id: UserId,
    /// Display name.
    pub display_name: String,
    /// Role within the room.
    pub role: Role,
    /// Whether the user is currently online.
    pub online: bool,
    /// Last-read timestamp, unix milliseconds.
    pub last_read_at: Option<i64>,
}

impl Member {
    /// Build from a wire payload.
    pub fn from_info(info: MemberInfo) -> Self {
        Self {
            user_id: info.user_id,
            display_name: info.display_name,
            role: info.role,
            online: info.online,
            last_read_at: info.last_read_at,
        }
    }
}

/// Room metadata (the message buffer and member list live in the store).
#[derive(Debug, Clone, PartialEq)]
pub struct Room {
    /// Unique room id.
    pub id: RoomId,
    /// Display name, absent for direct rooms.
    pub name: Option<String>,
    /// Room category.
    pub kind: RoomKind,
    /// Creation time, unix milliseconds.
    pub created_at: i64,
    /// Count of active members.
    ///
    /// # Invariants
    ///
    /// Always equals the length of the store's member list for this
    /// room; maintained by the membership mutators.
    pub member_count: u32,
    /// Denormalized copy of the newest message, if any.
    pub last_message: Option<Message>,
    /// Unread count for the viewing client.
    pub unread_count: u32,
    /// Arbitrary room metadata.
    pub metadata: Map<String, Value>,
}

impl Room {
    /// Build from a wire payload.
    pub fn from_info(info: RoomInfo) -> Self {
        Self {
            id: info.id,
            name: info.name,
            kind: info.kind,
            created_at: info.created_at,
            member_count: info.member_count,
            last_message: info.last_message.map(Message::from_info),
            unread_count: info.unread_count,
            metadata: info.metadata,
        }
    }
}
