//! Shared identifier and enum types.
//!
//! Identifiers are server-issued opaque strings. We keep them as
//! aliases rather than newtypes so they flow directly through serde
//! maps and log fields without conversion noise.

use serde::{Deserialize, Serialize};

/// Opaque room identifier.
pub type RoomId = String;

/// Opaque user identifier.
pub type UserId = String;

/// Message identifier.
///
/// Server-assigned ids are globally unique. Locally-originated messages
/// carry a client-assigned temporary id until the server confirms them.
pub type MessageId = String;

/// Room category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomKind {
    /// One-to-one conversation.
    Direct,
    /// Ad-hoc multi-member room.
    Group,
    /// Company-wide room.
    Company,
    /// Customer support room.
    Support,
}

/// Member role within a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Room owner.
    Owner,
    /// Administrator.
    Admin,
    /// Regular member.
    Member,
    /// Read-mostly guest.
    Guest,
}

/// Message content category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Plain text.
    Text,
    /// Image attachment reference.
    Image,
    /// File attachment reference.
    File,
    /// Server-generated announcement (no sender).
    System,
    /// `/me`-style action message.
    Action,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enums_serialize_snake_case() {
        assert_eq!(serde_json::to_string(&RoomKind::Support).ok().as_deref(), Some("\"support\""));
        assert_eq!(serde_json::to_string(&Role::Owner).ok().as_deref(), Some("\"owner\""));
        assert_eq!(serde_json::to_string(&MessageKind::Text).ok().as_deref(), Some("\"text\""));
    }

    #[test]
    fn unknown_enum_value_is_rejected() {
        assert!(serde_json::from_str::<RoomKind>("\"broadcast\"").is_err());
    }
}
