//! Wire protocol for the Parlor real-time chat core.
//!
//! The protocol is line-oriented JSON over a single long-lived
//! bidirectional connection. Clients send [`Command`] envelopes
//! (`{ command, room_id?, data }`) and receive [`EventFrame`] envelopes
//! (`{ type, success, error?, data }`), which decode into the tagged
//! [`ServerEvent`] enum.
//!
//! Envelope parsing and event decoding are deliberately separate steps:
//! an [`EventFrame`] that parses but carries an unknown `type` is NOT a
//! protocol error for the connection. The dispatcher logs it and moves
//! on (forward compatibility), while an unparsable envelope is dropped
//! the same way. See [`ServerEvent::from_frame`].

mod command;
mod error;
mod event;
mod frame;
mod types;

pub use command::Command;
pub use error::ProtocolError;
pub use event::{
    ConnectedData, HistoryPage, MemberInfo, MessageInfo, ReactionChange, RoomInfo, ServerEvent,
};
pub use frame::{CommandFrame, EventFrame};
pub use types::{MessageId, MessageKind, Role, RoomId, RoomKind, UserId};

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
