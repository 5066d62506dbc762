//! Session events and actions.
//!
//! [`SessionEvent`] is everything that can happen to a session: user
//! intents, transport lifecycle changes, inbound frames, and timers.
//! [`SessionAction`] is everything a session can ask the runtime to do.
//! The session itself never performs I/O.

use std::time::Duration;

use parlor_core::CloseReason;
use parlor_proto::{CommandFrame, EventFrame, MessageId, MessageKind, RoomId};

/// Input to [`Session::handle`](crate::Session::handle).
///
/// Generic over the instant type so timer events carry virtual time
/// under test.
#[derive(Debug, Clone)]
pub enum SessionEvent<I> {
    // Lifecycle
    /// Explicitly open the connection.
    Connect,
    /// Explicitly close the connection. No reconnect follows.
    Disconnect,
    /// The runtime's dial completed and the transport is open.
    TransportOpened,
    /// The transport closed.
    TransportClosed {
        /// Why it closed.
        reason: CloseReason,
    },
    /// A dial failed before the transport opened.
    DialFailed {
        /// Failure description, for logging.
        reason: String,
    },
    /// The reconnect backoff timer elapsed.
    RetryTimerFired,
    /// The application returned to the foreground.
    AppForegrounded,
    /// The OS reported network connectivity restored.
    NetworkOnline,
    /// The user completed authentication.
    AuthLoggedIn,
    /// Periodic maintenance tick.
    Tick {
        /// Current time.
        now: I,
    },

    // Inbound
    /// A decoded envelope arrived from the server.
    FrameReceived(EventFrame),

    // User intents
    /// Enter a room and make it active.
    JoinRoom {
        /// Room to join.
        room_id: RoomId,
    },
    /// Leave a room.
    LeaveRoom {
        /// Room to leave.
        room_id: RoomId,
    },
    /// Send a message, displayed optimistically until confirmed.
    SendMessage {
        /// Target room.
        room_id: RoomId,
        /// Message body.
        content: String,
        /// Content category.
        kind: MessageKind,
    },
    /// Replace the content of an existing message.
    EditMessage {
        /// Room containing the message.
        room_id: RoomId,
        /// Target message.
        message_id: MessageId,
        /// New content.
        content: String,
    },
    /// Soft-delete a message.
    DeleteMessage {
        /// Room containing the message.
        room_id: RoomId,
        /// Target message.
        message_id: MessageId,
    },
    /// Add a reaction to a message.
    AddReaction {
        /// Room containing the message.
        room_id: RoomId,
        /// Target message.
        message_id: MessageId,
        /// Reaction key.
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
    /// Request the next page of older messages.
    FetchHistory {
        /// Room to page through.
        room_id: RoomId,
    },
    /// Mark everything delivered in a room as read.
    MarkRead {
        /// Room whose messages were read.
        room_id: RoomId,
    },
}

/// Side effects for the runtime to execute.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionAction {
    /// Write a command envelope to the transport.
    Send(CommandFrame),
    /// Open a new transport.
    Dial,
    /// Close the current transport.
    CloseTransport,
    /// Arm a one-shot reconnect timer; deliver
    /// [`SessionEvent::RetryTimerFired`] when it elapses.
    ScheduleReconnect {
        /// 1-based attempt number.
        attempt: u32,
        /// Backoff delay.
        delay: Duration,
    },
    /// Disarm any pending reconnect timer.
    CancelReconnect,
    /// Surface a notice to the application layer.
    Notify(Notice),
}

/// Application-facing notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// A message arrived in a room that is not active.
    MessageReceived {
        /// Room that received the message.
        room_id: RoomId,
        /// The message.
        message_id: MessageId,
    },
    /// An optimistic send was never confirmed within the ack timeout.
    SendFailed {
        /// Room the send targeted.
        room_id: RoomId,
        /// Temporary id of the failed message.
        local_id: MessageId,
    },
    /// All reconnect attempts were consumed; connectivity is gone
    /// until the application explicitly reconnects.
    ConnectivityLost {
        /// Attempts that were made.
        attempts: u32,
    },
    /// The server rejected a command.
    ServerError {
        /// Error description.
        message: String,
    },
}
