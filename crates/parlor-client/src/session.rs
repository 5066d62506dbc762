//! Session state machine.
//!
//! [`Session`] ties the connection lifecycle, the room store, and the
//! wire protocol together behind one entry point:
//! [`Session::handle`] consumes a [`SessionEvent`] and returns the
//! [`SessionAction`]s the runtime must execute. No I/O happens here,
//! which is what makes every ordering rule in this module testable
//! with a virtual clock.
//!
//! # Failure taxonomy
//!
//! - Malformed or unknown inbound frames are logged and dropped; the
//!   stream continues.
//! - Local command failures (not connected, unknown room or message)
//!   are returned as errors to the caller, synchronously.
//! - Server `error` events become [`Notice::ServerError`]; they never
//!   mutate room state.
//! - Exhausted reconnection is the one fatal case: surfaced as
//!   [`Notice::ConnectivityLost`] when it happens, and any command
//!   issued afterwards fails with
//!   [`SessionError::ReconnectExhausted`].

use std::{collections::HashMap, time::Duration};

use parlor_core::{
    ConnectAction, ConnectionConfig, ConnectionManager, ConnectionState, Message, RoomStore,
    SessionError, WakeTrigger, env::Environment,
};
use parlor_proto::{Command, MessageId, RoomId, ServerEvent, UserId};
use tracing::{debug, info, warn};

use crate::event::{Notice, SessionAction, SessionEvent};

/// Default time to wait for a `message_sent` confirmation.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Default page size for history requests.
pub const DEFAULT_HISTORY_PAGE_SIZE: u32 = 50;

/// Tunable session parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionConfig {
    /// Time to wait for a send confirmation before marking the
    /// message failed.
    pub ack_timeout: Duration,
    /// Messages per history page.
    pub history_page_size: u32,
    /// Reconnect parameters.
    pub connection: ConnectionConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            history_page_size: DEFAULT_HISTORY_PAGE_SIZE,
            connection: ConnectionConfig::default(),
        }
    }
}

/// The chat session state machine.
pub struct Session<E: Environment> {
    env: E,
    config: SessionConfig,
    connection: ConnectionManager,
    store: RoomStore<E::Instant>,
    user_id: Option<UserId>,
    /// Optimistic sends awaiting `message_sent`, keyed by local id.
    pending_acks: HashMap<MessageId, (RoomId, E::Instant)>,
}

impl<E: Environment> Session<E> {
    /// Create a session with the given environment and configuration.
    pub fn new(env: E, config: SessionConfig) -> Self {
        Self {
            env,
            connection: ConnectionManager::new(config.connection),
            config,
            store: RoomStore::new(),
            user_id: None,
            pending_acks: HashMap::new(),
        }
    }

    /// Room state, read-only.
    pub fn store(&self) -> &RoomStore<E::Instant> {
        &self.store
    }

    /// Current connection lifecycle state.
    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// User id the server resolved our credential to, once connected.
    pub fn user_id(&self) -> Option<&UserId> {
        self.user_id.as_ref()
    }

    /// Users currently typing in a room, resolved to display names.
    ///
    /// Expired indicators are purged as part of this read.
    pub fn typing_users(&mut self, room_id: &RoomId) -> Vec<(UserId, String)> {
        let now = self.env.now();
        self.store.typing_users(room_id, now)
    }

    /// Process one event, returning the actions to execute.
    ///
    /// # Errors
    ///
    /// Local command failures only (see the module docs); frame-level
    /// protocol problems are dropped, never returned.
    pub fn handle(
        &mut self,
        event: SessionEvent<E::Instant>,
    ) -> Result<Vec<SessionAction>, SessionError> {
        match event {
            SessionEvent::Connect => Ok(Self::lift(self.connection.connect())),
            SessionEvent::Disconnect => {
                let mut actions = Self::lift(self.connection.disconnect());
                actions.push(SessionAction::CloseTransport);
                Ok(actions)
            },
            SessionEvent::TransportOpened => Ok(Self::lift(self.connection.established())),
            SessionEvent::TransportClosed { reason } => {
                let mut actions = self.fail_pending_sends();
                actions.extend(Self::lift(self.connection.connection_lost(&reason)));
                Ok(actions)
            },
            SessionEvent::DialFailed { reason } => {
                debug!(%reason, "dial failed");
                Ok(Self::lift(self.connection.dial_failed()))
            },
            SessionEvent::RetryTimerFired => Ok(Self::lift(self.connection.retry_due())),
            SessionEvent::AppForegrounded => {
                Ok(Self::lift(self.connection.wake(WakeTrigger::Foreground)))
            },
            SessionEvent::NetworkOnline => {
                Ok(Self::lift(self.connection.wake(WakeTrigger::NetworkOnline)))
            },
            SessionEvent::AuthLoggedIn => {
                Ok(Self::lift(self.connection.wake(WakeTrigger::AuthLoggedIn)))
            },
            SessionEvent::Tick { now } => Ok(self.sweep_pending(now)),
            SessionEvent::FrameReceived(frame) => self.handle_frame(frame),
            SessionEvent::JoinRoom { room_id } => self.join_room(room_id),
            SessionEvent::LeaveRoom { room_id } => self.leave_room(room_id),
            SessionEvent::SendMessage { room_id, content, kind } => {
                self.send_message(room_id, content, kind)
            },
            SessionEvent::EditMessage { room_id, message_id, content } => {
                self.ensure_message(&room_id, &message_id)?;
                self.send(Command::EditMessage { room_id, message_id, content })
            },
            SessionEvent::DeleteMessage { room_id, message_id } => {
                self.ensure_message(&room_id, &message_id)?;
                self.send(Command::DeleteMessage { room_id, message_id })
            },
            SessionEvent::AddReaction { room_id, message_id, key } => {
                self.ensure_message(&room_id, &message_id)?;
                self.send(Command::AddReaction { room_id, message_id, key })
            },
            SessionEvent::RemoveReaction { room_id, message_id, key } => {
                self.ensure_message(&room_id, &message_id)?;
                self.send(Command::RemoveReaction { room_id, message_id, key })
            },
            SessionEvent::TypingStart { room_id } => self.send(Command::TypingStart { room_id }),
            SessionEvent::TypingStop { room_id } => self.send(Command::TypingStop { room_id }),
            SessionEvent::FetchHistory { room_id } => self.fetch_history(room_id),
            SessionEvent::MarkRead { room_id } => self.mark_read(room_id),
        }
    }

    // ---- user intents ----

    fn join_room(&mut self, room_id: RoomId) -> Result<Vec<SessionAction>, SessionError> {
        self.require_connected("join_room")?;
        self.store.set_active(room_id.clone());
        // Optimistic; the server's read cursor remains authoritative
        self.store.zero_unread(&room_id);

        Ok(vec![
            self.encode(Command::JoinRoom { room_id: room_id.clone() })?,
            self.encode(Command::ReadMessages { room_id, up_to: None })?,
        ])
    }

    fn leave_room(&mut self, room_id: RoomId) -> Result<Vec<SessionAction>, SessionError> {
        self.require_connected("leave_room")?;
        self.store.clear_active_if(&room_id);
        Ok(vec![self.encode(Command::LeaveRoom { room_id })?])
    }

    fn send_message(
        &mut self,
        room_id: RoomId,
        content: String,
        kind: parlor_proto::MessageKind,
    ) -> Result<Vec<SessionAction>, SessionError> {
        self.require_connected("send_message")?;
        if !self.store.contains(&room_id) {
            return Err(SessionError::UnknownRoom { room_id });
        }

        let local_id = format!("local-{:016x}", self.env.random_u64());
        let sender = self.user_id.clone().unwrap_or_default();
        let provisional =
            Message::provisional(local_id.clone(), room_id.clone(), sender, kind, content.clone());
        self.store.append_message(provisional);
        self.pending_acks.insert(local_id.clone(), (room_id.clone(), self.env.now()));

        Ok(vec![self.encode(Command::SendMessage { room_id, local_id, content, kind })?])
    }

    fn fetch_history(&mut self, room_id: RoomId) -> Result<Vec<SessionAction>, SessionError> {
        self.require_connected("fetch_history")?;
        if !self.store.contains(&room_id) {
            return Err(SessionError::UnknownRoom { room_id });
        }
        let before = self.store.oldest_confirmed_id(&room_id);
        let limit = self.config.history_page_size;
        Ok(vec![self.encode(Command::FetchHistory { room_id, before, limit })?])
    }

    fn mark_read(&mut self, room_id: RoomId) -> Result<Vec<SessionAction>, SessionError> {
        self.require_connected("read_messages")?;
        self.store.zero_unread(&room_id);
        Ok(vec![self.encode(Command::ReadMessages { room_id, up_to: None })?])
    }

    fn send(&mut self, command: Command) -> Result<Vec<SessionAction>, SessionError> {
        self.require_connected(command.name())?;
        Ok(vec![self.encode(command)?])
    }

    fn encode(&self, command: Command) -> Result<SessionAction, SessionError> {
        Ok(SessionAction::Send(command.into_frame()?))
    }

    fn require_connected(&self, command: &'static str) -> Result<(), SessionError> {
        match self.connection.state() {
            ConnectionState::Connected => Ok(()),
            ConnectionState::Exhausted => Err(SessionError::ReconnectExhausted {
                attempts: self.config.connection.max_attempts,
            }),
            _ => Err(SessionError::NotConnected { command }),
        }
    }

    fn ensure_message(
        &self,
        room_id: &RoomId,
        message_id: &MessageId,
    ) -> Result<(), SessionError> {
        let Some(messages) = self.store.messages(room_id) else {
            return Err(SessionError::UnknownRoom { room_id: room_id.clone() });
        };
        if messages.iter().any(|m| m.id == *message_id) {
            Ok(())
        } else {
            Err(SessionError::UnknownMessage {
                room_id: room_id.clone(),
                message_id: message_id.clone(),
            })
        }
    }

    // ---- inbound frames ----

    fn handle_frame(
        &mut self,
        frame: parlor_proto::EventFrame,
    ) -> Result<Vec<SessionAction>, SessionError> {
        let event = match ServerEvent::from_frame(frame) {
            Ok(event) => event,
            Err(error) if error.is_droppable() => {
                // Forward compatibility: unknown and malformed events
                // are dropped without terminating the stream
                warn!(%error, "dropping undecodable event");
                return Ok(Vec::new());
            },
            Err(error) => return Err(error.into()),
        };
        Ok(self.apply_event(event))
    }

    fn apply_event(&mut self, event: ServerEvent) -> Vec<SessionAction> {
        match event {
            ServerEvent::Connected(data) => {
                info!(session_id = %data.session_id, user_id = %data.user_id, "session established");
                self.user_id = Some(data.user_id);
                // Reconnects re-enter the room the user was in
                match self.store.active_room() {
                    Some(room_id) => {
                        let room_id = room_id.clone();
                        self.encode_infallible(Command::JoinRoom { room_id })
                    },
                    None => Vec::new(),
                }
            },
            ServerEvent::RoomList { rooms } => {
                debug!(count = rooms.len(), "room listing received");
                self.store.seed_rooms(rooms);
                Vec::new()
            },
            ServerEvent::RoomJoined { room, members } => {
                let room_id = room.id.clone();
                self.store.upsert_room(room, members);

                if self.store.active_room() == Some(&room_id) {
                    // Paging from the oldest confirmed entry keeps a
                    // re-join from prepending newer messages
                    let before = self.store.oldest_confirmed_id(&room_id);
                    let limit = self.config.history_page_size;
                    self.encode_infallible(Command::FetchHistory { room_id, before, limit })
                } else {
                    Vec::new()
                }
            },
            ServerEvent::UserJoined { room_id, member } => {
                self.store.member_joined(&room_id, member);
                Vec::new()
            },
            ServerEvent::UserLeft { room_id, user_id, display_name } => {
                self.store.member_left(&room_id, &user_id, &display_name);
                Vec::new()
            },
            ServerEvent::NewMessage { message } => {
                let room_id = message.room_id.clone();
                let message_id = message.id.clone();
                if !self.store.append_message(Message::from_info(message)) {
                    return Vec::new();
                }
                if self.store.active_room() == Some(&room_id) {
                    Vec::new()
                } else {
                    self.store.increment_unread(&room_id);
                    vec![SessionAction::Notify(Notice::MessageReceived { room_id, message_id })]
                }
            },
            ServerEvent::MessageSent { message } => {
                use parlor_core::ReconcileOutcome;
                if let ReconcileOutcome::Replaced { local_id } =
                    self.store.reconcile(Message::from_info(message))
                {
                    self.pending_acks.remove(&local_id);
                }
                Vec::new()
            },
            ServerEvent::MessageHistory(page) => {
                let messages = page.messages.into_iter().map(Message::from_info).collect();
                self.store.prepend_history(&page.room_id, messages);
                Vec::new()
            },
            ServerEvent::UserTyping { room_id, user_id } => {
                let now = self.env.now();
                self.store.typing_started(&room_id, user_id, now);
                Vec::new()
            },
            ServerEvent::UserTypingStopped { room_id, user_id } => {
                self.store.typing_stopped(&room_id, &user_id);
                Vec::new()
            },
            ServerEvent::ReactionAdded(change) => {
                if !self.store.add_reaction(
                    &change.room_id,
                    &change.message_id,
                    &change.key,
                    &change.user_id,
                ) {
                    debug!(message_id = %change.message_id, "reaction for unbuffered message");
                }
                Vec::new()
            },
            ServerEvent::ReactionRemoved(change) => {
                self.store.remove_reaction(
                    &change.room_id,
                    &change.message_id,
                    &change.key,
                    &change.user_id,
                );
                Vec::new()
            },
            ServerEvent::MessageEdited { room_id, message_id, content, updated_at } => {
                self.store.edit_message(&room_id, &message_id, content, updated_at);
                Vec::new()
            },
            ServerEvent::MessageDeleted { room_id, message_id } => {
                self.store.delete_message(&room_id, &message_id);
                Vec::new()
            },
            ServerEvent::Error { message } => {
                warn!(%message, "server rejected a command");
                vec![SessionAction::Notify(Notice::ServerError { message })]
            },
        }
    }

    // ---- timers ----

    fn sweep_pending(&mut self, now: E::Instant) -> Vec<SessionAction> {
        let timeout = self.config.ack_timeout;
        let expired: Vec<(MessageId, RoomId)> = self
            .pending_acks
            .iter()
            .filter(|(_, (_, sent_at))| now - *sent_at >= timeout)
            .map(|(local_id, (room_id, _))| (local_id.clone(), room_id.clone()))
            .collect();

        let mut actions = Vec::new();
        for (local_id, room_id) in expired {
            self.pending_acks.remove(&local_id);
            if self.store.mark_failed(&room_id, &local_id) {
                warn!(%room_id, %local_id, "send confirmation timed out");
                actions.push(SessionAction::Notify(Notice::SendFailed { room_id, local_id }));
            }
        }
        actions
    }

    /// No confirmation can arrive once the transport is gone, so every
    /// in-flight send fails immediately rather than waiting out the
    /// ack timeout.
    fn fail_pending_sends(&mut self) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        for (local_id, (room_id, _)) in self.pending_acks.drain() {
            if self.store.mark_failed(&room_id, &local_id) {
                warn!(%room_id, %local_id, "send orphaned by transport close");
                actions.push(SessionAction::Notify(Notice::SendFailed { room_id, local_id }));
            }
        }
        actions
    }

    // ---- helpers ----

    fn lift(actions: Vec<ConnectAction>) -> Vec<SessionAction> {
        actions
            .into_iter()
            .map(|action| match action {
                ConnectAction::Dial => SessionAction::Dial,
                ConnectAction::ScheduleReconnect { attempt, delay } => {
                    SessionAction::ScheduleReconnect { attempt, delay }
                },
                ConnectAction::CancelReconnect => SessionAction::CancelReconnect,
                ConnectAction::Exhausted { attempts } => {
                    SessionAction::Notify(Notice::ConnectivityLost { attempts })
                },
            })
            .collect()
    }

    /// Encode a command the session originates itself.
    ///
    /// These commands carry no user data that could fail to serialize;
    /// an encode failure here is a bug, logged and dropped rather than
    /// poisoning inbound dispatch.
    fn encode_infallible(&self, command: Command) -> Vec<SessionAction> {
        match command.into_frame() {
            Ok(frame) => vec![SessionAction::Send(frame)],
            Err(error) => {
                warn!(%error, "failed to encode internal command");
                Vec::new()
            },
        }
    }
}

impl<E: Environment> std::fmt::Debug for Session<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("connection", &self.connection.state())
            .field("rooms", &self.store.room_count())
            .field("pending_acks", &self.pending_acks.len())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use parlor_core::{CloseReason, Delivery as D, env::test_utils::MockEnv};
    use parlor_proto::{EventFrame, MessageKind};
    use serde_json::{Map, Value, json};

    use super::*;

    fn frame(kind: &str, data: Value) -> EventFrame {
        let Value::Object(data) = data else { panic!("test payload must be an object") };
        EventFrame { kind: kind.into(), success: true, error: None, data }
    }

    fn message_json(id: &str, room: &str, content: &str, at: i64) -> Value {
        json!({
            "id": id,
            "room_id": room,
            "sender_id": "u2",
            "kind": "text",
            "content": content,
            "created_at": at,
            "updated_at": at,
        })
    }

    fn room_json(id: &str) -> Value {
        json!({
            "id": id,
            "name": "general",
            "kind": "group",
            "created_at": 1000,
            "member_count": 1,
        })
    }

    fn member_json(user: &str, name: &str) -> Value {
        json!({ "user_id": user, "display_name": name, "role": "member", "online": true })
    }

    fn session() -> (Session<MockEnv>, MockEnv) {
        let env = MockEnv::new();
        (Session::new(env.clone(), SessionConfig::default()), env)
    }

    fn connected_session() -> (Session<MockEnv>, MockEnv) {
        let (mut session, env) = session();
        session.handle(SessionEvent::Connect).unwrap();
        session.handle(SessionEvent::TransportOpened).unwrap();
        session
            .handle(SessionEvent::FrameReceived(frame(
                "connected",
                json!({ "session_id": "s1", "user_id": "me" }),
            )))
            .unwrap();
        (session, env)
    }

    fn join(session: &mut Session<MockEnv>, room: &str) {
        session.handle(SessionEvent::JoinRoom { room_id: room.into() }).unwrap();
        session
            .handle(SessionEvent::FrameReceived(frame(
                "room_joined",
                json!({ "room": room_json(room), "members": [member_json("me", "Me")] }),
            )))
            .unwrap();
    }

    fn sends(actions: &[SessionAction]) -> Vec<&str> {
        actions
            .iter()
            .filter_map(|a| match a {
                SessionAction::Send(frame) => Some(frame.command.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn commands_while_disconnected_fail_synchronously() {
        let (mut session, _env) = session();
        let result = session.handle(SessionEvent::SendMessage {
            room_id: "r1".into(),
            content: "hi".into(),
            kind: MessageKind::Text,
        });
        assert_eq!(result, Err(SessionError::NotConnected { command: "send_message" }));
    }

    #[test]
    fn connected_event_stores_user_and_rejoins_active_room() {
        let (mut session, _env) = connected_session();
        join(&mut session, "r1");
        assert_eq!(session.user_id(), Some(&"me".to_string()));

        // Drop and reconnect
        session
            .handle(SessionEvent::TransportClosed {
                reason: CloseReason::Abnormal("reset".into()),
            })
            .unwrap();
        session.handle(SessionEvent::RetryTimerFired).unwrap();
        session.handle(SessionEvent::TransportOpened).unwrap();

        let actions = session
            .handle(SessionEvent::FrameReceived(frame(
                "connected",
                json!({ "session_id": "s2", "user_id": "me" }),
            )))
            .unwrap();
        assert_eq!(sends(&actions), ["join_room"]);
    }

    #[test]
    fn join_marks_active_and_reads() {
        let (mut session, _env) = connected_session();
        let actions = session.handle(SessionEvent::JoinRoom { room_id: "r1".into() }).unwrap();
        assert_eq!(sends(&actions), ["join_room", "read_messages"]);
        assert_eq!(session.store().active_room(), Some(&"r1".to_string()));
    }

    #[test]
    fn optimistic_send_confirms_without_count_change() {
        let (mut session, _env) = connected_session();
        join(&mut session, "r1");

        let actions = session
            .handle(SessionEvent::SendMessage {
                room_id: "r1".into(),
                content: "hello".into(),
                kind: MessageKind::Text,
            })
            .unwrap();
        assert_eq!(sends(&actions), ["send_message"]);

        let messages = session.store().messages(&"r1".to_string()).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].delivery, D::Pending);

        session
            .handle(SessionEvent::FrameReceived(frame(
                "message_sent",
                json!({ "message": message_json("m1", "r1", "hello", 500) }),
            )))
            .unwrap();

        let messages = session.store().messages(&"r1".to_string()).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, "m1");
        assert_eq!(messages[0].delivery, D::Confirmed);
        assert_eq!(messages[0].created_at, 500);
    }

    #[test]
    fn unconfirmed_send_fails_after_ack_timeout() {
        let (mut session, env) = connected_session();
        join(&mut session, "r1");
        session
            .handle(SessionEvent::SendMessage {
                room_id: "r1".into(),
                content: "hello".into(),
                kind: MessageKind::Text,
            })
            .unwrap();

        env.advance(Duration::from_secs(9));
        assert!(session.handle(SessionEvent::Tick { now: env.now() }).unwrap().is_empty());

        env.advance(Duration::from_secs(1));
        let actions = session.handle(SessionEvent::Tick { now: env.now() }).unwrap();
        assert_eq!(actions.len(), 1);
        assert!(matches!(
            actions[0],
            SessionAction::Notify(Notice::SendFailed { ref room_id, .. }) if room_id == "r1"
        ));

        let messages = session.store().messages(&"r1".to_string()).unwrap();
        assert_eq!(messages[0].delivery, D::Failed);
    }

    #[test]
    fn inactive_room_message_bumps_unread_and_notifies() {
        let (mut session, _env) = connected_session();
        join(&mut session, "r1");
        session
            .handle(SessionEvent::FrameReceived(frame(
                "room_list",
                json!({ "rooms": [room_json("r2")] }),
            )))
            .unwrap();

        let actions = session
            .handle(SessionEvent::FrameReceived(frame(
                "new_message",
                json!({ "message": message_json("m1", "r2", "psst", 100) }),
            )))
            .unwrap();

        assert!(matches!(
            actions[0],
            SessionAction::Notify(Notice::MessageReceived { ref room_id, .. }) if room_id == "r2"
        ));
        assert_eq!(session.store().room(&"r2".to_string()).unwrap().unread_count, 1);
    }

    #[test]
    fn active_room_message_stays_quiet() {
        let (mut session, _env) = connected_session();
        join(&mut session, "r1");

        let actions = session
            .handle(SessionEvent::FrameReceived(frame(
                "new_message",
                json!({ "message": message_json("m1", "r1", "hi", 100) }),
            )))
            .unwrap();
        assert!(actions.is_empty());
        assert_eq!(session.store().room(&"r1".to_string()).unwrap().unread_count, 0);
    }

    #[test]
    fn editing_unknown_message_fails_locally() {
        let (mut session, _env) = connected_session();
        join(&mut session, "r1");

        let result = session.handle(SessionEvent::EditMessage {
            room_id: "r1".into(),
            message_id: "nope".into(),
            content: "fixed".into(),
        });
        assert_eq!(
            result,
            Err(SessionError::UnknownMessage { room_id: "r1".into(), message_id: "nope".into() })
        );
    }

    #[test]
    fn malformed_frames_are_dropped_quietly() {
        let (mut session, _env) = connected_session();
        let actions = session
            .handle(SessionEvent::FrameReceived(frame("new_message", json!({ "nope": 1 }))))
            .unwrap();
        assert!(actions.is_empty());

        let actions = session
            .handle(SessionEvent::FrameReceived(frame("presence_blend", json!({}))))
            .unwrap();
        assert!(actions.is_empty());
    }

    #[test]
    fn server_error_notifies_without_state_change() {
        let (mut session, _env) = connected_session();
        join(&mut session, "r1");
        let before = session.store().messages(&"r1".to_string()).unwrap().len();

        let actions = session
            .handle(SessionEvent::FrameReceived(EventFrame {
                kind: "error".into(),
                success: false,
                error: Some("rate limited".into()),
                data: Map::new(),
            }))
            .unwrap();

        assert_eq!(actions, vec![SessionAction::Notify(Notice::ServerError {
            message: "rate limited".into(),
        })]);
        assert_eq!(session.store().messages(&"r1".to_string()).unwrap().len(), before);
    }

    #[test]
    fn exhausted_reconnects_surface_connectivity_loss() {
        let (mut session, _env) = connected_session();
        session
            .handle(SessionEvent::TransportClosed {
                reason: CloseReason::Abnormal("reset".into()),
            })
            .unwrap();

        let mut last = Vec::new();
        for _ in 0..5 {
            session.handle(SessionEvent::RetryTimerFired).unwrap();
            last = session
                .handle(SessionEvent::DialFailed { reason: "refused".into() })
                .unwrap();
        }
        assert_eq!(last, vec![SessionAction::Notify(Notice::ConnectivityLost { attempts: 5 })]);
    }

    #[test]
    fn commands_after_exhaustion_fail_fatally() {
        let (mut session, _env) = connected_session();
        session
            .handle(SessionEvent::TransportClosed {
                reason: CloseReason::Abnormal("reset".into()),
            })
            .unwrap();
        for _ in 0..5 {
            session.handle(SessionEvent::RetryTimerFired).unwrap();
            session.handle(SessionEvent::DialFailed { reason: "refused".into() }).unwrap();
        }

        let error = session
            .handle(SessionEvent::TypingStart { room_id: "r1".into() })
            .unwrap_err();
        assert_eq!(error, SessionError::ReconnectExhausted { attempts: 5 });
        assert!(error.is_fatal());
    }

    #[test]
    fn fetch_history_uses_oldest_confirmed_cursor() {
        let (mut session, _env) = connected_session();
        join(&mut session, "r1");
        session
            .handle(SessionEvent::FrameReceived(frame(
                "message_history",
                json!({
                    "room_id": "r1",
                    "messages": [message_json("m1", "r1", "old", 10)],
                    "has_more": true,
                }),
            )))
            .unwrap();

        let actions = session.handle(SessionEvent::FetchHistory { room_id: "r1".into() }).unwrap();
        let SessionAction::Send(frame) = &actions[0] else { panic!("expected send") };
        assert_eq!(frame.command, "fetch_history");
        assert_eq!(frame.data["before"], "m1");
    }

    #[test]
    fn typing_events_flow_through_the_store() {
        let (mut session, env) = connected_session();
        join(&mut session, "r1");
        session
            .handle(SessionEvent::FrameReceived(frame(
                "user_joined",
                json!({ "room_id": "r1", "member": member_json("u2", "Sam") }),
            )))
            .unwrap();

        session
            .handle(SessionEvent::FrameReceived(frame(
                "user_typing",
                json!({ "room_id": "r1", "user_id": "u2" }),
            )))
            .unwrap();
        assert_eq!(session.typing_users(&"r1".to_string()), vec![(
            "u2".to_string(),
            "Sam".to_string()
        )]);

        env.advance(Duration::from_millis(5000));
        assert!(session.typing_users(&"r1".to_string()).is_empty());
    }

    #[test]
    fn transport_close_fails_in_flight_sends() {
        let (mut session, env) = connected_session();
        join(&mut session, "r1");
        session
            .handle(SessionEvent::SendMessage {
                room_id: "r1".into(),
                content: "hello".into(),
                kind: MessageKind::Text,
            })
            .unwrap();

        let actions = session
            .handle(SessionEvent::TransportClosed {
                reason: CloseReason::Abnormal("reset".into()),
            })
            .unwrap();
        assert!(actions.iter().any(|a| matches!(
            a,
            SessionAction::Notify(Notice::SendFailed { room_id, .. }) if room_id == "r1"
        )));

        let messages = session.store().messages(&"r1".to_string()).unwrap();
        assert_eq!(messages[0].delivery, D::Failed);

        // Already failed; later sweeps stay quiet
        env.advance(Duration::from_secs(120));
        assert!(session.handle(SessionEvent::Tick { now: env.now() }).unwrap().is_empty());
    }
}
