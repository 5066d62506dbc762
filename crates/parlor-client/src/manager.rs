//! Async runtime around the session state machine.
//!
//! [`SessionManager::spawn`] starts the task that owns the
//! [`Session`] and executes its actions: dialing through a
//! [`Connector`], pumping frames between the transport and the
//! dispatcher, arming reconnect timers, and forwarding notices.
//! Applications talk to it through the cloneable [`SessionHandle`].
//!
//! Everything here is plumbing; ordering and backoff rules live in
//! `parlor-core` and [`crate::session`].

use std::time::Duration;

use parlor_core::{ConnectionState, Message, Room, SessionError, env::Environment};
use parlor_proto::{EventFrame, MessageId, MessageKind, RoomId, UserId};
use thiserror::Error;
use tokio::{
    sync::{mpsc, oneshot},
    task::AbortHandle,
};
use tracing::{debug, warn};

use crate::{
    event::{Notice, SessionAction, SessionEvent},
    session::{Session, SessionConfig},
    transport::{Connector, Transport},
};

/// Maintenance tick period (drives ack-timeout sweeps).
const TICK_INTERVAL: Duration = Duration::from_secs(1);

const CHANNEL_CAPACITY: usize = 64;

/// Errors returned by [`SessionHandle`] methods.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The session rejected the command.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The session task has stopped.
    #[error("session task stopped")]
    Stopped,
}

enum Inbound<I> {
    Event(SessionEvent<I>, Option<oneshot::Sender<Result<(), SessionError>>>),
    LinkUp(Link),
    Query(Query),
}

enum Query {
    ConnectionState(oneshot::Sender<ConnectionState>),
    Rooms(oneshot::Sender<Vec<Room>>),
    Messages(RoomId, oneshot::Sender<Option<Vec<Message>>>),
    TypingUsers(RoomId, oneshot::Sender<Vec<(UserId, String)>>),
}

/// An open transport, as seen by the manager task.
struct Link {
    outbound: mpsc::Sender<String>,
    abort: AbortHandle,
}

/// Owns the session and executes its actions.
pub struct SessionManager<E: Environment, C: Connector> {
    env: E,
    session: Session<E>,
    connector: C,
    /// Weak so internal tasks never keep the inbound channel alive:
    /// once every [`SessionHandle`] is dropped, `recv` returns `None`
    /// and the task tears down.
    inbound_tx: mpsc::WeakSender<Inbound<E::Instant>>,
    notices_tx: mpsc::Sender<Notice>,
    link: Option<Link>,
    dial_task: Option<AbortHandle>,
    retry_timer: Option<AbortHandle>,
}

impl<E: Environment, C: Connector> SessionManager<E, C> {
    /// Spawn the session task.
    ///
    /// Returns the command handle and the notice stream. The task runs
    /// until every handle is dropped, then closes its transport.
    pub fn spawn(
        env: E,
        config: SessionConfig,
        connector: C,
    ) -> (SessionHandle<E::Instant>, mpsc::Receiver<Notice>) {
        let (inbound_tx, inbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (notices_tx, notices_rx) = mpsc::channel(CHANNEL_CAPACITY);

        let manager = Self {
            session: Session::new(env.clone(), config),
            env: env.clone(),
            connector,
            inbound_tx: inbound_tx.downgrade(),
            notices_tx,
            link: None,
            dial_task: None,
            retry_timer: None,
        };
        tokio::spawn(manager.run(inbound_rx));
        tokio::spawn(run_ticker(env, inbound_tx.downgrade()));

        (SessionHandle { tx: inbound_tx }, notices_rx)
    }

    async fn run(mut self, mut inbound: mpsc::Receiver<Inbound<E::Instant>>) {
        while let Some(message) = inbound.recv().await {
            match message {
                Inbound::Event(event, reply) => {
                    let result = self.session.handle(event);
                    match result {
                        Ok(actions) => {
                            if let Some(reply) = reply {
                                let _ = reply.send(Ok(()));
                            }
                            self.execute(actions).await;
                        },
                        Err(error) => {
                            match reply {
                                Some(reply) => {
                                    let _ = reply.send(Err(error));
                                },
                                None => warn!(%error, "internal event rejected"),
                            }
                        },
                    }
                },
                Inbound::LinkUp(link) => {
                    // A stale link from a previous dial is torn down
                    if let Some(old) = self.link.replace(link) {
                        old.abort.abort();
                    }
                },
                Inbound::Query(query) => self.answer(query),
            }
        }

        debug!("all handles dropped, stopping session task");
        self.teardown();
    }

    async fn execute(&mut self, actions: Vec<SessionAction>) {
        for action in actions {
            match action {
                SessionAction::Send(frame) => match frame.encode() {
                    Ok(text) => self.write(text).await,
                    Err(error) => warn!(%error, "failed to encode command"),
                },
                SessionAction::Dial => self.dial(),
                SessionAction::CloseTransport => {
                    if let Some(task) = self.dial_task.take() {
                        task.abort();
                    }
                    if let Some(link) = self.link.take() {
                        link.abort.abort();
                    }
                },
                SessionAction::ScheduleReconnect { attempt, delay } => {
                    debug!(attempt, ?delay, "arming reconnect timer");
                    self.arm_retry_timer(delay);
                },
                SessionAction::CancelReconnect => {
                    if let Some(timer) = self.retry_timer.take() {
                        timer.abort();
                    }
                },
                SessionAction::Notify(notice) => {
                    let _ = self.notices_tx.send(notice).await;
                },
            }
        }
    }

    async fn write(&mut self, text: String) {
        let Some(link) = &self.link else {
            // The close raced the command; the session already knows
            debug!("dropping outbound frame, no transport");
            return;
        };
        if link.outbound.send(text).await.is_err() {
            debug!("transport task gone, dropping outbound frame");
            self.link = None;
        }
    }

    fn dial(&mut self) {
        let connector = self.connector.clone();
        let tx = self.inbound_tx.clone();

        let task = tokio::spawn(async move {
            match connector.connect().await {
                Ok(transport) => {
                    let (outbound_tx, outbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
                    let pump = tokio::spawn(run_connection(transport, outbound_rx, tx.clone()));
                    let link = Link { outbound: outbound_tx, abort: pump.abort_handle() };
                    if !send_inbound(&tx, Inbound::LinkUp(link)).await {
                        pump.abort();
                        return;
                    }
                    send_inbound(&tx, Inbound::Event(SessionEvent::TransportOpened, None)).await;
                },
                Err(error) => {
                    let event = SessionEvent::DialFailed { reason: error.to_string() };
                    send_inbound(&tx, Inbound::Event(event, None)).await;
                },
            }
        });
        if let Some(previous) = self.dial_task.replace(task.abort_handle()) {
            previous.abort();
        }
    }

    fn arm_retry_timer(&mut self, delay: Duration) {
        let env = self.env.clone();
        let tx = self.inbound_tx.clone();
        let task = tokio::spawn(async move {
            env.sleep(delay).await;
            send_inbound(&tx, Inbound::Event(SessionEvent::RetryTimerFired, None)).await;
        });
        if let Some(previous) = self.retry_timer.replace(task.abort_handle()) {
            previous.abort();
        }
    }

    fn answer(&mut self, query: Query) {
        match query {
            Query::ConnectionState(reply) => {
                let _ = reply.send(self.session.connection_state());
            },
            Query::Rooms(reply) => {
                let _ = reply.send(self.session.store().rooms().cloned().collect());
            },
            Query::Messages(room_id, reply) => {
                let _ = reply.send(self.session.store().messages(&room_id).map(<[Message]>::to_vec));
            },
            Query::TypingUsers(room_id, reply) => {
                let _ = reply.send(self.session.typing_users(&room_id));
            },
        }
    }

    fn teardown(&mut self) {
        if let Some(timer) = self.retry_timer.take() {
            timer.abort();
        }
        if let Some(task) = self.dial_task.take() {
            task.abort();
        }
        if let Some(link) = self.link.take() {
            link.abort.abort();
        }
    }
}

/// Deliver an internal message, holding the channel open only for the
/// duration of the send. Returns false when the session task is gone.
async fn send_inbound<I>(tx: &mpsc::WeakSender<Inbound<I>>, message: Inbound<I>) -> bool {
    match tx.upgrade() {
        Some(tx) => tx.send(message).await.is_ok(),
        None => false,
    }
}

/// Pump frames between the transport and the session task.
async fn run_connection<T: Transport, I: Send + 'static>(
    mut transport: T,
    mut outbound: mpsc::Receiver<String>,
    tx: mpsc::WeakSender<Inbound<I>>,
) {
    use parlor_core::CloseReason;

    let reason = loop {
        tokio::select! {
            frame = transport.recv() => match frame {
                Some(Ok(text)) => match EventFrame::decode(&text) {
                    Ok(frame) => {
                        let event = SessionEvent::FrameReceived(frame);
                        if !send_inbound(&tx, Inbound::Event(event, None)).await {
                            transport.close().await;
                            return;
                        }
                    },
                    Err(error) => warn!(%error, "dropping malformed frame"),
                },
                Some(Err(error)) => break CloseReason::Abnormal(error.to_string()),
                None => break CloseReason::Normal,
            },
            text = outbound.recv() => match text {
                Some(text) => {
                    if let Err(error) = transport.send(text).await {
                        break CloseReason::Abnormal(error.to_string());
                    }
                },
                // Link replaced or manager stopped
                None => {
                    transport.close().await;
                    return;
                },
            },
        }
    };

    send_inbound(&tx, Inbound::Event(SessionEvent::TransportClosed { reason }, None)).await;
}

async fn run_ticker<E: Environment>(env: E, tx: mpsc::WeakSender<Inbound<E::Instant>>) {
    loop {
        env.sleep(TICK_INTERVAL).await;
        let event = SessionEvent::Tick { now: env.now() };
        if !send_inbound(&tx, Inbound::Event(event, None)).await {
            return;
        }
    }
}

/// Cloneable handle to a running session task.
#[derive(Clone)]
pub struct SessionHandle<I> {
    tx: mpsc::Sender<Inbound<I>>,
}

impl<I: Send> SessionHandle<I> {
    /// Deliver an event and wait for the session's verdict.
    ///
    /// # Errors
    ///
    /// [`ClientError::Session`] when the session rejects the command,
    /// [`ClientError::Stopped`] when the task is gone.
    pub async fn event(&self, event: SessionEvent<I>) -> Result<(), ClientError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Inbound::Event(event, Some(reply_tx)))
            .await
            .map_err(|_| ClientError::Stopped)?;
        reply_rx.await.map_err(|_| ClientError::Stopped)??;
        Ok(())
    }

    /// Open the connection.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.event(SessionEvent::Connect).await
    }

    /// Close the connection without reconnecting.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        self.event(SessionEvent::Disconnect).await
    }

    /// Enter a room and make it active.
    pub async fn join_room(&self, room_id: RoomId) -> Result<(), ClientError> {
        self.event(SessionEvent::JoinRoom { room_id }).await
    }

    /// Leave a room.
    pub async fn leave_room(&self, room_id: RoomId) -> Result<(), ClientError> {
        self.event(SessionEvent::LeaveRoom { room_id }).await
    }

    /// Send a message (displayed optimistically until confirmed).
    pub async fn send_message(
        &self,
        room_id: RoomId,
        content: String,
        kind: MessageKind,
    ) -> Result<(), ClientError> {
        self.event(SessionEvent::SendMessage { room_id, content, kind }).await
    }

    /// Replace the content of an existing message.
    pub async fn edit_message(
        &self,
        room_id: RoomId,
        message_id: MessageId,
        content: String,
    ) -> Result<(), ClientError> {
        self.event(SessionEvent::EditMessage { room_id, message_id, content }).await
    }

    /// Soft-delete a message.
    pub async fn delete_message(
        &self,
        room_id: RoomId,
        message_id: MessageId,
    ) -> Result<(), ClientError> {
        self.event(SessionEvent::DeleteMessage { room_id, message_id }).await
    }

    /// Add a reaction to a message.
    pub async fn add_reaction(
        &self,
        room_id: RoomId,
        message_id: MessageId,
        key: String,
    ) -> Result<(), ClientError> {
        self.event(SessionEvent::AddReaction { room_id, message_id, key }).await
    }

    /// Remove a reaction from a message.
    pub async fn remove_reaction(
        &self,
        room_id: RoomId,
        message_id: MessageId,
        key: String,
    ) -> Result<(), ClientError> {
        self.event(SessionEvent::RemoveReaction { room_id, message_id, key }).await
    }

    /// Signal that the user started composing.
    pub async fn typing_start(&self, room_id: RoomId) -> Result<(), ClientError> {
        self.event(SessionEvent::TypingStart { room_id }).await
    }

    /// Signal that the user stopped composing.
    pub async fn typing_stop(&self, room_id: RoomId) -> Result<(), ClientError> {
        self.event(SessionEvent::TypingStop { room_id }).await
    }

    /// Request the next page of older messages.
    pub async fn fetch_history(&self, room_id: RoomId) -> Result<(), ClientError> {
        self.event(SessionEvent::FetchHistory { room_id }).await
    }

    /// Mark everything delivered in a room as read.
    pub async fn mark_read(&self, room_id: RoomId) -> Result<(), ClientError> {
        self.event(SessionEvent::MarkRead { room_id }).await
    }

    /// Report that the application returned to the foreground.
    pub async fn app_foregrounded(&self) -> Result<(), ClientError> {
        self.event(SessionEvent::AppForegrounded).await
    }

    /// Report that network connectivity was restored.
    pub async fn network_online(&self) -> Result<(), ClientError> {
        self.event(SessionEvent::NetworkOnline).await
    }

    /// Report that the user completed authentication.
    pub async fn auth_logged_in(&self) -> Result<(), ClientError> {
        self.event(SessionEvent::AuthLoggedIn).await
    }

    /// Current connection lifecycle state.
    pub async fn connection_state(&self) -> Result<ConnectionState, ClientError> {
        self.query(Query::ConnectionState).await
    }

    /// Snapshot of all known rooms.
    pub async fn rooms(&self) -> Result<Vec<Room>, ClientError> {
        self.query(Query::Rooms).await
    }

    /// Snapshot of a room's message buffer, oldest first.
    pub async fn messages(&self, room_id: RoomId) -> Result<Option<Vec<Message>>, ClientError> {
        self.query(|reply| Query::Messages(room_id, reply)).await
    }

    /// Users currently typing in a room, resolved to display names.
    pub async fn typing_users(
        &self,
        room_id: RoomId,
    ) -> Result<Vec<(UserId, String)>, ClientError> {
        self.query(|reply| Query::TypingUsers(room_id, reply)).await
    }

    async fn query<R>(
        &self,
        build: impl FnOnce(oneshot::Sender<R>) -> Query,
    ) -> Result<R, ClientError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Inbound::Query(build(reply_tx)))
            .await
            .map_err(|_| ClientError::Stopped)?;
        reply_rx.await.map_err(|_| ClientError::Stopped)
    }
}

/// Convenience constructor: spawn a session over the given connector
/// with the production environment.
pub fn spawn_session<C: Connector>(
    config: SessionConfig,
    connector: C,
) -> (SessionHandle<std::time::Instant>, mpsc::Receiver<Notice>) {
    SessionManager::spawn(crate::transport::SystemEnv::new(), config, connector)
}
