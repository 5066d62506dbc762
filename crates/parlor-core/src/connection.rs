//! Connection lifecycle and reconnect backoff.
//!
//! [`ConnectionManager`] is a pure state machine: it decides what the
//! runtime should do (dial, schedule a retry, give up) and the runtime
//! owns the sockets and timers that carry those decisions out. Delays
//! are computed here and handed over as values, so the whole backoff
//! schedule is testable without a clock.

use std::time::Duration;

use tracing::{debug, info, warn};

/// Default delay before the first reconnect attempt.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(2000);

/// Default multiplier applied between consecutive attempts.
pub const DEFAULT_BACKOFF_FACTOR: f64 = 1.5;

/// Default number of reconnect attempts before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Tunable reconnect parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConnectionConfig {
    /// Delay before the first reconnect attempt.
    pub base_delay: Duration,
    /// Multiplier applied between consecutive attempts.
    pub backoff_factor: f64,
    /// Attempts made before the connection is declared lost for good.
    pub max_attempts: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Why the transport closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Clean shutdown (server or client initiated). No reconnect.
    Normal,
    /// Anything else: network drop, protocol violation, timeout.
    Abnormal(String),
}

/// External conditions that may justify an immediate redial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeTrigger {
    /// The application returned to the foreground.
    Foreground,
    /// The OS reported network connectivity restored.
    NetworkOnline,
    /// The user completed authentication.
    AuthLoggedIn,
}

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport and no retry pending.
    Disconnected,
    /// A dial is in flight.
    Connecting,
    /// Transport established and frames flowing.
    Connected,
    /// Waiting out the backoff delay before attempt `attempt`.
    WaitingRetry {
        /// 1-based number of the pending attempt.
        attempt: u32,
    },
    /// All attempts consumed. Only an explicit connect leaves this
    /// state.
    Exhausted,
}

/// Instructions for the runtime that owns sockets and timers.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectAction {
    /// Open a new transport.
    Dial,
    /// Arm a one-shot timer; fire [`ConnectionManager::retry_due`]
    /// when it elapses.
    ScheduleReconnect {
        /// 1-based attempt number, for logging.
        attempt: u32,
        /// How long to wait before redialing.
        delay: Duration,
    },
    /// Disarm any pending retry timer.
    CancelReconnect,
    /// Give up: surface a fatal connectivity loss to the caller.
    Exhausted {
        /// Attempts that were made.
        attempts: u32,
    },
}

/// Drives the connect / reconnect lifecycle.
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    config: ConnectionConfig,
    state: ConnectionState,
    /// Set while a client-initiated close is in flight so the ensuing
    /// transport-closed event is not mistaken for a network drop.
    closing: bool,
}

impl ConnectionManager {
    /// Create a manager in [`ConnectionState::Disconnected`].
    #[must_use]
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config, state: ConnectionState::Disconnected, closing: false }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Explicit connect request. Resets exhaustion.
    pub fn connect(&mut self) -> Vec<ConnectAction> {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Connected => Vec::new(),
            ConnectionState::Disconnected | ConnectionState::Exhausted => {
                self.closing = false;
                self.state = ConnectionState::Connecting;
                vec![ConnectAction::Dial]
            },
            ConnectionState::WaitingRetry { .. } => {
                // Skip the remaining delay; a failure after an explicit
                // connect restarts the schedule at attempt one
                self.state = ConnectionState::Connecting;
                vec![ConnectAction::CancelReconnect, ConnectAction::Dial]
            },
        }
    }

    /// The transport handshake completed.
    ///
    /// A stale open arriving after a disconnect is ignored; the runtime
    /// has already torn that transport down.
    pub fn established(&mut self) -> Vec<ConnectAction> {
        match self.state {
            ConnectionState::Disconnected | ConnectionState::Exhausted => {
                debug!("ignoring stale transport open");
                Vec::new()
            },
            _ => {
                info!("connection established");
                self.state = ConnectionState::Connected;
                self.closing = false;
                vec![ConnectAction::CancelReconnect]
            },
        }
    }

    /// Client-initiated shutdown. The runtime closes the transport;
    /// the eventual close event will be treated as normal.
    pub fn disconnect(&mut self) -> Vec<ConnectAction> {
        self.closing = true;
        self.state = ConnectionState::Disconnected;
        vec![ConnectAction::CancelReconnect]
    }

    /// The transport closed.
    ///
    /// Normal closes (and closes following [`Self::disconnect`]) end
    /// in [`ConnectionState::Disconnected`] with no retry. Abnormal
    /// closes start the backoff schedule.
    pub fn connection_lost(&mut self, reason: &CloseReason) -> Vec<ConnectAction> {
        if self.closing || *reason == CloseReason::Normal {
            debug!("transport closed cleanly");
            self.closing = false;
            self.state = ConnectionState::Disconnected;
            return Vec::new();
        }

        if let CloseReason::Abnormal(detail) = reason {
            warn!(%detail, "connection lost");
        }
        self.schedule_attempt(1)
    }

    /// A dial (initial or retry) failed before the handshake finished.
    pub fn dial_failed(&mut self) -> Vec<ConnectAction> {
        let failed_attempt = match self.state {
            ConnectionState::Connecting => 0,
            ConnectionState::WaitingRetry { attempt } => attempt,
            // Stale dial result after a disconnect; ignore
            _ => return Vec::new(),
        };

        if failed_attempt >= self.config.max_attempts {
            warn!(attempts = failed_attempt, "reconnect attempts exhausted");
            self.state = ConnectionState::Exhausted;
            return vec![ConnectAction::Exhausted { attempts: failed_attempt }];
        }
        self.schedule_attempt(failed_attempt + 1)
    }

    /// The retry timer fired; time to redial.
    ///
    /// The state stays [`ConnectionState::WaitingRetry`] so a failed
    /// dial knows which attempt it was.
    pub fn retry_due(&mut self) -> Vec<ConnectAction> {
        match self.state {
            ConnectionState::WaitingRetry { attempt } => {
                debug!(attempt, "retrying connection");
                vec![ConnectAction::Dial]
            },
            // Timer raced a cancel; ignore
            _ => Vec::new(),
        }
    }

    /// An external wake condition occurred.
    ///
    /// Only acts from [`ConnectionState::Disconnected`]: an in-flight
    /// dial or pending retry proceeds on its own schedule, and an
    /// exhausted session waits for an explicit connect.
    pub fn wake(&mut self, trigger: WakeTrigger) -> Vec<ConnectAction> {
        match self.state {
            ConnectionState::Disconnected => {
                info!(?trigger, "waking connection");
                self.closing = false;
                self.state = ConnectionState::Connecting;
                vec![ConnectAction::Dial]
            },
            _ => Vec::new(),
        }
    }

    /// Backoff delay before the given 1-based attempt.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        self.config.base_delay.mul_f64(self.config.backoff_factor.powi(exponent as i32))
    }

    fn schedule_attempt(&mut self, attempt: u32) -> Vec<ConnectAction> {
        let delay = self.delay_for(attempt);
        debug!(attempt, ?delay, "scheduling reconnect");
        self.state = ConnectionState::WaitingRetry { attempt };
        vec![ConnectAction::ScheduleReconnect { attempt, delay }]
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new(ConnectionConfig::default())
    }
}
