//! Session manager and runtime for the Parlor real-time chat core.
//!
//! This crate wraps the pure state machines from `parlor-core` in an
//! async runtime: a spawned task owns the [`Session`], executes its
//! actions over a pluggable [`transport::Connector`], and exposes the
//! cloneable [`SessionHandle`] to the application.
//!
//! # Architecture
//!
//! ```text
//! SessionHandle ──events──▶ SessionManager task ──▶ Session (sans-IO)
//!                                 │    ▲                │
//!                            dial/│    │frames          │actions
//!                                 ▼    │                ▼
//!                              Transport ◀──────── Send/Dial/timers
//! ```
//!
//! Enable the `transport` feature for the production WebSocket
//! connector; tests run against in-memory fakes.

pub mod event;
pub mod manager;
pub mod session;
pub mod transport;

pub use event::{Notice, SessionAction, SessionEvent};
pub use manager::{ClientError, SessionHandle, SessionManager, spawn_session};
pub use session::{DEFAULT_ACK_TIMEOUT, DEFAULT_HISTORY_PAGE_SIZE, Session, SessionConfig};
pub use transport::{Connector, SystemEnv, Transport, TransportError};
