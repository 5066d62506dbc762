//! Sans-IO core for the Parlor real-time chat session.
//!
//! Everything in this crate is a pure state machine: no sockets, no
//! timers, no clocks. Time is passed in as values, side effects come
//! out as action vectors, and the runtime in `parlor-client` executes
//! them. This keeps every ordering and backoff rule deterministic and
//! testable without I/O.
//!
//! # Components
//!
//! - [`env::Environment`]: time and randomness abstraction
//! - [`model`]: rooms, members, messages, reactions
//! - [`store::RoomStore`]: per-room in-memory state, typing tracker,
//!   message reconciliation
//! - [`connection::ConnectionManager`]: lifecycle + reconnect backoff

pub mod connection;
pub mod env;
pub mod error;
pub mod model;
pub mod store;

pub use connection::{
    CloseReason, ConnectAction, ConnectionConfig, ConnectionManager, ConnectionState, WakeTrigger,
};
pub use error::SessionError;
pub use model::{Delivery, Member, Message, Room};
pub use store::{ReconcileOutcome, RoomStore};
