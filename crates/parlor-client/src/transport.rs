//! Transport abstraction and the production WebSocket implementation.
//!
//! The runtime in [`crate::manager`] is written against the
//! [`Connector`] and [`Transport`] traits so the same orchestration
//! code runs over a real WebSocket (the `transport` feature) and over
//! in-memory channel fakes in tests. Frames cross this layer as raw
//! JSON text; all protocol logic stays in the session.

use std::future::Future;

use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Dial or handshake failed.
    #[error("connect failed: {0}")]
    Connect(String),

    /// The open connection failed mid-stream.
    #[error("stream error: {0}")]
    Stream(String),
}

/// An open, bidirectional text-frame connection.
pub trait Transport: Send {
    /// Send one frame of text.
    fn send(&mut self, text: String) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Receive the next text frame.
    ///
    /// Returns `None` on a clean close and `Some(Err(_))` when the
    /// stream fails mid-flight.
    fn recv(&mut self) -> impl Future<Output = Option<Result<String, TransportError>>> + Send;

    /// Close the connection cleanly.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Dials new transports. One connector serves the whole session; each
/// reconnect attempt calls [`Connector::connect`] again.
pub trait Connector: Clone + Send + Sync + 'static {
    /// Transport type produced by a successful dial.
    type Transport: Transport + 'static;

    /// Open a new connection.
    fn connect(
        &self,
    ) -> impl Future<Output = Result<Self::Transport, TransportError>> + Send;
}

/// Production environment: real clock, tokio timers, OS RNG.
#[derive(Clone, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl parlor_core::env::Environment for SystemEnv {
    type Instant = std::time::Instant;

    fn now(&self) -> Self::Instant {
        std::time::Instant::now()
    }

    fn sleep(&self, duration: std::time::Duration) -> impl Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer)
            .expect("invariant: OS RNG failure is unrecoverable - ids would collide");
    }
}

#[cfg(feature = "transport")]
pub use websocket::WsConnector;

#[cfg(feature = "transport")]
mod websocket {
    use futures_util::{SinkExt, StreamExt};
    use tokio::net::TcpStream;
    use tokio_tungstenite::{
        MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message,
    };
    use tracing::debug;

    use super::{Connector, Transport, TransportError};

    /// Connector dialing a fixed WebSocket URL.
    #[derive(Debug, Clone)]
    pub struct WsConnector {
        url: String,
    }

    impl WsConnector {
        /// Create a connector for `url` (`ws://` or `wss://`).
        #[must_use]
        pub fn new(url: impl Into<String>) -> Self {
            Self { url: url.into() }
        }
    }

    impl Connector for WsConnector {
        type Transport = WsTransport;

        async fn connect(&self) -> Result<Self::Transport, TransportError> {
            let (stream, response) = connect_async(self.url.as_str())
                .await
                .map_err(|e| TransportError::Connect(e.to_string()))?;
            debug!(status = %response.status(), "websocket connected");
            Ok(WsTransport { stream })
        }
    }

    /// An open WebSocket connection carrying JSON text frames.
    pub struct WsTransport {
        stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    }

    impl Transport for WsTransport {
        async fn send(&mut self, text: String) -> Result<(), TransportError> {
            self.stream
                .send(Message::text(text))
                .await
                .map_err(|e| TransportError::Stream(e.to_string()))
        }

        async fn recv(&mut self) -> Option<Result<String, TransportError>> {
            loop {
                match self.stream.next().await? {
                    Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
                    Ok(Message::Close(_)) => return None,
                    // Pings are answered by tungstenite internally
                    Ok(_) => continue,
                    Err(e) => return Some(Err(TransportError::Stream(e.to_string()))),
                }
            }
        }

        async fn close(&mut self) {
            let _ = self.stream.close(None).await;
        }
    }
}
