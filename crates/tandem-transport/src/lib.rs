//! Transport layer for the Tandem hub.
//!
//! Provides the [`Transport`] and [`Connection`] traits that abstract
//! over the realtime channel (WebSocket today), plus the per-IP
//! connection rate limiter applied at accept time.
//!
//! # Feature Flags
//!
//! - `websocket` (default) — WebSocket transport via `tokio-tungstenite`

#![allow(async_fn_in_trait)]

mod error;
mod ratelimit;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
pub use ratelimit::{ConnectionRateLimiter, RateLimiterConfig};
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConnection, WebSocketTransport};

use std::net::SocketAddr;

use tandem_protocol::ConnectionId;

/// A listener that accepts incoming realtime connections.
pub trait Transport {
    type Connection: Connection;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Waits for and accepts the next incoming connection.
    async fn accept(&mut self) -> Result<Self::Connection, Self::Error>;

    /// Shuts the listener down.
    async fn shutdown(&self) -> Result<(), Self::Error>;
}

/// A single bidirectional, ordered, message-framed connection.
pub trait Connection: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Sends one message frame.
    async fn send(&self, data: &[u8]) -> Result<(), Self::Error>;

    /// Receives the next message frame. `Ok(None)` means the peer
    /// closed cleanly.
    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error>;

    /// Closes the connection.
    async fn close(&self) -> Result<(), Self::Error>;

    /// This connection's server-local id.
    fn id(&self) -> ConnectionId;

    /// The peer's socket address (source of the rate-limit key).
    fn peer_addr(&self) -> SocketAddr;
}
