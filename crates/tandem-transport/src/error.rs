//! Error types for the transport layer.

/// Errors that can occur while listening, accepting, or exchanging
/// frames on a realtime connection.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Binding the listener failed on every probed port.
    #[error("no free port in {start}..={end}")]
    NoFreePort { start: u16, end: u16 },

    /// Accepting or upgrading an incoming connection failed.
    #[error("failed to accept connection: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// Sending a frame failed (peer gone, broken pipe).
    #[error("failed to send: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving a frame failed.
    #[error("failed to receive: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// The connection was closed.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),
}
