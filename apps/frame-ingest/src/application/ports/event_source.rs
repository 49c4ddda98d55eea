//! Event source port.

use async_trait::async_trait;

/// Errors from the push-based event source.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StreamError {
    /// Connection attempt failed.
    #[error("connection failed: {0}")]
    Connect(String),

    /// Established connection failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// Peer closed the connection.
    #[error("connection closed")]
    ConnectionClosed,
}

/// A push-based source that can be (re)connected.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Live connection type.
    type Connection: EventConnection + 'static;

    /// Open a new connection.
    async fn connect(&self) -> Result<Self::Connection, StreamError>;

    /// Human-readable endpoint for logs.
    fn endpoint(&self) -> String;
}

/// One live connection to an [`EventSource`].
#[async_trait]
pub trait EventConnection: Send {
    /// Next text message. `None` means the peer closed the connection.
    async fn recv(&mut self) -> Option<Result<String, StreamError>>;

    /// Send an application-level liveness probe.
    async fn ping(&mut self) -> Result<(), StreamError>;

    /// Close the connection politely.
    async fn close(&mut self) {}
}
