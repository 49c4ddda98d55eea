//! Remote engine port.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::domain::handle::RemoteHandle;

/// Server-streamed wire chunks, each an Arrow IPC stream.
pub type ChunkStream = BoxStream<'static, Result<Vec<u8>, ClientError>>;

/// Errors surfaced at the client boundary.
///
/// Transport failures and handle lifecycle failures are distinguished by
/// kind so callers can decide whether a handle is gone for good.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Connection could not be established.
    #[error("connection failed: {0}")]
    Connect(String),

    /// RPC or stream failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The engine does not know the handle.
    #[error("handle not found: {0}")]
    HandleNotFound(String),

    /// The handle outlived its TTL on the engine.
    #[error("handle expired: {0}")]
    HandleExpired(String),

    /// The engine answered with an application-level error.
    #[error("remote error: {0}")]
    Remote(String),

    /// Malformed columnar data.
    #[error("decode error: {0}")]
    Decode(#[from] arrow::error::ArrowError),

    /// A collect stream ended without any chunk.
    #[error("No data received")]
    NoData,

    /// A collect exceeded the configured memory ceiling.
    #[error("collected {received} bytes, over the {limit} byte ceiling")]
    MemoryLimit {
        /// Bytes received before aborting.
        received: usize,
        /// Configured ceiling.
        limit: usize,
    },

    /// The client has been closed.
    #[error("client is closed")]
    Closed,

    /// No process-wide default client is installed.
    #[error("no default client installed")]
    NoDefaultClient,
}

impl ClientError {
    /// Whether the error means the handle is gone on the engine side.
    #[must_use]
    pub const fn is_handle_lost(&self) -> bool {
        matches!(self, Self::HandleNotFound(_) | Self::HandleExpired(_))
    }
}

/// Per-call contract of the remote columnar engine.
///
/// Implementations perform exactly one remote call per method and never
/// retry; admission control and handle bookkeeping live in the client.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteEngine: Send + Sync {
    /// Load a dataset from `path`, optionally projecting `columns`.
    async fn read(&self, path: &str, columns: &[String]) -> Result<RemoteHandle, ClientError>;

    /// Derive a new dataset holding only `columns`.
    async fn select(
        &self,
        handle: &RemoteHandle,
        columns: &[String],
    ) -> Result<RemoteHandle, ClientError>;

    /// Open a server stream of Arrow IPC chunks for `handle`.
    async fn collect(&self, handle: &RemoteHandle) -> Result<ChunkStream, ClientError>;

    /// `(rows, columns)` of the dataset.
    async fn shape(&self, handle: &RemoteHandle) -> Result<(u64, u64), ClientError>;

    /// Release the dataset.
    async fn drop_handle(&self, handle: &RemoteHandle) -> Result<(), ClientError>;

    /// Renew the handle's TTL. `Ok(false)` means the engine no longer has it.
    async fn heartbeat(&self, handle: &RemoteHandle) -> Result<bool, ClientError>;

    /// Create a dataset from an Arrow IPC stream.
    async fn create_from_arrow(&self, arrow_ipc: Vec<u8>) -> Result<RemoteHandle, ClientError>;

    /// Write the dataset to a Parquet file on the engine host. Returns rows written.
    async fn write_parquet(&self, handle: &RemoteHandle, path: &str) -> Result<u64, ClientError>;

    /// Tear down the transport.
    async fn disconnect(&self) {}
}
