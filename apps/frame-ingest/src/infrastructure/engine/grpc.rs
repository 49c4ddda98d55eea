//! gRPC adapter for the [`RemoteEngine`] port.
//!
//! A fixed pool of channels is used round-robin. Each port method is one
//! RPC; gRPC status codes are mapped onto [`ClientError`] kinds so the
//! client can tell a lost handle from a broken transport.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt, future};
use tonic::transport::{Channel, Endpoint};
use tonic::{Code, Status};

use super::proto::data_frame_service_client::DataFrameServiceClient;
use super::proto::{
    ArrowBatch, CollectRequest, CreateFromArrowRequest, DataFrameHandle, DropHandleRequest,
    GetShapeRequest, HeartbeatRequest, ReadParquetRequest, SelectRequest, WriteParquetRequest,
    WriteResponse,
};
use crate::application::ports::{ChunkStream, ClientError, RemoteEngine};
use crate::domain::handle::RemoteHandle;
use crate::infrastructure::config::ClientConfig;

/// Remote engine reached over `frame.v1.DataFrameService`.
#[derive(Debug)]
pub struct GrpcEngine {
    clients: Vec<DataFrameServiceClient<Channel>>,
    next: AtomicUsize,
    endpoint: String,
}

impl GrpcEngine {
    /// Open `pool_size` channels to the configured server.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Connect`] if the address is invalid or a
    /// channel cannot be established.
    pub async fn connect(config: &ClientConfig) -> Result<Self, ClientError> {
        let uri = config.endpoint_uri();
        let endpoint = Endpoint::from_shared(uri.clone())
            .map_err(|e| ClientError::Connect(format!("{uri}: {e}")))?
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .http2_keep_alive_interval(config.keepalive_interval)
            .keep_alive_timeout(config.keepalive_timeout)
            .keep_alive_while_idle(true);

        let pool_size = config.pool_size.max(1);
        let mut clients = Vec::with_capacity(pool_size);
        for _ in 0..pool_size {
            let channel = endpoint
                .connect()
                .await
                .map_err(|e| ClientError::Connect(format!("{uri}: {e}")))?;
            clients.push(Self::client(channel, config.max_message_bytes));
        }

        tracing::info!(endpoint = %uri, pool_size, "Connected to engine");
        Ok(Self {
            clients,
            next: AtomicUsize::new(0),
            endpoint: uri,
        })
    }

    /// Wrap existing channels.
    #[must_use]
    pub fn from_channels(channels: Vec<Channel>, max_message_bytes: usize, endpoint: String) -> Self {
        Self {
            clients: channels
                .into_iter()
                .map(|channel| Self::client(channel, max_message_bytes))
                .collect(),
            next: AtomicUsize::new(0),
            endpoint,
        }
    }

    /// Server address.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn client(channel: Channel, max_message_bytes: usize) -> DataFrameServiceClient<Channel> {
        DataFrameServiceClient::new(channel)
            .max_decoding_message_size(max_message_bytes)
            .max_encoding_message_size(max_message_bytes)
    }

    fn pick(&self) -> Result<DataFrameServiceClient<Channel>, ClientError> {
        if self.clients.is_empty() {
            return Err(ClientError::Connect("no channels".to_string()));
        }
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.clients.len();
        Ok(self.clients[i].clone())
    }
}

#[async_trait]
impl RemoteEngine for GrpcEngine {
    async fn read(&self, path: &str, columns: &[String]) -> Result<RemoteHandle, ClientError> {
        let request = ReadParquetRequest {
            path: path.to_string(),
            columns: columns.to_vec(),
            predicate: None,
            n_rows: None,
        };
        let response = self
            .pick()?
            .read_parquet(request)
            .await
            .map_err(|s| map_status(s, path))?;
        handle_from_response(response.into_inner())
    }

    async fn select(
        &self,
        handle: &RemoteHandle,
        columns: &[String],
    ) -> Result<RemoteHandle, ClientError> {
        let request = SelectRequest {
            handle: handle.to_string(),
            columns: columns.to_vec(),
        };
        let response = self
            .pick()?
            .select(request)
            .await
            .map_err(|s| map_status(s, handle.as_str()))?;
        handle_from_response(response.into_inner())
    }

    async fn collect(&self, handle: &RemoteHandle) -> Result<ChunkStream, ClientError> {
        let request = CollectRequest {
            handle: handle.to_string(),
        };
        let subject = handle.to_string();
        let response = self
            .pick()?
            .collect(request)
            .await
            .map_err(|s| map_status(s, &subject))?;

        let chunks = response
            .into_inner()
            .map(move |item| match item {
                Ok(batch) => chunk_from_batch(batch),
                Err(status) => Err(map_status(status, &subject)),
            })
            .try_filter(|bytes| future::ready(!bytes.is_empty()));
        Ok(chunks.boxed())
    }

    async fn shape(&self, handle: &RemoteHandle) -> Result<(u64, u64), ClientError> {
        let request = GetShapeRequest {
            handle: handle.to_string(),
        };
        let shape = self
            .pick()?
            .get_shape(request)
            .await
            .map_err(|s| map_status(s, handle.as_str()))?
            .into_inner();
        Ok((non_negative(shape.rows), non_negative(shape.columns)))
    }

    async fn drop_handle(&self, handle: &RemoteHandle) -> Result<(), ClientError> {
        let request = DropHandleRequest {
            handle: handle.to_string(),
        };
        let response = self
            .pick()?
            .drop_handle(request)
            .await
            .map_err(|s| map_status(s, handle.as_str()))?
            .into_inner();
        if response.success {
            Ok(())
        } else {
            Err(ClientError::Remote(format!("engine refused to drop {handle}")))
        }
    }

    async fn heartbeat(&self, handle: &RemoteHandle) -> Result<bool, ClientError> {
        let request = HeartbeatRequest {
            handles: vec![handle.to_string()],
        };
        let response = self
            .pick()?
            .heartbeat(request)
            .await
            .map_err(|s| map_status(s, handle.as_str()))?
            .into_inner();
        Ok(response.alive.get(handle.as_str()).copied().unwrap_or(false))
    }

    async fn create_from_arrow(&self, arrow_ipc: Vec<u8>) -> Result<RemoteHandle, ClientError> {
        let response = self
            .pick()?
            .create_from_arrow(CreateFromArrowRequest { arrow_ipc })
            .await
            .map_err(|s| map_status(s, "create_from_arrow"))?;
        handle_from_response(response.into_inner())
    }

    async fn write_parquet(&self, handle: &RemoteHandle, path: &str) -> Result<u64, ClientError> {
        let request = WriteParquetRequest {
            handle: handle.to_string(),
            path: path.to_string(),
        };
        let response = self
            .pick()?
            .write_parquet(request)
            .await
            .map_err(|s| map_status(s, handle.as_str()))?
            .into_inner();
        write_result(response, path)
    }

    async fn disconnect(&self) {
        tracing::info!(endpoint = %self.endpoint, "Disconnected from engine");
    }
}

/// Map a gRPC status onto a client error kind. `subject` names the handle
/// or path the call was about.
pub(crate) fn map_status(status: Status, subject: &str) -> ClientError {
    let message = if status.message().is_empty() {
        subject.to_string()
    } else {
        format!("{subject}: {}", status.message())
    };
    match status.code() {
        Code::NotFound => ClientError::HandleNotFound(message),
        Code::DeadlineExceeded => ClientError::HandleExpired(message),
        _ => ClientError::Transport(format!("{:?}: {message}", status.code())),
    }
}

fn handle_from_response(response: DataFrameHandle) -> Result<RemoteHandle, ClientError> {
    match response.error {
        Some(error) if !error.is_empty() => Err(ClientError::Remote(error)),
        _ if response.handle.is_empty() => {
            Err(ClientError::Remote("engine returned an empty handle".to_string()))
        }
        _ => Ok(RemoteHandle::new(response.handle)),
    }
}

fn chunk_from_batch(batch: ArrowBatch) -> Result<Vec<u8>, ClientError> {
    match batch.error {
        Some(error) if !error.is_empty() => Err(ClientError::Remote(error)),
        _ => Ok(batch.arrow_ipc),
    }
}

fn write_result(response: WriteResponse, path: &str) -> Result<u64, ClientError> {
    match response.error {
        Some(error) if !error.is_empty() => Err(ClientError::Remote(error)),
        _ if !response.success => Err(ClientError::Remote(format!("write to {path} failed"))),
        _ => Ok(response.rows_written.map_or(0, non_negative)),
    }
}

fn non_negative(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}
