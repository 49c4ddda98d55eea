//! Dataset Client
//!
//! Single point of contact with the remote engine. Every remote call passes
//! through one admission gate, every handle the client creates is tracked
//! until it is released, and [`DatasetClient::close`] tears everything down
//! in a fixed order: stop heartbeats, release handles, disconnect.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use arrow::array::RecordBatch;
use futures::future::join_all;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::application::ports::{ChunkStream, ClientError, RemoteEngine};
use crate::application::services::gate::CallGate;
use crate::application::services::handles::ActiveHandleSet;
use crate::application::services::heartbeat::{HeartbeatExit, HeartbeatSupervisor, HeartbeatTask};
use crate::domain::columnar::{self, RecordBatchSet};
use crate::domain::event::StreamEvent;
use crate::domain::handle::RemoteHandle;
use crate::infrastructure::config::ClientConfig;
use crate::infrastructure::engine::GrpcEngine;
use crate::infrastructure::metrics;

/// Runtime knobs of a [`DatasetClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    /// Cap on simultaneously in-flight remote calls.
    pub max_concurrent: usize,
    /// How long `close` waits for heartbeats to stop.
    pub shutdown_grace: Duration,
    /// Renewal interval used when callers do not pick one.
    pub heartbeat_interval: Duration,
    /// Ceiling on bytes reassembled by a single `collect`.
    pub max_collect_bytes: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            max_concurrent: 100,
            shutdown_grace: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(60),
            max_collect_bytes: 8 * 1024 * 1024 * 1024,
        }
    }
}

/// What `close` did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CloseReport {
    /// Heartbeat tasks that stopped on their own within the grace period.
    pub heartbeats_stopped: usize,
    /// Heartbeat tasks aborted after the grace period ran out.
    pub heartbeats_aborted: usize,
    /// Handles released successfully.
    pub handles_dropped: usize,
    /// Handle releases that failed and were left to server-side expiry.
    pub drop_failures: usize,
}

/// Bounded-concurrency client for remote datasets.
pub struct DatasetClient {
    engine: Arc<dyn RemoteEngine>,
    options: ClientOptions,
    gate: Arc<CallGate>,
    active: Arc<ActiveHandleSet>,
    heartbeats: Mutex<HashMap<RemoteHandle, RunningHeartbeat>>,
    shutdown: CancellationToken,
    closed: AtomicBool,
    session: Uuid,
}

struct RunningHeartbeat {
    task: HeartbeatTask,
    join: JoinHandle<HeartbeatExit>,
}

impl std::fmt::Debug for DatasetClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatasetClient")
            .field("session", &self.session)
            .field("options", &self.options)
            .field("active_handles", &self.active.len())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl DatasetClient {
    /// Connect to the engine described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Connect`] if no channel can be established.
    pub async fn connect(config: &ClientConfig) -> Result<Self, ClientError> {
        let engine = GrpcEngine::connect(config).await?;
        Ok(Self::new(Arc::new(engine), ClientOptions::from(config)))
    }

    /// Wrap an already connected engine.
    #[must_use]
    pub fn new(engine: Arc<dyn RemoteEngine>, options: ClientOptions) -> Self {
        let session = Uuid::new_v4();
        tracing::info!(
            %session,
            max_concurrent = options.max_concurrent,
            "Dataset client ready"
        );
        Self {
            engine,
            gate: Arc::new(CallGate::new(options.max_concurrent)),
            options,
            active: Arc::new(ActiveHandleSet::new()),
            heartbeats: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
            closed: AtomicBool::new(false),
            session,
        }
    }

    /// Client options.
    #[must_use]
    pub const fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Session identifier used in logs.
    #[must_use]
    pub const fn session(&self) -> Uuid {
        self.session
    }

    /// Whether `close` has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Remote calls currently in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.gate.in_flight()
    }

    /// Handles created and not yet released, sorted.
    #[must_use]
    pub fn active_handles(&self) -> Vec<RemoteHandle> {
        self.active.snapshot()
    }

    /// Whether `handle` is tracked by this client.
    #[must_use]
    pub fn is_tracked(&self, handle: &RemoteHandle) -> bool {
        self.active.contains(handle)
    }

    /// Load a dataset and track the new handle. An empty `columns` reads all.
    ///
    /// # Errors
    ///
    /// Returns the engine's error, or [`ClientError::Closed`]. A dataset
    /// whose creation finishes after `close` is released again and reported
    /// as [`ClientError::Closed`].
    pub async fn read_remote(
        &self,
        path: &str,
        columns: &[String],
    ) -> Result<RemoteHandle, ClientError> {
        let handle = self.call("read", self.engine.read(path, columns)).await?;
        self.track(&handle).await?;
        tracing::debug!(%handle, path, "Dataset loaded");
        Ok(handle)
    }

    /// Read every path concurrently. Results line up with `paths`.
    pub async fn batch_read(
        &self,
        paths: &[String],
        columns: &[String],
    ) -> Vec<Result<RemoteHandle, ClientError>> {
        join_all(paths.iter().map(|path| self.read_remote(path, columns))).await
    }

    /// Derive a dataset holding only `columns` and track it.
    ///
    /// # Errors
    ///
    /// Returns the engine's error, or [`ClientError::Closed`].
    pub async fn select(
        &self,
        handle: &RemoteHandle,
        columns: &[String],
    ) -> Result<RemoteHandle, ClientError> {
        let derived = self.call("select", self.engine.select(handle, columns)).await?;
        self.track(&derived).await?;
        Ok(derived)
    }

    /// `(rows, columns)` of a dataset.
    ///
    /// # Errors
    ///
    /// Returns the engine's error, or [`ClientError::Closed`].
    pub async fn shape(&self, handle: &RemoteHandle) -> Result<(u64, u64), ClientError> {
        self.call("shape", self.engine.shape(handle)).await
    }

    /// Fetch a whole dataset.
    ///
    /// The call slot is held until the last chunk has arrived. No partial
    /// table is ever returned.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NoData`] if the stream decoded to no batch,
    /// [`ClientError::MemoryLimit`] past the configured ceiling, or the first
    /// transport or decode error.
    pub async fn collect(&self, handle: &RemoteHandle) -> Result<RecordBatchSet, ClientError> {
        self.ensure_open()?;
        let _pass = self.gate.enter().await?;
        let result = match self.engine.collect(handle).await {
            Ok(chunks) => self.reassemble(chunks).await,
            Err(e) => Err(e),
        };
        metrics::record_remote_call("collect", result.is_ok());
        result
    }

    /// Collect every handle concurrently. Results line up with `handles`.
    pub async fn batch_collect(
        &self,
        handles: &[RemoteHandle],
    ) -> Vec<Result<RecordBatchSet, ClientError>> {
        join_all(handles.iter().map(|handle| self.collect(handle))).await
    }

    /// Yield record batches as chunks arrive.
    ///
    /// The stream owns its call slot; dropping it early cancels the server
    /// stream and frees the slot.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream cannot be opened.
    pub async fn stream_collect(
        &self,
        handle: &RemoteHandle,
    ) -> Result<BoxStream<'static, Result<RecordBatch, ClientError>>, ClientError> {
        self.ensure_open()?;
        let pass = self.gate.enter().await?;
        let chunks = self.engine.collect(handle).await.inspect_err(|_| {
            metrics::record_remote_call("stream_collect", false);
        })?;
        metrics::record_remote_call("stream_collect", true);

        let batches = chunks
            .and_then(|bytes| async move { columnar::decode_ipc(&bytes).map_err(ClientError::from) })
            .map_ok(|batches| stream::iter(batches.into_iter().map(Ok)))
            .try_flatten()
            .map(move |item| {
                let _held = &pass;
                item
            });
        Ok(batches.boxed())
    }

    /// Release a tracked handle and stop its heartbeat.
    ///
    /// A handle the engine reports as gone is untracked as well. Any other
    /// failure leaves the handle tracked so `close` releases it later.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::HandleNotFound`] if the handle is not tracked
    /// (never created here, or already released), or the engine's error.
    pub async fn drop_handle(&self, handle: &RemoteHandle) -> Result<(), ClientError> {
        self.ensure_open()?;
        if !self.active.remove(handle) {
            return Err(ClientError::HandleNotFound(handle.to_string()));
        }
        match self.call("drop_handle", self.engine.drop_handle(handle)).await {
            Err(e) if !e.is_handle_lost() => {
                if !self.is_closed() {
                    self.active.insert(handle.clone());
                }
                Err(e)
            }
            result => {
                self.stop_heartbeat(handle);
                result
            }
        }
    }

    /// Keep `handle` alive by renewing it every `interval` until shutdown or
    /// the handle is lost. Replaces any heartbeat already running for it.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Closed`] after `close`.
    pub fn start_heartbeat(
        &self,
        handle: &RemoteHandle,
        interval: Duration,
    ) -> Result<HeartbeatTask, ClientError> {
        self.ensure_open()?;
        let (supervisor, task) = HeartbeatSupervisor::new(
            handle.clone(),
            interval,
            Arc::clone(&self.engine),
            Arc::clone(&self.gate),
            Arc::clone(&self.active),
            self.shutdown.child_token(),
        );
        let join = tokio::spawn(supervisor.run());

        let previous = {
            let mut heartbeats = self.heartbeats.lock();
            heartbeats.retain(|_, hb| !hb.join.is_finished());
            heartbeats.insert(
                handle.clone(),
                RunningHeartbeat {
                    task: task.clone(),
                    join,
                },
            )
        };
        if let Some(previous) = previous {
            previous.task.cancel();
        }
        tracing::debug!(%handle, interval_secs = interval.as_secs(), "Heartbeat started");
        Ok(task)
    }

    /// Persist events as one new dataset and track it.
    ///
    /// # Errors
    ///
    /// Returns a decode error if the events cannot be encoded, or the
    /// engine's error.
    pub async fn persist_batch(&self, events: &[StreamEvent]) -> Result<RemoteHandle, ClientError> {
        let batch = columnar::events_to_record_batch(events)?;
        let payload = columnar::encode_ipc(&batch)?;
        let handle = self
            .call("create_from_arrow", self.engine.create_from_arrow(payload))
            .await?;
        self.track(&handle).await?;
        Ok(handle)
    }

    /// Write a dataset to Parquet on the engine host. Returns rows written.
    ///
    /// # Errors
    ///
    /// Returns the engine's error, or [`ClientError::Closed`].
    pub async fn write_parquet(&self, handle: &RemoteHandle, path: &str) -> Result<u64, ClientError> {
        self.call("write_parquet", self.engine.write_parquet(handle, path)).await
    }

    /// Shut down: cancel heartbeats, wait up to the grace period for them,
    /// release every tracked handle concurrently, then disconnect.
    ///
    /// Release failures are logged and swallowed; the engine expires
    /// unrenewed handles on its own. Calling `close` again is a no-op.
    pub async fn close(&self) -> CloseReport {
        if self.closed.swap(true, Ordering::SeqCst) {
            return CloseReport::default();
        }
        tracing::info!(session = %self.session, "Closing dataset client");
        self.shutdown.cancel();

        let mut report = CloseReport::default();
        let running: Vec<RunningHeartbeat> =
            self.heartbeats.lock().drain().map(|(_, hb)| hb).collect();
        let aborts: Vec<_> = running.iter().map(|hb| hb.join.abort_handle()).collect();
        let joins = running.into_iter().map(|hb| hb.join);

        match tokio::time::timeout(self.options.shutdown_grace, join_all(joins)).await {
            Ok(results) => report.heartbeats_stopped = results.len(),
            Err(_) => {
                tracing::warn!(
                    grace_secs = self.options.shutdown_grace.as_secs(),
                    "Heartbeats did not stop within the grace period; aborting"
                );
                for abort in &aborts {
                    if !abort.is_finished() {
                        abort.abort();
                        report.heartbeats_aborted += 1;
                    }
                }
                report.heartbeats_stopped = aborts.len() - report.heartbeats_aborted;
            }
        }

        let handles = self.active.drain();
        let releases = handles.iter().map(|handle| async move {
            let released = match self.gate.enter().await {
                Ok(_pass) => self.engine.drop_handle(handle).await,
                Err(e) => Err(e),
            };
            if let Err(e) = &released {
                tracing::debug!(%handle, error = %e, "Release on close failed");
            }
            released.is_ok()
        });
        for released in join_all(releases).await {
            if released {
                report.handles_dropped += 1;
            } else {
                report.drop_failures += 1;
            }
        }

        self.gate.close();
        self.engine.disconnect().await;
        tracing::info!(
            session = %self.session,
            heartbeats_stopped = report.heartbeats_stopped,
            heartbeats_aborted = report.heartbeats_aborted,
            handles_dropped = report.handles_dropped,
            drop_failures = report.drop_failures,
            "Dataset client closed"
        );
        report
    }

    fn ensure_open(&self) -> Result<(), ClientError> {
        if self.is_closed() {
            Err(ClientError::Closed)
        } else {
            Ok(())
        }
    }

    /// Track a freshly created handle. Once the client is closed the handle
    /// is released instead, since `close` has already drained the set.
    async fn track(&self, handle: &RemoteHandle) -> Result<(), ClientError> {
        self.active.insert(handle.clone());
        if !self.is_closed() {
            return Ok(());
        }
        if self.active.remove(handle) {
            match self.engine.drop_handle(handle).await {
                Ok(()) => tracing::debug!(%handle, "Released handle created during close"),
                Err(e) => tracing::debug!(%handle, error = %e, "Release after close failed"),
            }
        }
        Err(ClientError::Closed)
    }

    #[cfg(test)]
    fn registered_heartbeats(&self) -> usize {
        self.heartbeats.lock().len()
    }

    fn stop_heartbeat(&self, handle: &RemoteHandle) {
        if let Some(hb) = self.heartbeats.lock().remove(handle) {
            hb.task.cancel();
        }
    }

    async fn call<T>(
        &self,
        operation: &'static str,
        request: impl Future<Output = Result<T, ClientError>>,
    ) -> Result<T, ClientError> {
        self.ensure_open()?;
        let _pass = self.gate.enter().await?;
        let result = request.await;
        metrics::record_remote_call(operation, result.is_ok());
        if let Err(e) = &result {
            tracing::debug!(operation, error = %e, "Remote call failed");
        }
        result
    }

    async fn reassemble(&self, mut chunks: ChunkStream) -> Result<RecordBatchSet, ClientError> {
        let limit = self.options.max_collect_bytes;
        let mut received = 0usize;
        let mut batches = Vec::new();

        while let Some(chunk) = chunks.next().await {
            let bytes = chunk?;
            received = received.saturating_add(bytes.len());
            if received > limit {
                return Err(ClientError::MemoryLimit { received, limit });
            }
            batches.extend(columnar::decode_ipc(&bytes)?);
        }

        let Some(schema) = batches.first().map(RecordBatch::schema) else {
            return Err(ClientError::NoData);
        };
        Ok(RecordBatchSet::new(schema, batches))
    }
}
