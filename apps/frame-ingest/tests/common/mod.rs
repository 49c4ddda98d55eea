//! In-memory remote engine shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;

use frame_ingest::{ChunkStream, ClientError, ClientOptions, DatasetClient, RemoteEngine, RemoteHandle};

/// Engine that keeps datasets as Arrow IPC payloads in memory.
///
/// Every call sleeps for `latency`, or for the delay registered for its path
/// or handle, and records how many calls overlapped.
#[derive(Default)]
pub struct InMemoryEngine {
    latency: Duration,
    delays: Mutex<HashMap<String, Duration>>,
    datasets: Mutex<HashMap<RemoteHandle, Vec<u8>>>,
    next_id: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: AtomicUsize,
    drops: Mutex<Vec<RemoteHandle>>,
    reads: Mutex<Vec<(String, RemoteHandle)>>,
    heartbeats: AtomicUsize,
    fail_creates: AtomicBool,
    hang_heartbeats: AtomicBool,
    disconnected: AtomicBool,
}

impl InMemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    /// Register a dataset directly.
    pub fn insert(&self, payload: Vec<u8>) -> RemoteHandle {
        let handle = self.fresh_handle();
        self.datasets.lock().insert(handle.clone(), payload);
        handle
    }

    /// Forget a handle as if its TTL had run out on the server.
    pub fn expire(&self, handle: &RemoteHandle) {
        self.datasets.lock().remove(handle);
    }

    /// Make calls about `key` (a read path or a handle) take `delay`.
    pub fn set_delay(&self, key: impl Into<String>, delay: Duration) {
        self.delays.lock().insert(key.into(), delay);
    }

    /// Make every heartbeat renewal hang forever.
    pub fn set_hang_heartbeats(&self, hang: bool) {
        self.hang_heartbeats.store(hang, Ordering::SeqCst);
    }

    pub fn set_fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::SeqCst);
    }

    pub fn dataset_count(&self) -> usize {
        self.datasets.lock().len()
    }

    pub fn payload(&self, handle: &RemoteHandle) -> Option<Vec<u8>> {
        self.datasets.lock().get(handle).cloned()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn dropped(&self) -> Vec<RemoteHandle> {
        self.drops.lock().clone()
    }

    /// Completed reads as `(path, handle)`, in completion order.
    pub fn reads(&self) -> Vec<(String, RemoteHandle)> {
        self.reads.lock().clone()
    }

    pub fn heartbeats(&self) -> usize {
        self.heartbeats.load(Ordering::SeqCst)
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    fn fresh_handle(&self) -> RemoteHandle {
        RemoteHandle::new(format!("df-{}", self.next_id.fetch_add(1, Ordering::SeqCst)))
    }

    async fn enter(&self, key: &str) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let delay = self.delays.lock().get(key).copied().unwrap_or(self.latency);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    fn leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn lookup(&self, handle: &RemoteHandle) -> Result<Vec<u8>, ClientError> {
        self.datasets
            .lock()
            .get(handle)
            .cloned()
            .ok_or_else(|| ClientError::HandleNotFound(handle.to_string()))
    }
}

#[async_trait]
impl RemoteEngine for InMemoryEngine {
    async fn read(&self, path: &str, _columns: &[String]) -> Result<RemoteHandle, ClientError> {
        self.enter(path).await;
        let result = if path.is_empty() {
            Err(ClientError::Remote("empty path".into()))
        } else {
            let handle = self.fresh_handle();
            self.datasets.lock().insert(handle.clone(), Vec::new());
            self.reads.lock().push((path.to_string(), handle.clone()));
            Ok(handle)
        };
        self.leave();
        result
    }

    async fn select(
        &self,
        handle: &RemoteHandle,
        _columns: &[String],
    ) -> Result<RemoteHandle, ClientError> {
        self.enter(handle.as_str()).await;
        let result = self.lookup(handle).map(|payload| {
            let derived = self.fresh_handle();
            self.datasets.lock().insert(derived.clone(), payload);
            derived
        });
        self.leave();
        result
    }

    async fn collect(&self, handle: &RemoteHandle) -> Result<ChunkStream, ClientError> {
        self.enter(handle.as_str()).await;
        let result = self
            .lookup(handle)
            .map(|payload| stream::iter(vec![Ok(payload)]).boxed());
        self.leave();
        result
    }

    async fn shape(&self, handle: &RemoteHandle) -> Result<(u64, u64), ClientError> {
        self.enter(handle.as_str()).await;
        let result = self.lookup(handle).and_then(|payload| {
            let batches = frame_ingest::domain::columnar::decode_ipc(&payload)?;
            let rows: usize = batches.iter().map(|b| b.num_rows()).sum();
            let columns = batches.first().map_or(0, |b| b.num_columns());
            Ok((rows as u64, columns as u64))
        });
        self.leave();
        result
    }

    async fn drop_handle(&self, handle: &RemoteHandle) -> Result<(), ClientError> {
        self.enter(handle.as_str()).await;
        let removed = self.datasets.lock().remove(handle).is_some();
        self.drops.lock().push(handle.clone());
        self.leave();
        if removed {
            Ok(())
        } else {
            Err(ClientError::HandleNotFound(handle.to_string()))
        }
    }

    async fn heartbeat(&self, handle: &RemoteHandle) -> Result<bool, ClientError> {
        self.enter(handle.as_str()).await;
        self.heartbeats.fetch_add(1, Ordering::SeqCst);
        if self.hang_heartbeats.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let alive = self.datasets.lock().contains_key(handle);
        self.leave();
        Ok(alive)
    }

    async fn create_from_arrow(&self, arrow_ipc: Vec<u8>) -> Result<RemoteHandle, ClientError> {
        self.enter("create_from_arrow").await;
        let result = if self.fail_creates.load(Ordering::SeqCst) {
            Err(ClientError::Transport("engine unavailable".into()))
        } else {
            let handle = self.fresh_handle();
            self.datasets.lock().insert(handle.clone(), arrow_ipc);
            Ok(handle)
        };
        self.leave();
        result
    }

    async fn write_parquet(&self, handle: &RemoteHandle, _path: &str) -> Result<u64, ClientError> {
        self.enter(handle.as_str()).await;
        let result = self.lookup(handle).and_then(|payload| {
            let batches = frame_ingest::domain::columnar::decode_ipc(&payload)?;
            Ok(batches.iter().map(|b| b.num_rows() as u64).sum())
        });
        self.leave();
        result
    }

    async fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }
}

/// Client over a shared in-memory engine.
pub fn client(engine: &Arc<InMemoryEngine>, options: ClientOptions) -> Arc<DatasetClient> {
    let engine: Arc<dyn RemoteEngine> = Arc::clone(engine) as Arc<dyn RemoteEngine>;
    Arc::new(DatasetClient::new(engine, options))
}
