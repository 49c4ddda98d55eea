//! Stream-to-Engine Pipeline
//!
//! Every event feeds the rolling window (monitoring only) and the batch
//! buffer (persistence). A full buffer is handed to the client as one
//! dataset and cleared only after the engine accepted it; a failed flush
//! leaves the buffer intact and is returned to the caller, never retried
//! here.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use futures::{Stream, StreamExt};

use crate::application::ports::{ClientError, EventSource};
use crate::application::services::client::DatasetClient;
use crate::application::services::event_stream::{ResilientEventStream, StreamTermination};
use crate::domain::event::StreamEvent;
use crate::domain::handle::RemoteHandle;
use crate::domain::window::{RollingWindowAggregator, SeriesAggregators, WindowStats};
use crate::infrastructure::metrics;

/// Series key for events that carry no symbol.
const UNKEYED_SERIES: &str = "_";

/// Configuration for the ingestion loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Events per flush.
    pub batch_size: usize,
    /// Rolling window capacity.
    pub window_size: usize,
    /// Log window statistics every this many events (0 disables).
    pub log_every: u64,
    /// Sample end-to-end latency every this many events (0 disables).
    pub latency_every: u64,
    /// Keep one window per symbol as well as the global one.
    pub per_symbol: bool,
    /// Cap on per-symbol windows.
    pub max_series: usize,
    /// Write each flushed dataset to Parquet under this directory on the
    /// engine host, then release it.
    pub sink_dir: Option<PathBuf>,
    /// Keep flushed datasets alive with heartbeats at this interval. Ignored
    /// when `sink_dir` is set.
    pub keep_alive: Option<Duration>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            window_size: 1000,
            log_every: 100,
            latency_every: 1000,
            per_symbol: false,
            max_series: 1024,
            sink_dir: None,
            keep_alive: None,
        }
    }
}

/// Errors surfaced by the ingestion loop.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The engine did not accept a batch. The events are still buffered.
    #[error("failed to persist {events} events: {source}")]
    Persist {
        /// Events in the rejected batch.
        events: usize,
        /// Underlying client error.
        #[source]
        source: ClientError,
    },

    /// A persisted batch could not be written to the Parquet sink.
    #[error("failed to write {path}: {source}")]
    Sink {
        /// Target path on the engine host.
        path: String,
        /// Underlying client error.
        #[source]
        source: ClientError,
    },
}

/// A successful flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushReceipt {
    /// One-based flush number.
    pub sequence: u64,
    /// Events persisted.
    pub events: usize,
    /// Dataset holding the events, unless it was released after sinking.
    pub handle: Option<RemoteHandle>,
    /// Parquet file written, if a sink is configured.
    pub sink_path: Option<String>,
}

/// Running totals, shared with health reporting.
#[derive(Debug, Default)]
pub struct PipelineCounters {
    events: AtomicU64,
    flushes: AtomicU64,
    flushed_events: AtomicU64,
    failed_flushes: AtomicU64,
}

impl PipelineCounters {
    /// Events ingested.
    #[must_use]
    pub fn events(&self) -> u64 {
        self.events.load(Ordering::Relaxed)
    }

    /// Successful flushes.
    #[must_use]
    pub fn flushes(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }

    /// Events persisted by successful flushes.
    #[must_use]
    pub fn flushed_events(&self) -> u64 {
        self.flushed_events.load(Ordering::Relaxed)
    }

    /// Flushes the engine rejected.
    #[must_use]
    pub fn failed_flushes(&self) -> u64 {
        self.failed_flushes.load(Ordering::Relaxed)
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    /// Events ingested.
    pub events: u64,
    /// Successful flushes.
    pub flushes: u64,
    /// Events persisted.
    pub flushed_events: u64,
    /// Events still buffered.
    pub pending: usize,
    /// How the event stream ended, when it was driven by `run_stream`.
    pub termination: Option<StreamTermination>,
}

/// Ingestion loop state.
pub struct IngestPipeline {
    client: Arc<DatasetClient>,
    config: PipelineConfig,
    aggregator: RollingWindowAggregator,
    series: Option<SeriesAggregators>,
    buffer: Vec<StreamEvent>,
    counters: Arc<PipelineCounters>,
    last_stats: Option<WindowStats>,
}

impl IngestPipeline {
    /// Create a pipeline writing through `client`.
    #[must_use]
    pub fn new(client: Arc<DatasetClient>, config: PipelineConfig) -> Self {
        let series = config
            .per_symbol
            .then(|| SeriesAggregators::new(config.window_size, config.max_series));
        Self {
            client,
            aggregator: RollingWindowAggregator::new(config.window_size),
            series,
            buffer: Vec::with_capacity(config.batch_size.max(1)),
            counters: Arc::new(PipelineCounters::default()),
            last_stats: None,
            config,
        }
    }

    /// Shared counters.
    #[must_use]
    pub fn counters(&self) -> Arc<PipelineCounters> {
        Arc::clone(&self.counters)
    }

    /// Events buffered and not yet flushed.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Buffered events in arrival order.
    #[must_use]
    pub fn buffered(&self) -> &[StreamEvent] {
        &self.buffer
    }

    /// Most recent global window statistics.
    #[must_use]
    pub const fn last_stats(&self) -> Option<&WindowStats> {
        self.last_stats.as_ref()
    }

    /// Feed one event; flushes when the buffer reaches the batch size.
    ///
    /// # Errors
    ///
    /// Returns the flush error. The event is buffered either way.
    pub async fn ingest(&mut self, event: StreamEvent) -> Result<Option<FlushReceipt>, PipelineError> {
        let seen = self.counters.events.fetch_add(1, Ordering::Relaxed) + 1;
        self.observe(seen, &event);
        self.buffer.push(event);

        if self.buffer.len() >= self.config.batch_size.max(1) {
            self.flush().await
        } else {
            Ok(None)
        }
    }

    /// Persist whatever is buffered. Returns `None` if the buffer is empty.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Persist`] with the buffer untouched, or
    /// [`PipelineError::Sink`] after the events were persisted.
    pub async fn flush(&mut self) -> Result<Option<FlushReceipt>, PipelineError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }
        let events = self.buffer.len();

        let handle = match self.client.persist_batch(&self.buffer).await {
            Ok(handle) => handle,
            Err(source) => {
                self.counters.failed_flushes.fetch_add(1, Ordering::Relaxed);
                metrics::record_flush(events, false);
                tracing::error!(events, error = %source, "Flush failed; batch kept in buffer");
                return Err(PipelineError::Persist { events, source });
            }
        };
        self.buffer.clear();

        let sequence = self.counters.flushes.fetch_add(1, Ordering::Relaxed) + 1;
        self.counters
            .flushed_events
            .fetch_add(events as u64, Ordering::Relaxed);
        metrics::record_flush(events, true);
        tracing::info!(sequence, events, %handle, "Batch flushed");

        let mut receipt = FlushReceipt {
            sequence,
            events,
            handle: Some(handle.clone()),
            sink_path: None,
        };

        if let Some(dir) = &self.config.sink_dir {
            let path = dir
                .join(format!("batch-{sequence:06}.parquet"))
                .to_string_lossy()
                .into_owned();
            let rows = self
                .client
                .write_parquet(&handle, &path)
                .await
                .map_err(|source| PipelineError::Sink {
                    path: path.clone(),
                    source,
                })?;
            tracing::debug!(sequence, rows, %path, "Batch written to sink");
            if let Err(e) = self.client.drop_handle(&handle).await {
                tracing::debug!(%handle, error = %e, "Release after sink failed");
            }
            receipt.handle = None;
            receipt.sink_path = Some(path);
        } else if let Some(interval) = self.config.keep_alive {
            if let Err(e) = self.client.start_heartbeat(&handle, interval) {
                tracing::warn!(%handle, error = %e, "Could not keep flushed batch alive");
            }
        }

        Ok(Some(receipt))
    }

    /// Consume `events` until the stream ends. Events left below the batch
    /// size stay buffered; call [`IngestPipeline::flush`] to persist them.
    ///
    /// # Errors
    ///
    /// Returns the first flush error.
    pub async fn run<St>(&mut self, events: St) -> Result<PipelineReport, PipelineError>
    where
        St: Stream<Item = StreamEvent>,
    {
        let mut events = std::pin::pin!(events);
        while let Some(event) = events.next().await {
            self.ingest(event).await?;
        }
        Ok(self.report(None))
    }

    /// Drive a [`ResilientEventStream`] to completion.
    ///
    /// # Errors
    ///
    /// Returns the first flush error. The stream task is stopped and its
    /// connection closed before the error is returned.
    pub async fn run_stream<S>(
        &mut self,
        mut stream: ResilientEventStream<S>,
    ) -> Result<PipelineReport, PipelineError>
    where
        S: EventSource + 'static,
    {
        let stop = stream.stop_token();
        let (events, join) = stream.spawn();
        let report = match self.run(events).await {
            Ok(report) => report,
            Err(e) => {
                stop.cancel();
                match join.await {
                    Ok(termination) => {
                        tracing::info!(?termination, "Event stream stopped after flush failure");
                    }
                    Err(join_error) => {
                        tracing::error!(error = %join_error, "Event stream task failed");
                    }
                }
                return Err(e);
            }
        };
        let termination = match join.await {
            Ok(termination) => termination,
            Err(e) => {
                tracing::error!(error = %e, "Event stream task failed");
                StreamTermination::ConsumerGone
            }
        };
        if let StreamTermination::GaveUp { attempts, last_error } = &termination {
            tracing::warn!(attempts, %last_error, "Event stream gave up; no more data");
        }
        Ok(PipelineReport {
            termination: Some(termination),
            ..report
        })
    }

    fn report(&self, termination: Option<StreamTermination>) -> PipelineReport {
        PipelineReport {
            events: self.counters.events(),
            flushes: self.counters.flushes(),
            flushed_events: self.counters.flushed_events(),
            pending: self.buffer.len(),
            termination,
        }
    }

    fn observe(&mut self, seen: u64, event: &StreamEvent) {
        if let Some(stats) = self.aggregator.update(event.clone()) {
            if self.config.log_every > 0 && seen % self.config.log_every == 0 {
                tracing::info!(
                    events = seen,
                    mean = stats.mean,
                    min = stats.min,
                    max = stats.max,
                    std_dev = stats.std_dev,
                    total_volume = stats.total_volume,
                    buffered = self.buffer.len(),
                    "Window statistics"
                );
            }
            self.last_stats = Some(stats);
        }

        if let Some(series) = &mut self.series {
            let key = event.symbol.as_deref().unwrap_or(UNKEYED_SERIES);
            let update = series.update(key, event.clone());
            if let Some(evicted) = update.evicted {
                tracing::debug!(%evicted, key, "Series cap reached, evicted stalest series");
            }
            if update.new_series {
                metrics::set_series(series.len());
            }
            if let Some(stats) = update.stats
                && self.config.log_every > 0
                && seen % self.config.log_every == 0
            {
                tracing::debug!(key, mean = stats.mean, std_dev = stats.std_dev, "Series statistics");
            }
        }

        if self.config.latency_every > 0 && seen % self.config.latency_every == 0 {
            let latency_ms = Utc::now().timestamp_millis().saturating_sub(event.timestamp);
            metrics::record_latency_ms(latency_ms);
            tracing::debug!(latency_ms, events = seen, "End-to-end latency");
        }
    }
}
