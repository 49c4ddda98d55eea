//! Resilient Event Stream
//!
//! Reads a push-based [`EventSource`] and forwards decoded events in arrival
//! order. Lost connections are re-established with exponential backoff;
//! after `max_retries` consecutive failures the stream ends for good. An
//! idle connection is probed with a ping after each receive timeout instead
//! of being torn down.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{EventConnection, EventSource, StreamError};
use crate::application::services::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::domain::event::{EventCodec, StreamEvent};
use crate::infrastructure::metrics;

/// Configuration for the event stream.
#[derive(Debug, Clone, PartialEq)]
pub struct EventStreamConfig {
    /// Backoff and give-up policy.
    pub reconnect: ReconnectConfig,
    /// Idle time after which the connection is pinged.
    pub recv_timeout: Duration,
    /// Buffer between the reader task and the consumer.
    pub channel_capacity: usize,
}

impl Default for EventStreamConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            recv_timeout: Duration::from_secs(30),
            channel_capacity: 1024,
        }
    }
}

/// Connection state of the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Not started yet.
    Idle,
    /// Connection attempt in progress.
    Connecting,
    /// Receiving events.
    Connected,
    /// Waiting out a backoff delay.
    Reconnecting,
    /// Stopped by shutdown or because the consumer went away.
    Stopped,
    /// Gave up after too many consecutive failures.
    GaveUp,
}

impl StreamState {
    /// Lowercase name for logs and health output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Stopped => "stopped",
            Self::GaveUp => "gave_up",
        }
    }
}

/// Live counters and state, shared with health reporting.
#[derive(Debug)]
pub struct StreamStatus {
    state: RwLock<StreamState>,
    connect_attempts: AtomicU64,
    reconnects: AtomicU64,
    events: AtomicU64,
    malformed: AtomicU64,
    pings: AtomicU64,
}

impl Default for StreamStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamStatus {
    /// Fresh status in the `Idle` state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StreamState::Idle),
            connect_attempts: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            events: AtomicU64::new(0),
            malformed: AtomicU64::new(0),
            pings: AtomicU64::new(0),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> StreamState {
        *self.state.read()
    }

    /// Whether a connection is up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == StreamState::Connected
    }

    /// Total connection attempts.
    #[must_use]
    pub fn connect_attempts(&self) -> u64 {
        self.connect_attempts.load(Ordering::Relaxed)
    }

    /// Backoff delays scheduled.
    #[must_use]
    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    /// Events forwarded to the consumer.
    #[must_use]
    pub fn events(&self) -> u64 {
        self.events.load(Ordering::Relaxed)
    }

    /// Messages skipped because they did not decode.
    #[must_use]
    pub fn malformed(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
    }

    /// Idle pings sent.
    #[must_use]
    pub fn pings(&self) -> u64 {
        self.pings.load(Ordering::Relaxed)
    }

    fn set_state(&self, state: StreamState) {
        *self.state.write() = state;
        metrics::set_stream_connected(state == StreamState::Connected);
    }
}

/// Why the stream ended. None of these is an error for the consumer: the
/// stream simply has no more data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamTermination {
    /// Shutdown was requested.
    Shutdown,
    /// Consecutive failures reached the retry limit.
    GaveUp {
        /// Consecutive failed attempts.
        attempts: u32,
        /// The failure that ended the stream.
        last_error: String,
    },
    /// The receiving side was dropped.
    ConsumerGone,
}

enum PumpExit {
    Shutdown,
    ConsumerGone,
    Lost(StreamError),
}

/// Reconnecting reader over an [`EventSource`].
pub struct ResilientEventStream<S> {
    source: S,
    config: EventStreamConfig,
    codec: EventCodec,
    shutdown: CancellationToken,
    status: Arc<StreamStatus>,
}

impl<S: EventSource> ResilientEventStream<S> {
    /// Create a stream over `source`, stopped by `shutdown`.
    #[must_use]
    pub fn new(source: S, config: EventStreamConfig, shutdown: CancellationToken) -> Self {
        Self {
            source,
            config,
            codec: EventCodec::new(),
            shutdown,
            status: Arc::new(StreamStatus::new()),
        }
    }

    /// Token that stops this stream alone.
    ///
    /// Cancelling it leaves the shutdown token passed to [`Self::new`]
    /// untouched; cancelling that one still stops the stream.
    pub fn stop_token(&mut self) -> CancellationToken {
        self.shutdown = self.shutdown.child_token();
        self.shutdown.clone()
    }

    /// Shared status handle.
    #[must_use]
    pub fn status(&self) -> Arc<StreamStatus> {
        Arc::clone(&self.status)
    }

    /// Read until shutdown, give-up or the consumer drops `tx`.
    pub async fn run(self, tx: mpsc::Sender<StreamEvent>) -> StreamTermination {
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());
        let endpoint = self.source.endpoint();

        let termination = loop {
            if self.shutdown.is_cancelled() {
                break StreamTermination::Shutdown;
            }

            self.status.set_state(StreamState::Connecting);
            self.status.connect_attempts.fetch_add(1, Ordering::Relaxed);
            tracing::info!(%endpoint, "Connecting to event source");

            let connected = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break StreamTermination::Shutdown,
                connected = self.source.connect() => connected,
            };

            let error = match connected {
                Ok(connection) => {
                    policy.reset();
                    self.status.set_state(StreamState::Connected);
                    tracing::info!(%endpoint, "Event source connected");
                    match self.pump(connection, &tx).await {
                        PumpExit::Shutdown => break StreamTermination::Shutdown,
                        PumpExit::ConsumerGone => break StreamTermination::ConsumerGone,
                        PumpExit::Lost(e) => e,
                    }
                }
                Err(e) => e,
            };

            let Some(delay) = policy.next_delay() else {
                tracing::error!(
                    %endpoint,
                    attempts = policy.retry_count(),
                    error = %error,
                    "Giving up on event source"
                );
                self.status.set_state(StreamState::GaveUp);
                return StreamTermination::GaveUp {
                    attempts: policy.retry_count(),
                    last_error: error.to_string(),
                };
            };

            self.status.set_state(StreamState::Reconnecting);
            self.status.reconnects.fetch_add(1, Ordering::Relaxed);
            metrics::record_reconnect();
            tracing::warn!(
                %endpoint,
                attempt = policy.retry_count(),
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "Event source lost, reconnecting"
            );

            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break StreamTermination::Shutdown,
                () = tokio::time::sleep(delay) => {}
            }
        };

        self.status.set_state(StreamState::Stopped);
        tracing::info!(%endpoint, ?termination, "Event stream stopped");
        termination
    }

    /// Run on a background task and expose the events as a stream.
    pub fn spawn(self) -> (ReceiverStream<StreamEvent>, JoinHandle<StreamTermination>)
    where
        S: 'static,
    {
        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let join = tokio::spawn(self.run(tx));
        (ReceiverStream::new(rx), join)
    }

    async fn pump(
        &self,
        mut connection: S::Connection,
        tx: &mpsc::Sender<StreamEvent>,
    ) -> PumpExit {
        let exit = loop {
            let received = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break PumpExit::Shutdown,
                received = tokio::time::timeout(self.config.recv_timeout, connection.recv()) => received,
            };

            let text = match received {
                Err(_idle) => {
                    tracing::debug!("No message within receive timeout, pinging");
                    self.status.pings.fetch_add(1, Ordering::Relaxed);
                    if let Err(e) = connection.ping().await {
                        break PumpExit::Lost(e);
                    }
                    continue;
                }
                Ok(None) => break PumpExit::Lost(StreamError::ConnectionClosed),
                Ok(Some(Err(e))) => break PumpExit::Lost(e),
                Ok(Some(Ok(text))) => text,
            };

            let events = match self.codec.decode(&text) {
                Ok(events) => events,
                Err(e) => {
                    self.status.malformed.fetch_add(1, Ordering::Relaxed);
                    metrics::record_malformed_message();
                    tracing::warn!(error = %e, len = text.len(), "Skipping malformed message");
                    continue;
                }
            };

            for event in events {
                let sent = tokio::select! {
                    biased;
                    () = self.shutdown.cancelled() => None,
                    sent = tx.send(event) => Some(sent),
                };
                match sent {
                    None => break,
                    Some(Err(_)) => return PumpExit::ConsumerGone,
                    Some(Ok(())) => {
                        self.status.events.fetch_add(1, Ordering::Relaxed);
                        metrics::record_event_received();
                    }
                }
            }
        };

        connection.close().await;
        exit
    }
}
