//! Event Stream Integration Tests
//!
//! Reconnect timing, give-up behaviour and idle pings with a scripted
//! source under paused time.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use frame_ingest::{
    EventConnection, EventSource, EventStreamConfig, ReconnectConfig, ResilientEventStream,
    StreamError, StreamState, StreamTermination,
};

/// What one connection does once established.
#[derive(Clone)]
enum Script {
    /// Deliver these messages, then report the peer closed.
    Deliver(Vec<&'static str>),
    /// Stay silent until shut down.
    Silent,
}

/// Source that refuses the first `failures` connects, then plays scripts.
struct FlakySource {
    failures: AtomicUsize,
    scripts: Mutex<VecDeque<Script>>,
    attempts: Mutex<Vec<Instant>>,
    pings: Arc<AtomicUsize>,
}

impl FlakySource {
    fn new(failures: usize, scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            failures: AtomicUsize::new(failures),
            scripts: Mutex::new(scripts.into()),
            attempts: Mutex::new(Vec::new()),
            pings: Arc::new(AtomicUsize::new(0)),
        })
    }

    fn gaps(&self) -> Vec<Duration> {
        self.attempts
            .lock()
            .windows(2)
            .map(|w| w[1] - w[0])
            .collect()
    }
}

struct Shared(Arc<FlakySource>);

#[async_trait]
impl EventSource for Shared {
    type Connection = ScriptedConnection;

    async fn connect(&self) -> Result<Self::Connection, StreamError> {
        self.0.attempts.lock().push(Instant::now());
        let remaining = self.0.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.0.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(StreamError::Connect("connection refused".into()));
        }
        let script = self
            .0
            .scripts
            .lock()
            .pop_front()
            .unwrap_or(Script::Silent);
        Ok(ScriptedConnection {
            script,
            pings: Arc::clone(&self.0.pings),
        })
    }

    fn endpoint(&self) -> String {
        "scripted://flaky".to_string()
    }
}

struct ScriptedConnection {
    script: Script,
    pings: Arc<AtomicUsize>,
}

#[async_trait]
impl EventConnection for ScriptedConnection {
    async fn recv(&mut self) -> Option<Result<String, StreamError>> {
        match &mut self.script {
            Script::Deliver(messages) if messages.is_empty() => None,
            Script::Deliver(messages) => Some(Ok(messages.remove(0).to_string())),
            Script::Silent => std::future::pending().await,
        }
    }

    async fn ping(&mut self) -> Result<(), StreamError> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn config(max_retries: u32) -> EventStreamConfig {
    EventStreamConfig {
        reconnect: ReconnectConfig::new(Duration::from_secs(1), Duration::from_secs(60), max_retries),
        recv_timeout: Duration::from_secs(30),
        ..EventStreamConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn backoff_doubles_and_success_resets_it() {
    let source = FlakySource::new(
        3,
        vec![Script::Deliver(vec![r#"{"timestamp":1,"price":1,"volume":1}"#])],
    );
    let shutdown = CancellationToken::new();
    let stream = ResilientEventStream::new(Shared(Arc::clone(&source)), config(10), shutdown.clone());
    let status = stream.status();
    let (mut events, join) = stream.spawn();

    let first = events.next().await.unwrap();
    assert_eq!(first.timestamp, 1);
    assert_eq!(status.connect_attempts(), 4);

    // The delivering connection closes, so the stream waits the first
    // backoff step again and then sits on a silent connection.
    tokio::time::sleep(Duration::from_secs(3)).await;
    shutdown.cancel();
    assert_eq!(join.await.unwrap(), StreamTermination::Shutdown);

    assert_eq!(
        source.gaps(),
        vec![
            Duration::from_secs(2),
            Duration::from_secs(4),
            Duration::from_secs(8),
            Duration::from_secs(2),
        ]
    );
    assert_eq!(status.state(), StreamState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn gives_up_after_max_retries_without_output() {
    let source = FlakySource::new(usize::MAX, Vec::new());
    let stream = ResilientEventStream::new(
        Shared(Arc::clone(&source)),
        config(3),
        CancellationToken::new(),
    );
    let status = stream.status();
    let (events, join) = stream.spawn();

    let received: Vec<_> = events.collect().await;
    assert!(received.is_empty());

    match join.await.unwrap() {
        StreamTermination::GaveUp { attempts, last_error } => {
            assert_eq!(attempts, 3);
            assert!(last_error.contains("connection refused"));
        }
        other => panic!("unexpected termination: {other:?}"),
    }
    assert_eq!(source.attempts.lock().len(), 3);
    assert_eq!(
        source.gaps(),
        vec![Duration::from_secs(2), Duration::from_secs(4)]
    );
    assert_eq!(status.state(), StreamState::GaveUp);
}

#[tokio::test(start_paused = true)]
async fn idle_connection_is_pinged_not_torn_down() {
    let source = FlakySource::new(0, vec![Script::Silent]);
    let shutdown = CancellationToken::new();
    let stream = ResilientEventStream::new(Shared(Arc::clone(&source)), config(3), shutdown.clone());
    let status = stream.status();
    let (_events, join) = stream.spawn();

    tokio::time::sleep(Duration::from_secs(95)).await;
    assert_eq!(source.pings.load(Ordering::SeqCst), 3);
    assert_eq!(status.connect_attempts(), 1);
    assert!(status.is_connected());

    shutdown.cancel();
    assert_eq!(join.await.unwrap(), StreamTermination::Shutdown);
}

#[tokio::test(start_paused = true)]
async fn malformed_messages_are_skipped_in_order() {
    let source = FlakySource::new(
        0,
        vec![Script::Deliver(vec![
            r#"{"timestamp":1,"price":1,"volume":1}"#,
            "not json",
            r#"[{"timestamp":2,"price":2,"volume":1},{"timestamp":3,"price":3,"volume":1}]"#,
        ])],
    );
    let shutdown = CancellationToken::new();
    let stream = ResilientEventStream::new(Shared(Arc::clone(&source)), config(3), shutdown.clone());
    let status = stream.status();
    let (events, join) = stream.spawn();

    let timestamps: Vec<i64> = events.take(3).map(|e| e.timestamp).collect().await;
    assert_eq!(timestamps, vec![1, 2, 3]);
    assert_eq!(status.malformed(), 1);

    shutdown.cancel();
    join.await.unwrap();
}
