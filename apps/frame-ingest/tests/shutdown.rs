//! Shutdown and Keep-Alive Integration Tests
//!
//! Heartbeat renewal, handle loss and the close sequence.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use frame_ingest::application::services::HeartbeatState;
use frame_ingest::{ClientError, ClientOptions, RemoteHandle, StreamEvent};

use common::{InMemoryEngine, client};

fn events(n: i64) -> Vec<StreamEvent> {
    (0..n).map(|i| StreamEvent::new(i, 1.0, 1.0)).collect()
}

#[tokio::test]
async fn close_releases_every_tracked_handle_and_disconnects() {
    let engine = Arc::new(InMemoryEngine::new());
    let client = client(&engine, ClientOptions::default());

    for i in 0..5 {
        client.read_remote(&format!("{i}.parquet"), &[]).await.unwrap();
    }
    let report = client.close().await;

    assert_eq!(report.handles_dropped, 5);
    assert_eq!(report.drop_failures, 0);
    assert_eq!(engine.dataset_count(), 0);
    assert!(engine.is_disconnected());
    assert!(client.active_handles().is_empty());
    assert!(client.is_closed());
}

#[tokio::test]
async fn operations_after_close_fail_and_second_close_is_a_no_op() {
    let engine = Arc::new(InMemoryEngine::new());
    let client = client(&engine, ClientOptions::default());
    client.read_remote("a.parquet", &[]).await.unwrap();

    client.close().await;
    let calls = engine.calls();

    assert!(matches!(
        client.read_remote("b.parquet", &[]).await,
        Err(ClientError::Closed)
    ));
    assert!(matches!(
        client.persist_batch(&events(1)).await,
        Err(ClientError::Closed)
    ));
    assert_eq!(client.close().await, Default::default());
    assert_eq!(engine.calls(), calls);
}

#[tokio::test(start_paused = true)]
async fn dataset_created_during_close_is_released_not_leaked() {
    let engine = Arc::new(InMemoryEngine::new());
    engine.set_delay("late.parquet", Duration::from_secs(1));
    let client = client(&engine, ClientOptions::default());

    let read = tokio::spawn({
        let client = Arc::clone(&client);
        async move { client.read_remote("late.parquet", &[]).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    let report = client.close().await;
    assert_eq!(report.handles_dropped, 0);

    assert!(matches!(read.await.unwrap(), Err(ClientError::Closed)));
    assert!(client.active_handles().is_empty());
    assert_eq!(engine.dropped().len(), 1);
    assert_eq!(engine.dataset_count(), 0);
}

#[tokio::test]
async fn handles_expired_on_the_server_count_as_drop_failures() {
    let engine = Arc::new(InMemoryEngine::new());
    let client = client(&engine, ClientOptions::default());

    let kept = client.read_remote("kept.parquet", &[]).await.unwrap();
    let gone = client.read_remote("gone.parquet", &[]).await.unwrap();
    engine.expire(&gone);

    let report = client.close().await;
    assert_eq!(report.handles_dropped, 1);
    assert_eq!(report.drop_failures, 1);
    assert!(engine.dropped().contains(&kept));
}

#[tokio::test(start_paused = true)]
async fn heartbeat_renews_until_close() {
    let engine = Arc::new(InMemoryEngine::new());
    let client = client(&engine, ClientOptions::default());
    let handle = client.persist_batch(&events(3)).await.unwrap();

    let task = client
        .start_heartbeat(&handle, Duration::from_secs(1))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(3500)).await;

    assert_eq!(engine.heartbeats(), 3);
    assert_eq!(task.status().renewals(), 3);
    assert!(task.is_running());

    let report = client.close().await;
    assert_eq!(report.heartbeats_stopped, 1);
    assert_eq!(report.heartbeats_aborted, 0);
    assert_eq!(task.state(), HeartbeatState::Cancelled);
    assert_eq!(report.handles_dropped, 1);
}

#[tokio::test(start_paused = true)]
async fn lost_handle_stops_its_heartbeat_and_is_untracked() {
    let engine = Arc::new(InMemoryEngine::new());
    let client = client(&engine, ClientOptions::default());
    let handle = client.persist_batch(&events(2)).await.unwrap();

    let task = client
        .start_heartbeat(&handle, Duration::from_secs(1))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    engine.expire(&handle);
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(task.state(), HeartbeatState::HandleLost);
    assert!(!client.is_tracked(&handle));

    let report = client.close().await;
    assert_eq!(report.handles_dropped, 0);
    assert_eq!(report.drop_failures, 0);
}

#[tokio::test]
async fn scoped_body_failure_still_releases_the_handle() {
    let engine = Arc::new(InMemoryEngine::new());
    let client = client(&engine, ClientOptions::default());
    let handle = client.read_remote("scoped.parquet", &[]).await.unwrap();

    let result: Result<(), ClientError> = client
        .with_scoped(handle.clone(), |_| async {
            Err(ClientError::Remote("body failed".into()))
        })
        .await;

    assert!(matches!(result, Err(ClientError::Remote(_))));
    assert!(!client.is_tracked(&handle));
    assert_eq!(engine.dropped(), vec![handle]);
}

#[tokio::test]
async fn scoped_release_returns_the_body_value() {
    let engine = Arc::new(InMemoryEngine::new());
    let client = client(&engine, ClientOptions::default());
    let handle = client.persist_batch(&events(4)).await.unwrap();

    let rows = client
        .with_scoped(handle, |h| {
            let client = Arc::clone(&client);
            async move { client.collect(&h).await.map(|t| t.num_rows()) }
        })
        .await
        .unwrap();

    assert_eq!(rows, 4);
    assert!(client.active_handles().is_empty());
}

#[tokio::test]
async fn untracked_handles_are_not_released_on_close() {
    let engine = Arc::new(InMemoryEngine::new());
    let foreign: RemoteHandle = engine.insert(Vec::new());
    let client = client(&engine, ClientOptions::default());

    client.close().await;
    assert!(engine.dropped().is_empty());
    assert!(engine.payload(&foreign).is_some());
}

#[tokio::test(start_paused = true)]
async fn close_aborts_a_heartbeat_stuck_in_renewal() {
    let engine = Arc::new(InMemoryEngine::new());
    let grace = Duration::from_secs(2);
    let options = ClientOptions {
        shutdown_grace: grace,
        ..ClientOptions::default()
    };
    let client = client(&engine, options);
    let handle = client.persist_batch(&events(1)).await.unwrap();

    engine.set_hang_heartbeats(true);
    client
        .start_heartbeat(&handle, Duration::from_secs(1))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(engine.heartbeats(), 1);

    let started = tokio::time::Instant::now();
    let report = client.close().await;
    let elapsed = started.elapsed();

    assert!(elapsed >= grace, "closed after {elapsed:?}");
    assert!(elapsed < grace + Duration::from_millis(10), "closed after {elapsed:?}");
    assert_eq!(report.heartbeats_aborted, 1);
    assert_eq!(report.heartbeats_stopped, 0);
    assert_eq!(report.handles_dropped, 1);
    assert!(client.active_handles().is_empty());
}
