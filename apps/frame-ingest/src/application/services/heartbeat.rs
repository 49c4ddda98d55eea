//! Heartbeat Supervisor
//!
//! One cooperative task per handle renews the handle's TTL on a fixed
//! interval. A failed renewal means the handle is gone: the supervisor
//! untracks it and exits without retrying.
//!
//! Cancellation is observed while waiting for the next tick or for a call
//! slot. A renewal already sent runs to completion; the client's shutdown
//! grace period bounds how long that may take.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::application::ports::RemoteEngine;
use crate::application::services::gate::CallGate;
use crate::application::services::handles::ActiveHandleSet;
use crate::domain::handle::RemoteHandle;
use crate::infrastructure::metrics;

/// Lifecycle of a heartbeat task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatState {
    /// Renewing on schedule.
    Running,
    /// Stopped by shutdown or an explicit cancel.
    Cancelled,
    /// Stopped because a renewal failed.
    HandleLost,
}

/// Why a supervisor loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatExit {
    /// Cancellation was observed.
    Cancelled,
    /// The engine no longer has the handle.
    HandleLost,
}

impl From<HeartbeatExit> for HeartbeatState {
    fn from(exit: HeartbeatExit) -> Self {
        match exit {
            HeartbeatExit::Cancelled => Self::Cancelled,
            HeartbeatExit::HandleLost => Self::HandleLost,
        }
    }
}

/// State shared between a supervisor and its [`HeartbeatTask`].
#[derive(Debug)]
pub struct HeartbeatStatus {
    state: RwLock<HeartbeatState>,
    last_renewed: RwLock<Option<Instant>>,
    renewals: AtomicU64,
}

impl Default for HeartbeatStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl HeartbeatStatus {
    /// Fresh status in the `Running` state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(HeartbeatState::Running),
            last_renewed: RwLock::new(None),
            renewals: AtomicU64::new(0),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> HeartbeatState {
        *self.state.read()
    }

    /// Successful renewals so far.
    #[must_use]
    pub fn renewals(&self) -> u64 {
        self.renewals.load(Ordering::SeqCst)
    }

    /// Time since the last successful renewal, if any.
    #[must_use]
    pub fn since_last_renewal(&self) -> Option<Duration> {
        self.last_renewed.read().map(|at| at.elapsed())
    }

    fn record_renewal(&self) {
        *self.last_renewed.write() = Some(Instant::now());
        self.renewals.fetch_add(1, Ordering::SeqCst);
    }

    fn finish(&self, exit: HeartbeatExit) {
        *self.state.write() = exit.into();
    }
}

/// Caller-side reference to a running heartbeat.
#[derive(Debug, Clone)]
pub struct HeartbeatTask {
    handle: RemoteHandle,
    cancel: CancellationToken,
    status: Arc<HeartbeatStatus>,
}

impl HeartbeatTask {
    /// Handle being kept alive.
    #[must_use]
    pub const fn handle(&self) -> &RemoteHandle {
        &self.handle
    }

    /// Stop renewing. The loop exits at its next suspension point.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> HeartbeatState {
        self.status.state()
    }

    /// Whether the loop has not terminated yet.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == HeartbeatState::Running
    }

    /// Shared status.
    #[must_use]
    pub fn status(&self) -> &HeartbeatStatus {
        &self.status
    }
}

/// Renewal loop for one handle.
pub struct HeartbeatSupervisor {
    handle: RemoteHandle,
    interval: Duration,
    engine: Arc<dyn RemoteEngine>,
    gate: Arc<CallGate>,
    active: Arc<ActiveHandleSet>,
    cancel: CancellationToken,
    status: Arc<HeartbeatStatus>,
}

impl HeartbeatSupervisor {
    /// Create a supervisor and the task reference handed to callers.
    #[must_use]
    pub fn new(
        handle: RemoteHandle,
        interval: Duration,
        engine: Arc<dyn RemoteEngine>,
        gate: Arc<CallGate>,
        active: Arc<ActiveHandleSet>,
        cancel: CancellationToken,
    ) -> (Self, HeartbeatTask) {
        let status = Arc::new(HeartbeatStatus::new());
        let task = HeartbeatTask {
            handle: handle.clone(),
            cancel: cancel.clone(),
            status: Arc::clone(&status),
        };
        let supervisor = Self {
            handle,
            interval,
            engine,
            gate,
            active,
            cancel,
            status,
        };
        (supervisor, task)
    }

    /// Run until cancelled or the handle is lost.
    ///
    /// Cancellation is observed while sleeping, while waiting for a call
    /// slot and while a renewal is in flight; a cancelled renewal is dropped
    /// before it resolves.
    pub async fn run(self) -> HeartbeatExit {
        let exit = self.renew_until_stopped().await;
        self.status.finish(exit);
        exit
    }

    async fn renew_until_stopped(&self) -> HeartbeatExit {
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return HeartbeatExit::Cancelled,
                () = tokio::time::sleep(self.interval) => {}
            }

            let pass = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return HeartbeatExit::Cancelled,
                pass = self.gate.enter() => pass,
            };
            let renewed = match pass {
                Ok(_pass) => self.engine.heartbeat(&self.handle).await,
                Err(e) => Err(e),
            };

            match renewed {
                Ok(true) => {
                    self.status.record_renewal();
                    tracing::trace!(handle = %self.handle, "Handle renewed");
                }
                Ok(false) => {
                    tracing::warn!(handle = %self.handle, "Heartbeat failed: handle no longer alive");
                    return self.lose_handle();
                }
                Err(e) => {
                    tracing::warn!(handle = %self.handle, error = %e, "Heartbeat failed");
                    return self.lose_handle();
                }
            }
        }
    }

    fn lose_handle(&self) -> HeartbeatExit {
        self.active.remove(&self.handle);
        metrics::record_handle_lost();
        HeartbeatExit::HandleLost
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{ClientError, MockRemoteEngine};

    fn supervisor(
        engine: MockRemoteEngine,
        active: &Arc<ActiveHandleSet>,
    ) -> (HeartbeatSupervisor, HeartbeatTask) {
        HeartbeatSupervisor::new(
            RemoteHandle::new("h1"),
            Duration::from_secs(60),
            Arc::new(engine),
            Arc::new(CallGate::new(4)),
            Arc::clone(active),
            CancellationToken::new(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn renews_until_cancelled() {
        let mut engine = MockRemoteEngine::new();
        engine.expect_heartbeat().times(3).returning(|_| Ok(true));

        let active = Arc::new(ActiveHandleSet::new());
        active.insert(RemoteHandle::new("h1"));
        let (supervisor, task) = supervisor(engine, &active);
        let join = tokio::spawn(supervisor.run());

        tokio::time::sleep(Duration::from_secs(190)).await;
        assert_eq!(task.status().renewals(), 3);
        assert!(task.is_running());

        task.cancel();
        assert_eq!(join.await.unwrap(), HeartbeatExit::Cancelled);
        assert_eq!(task.state(), HeartbeatState::Cancelled);
        assert!(active.contains(&RemoteHandle::new("h1")));
    }

    #[tokio::test(start_paused = true)]
    async fn dead_handle_is_untracked() {
        let mut engine = MockRemoteEngine::new();
        engine.expect_heartbeat().times(1).returning(|_| Ok(false));

        let active = Arc::new(ActiveHandleSet::new());
        active.insert(RemoteHandle::new("h1"));
        let (supervisor, task) = supervisor(engine, &active);

        assert_eq!(supervisor.run().await, HeartbeatExit::HandleLost);
        assert_eq!(task.state(), HeartbeatState::HandleLost);
        assert!(active.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_renewal_is_not_retried() {
        let mut engine = MockRemoteEngine::new();
        engine
            .expect_heartbeat()
            .times(1)
            .returning(|h| Err(ClientError::HandleExpired(h.to_string())));

        let active = Arc::new(ActiveHandleSet::new());
        active.insert(RemoteHandle::new("h1"));
        let (supervisor, _task) = supervisor(engine, &active);

        assert_eq!(supervisor.run().await, HeartbeatExit::HandleLost);
        assert!(active.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_before_first_tick_makes_no_call() {
        let mut engine = MockRemoteEngine::new();
        engine.expect_heartbeat().never();

        let active = Arc::new(ActiveHandleSet::new());
        let (supervisor, task) = supervisor(engine, &active);
        task.cancel();

        assert_eq!(supervisor.run().await, HeartbeatExit::Cancelled);
    }
}
