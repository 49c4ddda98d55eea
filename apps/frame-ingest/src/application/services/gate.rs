//! Admission control for remote calls.
//!
//! A single semaphore bounds how many remote calls are in flight at once.
//! Waiting for a slot suspends the calling task, never the thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::application::ports::ClientError;
use crate::infrastructure::metrics;

/// Global cap on in-flight remote calls.
#[derive(Debug)]
pub struct CallGate {
    semaphore: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
    capacity: usize,
}

impl CallGate {
    /// Create a gate admitting at most `capacity` concurrent calls (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            capacity,
        }
    }

    /// Wait for a slot. The slot is held until the returned pass is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Closed`] if the gate has been closed.
    pub async fn enter(&self) -> Result<GatePass, ClientError> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| ClientError::Closed)?;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::set_in_flight(now);
        Ok(GatePass {
            _permit: permit,
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    /// Refuse further admissions. Passes already held stay valid.
    pub fn close(&self) {
        self.semaphore.close();
    }

    /// Calls currently holding a slot.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Configured cap.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

/// A held slot; releases on drop.
#[derive(Debug)]
pub struct GatePass {
    _permit: OwnedSemaphorePermit,
    in_flight: Arc<AtomicUsize>,
}

impl Drop for GatePass {
    fn drop(&mut self) {
        let now = self.in_flight.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        metrics::set_in_flight(now);
    }
}
