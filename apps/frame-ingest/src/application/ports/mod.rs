//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following the
//! Hexagonal Architecture pattern. Infrastructure adapters implement them;
//! tests substitute in-memory fakes.
//!
//! ## Driven Ports (Outbound)
//!
//! - `RemoteEngine`: per-call contract of the remote columnar engine
//! - `EventSource`: push-based event feed with liveness probing

mod engine;
mod event_source;

pub use engine::{ChunkStream, ClientError, RemoteEngine};
pub use event_source::{EventConnection, EventSource, StreamError};

#[cfg(test)]
pub use engine::MockRemoteEngine;
