//! Application Services
//!
//! - `client`: bounded-concurrency access to the remote engine, handle
//!   tracking and graceful shutdown
//! - `heartbeat`: per-handle keep-alive supervisor
//! - `event_stream`: reconnecting event stream with idle pings
//! - `pipeline`: stream-to-engine ingestion loop with batched flushes

pub mod client;
pub mod default_client;
pub mod event_stream;
pub mod gate;
pub mod handles;
pub mod heartbeat;
pub mod pipeline;
pub mod reconnect;
pub mod scoped;

pub use client::{ClientOptions, CloseReport, DatasetClient};
pub use event_stream::{EventStreamConfig, ResilientEventStream, StreamState, StreamStatus, StreamTermination};
pub use heartbeat::{HeartbeatExit, HeartbeatState, HeartbeatStatus, HeartbeatTask};
pub use pipeline::{FlushReceipt, IngestPipeline, PipelineConfig, PipelineCounters, PipelineError, PipelineReport};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use scoped::ScopedHandle;
