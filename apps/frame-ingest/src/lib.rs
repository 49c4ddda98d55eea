#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::cast_precision_loss
    )
)]

//! Frame Ingest - Remote DataFrame Client and Stream Ingestion
//!
//! A client for a remote columnar engine that addresses datasets by opaque
//! handles, plus a resilient ingestion loop that feeds it from a WebSocket
//! event stream.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure types with no I/O
//!   - `outcome`: `Outcome`/`Maybe` and the fallible-map extension
//!   - `handle`: opaque remote dataset references
//!   - `event`: stream events and their JSON codec
//!   - `window`: rolling window statistics, per-series aggregation
//!   - `columnar`: Arrow record batches and IPC encoding
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: `RemoteEngine` and `EventSource` seams
//!   - `services`: bounded-concurrency client, heartbeats, reconnecting
//!     event stream, ingestion pipeline
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `engine`: gRPC transport to the remote engine
//!   - `websocket`: event source over `tokio-tungstenite`
//!   - `config`: validated configuration
//!   - `health`, `metrics`, `telemetry`: observability
//!
//! # Data Flow
//!
//! ```text
//! WebSocket ──► ResilientEventStream ──► IngestPipeline ──► DatasetClient ──► engine
//!                 (reconnect, ping)       (window, batch)    (gate, handles,
//!                                                             heartbeats)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::columnar::RecordBatchSet;
pub use domain::event::{EventCodec, EventCodecError, StreamEvent};
pub use domain::handle::RemoteHandle;
pub use domain::outcome::{Maybe, Outcome, OutcomeExt};
pub use domain::window::{RollingWindowAggregator, SeriesAggregators, SeriesUpdate, WindowStats};

// Ports
pub use application::ports::{
    ChunkStream, ClientError, EventConnection, EventSource, RemoteEngine, StreamError,
};

// Services
pub use application::services::{
    ClientOptions, CloseReport, DatasetClient, EventStreamConfig, FlushReceipt, IngestPipeline,
    PipelineConfig, PipelineCounters, PipelineError, PipelineReport, ReconnectConfig,
    ReconnectPolicy, ResilientEventStream, ScopedHandle, StreamState, StreamStatus,
    StreamTermination,
};

// Infrastructure config
pub use infrastructure::config::{
    ClientConfig, ConfigError, IngestConfig, PipelineSettings, ServerSettings, StreamSettings,
};

// Adapters
pub use infrastructure::engine::GrpcEngine;
pub use infrastructure::websocket::{WebSocketConnection, WebSocketSource};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
