//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the client, heartbeat, event stream and pipeline
//! services, and the port interfaces they drive.

/// Port interfaces for external systems (remote engine, event source).
pub mod ports;

/// Application services: client lifecycle, keep-alive, streaming, ingestion.
pub mod services;
