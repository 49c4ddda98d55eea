//! Domain Layer - Core types with no I/O.
//!
//! Everything here is synchronous and transport-agnostic: the value
//! vocabulary shared by the client, the event stream and the pipeline.

/// Success/failure and presence/absence vocabulary.
pub mod outcome;

/// Opaque references to datasets owned by the remote engine.
pub mod handle;

/// Inbound stream events and their JSON codec.
pub mod event;

/// Rolling window statistics over stream events.
pub mod window;

/// Columnar result sets and Arrow IPC encoding.
pub mod columnar;
