//! Configuration Module
//!
//! Explicit, validated configuration for the client, the event stream and
//! the ingestion pipeline.

mod settings;

pub use settings::{
    ClientConfig, ConfigError, ENV_PREFIX, IngestConfig, PipelineSettings, ServerSettings,
    StreamSettings, parse_size,
};
