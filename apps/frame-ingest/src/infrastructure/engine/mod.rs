//! Remote Engine Adapter
//!
//! gRPC transport for the [`RemoteEngine`](crate::application::ports::RemoteEngine)
//! port: `frame.v1` wire messages, a pooled tonic client and status mapping.

/// `frame.v1` messages and client generated from `proto/frame/v1/dataframe.proto`.
#[allow(
    missing_docs,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::unwrap_used,
    clippy::expect_used
)]
pub mod proto {
    include!(concat!(env!("OUT_DIR"), "/frame.v1.rs"));
}

mod grpc;

pub use grpc::GrpcEngine;
