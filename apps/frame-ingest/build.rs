//! Build Script for Frame Ingest
//!
//! Generates the `frame.v1` prost messages and tonic client from
//! `proto/frame/v1/dataframe.proto`.
//!
//! # Panics Policy
//!
//! Build scripts panic on failure: there is no caller to return an error to,
//! and a missing `protoc` or a broken proto file must stop the build.
#![allow(clippy::expect_used)]

use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let proto_root = manifest_dir.join("proto");
    let proto_files = [proto_root.join("frame/v1/dataframe.proto")];

    for proto in &proto_files {
        println!("cargo:rerun-if-changed={}", proto.display());
    }

    // The engine is an external service; only the client side is needed.
    tonic_prost_build::configure()
        .build_client(true)
        .build_server(false)
        .compile_protos(&proto_files, &[proto_root])
        .expect("Failed to compile protobuf definitions; is protoc installed?");
}
