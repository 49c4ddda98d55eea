//! Frame Ingest Binary
//!
//! Streams events from a WebSocket source into the remote engine.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin frame-ingest
//! ```
//!
//! # Environment Variables
//!
//! All options use the `FRAME_INGEST_` prefix; unknown keys are rejected.
//!
//! - `FRAME_INGEST_SERVER`: engine address (default: localhost:50051)
//! - `FRAME_INGEST_STREAM_URL`: event source (default: ws://127.0.0.1:8080)
//! - `FRAME_INGEST_BATCH_SIZE`: events per flush (default: 1000)
//! - `FRAME_INGEST_WINDOW_SIZE`: rolling window capacity (default: 1000)
//! - `FRAME_INGEST_SINK_DIR`: write each flushed batch to Parquet (default: unset)
//! - `FRAME_INGEST_HEALTH_PORT`: health/metrics HTTP port, 0 disables (default: 8083)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `RUST_LOG`: Log filter (default: `frame_ingest=<LOG_LEVEL>`)

use std::sync::Arc;

use anyhow::Context;
use frame_ingest::infrastructure::health::{HealthServer, HealthServerState};
use frame_ingest::infrastructure::telemetry;
use frame_ingest::{
    DatasetClient, IngestConfig, IngestPipeline, ResilientEventStream, StreamTermination,
    TelemetryConfig, WebSocketSource, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    let config = IngestConfig::from_env().context("invalid configuration")?;

    let _telemetry_guard = telemetry::init(&TelemetryConfig::from_env(&config.client.log_level))
        .context("failed to initialize telemetry")?;

    tracing::info!("Starting Frame Ingest");

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder not installed");
    }

    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let client = Arc::new(
        DatasetClient::connect(&config.client)
            .await
            .context("failed to connect to engine")?,
    );

    let stream = ResilientEventStream::new(
        WebSocketSource::new(config.stream.url.clone()),
        config.event_stream(),
        shutdown_token.clone(),
    );
    let mut pipeline = IngestPipeline::new(Arc::clone(&client), config.pipeline_config());

    if config.server.health_port != 0 {
        let health_state = Arc::new(HealthServerState::new(
            env!("CARGO_PKG_VERSION").to_string(),
            stream.status(),
            pipeline.counters(),
            Arc::clone(&client),
        ));
        let health_server = HealthServer::new(
            config.server.health_port,
            health_state,
            shutdown_token.clone(),
        );
        tokio::spawn(async move {
            if let Err(e) = health_server.run().await {
                tracing::error!(error = %e, "Health server error");
            }
        });
    }

    tokio::spawn(await_shutdown(shutdown_token.clone()));

    tracing::info!("Frame ingest ready");

    match pipeline.run_stream(stream).await {
        Ok(report) => {
            tracing::info!(
                events = report.events,
                flushes = report.flushes,
                flushed_events = report.flushed_events,
                pending = report.pending,
                "Event stream finished"
            );
            if let Some(StreamTermination::GaveUp { attempts, .. }) = report.termination {
                tracing::error!(attempts, "Event source unreachable");
            }
        }
        Err(e) => tracing::error!(error = %e, "Ingestion stopped"),
    }

    match pipeline.flush().await {
        Ok(Some(receipt)) => tracing::info!(events = receipt.events, "Final batch flushed"),
        Ok(None) => {}
        Err(e) => tracing::error!(
            error = %e,
            pending = pipeline.pending(),
            "Final flush failed"
        ),
    }

    shutdown_token.cancel();
    let report = client.close().await;
    tracing::info!(
        handles_dropped = report.handles_dropped,
        drop_failures = report.drop_failures,
        heartbeats_stopped = report.heartbeats_stopped,
        heartbeats_aborted = report.heartbeats_aborted,
        "Frame ingest stopped"
    );
    Ok(())
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &IngestConfig) {
    tracing::info!(
        server = %config.client.server,
        pool_size = config.client.pool_size,
        max_concurrent = config.client.max_concurrent,
        stream_url = %config.stream.url,
        batch_size = config.pipeline.batch_size,
        window_size = config.pipeline.window_size,
        per_symbol = config.pipeline.per_symbol,
        health_port = config.server.health_port,
        "Configuration loaded"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
        () = shutdown_token.cancelled() => return,
    }

    shutdown_token.cancel();
}
