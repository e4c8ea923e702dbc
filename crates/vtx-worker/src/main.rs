//! Video-to-document worker binary.

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vtx_media::{check_ffmpeg, check_ffprobe, FfmpegFrameSource};
use vtx_queue::RedisJobQueue;
use vtx_storage::BlobStateStore;
use vtx_worker::{metrics, JobExecutor, Orchestrator, PipelineDeps, WorkerConfig};

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,vtx_worker=info,vtx_storage=info,vtx_media=info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting vtx-worker");

    let config = WorkerConfig::from_env();
    if let Err(e) = config.validate() {
        error!("{}", e);
        std::process::exit(1);
    }
    info!("Worker config: {:?}", config);

    if let Some(port) = config.metrics_port {
        match metrics::install_exporter(port) {
            Ok(()) => info!("Prometheus exporter listening on port {}", port),
            Err(e) => warn!("Failed to install Prometheus exporter: {}", e),
        }
    }

    if let Err(e) = check_ffmpeg().and_then(|_| check_ffprobe()) {
        error!("Media tools unavailable: {}", e);
        std::process::exit(1);
    }

    let blobs = match config.storage.open() {
        Ok(blobs) => blobs,
        Err(e) => {
            error!("Failed to open blob store: {}", e);
            std::process::exit(1);
        }
    };
    let state = Arc::new(BlobStateStore::new(blobs.clone()));

    let queue = match RedisJobQueue::from_env() {
        Ok(q) => q,
        Err(e) => {
            error!("Failed to create job queue: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = queue.init().await {
        error!("Failed to initialize job queue: {}", e);
        std::process::exit(1);
    }

    let orchestrator = Arc::new(Orchestrator::new(
        PipelineDeps {
            jobs: state.clone(),
            checkpoints: state,
            blobs,
            frames: Arc::new(FfmpegFrameSource::new()),
        },
        config.pipeline.clone(),
        config.worker_id.clone(),
    ));

    let executor = JobExecutor::new(config, Arc::new(queue), orchestrator);

    // Stop consuming on Ctrl-C or SIGTERM
    let shutdown = executor.shutdown_token();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Received shutdown signal");
        shutdown.cancel();
    });

    if let Err(e) = executor.run().await {
        error!("Executor error: {}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(_) => {
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    tokio::signal::ctrl_c().await.ok();
}
