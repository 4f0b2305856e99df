//! Monolith Binary - Local deployment of the processing pipeline
//!
//! It wires up:
//! - Local adapters (filesystem store, Redis repository, event hub)
//! - FFmpeg CLI transcoder
//! - HTTP inbound adapter (uploads, SSE progress, processed files)
//! - Background resumption of videos left incomplete by a previous run

use axum::Router;
use capsule_media::adapters::ffmpeg::FfmpegTranscoder;
use capsule_media::adapters::local::http::{self, HttpState};
use capsule_media::adapters::local::{EventHub, FsMediaStore, RedisPool, RedisRepository};
use capsule_media::application::registry::InFlightJobs;
use capsule_media::config::LocalConfig;
use capsule_media::domain::jobs::Namespace;
use capsule_media::{ProcessingSettings, VideoProcessingService};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let config = LocalConfig::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let namespace = match Namespace::parse(&config.namespace) {
        Ok(ns) => ns,
        Err(e) => {
            error!("Invalid PIPELINE_NAMESPACE: {}", e);
            std::process::exit(1);
        }
    };

    // 1. Adapters (Local implementations)
    let transcoder = FfmpegTranscoder::new(
        &config.pipeline.ffmpeg_path,
        &config.pipeline.ffprobe_path,
        config.pipeline.encoder.clone(),
    );
    match transcoder.check_tools() {
        Ok((ffmpeg, ffprobe)) => info!(
            ffmpeg = %ffmpeg.display(),
            ffprobe = %ffprobe.display(),
            "Found FFmpeg tools"
        ),
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    }

    let redis_pool = match RedisPool::new(&config.redis_url) {
        Ok(pool) => pool,
        Err(e) => {
            error!("Failed to create Redis pool: {}", e);
            std::process::exit(1);
        }
    };
    let repository = RedisRepository::new(redis_pool, namespace.clone());
    let store = FsMediaStore::new(&config.pipeline.work_dir, &config.pipeline.objects_dir);
    let hub = Arc::new(EventHub::default());

    // 2. Application Services
    let service = Arc::new(VideoProcessingService::new(
        store,
        transcoder,
        repository,
        hub.clone(),
        ProcessingSettings::from(&config.pipeline),
    ));
    let in_flight = InFlightJobs::new();
    let shutdown = CancellationToken::new();

    // 3. Leftovers of earlier runs, then resumption
    match service
        .reconciler()
        .purge_orphans(&namespace, &in_flight, config.pipeline.orphan_min_age)
        .await
    {
        Ok(report) if !report.removed.is_empty() => {
            info!(removed = report.removed.len(), "Purged orphaned artifacts")
        }
        Ok(_) => {}
        Err(e) => warn!("Failed to purge orphaned artifacts: {}", e),
    }
    let resumption = service.resume_incomplete(namespace.clone(), in_flight.clone(), shutdown.clone());

    // 4. HTTP Layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let state = HttpState {
        service,
        hub,
        in_flight: in_flight.clone(),
        namespace,
        shutdown: shutdown.clone(),
    };
    let app = Router::new().merge(http::router(state)).layer(cors);

    // 5. Start Server
    let listener = match tokio::net::TcpListener::bind(format!("{}:{}", config.addr, config.port)).await
    {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind TCP listener: {}", e);
            std::process::exit(1);
        }
    };
    info!("Listening at {}:{}", config.addr, config.port);

    let signal_token = shutdown.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl-C: {}", e);
            }
            // Aborted jobs stay incomplete and resume on the next start
            let cancelled = in_flight.cancel_all();
            info!(cancelled, "Shutting down");
            signal_token.cancel();
        })
        .await;
    if let Err(e) = served {
        error!("Server error: {}", e);
    }

    shutdown.cancel();
    match resumption.await {
        Ok(report) => info!(
            completed = report.completed.len(),
            aborted = report.aborted.len(),
            "Resumption task finished"
        ),
        Err(e) => warn!("Resumption task failed: {}", e),
    }
}
