use std::sync::Arc;

use anyhow::Context;
use dotenvy::dotenv;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use backend::config::settings::AppConfig;
use backend::infrastructure::db::pool::{connect_to_db, ensure_parent_dir, run_migrations};
use backend::infrastructure::storage::local::MediaStorage;
use backend::modules::transcode::coordinator::TranscodeCoordinator;
use backend::modules::transcode::progress::{spawn_sweeper, ProgressTracker};
use backend::modules::transcode::repository::JobRepository;
use backend::state::AppState;
use backend::workers::encoder::EncodeWorker;
use backend::workers::ffmpeg::{check_ffmpeg, FfmpegEncoder};
use backend::workers::transcoder::start_transcoder_workers;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn")))
        .init();

    info!("Starting server...");

    let config = AppConfig::new();

    ensure_parent_dir(&config.database_url).context("failed to create database directory")?;
    let db = connect_to_db(&config.database_url).await.context("failed to open database")?;
    run_migrations(&db).await.context("failed to run migrations")?;

    let interrupted = JobRepository::fail_interrupted(&db).await?;
    if interrupted > 0 {
        warn!("Marked {} unfinished transcode jobs as interrupted", interrupted);
    }

    let storage = MediaStorage::new(&config.uploads_dir, &config.transcoded_dir);
    storage.init().await.context("failed to prepare media directories")?;

    match check_ffmpeg(&config.ffmpeg_path) {
        Some(path) => info!("Using ffmpeg at {}", path.display()),
        None => warn!("{} not found, transcode jobs will fail", config.ffmpeg_path),
    }

    let tracker = Arc::new(ProgressTracker::new());
    let (coordinator, queue) = TranscodeCoordinator::new(db.clone(), storage.clone(), tracker.clone(), &config.transcode);
    let coordinator = Arc::new(coordinator);

    let encoder = Arc::new(FfmpegEncoder::new(&config.ffmpeg_path, &config.ffprobe_path));
    let worker = Arc::new(EncodeWorker::new(storage.clone(), encoder, config.transcode.timeout()));
    let workers = start_transcoder_workers(coordinator.clone(), worker, queue, config.transcode.workers);
    spawn_sweeper(tracker, config.transcode.progress_grace());

    let addr = config.bind_addr();
    let state = AppState::new(config, db.clone(), storage, coordinator.clone());
    let app = backend::app::create_app(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Server running on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    coordinator.close();
    for handle in workers {
        let _ = handle.await;
    }
    db.close().await;
    info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
