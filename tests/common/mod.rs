#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use backend::common::error::{ServiceError, ServiceResult};
use backend::config::settings::{AppConfig, TranscodeConfig};
use backend::infrastructure::db::pool::{connect_to_db, run_migrations};
use backend::infrastructure::storage::local::MediaStorage;
use backend::modules::transcode::coordinator::TranscodeCoordinator;
use backend::modules::transcode::model::{Job, JobId, OutputFormat};
use backend::modules::transcode::progress::{ProgressReporter, ProgressTracker};
use backend::modules::video::repository::VideoRepository;
use backend::state::AppState;
use backend::workers::encoder::{EncodeTask, EncodeWorker, Encoder};
use backend::workers::transcoder::start_transcoder_workers;

/// Test double for ffmpeg.
pub enum FakeEncoder {
    /// Writes a valid artifact, reporting progress along the way.
    Succeed,
    /// Exits like a crashed encoder.
    Fail,
    /// Never finishes on its own.
    Hang,
    /// Waits for a permit on the gate before writing a valid artifact.
    Gated(Arc<Semaphore>),
}

#[async_trait]
impl Encoder for FakeEncoder {
    async fn encode(&self, task: &EncodeTask, progress: ProgressReporter) -> ServiceResult<()> {
        match self {
            FakeEncoder::Succeed => {}
            FakeEncoder::Fail => {
                progress.report(30.0).await;
                return Err(ServiceError::encode_failed("Invalid data found when processing input", Some(1)));
            }
            FakeEncoder::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            FakeEncoder::Gated(gate) => {
                progress.report(10.0).await;
                if let Ok(permit) = gate.acquire().await {
                    permit.forget();
                }
            }
        }

        for pct in [25.0, 50.0, 75.0, 100.0] {
            progress.report(pct).await;
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        write_artifact(task).await
    }
}

pub async fn write_artifact(task: &EncodeTask) -> ServiceResult<()> {
    tokio::fs::write(&task.output, b"encoded").await?;
    if task.request.format != OutputFormat::Mp4 {
        tokio::fs::write(task.output_dir().join("segment_000.ts"), b"segment").await?;
    }
    Ok(())
}

pub struct Harness {
    pub dir: TempDir,
    pub state: AppState,
    pub workers: Vec<JoinHandle<()>>,
}

impl Harness {
    pub async fn new(encoder: FakeEncoder) -> Self {
        Self::with_config(encoder, TranscodeConfig::default()).await
    }

    pub async fn with_config(encoder: FakeEncoder, transcode: TranscodeConfig) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_url = format!("sqlite://{}", dir.path().join("videos.db").display());
        let db = connect_to_db(&db_url).await.expect("db");
        run_migrations(&db).await.expect("migrations");

        let storage = MediaStorage::new(dir.path().join("videos"), dir.path().join("transcoded"));
        storage.init().await.expect("storage");

        let mut config = AppConfig::new();
        config.database_url = db_url;
        config.uploads_dir = storage.uploads_dir.clone();
        config.transcoded_dir = storage.transcoded_dir.clone();
        config.max_upload_bytes = 1024 * 1024;
        config.cors_origin = "*".to_string();
        config.transcode = transcode.clone();

        let tracker = Arc::new(ProgressTracker::new());
        let (coordinator, queue) = TranscodeCoordinator::new(db.clone(), storage.clone(), tracker, &transcode);
        let coordinator = Arc::new(coordinator);

        let worker = Arc::new(EncodeWorker::new(storage.clone(), Arc::new(encoder), transcode.timeout()));
        let workers = start_transcoder_workers(coordinator.clone(), worker, queue, transcode.workers);

        let state = AppState::new(config, db, storage, coordinator);
        Self { dir, state, workers }
    }

    pub fn coordinator(&self) -> &TranscodeCoordinator {
        &self.state.coordinator
    }

    /// Register a source video as if it had been uploaded.
    pub async fn add_video(&self, id: &str) {
        tokio::fs::write(self.state.storage.source_path(id), b"source")
            .await
            .expect("write source");
        VideoRepository::create(&self.state.db, id, id, id, 6)
            .await
            .expect("insert video");
    }

    pub async fn wait_terminal(&self, job_id: JobId) -> Job {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let job = self.coordinator().job(job_id).await.expect("job");
            if job.status.is_terminal() {
                return job;
            }
            assert!(tokio::time::Instant::now() < deadline, "job {job_id} never finished");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

pub fn transcode_config(workers: usize, queue_capacity: usize, timeout_secs: u64) -> TranscodeConfig {
    TranscodeConfig {
        workers,
        queue_capacity,
        timeout_secs,
        progress_grace_secs: 60,
    }
}
