use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::encoder::EncodeWorker;
use crate::common::error::ServiceError;
use crate::modules::transcode::coordinator::{Dispatch, TranscodeCoordinator};
use crate::modules::transcode::progress::ProgressReporter;
use crate::modules::video::repository::VideoRepository;

/// Spawn `count` workers draining the dispatch queue. They exit once the
/// queue is closed and empty.
pub fn start_transcoder_workers(
    coordinator: Arc<TranscodeCoordinator>,
    worker: Arc<EncodeWorker>,
    queue: async_channel::Receiver<Dispatch>,
    count: usize,
) -> Vec<JoinHandle<()>> {
    info!("🎥 Starting {} transcoder workers", count);

    (0..count)
        .map(|n| {
            let coordinator = coordinator.clone();
            let worker = worker.clone();
            let queue = queue.clone();
            tokio::spawn(async move {
                while let Ok(dispatch) = queue.recv().await {
                    process_job(&coordinator, &worker, dispatch).await;
                }
                info!("Transcoder worker {} stopped", n);
            })
        })
        .collect()
}

/// Run one job to a terminal state. The admission permit is released on
/// return.
pub async fn process_job(coordinator: &TranscodeCoordinator, worker: &EncodeWorker, dispatch: Dispatch) {
    let Dispatch { job, permit: _permit } = dispatch;

    match coordinator.begin(&job).await {
        Ok(true) => {}
        Ok(false) => {
            warn!(job_id = job.id, "Job is no longer queued, skipping");
            return;
        }
        Err(e) => {
            coordinator.fail(&job, &e).await;
            return;
        }
    }

    let source = match VideoRepository::find_by_id(coordinator.db(), &job.video_id).await {
        Ok(Some(video)) => coordinator.storage().source_path(&video.source_file),
        Ok(None) => {
            let err = ServiceError::storage(format!("video {} disappeared before encoding", job.video_id));
            coordinator.fail(&job, &err).await;
            return;
        }
        Err(e) => {
            coordinator.fail(&job, &e.into()).await;
            return;
        }
    };

    let reporter = ProgressReporter::new(coordinator.tracker().clone(), job.id);
    match worker.run(&job, &source, reporter).await {
        Ok(output) => {
            if let Err(e) = coordinator.complete(&job, output).await {
                error!(job_id = job.id, "Encoded output could not be recorded: {}", e);
            }
        }
        Err(e) => coordinator.fail(&job, &e).await,
    }
}
