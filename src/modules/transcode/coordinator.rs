use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedMutexGuard, OwnedSemaphorePermit, Semaphore};
use tracing::{error, info, warn};

use super::manifest::{ManifestPublisher, VideoManifest};
use super::model::{Job, JobId, JobStatus, Rendition, TranscodeRequest};
use super::progress::ProgressTracker;
use super::repository::JobRepository;
use crate::common::error::{truncate_detail, ErrorKind, ServiceError, ServiceResult, MAX_ERROR_DETAIL};
use crate::config::settings::TranscodeConfig;
use crate::infrastructure::db::pool::DbPool;
use crate::infrastructure::storage::local::MediaStorage;
use crate::modules::video::repository::VideoRepository;
use crate::workers::encoder::EncodedOutput;

/// A queued job on its way to a worker. The permit is held until the
/// job reaches a terminal state.
pub struct Dispatch {
    pub job: Job,
    pub permit: OwnedSemaphorePermit,
}

/// One async mutex per video id. Entries live only while someone holds
/// or waits on them.
#[derive(Default)]
pub struct VideoLocks {
    inner: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl VideoLocks {
    pub async fn lock(&self, video_id: &str) -> VideoGuard<'_> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            map.entry(video_id.to_string()).or_default().clone()
        };
        VideoGuard {
            locks: self,
            video_id: video_id.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    fn prune(&self, video_id: &str) {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if map.get(video_id).is_some_and(|l| Arc::strong_count(l) == 1) {
            map.remove(video_id);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Holds a video's lock. Dropping it unlocks and forgets the entry when
/// no other task is waiting.
pub struct VideoGuard<'a> {
    locks: &'a VideoLocks,
    video_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for VideoGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks.prune(&self.video_id);
    }
}

/// Where a video's most recent job stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobProgress {
    pub job_id: JobId,
    pub status: JobStatus,
    pub progress: u8,
}

/// Accepts transcode submissions and owns the job state machine.
///
/// Every transition that depends on "is there an active job for this
/// video" runs under that video's lock. The store's partial unique index
/// backs this up if a second process ever shares the database.
pub struct TranscodeCoordinator {
    db: DbPool,
    storage: MediaStorage,
    tracker: Arc<ProgressTracker>,
    dispatcher: async_channel::Sender<Dispatch>,
    admission: Arc<Semaphore>,
    locks: VideoLocks,
}

impl TranscodeCoordinator {
    /// Returns the coordinator and the queue the worker pool consumes.
    pub fn new(
        db: DbPool,
        storage: MediaStorage,
        tracker: Arc<ProgressTracker>,
        config: &TranscodeConfig,
    ) -> (Self, async_channel::Receiver<Dispatch>) {
        let limit = config.admission_limit();
        let (tx, rx) = async_channel::bounded(limit);

        let coordinator = Self {
            db,
            storage,
            tracker,
            dispatcher: tx,
            admission: Arc::new(Semaphore::new(limit)),
            locks: VideoLocks::default(),
        };
        (coordinator, rx)
    }

    pub fn db(&self) -> &DbPool {
        &self.db
    }

    pub fn storage(&self) -> &MediaStorage {
        &self.storage
    }

    pub fn tracker(&self) -> &Arc<ProgressTracker> {
        &self.tracker
    }

    /// Free admission slots.
    pub fn available_slots(&self) -> usize {
        self.admission.available_permits()
    }

    /// Critical section shared by submit, job start, upload and delete.
    pub async fn lock_video(&self, video_id: &str) -> VideoGuard<'_> {
        self.locks.lock(video_id).await
    }

    /// Stop accepting work. Workers finish what is queued and exit.
    pub fn close(&self) {
        self.dispatcher.close();
    }

    pub async fn submit(&self, video_id: &str, request: TranscodeRequest) -> ServiceResult<Job> {
        let _guard = self.lock_video(video_id).await;

        if VideoRepository::find_by_id(&self.db, video_id).await?.is_none() {
            return Err(ServiceError::VideoNotFound(video_id.to_string()));
        }

        if let Some(active) = JobRepository::find_active_by_video(&self.db, video_id).await? {
            return Err(ServiceError::JobAlreadyActive {
                video_id: video_id.to_string(),
                job_id: active.id,
            });
        }

        let permit = self
            .admission
            .clone()
            .try_acquire_owned()
            .map_err(|_| ServiceError::CapacityExceeded)?;

        let job = JobRepository::create(&self.db, video_id, &request).await?;

        if let Err(e) = self.dispatcher.try_send(Dispatch {
            job: job.clone(),
            permit,
        }) {
            warn!(job_id = job.id, video_id, "Could not dispatch job: {}", e);
            JobRepository::fail(&self.db, job.id, ErrorKind::Interrupted, "worker pool is not accepting jobs").await?;
            return Err(ServiceError::CapacityExceeded);
        }

        info!(
            job_id = job.id,
            video_id,
            format = %request.format,
            resolution = request.resolution.height(),
            bitrate = %request.bitrate,
            "Transcode job queued"
        );
        Ok(job)
    }

    /// Progress of the video's most recent job.
    pub async fn progress(&self, video_id: &str) -> ServiceResult<JobProgress> {
        let no_active = |last_failure| ServiceError::NoActiveJob {
            video_id: video_id.to_string(),
            last_failure,
        };

        let Some(job) = JobRepository::latest_by_video(&self.db, video_id).await? else {
            return Err(no_active(None));
        };

        let progress = match job.status {
            JobStatus::Queued => 0,
            JobStatus::Running => self.tracker.get(job.id).await.unwrap_or(0),
            JobStatus::Succeeded => 100,
            JobStatus::Failed => {
                let failure = job.error_kind.map(|kind| (kind, job.error_detail.clone().unwrap_or_default()));
                return Err(no_active(failure));
            }
        };

        Ok(JobProgress {
            job_id: job.id,
            status: job.status,
            progress,
        })
    }

    pub async fn manifest(&self, video_id: &str) -> ServiceResult<VideoManifest> {
        if VideoRepository::find_by_id(&self.db, video_id).await?.is_none() {
            return Err(ServiceError::VideoNotFound(video_id.to_string()));
        }
        self.manifest_unchecked(video_id).await
    }

    /// Manifest of a video the caller already knows exists.
    pub async fn manifest_unchecked(&self, video_id: &str) -> ServiceResult<VideoManifest> {
        let renditions = JobRepository::list_renditions(&self.db, video_id).await?;
        Ok(ManifestPublisher::build(&self.storage, &renditions))
    }

    pub async fn job(&self, job_id: JobId) -> ServiceResult<Job> {
        JobRepository::find_by_id(&self.db, job_id)
            .await?
            .ok_or(ServiceError::JobNotFound(job_id))
    }

    /// `queued -> running`. False means the job is no longer queued and
    /// must not be encoded.
    pub async fn begin(&self, job: &Job) -> ServiceResult<bool> {
        let _guard = self.lock_video(&job.video_id).await;
        let started = JobRepository::mark_running(&self.db, job.id).await?;
        if started {
            self.tracker.start(job.id).await;
            info!(job_id = job.id, video_id = %job.video_id, "Transcode job running");
        }
        Ok(started)
    }

    /// Record an encode that is already in its final place. If the store
    /// refuses, the artifact is rolled back before the job is failed.
    pub async fn complete(&self, job: &Job, output: EncodedOutput) -> ServiceResult<Rendition> {
        let EncodedOutput { rendition, pending } = output;

        match JobRepository::complete(&self.db, job.id, &rendition).await {
            Ok(saved) => {
                if let Err(e) = pending.finalize().await {
                    warn!(job_id = job.id, "Failed to remove replaced output: {}", e);
                }
                self.tracker.finish(job.id, true).await;
                info!(job_id = job.id, video_id = %job.video_id, path = %saved.path, "Transcode job succeeded");
                Ok(saved)
            }
            Err(e) => {
                let target = pending.target().display().to_string();
                if let Err(re) = pending.rollback().await {
                    error!(job_id = job.id, "Failed to roll back {}: {}", target, re);
                }
                self.fail(job, &e).await;
                Err(e)
            }
        }
    }

    pub async fn fail(&self, job: &Job, err: &ServiceError) {
        let kind = err.job_error_kind();
        let detail = truncate_detail(&err.to_string(), MAX_ERROR_DETAIL);
        error!(job_id = job.id, video_id = %job.video_id, kind = %kind, "Transcode job failed: {}", detail);

        if let Err(e) = JobRepository::fail(&self.db, job.id, kind, &detail).await {
            error!(job_id = job.id, "Failed to record job failure: {}", e);
        }
        self.tracker.finish(job.id, false).await;
    }
}
