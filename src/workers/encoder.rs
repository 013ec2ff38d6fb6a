use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs;
use tracing::{info, warn};

use crate::common::error::{ServiceError, ServiceResult};
use crate::infrastructure::storage::local::{MediaStorage, OutputLayout, PendingCommit};
use crate::modules::transcode::model::{Job, JobId, NewRendition, OutputFormat, TranscodeRequest};
use crate::modules::transcode::progress::ProgressReporter;

/// One encode to perform.
#[derive(Debug, Clone)]
pub struct EncodeTask {
    pub job_id: JobId,
    pub source: PathBuf,
    pub request: TranscodeRequest,
    /// File the encoder must write. For ladders its directory also
    /// receives the segments.
    pub output: PathBuf,
}

impl EncodeTask {
    pub fn output_dir(&self) -> &Path {
        self.output.parent().unwrap_or_else(|| Path::new("."))
    }
}

/// Something that can turn a source file into an encoded artifact.
#[async_trait]
pub trait Encoder: Send + Sync {
    async fn encode(&self, task: &EncodeTask, progress: ProgressReporter) -> ServiceResult<()>;
}

/// A validated encode sitting in its final place. The job store has not
/// recorded it yet, so `pending` must be finalized or rolled back.
#[derive(Debug)]
pub struct EncodedOutput {
    pub rendition: NewRendition,
    pub pending: PendingCommit,
}

/// Runs one job's encode in its own staging directory and moves the
/// result into place only once the artifact set is complete.
pub struct EncodeWorker {
    storage: MediaStorage,
    encoder: Arc<dyn Encoder>,
    timeout: Duration,
}

impl EncodeWorker {
    pub fn new(storage: MediaStorage, encoder: Arc<dyn Encoder>, timeout: Duration) -> Self {
        Self {
            storage,
            encoder,
            timeout,
        }
    }

    pub async fn run(&self, job: &Job, source: &Path, progress: ProgressReporter) -> ServiceResult<EncodedOutput> {
        let result = self.encode_and_commit(job, source, progress).await;
        if result.is_err() {
            self.storage.discard_staging(job.id).await;
        }
        result
    }

    async fn encode_and_commit(
        &self,
        job: &Job,
        source: &Path,
        progress: ProgressReporter,
    ) -> ServiceResult<EncodedOutput> {
        let format = job.request.format;
        let layout = self.storage.layout(&job.video_id, &job.request);
        let staging = self.storage.staging_dir(job.id);

        if fs::try_exists(&staging).await? {
            fs::remove_dir_all(&staging).await?;
        }
        fs::create_dir_all(&staging).await?;

        let task = EncodeTask {
            job_id: job.id,
            source: source.to_path_buf(),
            request: job.request,
            output: staging.join(&layout.output_name),
        };

        info!(job_id = job.id, video_id = %job.video_id, format = %format, "Encoding {}", layout.target);

        // Dropping the encode future kills the subprocess.
        match tokio::time::timeout(self.timeout, self.encoder.encode(&task, progress)).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(job_id = job.id, "Encode exceeded {:?}", self.timeout);
                return Err(ServiceError::Timeout(self.timeout.as_secs()));
            }
        }

        let segments = validate_output(&staging, &layout, format).await?;

        let pending = self
            .storage
            .commit(&staging, &layout, format)
            .await
            .map_err(|e| ServiceError::storage(format!("failed to commit {}: {}", layout.target, e)))?;

        let rendition = NewRendition {
            kind: format.rendition_kind(),
            resolution: job.request.resolution.label(),
            path: layout.primary_path(format),
            files: segments
                .into_iter()
                .map(|name| format!("{}/{}", layout.target, name))
                .collect(),
        };
        Ok(EncodedOutput { rendition, pending })
    }
}

/// Check the staging directory holds a usable artifact and return the
/// segment file names of a ladder (empty for mp4).
async fn validate_output(staging: &Path, layout: &OutputLayout, format: OutputFormat) -> ServiceResult<Vec<String>> {
    let primary = staging.join(&layout.output_name);
    let non_empty = match fs::metadata(&primary).await {
        Ok(meta) => meta.is_file() && meta.len() > 0,
        Err(_) => false,
    };
    if !non_empty {
        return Err(ServiceError::encode_failed(
            format!("encoder produced no {}", layout.output_name),
            None,
        ));
    }

    if format == OutputFormat::Mp4 {
        return Ok(Vec::new());
    }

    let mut segments = Vec::new();
    let mut entries = fs::read_dir(staging).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name != layout.output_name && entry.file_type().await?.is_file() {
            segments.push(name);
        }
    }

    if segments.is_empty() {
        return Err(ServiceError::encode_failed(
            format!("{} ladder has no segments", format),
            None,
        ));
    }

    segments.sort();
    Ok(segments)
}
