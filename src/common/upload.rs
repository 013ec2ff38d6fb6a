use std::path::{Path, PathBuf};

use axum::{body::Bytes, extract::multipart::Field};
use futures_util::StreamExt;
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{error, warn};

use crate::common::error::{ServiceError, ServiceResult};

const ALLOWED_EXTENSIONS: [&str; 3] = ["mp4", "webm", "mov"];

/// Writes an upload to a temporary file, counting bytes against a limit.
pub struct DiskWriter {
    path: PathBuf,
    file: BufWriter<File>,
    written: u64,
    max_bytes: u64,
}

impl DiskWriter {
    pub async fn create(path: impl Into<PathBuf>, max_bytes: u64) -> ServiceResult<Self> {
        let path = path.into();
        let file = File::create(&path)
            .await
            .map_err(|e| ServiceError::storage(format!("failed to create {}: {}", path.display(), e)))?;

        Ok(Self {
            path,
            file: BufWriter::new(file),
            written: 0,
            max_bytes,
        })
    }

    pub async fn write_chunk(&mut self, chunk: Bytes) -> ServiceResult<()> {
        self.written += chunk.len() as u64;
        if self.written > self.max_bytes {
            return Err(ServiceError::InvalidRequest(format!(
                "upload exceeds the {} byte limit",
                self.max_bytes
            )));
        }
        self.file.write_all(&chunk).await?;
        Ok(())
    }

    /// Flush to disk and return the number of bytes written.
    pub async fn finish(mut self) -> ServiceResult<u64> {
        self.file.flush().await?;
        self.file.get_ref().sync_all().await?;
        Ok(self.written)
    }

    pub async fn abort(self) {
        drop(self.file);
        if let Err(e) = fs::remove_file(&self.path).await {
            warn!("Failed to remove partial upload {}: {}", self.path.display(), e);
        }
    }
}

pub async fn stream_to_disk(mut field: Field<'_>, dest: &Path, max_bytes: u64) -> ServiceResult<u64> {
    let mut writer = DiskWriter::create(dest, max_bytes).await?;

    while let Some(chunk) = field.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                error!("Upload stream error: {}", e);
                writer.abort().await;
                return Err(ServiceError::InvalidRequest(format!("upload interrupted: {}", e)));
            }
        };

        if let Err(e) = writer.write_chunk(chunk).await {
            writer.abort().await;
            return Err(e);
        }
    }

    if writer.written == 0 {
        writer.abort().await;
        return Err(ServiceError::InvalidRequest("uploaded file is empty".to_string()));
    }

    writer.finish().await
}

/// Only video types are stored. Parts sent without a useful type are
/// judged by their file name.
pub fn validate_content_type(content_type: Option<&str>, file_name: &str) -> ServiceResult<()> {
    let effective = match content_type.filter(|ct| *ct != "application/octet-stream") {
        Some(ct) => ct.to_string(),
        None => match mime_guess::from_path(file_name).first() {
            Some(guess) => guess.essence_str().to_string(),
            None => return Ok(()),
        },
    };

    if effective.starts_with("video/") {
        Ok(())
    } else {
        Err(ServiceError::InvalidRequest(format!(
            "invalid content type '{}': only video/* is allowed",
            effective
        )))
    }
}

/// Turn a client supplied file name into a video id: directory parts are
/// stripped and unknown extensions get `.mp4` appended.
pub fn video_id_from_file_name(file_name: &str) -> ServiceResult<String> {
    let base = Path::new(file_name.trim())
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::trim)
        .unwrap_or_default();

    if base.is_empty() || base == "." || base == ".." || base.starts_with('.') {
        return Err(ServiceError::InvalidRequest(format!("invalid file name '{}'", file_name)));
    }

    let known = Path::new(base)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| ALLOWED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));

    if known {
        Ok(base.to_string())
    } else {
        Ok(format!("{}.mp4", base))
    }
}
