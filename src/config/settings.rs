use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use crate::config::env::{self, EnvKey};

const DEFAULT_MAX_UPLOAD_BYTES: usize = 2000 * 1024 * 1024;

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    pub server_host: String,
    pub server_port: u16,
    pub database_url: String,
    pub uploads_dir: PathBuf,
    pub transcoded_dir: PathBuf,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub transcode: TranscodeConfig,
    pub max_upload_bytes: usize,
    pub cors_origin: String,
}

/// Sizing and timing of the transcode worker pool.
#[derive(Clone, Debug, Deserialize)]
pub struct TranscodeConfig {
    pub workers: usize,
    /// Jobs allowed to wait for a free worker before submissions are refused.
    pub queue_capacity: usize,
    pub timeout_secs: u64,
    pub progress_grace_secs: u64,
}

impl TranscodeConfig {
    /// Upper bound on jobs admitted at once (running plus waiting).
    pub fn admission_limit(&self) -> usize {
        (self.workers + self.queue_capacity).max(1)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn progress_grace(&self) -> Duration {
        Duration::from_secs(self.progress_grace_secs)
    }
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_capacity: 8,
            timeout_secs: 3600,
            progress_grace_secs: 60,
        }
    }
}

impl AppConfig {
    pub fn new() -> Self {
        let defaults = TranscodeConfig::default();

        Self {
            server_host: env::get_or(EnvKey::ServerHost, "0.0.0.0"),
            server_port: env::get_parsed(EnvKey::ServerPort, 8080),
            database_url: env::get_or(EnvKey::DatabaseUrl, "sqlite://data/videos.db"),
            uploads_dir: PathBuf::from(env::get_or(EnvKey::UploadsDir, "./uploads/videos")),
            transcoded_dir: PathBuf::from(env::get_or(EnvKey::TranscodedDir, "./uploads/transcoded")),
            ffmpeg_path: env::get_or(EnvKey::FfmpegPath, "ffmpeg"),
            ffprobe_path: env::get_or(EnvKey::FfprobePath, "ffprobe"),
            transcode: TranscodeConfig {
                workers: env::get_parsed(EnvKey::TranscodeWorkers, defaults.workers).max(1),
                queue_capacity: env::get_parsed(EnvKey::TranscodeQueueCapacity, defaults.queue_capacity),
                timeout_secs: env::get_parsed(EnvKey::TranscodeTimeoutSecs, defaults.timeout_secs).max(1),
                progress_grace_secs: env::get_parsed(EnvKey::ProgressGraceSecs, defaults.progress_grace_secs),
            },
            max_upload_bytes: env::get_parsed(EnvKey::MaxUploadBytes, DEFAULT_MAX_UPLOAD_BYTES),
            cors_origin: env::get_or(EnvKey::CorsOrigin, "http://localhost:3000"),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::new()
    }
}
