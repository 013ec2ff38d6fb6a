use std::env;
use std::str::FromStr;

pub enum EnvKey {
    ServerHost,
    ServerPort,
    DatabaseUrl,
    UploadsDir,
    TranscodedDir,
    FfmpegPath,
    FfprobePath,
    TranscodeWorkers,
    TranscodeQueueCapacity,
    TranscodeTimeoutSecs,
    ProgressGraceSecs,
    MaxUploadBytes,
    CorsOrigin,
}

impl EnvKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvKey::ServerHost => "APP_HOST",
            EnvKey::ServerPort => "APP_PORT",
            EnvKey::DatabaseUrl => "DATABASE_URL",
            EnvKey::UploadsDir => "UPLOADS_DIR",
            EnvKey::TranscodedDir => "TRANSCODED_DIR",
            EnvKey::FfmpegPath => "FFMPEG_PATH",
            EnvKey::FfprobePath => "FFPROBE_PATH",
            EnvKey::TranscodeWorkers => "TRANSCODE_WORKERS",
            EnvKey::TranscodeQueueCapacity => "TRANSCODE_QUEUE_CAPACITY",
            EnvKey::TranscodeTimeoutSecs => "TRANSCODE_TIMEOUT_SECS",
            EnvKey::ProgressGraceSecs => "PROGRESS_GRACE_SECS",
            EnvKey::MaxUploadBytes => "MAX_UPLOAD_BYTES",
            EnvKey::CorsOrigin => "CORS_ORIGIN",
        }
    }
}

pub fn get(key: EnvKey) -> Result<String, env::VarError> {
    env::var(key.as_str())
}

pub fn get_or(key: EnvKey, default: &str) -> String {
    env::var(key.as_str()).unwrap_or_else(|_| default.to_string())
}

pub fn get_parsed<T: FromStr>(key: EnvKey, default: T) -> T {
    match get(key) {
        Ok(val) => val.trim().parse::<T>().unwrap_or(default),
        Err(_) => default,
    }
}
