use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use utoipa::ToSchema;

use crate::common::error::ErrorKind;

pub type JobId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Mp4,
    Hls,
    Dash,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Mp4 => "mp4",
            OutputFormat::Hls => "hls",
            OutputFormat::Dash => "dash",
        }
    }

    pub fn rendition_kind(&self) -> RenditionKind {
        match self {
            OutputFormat::Mp4 => RenditionKind::Mp4Variant,
            OutputFormat::Hls => RenditionKind::HlsLadder,
            OutputFormat::Dash => RenditionKind::DashLadder,
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mp4" => Ok(OutputFormat::Mp4),
            "hls" => Ok(OutputFormat::Hls),
            "dash" => Ok(OutputFormat::Dash),
            other => Err(format!("unsupported format '{}' (expected mp4, hls or dash)", other)),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target output height. Width follows the source aspect ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum Resolution {
    P240,
    P360,
    P480,
    P720,
    P1080,
    P1440,
    P2160,
}

impl Resolution {
    pub const LADDER: [Resolution; 7] = [
        Resolution::P240,
        Resolution::P360,
        Resolution::P480,
        Resolution::P720,
        Resolution::P1080,
        Resolution::P1440,
        Resolution::P2160,
    ];

    pub fn height(&self) -> u32 {
        match self {
            Resolution::P240 => 240,
            Resolution::P360 => 360,
            Resolution::P480 => 480,
            Resolution::P720 => 720,
            Resolution::P1080 => 1080,
            Resolution::P1440 => 1440,
            Resolution::P2160 => 2160,
        }
    }

    /// e.g. `720p`
    pub fn label(&self) -> String {
        format!("{}p", self.height())
    }
}

impl TryFrom<u32> for Resolution {
    type Error = String;

    fn try_from(height: u32) -> Result<Self, Self::Error> {
        Resolution::LADDER
            .into_iter()
            .find(|r| r.height() == height)
            .ok_or_else(|| format!("unsupported resolution '{}'", height))
    }
}

impl From<Resolution> for u32 {
    fn from(r: Resolution) -> Self {
        r.height()
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_suffix('p')
            .or_else(|| trimmed.strip_suffix('P'))
            .unwrap_or(trimmed);
        let height: u32 = digits
            .parse()
            .map_err(|_| format!("unsupported resolution '{}'", trimmed))?;
        Resolution::try_from(height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
pub enum Bitrate {
    #[serde(rename = "500k")]
    K500,
    #[serde(rename = "1000k")]
    K1000,
    #[serde(rename = "2000k")]
    K2000,
    #[serde(rename = "4000k")]
    K4000,
    #[serde(rename = "8000k")]
    K8000,
    #[serde(rename = "16000k")]
    K16000,
}

impl Bitrate {
    pub const LADDER: [Bitrate; 6] = [
        Bitrate::K500,
        Bitrate::K1000,
        Bitrate::K2000,
        Bitrate::K4000,
        Bitrate::K8000,
        Bitrate::K16000,
    ];

    /// ffmpeg `-b:v` value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Bitrate::K500 => "500k",
            Bitrate::K1000 => "1000k",
            Bitrate::K2000 => "2000k",
            Bitrate::K4000 => "4000k",
            Bitrate::K8000 => "8000k",
            Bitrate::K16000 => "16000k",
        }
    }
}

impl FromStr for Bitrate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Bitrate::LADDER
            .into_iter()
            .find(|b| b.as_str() == wanted)
            .ok_or_else(|| format!("unsupported bitrate '{}'", s.trim()))
    }
}

impl fmt::Display for Bitrate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a client asked for. Never changes after the job is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TranscodeRequest {
    pub format: OutputFormat,
    #[schema(value_type = u32, example = 720)]
    pub resolution: Resolution,
    pub bitrate: Bitrate,
}

impl Default for TranscodeRequest {
    fn default() -> Self {
        Self {
            format: OutputFormat::Mp4,
            resolution: Resolution::P720,
            bitrate: Bitrate::K1000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Running)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub video_id: String,
    pub request: TranscodeRequest,
    pub status: JobStatus,
    pub error_kind: Option<ErrorKind>,
    pub error_detail: Option<String>,
    pub rendition_id: Option<i64>,
    #[serde(with = "time::serde::rfc3339")]
    #[schema(value_type = String, format = DateTime)]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    #[schema(value_type = Option<String>, format = DateTime)]
    pub started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    #[schema(value_type = Option<String>, format = DateTime)]
    pub finished_at: Option<OffsetDateTime>,
}

/// Row shape of `transcode_jobs`; enums are stored as text.
#[derive(Debug, FromRow)]
pub struct JobRow {
    pub id: i64,
    pub video_id: String,
    pub format: String,
    pub resolution: i64,
    pub bitrate: String,
    pub status: String,
    pub error_kind: Option<String>,
    pub error_detail: Option<String>,
    pub rendition_id: Option<i64>,
    pub created_at: OffsetDateTime,
    pub started_at: Option<OffsetDateTime>,
    pub finished_at: Option<OffsetDateTime>,
}

impl TryFrom<JobRow> for Job {
    type Error = String;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let height = u32::try_from(row.resolution)
            .map_err(|_| format!("invalid resolution {}", row.resolution))?;

        Ok(Job {
            id: row.id,
            video_id: row.video_id,
            request: TranscodeRequest {
                format: row.format.parse()?,
                resolution: Resolution::try_from(height)?,
                bitrate: row.bitrate.parse()?,
            },
            status: row.status.parse()?,
            error_kind: row.error_kind.as_deref().map(str::parse).transpose()?,
            error_detail: row.error_detail,
            rendition_id: row.rendition_id,
            created_at: row.created_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum RenditionKind {
    Mp4Variant,
    HlsLadder,
    DashLadder,
}

impl RenditionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RenditionKind::Mp4Variant => "mp4-variant",
            RenditionKind::HlsLadder => "hls-ladder",
            RenditionKind::DashLadder => "dash-ladder",
        }
    }
}

impl FromStr for RenditionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mp4-variant" => Ok(RenditionKind::Mp4Variant),
            "hls-ladder" => Ok(RenditionKind::HlsLadder),
            "dash-ladder" => Ok(RenditionKind::DashLadder),
            other => Err(format!("unknown rendition kind '{}'", other)),
        }
    }
}

/// A committed encode output. Paths are relative to the transcoded root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Rendition {
    pub id: i64,
    pub video_id: String,
    pub job_id: JobId,
    pub kind: RenditionKind,
    pub resolution: String,
    /// The mp4 file, or the HLS/DASH manifest.
    pub path: String,
    /// Segment files next to a ladder manifest. Empty for mp4 variants.
    pub files: Vec<String>,
}

/// Rendition about to be recorded, before the store assigns its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRendition {
    pub kind: RenditionKind,
    pub resolution: String,
    pub path: String,
    pub files: Vec<String>,
}

#[derive(Debug, FromRow)]
pub struct RenditionRow {
    pub id: i64,
    pub video_id: String,
    pub job_id: i64,
    pub kind: String,
    pub resolution: String,
    pub path: String,
    pub files: String,
}

impl TryFrom<RenditionRow> for Rendition {
    type Error = String;

    fn try_from(row: RenditionRow) -> Result<Self, Self::Error> {
        let files: Vec<String> = serde_json::from_str(&row.files)
            .map_err(|e| format!("invalid rendition file list: {}", e))?;

        Ok(Rendition {
            id: row.id,
            video_id: row.video_id,
            job_id: row.job_id,
            kind: row.kind.parse()?,
            resolution: row.resolution,
            path: row.path,
            files,
        })
    }
}
