use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use super::encoder::{EncodeTask, Encoder};
use crate::common::error::{truncate_detail, ServiceError, ServiceResult, MAX_ERROR_DETAIL};
use crate::modules::transcode::model::OutputFormat;
use crate::modules::transcode::progress::ProgressReporter;

const STDERR_TAIL_LINES: usize = 64;

/// Encoder backed by the `ffmpeg` and `ffprobe` binaries.
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    ffmpeg_path: String,
    ffprobe_path: String,
}

impl FfmpegEncoder {
    pub fn new(ffmpeg_path: impl Into<String>, ffprobe_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            ffprobe_path: ffprobe_path.into(),
        }
    }

    /// Source duration in seconds, if ffprobe can tell.
    pub async fn probe_duration(&self, source: &Path) -> Option<f64> {
        let output = Command::new(&self.ffprobe_path)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(source)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await;

        match output {
            Ok(out) if out.status.success() => parse_duration(&String::from_utf8_lossy(&out.stdout)),
            Ok(out) => {
                warn!(
                    "ffprobe could not read {}: {}",
                    source.display(),
                    String::from_utf8_lossy(&out.stderr).trim()
                );
                None
            }
            Err(e) => {
                warn!("Failed to run {}: {}", self.ffprobe_path, e);
                None
            }
        }
    }
}

#[async_trait]
impl Encoder for FfmpegEncoder {
    async fn encode(&self, task: &EncodeTask, progress: ProgressReporter) -> ServiceResult<()> {
        let duration = self.probe_duration(&task.source).await;
        let args = build_args(task);
        debug!(job_id = task.job_id, "Running {} {}", self.ffmpeg_path, args.join(" "));

        let mut child = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ServiceError::encode_failed(format!("failed to start ffmpeg: {}", e), None))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ServiceError::encode_failed("ffmpeg stdout not captured", None))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ServiceError::encode_failed("ffmpeg stderr not captured", None))?;

        let stderr_tail = tokio::spawn(async move {
            let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            Vec::from(tail).join("\n")
        });

        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if let (Some(out_us), Some(total)) = (parse_out_time_us(&line), duration) {
                progress.report(out_us as f64 / 1_000_000.0 / total * 100.0).await;
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| ServiceError::encode_failed(format!("failed to wait for ffmpeg: {}", e), None))?;
        let log = stderr_tail.await.unwrap_or_default();

        if status.success() {
            return Ok(());
        }

        let detail = if log.trim().is_empty() {
            format!("ffmpeg exited with {}", status)
        } else {
            truncate_detail(&log, MAX_ERROR_DETAIL)
        };
        Err(ServiceError::encode_failed(detail, status.code()))
    }
}

/// Full ffmpeg argument list for a task, output path last.
pub fn build_args(task: &EncodeTask) -> Vec<String> {
    let req = &task.request;
    let mut args: Vec<String> = vec![
        "-y".into(),
        "-nostats".into(),
        "-v".into(),
        "error".into(),
        "-progress".into(),
        "pipe:1".into(),
        "-i".into(),
        task.source.to_string_lossy().into_owned(),
        "-c:v".into(),
        "libx264".into(),
        "-c:a".into(),
        "aac".into(),
        "-vf".into(),
        format!("scale=-2:{}", req.resolution.height()),
        "-b:v".into(),
        req.bitrate.as_str().into(),
    ];

    match req.format {
        OutputFormat::Mp4 => {
            args.extend(["-preset", "fast", "-movflags", "+faststart"].map(String::from));
        }
        OutputFormat::Hls => {
            let segments = task.output_dir().join("segment_%03d.ts");
            args.extend(
                [
                    "-profile:v",
                    "baseline",
                    "-level",
                    "3.0",
                    "-start_number",
                    "0",
                    "-hls_time",
                    "10",
                    "-hls_list_size",
                    "0",
                    "-hls_segment_filename",
                ]
                .map(String::from),
            );
            args.push(segments.to_string_lossy().into_owned());
            args.extend(["-f", "hls"].map(String::from));
        }
        OutputFormat::Dash => {
            args.extend(
                [
                    "-profile:v",
                    "baseline",
                    "-level",
                    "3.0",
                    "-bf",
                    "0",
                    "-use_timeline",
                    "1",
                    "-use_template",
                    "1",
                    "-f",
                    "dash",
                ]
                .map(String::from),
            );
        }
    }

    args.push(task.output.to_string_lossy().into_owned());
    args
}

/// Encoded position from a `-progress` line. ffmpeg writes microseconds
/// under both keys.
fn parse_out_time_us(line: &str) -> Option<i64> {
    let (key, value) = line.trim().split_once('=')?;
    match key {
        "out_time_us" | "out_time_ms" => value.trim().parse::<i64>().ok().filter(|v| *v >= 0),
        _ => None,
    }
}

fn parse_duration(raw: &str) -> Option<f64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|d| d.is_finite() && *d > 0.0)
}

/// Resolve the encoder binary on `PATH`.
pub fn check_ffmpeg(ffmpeg_path: &str) -> Option<PathBuf> {
    which::which(ffmpeg_path).ok()
}
