use std::io;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{info, warn};
use uuid::Uuid;

use crate::modules::transcode::model::{JobId, OutputFormat, TranscodeRequest};

const STAGING_DIR: &str = ".staging";

/// On-disk layout for uploaded sources and committed renditions.
///
/// ```text
/// <uploads>/<video id>                              source file
/// <transcoded>/<video id>/<stem>_<res>p.mp4         mp4 variant
/// <transcoded>/<video id>/hls_<res>p/playlist.m3u8  hls ladder
/// <transcoded>/<video id>/dash_<res>p/manifest.mpd  dash ladder
/// <transcoded>/.staging/job-<id>/                   in-flight encode output
/// ```
#[derive(Clone, Debug)]
pub struct MediaStorage {
    pub uploads_dir: PathBuf,
    pub transcoded_dir: PathBuf,
}

/// Where a committed encode lands, relative to the transcoded root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    /// File the encoder is told to write inside its staging dir.
    pub output_name: String,
    /// Final location of the file (mp4) or directory (ladders).
    pub target: String,
}

impl OutputLayout {
    /// The rendition's primary path once committed.
    pub fn primary_path(&self, format: OutputFormat) -> String {
        match format {
            OutputFormat::Mp4 => self.target.clone(),
            OutputFormat::Hls | OutputFormat::Dash => format!("{}/{}", self.target, self.output_name),
        }
    }
}

impl MediaStorage {
    pub fn new(uploads_dir: impl Into<PathBuf>, transcoded_dir: impl Into<PathBuf>) -> Self {
        Self {
            uploads_dir: uploads_dir.into(),
            transcoded_dir: transcoded_dir.into(),
        }
    }

    /// Create the directory tree and drop staging output left by a previous run.
    pub async fn init(&self) -> io::Result<()> {
        fs::create_dir_all(&self.uploads_dir).await?;
        fs::create_dir_all(&self.transcoded_dir).await?;

        let staging = self.staging_root();
        if fs::try_exists(&staging).await? {
            warn!("Removing stale staging output in {}", staging.display());
            fs::remove_dir_all(&staging).await?;
        }
        fs::create_dir_all(&staging).await?;

        info!(
            "✅ Media storage ready (uploads: {}, transcoded: {})",
            self.uploads_dir.display(),
            self.transcoded_dir.display()
        );
        Ok(())
    }

    pub fn source_path(&self, source_file: &str) -> PathBuf {
        self.uploads_dir.join(source_file)
    }

    /// Temporary file an upload streams into before it is renamed into place.
    pub fn upload_temp_path(&self) -> PathBuf {
        self.uploads_dir.join(format!(".upload-{}.part", Uuid::new_v4().simple()))
    }

    fn staging_root(&self) -> PathBuf {
        self.transcoded_dir.join(STAGING_DIR)
    }

    /// Unique per job, so concurrent encodes never share output paths.
    pub fn staging_dir(&self, job_id: JobId) -> PathBuf {
        self.staging_root().join(format!("job-{}", job_id))
    }

    pub fn video_output_dir(&self, video_id: &str) -> PathBuf {
        self.transcoded_dir.join(video_id)
    }

    pub fn layout(&self, video_id: &str, request: &TranscodeRequest) -> OutputLayout {
        let res = request.resolution.label();
        match request.format {
            OutputFormat::Mp4 => {
                let name = format!("{}_{}.mp4", file_stem(video_id), res);
                OutputLayout {
                    target: format!("{}/{}", video_id, name),
                    output_name: name,
                }
            }
            OutputFormat::Hls => OutputLayout {
                output_name: "playlist.m3u8".to_string(),
                target: format!("{}/hls_{}", video_id, res),
            },
            OutputFormat::Dash => OutputLayout {
                output_name: "manifest.mpd".to_string(),
                target: format!("{}/dash_{}", video_id, res),
            },
        }
    }

    /// Move a finished staging directory into its final place.
    ///
    /// Any previous artifact at the same target is kept aside until the
    /// returned [`PendingCommit`] is finalized or rolled back. An mp4 is
    /// swapped in with a single rename. A ladder directory cannot be
    /// replaced atomically, so its target is briefly missing between the
    /// two renames.
    pub async fn commit(
        &self,
        staging: &Path,
        layout: &OutputLayout,
        format: OutputFormat,
    ) -> io::Result<PendingCommit> {
        let target = self.transcoded_dir.join(&layout.target);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }

        let is_dir = format != OutputFormat::Mp4;
        let aside = staging.with_extension("old");
        remove_if_exists(&aside, is_dir).await?;
        let had_previous = fs::try_exists(&target).await?;

        if is_dir {
            if had_previous {
                fs::rename(&target, &aside).await?;
            }
            if let Err(e) = fs::rename(staging, &target).await {
                if had_previous {
                    fs::rename(&aside, &target).await?;
                }
                return Err(e);
            }
        } else {
            // The hard link keeps the old bytes while the rename replaces the name.
            if had_previous {
                fs::hard_link(&target, &aside).await?;
            }
            if let Err(e) = fs::rename(staging.join(&layout.output_name), &target).await {
                if had_previous {
                    fs::remove_file(&aside).await?;
                }
                return Err(e);
            }
            if let Err(e) = fs::remove_dir_all(staging).await {
                warn!("Failed to remove staging dir {}: {}", staging.display(), e);
            }
        }

        Ok(PendingCommit {
            target,
            previous: had_previous.then_some(aside),
            is_dir,
        })
    }

    /// Best effort removal of a job's staging output.
    pub async fn discard_staging(&self, job_id: JobId) {
        let dir = self.staging_dir(job_id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to discard staging dir {}: {}", dir.display(), e),
        }
    }

    /// Remove a video's source file and every rendition produced for it.
    pub async fn remove_video_files(&self, video_id: &str, source_file: &str) -> io::Result<()> {
        remove_if_exists(&self.source_path(source_file), false).await?;
        remove_if_exists(&self.video_output_dir(video_id), true).await
    }

    /// Public URL of an uploaded source.
    pub fn source_url(&self, video_id: &str) -> String {
        format!("/videos/{}", urlencoding::encode(video_id))
    }

    /// Public URL of a path under the transcoded root.
    pub fn rendition_url(&self, relative: &str) -> String {
        let encoded: Vec<String> = relative
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();
        format!("/transcoded/{}", encoded.join("/"))
    }
}

/// An artifact moved into its final place whose job is not recorded yet.
#[must_use]
#[derive(Debug)]
pub struct PendingCommit {
    target: PathBuf,
    previous: Option<PathBuf>,
    is_dir: bool,
}

impl PendingCommit {
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Keep the new artifact and drop the one it replaced.
    pub async fn finalize(self) -> io::Result<()> {
        match self.previous {
            Some(previous) => remove_if_exists(&previous, self.is_dir).await,
            None => Ok(()),
        }
    }

    /// Put back whatever was at the target before the commit.
    pub async fn rollback(self) -> io::Result<()> {
        match self.previous {
            Some(previous) if !self.is_dir => fs::rename(&previous, &self.target).await,
            Some(previous) => {
                remove_if_exists(&self.target, true).await?;
                fs::rename(&previous, &self.target).await
            }
            None => remove_if_exists(&self.target, self.is_dir).await,
        }
    }
}

fn file_stem(video_id: &str) -> &str {
    Path::new(video_id)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or(video_id)
}

async fn remove_if_exists(path: &Path, dir: bool) -> io::Result<()> {
    let result = if dir {
        fs::remove_dir_all(path).await
    } else {
        fs::remove_file(path).await
    };

    match result {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::transcode::model::{Bitrate, Resolution};

    fn request(format: OutputFormat) -> TranscodeRequest {
        TranscodeRequest {
            format,
            resolution: Resolution::P720,
            bitrate: Bitrate::K2000,
        }
    }

    #[test]
    fn mp4_layout_is_named_after_resolution() {
        let storage = MediaStorage::new("/u", "/t");
        let layout = storage.layout("clip.mov", &request(OutputFormat::Mp4));
        assert_eq!(layout.output_name, "clip_720p.mp4");
        assert_eq!(layout.target, "clip.mov/clip_720p.mp4");
        assert_eq!(layout.primary_path(OutputFormat::Mp4), "clip.mov/clip_720p.mp4");
    }

    #[test]
    fn ladder_layouts_live_in_their_own_directory() {
        let storage = MediaStorage::new("/u", "/t");
        let hls = storage.layout("clip.mp4", &request(OutputFormat::Hls));
        assert_eq!(hls.primary_path(OutputFormat::Hls), "clip.mp4/hls_720p/playlist.m3u8");
        let dash = storage.layout("clip.mp4", &request(OutputFormat::Dash));
        assert_eq!(dash.primary_path(OutputFormat::Dash), "clip.mp4/dash_720p/manifest.mpd");
    }

    #[test]
    fn urls_percent_encode_each_segment() {
        let storage = MediaStorage::new("/u", "/t");
        assert_eq!(storage.source_url("my clip.mp4"), "/videos/my%20clip.mp4");
        assert_eq!(
            storage.rendition_url("my clip.mp4/my clip_720p.mp4"),
            "/transcoded/my%20clip.mp4/my%20clip_720p.mp4"
        );
    }

    async fn storage() -> (tempfile::TempDir, MediaStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = MediaStorage::new(dir.path().join("u"), dir.path().join("t"));
        storage.init().await.unwrap();
        (dir, storage)
    }

    async fn stage(storage: &MediaStorage, job_id: JobId, layout: &OutputLayout, format: OutputFormat, body: &str) -> PathBuf {
        let staging = storage.staging_dir(job_id);
        fs::create_dir_all(&staging).await.unwrap();
        fs::write(staging.join(&layout.output_name), body).await.unwrap();
        if format != OutputFormat::Mp4 {
            fs::write(staging.join("segment_000.ts"), b"ts").await.unwrap();
        }
        staging
    }

    #[tokio::test]
    async fn commit_replaces_previous_ladder() {
        let (_dir, storage) = storage().await;
        let req = request(OutputFormat::Hls);
        let layout = storage.layout("v1", &req);

        for (job_id, body) in [(1, "first"), (2, "second")] {
            let staging = stage(&storage, job_id, &layout, req.format, body).await;
            let pending = storage.commit(&staging, &layout, req.format).await.unwrap();
            pending.finalize().await.unwrap();
            assert!(!fs::try_exists(&staging).await.unwrap());
            assert!(!fs::try_exists(staging.with_extension("old")).await.unwrap());
        }

        let manifest = storage.transcoded_dir.join(layout.primary_path(req.format));
        assert_eq!(fs::read_to_string(manifest).await.unwrap(), "second");
    }

    #[tokio::test]
    async fn rollback_restores_the_previous_artifact() {
        let (_dir, storage) = storage().await;

        for format in [OutputFormat::Mp4, OutputFormat::Dash] {
            let req = request(format);
            let layout = storage.layout("v1", &req);
            let primary = storage.transcoded_dir.join(layout.primary_path(format));

            let staging = stage(&storage, 1, &layout, format, "old").await;
            storage.commit(&staging, &layout, format).await.unwrap().finalize().await.unwrap();

            let staging = stage(&storage, 2, &layout, format, "new").await;
            let pending = storage.commit(&staging, &layout, format).await.unwrap();
            assert_eq!(fs::read_to_string(&primary).await.unwrap(), "new");

            pending.rollback().await.unwrap();
            assert_eq!(fs::read_to_string(&primary).await.unwrap(), "old", "{format}");
            assert!(!fs::try_exists(staging.with_extension("old")).await.unwrap());
        }
    }

    #[tokio::test]
    async fn rollback_of_a_first_commit_leaves_nothing() {
        let (_dir, storage) = storage().await;

        for format in [OutputFormat::Mp4, OutputFormat::Hls] {
            let req = request(format);
            let layout = storage.layout("v2", &req);
            let staging = stage(&storage, 3, &layout, format, "only").await;

            let pending = storage.commit(&staging, &layout, format).await.unwrap();
            let target = pending.target().to_path_buf();
            assert!(fs::try_exists(&target).await.unwrap());

            pending.rollback().await.unwrap();
            assert!(!fs::try_exists(&target).await.unwrap());
        }
    }

    #[tokio::test]
    async fn init_clears_stale_staging() {
        let dir = tempfile::tempdir().unwrap();
        let storage = MediaStorage::new(dir.path().join("u"), dir.path().join("t"));
        let stale = storage.staging_dir(7);
        fs::create_dir_all(&stale).await.unwrap();
        fs::write(stale.join("partial.mp4"), b"half").await.unwrap();

        storage.init().await.unwrap();
        assert!(!fs::try_exists(&stale).await.unwrap());
    }
}
