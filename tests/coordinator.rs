mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use backend::common::error::{ErrorKind, ServiceError, ServiceResult};
use backend::modules::transcode::model::{Bitrate, JobStatus, OutputFormat, Resolution, TranscodeRequest};
use backend::modules::transcode::progress::ProgressReporter;
use backend::modules::transcode::repository::JobRepository;
use backend::workers::encoder::{EncodeTask, EncodeWorker, Encoder};
use common::{transcode_config, FakeEncoder, Harness};

/// Writes a fixed body as the primary output, plus one segment for ladders.
struct WritesBody(&'static [u8]);

#[async_trait]
impl Encoder for WritesBody {
    async fn encode(&self, task: &EncodeTask, _progress: ProgressReporter) -> ServiceResult<()> {
        tokio::fs::write(&task.output, self.0).await?;
        if task.request.format != OutputFormat::Mp4 {
            tokio::fs::write(task.output_dir().join("segment_000.ts"), b"segment").await?;
        }
        Ok(())
    }
}

fn request(format: OutputFormat, resolution: Resolution) -> TranscodeRequest {
    TranscodeRequest {
        format,
        resolution,
        bitrate: Bitrate::K2000,
    }
}

#[tokio::test]
async fn mp4_job_runs_to_completion_and_shows_in_the_manifest() {
    let h = Harness::new(FakeEncoder::Succeed).await;
    h.add_video("v1").await;

    let job = h
        .coordinator()
        .submit("v1", request(OutputFormat::Mp4, Resolution::P720))
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Queued);

    let done = h.wait_terminal(job.id).await;
    assert_eq!(done.status, JobStatus::Succeeded);
    assert!(done.rendition_id.is_some());
    assert!(done.started_at.is_some() && done.finished_at.is_some());

    let progress = h.coordinator().progress("v1").await.unwrap();
    assert_eq!(progress.progress, 100);

    let manifest = h.coordinator().manifest("v1").await.unwrap();
    assert!(manifest.has_mp4);
    assert_eq!(manifest.mp4_versions.len(), 1);
    assert!(manifest.mp4_versions[0].ends_with("_720p.mp4"));
    assert!(!manifest.has_hls && !manifest.has_dash);
}

#[tokio::test]
async fn second_submit_while_active_is_rejected() {
    let gate = Arc::new(Semaphore::new(0));
    let h = Harness::new(FakeEncoder::Gated(gate.clone())).await;
    h.add_video("v1").await;

    let first = h
        .coordinator()
        .submit("v1", request(OutputFormat::Mp4, Resolution::P720))
        .await
        .unwrap();
    let err = h
        .coordinator()
        .submit("v1", request(OutputFormat::Hls, Resolution::P480))
        .await
        .unwrap_err();
    match err {
        ServiceError::JobAlreadyActive { job_id, .. } => assert_eq!(job_id, first.id),
        other => panic!("unexpected error: {other:?}"),
    }

    gate.add_permits(1);
    assert_eq!(h.wait_terminal(first.id).await.status, JobStatus::Succeeded);

    // The video is free again once the job is terminal.
    let next = h
        .coordinator()
        .submit("v1", request(OutputFormat::Hls, Resolution::P480))
        .await
        .unwrap();
    gate.add_permits(1);
    assert_eq!(h.wait_terminal(next.id).await.status, JobStatus::Succeeded);
    assert!(h.coordinator().manifest("v1").await.unwrap().has_hls);
}

#[tokio::test]
async fn concurrent_submits_admit_exactly_one_job_per_video() {
    let gate = Arc::new(Semaphore::new(0));
    let h = Harness::with_config(FakeEncoder::Gated(gate.clone()), transcode_config(2, 32, 60)).await;
    h.add_video("v1").await;
    h.add_video("v2").await;

    let mut tasks = Vec::new();
    for i in 0..20 {
        let coordinator = h.state.coordinator.clone();
        let video = if i % 2 == 0 { "v1" } else { "v2" };
        tasks.push(tokio::spawn(async move {
            coordinator
                .submit(video, request(OutputFormat::Mp4, Resolution::P360))
                .await
        }));
    }

    let mut accepted = Vec::new();
    for task in tasks {
        match task.await.unwrap() {
            Ok(job) => accepted.push(job),
            Err(ServiceError::JobAlreadyActive { .. }) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    assert_eq!(accepted.len(), 2);
    assert!(accepted.iter().any(|j| j.video_id == "v1"));
    assert!(accepted.iter().any(|j| j.video_id == "v2"));

    gate.add_permits(2);
    for job in &accepted {
        assert_eq!(h.wait_terminal(job.id).await.status, JobStatus::Succeeded);
    }
}

#[tokio::test]
async fn progress_never_goes_backwards() {
    let gate = Arc::new(Semaphore::new(0));
    let h = Harness::new(FakeEncoder::Gated(gate.clone())).await;
    h.add_video("v1").await;

    let job = h
        .coordinator()
        .submit("v1", request(OutputFormat::Mp4, Resolution::P720))
        .await
        .unwrap();

    let mut readings = Vec::new();
    readings.push(h.coordinator().progress("v1").await.unwrap().progress);
    gate.add_permits(1);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let p = h.coordinator().progress("v1").await.unwrap();
        readings.push(p.progress);
        if p.status == JobStatus::Succeeded {
            break;
        }
        assert!(p.progress <= 99, "running job reported {}", p.progress);
        assert!(tokio::time::Instant::now() < deadline);
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    assert!(readings.windows(2).all(|w| w[0] <= w[1]), "{readings:?}");
    assert_eq!(readings.last(), Some(&100));
    assert_eq!(h.wait_terminal(job.id).await.status, JobStatus::Succeeded);
}

#[tokio::test]
async fn encoder_failure_leaves_the_manifest_unchanged() {
    let h = Harness::new(FakeEncoder::Fail).await;
    h.add_video("v1").await;
    let before = h.coordinator().manifest("v1").await.unwrap();

    let job = h
        .coordinator()
        .submit("v1", request(OutputFormat::Hls, Resolution::P720))
        .await
        .unwrap();
    let done = h.wait_terminal(job.id).await;

    assert_eq!(done.status, JobStatus::Failed);
    assert_eq!(done.error_kind, Some(ErrorKind::EncodeFailure));
    assert!(done.error_detail.unwrap().contains("Invalid data"));
    assert!(done.rendition_id.is_none());
    assert_eq!(h.coordinator().manifest("v1").await.unwrap(), before);
    assert!(!h.state.storage.staging_dir(job.id).exists());

    match h.coordinator().progress("v1").await.unwrap_err() {
        ServiceError::NoActiveJob { last_failure: Some((kind, _)), .. } => {
            assert_eq!(kind, ErrorKind::EncodeFailure)
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn hung_encoder_is_timed_out() {
    let h = Harness::with_config(FakeEncoder::Hang, transcode_config(1, 1, 1)).await;
    h.add_video("v1").await;

    let job = h
        .coordinator()
        .submit("v1", request(OutputFormat::Mp4, Resolution::P240))
        .await
        .unwrap();
    let done = h.wait_terminal(job.id).await;

    assert_eq!(done.status, JobStatus::Failed);
    assert_eq!(done.error_kind, Some(ErrorKind::Timeout));
    assert!(!h.coordinator().manifest("v1").await.unwrap().has_mp4);

    // The permit came back.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while h.coordinator().available_slots() < 2 {
        assert!(tokio::time::Instant::now() < deadline);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn admission_limit_rejects_excess_jobs() {
    let gate = Arc::new(Semaphore::new(0));
    let h = Harness::with_config(FakeEncoder::Gated(gate.clone()), transcode_config(1, 1, 60)).await;
    for id in ["v1", "v2", "v3"] {
        h.add_video(id).await;
    }

    let a = h.coordinator().submit("v1", TranscodeRequest::default()).await.unwrap();
    let b = h.coordinator().submit("v2", TranscodeRequest::default()).await.unwrap();
    let err = h.coordinator().submit("v3", TranscodeRequest::default()).await.unwrap_err();
    assert!(matches!(err, ServiceError::CapacityExceeded));

    // A rejected submission leaves no job behind.
    assert!(JobRepository::latest_by_video(&h.state.db, "v3").await.unwrap().is_none());

    gate.add_permits(2);
    assert_eq!(h.wait_terminal(a.id).await.status, JobStatus::Succeeded);
    assert_eq!(h.wait_terminal(b.id).await.status, JobStatus::Succeeded);
}

#[tokio::test]
async fn unknown_video_is_rejected() {
    let h = Harness::new(FakeEncoder::Succeed).await;
    let err = h
        .coordinator()
        .submit("missing.mp4", TranscodeRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::VideoNotFound(_)));
    assert!(matches!(
        h.coordinator().manifest("missing.mp4").await.unwrap_err(),
        ServiceError::VideoNotFound(_)
    ));
    assert_eq!(h.coordinator().available_slots(), 10);
}

#[tokio::test]
async fn reencoding_a_variant_replaces_it_and_reads_are_stable() {
    let h = Harness::new(FakeEncoder::Succeed).await;
    h.add_video("v1").await;

    for resolution in [Resolution::P720, Resolution::P480, Resolution::P720] {
        let job = h
            .coordinator()
            .submit("v1", request(OutputFormat::Mp4, resolution))
            .await
            .unwrap();
        assert_eq!(h.wait_terminal(job.id).await.status, JobStatus::Succeeded);
    }

    let first = h.coordinator().manifest("v1").await.unwrap();
    let second = h.coordinator().manifest("v1").await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.mp4_versions.len(), 2);
    assert!(first.mp4_versions[0].ends_with("v1_720p.mp4"));
    assert!(first.mp4_versions[1].ends_with("v1_480p.mp4"));
}

#[tokio::test]
async fn job_lookup_reports_missing_ids() {
    let h = Harness::new(FakeEncoder::Succeed).await;
    assert!(matches!(
        h.coordinator().job(4242).await.unwrap_err(),
        ServiceError::JobNotFound(4242)
    ));
}

#[tokio::test]
async fn unrecorded_output_is_rolled_back() {
    let h = Harness::new(FakeEncoder::Succeed).await;
    h.add_video("v1").await;
    h.add_video("v2").await;

    let hls = request(OutputFormat::Hls, Resolution::P720);
    let first = h.coordinator().submit("v1", hls).await.unwrap();
    assert_eq!(h.wait_terminal(first.id).await.status, JobStatus::Succeeded);
    let before = h.coordinator().manifest("v1").await.unwrap();
    let playlist = h
        .state
        .storage
        .transcoded_dir
        .join(h.state.storage.layout("v1", &hls).primary_path(OutputFormat::Hls));
    assert_eq!(tokio::fs::read(&playlist).await.unwrap(), b"encoded");

    let worker = EncodeWorker::new(
        h.state.storage.clone(),
        Arc::new(WritesBody(b"replacement")),
        Duration::from_secs(5),
    );

    for (video_id, req) in [("v1", hls), ("v2", request(OutputFormat::Mp4, Resolution::P480))] {
        // The job leaves the running state before its output is recorded.
        let job = JobRepository::create(&h.state.db, video_id, &req).await.unwrap();
        assert!(h.coordinator().begin(&job).await.unwrap());
        let reporter = ProgressReporter::new(h.coordinator().tracker().clone(), job.id);
        let output = worker
            .run(&job, &h.state.storage.source_path(video_id), reporter)
            .await
            .unwrap();
        let target = h.state.storage.transcoded_dir.join(&output.rendition.path);
        assert!(target.exists());
        JobRepository::fail(&h.state.db, job.id, ErrorKind::Interrupted, "stopped")
            .await
            .unwrap();

        assert!(h.coordinator().complete(&job, output).await.is_err());
        assert_eq!(h.coordinator().job(job.id).await.unwrap().status, JobStatus::Failed);

        if video_id == "v1" {
            assert_eq!(tokio::fs::read(&target).await.unwrap(), b"encoded");
        } else {
            assert!(!target.exists());
        }
    }

    assert_eq!(h.coordinator().manifest("v1").await.unwrap(), before);
    assert!(!h.coordinator().manifest("v2").await.unwrap().has_mp4);
}
