use time::OffsetDateTime;

use super::model::{Job, JobId, JobRow, NewRendition, Rendition, RenditionRow, TranscodeRequest};
use crate::common::error::{ErrorKind, ServiceError, ServiceResult};
use crate::infrastructure::db::pool::DbPool;

const JOB_COLUMNS: &str = "id, video_id, format, resolution, bitrate, status, error_kind, \
                           error_detail, rendition_id, created_at, started_at, finished_at";

/// Durable record of transcode jobs and the renditions they produced.
pub struct JobRepository;

fn into_job(row: JobRow) -> ServiceResult<Job> {
    Job::try_from(row).map_err(ServiceError::storage)
}

impl JobRepository {
    /// Insert a queued job. The partial unique index turns a second active
    /// job for the same video into `JobAlreadyActive`.
    pub async fn create(pool: &DbPool, video_id: &str, request: &TranscodeRequest) -> ServiceResult<Job> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            INSERT INTO transcode_jobs (video_id, format, resolution, bitrate, status, created_at)
            VALUES (?1, ?2, ?3, ?4, 'queued', ?5)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(video_id)
        .bind(request.format.as_str())
        .bind(i64::from(request.resolution.height()))
        .bind(request.bitrate.as_str())
        .bind(OffsetDateTime::now_utc())
        .fetch_one(pool)
        .await;

        match row {
            Ok(row) => into_job(row),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                let job_id = Self::find_active_by_video(pool, video_id)
                    .await?
                    .map(|j| j.id)
                    .unwrap_or_default();
                Err(ServiceError::JobAlreadyActive {
                    video_id: video_id.to_string(),
                    job_id,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn find_by_id(pool: &DbPool, id: JobId) -> ServiceResult<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM transcode_jobs WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await?;

        row.map(into_job).transpose()
    }

    pub async fn find_active_by_video(pool: &DbPool, video_id: &str) -> ServiceResult<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM transcode_jobs \
             WHERE video_id = ?1 AND status IN ('queued', 'running') \
             ORDER BY id DESC LIMIT 1"
        ))
        .bind(video_id)
        .fetch_optional(pool)
        .await?;

        row.map(into_job).transpose()
    }

    /// Most recently submitted job for a video, whatever its state.
    pub async fn latest_by_video(pool: &DbPool, video_id: &str) -> ServiceResult<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM transcode_jobs WHERE video_id = ?1 ORDER BY id DESC LIMIT 1"
        ))
        .bind(video_id)
        .fetch_optional(pool)
        .await?;

        row.map(into_job).transpose()
    }

    /// `queued -> running`. Returns false if the job was not queued.
    pub async fn mark_running(pool: &DbPool, id: JobId) -> ServiceResult<bool> {
        let result = sqlx::query(
            "UPDATE transcode_jobs SET status = 'running', started_at = ?2 \
             WHERE id = ?1 AND status = 'queued'",
        )
        .bind(id)
        .bind(OffsetDateTime::now_utc())
        .execute(pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// `running -> succeeded`, recording the rendition in the same transaction.
    pub async fn complete(pool: &DbPool, id: JobId, rendition: &NewRendition) -> ServiceResult<Rendition> {
        let files = serde_json::to_string(&rendition.files)
            .map_err(|e| ServiceError::storage(e.to_string()))?;
        let now = OffsetDateTime::now_utc();
        let mut tx = pool.begin().await?;

        // Write first so the transaction takes the write lock up front.
        let video_id: Option<String> = sqlx::query_scalar(
            "UPDATE transcode_jobs SET status = 'succeeded', finished_at = ?2 \
             WHERE id = ?1 AND status = 'running' RETURNING video_id",
        )
        .bind(id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;
        let video_id = video_id
            .ok_or_else(|| ServiceError::storage(format!("job {} is not running", id)))?;

        let row = sqlx::query_as::<_, RenditionRow>(
            r#"
            INSERT INTO renditions (video_id, job_id, kind, resolution, path, files, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT (video_id, kind, path) DO UPDATE SET
                job_id = excluded.job_id,
                resolution = excluded.resolution,
                files = excluded.files,
                created_at = excluded.created_at
            RETURNING id, video_id, job_id, kind, resolution, path, files
            "#,
        )
        .bind(&video_id)
        .bind(id)
        .bind(rendition.kind.as_str())
        .bind(&rendition.resolution)
        .bind(&rendition.path)
        .bind(files)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE transcode_jobs SET rendition_id = ?2 WHERE id = ?1")
            .bind(id)
            .bind(row.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Rendition::try_from(row).map_err(ServiceError::storage)
    }

    /// Move an active job to `failed`. Terminal jobs are left untouched.
    pub async fn fail(pool: &DbPool, id: JobId, kind: ErrorKind, detail: &str) -> ServiceResult<bool> {
        let result = sqlx::query(
            "UPDATE transcode_jobs SET status = 'failed', error_kind = ?2, error_detail = ?3, finished_at = ?4 \
             WHERE id = ?1 AND status IN ('queued', 'running')",
        )
        .bind(id)
        .bind(kind.as_str())
        .bind(detail)
        .bind(OffsetDateTime::now_utc())
        .execute(pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Fail every job a previous process left queued or running.
    pub async fn fail_interrupted(pool: &DbPool) -> ServiceResult<u64> {
        let result = sqlx::query(
            "UPDATE transcode_jobs SET status = 'failed', error_kind = ?1, \
             error_detail = 'server restarted before the job finished', finished_at = ?2 \
             WHERE status IN ('queued', 'running')",
        )
        .bind(ErrorKind::Interrupted.as_str())
        .bind(OffsetDateTime::now_utc())
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Renditions of a video in the order they were first produced.
    pub async fn list_renditions(pool: &DbPool, video_id: &str) -> ServiceResult<Vec<Rendition>> {
        let rows = sqlx::query_as::<_, RenditionRow>(
            "SELECT id, video_id, job_id, kind, resolution, path, files FROM renditions \
             WHERE video_id = ?1 ORDER BY id ASC",
        )
        .bind(video_id)
        .fetch_all(pool)
        .await?;

        rows.into_iter()
            .map(|row| Rendition::try_from(row).map_err(ServiceError::storage))
            .collect()
    }
}
