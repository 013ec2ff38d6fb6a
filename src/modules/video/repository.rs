use super::model::Video;
use crate::infrastructure::db::pool::DbPool;
use time::OffsetDateTime;

pub struct VideoRepository;

impl VideoRepository {
    pub async fn create(
        pool: &DbPool,
        id: &str,
        name: &str,
        source_file: &str,
        size_bytes: i64,
    ) -> Result<Video, sqlx::Error> {
        let video = sqlx::query_as::<_, Video>(
            r#"
            INSERT INTO videos (id, name, source_file, size_bytes, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            RETURNING id, name, source_file, size_bytes, created_at
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(source_file)
        .bind(size_bytes)
        .bind(OffsetDateTime::now_utc())
        .fetch_one(pool)
        .await?;

        Ok(video)
    }

    pub async fn find_by_id(pool: &DbPool, id: &str) -> Result<Option<Video>, sqlx::Error> {
        sqlx::query_as::<_, Video>(
            "SELECT id, name, source_file, size_bytes, created_at FROM videos WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn list(pool: &DbPool) -> Result<Vec<Video>, sqlx::Error> {
        sqlx::query_as::<_, Video>(
            "SELECT id, name, source_file, size_bytes, created_at FROM videos ORDER BY created_at DESC, id ASC",
        )
        .fetch_all(pool)
        .await
    }

    /// Deletes the video row; jobs and renditions go with it.
    pub async fn delete(pool: &DbPool, id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM videos WHERE id = ?1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
