// SQLite JobRepository Implementation

use crate::error::{from_json, map_sqlx_error};
use apihub_core::domain::job::bound_details;
use apihub_core::domain::{BuildConfig, BuildId, BuildStatus, Job, VersionStatus};
use apihub_core::error::{AppError, Result};
use apihub_core::port::JobRepository;
use async_trait::async_trait;
use sqlx::SqlitePool;

pub struct SqliteJobRepository {
    pool: SqlitePool,
}

impl SqliteJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Claim the oldest `notStarted` job matching `filter` in one statement
    async fn claim_where(
        &self,
        filter: &str,
        owner: &str,
        builder_id: Option<&str>,
        now_millis: i64,
    ) -> Result<Option<Job>> {
        let sql = format!(
            r#"
            UPDATE jobs
            SET status = 'running', owner_builder_id = ?, started_at = ?
            WHERE id = (
                SELECT id FROM jobs
                WHERE status = 'notStarted' AND {}
                ORDER BY created_at ASC, id ASC
                LIMIT 1
            )
            AND status = 'notStarted'
            RETURNING *
            "#,
            filter
        );
        let mut query = sqlx::query_as::<_, JobRow>(&sql).bind(owner).bind(now_millis);
        if let Some(builder_id) = builder_id {
            query = query.bind(builder_id);
        }
        let row = query
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        row.map(JobRow::into_job).transpose()
    }
}

#[async_trait]
impl JobRepository for SqliteJobRepository {
    async fn insert(&self, job: &Job) -> Result<()> {
        let config = serde_json::to_string(&job.config)?;
        let statuses = serde_json::to_string(&job.available_statuses)?;

        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, build_type, package_id, version, config, fingerprint,
                status, details, owner_builder_id, requested_builder_id, client_build,
                created_by, created_at, started_at, finished_at, deadline,
                sources_ref, result_ref, available_statuses
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(job.config.build_type().as_str())
        .bind(job.config.package_id())
        .bind(job.config.version())
        .bind(&config)
        .bind(&job.fingerprint)
        .bind(job.status.as_str())
        .bind(&job.details)
        .bind(&job.owner_builder_id)
        .bind(&job.requested_builder_id)
        .bind(if job.client_build { 1 } else { 0 })
        .bind(&job.created_by)
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.finished_at)
        .bind(job.deadline)
        .bind(&job.sources_ref)
        .bind(&job.result_ref)
        .bind(&statuses)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(JobRow::into_job).transpose()
    }

    async fn find_by_ids(&self, ids: &[BuildId]) -> Result<Vec<Job>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT * FROM jobs WHERE id IN ({}) ORDER BY created_at ASC",
            placeholders
        );
        let mut query = sqlx::query_as::<_, JobRow>(&sql);
        for id in ids {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.pool).await.map_err(map_sqlx_error)?;
        rows.into_iter().map(JobRow::into_job).collect()
    }

    async fn find_active_by_fingerprint(&self, fingerprint: &str) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT * FROM jobs
            WHERE fingerprint = ? AND status IN ('notStarted', 'running')
            LIMIT 1
            "#,
        )
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.map(JobRow::into_job).transpose()
    }

    async fn find_latest_by_fingerprint(&self, fingerprint: &str) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT * FROM jobs
            WHERE fingerprint = ?
            ORDER BY created_at DESC, rowid DESC
            LIMIT 1
            "#,
        )
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.map(JobRow::into_job).transpose()
    }

    async fn claim_internal(&self, owner: &str, now_millis: i64) -> Result<Option<Job>> {
        self.claim_where("client_build = 0 AND owner_builder_id IS NULL", owner, None, now_millis)
            .await
    }

    async fn claim_for_builder(&self, builder_id: &str, now_millis: i64) -> Result<Option<Job>> {
        self.claim_where(
            "client_build = 1 AND (requested_builder_id IS NULL OR requested_builder_id = ?)",
            builder_id,
            Some(builder_id),
            now_millis,
        )
        .await
    }

    async fn mark_complete(
        &self,
        id: &str,
        result_ref: Option<&str>,
        now_millis: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'complete', result_ref = ?, finished_at = ?
            WHERE id = ? AND status = 'running'
            "#,
        )
        .bind(result_ref)
        .bind(now_millis)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_error(&self, id: &str, details: &str, now_millis: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'error', details = ?, finished_at = ?
            WHERE id = ? AND status IN ('notStarted', 'running')
            "#,
        )
        .bind(bound_details(details))
        .bind(now_millis)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn fail_overdue(&self, details: &str, now_millis: i64) -> Result<Vec<BuildId>> {
        sqlx::query_scalar(
            r#"
            UPDATE jobs
            SET status = 'error', details = ?, finished_at = ?
            WHERE status IN ('notStarted', 'running')
              AND deadline IS NOT NULL AND deadline <= ?
            RETURNING id
            "#,
        )
        .bind(bound_details(details))
        .bind(now_millis)
        .bind(now_millis)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)
    }

    async fn fail_running_owned_by(
        &self,
        owner: &str,
        details: &str,
        now_millis: i64,
    ) -> Result<Vec<BuildId>> {
        sqlx::query_scalar(
            r#"
            UPDATE jobs
            SET status = 'error', details = ?, finished_at = ?
            WHERE status = 'running' AND owner_builder_id = ?
            RETURNING id
            "#,
        )
        .bind(bound_details(details))
        .bind(now_millis)
        .bind(owner)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)
    }

    async fn count_by_status(&self, status: BuildStatus) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }

    async fn is_pruned(&self, id: &str) -> Result<bool> {
        let found: Option<String> = sqlx::query_scalar("SELECT id FROM pruned_jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(found.is_some())
    }
}

/// SQLite row representation
#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: String,
    config: String,
    fingerprint: String,
    status: String,
    details: Option<String>,
    owner_builder_id: Option<String>,
    requested_builder_id: Option<String>,
    client_build: i64, // SQLite boolean as integer
    created_by: String,
    created_at: i64,
    started_at: Option<i64>,
    finished_at: Option<i64>,
    deadline: Option<i64>,
    sources_ref: Option<String>,
    result_ref: Option<String>,
    available_statuses: String,
}

impl JobRow {
    fn into_job(self) -> Result<Job> {
        let status = BuildStatus::parse(&self.status).ok_or_else(|| {
            AppError::Database(format!("Unknown status '{}' for job {}", self.status, self.id))
        })?;
        let config: BuildConfig = from_json("config", &self.config)?;
        let available_statuses: Vec<VersionStatus> =
            from_json("available_statuses", &self.available_statuses)?;

        Ok(Job {
            id: self.id,
            config,
            fingerprint: self.fingerprint,
            status,
            details: self.details,
            owner_builder_id: self.owner_builder_id,
            requested_builder_id: self.requested_builder_id,
            client_build: self.client_build != 0,
            created_by: self.created_by,
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            deadline: self.deadline,
            sources_ref: self.sources_ref,
            result_ref: self.result_ref,
            available_statuses,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{memory_pool, publish_config};

    async fn setup() -> SqliteJobRepository {
        SqliteJobRepository::new(memory_pool().await)
    }

    fn job(id: &str, fingerprint: &str, created_at: i64) -> Job {
        Job::new(id, created_at, publish_config("pkg", id), fingerprint)
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let repo = setup().await;
        let job = job("b1", "fp1", 10)
            .with_deadline(Some(99))
            .with_available_statuses(vec![VersionStatus::Draft]);
        repo.insert(&job).await.unwrap();

        let found = repo.find_by_id("b1").await.unwrap().unwrap();
        assert_eq!(found.id, "b1");
        assert_eq!(found.status, BuildStatus::NotStarted);
        assert_eq!(found.deadline, Some(99));
        assert_eq!(found.config.package_id(), "pkg");
        assert_eq!(found.available_statuses, vec![VersionStatus::Draft]);
        assert!(repo.find_by_id("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fingerprint_gate() {
        let repo = setup().await;
        repo.insert(&job("b1", "fp", 10)).await.unwrap();

        let err = repo.insert(&job("b2", "fp", 11)).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        // Terminal jobs release the fingerprint
        assert!(repo.mark_error("b1", "boom", 20).await.unwrap());
        repo.insert(&job("b3", "fp", 30)).await.unwrap();
        assert_eq!(
            repo.find_active_by_fingerprint("fp").await.unwrap().unwrap().id,
            "b3"
        );
        assert_eq!(
            repo.find_latest_by_fingerprint("fp").await.unwrap().unwrap().id,
            "b3"
        );
    }

    #[tokio::test]
    async fn test_claim_internal_oldest_first() {
        let repo = setup().await;
        repo.insert(&job("late", "fp2", 20)).await.unwrap();
        repo.insert(&job("early", "fp1", 10)).await.unwrap();
        repo.insert(&job("client", "fp3", 5).for_builder("builder-a"))
            .await
            .unwrap();

        let claimed = repo.claim_internal("internal:x", 100).await.unwrap().unwrap();
        assert_eq!(claimed.id, "early");
        assert_eq!(claimed.status, BuildStatus::Running);
        assert_eq!(claimed.owner_builder_id.as_deref(), Some("internal:x"));
        assert_eq!(claimed.started_at, Some(100));

        assert_eq!(
            repo.claim_internal("internal:x", 101).await.unwrap().unwrap().id,
            "late"
        );
        assert!(repo.claim_internal("internal:x", 102).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_for_builder_respects_reservation() {
        let repo = setup().await;
        repo.insert(&job("for-b", "fp1", 10).for_builder("builder-b"))
            .await
            .unwrap();
        let mut open = job("open", "fp2", 20);
        open.client_build = true;
        repo.insert(&open).await.unwrap();

        let claimed = repo.claim_for_builder("builder-a", 30).await.unwrap().unwrap();
        assert_eq!(claimed.id, "open");
        assert!(repo.claim_for_builder("builder-a", 31).await.unwrap().is_none());
        let claimed = repo.claim_for_builder("builder-b", 32).await.unwrap().unwrap();
        assert_eq!(claimed.id, "for-b");
    }

    #[tokio::test]
    async fn test_completion_is_cas() {
        let repo = setup().await;
        repo.insert(&job("b1", "fp", 10)).await.unwrap();
        // Not running yet
        assert!(!repo.mark_complete("b1", Some("ref"), 20).await.unwrap());

        repo.claim_internal("internal:x", 15).await.unwrap().unwrap();
        assert!(repo.mark_complete("b1", Some("ref"), 20).await.unwrap());
        assert!(!repo.mark_complete("b1", Some("ref"), 21).await.unwrap());
        assert!(!repo.mark_error("b1", "late", 22).await.unwrap());

        let done = repo.find_by_id("b1").await.unwrap().unwrap();
        assert_eq!(done.status, BuildStatus::Complete);
        assert_eq!(done.result_ref.as_deref(), Some("ref"));
        assert_eq!(repo.count_by_status(BuildStatus::Complete).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_fail_overdue_and_owned() {
        let repo = setup().await;
        repo.insert(&job("late", "fp1", 10).with_deadline(Some(50)))
            .await
            .unwrap();
        repo.insert(&job("open", "fp2", 11)).await.unwrap();
        repo.claim_internal("internal:a", 12).await.unwrap();
        repo.claim_internal("internal:b", 13).await.unwrap();

        let failed = repo.fail_overdue("timeout", 100).await.unwrap();
        assert_eq!(failed, vec!["late".to_string()]);

        let failed = repo
            .fail_running_owned_by("internal:b", "restarted", 100)
            .await
            .unwrap();
        assert_eq!(failed, vec!["open".to_string()]);
        let open = repo.find_by_id("open").await.unwrap().unwrap();
        assert_eq!(open.details.as_deref(), Some("restarted"));
    }

    #[tokio::test]
    async fn test_find_by_ids_skips_missing() {
        let repo = setup().await;
        repo.insert(&job("a", "fp1", 10)).await.unwrap();
        repo.insert(&job("b", "fp2", 11)).await.unwrap();
        let found = repo
            .find_by_ids(&["b".to_string(), "zzz".to_string(), "a".to_string()])
            .await
            .unwrap();
        let ids: Vec<_> = found.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(repo.find_by_ids(&[]).await.unwrap().is_empty());
    }
}
