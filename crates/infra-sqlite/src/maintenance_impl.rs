// SQLite Maintenance Implementation
use crate::error::map_sqlx_error;
use apihub_core::error::{AppError, Result};
use apihub_core::port::{Maintenance, MaintenanceStats, TimeProvider};
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

/// SQLite maintenance implementation
pub struct SqliteMaintenance {
    pool: SqlitePool,
    time_provider: Arc<dyn TimeProvider>,
}

impl SqliteMaintenance {
    pub fn new(pool: SqlitePool, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            pool,
            time_provider,
        }
    }

    /// Get DB file size in MB
    async fn get_db_size(&self) -> Result<f64> {
        let page_count: i64 = sqlx::query_scalar("PRAGMA page_count")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to get page count: {}", e)))?;

        let page_size: i64 = sqlx::query_scalar("PRAGMA page_size")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to get page size: {}", e)))?;

        Ok((page_count * page_size) as f64 / (1024.0 * 1024.0))
    }

    async fn count(&self, sql: &str) -> Result<i64> {
        sqlx::query_scalar(sql)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }
}

#[async_trait]
impl Maintenance for SqliteMaintenance {
    async fn vacuum(&self) -> Result<f64> {
        info!("Running VACUUM to optimize database...");

        let size_before = self.get_db_size().await?;

        sqlx::query("VACUUM")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Internal(format!("VACUUM failed: {}", e)))?;

        let size_after = self.get_db_size().await?;
        let reclaimed = (size_before - size_after).max(0.0);

        info!(
            size_before_mb = size_before,
            size_after_mb = size_after,
            reclaimed_mb = reclaimed,
            "VACUUM completed"
        );

        Ok(reclaimed)
    }

    async fn prune_finished_jobs(&self, before_millis: i64) -> Result<u64> {
        let now = self.time_provider.now_millis();
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        sqlx::query(
            r#"
            INSERT INTO pruned_jobs (id, pruned_at)
            SELECT id, ? FROM jobs
            WHERE status IN ('complete', 'error')
              AND finished_at IS NOT NULL AND finished_at < ?
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(now)
        .bind(before_millis)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let deleted = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE status IN ('complete', 'error')
              AND finished_at IS NOT NULL AND finished_at < ?
            "#,
        )
        .bind(before_millis)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?
        .rows_affected();

        tx.commit().await.map_err(map_sqlx_error)?;

        info!(deleted_jobs = deleted, cutoff = before_millis, "Finished job prune completed");
        Ok(deleted)
    }

    async fn referenced_artifacts(&self) -> Result<HashSet<String>> {
        let keys: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT sources_ref FROM jobs WHERE sources_ref IS NOT NULL
            UNION SELECT result_ref FROM jobs WHERE result_ref IS NOT NULL
            UNION SELECT hash FROM documents
            UNION SELECT artifact_ref FROM comparisons
            UNION SELECT artifact_ref FROM transformed_documents
            UNION SELECT template_ref FROM operation_groups WHERE template_ref IS NOT NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(keys.into_iter().collect())
    }

    async fn get_stats(&self) -> Result<MaintenanceStats> {
        Ok(MaintenanceStats {
            db_size_mb: self.get_db_size().await?,
            job_count: self.count("SELECT COUNT(*) FROM jobs").await?,
            finished_job_count: self
                .count("SELECT COUNT(*) FROM jobs WHERE status IN ('complete', 'error')")
                .await?,
            pruned_job_count: self.count("SELECT COUNT(*) FROM pruned_jobs").await?,
            deleted_artifacts: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{memory_pool, publish_config};
    use crate::SqliteJobRepository;
    use apihub_core::domain::Job;
    use apihub_core::port::time_provider::mocks::MockTimeProvider;
    use apihub_core::port::JobRepository;

    const DAY_MS: i64 = 24 * 60 * 60 * 1000;

    #[tokio::test]
    async fn test_maintenance_stats() {
        let pool = memory_pool().await;
        let maintenance = SqliteMaintenance::new(pool, Arc::new(MockTimeProvider::new(0)));

        let stats = maintenance.get_stats().await.unwrap();
        assert!(stats.db_size_mb > 0.0);
        assert_eq!(stats.job_count, 0);
        assert_eq!(stats.finished_job_count, 0);
    }

    #[tokio::test]
    async fn test_vacuum() {
        let pool = memory_pool().await;
        let maintenance = SqliteMaintenance::new(pool, Arc::new(MockTimeProvider::new(0)));

        let reclaimed = maintenance.vacuum().await.unwrap();
        assert!(reclaimed >= 0.0);
    }

    #[tokio::test]
    async fn test_prune_records_ledger() {
        let pool = memory_pool().await;
        let now = 40 * DAY_MS;
        let jobs = SqliteJobRepository::new(pool.clone());
        let maintenance = SqliteMaintenance::new(pool, Arc::new(MockTimeProvider::new(now)));

        jobs.insert(&Job::new("old", 0, publish_config("pkg", "v1"), "fp1"))
            .await
            .unwrap();
        jobs.insert(&Job::new("fresh", 0, publish_config("pkg", "v2"), "fp2"))
            .await
            .unwrap();
        jobs.insert(&Job::new("queued", 0, publish_config("pkg", "v3"), "fp3"))
            .await
            .unwrap();
        jobs.mark_error("old", "boom", DAY_MS).await.unwrap();
        jobs.mark_error("fresh", "boom", now - DAY_MS).await.unwrap();

        let deleted = maintenance.prune_finished_jobs(now - 30 * DAY_MS).await.unwrap();
        assert_eq!(deleted, 1);
        assert!(jobs.find_by_id("old").await.unwrap().is_none());
        assert!(jobs.is_pruned("old").await.unwrap());
        assert!(!jobs.is_pruned("fresh").await.unwrap());
        assert!(jobs.find_by_id("queued").await.unwrap().is_some());

        let stats = maintenance.get_stats().await.unwrap();
        assert_eq!(stats.job_count, 2);
        assert_eq!(stats.pruned_job_count, 1);
    }

    #[tokio::test]
    async fn test_referenced_artifacts() {
        let pool = memory_pool().await;
        let jobs = SqliteJobRepository::new(pool.clone());
        let maintenance = SqliteMaintenance::new(pool, Arc::new(MockTimeProvider::new(0)));

        jobs.insert(
            &Job::new("b1", 0, publish_config("pkg", "v1"), "fp1")
                .with_sources(Some("src-key".into())),
        )
        .await
        .unwrap();

        let referenced = maintenance.referenced_artifacts().await.unwrap();
        assert!(referenced.contains("src-key"));
        assert_eq!(referenced.len(), 1);
    }
}
