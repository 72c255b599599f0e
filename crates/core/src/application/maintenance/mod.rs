// Maintenance Service
// Job retention, artifact GC and VACUUM on a schedule

use crate::application::executor::ShutdownToken;
use crate::error::Result;
use crate::port::{ArtifactStore, Maintenance, MaintenanceConfig, MaintenanceStats, TimeProvider};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info, warn};

const MILLIS_PER_HOUR: i64 = 3_600_000;
const MILLIS_PER_DAY: i64 = 24 * MILLIS_PER_HOUR;

/// Maintenance scheduler
///
/// Prunes terminal jobs past retention (their ids go to the prune ledger so
/// status lookups answer `buildPruned`), deletes artifacts nothing references
/// and vacuums when the database grows past its limit.
pub struct MaintenanceScheduler {
    maintenance: Arc<dyn Maintenance>,
    artifacts: Arc<dyn ArtifactStore>,
    time: Arc<dyn TimeProvider>,
    config: MaintenanceConfig,
    interval: Duration,
}

impl MaintenanceScheduler {
    pub fn new(
        maintenance: Arc<dyn Maintenance>,
        artifacts: Arc<dyn ArtifactStore>,
        time: Arc<dyn TimeProvider>,
        config: MaintenanceConfig,
        interval: Duration,
    ) -> Self {
        Self {
            maintenance,
            artifacts,
            time,
            config,
            interval,
        }
    }

    /// Run maintenance until shutdown
    pub async fn run(&self, mut shutdown: ShutdownToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            retention_days = self.config.finished_job_retention_days,
            "Maintenance scheduler started"
        );

        let mut tick = interval(self.interval);
        // The first tick completes immediately; skip it so startup stays quick
        tick.tick().await;

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    match self.run_now().await {
                        Ok(stats) => info!(
                            db_size_mb = stats.db_size_mb,
                            job_count = stats.job_count,
                            pruned_jobs = stats.pruned_job_count,
                            deleted_artifacts = stats.deleted_artifacts,
                            "Scheduled maintenance completed"
                        ),
                        Err(e) => error!(error = %e, "Scheduled maintenance failed"),
                    }
                }
                _ = shutdown.wait() => break,
            }
        }
        info!("Maintenance scheduler stopped");
    }

    /// One full pass
    pub async fn run_now(&self) -> Result<MaintenanceStats> {
        let now = self.time.now_millis();
        let pruned = self
            .maintenance
            .prune_finished_jobs(now - self.config.finished_job_retention_days * MILLIS_PER_DAY)
            .await?;
        let deleted = self.collect_artifacts(now).await?;

        let mut stats = self.maintenance.get_stats().await?;
        if stats.db_size_mb > self.config.max_db_size_mb {
            let reclaimed = self.maintenance.vacuum().await?;
            info!(reclaimed_mb = reclaimed, "Database vacuumed");
            stats = self.maintenance.get_stats().await?;
        }
        stats.pruned_job_count = pruned as i64;
        stats.deleted_artifacts = deleted;
        Ok(stats)
    }

    /// Delete unreferenced artifacts older than the grace period
    ///
    /// The grace period covers blobs written by a build whose rows are not
    /// committed yet.
    pub async fn collect_artifacts(&self, now_millis: i64) -> Result<usize> {
        let cutoff = now_millis - self.config.artifact_grace_hours * MILLIS_PER_HOUR;
        let candidates = self.artifacts.list_older_than(cutoff).await?;
        if candidates.is_empty() {
            return Ok(0);
        }
        let referenced = self.maintenance.referenced_artifacts().await?;
        let mut deleted = 0;
        for key in candidates.iter().filter(|k| !referenced.contains(*k)) {
            match self.artifacts.delete(key).await {
                Ok(true) => deleted += 1,
                Ok(false) => {}
                Err(e) => warn!(artifact = %key, error = %e, "Deleting artifact failed"),
            }
        }
        if deleted > 0 {
            info!(deleted, "Unreferenced artifacts deleted");
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::artifact_store::mocks::InMemoryArtifactStore;
    use crate::port::maintenance::mocks::MockMaintenance;
    use crate::port::time_provider::mocks::MockTimeProvider;

    #[tokio::test]
    async fn test_gc_keeps_referenced_artifacts() {
        let artifacts = Arc::new(InMemoryArtifactStore::new());
        let kept = artifacts.put(b"result").await.unwrap();
        let dropped = artifacts.put(b"orphan").await.unwrap();
        let maintenance = Arc::new(MockMaintenance::with_referenced([kept.clone()]));
        let time = Arc::new(MockTimeProvider::new(10 * MILLIS_PER_DAY));

        let scheduler = MaintenanceScheduler::new(
            maintenance,
            artifacts.clone(),
            time,
            MaintenanceConfig::default(),
            Duration::from_secs(60),
        );
        let stats = scheduler.run_now().await.unwrap();

        assert_eq!(stats.deleted_artifacts, 1);
        assert!(artifacts.exists(&kept).await.unwrap());
        assert!(!artifacts.exists(&dropped).await.unwrap());
    }

    #[tokio::test]
    async fn test_prune_cutoff_uses_retention() {
        let maintenance = Arc::new(MockMaintenance::default());
        let time = Arc::new(MockTimeProvider::new(40 * MILLIS_PER_DAY));
        let scheduler = MaintenanceScheduler::new(
            maintenance.clone(),
            Arc::new(InMemoryArtifactStore::new()),
            time,
            MaintenanceConfig {
                finished_job_retention_days: 30,
                ..MaintenanceConfig::default()
            },
            Duration::from_secs(60),
        );
        scheduler.run_now().await.unwrap();
        assert_eq!(
            *maintenance.prune_calls.lock().unwrap(),
            vec![10 * MILLIS_PER_DAY]
        );
        assert_eq!(*maintenance.vacuum_calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_vacuum_above_size_limit() {
        let maintenance = Arc::new(MockMaintenance {
            db_size_mb: 2_000.0,
            ..MockMaintenance::default()
        });
        let scheduler = MaintenanceScheduler::new(
            maintenance.clone(),
            Arc::new(InMemoryArtifactStore::new()),
            Arc::new(MockTimeProvider::new(0)),
            MaintenanceConfig::default(),
            Duration::from_secs(60),
        );
        scheduler.run_now().await.unwrap();
        assert_eq!(*maintenance.vacuum_calls.lock().unwrap(), 1);
    }
}
