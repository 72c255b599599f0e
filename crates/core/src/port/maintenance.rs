// Store maintenance port
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashSet;

/// Database maintenance statistics
#[derive(Debug, Clone, Default)]
pub struct MaintenanceStats {
    pub db_size_mb: f64,
    pub job_count: i64,
    pub finished_job_count: i64,
    pub pruned_job_count: i64,
    pub deleted_artifacts: usize,
}

/// Maintenance configuration
#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    /// Retention period for terminal jobs (days)
    pub finished_job_retention_days: i64,

    /// Unreferenced artifacts younger than this are kept (hours)
    pub artifact_grace_hours: i64,

    /// DB size above which VACUUM runs (MB)
    pub max_db_size_mb: f64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            finished_job_retention_days: 30,
            artifact_grace_hours: 24,
            max_db_size_mb: 1000.0,
        }
    }
}

/// Store-side maintenance operations
#[async_trait]
pub trait Maintenance: Send + Sync {
    /// Run VACUUM to reclaim space
    ///
    /// # Returns
    /// Space reclaimed in MB
    async fn vacuum(&self) -> Result<f64>;

    /// Delete terminal jobs finished before `before_millis`, recording their ids
    /// in the prune ledger
    ///
    /// # Returns
    /// Number of jobs deleted
    async fn prune_finished_jobs(&self, before_millis: i64) -> Result<u64>;

    /// Every artifact key still referenced by a job, document, comparison,
    /// transformation or group template
    async fn referenced_artifacts(&self) -> Result<HashSet<String>>;

    async fn get_stats(&self) -> Result<MaintenanceStats>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct MockMaintenance {
        pub referenced: Mutex<HashSet<String>>,
        pub prune_calls: Mutex<Vec<i64>>,
        pub vacuum_calls: Mutex<usize>,
        pub db_size_mb: f64,
    }

    impl MockMaintenance {
        pub fn with_referenced(keys: impl IntoIterator<Item = String>) -> Self {
            Self {
                referenced: Mutex::new(keys.into_iter().collect()),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl Maintenance for MockMaintenance {
        async fn vacuum(&self) -> Result<f64> {
            *self.vacuum_calls.lock().unwrap() += 1;
            Ok(0.0)
        }

        async fn prune_finished_jobs(&self, before_millis: i64) -> Result<u64> {
            self.prune_calls.lock().unwrap().push(before_millis);
            Ok(0)
        }

        async fn referenced_artifacts(&self) -> Result<HashSet<String>> {
            Ok(self.referenced.lock().unwrap().clone())
        }

        async fn get_stats(&self) -> Result<MaintenanceStats> {
            Ok(MaintenanceStats {
                db_size_mb: self.db_size_mb,
                ..MaintenanceStats::default()
            })
        }
    }
}
