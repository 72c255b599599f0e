// API Hub Infrastructure - SQLite Adapter
// Implements: JobRepository, version store ports, WsDirectory, Maintenance

mod connection;
mod error;
mod job_repository;
mod maintenance_impl;
mod migration;
mod version_store;
mod ws_directory;

pub use connection::create_pool;
pub use job_repository::SqliteJobRepository;
pub use maintenance_impl::SqliteMaintenance;
pub use migration::run_migrations;
pub use version_store::{SqlitePublishTransaction, SqliteVersionStore};
pub use ws_directory::SqliteWsDirectory;

#[cfg(test)]
pub(crate) mod test_support {
    use apihub_core::domain::{BuildConfig, PublishConfig, VersionStatus};
    use sqlx::SqlitePool;

    pub async fn memory_pool() -> SqlitePool {
        let pool = crate::create_pool("sqlite::memory:", 1).await.unwrap();
        crate::run_migrations(&pool).await.unwrap();
        pool
    }

    pub fn publish_config(package_id: &str, version: &str) -> BuildConfig {
        BuildConfig::Publish(PublishConfig {
            package_id: package_id.to_string(),
            version: version.to_string(),
            previous_version: None,
            previous_version_package_id: None,
            status: VersionStatus::Draft,
            version_labels: Vec::new(),
            refs: Vec::new(),
            created_by: "alice".to_string(),
        })
    }
}
