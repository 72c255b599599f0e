// Port Layer - Interfaces for external dependencies

pub mod artifact_store;
pub mod build_processor;
pub mod id_provider; // For deterministic testing
pub mod job_repository;
pub mod maintenance;
pub mod role_service;
pub mod time_provider;
pub mod transaction;
pub mod version_repository;
pub mod ws_directory;

// Re-exports
pub use artifact_store::{content_key, ArtifactStore};
pub use build_processor::{BuildInput, BuildProcessor, ExecutionError};
pub use id_provider::IdProvider;
pub use job_repository::JobRepository;
pub use maintenance::{Maintenance, MaintenanceConfig, MaintenanceStats};
pub use role_service::{ConfigRoleService, RoleService};
pub use time_provider::TimeProvider;
pub use transaction::{PublishTransaction, Transaction, TransactionalVersionRepository};
pub use version_repository::{
    ComparisonRepository, GroupRepository, PackageTransitionRepository, VersionRepository,
};
pub use ws_directory::WsDirectory;
