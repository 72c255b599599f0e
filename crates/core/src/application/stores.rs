// Store handles shared by the build pipeline services

use crate::port::{
    ArtifactStore, ComparisonRepository, GroupRepository, IdProvider, JobRepository,
    PackageTransitionRepository, TimeProvider, TransactionalVersionRepository, VersionRepository,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct Stores {
    pub jobs: Arc<dyn JobRepository>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub versions: Arc<dyn VersionRepository>,
    pub groups: Arc<dyn GroupRepository>,
    pub comparisons: Arc<dyn ComparisonRepository>,
    pub transitions: Arc<dyn PackageTransitionRepository>,
    pub publisher: Arc<dyn TransactionalVersionRepository>,
    pub time: Arc<dyn TimeProvider>,
    pub ids: Arc<dyn IdProvider>,
}

/// In-memory wiring for tests in this and downstream crates
pub mod testing {
    use super::*;
    use crate::port::artifact_store::mocks::InMemoryArtifactStore;
    use crate::port::id_provider::mocks::SequentialIdProvider;
    use crate::port::job_repository::mocks::InMemoryJobRepository;
    use crate::port::time_provider::mocks::MockTimeProvider;
    use crate::port::version_repository::mocks::InMemoryVersionStore;

    /// Concrete mocks behind a [`Stores`]
    pub struct MemoryStores {
        pub stores: Stores,
        pub jobs: Arc<InMemoryJobRepository>,
        pub artifacts: Arc<InMemoryArtifactStore>,
        pub versions: Arc<InMemoryVersionStore>,
        pub time: Arc<MockTimeProvider>,
    }

    pub fn memory_stores() -> MemoryStores {
        let jobs = Arc::new(InMemoryJobRepository::new());
        let artifacts = Arc::new(InMemoryArtifactStore::new());
        let versions = Arc::new(InMemoryVersionStore::new());
        let time = Arc::new(MockTimeProvider::new(1_700_000_000_000));
        let stores = Stores {
            jobs: jobs.clone(),
            artifacts: artifacts.clone(),
            versions: versions.clone(),
            groups: versions.clone(),
            comparisons: versions.clone(),
            transitions: versions.clone(),
            publisher: versions.clone(),
            time: time.clone(),
            ids: Arc::new(SequentialIdProvider::new("build")),
        };
        MemoryStores {
            stores,
            jobs,
            artifacts,
            versions,
            time,
        }
    }
}
