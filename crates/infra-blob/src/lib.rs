// API Hub Infrastructure - Blob Adapter
// Implements: ArtifactStore

mod fs_store;

pub use fs_store::FsArtifactStore;
