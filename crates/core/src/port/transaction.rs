// Transaction port for atomic publish/finalize operations

use crate::domain::{
    ComparisonResult, Document, Operation, OperationGroup, TransformedDocuments, VersionInfo,
    VersionRef,
};
use crate::error::Result;
use async_trait::async_trait;

/// Transaction trait for atomic multi-step operations
#[async_trait]
pub trait Transaction: Send {
    /// Commit the transaction
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Rollback the transaction
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Version store operations that must land together
#[async_trait]
pub trait TransactionalVersionRepository: Send + Sync {
    /// Begin a new transaction
    async fn begin_publish(&self) -> Result<Box<dyn PublishTransaction>>;
}

/// Writes performed by the Result Finalizer (within transaction)
#[async_trait]
pub trait PublishTransaction: Transaction {
    /// Reserve the next revision of (package, version), holding the write lock
    async fn next_revision(&mut self, package_id: &str, version: &str) -> Result<i32>;

    /// Insert a version row (creates the package if needed)
    async fn insert_version(&mut self, info: &VersionInfo) -> Result<()>;

    async fn insert_documents(&mut self, version: &VersionRef, docs: &[Document]) -> Result<()>;

    async fn insert_operations(&mut self, version: &VersionRef, ops: &[Operation])
        -> Result<()>;

    /// Record reference edges `from -> to`
    async fn insert_ref_edges(&mut self, from: &VersionRef, to: &[VersionRef]) -> Result<()>;

    async fn upsert_group(&mut self, group: &OperationGroup) -> Result<()>;

    /// Mark every comparison touching (package, version) on either side invalid
    async fn invalidate_comparisons(&mut self, package_id: &str, version: &str) -> Result<u64>;

    /// Insert or replace the comparison for its key
    async fn upsert_comparison(&mut self, result: &ComparisonResult) -> Result<()>;

    async fn upsert_transformed(&mut self, docs: &TransformedDocuments) -> Result<()>;
}
