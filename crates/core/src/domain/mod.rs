// Domain Layer - Pure business logic and entities

pub mod build;
pub mod context;
pub mod error;
pub mod job;
pub mod session;
pub mod version;

// Re-exports
pub use build::{
    ApiType, BuildConfig, BuildConfigRequest, BuildType, ChangelogConfig, DocumentGroupConfig,
    DocumentGroupFormat, GroupTarget, MergedFormat, MergedSpecificationConfig, PackageId,
    PackageRef, PublishConfig, ReducedSourceConfig, VersionStatus,
};
pub use context::SecurityContext;
pub use error::DomainError;
pub use job::{BuildId, BuildStatus, Job};
pub use session::{
    CloseReason, ForwardedSession, NodeInfo, SessionKey, WsFrame, WsSessionInfo, WsTarget,
};
pub use version::{
    ChangeAction, ChangeSummary, ChangelogEntry, ComparisonKey, ComparisonResult, Document,
    GroupTemplate, Operation, OperationGroup, PackageTransition, TransformedDocuments,
    VersionInfo, VersionRef,
};
