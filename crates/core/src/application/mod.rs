// Application Layer - Use Cases and Business Logic

pub mod archive;
pub mod catalog;
pub mod comparison;
pub mod coordinator;
pub mod dispatcher;
pub mod executor;
pub mod finalizer;
pub mod fingerprint;
pub mod maintenance;
pub mod processor;
pub mod recovery;
pub mod resolve;
pub mod stores;
pub mod ws;

// Re-exports
pub use catalog::CatalogService;
pub use comparison::ComparisonService;
pub use coordinator::BuilderCoordinator;
pub use dispatcher::{BuildDispatcher, DispatcherSettings};
pub use executor::{shutdown_channel, InternalExecutor, ShutdownSender, ShutdownToken};
pub use finalizer::ResultFinalizer;
pub use maintenance::MaintenanceScheduler;
pub use processor::LocalBuildProcessor;
pub use recovery::RecoveryService;
pub use stores::Stores;
pub use ws::{SessionManager, WsLoadBalancer, WsSettings};
