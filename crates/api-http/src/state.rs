//! Shared Router State

use crate::health::ReadyGate;
use crate::rate_limiter::RateLimiter;
use apihub_core::application::{
    BuildDispatcher, BuilderCoordinator, CatalogService, ComparisonService, SessionManager,
    WsLoadBalancer,
};
use apihub_core::port::{IdProvider, TimeProvider};
use std::sync::Arc;

const MB: u64 = 1024 * 1024;

/// Request size limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadLimits {
    pub publish_archive_bytes: u64,
    pub publish_file_bytes: u64,
    pub branch_content_bytes: u64,
}

impl UploadLimits {
    pub fn from_mb(publish_archive_mb: u64, publish_file_mb: u64, branch_content_mb: u64) -> Self {
        Self {
            publish_archive_bytes: publish_archive_mb * MB,
            publish_file_bytes: publish_file_mb * MB,
            branch_content_bytes: branch_content_mb * MB,
        }
    }
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self::from_mb(50, 15, 10)
    }
}

/// Process-wide log level knob
pub trait LogLevelControl: Send + Sync {
    /// Current filter directive
    fn current(&self) -> String;
    /// Replace the filter; Err carries a human-readable reason
    fn set(&self, directive: &str) -> Result<(), String>;
}

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<BuildDispatcher>,
    pub coordinator: Arc<BuilderCoordinator>,
    pub comparisons: Arc<ComparisonService>,
    pub catalog: Arc<CatalogService>,
    pub balancer: Arc<WsLoadBalancer>,
    pub sessions: Arc<SessionManager>,
    pub limiter: Arc<RateLimiter>,
    pub limits: UploadLimits,
    pub log_level: Option<Arc<dyn LogLevelControl>>,
    pub ready: ReadyGate,
    pub time: Arc<dyn TimeProvider>,
    pub ids: Arc<dyn IdProvider>,
}
