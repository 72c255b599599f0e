// Build Processor Port
// Build-type specific computation run by the internal executor

use crate::domain::{BuildConfig, BuildId};
use async_trait::async_trait;
use thiserror::Error;

/// Everything a processor needs to run one build
#[derive(Debug, Clone)]
pub struct BuildInput {
    pub build_id: BuildId,
    pub config: BuildConfig,
    /// Raw sources ZIP, if the submit carried one
    pub sources: Option<Vec<u8>>,
}

/// Execution errors
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Invalid sources: {0}")]
    InvalidSources(String),

    #[error("Missing input: {0}")]
    MissingInput(String),

    #[error("Build failed: {0}")]
    Failed(String),

    #[error("Build timed out after {0}ms")]
    Timeout(i64),

    #[error("IO error: {0}")]
    IoError(String),
}

/// Produces the result archive of a build
///
/// Implementations:
/// - LocalBuildProcessor: in-process document/operation extraction
#[async_trait]
pub trait BuildProcessor: Send + Sync {
    /// Run the build and return the result ZIP
    async fn process(&self, input: &BuildInput) -> Result<Vec<u8>, ExecutionError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Mock processor behavior
    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        /// Return these bytes as the result archive
        Success(Vec<u8>),
        /// Always fail with message
        Fail(String),
        /// Panic with message (for panic isolation testing)
        Panic(String),
        /// Sleep, then succeed with the bytes
        Slow(Duration, Vec<u8>),
    }

    /// Mock Build Processor for testing
    pub struct MockBuildProcessor {
        behavior: Arc<Mutex<MockBehavior>>,
        call_count: Arc<Mutex<usize>>,
    }

    impl MockBuildProcessor {
        pub fn new(behavior: MockBehavior) -> Self {
            Self {
                behavior: Arc::new(Mutex::new(behavior)),
                call_count: Arc::new(Mutex::new(0)),
            }
        }

        pub fn new_success(result: Vec<u8>) -> Self {
            Self::new(MockBehavior::Success(result))
        }

        pub fn new_fail(message: impl Into<String>) -> Self {
            Self::new(MockBehavior::Fail(message.into()))
        }

        pub fn new_panic_inducing(message: impl Into<String>) -> Self {
            Self::new(MockBehavior::Panic(message.into()))
        }

        pub fn call_count(&self) -> usize {
            *self.call_count.lock().unwrap()
        }
    }

    #[async_trait]
    impl BuildProcessor for MockBuildProcessor {
        async fn process(&self, _input: &BuildInput) -> Result<Vec<u8>, ExecutionError> {
            *self.call_count.lock().unwrap() += 1;
            let behavior = self.behavior.lock().unwrap().clone();
            match behavior {
                MockBehavior::Success(bytes) => Ok(bytes),
                MockBehavior::Fail(msg) => Err(ExecutionError::Failed(msg)),
                MockBehavior::Panic(msg) => panic!("{}", msg),
                MockBehavior::Slow(delay, bytes) => {
                    tokio::time::sleep(delay).await;
                    Ok(bytes)
                }
            }
        }
    }
}
