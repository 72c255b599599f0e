// Internal Executor - Build execution loop

pub mod constants;
mod shutdown;

use constants::*;
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use crate::application::finalizer::ResultFinalizer;
use crate::application::stores::Stores;
use crate::domain::job::{bound_details, internal_owner};
use crate::domain::Job;
use crate::error::Result;
use crate::port::{BuildInput, BuildProcessor, ExecutionError};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info, warn};

/// Worker pool draining jobs that no remote builder is reserved for
pub struct InternalExecutor {
    owner: String,
    stores: Stores,
    processor: Arc<dyn BuildProcessor>,
    finalizer: Arc<ResultFinalizer>,
    work_signal: Arc<Notify>,
}

impl InternalExecutor {
    pub fn new(
        executor_id: &str,
        stores: Stores,
        processor: Arc<dyn BuildProcessor>,
        finalizer: Arc<ResultFinalizer>,
        work_signal: Arc<Notify>,
    ) -> Self {
        Self {
            owner: internal_owner(executor_id),
            stores,
            processor,
            finalizer,
            work_signal,
        }
    }

    /// Owner stamp written into claimed jobs
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Start `count` workers sharing this executor
    pub fn spawn_workers(
        self: &Arc<Self>,
        count: usize,
        shutdown: &ShutdownToken,
    ) -> Vec<JoinHandle<()>> {
        (0..count.max(1))
            .map(|worker| {
                let executor = Arc::clone(self);
                let token = shutdown.clone();
                tokio::spawn(async move {
                    if let Err(e) = executor.run(worker, token).await {
                        error!(worker, error = %e, "Executor worker exited with error");
                    }
                })
            })
            .collect()
    }

    /// Run one worker loop with graceful shutdown support
    pub async fn run(&self, worker: usize, mut shutdown: ShutdownToken) -> Result<()> {
        info!(worker, owner = %self.owner, "Executor worker started");
        loop {
            if shutdown.is_shutdown() {
                break;
            }
            match self.process_next_job().await {
                Ok(true) => {}
                Ok(false) => {
                    tokio::select! {
                        _ = self.work_signal.notified() => {},
                        _ = sleep(IDLE_SLEEP_DURATION) => {},
                        _ = shutdown.wait() => break,
                    }
                }
                Err(e) => {
                    error!(worker, error = %e, "Executor worker error");
                    tokio::select! {
                        _ = sleep(ERROR_RECOVERY_SLEEP_DURATION) => {},
                        _ = shutdown.wait() => break,
                    }
                }
            }
        }
        info!(worker, owner = %self.owner, "Executor worker stopped");
        Ok(())
    }

    /// Claim and run one job (returns true if a job was claimed)
    pub async fn process_next_job(&self) -> Result<bool> {
        let now = self.stores.time.now_millis();
        let job = match self.stores.jobs.claim_internal(&self.owner, now).await? {
            Some(j) => j,
            None => return Ok(false),
        };
        info!(
            build_id = %job.id,
            build_type = %job.config.build_type(),
            fingerprint = %job.fingerprint,
            "Processing build"
        );

        let sources = match &job.sources_ref {
            Some(key) => match self.stores.artifacts.get(key).await? {
                Some(bytes) => Some(bytes),
                None => {
                    self.fail(&job, &format!("sources artifact {} is missing", key))
                        .await?;
                    return Ok(true);
                }
            },
            None => None,
        };
        let input = BuildInput {
            build_id: job.id.clone(),
            config: job.config.clone(),
            sources,
        };

        // Panics stay inside the spawned task
        let processor = Arc::clone(&self.processor);
        let handle = tokio::task::spawn(async move { processor.process(&input).await });

        match handle.await {
            Ok(Ok(result_zip)) => self.commit(&job, result_zip).await?,
            Ok(Err(e)) => {
                warn!(build_id = %job.id, error = %e, "Build failed");
                self.fail(&job, &e.to_string()).await?;
            }
            Err(join_err) => {
                if join_err.is_panic() {
                    error!(build_id = %job.id, "Build processor panicked");
                    self.fail(&job, PANIC_DETAILS).await?;
                } else {
                    let e = ExecutionError::Failed("build task cancelled".into());
                    self.fail(&job, &e.to_string()).await?;
                }
            }
        }
        Ok(true)
    }

    async fn commit(&self, job: &Job, result_zip: Vec<u8>) -> Result<()> {
        let result_ref = self.stores.artifacts.put(&result_zip).await?;
        let now = self.stores.time.now_millis();
        if !self
            .stores
            .jobs
            .mark_complete(&job.id, Some(&result_ref), now)
            .await?
        {
            // Deadline sweep got there first
            info!(build_id = %job.id, "Build no longer running, result discarded");
            return Ok(());
        }
        info!(build_id = %job.id, result_ref = %result_ref, "Build complete");

        // The job stays complete; consumers detect the missing records
        if let Err(e) = self.finalizer.finalize(job, &result_zip).await {
            error!(build_id = %job.id, error = %e, "Finalizing build result failed");
        }
        Ok(())
    }

    async fn fail(&self, job: &Job, details: &str) -> Result<()> {
        let now = self.stores.time.now_millis();
        let details = bound_details(details);
        if !self.stores.jobs.mark_error(&job.id, &details, now).await? {
            info!(build_id = %job.id, "Build already terminal, error not recorded");
        }
        Ok(())
    }
}
