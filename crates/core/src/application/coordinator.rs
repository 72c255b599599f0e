// External Builder Coordinator
//
// Pull endpoint for remote builders and their status reports.

use crate::application::archive::{self, SourceFile};
use crate::application::dispatcher::BuildDispatcher;
use crate::application::finalizer::ResultFinalizer;
use crate::application::stores::Stores;
use crate::domain::job::bound_details;
use crate::domain::{BuildId, BuildStatus};
use crate::error::{AppError, ErrorCode, Result};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// A claimed build packed for a remote builder
#[derive(Debug, Clone)]
pub struct FreeBuild {
    pub build_id: BuildId,
    pub archive: Vec<u8>,
}

/// reportStatus input
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub build_id: BuildId,
    pub builder_id: String,
    pub status: BuildStatus,
    pub details: Option<String>,
    /// Result ZIP, required with `complete`
    pub data: Option<Vec<u8>>,
}

pub struct BuilderCoordinator {
    stores: Stores,
    dispatcher: Arc<BuildDispatcher>,
    finalizer: Arc<ResultFinalizer>,
}

impl BuilderCoordinator {
    pub fn new(
        stores: Stores,
        dispatcher: Arc<BuildDispatcher>,
        finalizer: Arc<ResultFinalizer>,
    ) -> Self {
        Self {
            stores,
            dispatcher,
            finalizer,
        }
    }

    /// pullFreeBuild: claim one client build and pack its input archive
    pub async fn pull_free_build(&self, builder_id: &str) -> Result<Option<FreeBuild>> {
        if builder_id.trim().is_empty() {
            return Err(AppError::missing("builderId"));
        }
        let now = self.stores.time.now_millis();
        let job = match self.stores.jobs.claim_for_builder(builder_id, now).await? {
            Some(job) => job,
            None => {
                debug!(builder_id = %builder_id, "No free build");
                return Ok(None);
            }
        };

        let sources: Vec<SourceFile> = match &job.sources_ref {
            Some(key) => match self.stores.artifacts.get(key).await? {
                Some(bytes) => {
                    archive::read_sources(&bytes, self.dispatcher.settings().max_file_bytes)?
                }
                None => {
                    let details = format!("sources artifact {} is missing", key);
                    self.stores.jobs.mark_error(&job.id, &details, now).await?;
                    return Err(AppError::InvalidState(details));
                }
            },
            None => Vec::new(),
        };
        let archive = archive::write_input(&job.id, &job.config, &sources)?;
        info!(
            build_id = %job.id,
            builder_id = %builder_id,
            build_type = %job.config.build_type(),
            "Build handed to remote builder"
        );
        Ok(Some(FreeBuild {
            build_id: job.id,
            archive,
        }))
    }

    /// reportStatus
    pub async fn report_status(&self, report: StatusReport) -> Result<BuildStatus> {
        let job = self
            .dispatcher
            .validate_ownership(&report.build_id, &report.builder_id)
            .await?;
        let now = self.stores.time.now_millis();

        match report.status {
            BuildStatus::Running => {
                if job.status != BuildStatus::Running {
                    return Err(invalid_transition(job.status, report.status));
                }
                debug!(build_id = %job.id, builder_id = %report.builder_id, "Builder heartbeat");
                Ok(BuildStatus::Running)
            }
            BuildStatus::Error => {
                let details = bound_details(report.details.as_deref().unwrap_or("build failed"));
                if !self.stores.jobs.mark_error(&job.id, &details, now).await? {
                    return Err(invalid_transition(job.status, report.status));
                }
                warn!(build_id = %job.id, builder_id = %report.builder_id, details = %details, "Remote build failed");
                Ok(BuildStatus::Error)
            }
            BuildStatus::Complete => {
                let data = report.data.ok_or_else(|| AppError::missing("data"))?;
                // Reject malformed archives before the job turns terminal
                archive::read_result(&data)?;
                let result_ref = self.stores.artifacts.put(&data).await?;
                if !self
                    .stores
                    .jobs
                    .mark_complete(&job.id, Some(&result_ref), now)
                    .await?
                {
                    return Err(invalid_transition(job.status, report.status));
                }
                info!(build_id = %job.id, builder_id = %report.builder_id, "Remote build complete");
                if let Err(e) = self.finalizer.finalize(&job, &data).await {
                    error!(build_id = %job.id, error = %e, "Finalizing remote build result failed");
                    return Err(e);
                }
                Ok(BuildStatus::Complete)
            }
            BuildStatus::NotStarted => Err(invalid_transition(job.status, report.status)),
        }
    }
}

fn invalid_transition(from: BuildStatus, to: BuildStatus) -> AppError {
    AppError::coded(
        ErrorCode::InvalidStatusTransition,
        format!("Build cannot move from {} to {}", from.as_str(), to.as_str()),
    )
    .with_param("status", to.as_str())
}
