// Build Dispatcher
//
// Admits build requests, applies the reuse and fingerprint gates, and queues
// jobs for the internal executor or a remote builder.

use crate::application::archive::{self, SourceFile};
use crate::application::fingerprint::fingerprint;
use crate::application::resolve::{resolve_references, resolve_version};
use crate::application::stores::Stores;
use crate::domain::{
    BuildConfig, BuildId, BuildStatus, BuildType, Job, PackageRef, SecurityContext,
    VersionRef, VersionStatus,
};
use crate::error::{AppError, ErrorCode, Result};
use crate::port::RoleService;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info};

/// Dispatcher tuning
#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    /// A complete job younger than this may satisfy an identical request
    pub reuse_ttl_ms: i64,
    /// Deadline applied when the request carries none (0 = none)
    pub default_deadline_ms: i64,
    /// Per-file limit inside a sources archive
    pub max_file_bytes: u64,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            reuse_ttl_ms: 24 * 3600 * 1000,
            default_deadline_ms: 0,
            max_file_bytes: 50 * 1024 * 1024,
        }
    }
}

/// Options shared by every submit
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    pub client_build: bool,
    pub builder_id: Option<String>,
    /// Relative deadline; `None` falls back to the configured default
    pub deadline_ms: Option<i64>,
    /// Set to false to force a fresh build
    pub allow_reuse: bool,
}

impl SubmitOptions {
    pub fn internal() -> Self {
        Self {
            allow_reuse: true,
            ..Self::default()
        }
    }

    pub fn client(builder_id: impl Into<String>) -> Self {
        Self {
            client_build: true,
            builder_id: Some(builder_id.into()),
            allow_reuse: true,
            ..Self::default()
        }
    }
}

/// submitPublish input
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub config: BuildConfig,
    /// Package id from the request path, checked against the config
    pub path_package_id: Option<String>,
    pub sources: Option<Vec<u8>>,
    pub dependencies: Vec<PackageRef>,
    pub resolve_refs: bool,
    pub resolve_conflicts: bool,
    pub options: SubmitOptions,
}

/// What a submit produced
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// An existing valid artifact satisfies the request
    Reused { build_id: BuildId },
    /// Queued (or already in flight) for internal execution
    Queued {
        build_id: BuildId,
        status: BuildStatus,
        details: Option<String>,
    },
    /// The caller must execute the build
    ClientBuild {
        build_id: BuildId,
        config: BuildConfig,
        uploaded_sources: bool,
    },
}

impl SubmitOutcome {
    pub fn build_id(&self) -> &str {
        match self {
            SubmitOutcome::Reused { build_id }
            | SubmitOutcome::Queued { build_id, .. }
            | SubmitOutcome::ClientBuild { build_id, .. } => build_id,
        }
    }
}

/// getStatus view
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildStatusView {
    pub publish_id: BuildId,
    pub status: BuildStatus,
    pub message: String,
}

impl From<&Job> for BuildStatusView {
    fn from(job: &Job) -> Self {
        Self {
            publish_id: job.id.clone(),
            status: job.status,
            message: job.details.clone().unwrap_or_default(),
        }
    }
}

/// Build Dispatcher
pub struct BuildDispatcher {
    stores: Stores,
    roles: Arc<dyn RoleService>,
    settings: DispatcherSettings,
    work_available: Arc<Notify>,
}

impl BuildDispatcher {
    pub fn new(stores: Stores, roles: Arc<dyn RoleService>, settings: DispatcherSettings) -> Self {
        Self {
            stores,
            roles,
            settings,
            work_available: Arc::new(Notify::new()),
        }
    }

    /// Signal fired whenever an internal job is queued
    pub fn work_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.work_available)
    }

    pub fn settings(&self) -> &DispatcherSettings {
        &self.settings
    }

    /// submitPublish
    pub async fn submit_publish(
        &self,
        ctx: &SecurityContext,
        req: PublishRequest,
    ) -> Result<SubmitOutcome> {
        let user = ctx.require_user()?.to_string();
        let PublishRequest {
            mut config,
            path_package_id,
            sources,
            dependencies,
            resolve_refs,
            resolve_conflicts,
            options,
        } = req;

        let publish = match &mut config {
            BuildConfig::Publish(p) => p,
            other => {
                return Err(AppError::invalid_value(
                    "buildType",
                    format!("Expected buildType 'publish', got '{}'", other.build_type()),
                ))
            }
        };
        if let Some(path_pkg) = &path_package_id {
            if path_pkg != &publish.package_id {
                return Err(AppError::coded(
                    ErrorCode::PackageIdMismatch,
                    format!(
                        "Package id in path ({}) does not match config ({})",
                        path_pkg, publish.package_id
                    ),
                )
                .with_param("packageId", path_pkg.as_str()));
            }
        }
        Self::check_client_options(&options)?;

        let available = self
            .roles
            .available_publish_statuses(ctx, &publish.package_id)
            .await?;
        if !available.contains(&publish.status) {
            return Err(insufficient_privileges(&publish.package_id, publish.status));
        }

        let files: Vec<SourceFile> = match &sources {
            Some(bytes) => archive::read_sources(bytes, self.settings.max_file_bytes)?,
            None => Vec::new(),
        };

        let mut refs = publish.refs.clone();
        refs.extend(dependencies);
        if !refs.is_empty() {
            let resolved = resolve_references(
                self.stores.versions.as_ref(),
                &refs,
                resolve_refs,
                resolve_conflicts,
            )
            .await?;
            publish.refs = resolved.iter().map(|v| v.as_package_ref()).collect();
        }

        config.set_created_by(&user);
        let fp = fingerprint(&config, &archive::source_hashes(&files));

        if options.allow_reuse {
            if let Some(build_id) = self.reusable_publish(&config, &fp).await? {
                info!(build_id = %build_id, fingerprint = %fp, "Reusing published build");
                return Ok(SubmitOutcome::Reused { build_id });
            }
        }
        if let Some(active) = self.stores.jobs.find_active_by_fingerprint(&fp).await? {
            return Ok(self.in_flight(active));
        }

        let sources_ref = match sources {
            Some(bytes) => Some(self.stores.artifacts.put(&bytes).await?),
            None => None,
        };
        let uploaded = sources_ref.is_some();
        let job = self
            .new_job(config, fp, &options)
            .with_sources(sources_ref)
            .with_available_statuses(available);
        self.admit(job, &options, uploaded).await
    }

    /// submitChangelog
    pub async fn submit_changelog(
        &self,
        ctx: &SecurityContext,
        mut config: BuildConfig,
        options: SubmitOptions,
    ) -> Result<SubmitOutcome> {
        let user = ctx.require_user()?.to_string();
        Self::check_client_options(&options)?;

        let changelog = match &mut config {
            BuildConfig::Changelog(c) => c,
            other => {
                return Err(AppError::invalid_value(
                    "buildType",
                    format!("Expected buildType 'changelog', got '{}'", other.build_type()),
                ))
            }
        };

        let current = match changelog.comparison_revision {
            Some(rev) => format!("{}@{}", changelog.version, rev),
            None => changelog.version.clone(),
        };
        let previous = match changelog.comparison_prev_revision {
            Some(rev) => format!("{}@{}", changelog.previous_version, rev),
            None => changelog.previous_version.clone(),
        };
        let current =
            resolve_version(self.stores.versions.as_ref(), &changelog.package_id, &current).await?;
        let previous = resolve_version(
            self.stores.versions.as_ref(),
            &changelog.previous_version_package_id,
            &previous,
        )
        .await?;
        changelog.comparison_revision = Some(current.revision);
        changelog.comparison_prev_revision = Some(previous.revision);
        config.set_created_by(&user);

        let fp = fingerprint(&config, &[]);
        if options.allow_reuse {
            let key = crate::domain::ComparisonKey::new(&current, &previous);
            if let Some(existing) = self.stores.comparisons.get_comparison(&key).await? {
                if existing.valid {
                    return Ok(SubmitOutcome::Reused {
                        build_id: existing.build_id,
                    });
                }
            }
        }
        if let Some(active) = self.stores.jobs.find_active_by_fingerprint(&fp).await? {
            return Ok(self.in_flight(active));
        }
        let job = self.new_job(config, fp, &options);
        self.admit(job, &options, false).await
    }

    /// submitGroupTransform
    pub async fn submit_group_transform(
        &self,
        ctx: &SecurityContext,
        mut config: BuildConfig,
        options: SubmitOptions,
    ) -> Result<SubmitOutcome> {
        let user = ctx.require_user()?.to_string();
        Self::check_client_options(&options)?;

        let target = config.group_target().cloned().ok_or_else(|| {
            AppError::invalid_value(
                "buildType",
                format!(
                    "Build type '{}' is not a group transformation",
                    config.build_type()
                ),
            )
        })?;
        let vref =
            resolve_version(self.stores.versions.as_ref(), &target.package_id, &target.version)
                .await?;
        let group = self
            .stores
            .groups
            .get_group(
                &target.package_id,
                &target.version,
                target.api_type,
                &target.group_name,
            )
            .await?
            .ok_or_else(|| group_not_found(&target.group_name))?;
        if group.operation_ids.is_empty() {
            return Err(AppError::coded(
                ErrorCode::OperationsAreEmpty,
                format!("Group {} has no operations", target.group_name),
            )
            .with_param("groupName", target.group_name.as_str()));
        }

        config.set_created_by(&user);
        // The revision and group membership are inputs of the transformation
        let mut inputs = vec![format!("revision:{}", vref.revision)];
        inputs.extend(group.operation_ids.iter().map(|id| format!("op:{}", id)));
        let fp = fingerprint(&config, &inputs);

        if options.allow_reuse {
            let format = transform_format(&config);
            let existing = self
                .stores
                .versions
                .get_transformed(
                    &vref,
                    target.api_type,
                    &target.group_name,
                    config.build_type(),
                    &format,
                )
                .await?;
            if let Some(existing) = existing {
                if let Some(job) = self.stores.jobs.find_latest_by_fingerprint(&fp).await? {
                    if job.id == existing.build_id && self.within_reuse_window(&job) {
                        return Ok(SubmitOutcome::Reused { build_id: job.id });
                    }
                }
            }
        }
        if let Some(active) = self.stores.jobs.find_active_by_fingerprint(&fp).await? {
            return Ok(self.in_flight(active));
        }
        let job = self.new_job(config, fp, &options);
        self.admit(job, &options, false).await
    }

    /// getStatus
    pub async fn get_status(&self, build_id: &str) -> Result<BuildStatusView> {
        let job = self.find_job(build_id).await?;
        Ok(BuildStatusView::from(&job))
    }

    /// getStatuses; unknown ids are omitted
    pub async fn get_statuses(&self, build_ids: &[BuildId]) -> Result<Vec<BuildStatusView>> {
        let jobs = self.stores.jobs.find_by_ids(build_ids).await?;
        Ok(jobs.iter().map(BuildStatusView::from).collect())
    }

    /// Load a job, telling a pruned id apart from one that never existed
    pub async fn find_job(&self, build_id: &str) -> Result<Job> {
        if let Some(job) = self.stores.jobs.find_by_id(build_id).await? {
            return Ok(job);
        }
        if self.stores.jobs.is_pruned(build_id).await? {
            return Err(AppError::coded(
                ErrorCode::BuildPruned,
                format!("Build {} has been pruned", build_id),
            )
            .with_param("buildId", build_id));
        }
        Err(AppError::coded(
            ErrorCode::BuildNotFound,
            format!("Build {} not found", build_id),
        )
        .with_param("buildId", build_id))
    }

    /// validateOwnership
    pub async fn validate_ownership(&self, build_id: &str, builder_id: &str) -> Result<Job> {
        let job = self.find_job(build_id).await?;
        if !job.is_owned_by(builder_id) {
            return Err(AppError::coded(
                ErrorCode::NotOwner,
                format!("Builder {} does not own build {}", builder_id, build_id),
            )
            .with_param("buildId", build_id)
            .with_param("builderId", builder_id));
        }
        Ok(job)
    }

    fn check_client_options(options: &SubmitOptions) -> Result<()> {
        if options.client_build
            && options
                .builder_id
                .as_deref()
                .map_or(true, |b| b.trim().is_empty())
        {
            return Err(AppError::missing("builderId"));
        }
        Ok(())
    }

    fn within_reuse_window(&self, job: &Job) -> bool {
        let finished = job.finished_at.unwrap_or(job.created_at);
        job.status == BuildStatus::Complete
            && self.stores.time.now_millis() - finished <= self.settings.reuse_ttl_ms
    }

    /// The latest revision must be this job's output and carry the requested
    /// status, labels and references.
    async fn reusable_publish(&self, config: &BuildConfig, fp: &str) -> Result<Option<BuildId>> {
        let BuildConfig::Publish(publish) = config else {
            return Ok(None);
        };
        let job = match self.stores.jobs.find_latest_by_fingerprint(fp).await? {
            Some(job) if self.within_reuse_window(&job) => job,
            _ => return Ok(None),
        };
        let Some(revision) = self
            .stores
            .versions
            .latest_revision(&publish.package_id, &publish.version)
            .await?
        else {
            return Ok(None);
        };
        let latest = self
            .stores
            .versions
            .get_version(&VersionRef::new(&publish.package_id, &publish.version, revision))
            .await?;
        let reusable = latest.is_some_and(|info| {
            info.build_id == job.id
                && info.status == publish.status
                && info.labels == publish.version_labels
                && info.refs == publish.refs
        });
        Ok(reusable.then_some(job.id))
    }

    fn new_job(&self, config: BuildConfig, fp: String, options: &SubmitOptions) -> Job {
        let now = self.stores.time.now_millis();
        let deadline_ms = options
            .deadline_ms
            .unwrap_or(self.settings.default_deadline_ms);
        let deadline = (deadline_ms > 0).then(|| now + deadline_ms);
        let job = Job::new(self.stores.ids.generate_id(), now, config, fp).with_deadline(deadline);
        match (&options.builder_id, options.client_build) {
            (Some(builder), true) => job.for_builder(builder.clone()),
            _ => job,
        }
    }

    fn in_flight(&self, job: Job) -> SubmitOutcome {
        debug!(build_id = %job.id, fingerprint = %job.fingerprint, "Build already in flight");
        if job.client_build {
            SubmitOutcome::ClientBuild {
                build_id: job.id,
                config: job.config,
                uploaded_sources: job.sources_ref.is_some(),
            }
        } else {
            SubmitOutcome::Queued {
                build_id: job.id,
                status: job.status,
                details: job.details,
            }
        }
    }

    /// Insert behind the fingerprint gate; a lost race yields the winner's id
    async fn admit(
        &self,
        job: Job,
        options: &SubmitOptions,
        uploaded_sources: bool,
    ) -> Result<SubmitOutcome> {
        match self.stores.jobs.insert(&job).await {
            Ok(()) => {}
            Err(AppError::Conflict(reason)) => {
                debug!(fingerprint = %job.fingerprint, reason = %reason, "Fingerprint gate hit");
                return match self
                    .stores
                    .jobs
                    .find_active_by_fingerprint(&job.fingerprint)
                    .await?
                {
                    Some(active) => Ok(self.in_flight(active)),
                    None => Err(AppError::Conflict(reason)),
                };
            }
            Err(e) => return Err(e),
        }

        info!(
            build_id = %job.id,
            build_type = %job.config.build_type(),
            package_id = %job.config.package_id(),
            fingerprint = %job.fingerprint,
            client_build = job.client_build,
            "Build queued"
        );

        if options.client_build {
            Ok(SubmitOutcome::ClientBuild {
                build_id: job.id,
                config: job.config,
                uploaded_sources,
            })
        } else {
            self.work_available.notify_one();
            Ok(SubmitOutcome::Queued {
                build_id: job.id,
                status: BuildStatus::NotStarted,
                details: None,
            })
        }
    }
}

pub(crate) fn insufficient_privileges(package_id: &str, status: VersionStatus) -> AppError {
    AppError::coded(
        ErrorCode::InsufficientPrivileges,
        format!(
            "Publishing into status '{}' is not permitted for package {}",
            status, package_id
        ),
    )
    .with_param("packageId", package_id)
    .with_param("status", status.as_str())
}

pub(crate) fn group_not_found(group_name: &str) -> AppError {
    AppError::coded(
        ErrorCode::OperationGroupNotFound,
        format!("Operation group {} not found", group_name),
    )
    .with_param("groupName", group_name)
}

/// Format label under which transformed documents are stored
pub fn transform_format(config: &BuildConfig) -> String {
    match config {
        BuildConfig::DocumentGroup(_) => "json".to_string(),
        BuildConfig::MergedSpecification(c) => c.format.as_str().to_string(),
        _ => match config.build_type() {
            BuildType::ReducedSourceSpecifications => "zip".to_string(),
            other => other.as_str().to_string(),
        },
    }
}
