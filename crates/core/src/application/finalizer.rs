// Result Finalizer
//
// Turns a completed build's result archive into version, comparison or
// transformation records. All records of one result land in one transaction.

use crate::application::archive::{self, BuildResult};
use crate::application::dispatcher::{insufficient_privileges, transform_format};
use crate::application::resolve::resolve_version;
use crate::application::stores::Stores;
use crate::domain::build::PublishConfig;
use crate::domain::{
    BuildConfig, ChangeSummary, ComparisonKey, ComparisonResult, Document, Job, Operation,
    OperationGroup, TransformedDocuments, VersionInfo, VersionRef,
};
use crate::error::{AppError, ErrorCode, Result};
use crate::port::PublishTransaction;
use tracing::{info, warn};

/// What a finalize persisted
#[derive(Debug, Clone, PartialEq)]
pub enum FinalizeOutcome {
    Published(VersionRef),
    Compared {
        key: ComparisonKey,
        summary: ChangeSummary,
    },
    Transformed(VersionRef),
}

pub struct ResultFinalizer {
    stores: Stores,
}

fn mismatch(what: &str, expected: &str, got: &str) -> AppError {
    AppError::coded(
        ErrorCode::BadRequestBody,
        format!("Result {} '{}' does not match build ({})", what, got, expected),
    )
    .with_param("param", "data")
}

impl ResultFinalizer {
    pub fn new(stores: Stores) -> Self {
        Self { stores }
    }

    /// Validate and persist a result archive for `job`
    pub async fn finalize(&self, job: &Job, result_zip: &[u8]) -> Result<FinalizeOutcome> {
        let result = archive::read_result(result_zip)?;
        Self::validate(job, &result)?;

        let outcome = match &job.config {
            BuildConfig::Publish(_) => self.publish(job, result).await?,
            BuildConfig::Changelog(_) => self.changelog(job, result).await?,
            _ => self.transformation(job, result).await?,
        };
        info!(build_id = %job.id, outcome = ?outcome, "Build result finalized");
        Ok(outcome)
    }

    fn validate(job: &Job, result: &BuildResult) -> Result<()> {
        let info = &result.info;
        if info.build_id != job.id {
            return Err(mismatch("buildId", &job.id, &info.build_id));
        }
        if info.build_type != job.config.build_type() {
            return Err(mismatch(
                "buildType",
                job.config.build_type().as_str(),
                info.build_type.as_str(),
            ));
        }
        if info.package_id != job.config.package_id() {
            return Err(mismatch("packageId", job.config.package_id(), &info.package_id));
        }
        if info.version != job.config.version() {
            return Err(mismatch("version", job.config.version(), &info.version));
        }
        Ok(())
    }

    /// Commit on success, roll back on error
    async fn settle<T>(tx: Box<dyn PublishTransaction>, written: Result<T>) -> Result<T> {
        match written {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "Rollback failed");
                }
                Err(e)
            }
        }
    }

    async fn publish(&self, job: &Job, result: BuildResult) -> Result<FinalizeOutcome> {
        let config = match &job.config {
            BuildConfig::Publish(c) => c.clone(),
            _ => return Err(AppError::InvalidState("not a publish build".into())),
        };
        if !job.available_statuses.contains(&config.status) {
            return Err(insufficient_privileges(&config.package_id, config.status));
        }

        // Content is addressed by hash; orphans from a failed commit are GC'd
        let mut documents: Vec<Document> = Vec::with_capacity(result.documents.len());
        for (mut doc, content) in result.documents {
            doc.hash = self.stores.artifacts.put(&content).await?;
            documents.push(doc);
        }

        let mut ref_targets = Vec::with_capacity(config.refs.len());
        for r in &config.refs {
            let (name, revision) = r.split()?;
            ref_targets.push(match revision {
                Some(rev) => VersionRef::new(&r.ref_id, name, rev),
                None => {
                    resolve_version(self.stores.versions.as_ref(), &r.ref_id, name).await?
                }
            });
        }

        let groups: Vec<OperationGroup> = result
            .groups
            .into_iter()
            .map(|g| OperationGroup {
                package_id: config.package_id.clone(),
                version: config.version.clone(),
                api_type: g.api_type,
                group_name: g.group_name,
                description: g.description,
                operation_ids: g.operation_ids,
                template: None,
            })
            .collect();
        let operations = result.operations;
        let now = self.stores.time.now_millis();

        let mut tx = self.stores.publisher.begin_publish().await?;
        let written = Self::write_version(
            tx.as_mut(),
            &config,
            now,
            &job.id,
            &documents,
            &operations,
            &ref_targets,
            &groups,
        )
        .await;
        let vref = Self::settle(tx, written).await?;
        Ok(FinalizeOutcome::Published(vref))
    }

    #[allow(clippy::too_many_arguments)]
    async fn write_version(
        tx: &mut dyn PublishTransaction,
        config: &PublishConfig,
        now: i64,
        build_id: &str,
        documents: &[Document],
        operations: &[Operation],
        ref_targets: &[VersionRef],
        groups: &[OperationGroup],
    ) -> Result<VersionRef> {
        let revision = tx
            .next_revision(&config.package_id, &config.version)
            .await?;
        let vref = VersionRef::new(&config.package_id, &config.version, revision);
        tx.insert_version(&VersionInfo {
            version_ref: vref.clone(),
            status: config.status,
            previous_version: config.previous_version.clone(),
            previous_version_package_id: config.previous_version_package_id.clone(),
            labels: config.version_labels.clone(),
            refs: config.refs.clone(),
            created_by: config.created_by.clone(),
            created_at: now,
            build_id: build_id.to_string(),
        })
        .await?;
        tx.insert_documents(&vref, documents).await?;
        tx.insert_operations(&vref, operations).await?;
        tx.insert_ref_edges(&vref, ref_targets).await?;
        for group in groups {
            tx.upsert_group(group).await?;
        }
        if revision > 1 {
            let invalidated = tx
                .invalidate_comparisons(&config.package_id, &config.version)
                .await?;
            if invalidated > 0 {
                info!(version = %vref, invalidated, "Comparisons invalidated by new revision");
            }
        }
        Ok(vref)
    }

    async fn changelog(&self, job: &Job, result: BuildResult) -> Result<FinalizeOutcome> {
        let config = match &job.config {
            BuildConfig::Changelog(c) => c.clone(),
            _ => return Err(AppError::InvalidState("not a changelog build".into())),
        };
        let (Some(revision), Some(prev_revision)) =
            (config.comparison_revision, config.comparison_prev_revision)
        else {
            return Err(AppError::InvalidState(
                "changelog build without pinned revisions".into(),
            ));
        };
        let mut entries = result.changelog.ok_or_else(|| {
            AppError::coded(ErrorCode::BadRequestBody, "Result has no changelog.json")
                .with_param("param", "data")
        })?;
        entries.sort_by(|a, b| {
            a.operation_id
                .cmp(&b.operation_id)
                .then_with(|| a.action.cmp(&b.action))
        });

        let current = VersionRef::new(&config.package_id, &config.version, revision);
        let previous = VersionRef::new(
            &config.previous_version_package_id,
            &config.previous_version,
            prev_revision,
        );
        let key = ComparisonKey::new(&current, &previous);
        let summary = ChangeSummary::from_entries(&entries);
        let artifact_ref = self
            .stores
            .artifacts
            .put(&serde_json::to_vec(&entries)?)
            .await?;

        // A newer revision published meanwhile makes this result stale
        let latest_current = self
            .stores
            .versions
            .latest_revision(&current.package_id, &current.version)
            .await?;
        let latest_previous = self
            .stores
            .versions
            .latest_revision(&previous.package_id, &previous.version)
            .await?;
        let valid = latest_current == Some(revision) && latest_previous == Some(prev_revision);

        let record = ComparisonResult {
            key: key.clone(),
            valid,
            summary,
            artifact_ref,
            build_id: job.id.clone(),
            created_at: self.stores.time.now_millis(),
        };
        let mut tx = self.stores.publisher.begin_publish().await?;
        let written = tx.upsert_comparison(&record).await;
        Self::settle(tx, written).await?;
        Ok(FinalizeOutcome::Compared { key, summary })
    }

    async fn transformation(&self, job: &Job, result: BuildResult) -> Result<FinalizeOutcome> {
        let target = job
            .config
            .group_target()
            .cloned()
            .ok_or_else(|| AppError::InvalidState("not a transformation build".into()))?;
        if result.transformed.is_empty() {
            return Err(AppError::coded(
                ErrorCode::BadRequestBody,
                "Result has no transformed documents",
            )
            .with_param("param", "data"));
        }
        let version = match result.info.revision {
            Some(rev) => format!("{}@{}", target.version, rev),
            None => target.version.clone(),
        };
        let vref =
            resolve_version(self.stores.versions.as_ref(), &target.package_id, &version).await?;

        let bundle = archive::write_sources(&result.transformed)?;
        let artifact_ref = self.stores.artifacts.put(&bundle).await?;
        let docs = TransformedDocuments {
            version_ref: vref.clone(),
            api_type: target.api_type,
            group_name: target.group_name.clone(),
            build_type: job.config.build_type().as_str().to_string(),
            format: transform_format(&job.config),
            artifact_ref,
            build_id: job.id.clone(),
            created_at: self.stores.time.now_millis(),
        };
        let mut tx = self.stores.publisher.begin_publish().await?;
        let written = tx.upsert_transformed(&docs).await;
        Self::settle(tx, written).await?;
        Ok(FinalizeOutcome::Transformed(vref))
    }
}
