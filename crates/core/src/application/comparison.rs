// Comparison Service
//
// Serves memoized comparisons and starts changelog builds for missing ones.

use crate::application::dispatcher::{BuildDispatcher, SubmitOptions, SubmitOutcome};
use crate::application::fingerprint::fingerprint;
use crate::application::resolve::resolve_version;
use crate::application::stores::Stores;
use crate::domain::build::ChangelogConfig;
use crate::domain::{
    BuildConfig, BuildId, BuildStatus, ChangelogEntry, ComparisonKey, ComparisonResult,
    SecurityContext, VersionRef,
};
use crate::error::{AppError, ErrorCode, Result};
use std::sync::Arc;
use tracing::{debug, info};

/// The two sides of a comparison, revisions optional (`name@rev` pins one)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompareRequest {
    pub package_id: String,
    pub version: String,
    pub previous_version_package_id: String,
    pub previous_version: String,
}

/// ensureComparison result
#[derive(Debug, Clone, PartialEq)]
pub enum ComparisonOutcome {
    /// A valid memoized result exists
    Ready(ComparisonResult),
    /// A changelog build is queued or has failed
    Accepted {
        build_id: BuildId,
        status: BuildStatus,
        message: Option<String>,
    },
    /// The caller must run the changelog build
    ClientBuild {
        build_id: BuildId,
        config: BuildConfig,
    },
}

pub struct ComparisonService {
    stores: Stores,
    dispatcher: Arc<BuildDispatcher>,
}

impl ComparisonService {
    pub fn new(stores: Stores, dispatcher: Arc<BuildDispatcher>) -> Self {
        Self { stores, dispatcher }
    }

    async fn resolve(&self, req: &CompareRequest) -> Result<(VersionRef, VersionRef)> {
        let current =
            resolve_version(self.stores.versions.as_ref(), &req.package_id, &req.version).await?;
        let previous = resolve_version(
            self.stores.versions.as_ref(),
            &req.previous_version_package_id,
            &req.previous_version,
        )
        .await?;
        Ok((current, previous))
    }

    /// ensureComparison
    pub async fn ensure_comparison(
        &self,
        ctx: &SecurityContext,
        req: &CompareRequest,
        recalculate: bool,
        options: SubmitOptions,
    ) -> Result<ComparisonOutcome> {
        let (current, previous) = self.resolve(req).await?;
        let key = ComparisonKey::new(&current, &previous);

        if !recalculate {
            if let Some(existing) = self.stores.comparisons.get_comparison(&key).await? {
                if existing.valid {
                    debug!(comparison = %key, "Comparison served from cache");
                    return Ok(ComparisonOutcome::Ready(existing));
                }
            }
        }

        let config = BuildConfig::Changelog(ChangelogConfig {
            package_id: current.package_id.clone(),
            version: current.version.clone(),
            previous_version_package_id: previous.package_id.clone(),
            previous_version: previous.version.clone(),
            comparison_revision: Some(current.revision),
            comparison_prev_revision: Some(previous.revision),
            created_by: String::new(),
        });
        let fp = fingerprint(&config, &[]);

        if let Some(job) = self.stores.jobs.find_latest_by_fingerprint(&fp).await? {
            match job.status {
                BuildStatus::NotStarted | BuildStatus::Running => {
                    debug!(build_id = %job.id, comparison = %key, "Changelog build in flight");
                    return Ok(if job.client_build {
                        ComparisonOutcome::ClientBuild {
                            build_id: job.id,
                            config: job.config,
                        }
                    } else {
                        ComparisonOutcome::Accepted {
                            build_id: job.id,
                            status: job.status,
                            message: None,
                        }
                    });
                }
                BuildStatus::Error if !recalculate => {
                    return Ok(ComparisonOutcome::Accepted {
                        build_id: job.id,
                        status: BuildStatus::Error,
                        message: job.details,
                    });
                }
                // Complete without a valid record: the finalize was lost
                BuildStatus::Complete | BuildStatus::Error => {}
            }
        }

        let options = SubmitOptions {
            allow_reuse: false,
            ..options
        };
        let outcome = self.dispatcher.submit_changelog(ctx, config, options).await?;
        info!(build_id = %outcome.build_id(), comparison = %key, "Changelog build submitted");
        Ok(match outcome {
            SubmitOutcome::ClientBuild {
                build_id, config, ..
            } => ComparisonOutcome::ClientBuild { build_id, config },
            SubmitOutcome::Queued {
                build_id,
                status,
                details,
            } => ComparisonOutcome::Accepted {
                build_id,
                status,
                message: details,
            },
            SubmitOutcome::Reused { build_id } => ComparisonOutcome::Accepted {
                build_id,
                status: BuildStatus::Complete,
                message: None,
            },
        })
    }

    /// getSummary
    pub async fn get_summary(&self, req: &CompareRequest) -> Result<ComparisonResult> {
        let (current, previous) = self.resolve(req).await?;
        let key = ComparisonKey::new(&current, &previous);
        match self.stores.comparisons.get_comparison(&key).await? {
            Some(result) if result.valid => Ok(result),
            _ => Err(comparison_not_found(&key)),
        }
    }

    /// Changelog entries of a valid comparison
    pub async fn get_changes(&self, req: &CompareRequest) -> Result<Vec<ChangelogEntry>> {
        let result = self.get_summary(req).await?;
        let bytes = self
            .stores
            .artifacts
            .get(&result.artifact_ref)
            .await?
            .ok_or_else(|| {
                AppError::InvalidState(format!(
                    "changelog artifact {} is missing",
                    result.artifact_ref
                ))
            })?;
        let entries: Vec<ChangelogEntry> = serde_json::from_slice(&bytes)?;
        if entries.is_empty() {
            return Err(AppError::coded(
                ErrorCode::ChangesAreEmpty,
                format!("No changes between {}", result.key),
            ));
        }
        Ok(entries)
    }
}

fn comparison_not_found(key: &ComparisonKey) -> AppError {
    AppError::coded(
        ErrorCode::ComparisonNotFound,
        format!("Comparison {} not found", key),
    )
    .with_param("packageId", key.package_id.as_str())
    .with_param("version", key.version.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::dispatcher::DispatcherSettings;
    use crate::application::stores::testing::{memory_stores, MemoryStores};
    use crate::domain::{ChangeAction, ChangeSummary, VersionInfo, VersionStatus};
    use crate::port::role_service::ConfigRoleService;
    use crate::port::{JobRepository, PublishTransaction, Transaction, TransactionalVersionRepository};

    fn service(mem: &MemoryStores) -> ComparisonService {
        let roles = Arc::new(ConfigRoleService::new(Vec::<String>::new(), vec![VersionStatus::Draft]));
        let dispatcher = Arc::new(BuildDispatcher::new(
            mem.stores.clone(),
            roles,
            DispatcherSettings::default(),
        ));
        ComparisonService::new(mem.stores.clone(), dispatcher)
    }

    fn seed(mem: &MemoryStores, version: &str) {
        mem.versions.seed_version(
            VersionInfo {
                version_ref: VersionRef::new("pkg", version, 1),
                status: VersionStatus::Release,
                previous_version: None,
                previous_version_package_id: None,
                labels: vec![],
                refs: vec![],
                created_by: "alice".into(),
                created_at: 0,
                build_id: format!("pub-{}", version),
            },
            vec![],
            vec![],
        );
    }

    fn request() -> CompareRequest {
        CompareRequest {
            package_id: "pkg".into(),
            version: "v2".into(),
            previous_version_package_id: "pkg".into(),
            previous_version: "v1".into(),
        }
    }

    async fn store_comparison(mem: &MemoryStores, entries: &[ChangelogEntry], build_id: &str) {
        let key = ComparisonKey::new(
            &VersionRef::new("pkg", "v2", 1),
            &VersionRef::new("pkg", "v1", 1),
        );
        let artifact_ref = mem
            .stores
            .artifacts
            .put(&serde_json::to_vec(entries).unwrap())
            .await
            .unwrap();
        let mut tx = mem.versions.begin_publish().await.unwrap();
        tx.upsert_comparison(&ComparisonResult {
            key,
            valid: true,
            summary: ChangeSummary::from_entries(entries),
            artifact_ref,
            build_id: build_id.into(),
            created_at: 0,
        })
        .await
        .unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_build() {
        let mem = memory_stores();
        seed(&mem, "v1");
        seed(&mem, "v2");
        let svc = service(&mem);
        let ctx = SecurityContext::for_user("alice");

        let first = svc
            .ensure_comparison(&ctx, &request(), false, SubmitOptions::internal())
            .await
            .unwrap();
        let second = svc
            .ensure_comparison(&ctx, &request(), false, SubmitOptions::internal())
            .await
            .unwrap();
        assert_eq!(first, second);
        assert!(matches!(
            first,
            ComparisonOutcome::Accepted {
                status: BuildStatus::NotStarted,
                ..
            }
        ));
        assert_eq!(mem.jobs.len(), 1);
    }

    #[tokio::test]
    async fn test_valid_result_is_served() {
        let mem = memory_stores();
        seed(&mem, "v1");
        seed(&mem, "v2");
        store_comparison(&mem, &[], "c1").await;
        let svc = service(&mem);

        let outcome = svc
            .ensure_comparison(
                &SecurityContext::for_user("alice"),
                &request(),
                false,
                SubmitOptions::internal(),
            )
            .await
            .unwrap();
        assert!(matches!(outcome, ComparisonOutcome::Ready(_)));
        assert!(mem.jobs.is_empty());

        let err = svc.get_changes(&request()).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ChangesAreEmpty);
    }

    #[tokio::test]
    async fn test_failed_build_reported_until_recalculate() {
        let mem = memory_stores();
        seed(&mem, "v1");
        seed(&mem, "v2");
        let svc = service(&mem);
        let ctx = SecurityContext::for_user("alice");

        let build_id = match svc
            .ensure_comparison(&ctx, &request(), false, SubmitOptions::internal())
            .await
            .unwrap()
        {
            ComparisonOutcome::Accepted { build_id, .. } => build_id,
            other => panic!("unexpected {:?}", other),
        };
        mem.jobs.mark_error(&build_id, "diff failed", 1).await.unwrap();

        let outcome = svc
            .ensure_comparison(&ctx, &request(), false, SubmitOptions::internal())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ComparisonOutcome::Accepted {
                build_id: build_id.clone(),
                status: BuildStatus::Error,
                message: Some("diff failed".into()),
            }
        );

        let outcome = svc
            .ensure_comparison(&ctx, &request(), true, SubmitOptions::internal())
            .await
            .unwrap();
        match outcome {
            ComparisonOutcome::Accepted { build_id: fresh, status, .. } => {
                assert_ne!(fresh, build_id);
                assert_eq!(status, BuildStatus::NotStarted);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_complete_without_record_resubmits() {
        let mem = memory_stores();
        seed(&mem, "v1");
        seed(&mem, "v2");
        let svc = service(&mem);
        let ctx = SecurityContext::for_user("alice");

        let build_id = match svc
            .ensure_comparison(&ctx, &request(), false, SubmitOptions::internal())
            .await
            .unwrap()
        {
            ComparisonOutcome::Accepted { build_id, .. } => build_id,
            other => panic!("unexpected {:?}", other),
        };
        mem.jobs.claim_internal("internal:a", 1).await.unwrap();
        mem.jobs.mark_complete(&build_id, None, 2).await.unwrap();

        match svc
            .ensure_comparison(&ctx, &request(), false, SubmitOptions::internal())
            .await
            .unwrap()
        {
            ComparisonOutcome::Accepted { build_id: fresh, .. } => assert_ne!(fresh, build_id),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_summary_and_changes() {
        let mem = memory_stores();
        seed(&mem, "v1");
        seed(&mem, "v2");
        let svc = service(&mem);

        let err = svc.get_summary(&request()).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ComparisonNotFound);

        let entries = vec![ChangelogEntry {
            operation_id: "get-users".into(),
            api_type: crate::domain::ApiType::Rest,
            action: ChangeAction::Changed,
            previous_hash: Some("a".into()),
            current_hash: Some("b".into()),
        }];
        store_comparison(&mem, &entries, "c1").await;
        let summary = svc.get_summary(&request()).await.unwrap();
        assert_eq!(summary.summary.changed, 1);
        assert_eq!(svc.get_changes(&request()).await.unwrap(), entries);
    }
}
