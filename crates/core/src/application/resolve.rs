// Version and reference resolution

use crate::domain::build::split_revision;
use crate::domain::{PackageRef, VersionRef};
use crate::error::{AppError, ErrorCode, Result};
use crate::port::VersionRepository;
use std::collections::{BTreeMap, HashSet, VecDeque};
use tracing::debug;

/// Resolve (package, version[@rev]) to a concrete published revision
pub async fn resolve_version(
    versions: &dyn VersionRepository,
    package_id: &str,
    version: &str,
) -> Result<VersionRef> {
    let (name, pinned) = split_revision(version)?;
    match pinned {
        Some(revision) => {
            let vref = VersionRef::new(package_id, name, revision);
            if versions.get_version(&vref).await?.is_some() {
                return Ok(vref);
            }
            ensure_package(versions, package_id).await?;
            Err(AppError::coded(
                ErrorCode::PublishedPackageVersionNotFound,
                format!("Revision {} of {}/{} is not published", revision, package_id, name),
            )
            .with_param("packageId", package_id)
            .with_param("version", version))
        }
        None => match versions.latest_revision(package_id, name).await? {
            Some(revision) => Ok(VersionRef::new(package_id, name, revision)),
            None => {
                ensure_package(versions, package_id).await?;
                Err(AppError::coded(
                    ErrorCode::PublishedVersionNotFound,
                    format!("Version {} of package {} is not published", name, package_id),
                )
                .with_param("packageId", package_id)
                .with_param("version", name))
            }
        },
    }
}

async fn ensure_package(versions: &dyn VersionRepository, package_id: &str) -> Result<()> {
    if versions.package_exists(package_id).await? {
        Ok(())
    } else {
        Err(package_not_found(package_id))
    }
}

pub fn package_not_found(package_id: &str) -> AppError {
    AppError::coded(
        ErrorCode::PackageNotFound,
        format!("Package {} not found", package_id),
    )
    .with_param("packageId", package_id)
}

/// Pin every reference to a revision, optionally expand the transitive
/// closure, then settle packages referenced at more than one version.
///
/// Reference edges may form cycles; the walk keeps a visited set.
pub async fn resolve_references(
    versions: &dyn VersionRepository,
    refs: &[PackageRef],
    resolve_refs: bool,
    resolve_conflicts: bool,
) -> Result<Vec<VersionRef>> {
    let mut pinned = Vec::with_capacity(refs.len());
    for r in refs {
        pinned.push(resolve_version(versions, &r.ref_id, &r.version).await?);
    }

    let mut visited: HashSet<VersionRef> = pinned.iter().cloned().collect();
    if resolve_refs {
        let mut queue: VecDeque<VersionRef> = pinned.iter().cloned().collect();
        while let Some(current) = queue.pop_front() {
            for next in versions.list_ref_edges(&current).await? {
                if visited.insert(next.clone()) {
                    debug!(from = %current, to = %next, "Following reference edge");
                    queue.push_back(next);
                }
            }
        }
    }

    let mut by_package: BTreeMap<String, Vec<VersionRef>> = BTreeMap::new();
    for vref in visited {
        by_package
            .entry(vref.package_id.clone())
            .or_default()
            .push(vref);
    }

    let mut resolved = Vec::with_capacity(by_package.len());
    for (package_id, mut candidates) in by_package {
        candidates.sort_by(|a, b| {
            a.revision
                .cmp(&b.revision)
                .then_with(|| a.version.cmp(&b.version))
        });
        if candidates.len() > 1 && !resolve_conflicts {
            let listed: Vec<String> = candidates.iter().map(|c| c.to_string()).collect();
            return Err(AppError::invalid_value(
                "dependencies",
                format!(
                    "Package {} is referenced at several versions: {}",
                    package_id,
                    listed.join(", ")
                ),
            )
            .with_param("refId", package_id));
        }
        if let Some(best) = candidates.pop() {
            resolved.push(best);
        }
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{VersionInfo, VersionStatus};
    use crate::port::version_repository::mocks::InMemoryVersionStore;

    fn publish(store: &InMemoryVersionStore, pkg: &str, version: &str, revision: i32) {
        store.seed_version(
            VersionInfo {
                version_ref: VersionRef::new(pkg, version, revision),
                status: VersionStatus::Release,
                previous_version: None,
                previous_version_package_id: None,
                labels: vec![],
                refs: vec![],
                created_by: "alice".into(),
                created_at: 0,
                build_id: format!("b-{}-{}", pkg, revision),
            },
            vec![],
            vec![],
        );
    }

    #[tokio::test]
    async fn test_resolve_latest_and_pinned() {
        let store = InMemoryVersionStore::new();
        publish(&store, "a", "v1", 1);
        publish(&store, "a", "v1", 2);

        let latest = resolve_version(&store, "a", "v1").await.unwrap();
        assert_eq!(latest.revision, 2);
        let pinned = resolve_version(&store, "a", "v1@1").await.unwrap();
        assert_eq!(pinned.revision, 1);

        let err = resolve_version(&store, "a", "v1@9").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::PublishedPackageVersionNotFound);
        let err = resolve_version(&store, "a", "v2").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::PublishedVersionNotFound);
        let err = resolve_version(&store, "zzz", "v1").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::PackageNotFound);
    }

    #[tokio::test]
    async fn test_transitive_walk_survives_cycles() {
        let store = InMemoryVersionStore::new();
        publish(&store, "a", "v1", 1);
        publish(&store, "b", "v1", 1);
        publish(&store, "c", "v1", 1);
        let a = VersionRef::new("a", "v1", 1);
        let b = VersionRef::new("b", "v1", 1);
        let c = VersionRef::new("c", "v1", 1);
        store.seed_edges(a.clone(), vec![b.clone()]);
        store.seed_edges(b.clone(), vec![c.clone()]);
        store.seed_edges(c.clone(), vec![a.clone()]);

        let refs = vec![PackageRef::new("a", "v1")];
        let direct = resolve_references(&store, &refs, false, false).await.unwrap();
        assert_eq!(direct, vec![a.clone()]);

        let all = resolve_references(&store, &refs, true, false).await.unwrap();
        assert_eq!(all, vec![a, b, c]);
    }

    #[tokio::test]
    async fn test_conflicts() {
        let store = InMemoryVersionStore::new();
        publish(&store, "a", "v1", 1);
        publish(&store, "a", "v1", 2);
        let refs = vec![PackageRef::new("a", "v1@1"), PackageRef::new("a", "v1")];

        let err = resolve_references(&store, &refs, false, false)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidParameterValue);

        let resolved = resolve_references(&store, &refs, false, true).await.unwrap();
        assert_eq!(resolved, vec![VersionRef::new("a", "v1", 2)]);
    }
}
