// Catalog Service
//
// Read side of published versions, operation groups, transformed documents
// and package transitions.

use crate::application::dispatcher::group_not_found;
use crate::application::resolve::{package_not_found, resolve_version};
use crate::application::stores::Stores;
use crate::domain::build::validate_identifier;
use crate::domain::{
    ApiType, BuildType, Document, GroupTemplate, Operation, OperationGroup, SecurityContext,
    TransformedDocuments, VersionInfo, VersionRef,
};
use crate::error::{AppError, ErrorCode, Result};
use std::collections::HashSet;
use tracing::info;

/// Longest rename chain followed before giving up
const MAX_TRANSITION_HOPS: usize = 16;

/// A group's address inside a version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupAddress {
    pub package_id: String,
    pub version: String,
    pub api_type: ApiType,
    pub group_name: String,
}

/// Template change carried by a group update
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TemplateUpdate {
    /// Field absent
    #[default]
    Keep,
    /// Field present but empty
    Clear,
    Replace {
        file_name: String,
        content: Vec<u8>,
    },
}

/// Partial update of a group
#[derive(Debug, Clone, Default)]
pub struct GroupPatch {
    pub description: Option<String>,
    pub operation_ids: Option<Vec<String>>,
    pub template: TemplateUpdate,
}

pub struct CatalogService {
    stores: Stores,
}

impl CatalogService {
    pub fn new(stores: Stores) -> Self {
        Self { stores }
    }

    /// Version info for `version` (latest revision unless `name@rev`)
    pub async fn get_version(&self, package_id: &str, version: &str) -> Result<VersionInfo> {
        let vref = resolve_version(self.stores.versions.as_ref(), package_id, version).await?;
        self.stores
            .versions
            .get_version(&vref)
            .await?
            .ok_or_else(|| AppError::InvalidState(format!("version {} vanished", vref)))
    }

    pub async fn list_documents(&self, package_id: &str, version: &str) -> Result<Vec<Document>> {
        let vref = resolve_version(self.stores.versions.as_ref(), package_id, version).await?;
        self.stores.versions.list_documents(&vref).await
    }

    pub async fn list_operations(
        &self,
        package_id: &str,
        version: &str,
        api_type: Option<ApiType>,
    ) -> Result<Vec<Operation>> {
        let vref = resolve_version(self.stores.versions.as_ref(), package_id, version).await?;
        let mut ops = self.stores.versions.list_operations(&vref).await?;
        if let Some(api_type) = api_type {
            ops.retain(|op| op.api_type == api_type);
        }
        Ok(ops)
    }

    pub async fn list_groups(
        &self,
        package_id: &str,
        version: &str,
        api_type: ApiType,
    ) -> Result<Vec<OperationGroup>> {
        resolve_version(self.stores.versions.as_ref(), package_id, version).await?;
        self.stores
            .groups
            .list_groups(package_id, version, api_type)
            .await
    }

    pub async fn get_group(&self, addr: &GroupAddress) -> Result<OperationGroup> {
        resolve_version(self.stores.versions.as_ref(), &addr.package_id, &addr.version).await?;
        self.stores
            .groups
            .get_group(&addr.package_id, &addr.version, addr.api_type, &addr.group_name)
            .await?
            .ok_or_else(|| group_not_found(&addr.group_name))
    }

    /// Operation ids of the latest revision for the api type
    async fn known_operations(
        &self,
        addr: &GroupAddress,
    ) -> Result<(VersionRef, HashSet<String>)> {
        let vref =
            resolve_version(self.stores.versions.as_ref(), &addr.package_id, &addr.version)
                .await?;
        let known = self
            .stores
            .versions
            .list_operations(&vref)
            .await?
            .into_iter()
            .filter(|op| op.api_type == addr.api_type)
            .map(|op| op.operation_id)
            .collect();
        Ok((vref, known))
    }

    fn check_operations(known: &HashSet<String>, ids: &[String]) -> Result<()> {
        if let Some(unknown) = ids.iter().find(|id| !known.contains(*id)) {
            return Err(AppError::invalid_value(
                "operationIds",
                format!("Operation {} is not part of this version", unknown),
            )
            .with_param("operationId", unknown.as_str()));
        }
        Ok(())
    }

    async fn store_template(&self, update: TemplateUpdate) -> Result<Option<Option<GroupTemplate>>> {
        Ok(match update {
            TemplateUpdate::Keep => None,
            TemplateUpdate::Clear => Some(None),
            TemplateUpdate::Replace { file_name, content } => {
                let artifact_ref = self.stores.artifacts.put(&content).await?;
                Some(Some(GroupTemplate {
                    file_name,
                    artifact_ref,
                }))
            }
        })
    }

    pub async fn create_group(
        &self,
        ctx: &SecurityContext,
        addr: &GroupAddress,
        description: Option<String>,
        operation_ids: Vec<String>,
        template: TemplateUpdate,
    ) -> Result<OperationGroup> {
        ctx.require_user()?;
        validate_identifier(&addr.group_name, "groupName")?;
        let (_, known) = self.known_operations(addr).await?;
        if self
            .stores
            .groups
            .get_group(&addr.package_id, &addr.version, addr.api_type, &addr.group_name)
            .await?
            .is_some()
        {
            return Err(AppError::invalid_value(
                "groupName",
                format!("Group {} already exists", addr.group_name),
            )
            .with_param("groupName", addr.group_name.as_str()));
        }
        Self::check_operations(&known, &operation_ids)?;

        let group = OperationGroup {
            package_id: addr.package_id.clone(),
            version: addr.version.clone(),
            api_type: addr.api_type,
            group_name: addr.group_name.clone(),
            description,
            operation_ids,
            template: self.store_template(template).await?.flatten(),
        };
        self.stores.groups.upsert_group(&group).await?;
        info!(
            package_id = %group.package_id,
            version = %group.version,
            group = %group.group_name,
            "Operation group created"
        );
        Ok(group)
    }

    pub async fn update_group(
        &self,
        ctx: &SecurityContext,
        addr: &GroupAddress,
        patch: GroupPatch,
    ) -> Result<OperationGroup> {
        ctx.require_user()?;
        let mut group = self.get_group(addr).await?;
        if let Some(ids) = patch.operation_ids {
            let (_, known) = self.known_operations(addr).await?;
            Self::check_operations(&known, &ids)?;
            group.operation_ids = ids;
        }
        if let Some(description) = patch.description {
            group.description = Some(description).filter(|d| !d.is_empty());
        }
        if let Some(template) = self.store_template(patch.template).await? {
            group.template = template;
        }
        self.stores.groups.upsert_group(&group).await?;
        Ok(group)
    }

    pub async fn delete_group(&self, ctx: &SecurityContext, addr: &GroupAddress) -> Result<()> {
        ctx.require_user()?;
        let deleted = self
            .stores
            .groups
            .delete_group(&addr.package_id, &addr.version, addr.api_type, &addr.group_name)
            .await?;
        if !deleted {
            return Err(group_not_found(&addr.group_name));
        }
        Ok(())
    }

    /// Export template content of a group
    pub async fn get_template(&self, addr: &GroupAddress) -> Result<(String, Vec<u8>)> {
        let group = self.get_group(addr).await?;
        let template = group.template.ok_or_else(|| {
            AppError::coded(
                ErrorCode::TransformedDocumentsNotFound,
                format!("Group {} has no export template", addr.group_name),
            )
        })?;
        let content = self
            .stores
            .artifacts
            .get(&template.artifact_ref)
            .await?
            .ok_or_else(|| {
                AppError::InvalidState(format!("template {} is missing", template.artifact_ref))
            })?;
        Ok((template.file_name, content))
    }

    /// Transformed documents bundle (ZIP) for a group
    pub async fn get_transformed(
        &self,
        addr: &GroupAddress,
        build_type: BuildType,
        format: &str,
    ) -> Result<(TransformedDocuments, Vec<u8>)> {
        let vref =
            resolve_version(self.stores.versions.as_ref(), &addr.package_id, &addr.version)
                .await?;
        let not_found = || {
            AppError::coded(
                ErrorCode::TransformedDocumentsNotFound,
                format!(
                    "No {} documents of group {} in {}",
                    build_type, addr.group_name, vref
                ),
            )
            .with_param("groupName", addr.group_name.as_str())
        };
        let docs = self
            .stores
            .versions
            .get_transformed(&vref, addr.api_type, &addr.group_name, build_type, format)
            .await?
            .ok_or_else(not_found)?;
        let bundle = self
            .stores
            .artifacts
            .get(&docs.artifact_ref)
            .await?
            .ok_or_else(not_found)?;
        Ok((docs, bundle))
    }

    /// Follow rename records from `package_id` to its current id.
    /// None when the package was never moved.
    pub async fn resolve_transition(&self, package_id: &str) -> Result<Option<String>> {
        let mut current = package_id.to_string();
        let mut seen = HashSet::from([current.clone()]);
        for _ in 0..MAX_TRANSITION_HOPS {
            match self.stores.transitions.find_transition(&current).await? {
                Some(next) if seen.insert(next.clone()) => current = next,
                _ => break,
            }
        }
        Ok((current != package_id).then_some(current))
    }

    /// Record that `old_package_id` moved to `new_package_id`
    pub async fn record_transition(&self, old_package_id: &str, new_package_id: &str) -> Result<()> {
        if !self.stores.versions.package_exists(new_package_id).await? {
            return Err(package_not_found(new_package_id));
        }
        self.stores
            .transitions
            .record_transition(old_package_id, new_package_id)
            .await?;
        info!(old = %old_package_id, new = %new_package_id, "Package transition recorded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::stores::testing::{memory_stores, MemoryStores};
    use crate::domain::VersionStatus;

    fn seed(mem: &MemoryStores) {
        let op = |id: &str| Operation {
            operation_id: id.into(),
            api_type: ApiType::Rest,
            document_slug: "users".into(),
            method: "get".into(),
            path: format!("/{}", id),
            title: None,
            hash: "h".into(),
        };
        mem.versions.seed_version(
            VersionInfo {
                version_ref: VersionRef::new("pkg", "v1", 1),
                status: VersionStatus::Release,
                previous_version: None,
                previous_version_package_id: None,
                labels: vec![],
                refs: vec![],
                created_by: "alice".into(),
                created_at: 0,
                build_id: "p1".into(),
            },
            vec![],
            vec![op("listUsers"), op("getUser")],
        );
    }

    fn addr() -> GroupAddress {
        GroupAddress {
            package_id: "pkg".into(),
            version: "v1".into(),
            api_type: ApiType::Rest,
            group_name: "public".into(),
        }
    }

    #[tokio::test]
    async fn test_group_lifecycle_and_template_semantics() {
        let mem = memory_stores();
        seed(&mem);
        let svc = CatalogService::new(mem.stores.clone());
        let ctx = SecurityContext::for_user("alice");

        let created = svc
            .create_group(
                &ctx,
                &addr(),
                None,
                vec!["listUsers".into()],
                TemplateUpdate::Replace {
                    file_name: "tpl.docx".into(),
                    content: b"template".to_vec(),
                },
            )
            .await
            .unwrap();
        assert!(created.template.is_some());

        // Absent template keeps it
        let kept = svc
            .update_group(
                &ctx,
                &addr(),
                GroupPatch {
                    operation_ids: Some(vec!["listUsers".into(), "getUser".into()]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(kept.operation_ids.len(), 2);
        assert_eq!(kept.template, created.template);
        let (name, content) = svc.get_template(&addr()).await.unwrap();
        assert_eq!(name, "tpl.docx");
        assert_eq!(content, b"template");

        // Empty template clears it
        let cleared = svc
            .update_group(
                &ctx,
                &addr(),
                GroupPatch {
                    template: TemplateUpdate::Clear,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(cleared.template.is_none());

        svc.delete_group(&ctx, &addr()).await.unwrap();
        let err = svc.get_group(&addr()).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::OperationGroupNotFound);
    }

    #[tokio::test]
    async fn test_unknown_operation_rejected() {
        let mem = memory_stores();
        seed(&mem);
        let svc = CatalogService::new(mem.stores.clone());
        let err = svc
            .create_group(
                &SecurityContext::for_user("alice"),
                &addr(),
                None,
                vec!["nope".into()],
                TemplateUpdate::Keep,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidParameterValue);
    }

    #[tokio::test]
    async fn test_transition_chain() {
        let mem = memory_stores();
        seed(&mem);
        mem.versions.add_package("pkg-new");
        mem.versions.add_package("pkg-newest");
        let svc = CatalogService::new(mem.stores.clone());

        assert_eq!(svc.resolve_transition("pkg").await.unwrap(), None);
        svc.record_transition("pkg-old", "pkg-new").await.unwrap();
        svc.record_transition("pkg-new", "pkg-newest").await.unwrap();
        assert_eq!(
            svc.resolve_transition("pkg-old").await.unwrap().as_deref(),
            Some("pkg-newest")
        );

        let err = svc.record_transition("a", "missing").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::PackageNotFound);
    }

    #[tokio::test]
    async fn test_transformed_documents_missing() {
        let mem = memory_stores();
        seed(&mem);
        let svc = CatalogService::new(mem.stores.clone());
        let err = svc
            .get_transformed(&addr(), BuildType::DocumentGroup, "json")
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::TransformedDocumentsNotFound);
    }
}
