// Published Version, Operation Group and Comparison Models

use crate::domain::build::{ApiType, PackageId, PackageRef, VersionStatus};
use serde::{Deserialize, Serialize};
use std::fmt;

/// (packageId, version, revision); revision starts at 1
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionRef {
    pub package_id: PackageId,
    pub version: String,
    pub revision: i32,
}

impl VersionRef {
    pub fn new(package_id: impl Into<String>, version: impl Into<String>, revision: i32) -> Self {
        Self {
            package_id: package_id.into(),
            version: version.into(),
            revision,
        }
    }

    pub fn as_package_ref(&self) -> PackageRef {
        PackageRef::pinned(&self.package_id, &self.version, self.revision)
    }
}

impl fmt::Display for VersionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.package_id, self.version, self.revision)
    }
}

/// Metadata of one published revision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    #[serde(flatten)]
    pub version_ref: VersionRef,
    pub status: VersionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_version_package_id: Option<PackageId>,
    #[serde(default)]
    pub labels: Vec<String>,
    /// Pinned references (`name@revision`)
    #[serde(default)]
    pub refs: Vec<PackageRef>,
    pub created_by: String,
    pub created_at: i64,
    pub build_id: String,
}

/// Published document (one per source file)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub slug: String,
    pub file_id: String,
    /// `json`, `yaml`, `graphql`, `proto`, `md`, ...
    pub format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_type: Option<ApiType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// sha-256 hex of the content
    pub hash: String,
}

/// API operation extracted from a document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub operation_id: String,
    pub api_type: ApiType,
    pub document_slug: String,
    /// HTTP method, or `query` / `mutation` for GraphQL
    pub method: String,
    /// HTTP path, or the GraphQL field name
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// sha-256 hex of the canonical operation body
    pub hash: String,
}

/// Export template attached to a group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupTemplate {
    pub file_name: String,
    pub artifact_ref: String,
}

/// User-defined subset of a version's operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationGroup {
    pub package_id: PackageId,
    pub version: String,
    pub api_type: ApiType,
    pub group_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub operation_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<GroupTemplate>,
}

/// Transformed output of a group build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformedDocuments {
    pub version_ref: VersionRef,
    pub api_type: ApiType,
    pub group_name: String,
    pub build_type: String,
    pub format: String,
    /// Artifact key of a ZIP of the transformed files
    pub artifact_ref: String,
    pub build_id: String,
    pub created_at: i64,
}

/// The 6-tuple a comparison is memoized under
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonKey {
    pub package_id: PackageId,
    pub version: String,
    pub revision: i32,
    pub previous_version_package_id: PackageId,
    pub previous_version: String,
    pub previous_revision: i32,
}

impl ComparisonKey {
    pub fn new(current: &VersionRef, previous: &VersionRef) -> Self {
        Self {
            package_id: current.package_id.clone(),
            version: current.version.clone(),
            revision: current.revision,
            previous_version_package_id: previous.package_id.clone(),
            previous_version: previous.version.clone(),
            previous_revision: previous.revision,
        }
    }

    pub fn current(&self) -> VersionRef {
        VersionRef::new(&self.package_id, &self.version, self.revision)
    }

    pub fn previous(&self) -> VersionRef {
        VersionRef::new(
            &self.previous_version_package_id,
            &self.previous_version,
            self.previous_revision,
        )
    }
}

impl fmt::Display for ComparisonKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} vs {}", self.current(), self.previous())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeAction {
    Added,
    Removed,
    Changed,
}

/// One line of a changelog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangelogEntry {
    pub operation_id: String,
    pub api_type: ApiType,
    pub action: ChangeAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_hash: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSummary {
    pub added: u32,
    pub removed: u32,
    pub changed: u32,
}

impl ChangeSummary {
    pub fn from_entries(entries: &[ChangelogEntry]) -> Self {
        entries.iter().fold(Self::default(), |mut acc, e| {
            match e.action {
                ChangeAction::Added => acc.added += 1,
                ChangeAction::Removed => acc.removed += 1,
                ChangeAction::Changed => acc.changed += 1,
            }
            acc
        })
    }

    pub fn is_empty(&self) -> bool {
        self.added == 0 && self.removed == 0 && self.changed == 0
    }
}

/// Memoized comparison
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonResult {
    pub key: ComparisonKey,
    pub valid: bool,
    pub summary: ChangeSummary,
    /// Artifact key of the changelog entries (JSON)
    pub artifact_ref: String,
    pub build_id: String,
    pub created_at: i64,
}

/// Record that a package was renamed or moved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageTransition {
    pub old_package_id: PackageId,
    pub new_package_id: PackageId,
}
