// Build Configuration Domain Model
//
// The wire form is one flat camelCase object; internally every build type is
// its own variant so that required fields and permitted formats are enforced
// by construction.

use crate::error::{AppError, ErrorCode};
use serde::{Deserialize, Serialize};

/// Package identifier (tenant-scoped)
pub type PackageId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BuildType {
    Publish,
    Changelog,
    DocumentGroup,
    ReducedSourceSpecifications,
    MergedSpecification,
}

impl BuildType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildType::Publish => "publish",
            BuildType::Changelog => "changelog",
            BuildType::DocumentGroup => "documentGroup",
            BuildType::ReducedSourceSpecifications => "reducedSourceSpecifications",
            BuildType::MergedSpecification => "mergedSpecification",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "publish" => Some(BuildType::Publish),
            "changelog" => Some(BuildType::Changelog),
            "documentGroup" => Some(BuildType::DocumentGroup),
            "reducedSourceSpecifications" => Some(BuildType::ReducedSourceSpecifications),
            "mergedSpecification" => Some(BuildType::MergedSpecification),
            _ => None,
        }
    }

    pub fn is_group_transform(&self) -> bool {
        matches!(
            self,
            BuildType::DocumentGroup
                | BuildType::ReducedSourceSpecifications
                | BuildType::MergedSpecification
        )
    }
}

impl std::fmt::Display for BuildType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status a published version is placed into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VersionStatus {
    Draft,
    Release,
    Archived,
}

impl VersionStatus {
    pub const ALL: [VersionStatus; 3] = [
        VersionStatus::Draft,
        VersionStatus::Release,
        VersionStatus::Archived,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VersionStatus::Draft => "draft",
            VersionStatus::Release => "release",
            VersionStatus::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(VersionStatus::Draft),
            "release" => Some(VersionStatus::Release),
            "archived" => Some(VersionStatus::Archived),
            _ => None,
        }
    }
}

impl std::fmt::Display for VersionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ApiType {
    Rest,
    Graphql,
    Protobuf,
}

impl ApiType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiType::Rest => "rest",
            ApiType::Graphql => "graphql",
            ApiType::Protobuf => "protobuf",
        }
    }

    pub fn parse(s: &str) -> crate::error::Result<Self> {
        match s {
            "rest" => Ok(ApiType::Rest),
            "graphql" => Ok(ApiType::Graphql),
            "protobuf" => Ok(ApiType::Protobuf),
            other => Err(AppError::coded(
                ErrorCode::UnsupportedApiType,
                format!("API type '{}' is not supported", other),
            )
            .with_param("apiType", other)),
        }
    }
}

impl std::fmt::Display for ApiType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output formats for `documentGroup`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DocumentGroupFormat {
    #[default]
    Json,
}

/// Output formats for `mergedSpecification`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergedFormat {
    Json,
    Yaml,
}

impl MergedFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergedFormat::Json => "json",
            MergedFormat::Yaml => "yaml",
        }
    }
}

/// Reference from a published version to another package's version.
///
/// `version` may be pinned to a revision with the `name@revision` suffix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageRef {
    pub ref_id: PackageId,
    pub version: String,
}

impl PackageRef {
    pub fn new(ref_id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            ref_id: ref_id.into(),
            version: version.into(),
        }
    }

    /// Split into (version name, pinned revision)
    pub fn split(&self) -> crate::error::Result<(&str, Option<i32>)> {
        split_revision(&self.version)
    }

    pub fn pinned(ref_id: &str, version: &str, revision: i32) -> Self {
        Self::new(ref_id, format!("{}@{}", version, revision))
    }
}

/// Parse `name` or `name@revision`
pub fn split_revision(version: &str) -> crate::error::Result<(&str, Option<i32>)> {
    match version.split_once('@') {
        None => Ok((version, None)),
        Some((name, rev)) => {
            let revision: i32 = rev.parse().map_err(|_| {
                AppError::invalid_value("version", format!("Invalid revision in '{}'", version))
            })?;
            if name.is_empty() || revision < 1 {
                return Err(AppError::invalid_value(
                    "version",
                    format!("Invalid pinned version '{}'", version),
                ));
            }
            Ok((name, Some(revision)))
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublishConfig {
    pub package_id: PackageId,
    pub version: String,
    pub previous_version: Option<String>,
    pub previous_version_package_id: Option<PackageId>,
    pub status: VersionStatus,
    pub version_labels: Vec<String>,
    pub refs: Vec<PackageRef>,
    pub created_by: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangelogConfig {
    pub package_id: PackageId,
    pub version: String,
    pub previous_version_package_id: PackageId,
    pub previous_version: String,
    pub comparison_revision: Option<i32>,
    pub comparison_prev_revision: Option<i32>,
    pub created_by: String,
}

/// The (package, version, group) a transformation build reads from
#[derive(Debug, Clone, PartialEq)]
pub struct GroupTarget {
    pub package_id: PackageId,
    pub version: String,
    pub api_type: ApiType,
    pub group_name: String,
    pub created_by: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentGroupConfig {
    pub target: GroupTarget,
    pub format: DocumentGroupFormat,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergedSpecificationConfig {
    pub target: GroupTarget,
    pub format: MergedFormat,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReducedSourceConfig {
    pub target: GroupTarget,
}

/// Build configuration, one variant per build type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BuildConfigRequest", into = "BuildConfigRequest")]
pub enum BuildConfig {
    Publish(PublishConfig),
    Changelog(ChangelogConfig),
    DocumentGroup(DocumentGroupConfig),
    MergedSpecification(MergedSpecificationConfig),
    ReducedSourceSpecifications(ReducedSourceConfig),
}

impl BuildConfig {
    pub fn build_type(&self) -> BuildType {
        match self {
            BuildConfig::Publish(_) => BuildType::Publish,
            BuildConfig::Changelog(_) => BuildType::Changelog,
            BuildConfig::DocumentGroup(_) => BuildType::DocumentGroup,
            BuildConfig::MergedSpecification(_) => BuildType::MergedSpecification,
            BuildConfig::ReducedSourceSpecifications(_) => BuildType::ReducedSourceSpecifications,
        }
    }

    pub fn group_target(&self) -> Option<&GroupTarget> {
        match self {
            BuildConfig::DocumentGroup(c) => Some(&c.target),
            BuildConfig::MergedSpecification(c) => Some(&c.target),
            BuildConfig::ReducedSourceSpecifications(c) => Some(&c.target),
            _ => None,
        }
    }

    pub fn package_id(&self) -> &str {
        match self {
            BuildConfig::Publish(c) => &c.package_id,
            BuildConfig::Changelog(c) => &c.package_id,
            _ => self
                .group_target()
                .map(|t| t.package_id.as_str())
                .unwrap_or_default(),
        }
    }

    pub fn version(&self) -> &str {
        match self {
            BuildConfig::Publish(c) => &c.version,
            BuildConfig::Changelog(c) => &c.version,
            _ => self
                .group_target()
                .map(|t| t.version.as_str())
                .unwrap_or_default(),
        }
    }

    pub fn created_by(&self) -> &str {
        match self {
            BuildConfig::Publish(c) => &c.created_by,
            BuildConfig::Changelog(c) => &c.created_by,
            _ => self
                .group_target()
                .map(|t| t.created_by.as_str())
                .unwrap_or_default(),
        }
    }

    pub fn set_created_by(&mut self, user: impl Into<String>) {
        let user = user.into();
        match self {
            BuildConfig::Publish(c) => c.created_by = user,
            BuildConfig::Changelog(c) => c.created_by = user,
            BuildConfig::DocumentGroup(c) => c.target.created_by = user,
            BuildConfig::MergedSpecification(c) => c.target.created_by = user,
            BuildConfig::ReducedSourceSpecifications(c) => c.target.created_by = user,
        }
    }

    /// Version status the build publishes into (publish builds only)
    pub fn target_status(&self) -> Option<VersionStatus> {
        match self {
            BuildConfig::Publish(c) => Some(c.status),
            _ => None,
        }
    }

    /// Flat wire form
    pub fn to_request(&self) -> BuildConfigRequest {
        BuildConfigRequest::from(self.clone())
    }
}

/// Flat wire representation of a [`BuildConfig`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildConfigRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_version_package_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comparison_revision: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comparison_prev_revision: Option<i32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub refs: Vec<PackageRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub version_labels: Vec<String>,
}

fn required(value: Option<String>, name: &str) -> crate::error::Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(AppError::missing(name)),
    }
}

/// Package ids and group names: ASCII alphanumerics plus `.`, `-`, `_`
pub fn validate_identifier(value: &str, param: &str) -> crate::error::Result<()> {
    if value.is_empty() || value.len() > 255 {
        return Err(AppError::invalid_value(
            param,
            format!("'{}' must be 1..=255 characters", param),
        ));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
    {
        return Err(AppError::invalid_value(
            param,
            format!("'{}' contains forbidden characters: {}", param, value),
        ));
    }
    Ok(())
}

/// Version names may not contain path separators, control characters or `@`
pub fn validate_version_name(value: &str, param: &str) -> crate::error::Result<()> {
    if value.is_empty() || value.len() > 255 {
        return Err(AppError::invalid_value(
            param,
            format!("'{}' must be 1..=255 characters", param),
        ));
    }
    if value
        .chars()
        .any(|c| c.is_control() || matches!(c, '/' | '\\' | '@' | '?' | '#'))
    {
        return Err(AppError::coded(
            ErrorCode::AliasContainsForbiddenChars,
            format!("Version '{}' contains forbidden characters", value),
        )
        .with_param("version", value));
    }
    Ok(())
}

fn unsupported_format(build_type: BuildType, format: &str) -> AppError {
    AppError::coded(
        ErrorCode::UnsupportedFormat,
        format!(
            "Format '{}' is not supported for build type '{}'",
            format, build_type
        ),
    )
    .with_param("format", format)
    .with_param("buildType", build_type.as_str())
}

fn group_target(req: &mut BuildConfigRequest) -> crate::error::Result<GroupTarget> {
    let package_id = required(req.package_id.take(), "packageId")?;
    let version = required(req.version.take(), "version")?;
    let api_type = ApiType::parse(&required(req.api_type.take(), "apiType")?)?;
    let group_name = required(req.group_name.take(), "groupName")?;
    validate_identifier(&package_id, "packageId")?;
    validate_version_name(&version, "version")?;
    Ok(GroupTarget {
        package_id,
        version,
        api_type,
        group_name,
        created_by: req.created_by.take().unwrap_or_default(),
    })
}

impl TryFrom<BuildConfigRequest> for BuildConfig {
    type Error = AppError;

    fn try_from(mut req: BuildConfigRequest) -> Result<Self, Self::Error> {
        let type_str = required(req.build_type.take(), "buildType")?;
        let build_type = BuildType::parse(&type_str).ok_or_else(|| {
            AppError::invalid_value("buildType", format!("Unknown build type '{}'", type_str))
        })?;

        match build_type {
            BuildType::Publish => {
                let package_id = required(req.package_id, "packageId")?;
                let version = required(req.version, "version")?;
                validate_identifier(&package_id, "packageId")?;
                validate_version_name(&version, "version")?;
                if let Some(format) = req.format {
                    return Err(unsupported_format(build_type, &format));
                }
                let status = match req.status.as_deref() {
                    None => VersionStatus::Draft,
                    Some(s) => VersionStatus::parse(s).ok_or_else(|| {
                        AppError::invalid_value("status", format!("Unknown version status '{}'", s))
                    })?,
                };
                if let Some(prev) = &req.previous_version {
                    validate_version_name(prev, "previousVersion")?;
                }
                if let Some(prev_pkg) = &req.previous_version_package_id {
                    validate_identifier(prev_pkg, "previousVersionPackageId")?;
                }
                for r in &req.refs {
                    validate_identifier(&r.ref_id, "refId")?;
                    r.split()?;
                }
                Ok(BuildConfig::Publish(PublishConfig {
                    package_id,
                    version,
                    previous_version: req.previous_version,
                    previous_version_package_id: req.previous_version_package_id,
                    status,
                    version_labels: req.version_labels,
                    refs: req.refs,
                    created_by: req.created_by.unwrap_or_default(),
                }))
            }
            BuildType::Changelog => {
                let package_id = required(req.package_id, "packageId")?;
                let version = required(req.version, "version")?;
                let previous_version = required(req.previous_version, "previousVersion")?;
                validate_identifier(&package_id, "packageId")?;
                validate_version_name(&version, "version")?;
                validate_version_name(&previous_version, "previousVersion")?;
                if let Some(format) = req.format {
                    return Err(unsupported_format(build_type, &format));
                }
                let previous_version_package_id = req
                    .previous_version_package_id
                    .filter(|p| !p.is_empty())
                    .unwrap_or_else(|| package_id.clone());
                validate_identifier(&previous_version_package_id, "previousVersionPackageId")?;
                for (name, rev) in [
                    ("comparisonRevision", req.comparison_revision),
                    ("comparisonPrevRevision", req.comparison_prev_revision),
                ] {
                    if matches!(rev, Some(r) if r < 1) {
                        return Err(AppError::invalid_value(name, "Revision must be >= 1"));
                    }
                }
                Ok(BuildConfig::Changelog(ChangelogConfig {
                    package_id,
                    version,
                    previous_version_package_id,
                    previous_version,
                    comparison_revision: req.comparison_revision,
                    comparison_prev_revision: req.comparison_prev_revision,
                    created_by: req.created_by.unwrap_or_default(),
                }))
            }
            BuildType::DocumentGroup => {
                let format = match req.format.as_deref() {
                    None | Some("json") => DocumentGroupFormat::Json,
                    Some(other) => return Err(unsupported_format(build_type, other)),
                };
                let target = group_target(&mut req)?;
                Ok(BuildConfig::DocumentGroup(DocumentGroupConfig { target, format }))
            }
            BuildType::MergedSpecification => {
                let format = match req.format.as_deref() {
                    None | Some("json") => MergedFormat::Json,
                    Some("yaml") => MergedFormat::Yaml,
                    Some(other) => return Err(unsupported_format(build_type, other)),
                };
                let target = group_target(&mut req)?;
                Ok(BuildConfig::MergedSpecification(MergedSpecificationConfig {
                    target,
                    format,
                }))
            }
            BuildType::ReducedSourceSpecifications => {
                if let Some(format) = req.format.as_deref() {
                    return Err(unsupported_format(build_type, format));
                }
                let target = group_target(&mut req)?;
                Ok(BuildConfig::ReducedSourceSpecifications(
                    ReducedSourceConfig { target },
                ))
            }
        }
    }
}

impl From<BuildConfig> for BuildConfigRequest {
    fn from(config: BuildConfig) -> Self {
        let build_type = Some(config.build_type().as_str().to_string());
        match config {
            BuildConfig::Publish(c) => BuildConfigRequest {
                build_type,
                package_id: Some(c.package_id),
                version: Some(c.version),
                previous_version: c.previous_version,
                previous_version_package_id: c.previous_version_package_id,
                status: Some(c.status.as_str().to_string()),
                created_by: Some(c.created_by).filter(|s| !s.is_empty()),
                refs: c.refs,
                version_labels: c.version_labels,
                ..Default::default()
            },
            BuildConfig::Changelog(c) => BuildConfigRequest {
                build_type,
                package_id: Some(c.package_id),
                version: Some(c.version),
                previous_version: Some(c.previous_version),
                previous_version_package_id: Some(c.previous_version_package_id),
                comparison_revision: c.comparison_revision,
                comparison_prev_revision: c.comparison_prev_revision,
                created_by: Some(c.created_by).filter(|s| !s.is_empty()),
                ..Default::default()
            },
            BuildConfig::DocumentGroup(c) => group_request(build_type, c.target, Some("json")),
            BuildConfig::MergedSpecification(c) => {
                group_request(build_type, c.target, Some(c.format.as_str()))
            }
            BuildConfig::ReducedSourceSpecifications(c) => {
                group_request(build_type, c.target, None)
            }
        }
    }
}

fn group_request(
    build_type: Option<String>,
    target: GroupTarget,
    format: Option<&str>,
) -> BuildConfigRequest {
    BuildConfigRequest {
        build_type,
        package_id: Some(target.package_id),
        version: Some(target.version),
        api_type: Some(target.api_type.as_str().to_string()),
        group_name: Some(target.group_name),
        format: format.map(str::to_string),
        created_by: Some(target.created_by).filter(|s| !s.is_empty()),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> crate::error::Result<BuildConfig> {
        let req: BuildConfigRequest = serde_json::from_value(value).unwrap();
        BuildConfig::try_from(req)
    }

    #[test]
    fn test_publish_defaults_to_draft() {
        let config = parse(json!({
            "buildType": "publish",
            "packageId": "pkg.a",
            "version": "2024.1"
        }))
        .unwrap();
        assert_eq!(config.build_type(), BuildType::Publish);
        assert_eq!(config.target_status(), Some(VersionStatus::Draft));
    }

    #[test]
    fn test_missing_build_type() {
        let err = parse(json!({"packageId": "pkg"})).unwrap_err();
        assert_eq!(err.code(), ErrorCode::RequiredParamsMissing);
    }

    #[test]
    fn test_changelog_requires_previous_version() {
        let err = parse(json!({
            "buildType": "changelog",
            "packageId": "pkg",
            "version": "v2"
        }))
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::RequiredParamsMissing);
    }

    #[test]
    fn test_changelog_previous_package_defaults_to_package() {
        let config = parse(json!({
            "buildType": "changelog",
            "packageId": "pkg",
            "version": "v2",
            "previousVersion": "v1"
        }))
        .unwrap();
        match config {
            BuildConfig::Changelog(c) => assert_eq!(c.previous_version_package_id, "pkg"),
            other => panic!("unexpected variant {:?}", other),
        }
    }

    #[test]
    fn test_format_compatibility_table() {
        let base = |build_type: &str, format: Option<&str>| {
            let mut v = json!({
                "buildType": build_type,
                "packageId": "pkg",
                "version": "v1",
                "apiType": "rest",
                "groupName": "public"
            });
            if let Some(f) = format {
                v["format"] = json!(f);
            }
            parse(v)
        };

        assert!(base("documentGroup", None).is_ok());
        assert!(base("documentGroup", Some("json")).is_ok());
        assert_eq!(
            base("documentGroup", Some("yaml")).unwrap_err().code(),
            ErrorCode::UnsupportedFormat
        );

        assert!(base("mergedSpecification", Some("json")).is_ok());
        assert!(base("mergedSpecification", Some("yaml")).is_ok());
        assert_eq!(
            base("mergedSpecification", Some("html")).unwrap_err().code(),
            ErrorCode::UnsupportedFormat
        );

        assert!(base("reducedSourceSpecifications", None).is_ok());
        assert_eq!(
            base("reducedSourceSpecifications", Some("json"))
                .unwrap_err()
                .code(),
            ErrorCode::UnsupportedFormat
        );
    }

    #[test]
    fn test_unknown_api_type() {
        let err = parse(json!({
            "buildType": "documentGroup",
            "packageId": "pkg",
            "version": "v1",
            "apiType": "soap",
            "groupName": "g"
        }))
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnsupportedApiType);
    }

    #[test]
    fn test_version_forbidden_chars() {
        let err = parse(json!({
            "buildType": "publish",
            "packageId": "pkg",
            "version": "v1/../x"
        }))
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::AliasContainsForbiddenChars);
    }

    #[test]
    fn test_serde_goes_through_wire_form() {
        let config = parse(json!({
            "buildType": "mergedSpecification",
            "packageId": "pkg",
            "version": "v1",
            "apiType": "graphql",
            "groupName": "g",
            "format": "yaml"
        }))
        .unwrap();
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["format"], "yaml");
        assert_eq!(value["apiType"], "graphql");
        let back: BuildConfig = serde_json::from_value(value).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_split_revision() {
        assert_eq!(split_revision("v1").unwrap(), ("v1", None));
        assert_eq!(split_revision("v1@4").unwrap(), ("v1", Some(4)));
        assert!(split_revision("v1@zero").is_err());
        assert!(split_revision("@3").is_err());
        assert!(split_revision("v1@0").is_err());
    }
}
