// Local Build Processor
//
// Default in-process computation behind the internal executor. Produces the
// same result archives a remote builder uploads.

pub mod graphql;
pub mod openapi;

use crate::application::archive::{self, BuildResult, ResultInfo, SourceFile};
use crate::application::resolve::resolve_version;
use crate::application::stores::Stores;
use crate::domain::build::{ChangelogConfig, GroupTarget};
use crate::domain::{
    ApiType, BuildConfig, ChangeAction, ChangelogEntry, Document, MergedFormat, Operation,
    VersionRef,
};
use crate::error::{AppError, Result};
use crate::port::{content_key, BuildInput, BuildProcessor, ExecutionError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

/// Lowercase ASCII alphanumerics joined by single dashes
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

/// Document format from the file extension
pub fn detect_format(path: &str) -> &'static str {
    let ext = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "json" => "json",
        "yaml" | "yml" => "yaml",
        "graphql" | "gql" | "graphqls" => "graphql",
        "proto" => "proto",
        "md" | "markdown" => "md",
        _ => "unknown",
    }
}

/// One source file classified and parsed
struct Extracted {
    document: Document,
    content: Vec<u8>,
    operations: Vec<Operation>,
}

fn extract(file: &SourceFile, slug: String) -> Extracted {
    let format = detect_format(&file.path);
    let mut api_type = None;
    let mut title = None;
    let mut operations = Vec::new();
    match format {
        "json" | "yaml" => {
            if let Some(doc) = openapi::parse(&file.content, format) {
                if openapi::is_openapi(&doc) {
                    api_type = Some(ApiType::Rest);
                    title = openapi::title(&doc);
                    operations = openapi::extract_operations(&doc, &slug);
                }
            }
        }
        "graphql" => {
            api_type = Some(ApiType::Graphql);
            operations =
                graphql::extract_operations(&String::from_utf8_lossy(&file.content), &slug);
        }
        "proto" => api_type = Some(ApiType::Protobuf),
        _ => {}
    }
    Extracted {
        document: Document {
            slug,
            file_id: file.path.clone(),
            format: format.to_string(),
            api_type,
            title,
            hash: content_key(&file.content),
        },
        content: file.content.clone(),
        operations,
    }
}

/// Diff two operation sets; entries sorted by operationId
pub fn diff_operations(previous: &[Operation], current: &[Operation]) -> Vec<ChangelogEntry> {
    let before: BTreeMap<(&str, ApiType), &Operation> = previous
        .iter()
        .map(|op| ((op.operation_id.as_str(), op.api_type), op))
        .collect();
    let after: BTreeMap<(&str, ApiType), &Operation> = current
        .iter()
        .map(|op| ((op.operation_id.as_str(), op.api_type), op))
        .collect();

    let mut entries = Vec::new();
    for (key, op) in &after {
        match before.get(key) {
            None => entries.push(ChangelogEntry {
                operation_id: op.operation_id.clone(),
                api_type: op.api_type,
                action: ChangeAction::Added,
                previous_hash: None,
                current_hash: Some(op.hash.clone()),
            }),
            Some(prev) if prev.hash != op.hash => entries.push(ChangelogEntry {
                operation_id: op.operation_id.clone(),
                api_type: op.api_type,
                action: ChangeAction::Changed,
                previous_hash: Some(prev.hash.clone()),
                current_hash: Some(op.hash.clone()),
            }),
            Some(_) => {}
        }
    }
    for (key, op) in &before {
        if !after.contains_key(key) {
            entries.push(ChangelogEntry {
                operation_id: op.operation_id.clone(),
                api_type: op.api_type,
                action: ChangeAction::Removed,
                previous_hash: Some(op.hash.clone()),
                current_hash: None,
            });
        }
    }
    entries.sort_by(|a, b| {
        a.operation_id
            .cmp(&b.operation_id)
            .then_with(|| a.action.cmp(&b.action))
    });
    entries
}

/// Reads published versions from the stores it is wired with
pub struct LocalBuildProcessor {
    stores: Stores,
    max_file_bytes: u64,
}

impl LocalBuildProcessor {
    pub fn new(stores: Stores, max_file_bytes: u64) -> Self {
        Self {
            stores,
            max_file_bytes,
        }
    }

    fn publish(&self, input: &BuildInput) -> Result<BuildResult> {
        let config = match &input.config {
            BuildConfig::Publish(c) => c,
            _ => return Err(AppError::InvalidState("not a publish build".into())),
        };
        let files = match &input.sources {
            Some(bytes) => archive::read_sources(bytes, self.max_file_bytes)?,
            None => Vec::new(),
        };

        let mut result = BuildResult::new(ResultInfo {
            build_id: input.build_id.clone(),
            build_type: input.config.build_type(),
            package_id: config.package_id.clone(),
            version: config.version.clone(),
            revision: None,
            format: None,
        });
        let mut used: HashMap<String, usize> = HashMap::new();
        for file in &files {
            let base = {
                let stem = file
                    .path
                    .rsplit_once('.')
                    .map_or(file.path.as_str(), |(stem, _)| stem);
                match slugify(stem) {
                    s if s.is_empty() => "document".to_string(),
                    s => s,
                }
            };
            let n = used.entry(base.clone()).or_insert(0);
            *n += 1;
            let slug = if *n == 1 {
                base
            } else {
                format!("{}-{}", base, n)
            };
            let extracted = extract(file, slug);
            result.operations.extend(extracted.operations);
            result
                .documents
                .push((extracted.document, extracted.content));
        }

        // Duplicate operation ids across documents keep the first
        let mut seen = HashSet::new();
        result
            .operations
            .retain(|op| seen.insert((op.operation_id.clone(), op.api_type)));
        debug!(
            build_id = %input.build_id,
            documents = result.documents.len(),
            operations = result.operations.len(),
            "Sources processed"
        );
        Ok(result)
    }

    async fn changelog(&self, input: &BuildInput, config: &ChangelogConfig) -> Result<BuildResult> {
        let pinned = |version: &str, revision: Option<i32>| match revision {
            Some(rev) => format!("{}@{}", version, rev),
            None => version.to_string(),
        };
        let current = resolve_version(
            self.stores.versions.as_ref(),
            &config.package_id,
            &pinned(&config.version, config.comparison_revision),
        )
        .await?;
        let previous = resolve_version(
            self.stores.versions.as_ref(),
            &config.previous_version_package_id,
            &pinned(&config.previous_version, config.comparison_prev_revision),
        )
        .await?;
        let before = self.stores.versions.list_operations(&previous).await?;
        let after = self.stores.versions.list_operations(&current).await?;

        let mut result = BuildResult::new(ResultInfo {
            build_id: input.build_id.clone(),
            build_type: input.config.build_type(),
            package_id: config.package_id.clone(),
            version: config.version.clone(),
            revision: Some(current.revision),
            format: None,
        });
        result.changelog = Some(diff_operations(&before, &after));
        Ok(result)
    }

    /// Documents of `vref` holding any operation in `keep`, with content
    async fn group_documents(
        &self,
        vref: &VersionRef,
        keep: &HashSet<String>,
    ) -> Result<Vec<(Document, Vec<u8>)>> {
        let operations = self.stores.versions.list_operations(vref).await?;
        let slugs: HashSet<&str> = operations
            .iter()
            .filter(|op| keep.contains(&op.operation_id))
            .map(|op| op.document_slug.as_str())
            .collect();
        let mut docs = Vec::new();
        for doc in self.stores.versions.list_documents(vref).await? {
            if !slugs.contains(doc.slug.as_str()) {
                continue;
            }
            let content = self.stores.artifacts.get(&doc.hash).await?.ok_or_else(|| {
                AppError::InvalidState(format!("content of document {} is missing", doc.slug))
            })?;
            docs.push((doc, content));
        }
        Ok(docs)
    }

    async fn transformation(&self, input: &BuildInput, target: &GroupTarget) -> Result<BuildResult> {
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
            .ok_or_else(|| {
                crate::application::dispatcher::group_not_found(&target.group_name)
            })?;
        let keep: HashSet<String> = group.operation_ids.iter().cloned().collect();
        let docs = self.group_documents(&vref, &keep).await?;

        let mut result = BuildResult::new(ResultInfo {
            build_id: input.build_id.clone(),
            build_type: input.config.build_type(),
            package_id: target.package_id.clone(),
            version: target.version.clone(),
            revision: Some(vref.revision),
            format: Some(crate::application::dispatcher::transform_format(&input.config)),
        });

        match &input.config {
            BuildConfig::ReducedSourceSpecifications(_) => {
                for (doc, content) in docs {
                    result.transformed.push(SourceFile {
                        path: doc.file_id,
                        content,
                    });
                }
            }
            BuildConfig::DocumentGroup(_) => {
                for (doc, content) in docs {
                    match openapi::parse(&content, &doc.format)
                        .and_then(|v| openapi::filter_operations(&v, &keep))
                    {
                        Some(filtered) => result.transformed.push(SourceFile {
                            path: format!("{}.json", doc.slug),
                            content: serde_json::to_vec_pretty(&filtered)?,
                        }),
                        // Non-OpenAPI documents are carried whole
                        None => result.transformed.push(SourceFile {
                            path: doc.file_id,
                            content,
                        }),
                    }
                }
            }
            BuildConfig::MergedSpecification(c) => {
                let filtered: Vec<Value> = docs
                    .iter()
                    .filter_map(|(doc, content)| openapi::parse(content, &doc.format))
                    .filter_map(|v| openapi::filter_operations(&v, &keep))
                    .collect();
                if filtered.is_empty() {
                    return Err(AppError::InvalidState(format!(
                        "group {} has no REST operations to merge",
                        target.group_name
                    )));
                }
                let merged = openapi::merge(&filtered, &target.group_name);
                let content = match c.format {
                    MergedFormat::Json => serde_json::to_vec_pretty(&merged)?,
                    MergedFormat::Yaml => serde_yaml::to_string(&merged)
                        .map_err(|e| AppError::Internal(format!("yaml encoding: {}", e)))?
                        .into_bytes(),
                };
                result.transformed.push(SourceFile {
                    path: format!("{}.{}", slugify(&target.group_name), c.format.as_str()),
                    content,
                });
            }
            _ => return Err(AppError::InvalidState("not a transformation build".into())),
        }
        Ok(result)
    }

    async fn build(&self, input: &BuildInput) -> Result<BuildResult> {
        match &input.config {
            BuildConfig::Publish(_) => self.publish(input),
            BuildConfig::Changelog(c) => self.changelog(input, c).await,
            other => {
                let target = other
                    .group_target()
                    .ok_or_else(|| AppError::InvalidState("unknown build type".into()))?;
                self.transformation(input, target).await
            }
        }
    }
}

fn execution_error(e: AppError) -> ExecutionError {
    match e.code() {
        crate::error::ErrorCode::ArchiveSizeExceeded
        | crate::error::ErrorCode::UnsupportedSourceType => {
            ExecutionError::InvalidSources(e.to_string())
        }
        _ => ExecutionError::Failed(e.to_string()),
    }
}

#[async_trait]
impl BuildProcessor for LocalBuildProcessor {
    async fn process(&self, input: &BuildInput) -> std::result::Result<Vec<u8>, ExecutionError> {
        let result = self.build(input).await.map_err(execution_error)?;
        archive::write_result(&result).map_err(execution_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::archive::read_result;
    use crate::application::stores::testing::{memory_stores, MemoryStores};
    use crate::domain::job::test_support::publish_config;
    use crate::domain::{BuildConfigRequest, OperationGroup, VersionInfo, VersionStatus};
    use crate::port::GroupRepository;

    const USERS_V1: &str = r#"{
        "openapi": "3.0.3",
        "info": {"title": "Users", "version": "1"},
        "paths": {
            "/users": {"get": {"operationId": "listUsers"}},
            "/users/{id}": {"delete": {"operationId": "deleteUser"}}
        }
    }"#;

    fn sources(files: &[(&str, &str)]) -> Vec<u8> {
        let files: Vec<SourceFile> = files
            .iter()
            .map(|(p, c)| SourceFile {
                path: p.to_string(),
                content: c.as_bytes().to_vec(),
            })
            .collect();
        archive::write_sources(&files).unwrap()
    }

    fn processor(mem: &MemoryStores) -> LocalBuildProcessor {
        LocalBuildProcessor::new(mem.stores.clone(), 1024 * 1024)
    }

    #[test]
    fn test_slugify_and_format() {
        assert_eq!(slugify("specs/Users API"), "specs-users-api");
        assert_eq!(slugify("--a__b--"), "a-b");
        assert_eq!(detect_format("a/b.YML"), "yaml");
        assert_eq!(detect_format("schema.gql"), "graphql");
        assert_eq!(detect_format("README"), "unknown");
    }

    #[test]
    fn test_diff_is_sorted_and_complete() {
        let op = |id: &str, hash: &str| Operation {
            operation_id: id.into(),
            api_type: ApiType::Rest,
            document_slug: "d".into(),
            method: "get".into(),
            path: "/".into(),
            title: None,
            hash: hash.into(),
        };
        let before = vec![op("b", "1"), op("c", "1"), op("d", "1")];
        let after = vec![op("d", "2"), op("a", "1"), op("c", "1")];
        let entries = diff_operations(&before, &after);
        let summary: Vec<(&str, ChangeAction)> = entries
            .iter()
            .map(|e| (e.operation_id.as_str(), e.action))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("a", ChangeAction::Added),
                ("b", ChangeAction::Removed),
                ("d", ChangeAction::Changed),
            ]
        );
    }

    #[tokio::test]
    async fn test_publish_extracts_documents_and_operations() {
        let mem = memory_stores();
        let input = BuildInput {
            build_id: "b1".into(),
            config: publish_config("pkg", "v1"),
            sources: Some(sources(&[
                ("users.json", USERS_V1),
                ("schema.graphql", "type Query { me: String }"),
                ("notes.md", "# notes"),
            ])),
        };
        let zip = processor(&mem).process(&input).await.unwrap();
        let result = read_result(&zip).unwrap();
        assert_eq!(result.info.build_id, "b1");
        assert_eq!(result.documents.len(), 3);
        let users = result
            .documents
            .iter()
            .find(|(d, _)| d.slug == "users")
            .unwrap();
        assert_eq!(users.0.api_type, Some(ApiType::Rest));
        assert_eq!(users.0.title.as_deref(), Some("Users"));
        let mut ids: Vec<&str> = result
            .operations
            .iter()
            .map(|o| o.operation_id.as_str())
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["deleteUser", "listUsers", "query-me"]);
    }

    #[tokio::test]
    async fn test_non_zip_sources_are_invalid() {
        let mem = memory_stores();
        let input = BuildInput {
            build_id: "b1".into(),
            config: publish_config("pkg", "v1"),
            sources: Some(b"plain text".to_vec()),
        };
        let err = processor(&mem).process(&input).await.unwrap_err();
        assert!(matches!(err, ExecutionError::InvalidSources(_)));
    }

    async fn publish_v1(mem: &MemoryStores) -> VersionRef {
        let vref = VersionRef::new("pkg", "v1", 1);
        let doc_key = mem.stores.artifacts.put(USERS_V1.as_bytes()).await.unwrap();
        let doc = Document {
            slug: "users".into(),
            file_id: "users.json".into(),
            format: "json".into(),
            api_type: Some(ApiType::Rest),
            title: Some("Users".into()),
            hash: doc_key,
        };
        let doc_value: Value = serde_json::from_str(USERS_V1).unwrap();
        mem.versions.seed_version(
            VersionInfo {
                version_ref: vref.clone(),
                status: VersionStatus::Release,
                previous_version: None,
                previous_version_package_id: None,
                labels: vec![],
                refs: vec![],
                created_by: "alice".into(),
                created_at: 0,
                build_id: "p1".into(),
            },
            vec![doc],
            openapi::extract_operations(&doc_value, "users"),
        );
        mem.versions
            .upsert_group(&OperationGroup {
                package_id: "pkg".into(),
                version: "v1".into(),
                api_type: ApiType::Rest,
                group_name: "Public".into(),
                description: None,
                operation_ids: vec!["listUsers".into()],
                template: None,
            })
            .await
            .unwrap();
        vref
    }

    fn group_config(build_type: &str, format: Option<&str>) -> BuildConfig {
        BuildConfig::try_from(BuildConfigRequest {
            build_type: Some(build_type.into()),
            package_id: Some("pkg".into()),
            version: Some("v1".into()),
            api_type: Some("rest".into()),
            group_name: Some("Public".into()),
            format: format.map(str::to_string),
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_merged_yaml_keeps_only_group_operations() {
        let mem = memory_stores();
        publish_v1(&mem).await;
        let input = BuildInput {
            build_id: "t1".into(),
            config: group_config("mergedSpecification", Some("yaml")),
            sources: None,
        };
        let result = read_result(&processor(&mem).process(&input).await.unwrap()).unwrap();
        assert_eq!(result.info.revision, Some(1));
        assert_eq!(result.transformed.len(), 1);
        assert_eq!(result.transformed[0].path, "public.yaml");
        let merged = openapi::parse(&result.transformed[0].content, "yaml").unwrap();
        assert!(merged.pointer("/paths/~1users/get").is_some());
        assert!(merged.pointer("/paths/~1users~1{id}").is_none());
    }

    #[tokio::test]
    async fn test_reduced_source_returns_original_files() {
        let mem = memory_stores();
        publish_v1(&mem).await;
        let input = BuildInput {
            build_id: "t2".into(),
            config: group_config("reducedSourceSpecifications", None),
            sources: None,
        };
        let result = read_result(&processor(&mem).process(&input).await.unwrap()).unwrap();
        assert_eq!(result.transformed.len(), 1);
        assert_eq!(result.transformed[0].path, "users.json");
        assert_eq!(result.transformed[0].content, USERS_V1.as_bytes());
    }
}
