// Build Archive Codec
//
// Input archive (handed to builders):
//   config.json          wire BuildConfig plus `buildId`
//   sources/**           uploaded source files
//
// Result archive (produced by builders):
//   info.json            build id / type echo
//   documents.json       document metadata
//   documents/<fileId>   document content
//   operations.json
//   groups.json          optional
//   changelog.json       changelog builds
//   transformed/**       group transformation output

use crate::domain::{
    ApiType, BuildConfig, BuildConfigRequest, BuildType, ChangelogEntry, Document, Operation,
};
use crate::error::{AppError, ErrorCode, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{Cursor, Read, Write};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub const CONFIG_FILE: &str = "config.json";
pub const SOURCES_DIR: &str = "sources/";
pub const INFO_FILE: &str = "info.json";
pub const DOCUMENTS_FILE: &str = "documents.json";
pub const DOCUMENT_CONTENT_DIR: &str = "documents/";
pub const OPERATIONS_FILE: &str = "operations.json";
pub const GROUPS_FILE: &str = "groups.json";
pub const CHANGELOG_FILE: &str = "changelog.json";
pub const TRANSFORMED_DIR: &str = "transformed/";

/// Upper bound on any single decompressed entry of a trusted archive
const MAX_ENTRY_BYTES: u64 = 512 * 1024 * 1024;

/// One file of an uploaded sources archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Relative path inside the archive, `/`-separated
    pub path: String,
    pub content: Vec<u8>,
}

impl SourceFile {
    /// sha-256 over path and content
    pub fn hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.path.as_bytes());
        hasher.update([0u8]);
        hasher.update(&self.content);
        hex::encode(hasher.finalize())
    }
}

pub fn source_hashes(files: &[SourceFile]) -> Vec<String> {
    files.iter().map(SourceFile::hash).collect()
}

fn options() -> SimpleFileOptions {
    SimpleFileOptions::default().compression_method(CompressionMethod::Deflated)
}

/// Read one entry, rejecting it when either the declared or the actual size is over `limit`
fn read_entry(entry: &mut impl Read, declared: u64, path: &str, limit: u64) -> Result<Vec<u8>> {
    if declared > limit {
        return Err(file_too_large(path, limit));
    }
    let mut content = Vec::new();
    entry.take(limit + 1).read_to_end(&mut content)?;
    if content.len() as u64 > limit {
        return Err(file_too_large(path, limit));
    }
    Ok(content)
}

fn file_too_large(path: &str, limit: u64) -> AppError {
    AppError::coded(
        ErrorCode::ArchiveSizeExceeded,
        format!("File '{}' exceeds the limit of {} bytes", path, limit),
    )
    .with_param("file", path)
    .with_param("limit", limit.to_string())
}

/// Unpack a user-supplied sources ZIP, enforcing the per-file limit
pub fn read_sources(zip_bytes: &[u8], max_file_bytes: u64) -> Result<Vec<SourceFile>> {
    let mut archive = ZipArchive::new(Cursor::new(zip_bytes)).map_err(|e| {
        AppError::coded(
            ErrorCode::UnsupportedSourceType,
            format!("Sources must be a ZIP archive: {}", e),
        )
        .with_param("param", "sources")
    })?;

    let mut files = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let path = match entry.enclosed_name() {
            Some(p) => p.to_string_lossy().replace('\\', "/"),
            None => {
                return Err(AppError::invalid_value(
                    "sources",
                    format!("Unsafe path in sources archive: {}", entry.name()),
                ))
            }
        };
        let declared = entry.size();
        let content = read_entry(&mut entry, declared, &path, max_file_bytes)?;
        files.push(SourceFile { path, content });
    }
    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

/// Re-pack sources as a flat ZIP (paths relative to the archive root)
pub fn write_sources(files: &[SourceFile]) -> Result<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for file in files {
        writer.start_file(file.path.as_str(), options())?;
        writer.write_all(&file.content)?;
    }
    Ok(writer.finish()?.into_inner())
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InputConfigFile {
    build_id: String,
    #[serde(flatten)]
    config: BuildConfigRequest,
}

/// Decoded input archive
#[derive(Debug, Clone)]
pub struct InputArchive {
    pub build_id: String,
    pub config: BuildConfig,
    pub sources: Vec<SourceFile>,
}

pub fn write_input(build_id: &str, config: &BuildConfig, sources: &[SourceFile]) -> Result<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let header = InputConfigFile {
        build_id: build_id.to_string(),
        config: config.to_request(),
    };
    writer.start_file(CONFIG_FILE, options())?;
    writer.write_all(&serde_json::to_vec_pretty(&header)?)?;
    for file in sources {
        writer.start_file(format!("{}{}", SOURCES_DIR, file.path), options())?;
        writer.write_all(&file.content)?;
    }
    Ok(writer.finish()?.into_inner())
}

pub fn read_input(zip_bytes: &[u8]) -> Result<InputArchive> {
    let mut archive = ZipArchive::new(Cursor::new(zip_bytes))?;
    let mut header: Option<InputConfigFile> = None;
    let mut sources = Vec::new();

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        let declared = entry.size();
        let content = read_entry(&mut entry, declared, &name, MAX_ENTRY_BYTES)?;
        if name == CONFIG_FILE {
            header = Some(serde_json::from_slice(&content)?);
        } else if let Some(path) = name.strip_prefix(SOURCES_DIR) {
            sources.push(SourceFile {
                path: path.to_string(),
                content,
            });
        }
    }

    let header = header.ok_or_else(|| {
        AppError::InvalidState(format!("input archive has no {}", CONFIG_FILE))
    })?;
    sources.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(InputArchive {
        build_id: header.build_id,
        config: BuildConfig::try_from(header.config)?,
        sources,
    })
}

/// `info.json` of a result archive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultInfo {
    pub build_id: String,
    pub build_type: BuildType,
    pub package_id: String,
    pub version: String,
    /// Revision a transformation was computed from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

/// Group definition carried in `groups.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultGroup {
    pub group_name: String,
    pub api_type: ApiType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub operation_ids: Vec<String>,
}

/// Decoded result archive
#[derive(Debug, Clone, PartialEq)]
pub struct BuildResult {
    pub info: ResultInfo,
    /// Metadata with content
    pub documents: Vec<(Document, Vec<u8>)>,
    pub operations: Vec<Operation>,
    pub groups: Vec<ResultGroup>,
    pub changelog: Option<Vec<ChangelogEntry>>,
    /// Transformed files, path relative to `transformed/`
    pub transformed: Vec<SourceFile>,
}

impl BuildResult {
    pub fn new(info: ResultInfo) -> Self {
        Self {
            info,
            documents: Vec::new(),
            operations: Vec::new(),
            groups: Vec::new(),
            changelog: None,
            transformed: Vec::new(),
        }
    }
}

pub fn write_result(result: &BuildResult) -> Result<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));

    writer.start_file(INFO_FILE, options())?;
    writer.write_all(&serde_json::to_vec_pretty(&result.info)?)?;

    let docs: Vec<&Document> = result.documents.iter().map(|(d, _)| d).collect();
    writer.start_file(DOCUMENTS_FILE, options())?;
    writer.write_all(&serde_json::to_vec_pretty(&docs)?)?;
    for (doc, content) in &result.documents {
        writer.start_file(format!("{}{}", DOCUMENT_CONTENT_DIR, doc.file_id), options())?;
        writer.write_all(content)?;
    }

    writer.start_file(OPERATIONS_FILE, options())?;
    writer.write_all(&serde_json::to_vec_pretty(&result.operations)?)?;

    if !result.groups.is_empty() {
        writer.start_file(GROUPS_FILE, options())?;
        writer.write_all(&serde_json::to_vec_pretty(&result.groups)?)?;
    }
    if let Some(changelog) = &result.changelog {
        writer.start_file(CHANGELOG_FILE, options())?;
        writer.write_all(&serde_json::to_vec_pretty(changelog)?)?;
    }
    for file in &result.transformed {
        writer.start_file(format!("{}{}", TRANSFORMED_DIR, file.path), options())?;
        writer.write_all(&file.content)?;
    }
    Ok(writer.finish()?.into_inner())
}

fn invalid_result(message: impl Into<String>) -> AppError {
    AppError::coded(ErrorCode::BadRequestBody, message).with_param("param", "data")
}

/// Parse and validate a result archive
pub fn read_result(zip_bytes: &[u8]) -> Result<BuildResult> {
    read_result_bounded(zip_bytes, MAX_ENTRY_BYTES)
}

fn read_result_bounded(zip_bytes: &[u8], max_entry_bytes: u64) -> Result<BuildResult> {
    let mut archive = ZipArchive::new(Cursor::new(zip_bytes))
        .map_err(|e| invalid_result(format!("Result is not a ZIP archive: {}", e)))?;

    let mut info: Option<ResultInfo> = None;
    let mut doc_meta: Vec<Document> = Vec::new();
    let mut doc_content: std::collections::HashMap<String, Vec<u8>> = Default::default();
    let mut operations = Vec::new();
    let mut groups = Vec::new();
    let mut changelog = None;
    let mut transformed = Vec::new();

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        if entry.enclosed_name().is_none() {
            return Err(invalid_result(format!("Unsafe path: {}", entry.name())));
        }
        let name = entry.name().to_string();
        let declared = entry.size();
        let content = read_entry(&mut entry, declared, &name, max_entry_bytes)?;
        let parse_err = |e: serde_json::Error| invalid_result(format!("{}: {}", name, e));

        match name.as_str() {
            INFO_FILE => info = Some(serde_json::from_slice(&content).map_err(parse_err)?),
            DOCUMENTS_FILE => doc_meta = serde_json::from_slice(&content).map_err(parse_err)?,
            OPERATIONS_FILE => operations = serde_json::from_slice(&content).map_err(parse_err)?,
            GROUPS_FILE => groups = serde_json::from_slice(&content).map_err(parse_err)?,
            CHANGELOG_FILE => {
                changelog = Some(serde_json::from_slice(&content).map_err(parse_err)?)
            }
            other => {
                if let Some(file_id) = other.strip_prefix(DOCUMENT_CONTENT_DIR) {
                    doc_content.insert(file_id.to_string(), content);
                } else if let Some(path) = other.strip_prefix(TRANSFORMED_DIR) {
                    transformed.push(SourceFile {
                        path: path.to_string(),
                        content,
                    });
                }
            }
        }
    }

    let info = info.ok_or_else(|| invalid_result(format!("Missing {}", INFO_FILE)))?;
    let mut documents = Vec::with_capacity(doc_meta.len());
    for doc in doc_meta {
        let content = doc_content.remove(&doc.file_id).ok_or_else(|| {
            invalid_result(format!("Missing content for document '{}'", doc.file_id))
        })?;
        documents.push((doc, content));
    }
    transformed.sort_by(|a, b| a.path.cmp(&b.path));

    Ok(BuildResult {
        info,
        documents,
        operations,
        groups,
        changelog,
        transformed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::job::test_support::publish_config;

    fn sources_zip(files: &[(&str, &[u8])]) -> Vec<u8> {
        let files: Vec<SourceFile> = files
            .iter()
            .map(|(p, c)| SourceFile {
                path: p.to_string(),
                content: c.to_vec(),
            })
            .collect();
        write_sources(&files).unwrap()
    }

    #[test]
    fn test_read_sources_sorted() {
        let zip = sources_zip(&[("b.yaml", b"b"), ("a/openapi.json", b"{}")]);
        let files = read_sources(&zip, 1024).unwrap();
        assert_eq!(files[0].path, "a/openapi.json");
        assert_eq!(files[1].path, "b.yaml");
    }

    #[test]
    fn test_oversize_file_names_the_file() {
        let zip = sources_zip(&[("big.json", &[b'x'; 100])]);
        let err = read_sources(&zip, 10).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ArchiveSizeExceeded);
        assert_eq!(err.params().unwrap().get("file").unwrap(), "big.json");
    }

    #[test]
    fn test_not_a_zip() {
        let err = read_sources(b"plain text", 10).unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnsupportedSourceType);
    }

    #[test]
    fn test_input_archive_carries_build_id_and_sources() {
        let sources = read_sources(&sources_zip(&[("spec.json", b"{}")]), 1024).unwrap();
        let config = publish_config("pkg", "v1");
        let bytes = write_input("b-1", &config, &sources).unwrap();
        let input = read_input(&bytes).unwrap();
        assert_eq!(input.build_id, "b-1");
        assert_eq!(input.config, config);
        assert_eq!(input.sources, sources);
    }

    #[test]
    fn test_result_requires_document_content() {
        let mut result = BuildResult::new(ResultInfo {
            build_id: "b-1".into(),
            build_type: BuildType::Publish,
            package_id: "pkg".into(),
            version: "v1".into(),
            revision: None,
            format: None,
        });
        result.documents.push((
            Document {
                slug: "spec".into(),
                file_id: "spec.json".into(),
                format: "json".into(),
                api_type: Some(ApiType::Rest),
                title: None,
                hash: "h".into(),
            },
            b"{}".to_vec(),
        ));
        let bytes = write_result(&result).unwrap();
        assert_eq!(read_result(&bytes).unwrap(), result);

        // Strip the content entry by rebuilding without it
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        writer.start_file(INFO_FILE, options()).unwrap();
        writer
            .write_all(&serde_json::to_vec(&result.info).unwrap())
            .unwrap();
        writer.start_file(DOCUMENTS_FILE, options()).unwrap();
        writer
            .write_all(&serde_json::to_vec(&vec![&result.documents[0].0]).unwrap())
            .unwrap();
        let broken = writer.finish().unwrap().into_inner();
        let err = read_result(&broken).unwrap_err();
        assert_eq!(err.code(), ErrorCode::BadRequestBody);
    }

    #[test]
    fn test_result_entry_over_limit_is_rejected() {
        let mut result = BuildResult::new(ResultInfo {
            build_id: "b-1".into(),
            build_type: BuildType::Publish,
            package_id: "pkg".into(),
            version: "v1".into(),
            revision: None,
            format: None,
        });
        result.documents.push((
            Document {
                slug: "spec".into(),
                file_id: "spec.json".into(),
                format: "json".into(),
                api_type: Some(ApiType::Rest),
                title: None,
                hash: "h".into(),
            },
            vec![b' '; 4096],
        ));
        let bytes = write_result(&result).unwrap();
        assert_eq!(read_result_bounded(&bytes, 8192).unwrap(), result);

        let err = read_result_bounded(&bytes, 1024).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ArchiveSizeExceeded);
        assert_eq!(
            err.params().unwrap().get("file").unwrap(),
            &format!("{}spec.json", DOCUMENT_CONTENT_DIR)
        );
    }
}
