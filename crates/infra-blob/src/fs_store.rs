// Filesystem ArtifactStore
//
// Layout: <root>/<key[0..2]>/<key>. Writes land in a temp file and are
// renamed into place, so readers never see a partial blob.

use apihub_core::error::{AppError, Result};
use apihub_core::port::{content_key, ArtifactStore};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tokio::fs;
use tracing::debug;

const TMP_DIR: &str = ".tmp";

pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    /// Open (creating if needed) a store rooted at `root`
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(TMP_DIR)).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn is_key(key: &str) -> bool {
        key.len() == 64 && key.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if !Self::is_key(key) {
            return Err(AppError::InvalidState(format!("Malformed artifact key '{}'", key)));
        }
        Ok(self.root.join(&key[..2]).join(key))
    }
}

fn modified_millis(meta: &std::fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn put(&self, data: &[u8]) -> Result<String> {
        let key = content_key(data);
        let path = self.path_for(&key)?;
        if fs::try_exists(&path).await? {
            return Ok(key);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp = self
            .root
            .join(TMP_DIR)
            .join(format!("{}.{}", key, uuid::Uuid::new_v4()));
        fs::write(&tmp, data).await?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        debug!(artifact = %key, size = data.len(), "Artifact stored");
        Ok(key)
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = match self.path_for(key) {
            Ok(p) => p,
            Err(_) => return Ok(None),
        };
        match fs::read(&path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        match self.path_for(key) {
            Ok(path) => Ok(fs::try_exists(&path).await?),
            Err(_) => Ok(false),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_older_than(&self, cutoff_millis: i64) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut shards = fs::read_dir(&self.root).await?;
        while let Some(shard) = shards.next_entry().await? {
            if !shard.file_type().await?.is_dir() || shard.file_name() == TMP_DIR {
                continue;
            }
            let mut entries = fs::read_dir(shard.path()).await?;
            while let Some(entry) = entries.next_entry().await? {
                let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                    continue;
                };
                if !Self::is_key(&name) {
                    continue;
                }
                let meta = entry.metadata().await?;
                if modified_millis(&meta) < cutoff_millis {
                    keys.push(name);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}
