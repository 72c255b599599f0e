// Artifact Store Port (content-addressed blobs)

use crate::error::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};

/// Content key of a blob: lowercase sha-256 hex
pub fn content_key(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Keys are always [`content_key`] of the stored bytes, so `put` is idempotent
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store a blob and return its key
    async fn put(&self, data: &[u8]) -> Result<String>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Returns false if the key was absent
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Keys last written before `cutoff_millis`
    async fn list_older_than(&self, cutoff_millis: i64) -> Result<Vec<String>>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory artifact store. Every blob is considered infinitely old.
    #[derive(Default)]
    pub struct InMemoryArtifactStore {
        blobs: Mutex<HashMap<String, Vec<u8>>>,
    }

    impl InMemoryArtifactStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn len(&self) -> usize {
            self.blobs.lock().unwrap().len()
        }

        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }
    }

    #[async_trait]
    impl ArtifactStore for InMemoryArtifactStore {
        async fn put(&self, data: &[u8]) -> Result<String> {
            let key = content_key(data);
            self.blobs
                .lock()
                .unwrap()
                .entry(key.clone())
                .or_insert_with(|| data.to_vec());
            Ok(key)
        }

        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
            Ok(self.blobs.lock().unwrap().get(key).cloned())
        }

        async fn exists(&self, key: &str) -> Result<bool> {
            Ok(self.blobs.lock().unwrap().contains_key(key))
        }

        async fn delete(&self, key: &str) -> Result<bool> {
            Ok(self.blobs.lock().unwrap().remove(key).is_some())
        }

        async fn list_older_than(&self, _cutoff_millis: i64) -> Result<Vec<String>> {
            Ok(self.blobs.lock().unwrap().keys().cloned().collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mocks::InMemoryArtifactStore;
    use super::*;

    #[test]
    fn test_content_key_is_sha256_hex() {
        assert_eq!(
            content_key(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_put_is_idempotent() {
        let store = InMemoryArtifactStore::new();
        let a = store.put(b"zip").await.unwrap();
        let b = store.put(b"zip").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&a).await.unwrap().unwrap(), b"zip");
        assert!(store.delete(&a).await.unwrap());
        assert!(!store.exists(&a).await.unwrap());
    }
}
