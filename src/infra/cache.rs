//! Durable key -> bytes storage that survives restarts.
//!
//! Backends report failures as [`CacheError`]; callers that sit on the load
//! path (see [`crate::infra::synced`]) downgrade them to misses and skipped
//! writes.

use std::{
    collections::HashMap,
    io,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use thiserror::Error;
use tokio::{fs, sync::RwLock};
use uuid::Uuid;

const ENTRY_EXTENSION: &str = "json";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("invalid cache key: {0:?}")]
    InvalidKey(String),
    #[error("cache io error: {0}")]
    Io(#[from] io::Error),
}

/// Contract shared by every cache backend.
///
/// Implementations must tolerate concurrent calls for different keys without
/// one key's write affecting another.
#[async_trait]
pub trait PersistentCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), CacheError>;

    async fn remove(&self, key: &str) -> Result<(), CacheError>;
}

/// One file per key under a directory. Writes go through a temp file and a
/// rename so a crash never leaves a half-written entry.
#[derive(Clone, Debug)]
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    /// Entries live directly under `dir`, created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> Result<PathBuf, CacheError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
            && !key.starts_with('.');
        if !valid {
            return Err(CacheError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{key}.{ENTRY_EXTENSION}")))
    }
}

#[async_trait]
impl PersistentCache for FileCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let path = self.entry_path(key)?;
        match fs::read(&path).await {
            Ok(bytes) => {
                tracing::debug!(key, bytes = bytes.len(), "cache hit");
                Ok(Some(bytes))
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(key, "cache miss");
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), CacheError> {
        let path = self.entry_path(key)?;
        fs::create_dir_all(&self.dir).await.map_err(|err| {
            CacheError::StorageUnavailable(format!("{}: {err}", self.dir.display()))
        })?;

        let tmp = self
            .dir
            .join(format!(".{key}.{}.tmp", Uuid::new_v4().simple()));
        if let Err(err) = fs::write(&tmp, value).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(err.into());
        }
        if let Err(err) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(err.into());
        }

        tracing::debug!(key, bytes = value.len(), path = %path.display(), "cache write");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        let path = self.entry_path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Process-local backend, for tests and hosts without writable storage.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl PersistentCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), CacheError> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn file_cache_survives_a_new_handle() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path().join("cache"));

        assert_eq!(cache.get("weather-cache").await.unwrap(), None);
        cache.set("weather-cache", br#"{"dt":1}"#).await.unwrap();

        let reopened = FileCache::new(dir.path().join("cache"));
        assert_eq!(
            reopened.get("weather-cache").await.unwrap().as_deref(),
            Some(&br#"{"dt":1}"#[..])
        );
    }

    #[tokio::test]
    async fn file_cache_overwrites_and_removes() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path());

        cache.set("k", b"one").await.unwrap();
        cache.set("k", b"two").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(b"two".to_vec()));

        cache.remove("k").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
        // Removing a missing key is not an error.
        cache.remove("k").await.unwrap();
    }

    #[tokio::test]
    async fn file_cache_rejects_path_like_keys() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path());

        for key in ["", "../escape", "a/b", ".hidden"] {
            assert!(matches!(
                cache.set(key, b"x").await,
                Err(CacheError::InvalidKey(_))
            ));
        }
    }

    #[tokio::test]
    async fn concurrent_writes_to_different_keys_do_not_interfere() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(FileCache::new(dir.path()));

        let writes = (0..8).map(|i| {
            let cache = Arc::clone(&cache);
            async move {
                let key = format!("key-{i}");
                cache.set(&key, key.as_bytes()).await.unwrap();
            }
        });
        futures_util::future::join_all(writes).await;

        for i in 0..8 {
            let key = format!("key-{i}");
            assert_eq!(cache.get(&key).await.unwrap(), Some(key.into_bytes()));
        }
    }

    #[tokio::test]
    async fn unreadable_entry_is_an_error_not_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path());
        // A directory where the entry file should be cannot be read as bytes.
        std::fs::create_dir_all(dir.path().join("broken.json")).unwrap();
        assert!(cache.get("broken").await.is_err());
    }

    #[tokio::test]
    async fn memory_cache_round_trip() {
        let cache = MemoryCache::new();
        cache.set("a", b"1").await.unwrap();
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.get("a").await.unwrap(), Some(b"1".to_vec()));
        cache.remove("a").await.unwrap();
        assert!(cache.is_empty().await);
    }
}
