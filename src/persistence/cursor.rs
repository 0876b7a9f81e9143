//! Durable per-account cursor storage
//!
//! `store` returns only after the write is durable, so a cursor read after a
//! crash is never ahead of what the pipeline actually finished.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::StatusId;
use crate::error::PersistenceError;

#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Last processed id for `account`, if any was stored
    async fn load(&self, account: &str) -> Result<Option<StatusId>, PersistenceError>;

    /// Durably record `id` as the last processed id for `account`
    async fn store(&self, account: &str, id: &StatusId) -> Result<(), PersistenceError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CursorEntry {
    last_processed_id: StatusId,
    updated_at: DateTime<Utc>,
}

/// JSON file holding every account's cursor, replaced atomically on write
pub struct FileCursorStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileCursorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self, account: &str) -> Result<BTreeMap<String, CursorEntry>, PersistenceError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(BTreeMap::new()),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                PersistenceError::new(account, format!("corrupt cursor file {}: {}", self.path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(PersistenceError::new(
                account,
                format!("read {}: {}", self.path.display(), e),
            )),
        }
    }

    async fn write_all(&self, account: &str, entries: &BTreeMap<String, CursorEntry>) -> std::io::Result<()> {
        let body = serde_json::to_vec_pretty(entries).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        tokio::fs::create_dir_all(&dir).await?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&body).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path).await?;

        #[cfg(unix)]
        tokio::fs::File::open(&dir).await?.sync_all().await?;

        debug!(account, path = %self.path.display(), "cursor file replaced");
        Ok(())
    }
}

#[async_trait]
impl CursorStore for FileCursorStore {
    async fn load(&self, account: &str) -> Result<Option<StatusId>, PersistenceError> {
        let entries = self.read_all(account).await?;
        Ok(entries.get(account).map(|e| e.last_processed_id.clone()))
    }

    async fn store(&self, account: &str, id: &StatusId) -> Result<(), PersistenceError> {
        let _guard = self.write_lock.lock().await;

        let mut entries = self.read_all(account).await?;
        entries.insert(
            account.to_string(),
            CursorEntry {
                last_processed_id: id.clone(),
                updated_at: Utc::now(),
            },
        );

        self.write_all(account, &entries)
            .await
            .map_err(|e| PersistenceError::new(account, format!("write {}: {}", self.path.display(), e)))
    }
}

/// Process-local store for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryCursorStore {
    cursors: DashMap<String, StatusId>,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CursorStore for MemoryCursorStore {
    async fn load(&self, account: &str) -> Result<Option<StatusId>, PersistenceError> {
        Ok(self.cursors.get(account).map(|id| id.value().clone()))
    }

    async fn store(&self, account: &str, id: &StatusId) -> Result<(), PersistenceError> {
        self.cursors.insert(account.to_string(), id.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> StatusId {
        StatusId::new(raw).unwrap()
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("postsignal-{}-{}", name, uuid::Uuid::new_v4()))
            .join("cursor.json")
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let path = temp_path("reopen");
        let store = FileCursorStore::new(&path);
        assert_eq!(store.load("alice").await.unwrap(), None);

        store.store("alice", &id("100")).await.unwrap();
        store.store("bob", &id("7")).await.unwrap();
        store.store("alice", &id("101")).await.unwrap();

        let reopened = FileCursorStore::new(&path);
        assert_eq!(reopened.load("alice").await.unwrap(), Some(id("101")));
        assert_eq!(reopened.load("bob").await.unwrap(), Some(id("7")));

        if let Some(dir) = path.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let path = temp_path("corrupt");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"{not json").unwrap();

        let store = FileCursorStore::new(&path);
        assert!(store.load("alice").await.is_err());

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryCursorStore::new();
        store.store("alice", &id("5")).await.unwrap();
        assert_eq!(store.load("alice").await.unwrap(), Some(id("5")));
        assert_eq!(store.load("bob").await.unwrap(), None);
    }
}
