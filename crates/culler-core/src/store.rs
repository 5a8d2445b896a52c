//! Persisted logical keys and the two in-process [`PersistentStore`]
//! implementations: [`MemoryStore`] and [`JsonFileStore`].

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::AppError;
use crate::traits::{PersistentStore, Record};

/// Logical keys consumed by the core.
pub mod keys {
    pub const EXCLUSION_SET: &str = "exclusionSet";
    pub const HARVEST_RESULT: &str = "harvestResult";
    pub const TASK_STATE: &str = "taskState";
    pub const PROGRESS_SNAPSHOT: &str = "progressSnapshot";
    pub const AUTO_CONFIRM: &str = "autoConfirmFlag";
    pub const DIAGNOSTIC_LOG: &str = "diagnosticLog";
    /// The list the last explicit start was seeded from.
    pub const TARGET_LIST: &str = "targetList";
    pub const HEARTBEAT: &str = "heartbeat";
}

/// Reads and deserializes a single key. `Ok(None)` if the key is absent or null.
pub async fn read_key<S, T>(store: &S, key: &str) -> Result<Option<T>, AppError>
where
    S: PersistentStore,
    T: DeserializeOwned,
{
    let mut record = store.get(&[key]).await?;
    match record.remove(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
    }
}

/// Serializes and writes a single key in one `set`.
pub async fn write_key<S, T>(store: &S, key: &str, value: &T) -> Result<(), AppError>
where
    S: PersistentStore,
    T: Serialize + ?Sized,
{
    let mut record = Record::new();
    record.insert(key.to_string(), serde_json::to_value(value)?);
    store.set(record).await
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// Store backed by an in-memory map. Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Record>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full copy of the stored record (for assertions and debugging).
    pub fn snapshot(&self) -> Record {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Record> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned store mutex");
            poisoned.into_inner()
        })
    }
}

impl PersistentStore for MemoryStore {
    async fn get(&self, keys: &[&str]) -> Result<Record, AppError> {
        let inner = self.lock();
        Ok(keys
            .iter()
            .filter_map(|k| inner.get(*k).map(|v| (k.to_string(), v.clone())))
            .collect())
    }

    async fn set(&self, record: Record) -> Result<(), AppError> {
        let mut inner = self.lock();
        for (k, v) in record {
            inner.insert(k, v);
        }
        Ok(())
    }

    async fn remove(&self, keys: &[&str]) -> Result<(), AppError> {
        let mut inner = self.lock();
        for k in keys {
            inner.remove(*k);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// JsonFileStore
// ---------------------------------------------------------------------------

/// Store backed by a single JSON object on disk.
///
/// Every write replaces the file atomically (write to a sibling temp file,
/// then rename), so a crash never leaves a half-written record behind.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: Arc<tokio::sync::Mutex<()>>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<Record, AppError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(Record::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Record::new()),
            Err(e) => Err(AppError::StoreError(format!(
                "Failed to read {}: {e}",
                self.path.display()
            ))),
        }
    }

    async fn write_all(&self, record: &Record) -> Result<(), AppError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                AppError::StoreError(format!("Failed to create {}: {e}", parent.display()))
            })?;
        }

        let tmp = self.path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(record)?;
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| AppError::StoreError(format!("Failed to write {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| {
            AppError::StoreError(format!("Failed to replace {}: {e}", self.path.display()))
        })
    }
}

impl PersistentStore for JsonFileStore {
    async fn get(&self, keys: &[&str]) -> Result<Record, AppError> {
        let mut all = self.read_all().await?;
        Ok(keys
            .iter()
            .filter_map(|k| all.remove(*k).map(|v| (k.to_string(), v)))
            .collect())
    }

    async fn set(&self, record: Record) -> Result<(), AppError> {
        let _guard = self.write_lock.lock().await;
        let mut all = self.read_all().await?;
        for (k, v) in record {
            all.insert(k, v);
        }
        self.write_all(&all).await
    }

    async fn remove(&self, keys: &[&str]) -> Result<(), AppError> {
        let _guard = self.write_lock.lock().await;
        let mut all = self.read_all().await?;
        let mut changed = false;
        for k in keys {
            changed |= all.remove(*k).is_some();
        }
        if changed {
            self.write_all(&all).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_get_set_remove() {
        let store = MemoryStore::new();
        write_key(&store, "a", &1).await.unwrap();
        write_key(&store, "b", &"two").await.unwrap();

        let record = store.get(&["a", "b", "missing"]).await.unwrap();
        assert_eq!(record.len(), 2);
        assert_eq!(record["a"], serde_json::json!(1));

        store.remove(&["a"]).await.unwrap();
        let a: Option<i32> = read_key(&store, "a").await.unwrap();
        assert!(a.is_none());
        let b: Option<String> = read_key(&store, "b").await.unwrap();
        assert_eq!(b.as_deref(), Some("two"));
    }

    #[tokio::test]
    async fn memory_store_clones_share_state() {
        let store = MemoryStore::new();
        let clone = store.clone();
        write_key(&clone, "k", &true).await.unwrap();
        assert_eq!(store.snapshot()["k"], serde_json::json!(true));
    }

    #[tokio::test]
    async fn json_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        let store = JsonFileStore::new(&path);
        write_key(&store, "exclusionSet", &vec!["alice", "bob"])
            .await
            .unwrap();
        write_key(&store, "autoConfirmFlag", &true).await.unwrap();

        let reopened = JsonFileStore::new(&path);
        let set: Option<Vec<String>> = read_key(&reopened, "exclusionSet").await.unwrap();
        assert_eq!(set.unwrap(), vec!["alice", "bob"]);

        reopened.remove(&["autoConfirmFlag"]).await.unwrap();
        let flag: Option<bool> = read_key(&store, "autoConfirmFlag").await.unwrap();
        assert!(flag.is_none());
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn json_file_store_missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("absent.json"));
        let record = store.get(&["anything"]).await.unwrap();
        assert!(record.is_empty());
    }

    #[tokio::test]
    async fn json_file_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, b"{not json").unwrap();
        let store = JsonFileStore::new(&path);
        let err = store.get(&["a"]).await.unwrap_err();
        assert!(matches!(err, AppError::SerializationError(_)));
    }
}
