//! Persistent key-value stores
//!
//! Values are JSON documents addressed by a string key. Every mutation is
//! broadcast as a [`StoreChange`] so other parts of the program (preference
//! watchers, the course list) can react to it. Notifications are in-process
//! only: writes made by another process sharing the same files are not seen.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use directories::ProjectDirs;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::fs;
use tokio::sync::broadcast;
use tracing::{trace, warn};

/// Capacity of the change notification channel
const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Errors that can occur when reading or writing the store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading or writing the backing file failed
    #[error("Store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// A value could not be encoded or decoded
    #[error("Store value is not valid JSON: {0}")]
    Serde(#[from] serde_json::Error),
}

/// A mutation of one key
#[derive(Debug, Clone, PartialEq)]
pub struct StoreChange {
    pub key: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
}

/// Async key-value store with change notifications
///
/// Individual operations are atomic; sequences of operations are not.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;

    /// Removes `key`; removing a missing key is not an error
    async fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Subscribes to every subsequent mutation made through this instance
    fn subscribe(&self) -> broadcast::Receiver<StoreChange>;
}

/// Reads `key` and decodes it as `T`
///
/// A value that no longer decodes (e.g. written by an older version) is
/// treated as missing.
pub async fn read_value<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    let Some(value) = store.get(key).await? else {
        return Ok(None);
    };
    match serde_json::from_value(value) {
        Ok(decoded) => Ok(Some(decoded)),
        Err(e) => {
            warn!(key, "ignoring undecodable store value: {}", e);
            Ok(None)
        }
    }
}

/// Encodes `value` as JSON and writes it under `key`
pub async fn write_value<T: Serialize + ?Sized>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<(), StoreError> {
    store.set(key, serde_json::to_value(value)?).await
}

/// Store keeping one JSON file per key on disk
///
/// Files live in an XDG-compliant data directory (`~/.local/share/moodlenav/`
/// on Linux) unless a directory is given explicitly.
///
/// Several processes may share the directory. Each write goes through its own
/// temporary file, so concurrent writers never interleave bytes, but change
/// notifications only cover writes made through this instance.
#[derive(Debug)]
pub struct FileStore {
    /// Directory where entries are stored
    dir: PathBuf,
    /// Serializes writers so notifications carry the right old value
    write_lock: tokio::sync::Mutex<()>,
    changes: broadcast::Sender<StoreChange>,
}

impl FileStore {
    /// Creates a store in the default project data directory
    ///
    /// Returns `None` if the directory cannot be determined (e.g., no home directory).
    pub fn new() -> Option<Self> {
        let project_dirs = ProjectDirs::from("", "", "moodlenav")?;
        Some(Self::with_dir(project_dirs.data_dir().to_path_buf()))
    }

    /// Creates a store in a custom directory
    pub fn with_dir(dir: PathBuf) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            dir,
            write_lock: tokio::sync::Mutex::new(()),
            changes,
        }
    }

    /// Directory holding the entry files
    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    /// Returns the path to the file for the given key
    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    async fn read_entry(&self, key: &str) -> Result<Option<Value>, StoreError> {
        match fs::read_to_string(self.entry_path(key)).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn notify(&self, key: &str, old_value: Option<Value>, new_value: Option<Value>) {
        // No receivers is fine
        let _ = self.changes.send(StoreChange {
            key: key.to_string(),
            old_value,
            new_value,
        });
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        self.read_entry(key).await
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        fs::create_dir_all(&self.dir).await?;

        let old_value = self.read_entry(key).await.unwrap_or(None);
        let json = serde_json::to_string_pretty(&value)?;

        let dir = self.dir.clone();
        let path = self.entry_path(key);
        tokio::task::spawn_blocking(move || write_atomically(&dir, &path, json.as_bytes()))
            .await
            .map_err(std::io::Error::other)??;
        trace!(key, "store entry written");

        self.notify(key, old_value, Some(value));
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let old_value = self.read_entry(key).await.unwrap_or(None);

        match fs::remove_file(self.entry_path(key)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        trace!(key, "store entry removed");

        self.notify(key, old_value, None);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}

/// Writes `contents` to a uniquely named sibling file and renames it over `path`
///
/// Readers never see a partial entry, and two writers never share a temporary file.
fn write_atomically(dir: &Path, path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Store that keeps entries in memory
///
/// Useful for tests and for running without a writable home directory.
#[derive(Debug)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Value>>,
    changes: broadcast::Sender<StoreChange>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            entries: Mutex::new(HashMap::new()),
            changes,
        }
    }

    /// Whether `key` currently holds a value
    pub fn contains_key(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Value>> {
        // A panic while holding the lock cannot leave the map half-updated
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let old_value = self.lock().insert(key.to_string(), value.clone());
        let _ = self.changes.send(StoreChange {
            key: key.to_string(),
            old_value,
            new_value: Some(value),
        });
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        if let Some(old_value) = self.lock().remove(key) {
            let _ = self.changes.send(StoreChange {
                key: key.to_string(),
                old_value: Some(old_value),
                new_value: None,
            });
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct TestData {
        name: String,
        value: i32,
    }

    fn create_test_store() -> (FileStore, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = FileStore::with_dir(temp_dir.path().to_path_buf());
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_set_creates_file_in_store_directory() {
        let (store, temp_dir) = create_test_store();
        let data = TestData {
            name: "test".to_string(),
            value: 42,
        };

        write_value(&store, "test_key", &data)
            .await
            .expect("Write should succeed");

        let expected_path = temp_dir.path().join("test_key.json");
        assert!(expected_path.exists(), "Entry file should exist");
        let entries: Vec<_> = std::fs::read_dir(temp_dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1, "No temporary files should be left behind");

        let content = std::fs::read_to_string(&expected_path).expect("Should read file");
        assert!(content.contains("\"name\""));
        assert!(content.contains("42"));
    }

    #[tokio::test]
    async fn test_get_returns_none_for_missing_key() {
        let (store, _temp_dir) = create_test_store();
        let result = store.get("nonexistent_key").await.expect("Read should succeed");
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_read_value_ignores_undecodable_entry() {
        let (store, _temp_dir) = create_test_store();
        store.set("k", json!("not a struct")).await.unwrap();

        let result: Option<TestData> = read_value(&store, "k").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let (store, temp_dir) = create_test_store();
        std::fs::write(temp_dir.path().join("broken.json"), "{not json").unwrap();

        let result = store.get("broken").await;
        assert!(matches!(result, Err(StoreError::Serde(_))));
    }

    #[tokio::test]
    async fn test_set_creates_directory_if_missing() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let nested_path = temp_dir.path().join("nested").join("store");
        let store = FileStore::with_dir(nested_path.clone());

        store.set("nested_key", json!(1)).await.expect("Write should succeed");

        assert!(nested_path.join("nested_key.json").exists());
    }

    #[tokio::test]
    async fn test_overwrite_and_remove() {
        let (store, temp_dir) = create_test_store();
        store.set("k", json!("first")).await.unwrap();
        store.set("k", json!("second")).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(json!("second")));

        store.remove("k").await.unwrap();
        assert!(store.get("k").await.unwrap().is_none());
        assert!(!temp_dir.path().join("k.json").exists());

        // Removing again is a no-op
        store.remove("k").await.expect("Second remove should succeed");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers_sharing_a_directory() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let stores: Vec<Arc<FileStore>> = (0..2)
            .map(|_| Arc::new(FileStore::with_dir(temp_dir.path().to_path_buf())))
            .collect();

        let mut handles = Vec::new();
        for (i, store) in stores.iter().enumerate() {
            for n in 0..20 {
                let store = store.clone();
                handles.push(tokio::spawn(async move {
                    store.set("shared", json!({"writer": i, "n": n})).await
                }));
            }
        }
        for handle in handles {
            handle.await.unwrap().expect("Every write should succeed");
        }

        let value = stores[0].get("shared").await.unwrap().expect("value");
        assert!(value["writer"].is_number());
        let names: Vec<String> = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["shared.json".to_string()]);
    }

    #[tokio::test]
    async fn test_notifications_do_not_cross_instances() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let watched = FileStore::with_dir(temp_dir.path().to_path_buf());
        let other = FileStore::with_dir(temp_dir.path().to_path_buf());
        let mut changes = watched.subscribe();

        other.set("k", json!(1)).await.unwrap();

        assert_eq!(watched.get("k").await.unwrap(), Some(json!(1)));
        assert!(matches!(
            changes.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_file_store_notifies_changes() {
        let (store, _temp_dir) = create_test_store();
        let mut changes = store.subscribe();

        store.set("k", json!(1)).await.unwrap();
        store.set("k", json!(2)).await.unwrap();
        store.remove("k").await.unwrap();

        let first = changes.recv().await.unwrap();
        assert_eq!(first.old_value, None);
        assert_eq!(first.new_value, Some(json!(1)));

        let second = changes.recv().await.unwrap();
        assert_eq!(second.old_value, Some(json!(1)));
        assert_eq!(second.new_value, Some(json!(2)));

        let third = changes.recv().await.unwrap();
        assert_eq!(third.key, "k");
        assert_eq!(third.old_value, Some(json!(2)));
        assert_eq!(third.new_value, None);
    }

    #[tokio::test]
    async fn test_memory_store_roundtrip_and_notifications() {
        let store = MemoryStore::new();
        let mut changes = store.subscribe();

        store.set("k", json!({"a": 1})).await.unwrap();
        assert!(store.contains_key("k"));
        assert_eq!(store.get("k").await.unwrap(), Some(json!({"a": 1})));

        store.remove("k").await.unwrap();
        assert!(!store.contains_key("k"));

        assert_eq!(changes.recv().await.unwrap().new_value, Some(json!({"a": 1})));
        assert_eq!(changes.recv().await.unwrap().new_value, None);
    }

    #[test]
    fn test_new_creates_xdg_compliant_path() {
        if let Some(store) = FileStore::new() {
            let path_str = store.dir().to_string_lossy();
            assert!(
                path_str.contains("moodlenav"),
                "Store path should contain project name"
            );
        }
        // Test passes if new() returns None (e.g., no home directory in CI)
    }
}
