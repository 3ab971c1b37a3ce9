//! Bus persistence
//!
//! Every mutation of the bus is a full load → mutate → save of the whole
//! document inside one exclusive scope. [`BusStore`] is that seam;
//! [`JsonFileStore`] is the durable implementation and [`MemoryStore`] the
//! in-process one used by tests and embedders.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use super::lock::FileLock;
use super::message::BusState;
use crate::config::BusConfig;
use crate::{Error, Result};

/// A change applied to the loaded bus. Returning an error aborts the save.
pub type Mutation<'a> = Box<dyn FnOnce(&mut BusState) -> Result<()> + Send + 'a>;

/// Storage backend for the bus document
#[async_trait]
pub trait BusStore: Send + Sync {
    /// Read the current document. A missing document reads as empty.
    async fn load(&self) -> Result<BusState>;

    /// Replace the whole document
    async fn save(&self, state: &BusState) -> Result<()>;

    /// Load, apply `mutation` and save, holding exclusive access throughout.
    /// Nothing is written when the mutation fails.
    async fn mutate<'a>(&self, mutation: Mutation<'a>) -> Result<()>;
}

/// Bus persisted as a pretty-printed JSON file
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    lock_path: PathBuf,
    lock_timeout: Duration,
    /// Serializes access from tasks sharing this store
    local: Mutex<()>,
}

impl JsonFileStore {
    /// Default time to wait for another process to release the bus
    pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

    /// Create a store for the bus file at `path`
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let lock_path = sibling(&path, "lock");
        Self {
            path,
            lock_path,
            lock_timeout: Self::DEFAULT_LOCK_TIMEOUT,
            local: Mutex::new(()),
        }
    }

    /// Create a store from bus configuration
    pub fn from_config(config: &BusConfig) -> Self {
        Self::new(crate::utils::expand_tilde(&config.path))
            .with_lock_timeout(Duration::from_millis(config.lock_timeout_ms))
    }

    /// Set how long to wait for the cross-process lock
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Path of the bus document
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn lock_file(&self) -> Result<FileLock> {
        FileLock::acquire(&self.lock_path, self.lock_timeout).await
    }

    /// Writers create the bus directory on first use
    async fn ensure_parent(&self) -> Result<()> {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    Error::Storage(format!("failed to create {}: {}", parent.display(), e))
                })
            }
            _ => Ok(()),
        }
    }

    async fn read(&self) -> Result<Option<BusState>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::Storage(format!(
                    "failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        if content.trim().is_empty() {
            return Ok(Some(BusState::default()));
        }

        serde_json::from_str(&content).map(Some).map_err(|e| {
            Error::Storage(format!("corrupt bus file {}: {}", self.path.display(), e))
        })
    }

    async fn write(&self, state: &BusState) -> Result<()> {
        let content = serde_json::to_string_pretty(state)?;
        let tmp_path = sibling(&self.path, "tmp");
        let storage_err =
            |e: std::io::Error| Error::Storage(format!("failed to write {}: {}", self.path.display(), e));

        let mut file = tokio::fs::File::create(&tmp_path).await.map_err(storage_err)?;
        file.write_all(content.as_bytes()).await.map_err(storage_err)?;
        file.sync_all().await.map_err(storage_err)?;
        drop(file);

        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(storage_err)?;
        debug!(
            "Saved bus with {} messages to {}",
            state.messages.len(),
            self.path.display()
        );
        Ok(())
    }
}

#[async_trait]
impl BusStore for JsonFileStore {
    async fn load(&self) -> Result<BusState> {
        let _local = self.local.lock().await;
        // Reads leave the filesystem untouched while there is no bus yet
        if matches!(tokio::fs::try_exists(&self.path).await, Ok(false)) {
            return Ok(BusState::default());
        }
        let _lock = self.lock_file().await?;
        Ok(self.read().await?.unwrap_or_default())
    }

    async fn save(&self, state: &BusState) -> Result<()> {
        let _local = self.local.lock().await;
        self.ensure_parent().await?;
        let _lock = self.lock_file().await?;
        self.write(state).await
    }

    async fn mutate<'a>(&self, mutation: Mutation<'a>) -> Result<()> {
        let _local = self.local.lock().await;
        self.ensure_parent().await?;
        let _lock = self.lock_file().await?;

        let mut state = match self.read().await? {
            Some(state) => state,
            None => {
                debug!("Initializing bus at {}", self.path.display());
                BusState::default()
            }
        };
        mutation(&mut state)?;
        self.write(&state).await
    }
}

/// `bus.json` -> `bus.json.<suffix>`
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

/// Bus held in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<BusState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing document
    pub fn with_state(state: BusState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }
}

#[async_trait]
impl BusStore for MemoryStore {
    async fn load(&self) -> Result<BusState> {
        Ok(self.state.lock().await.clone())
    }

    async fn save(&self, state: &BusState) -> Result<()> {
        *self.state.lock().await = state.clone();
        Ok(())
    }

    async fn mutate<'a>(&self, mutation: Mutation<'a>) -> Result<()> {
        let mut guard = self.state.lock().await;
        let mut working = guard.clone();
        mutation(&mut working)?;
        *guard = working;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::message::{Message, Reply};
    use tempfile::TempDir;

    #[test]
    fn test_sibling_paths() {
        let path = Path::new("/tmp/forge/forge_comm_bus.json");
        assert_eq!(
            sibling(path, "lock"),
            PathBuf::from("/tmp/forge/forge_comm_bus.json.lock")
        );
        assert_eq!(
            sibling(path, "tmp"),
            PathBuf::from("/tmp/forge/forge_comm_bus.json.tmp")
        );
    }

    #[tokio::test]
    async fn test_load_missing_file_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(temp_dir.path().join("bus.json"));

        let state = store.load().await.unwrap();
        assert!(state.messages.is_empty());
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_load_does_not_create_missing_directory() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("not-yet");
        let store = JsonFileStore::new(dir.join("bus.json"));

        assert!(store.load().await.unwrap().messages.is_empty());
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_mutate_initializes_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("bus.json");
        let store = JsonFileStore::new(&path);

        store.mutate(Box::new(|_state| Ok(()))).await.unwrap();

        assert!(path.exists());
        let content = std::fs::read_to_string(&path).unwrap();
        let state: BusState = serde_json::from_str(&content).unwrap();
        assert!(state.messages.is_empty());
        assert!(temp_dir.path().join("nested").join("bus.json.lock").exists());
    }

    #[tokio::test]
    async fn test_save_and_reload_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(temp_dir.path().join("bus.json"));

        let mut state = BusState::default();
        state.messages.push(Message::new("Adam", "Elli", "ping").with_priority("high"));
        let mut answered = Message::new("Elli", "Adam", "status?");
        answered.mark_delivered();
        answered.attach_reply(Reply::new("Adam", "all green")).unwrap();
        state.messages.push(answered);
        state
            .agents
            .insert("Elli".to_string(), crate::bus::message::AgentRecord::now());

        store.save(&state).await.unwrap();

        let reopened = JsonFileStore::new(temp_dir.path().join("bus.json"));
        let loaded = reopened.load().await.unwrap();
        assert_eq!(loaded, state);
    }

    #[tokio::test]
    async fn test_failed_mutation_is_not_saved() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(temp_dir.path().join("bus.json"));

        store
            .mutate(Box::new(|state| {
                state.messages.push(Message::new("a", "b", "kept"));
                Ok(())
            }))
            .await
            .unwrap();

        let result = store
            .mutate(Box::new(|state| {
                state.messages.push(Message::new("a", "b", "dropped"));
                Err(Error::NotFound("nope".to_string()))
            }))
            .await;
        assert!(result.unwrap_err().is_not_found());

        let state = store.load().await.unwrap();
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.messages[0].body, "kept");
    }

    #[tokio::test]
    async fn test_corrupt_file_is_storage_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bus.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = JsonFileStore::new(&path);
        let err = store.load().await.unwrap_err();
        assert!(err.is_storage());
        assert!(err.to_string().contains("corrupt"));

        let err = store.mutate(Box::new(|_| Ok(()))).await.unwrap_err();
        assert!(err.is_storage());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ not json");
    }

    #[tokio::test]
    async fn test_empty_file_reads_as_empty_bus() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bus.json");
        std::fs::write(&path, "").unwrap();

        let store = JsonFileStore::new(&path);
        assert!(store.load().await.unwrap().messages.is_empty());
    }

    #[tokio::test]
    async fn test_held_lock_times_out_as_storage_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bus.json");
        let _held = FileLock::acquire(&temp_dir.path().join("bus.json.lock"), Duration::from_secs(1))
            .await
            .unwrap();

        let store = JsonFileStore::new(&path).with_lock_timeout(Duration::from_millis(50));
        let err = store.mutate(Box::new(|_| Ok(()))).await.unwrap_err();
        assert!(err.is_storage());
    }

    #[tokio::test]
    async fn test_memory_store_discards_failed_mutation() {
        let store = MemoryStore::new();
        store
            .mutate(Box::new(|state| {
                state.messages.push(Message::new("a", "b", "one"));
                Ok(())
            }))
            .await
            .unwrap();
        let _ = store
            .mutate(Box::new(|state| {
                state.messages.clear();
                Err(Error::Internal("abort".to_string()))
            }))
            .await;

        assert_eq!(store.load().await.unwrap().messages.len(), 1);
    }
}
