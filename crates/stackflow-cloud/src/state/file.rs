//! File-backed state store
//!
//! Each stack lives in `{dir}/{key}.json`. Writes go to a temporary file that
//! is renamed over the previous document, after the previous document was
//! copied to `{key}.json.backup`. A `{key}.lock` file guards whole runs.

use super::{RemoteState, STATE_VERSION, StateLock, StateStore, TransactFn};
use crate::error::{CloudError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::fs;

/// Locks older than this are considered abandoned
const STALE_LOCK_HOURS: i64 = 1;

type Slot = Arc<tokio::sync::Mutex<Option<RemoteState>>>;

pub struct FileStateStore {
    dir: PathBuf,
    slots: Mutex<HashMap<String, Slot>>,
}

impl FileStateStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn state_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    fn backup_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json.backup"))
    }

    fn temp_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json.tmp"))
    }

    fn lock_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.lock"))
    }

    /// Per-key writer slot; holds the cached document
    fn slot(&self, key: &str) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(None)))
            .clone()
    }

    async fn ensure_dir(&self) -> Result<()> {
        if !fs::try_exists(&self.dir).await? {
            fs::create_dir_all(&self.dir).await?;
            tracing::debug!(dir = %self.dir.display(), "Created state directory");
        }
        Ok(())
    }

    async fn read_document(&self, key: &str) -> Result<RemoteState> {
        let path = self.state_path(key);
        if !fs::try_exists(&path).await? {
            tracing::debug!(key = %key, "State file not found, returning empty state");
            return Ok(RemoteState::new(key));
        }

        let content = fs::read_to_string(&path).await?;
        let state: RemoteState = serde_json::from_str(&content).map_err(|e| {
            CloudError::StateError(format!("{}: {}", path.display(), e))
        })?;

        if state.version > STATE_VERSION {
            return Err(CloudError::StateError(format!(
                "State file version {} is newer than supported version {}",
                state.version, STATE_VERSION
            )));
        }

        tracing::debug!(
            key = %key,
            resources = state.resources.len(),
            serial = state.serial,
            "Loaded state"
        );
        Ok(state)
    }

    async fn write_document(&self, state: &RemoteState) -> Result<()> {
        self.ensure_dir().await?;

        let path = self.state_path(&state.key);
        let temp = self.temp_path(&state.key);
        let content = serde_json::to_string_pretty(state)?;
        fs::write(&temp, content).await?;

        if fs::try_exists(&path).await? {
            fs::copy(&path, self.backup_path(&state.key)).await?;
        }
        fs::rename(&temp, &path).await?;

        tracing::debug!(
            key = %state.key,
            resources = state.resources.len(),
            serial = state.serial,
            "Saved state"
        );
        Ok(())
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self, key: &str) -> Result<RemoteState> {
        let slot = self.slot(key);
        let mut cached = slot.lock().await;
        if let Some(state) = cached.as_ref() {
            return Ok(state.clone());
        }
        let state = self.read_document(key).await?;
        *cached = Some(state.clone());
        Ok(state)
    }

    async fn transact(&self, key: &str, f: TransactFn) -> Result<RemoteState> {
        let slot = self.slot(key);
        let mut cached = slot.lock().await;
        let mut state = match cached.take() {
            Some(state) => state,
            None => self.read_document(key).await?,
        };
        let previous = state.clone();

        f(&mut state);
        state.touch();

        if let Err(e) = self.write_document(&state).await {
            *cached = Some(previous);
            return Err(e);
        }
        *cached = Some(state.clone());
        Ok(state)
    }

    async fn acquire_lock(&self, key: &str) -> Result<StateLock> {
        self.ensure_dir().await?;
        let lock_path = self.lock_path(key);

        let lock_info = LockInfo {
            holder: std::env::var("HOSTNAME")
                .or_else(|_| std::env::var("HOST"))
                .unwrap_or_else(|_| "unknown".to_string()),
            pid: std::process::id(),
            acquired_at: Utc::now(),
        };
        let content = serde_json::to_string_pretty(&lock_info)?;

        for _ in 0..2 {
            let created = fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_path)
                .await;
            match created {
                Ok(_) => {
                    fs::write(&lock_path, &content).await?;
                    tracing::debug!(key = %key, "Acquired state lock");
                    let release_path = lock_path.clone();
                    return Ok(StateLock::new(key, move || {
                        let _ = std::fs::remove_file(&release_path);
                    }));
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    let existing = fs::read_to_string(&lock_path).await?;
                    let held: LockInfo = serde_json::from_str(&existing).map_err(|e| {
                        CloudError::LockError(format!("{}: {}", lock_path.display(), e))
                    })?;

                    let age = Utc::now().signed_duration_since(held.acquired_at);
                    if age.num_hours() < STALE_LOCK_HOURS {
                        return Err(CloudError::LockError(format!(
                            "State of {} is locked by {} (pid {}) since {}",
                            key, held.holder, held.pid, held.acquired_at
                        )));
                    }

                    tracing::warn!(key = %key, holder = %held.holder, "Removing stale lock");
                    fs::remove_file(&lock_path).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(CloudError::LockError(format!(
            "State of {key} could not be locked"
        )))
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        if !fs::try_exists(&self.dir).await? {
            return Ok(keys);
        }

        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            if let Some(key) = file_name.to_string_lossy().strip_suffix(".json") {
                keys.push(key.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// Lock information
#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    holder: String,
    #[serde(default)]
    pid: u32,
    acquired_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{DeposedObject, ResourceState};
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_state_save_load() {
        let temp_dir = tempdir().unwrap();
        let store = FileStateStore::new(temp_dir.path());

        let mut entry = ResourceState::new("vpc-0a1b", "aws:ec2/vpc");
        entry.outputs.insert("id".to_string(), json!("vpc-0a1b"));
        store.put("doublee-prod", "vpc", entry).await.unwrap();

        let reopened = FileStateStore::new(temp_dir.path());
        let loaded = reopened.load("doublee-prod").await.unwrap();
        assert_eq!(loaded.resources.len(), 1);
        assert_eq!(loaded.serial, 1);
        assert_eq!(loaded.get("vpc").unwrap().output("id"), Some(&json!("vpc-0a1b")));
    }

    #[tokio::test]
    async fn test_empty_state() {
        let temp_dir = tempdir().unwrap();
        let store = FileStateStore::new(temp_dir.path());

        let state = store.load("doublee-prod").await.unwrap();
        assert!(state.is_empty());
        assert!(store.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_backup_written_on_second_save() {
        let temp_dir = tempdir().unwrap();
        let store = FileStateStore::new(temp_dir.path());

        store
            .put("doublee-prod", "vpc", ResourceState::new("vpc-1", "aws:ec2/vpc"))
            .await
            .unwrap();
        assert!(!store.backup_path("doublee-prod").exists());

        store
            .put("doublee-prod", "igw", ResourceState::new("igw-1", "aws:ec2/internetGateway"))
            .await
            .unwrap();
        let backup = std::fs::read_to_string(store.backup_path("doublee-prod")).unwrap();
        let previous: RemoteState = serde_json::from_str(&backup).unwrap();
        assert_eq!(previous.resources.len(), 1);
        assert!(!store.temp_path("doublee-prod").exists());
    }

    #[tokio::test]
    async fn test_update_and_remove() {
        let temp_dir = tempdir().unwrap();
        let store = FileStateStore::new(temp_dir.path());
        let key = "melodie-prod";

        store
            .put(key, "cluster", ResourceState::new("arn:cluster", "aws:ecs/cluster"))
            .await
            .unwrap();
        let updated = store
            .update(
                key,
                "cluster",
                Box::new(|prior| {
                    prior.map(|mut s| {
                        s.version += 1;
                        s
                    })
                }),
            )
            .await
            .unwrap();
        assert_eq!(updated.unwrap().version, 2);

        store.remove(key, "cluster").await.unwrap();
        assert!(store.get(key, "cluster").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_deposed_bookkeeping() {
        let temp_dir = tempdir().unwrap();
        let store = FileStateStore::new(temp_dir.path());
        let key = "doublee-prod";
        let old = ResourceState::new("td-1", "aws:ecs/taskDefinition");

        let deposed = DeposedObject::from_state("taskDefinition", &old);
        store
            .transact(key, Box::new(move |doc| doc.deposed.push(deposed)))
            .await
            .unwrap();
        assert_eq!(store.load(key).await.unwrap().deposed.len(), 1);

        store.remove_deposed(key, "td-1").await.unwrap();
        assert!(store.load(key).await.unwrap().deposed.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_updates_are_serialized() {
        let temp_dir = tempdir().unwrap();
        let store = Arc::new(FileStateStore::new(temp_dir.path()));

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .put(
                        "doublee-prod",
                        &format!("node{i}"),
                        ResourceState::new(format!("id-{i}"), "aws:ec2/subnet"),
                    )
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let reopened = FileStateStore::new(temp_dir.path());
        let state = reopened.load("doublee-prod").await.unwrap();
        assert_eq!(state.resources.len(), 16);
        assert_eq!(state.serial, 16);
    }

    #[tokio::test]
    async fn test_lock_is_exclusive() {
        let temp_dir = tempdir().unwrap();
        let store = FileStateStore::new(temp_dir.path());

        let lock = store.acquire_lock("doublee-prod").await.unwrap();
        let err = store.acquire_lock("doublee-prod").await.unwrap_err();
        assert!(matches!(err, CloudError::LockError(_)));

        // other stacks are independent
        store.acquire_lock("melodie-prod").await.unwrap().release();

        lock.release();
        assert!(store.acquire_lock("doublee-prod").await.is_ok());
    }

    #[tokio::test]
    async fn test_stale_lock_is_replaced() {
        let temp_dir = tempdir().unwrap();
        let store = FileStateStore::new(temp_dir.path());
        let stale = LockInfo {
            holder: "old-host".to_string(),
            pid: 1,
            acquired_at: Utc::now() - chrono::Duration::hours(2),
        };
        std::fs::write(
            store.lock_path("doublee-prod"),
            serde_json::to_string(&stale).unwrap(),
        )
        .unwrap();

        assert!(store.acquire_lock("doublee-prod").await.is_ok());
    }

    #[tokio::test]
    async fn test_keys_ignore_backups() {
        let temp_dir = tempdir().unwrap();
        let store = FileStateStore::new(temp_dir.path());
        for key in ["melodie-prod", "doublee-prod"] {
            store
                .put(key, "vpc", ResourceState::new("vpc-1", "aws:ec2/vpc"))
                .await
                .unwrap();
            store
                .put(key, "vpc", ResourceState::new("vpc-2", "aws:ec2/vpc"))
                .await
                .unwrap();
        }
        assert_eq!(store.keys().await.unwrap(), vec!["doublee-prod", "melodie-prod"]);
    }

    #[tokio::test]
    async fn test_newer_version_rejected() {
        let temp_dir = tempdir().unwrap();
        let store = FileStateStore::new(temp_dir.path());
        let mut state = RemoteState::new("doublee-prod");
        state.version = STATE_VERSION + 1;
        std::fs::write(
            store.state_path("doublee-prod"),
            serde_json::to_string(&state).unwrap(),
        )
        .unwrap();

        let err = store.load("doublee-prod").await.unwrap_err();
        assert!(matches!(err, CloudError::StateError(_)));
    }
}
