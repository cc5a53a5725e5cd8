//! Persisted stack state
//!
//! One document per stack key (`{project}-{stack}`) records, for every
//! logical resource, the provider id, the digest of the inputs it was last
//! applied with, its outputs and its recorded dependencies. Objects replaced
//! by a newer version wait in `deposed` until the delete phase removes them.

mod file;
mod memory;

pub use file::FileStateStore;
pub use memory::MemoryStateStore;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stackflow_core::NodeKind;
use std::collections::{BTreeMap, BTreeSet};

pub const STATE_VERSION: u32 = 1;

/// Stack-level state document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteState {
    /// State file version
    pub version: u32,

    /// Incremented on every write
    pub serial: u64,

    /// Stack key
    pub key: String,

    /// Last modified timestamp
    pub updated_at: DateTime<Utc>,

    /// Resources indexed by logical name
    pub resources: BTreeMap<String, ResourceState>,

    /// Replaced objects awaiting deletion
    #[serde(default)]
    pub deposed: Vec<DeposedObject>,

    /// Stack outputs of the last successful run
    #[serde(default)]
    pub outputs: BTreeMap<String, serde_json::Value>,
}

impl RemoteState {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            version: STATE_VERSION,
            serial: 0,
            key: key.into(),
            updated_at: Utc::now(),
            resources: BTreeMap::new(),
            deposed: Vec::new(),
            outputs: BTreeMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ResourceState> {
        self.resources.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty() && self.deposed.is_empty()
    }

    /// Bump serial and timestamp after a change
    pub(crate) fn touch(&mut self) {
        self.serial += 1;
        self.updated_at = Utc::now();
    }
}

/// State of a single resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    /// Provider-specific resource ID
    pub id: String,

    /// Resource type
    pub resource_type: String,

    #[serde(default)]
    pub kind: NodeKind,

    /// Digest over all property digests
    pub input_hash: String,

    /// Digest of each applied input property. Values are never stored.
    pub properties: BTreeMap<String, String>,

    /// Output attributes (id, arn, public-ip, ...)
    pub outputs: BTreeMap<String, serde_json::Value>,

    /// Nodes this one was applied after
    #[serde(default)]
    pub dependencies: BTreeSet<String>,

    /// Incremented on every successful change
    pub version: u64,

    /// When the resource was created
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl ResourceState {
    pub fn new(id: impl Into<String>, resource_type: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            resource_type: resource_type.into(),
            kind: NodeKind::Managed,
            input_hash: String::new(),
            properties: BTreeMap::new(),
            outputs: BTreeMap::new(),
            dependencies: BTreeSet::new(),
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_data(&self) -> bool {
        self.kind == NodeKind::Data
    }

    pub fn output(&self, key: &str) -> Option<&serde_json::Value> {
        self.outputs.get(key)
    }
}

/// A replaced object still present remotely
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeposedObject {
    pub id: String,

    /// Logical name it was deployed under
    pub name: String,

    pub resource_type: String,

    #[serde(default)]
    pub dependencies: BTreeSet<String>,

    pub deposed_at: DateTime<Utc>,
}

impl DeposedObject {
    pub fn from_state(name: impl Into<String>, state: &ResourceState) -> Self {
        Self {
            id: state.id.clone(),
            name: name.into(),
            resource_type: state.resource_type.clone(),
            dependencies: state.dependencies.clone(),
            deposed_at: Utc::now(),
        }
    }
}

/// Read-modify-write callback for a single resource entry
pub type UpdateFn = Box<dyn FnOnce(Option<ResourceState>) -> Option<ResourceState> + Send>;

/// Read-modify-write callback for a whole document
pub type TransactFn = Box<dyn FnOnce(&mut RemoteState) + Send>;

/// Persisted state keyed by `(stack key, logical name)`
///
/// Every write is atomic with respect to other writers of the same key and
/// durable once the call returns.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load the document of a stack. A missing document is an empty state.
    async fn load(&self, key: &str) -> Result<RemoteState>;

    /// Apply `f` to the document and persist it in one step
    async fn transact(&self, key: &str, f: TransactFn) -> Result<RemoteState>;

    /// Take an exclusive lock on a stack for the duration of a run
    async fn acquire_lock(&self, key: &str) -> Result<StateLock>;

    /// Keys of every stored stack
    async fn keys(&self) -> Result<Vec<String>>;

    async fn get(&self, key: &str, name: &str) -> Result<Option<ResourceState>> {
        Ok(self.load(key).await?.resources.remove(name))
    }

    /// Atomic read-modify-write of one entry. Returning `None` removes it.
    async fn update(&self, key: &str, name: &str, f: UpdateFn) -> Result<Option<ResourceState>> {
        let owned = name.to_string();
        let state = self
            .transact(
                key,
                Box::new(move |doc| {
                    let prior = doc.resources.remove(&owned);
                    if let Some(next) = f(prior) {
                        doc.resources.insert(owned, next);
                    }
                }),
            )
            .await?;
        Ok(state.resources.get(name).cloned())
    }

    async fn put(&self, key: &str, name: &str, entry: ResourceState) -> Result<()> {
        self.update(key, name, Box::new(move |_| Some(entry)))
            .await
            .map(|_| ())
    }

    async fn remove(&self, key: &str, name: &str) -> Result<()> {
        self.update(key, name, Box::new(|_| None)).await.map(|_| ())
    }

    async fn set_outputs(
        &self,
        key: &str,
        outputs: BTreeMap<String, serde_json::Value>,
    ) -> Result<()> {
        self.transact(key, Box::new(move |doc| doc.outputs = outputs))
            .await
            .map(|_| ())
    }

    async fn remove_deposed(&self, key: &str, id: &str) -> Result<()> {
        let id = id.to_string();
        self.transact(key, Box::new(move |doc| doc.deposed.retain(|d| d.id != id)))
            .await
            .map(|_| ())
    }
}

/// Guard for an exclusive stack lock. Released on drop.
pub struct StateLock {
    key: String,
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl StateLock {
    pub fn new(key: impl Into<String>, release: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            key: key.into(),
            release: Some(Box::new(release)),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Release the lock
    pub fn release(mut self) {
        if let Some(release) = self.release.take() {
            release();
            tracing::debug!(key = %self.key, "Released state lock");
        }
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for StateLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateLock")
            .field("key", &self.key)
            .field("held", &self.release.is_some())
            .finish()
    }
}
