//! Simulated account
//!
//! Every object of the account lives in one JSON document under the
//! provider directory. Each operation reloads the document, applies its
//! change and writes it back through a temp file, so several processes
//! sharing a directory see each other's objects.

use crate::error::{LocalError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

pub const ACCOUNT_VERSION: u32 = 1;
const ACCOUNT_FILE: &str = "account.json";

/// One object in the simulated account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalObject {
    pub id: String,
    pub resource_type: String,
    pub physical_name: String,
    pub inputs: BTreeMap<String, Value>,
    pub outputs: BTreeMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LocalObject {
    /// Values other objects use to point at this one
    pub fn handles(&self) -> Vec<&str> {
        let mut handles = vec![self.id.as_str()];
        if let Some(arn) = self.outputs.get("arn").and_then(|v| v.as_str())
            && arn != self.id
        {
            handles.push(arn);
        }
        handles
    }

    /// Whether any input of this object mentions `handle`
    pub fn refers_to(&self, handle: &str) -> bool {
        self.inputs.values().any(|value| mentions(value, handle))
    }
}

fn mentions(value: &Value, handle: &str) -> bool {
    match value {
        Value::String(s) => s == handle,
        Value::Array(items) => items.iter().any(|v| mentions(v, handle)),
        Value::Object(map) => map.values().any(|v| mentions(v, handle)),
        _ => false,
    }
}

/// Persisted account document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountDocument {
    pub version: u32,

    /// Bumped on every created object; seeds generated ids
    pub sequence: u64,

    /// Latest task definition revision per family
    #[serde(default)]
    pub revisions: BTreeMap<String, u64>,

    #[serde(default)]
    pub objects: BTreeMap<String, LocalObject>,
}

impl Default for AccountDocument {
    fn default() -> Self {
        Self {
            version: ACCOUNT_VERSION,
            sequence: 0,
            revisions: BTreeMap::new(),
            objects: BTreeMap::new(),
        }
    }
}

impl AccountDocument {
    pub fn get(&self, id: &str) -> Result<&LocalObject> {
        self.objects
            .get(id)
            .ok_or_else(|| LocalError::ObjectNotFound(id.to_string()))
    }

    /// Object whose id, arn or name equals `handle`
    pub fn find_by_handle(&self, handle: &str) -> Option<&LocalObject> {
        self.objects.values().find(|object| {
            object.handles().contains(&handle)
                || object.outputs.get("name").and_then(|v| v.as_str()) == Some(handle)
        })
    }

    /// Ids of objects whose inputs point at `id`
    pub fn dependents_of(&self, id: &str) -> Vec<String> {
        let Some(target) = self.objects.get(id) else {
            return Vec::new();
        };
        let handles = target.handles();
        self.objects
            .values()
            .filter(|object| object.id != id)
            .filter(|object| handles.iter().any(|h| object.refers_to(h)))
            .map(|object| object.id.clone())
            .collect()
    }
}

pub struct LocalAccount {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl LocalAccount {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self) -> PathBuf {
        self.dir.join(ACCOUNT_FILE)
    }

    async fn load(&self) -> Result<AccountDocument> {
        let path = self.path();
        if !path.exists() {
            return Ok(AccountDocument::default());
        }
        let content = tokio::fs::read_to_string(&path).await?;
        let doc: AccountDocument = serde_json::from_str(&content)?;
        if doc.version > ACCOUNT_VERSION {
            return Err(LocalError::UnsupportedVersion {
                found: doc.version,
                supported: ACCOUNT_VERSION,
            });
        }
        Ok(doc)
    }

    async fn save(&self, doc: &AccountDocument) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let tmp = self.dir.join(format!("{ACCOUNT_FILE}.tmp"));
        tokio::fs::write(&tmp, serde_json::to_string_pretty(doc)?).await?;
        tokio::fs::rename(&tmp, self.path()).await?;
        debug!(objects = doc.objects.len(), path = %self.path().display(), "Saved account");
        Ok(())
    }

    /// Read-only access to the current document
    pub async fn view<T>(&self, f: impl FnOnce(&AccountDocument) -> Result<T>) -> Result<T> {
        let _guard = self.write_lock.lock().await;
        let doc = self.load().await?;
        f(&doc)
    }

    /// Apply a change and persist it when `f` succeeds
    pub async fn modify<T>(
        &self,
        f: impl FnOnce(&mut AccountDocument) -> Result<T>,
    ) -> Result<T> {
        let _guard = self.write_lock.lock().await;
        let mut doc = self.load().await?;
        let value = f(&mut doc)?;
        self.save(&doc).await?;
        Ok(value)
    }

    pub async fn objects(&self) -> Result<Vec<LocalObject>> {
        self.view(|doc| Ok(doc.objects.values().cloned().collect()))
            .await
    }

    /// Change an input behind the engine's back, as a console edit would
    pub async fn edit_input(&self, id: &str, property: &str, value: Value) -> Result<()> {
        self.modify(|doc| {
            let object = doc
                .objects
                .get_mut(id)
                .ok_or_else(|| LocalError::ObjectNotFound(id.to_string()))?;
            object.inputs.insert(property.to_string(), value);
            object.updated_at = Utc::now();
            Ok(())
        })
        .await
    }

    /// Remove an object without any dependency checks
    pub async fn purge(&self, id: &str) -> Result<()> {
        self.modify(|doc| {
            doc.objects
                .remove(id)
                .map(|_| ())
                .ok_or_else(|| LocalError::ObjectNotFound(id.to_string()))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(id: &str, inputs: Value) -> LocalObject {
        let now = Utc::now();
        LocalObject {
            id: id.to_string(),
            resource_type: "aws:ec2/vpc".to_string(),
            physical_name: id.to_string(),
            inputs: serde_json::from_value(inputs).unwrap(),
            outputs: BTreeMap::from([(
                "arn".to_string(),
                json!(format!("arn:aws:ec2:ap-south-1:000000000000:vpc/{id}")),
            )]),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_dependents_by_id_and_arn() {
        let mut doc = AccountDocument::default();
        for o in [
            object("vpc-1", json!({})),
            object("subnet-1", json!({"vpc-id": "vpc-1"})),
            object(
                "role-1",
                json!({"policy": {"Resource": ["arn:aws:ec2:ap-south-1:000000000000:vpc/vpc-1"]}}),
            ),
            object("other", json!({"note": "vpc-10"})),
        ] {
            doc.objects.insert(o.id.clone(), o);
        }

        assert_eq!(doc.dependents_of("vpc-1"), vec!["role-1", "subnet-1"]);
        assert!(doc.dependents_of("subnet-1").is_empty());
        assert!(doc.find_by_handle("vpc-1").is_some());
        assert!(doc.get("missing").is_err());
    }

    #[tokio::test]
    async fn test_modify_persists_and_view_reads() {
        let dir = tempfile::tempdir().unwrap();
        let account = LocalAccount::new(dir.path().join("cloud"));

        account
            .modify(|doc| {
                doc.sequence += 1;
                let o = object("vpc-1", json!({"cidr-block": "10.0.0.0/16"}));
                doc.objects.insert(o.id.clone(), o);
                Ok(())
            })
            .await
            .unwrap();

        let reopened = LocalAccount::new(dir.path().join("cloud"));
        let objects = reopened.objects().await.unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(reopened.view(|doc| Ok(doc.sequence)).await.unwrap(), 1);

        reopened
            .edit_input("vpc-1", "cidr-block", json!("10.9.0.0/16"))
            .await
            .unwrap();
        let objects = account.objects().await.unwrap();
        assert_eq!(objects[0].inputs["cidr-block"], json!("10.9.0.0/16"));

        account.purge("vpc-1").await.unwrap();
        assert!(account.objects().await.unwrap().is_empty());
        assert!(matches!(
            account.purge("vpc-1").await,
            Err(LocalError::ObjectNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_change_is_not_saved() {
        let dir = tempfile::tempdir().unwrap();
        let account = LocalAccount::new(dir.path());

        let result: Result<()> = account
            .modify(|doc| {
                doc.sequence = 99;
                Err(LocalError::MissingInput("family".into()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(account.view(|doc| Ok(doc.sequence)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_newer_version_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(ACCOUNT_FILE),
            r#"{"version": 9, "sequence": 0}"#,
        )
        .unwrap();

        let account = LocalAccount::new(dir.path());
        assert!(matches!(
            account.objects().await,
            Err(LocalError::UnsupportedVersion { found: 9, .. })
        ));
    }
}
