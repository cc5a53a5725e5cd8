//! Local provider implementation

use crate::account::{LocalAccount, LocalObject};
use crate::error::LocalError;
use crate::synth::{self, Region};
use async_trait::async_trait;
use chrono::Utc;
use stackflow_cloud::{
    AuthStatus, ProviderResult, RemoteObject, ResourceProvider, ResourceRequest,
};
use std::path::Path;
use tracing::{debug, info};

/// Account id used when the stack does not name one
pub const DEFAULT_ACCOUNT_ID: &str = "000000000000";

/// Provider backed by a simulated account in a local directory
pub struct LocalProvider {
    account: LocalAccount,
    region: String,
    account_id: String,
}

impl LocalProvider {
    pub fn new(dir: impl AsRef<Path>, region: impl Into<String>) -> Self {
        Self {
            account: LocalAccount::new(dir),
            region: region.into(),
            account_id: DEFAULT_ACCOUNT_ID.to_string(),
        }
    }

    pub fn with_account_id(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = account_id.into();
        self
    }

    pub fn account(&self) -> &LocalAccount {
        &self.account
    }

    fn region(&self) -> Region<'_> {
        Region {
            region: &self.region,
            account_id: &self.account_id,
        }
    }
}

fn remote(object: &LocalObject) -> RemoteObject {
    RemoteObject {
        id: object.id.clone(),
        outputs: object.outputs.clone(),
        observed_inputs: Some(object.inputs.clone()),
    }
}

#[async_trait]
impl ResourceProvider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    async fn check_auth(&self) -> ProviderResult<AuthStatus> {
        match tokio::fs::create_dir_all(self.account.dir()).await {
            Ok(()) => Ok(AuthStatus::ok(format!(
                "{} ({}, {})",
                self.account_id,
                self.region,
                self.account.dir().display()
            ))),
            Err(e) => Ok(AuthStatus::failed(format!(
                "cannot open {}: {}",
                self.account.dir().display(),
                e
            ))),
        }
    }

    async fn create(&self, request: &ResourceRequest) -> ProviderResult<RemoteObject> {
        let region = self.region();
        let object = self
            .account
            .modify(|doc| {
                synth::check_references(doc, &request.inputs)?;
                let synthesized = synth::synthesize(
                    &region,
                    doc,
                    &request.resource_type,
                    &request.physical_name,
                    &request.inputs,
                )?;
                let now = Utc::now();
                let object = LocalObject {
                    id: synthesized.id,
                    resource_type: request.resource_type.clone(),
                    physical_name: request.physical_name.clone(),
                    inputs: request.inputs.clone(),
                    outputs: synthesized.outputs,
                    created_at: now,
                    updated_at: now,
                };
                doc.objects.insert(object.id.clone(), object.clone());
                Ok(object)
            })
            .await?;

        info!(
            resource_type = %request.resource_type,
            node = %request.logical_name,
            id = %object.id,
            "Created local object"
        );
        Ok(remote(&object))
    }

    async fn read(&self, resource_type: &str, id: &str) -> ProviderResult<RemoteObject> {
        let object = self
            .account
            .view(|doc| {
                let object = doc.get(id)?;
                if object.resource_type != resource_type {
                    return Err(LocalError::ObjectNotFound(format!("{resource_type} {id}")));
                }
                Ok(object.clone())
            })
            .await?;
        Ok(remote(&object))
    }

    async fn lookup(&self, request: &ResourceRequest) -> ProviderResult<RemoteObject> {
        let found = synth::lookup(&self.region(), &request.resource_type, &request.inputs)?;
        debug!(resource_type = %request.resource_type, id = %found.id, "Looked up data source");
        Ok(RemoteObject {
            id: found.id,
            outputs: found.outputs,
            observed_inputs: None,
        })
    }

    async fn update(
        &self,
        id: &str,
        request: &ResourceRequest,
        changed: &[String],
    ) -> ProviderResult<RemoteObject> {
        let object = self
            .account
            .modify(|doc| {
                synth::check_references(doc, &request.inputs)?;
                let object = doc
                    .objects
                    .get_mut(id)
                    .ok_or_else(|| LocalError::ObjectNotFound(id.to_string()))?;
                object.inputs = request.inputs.clone();
                object.updated_at = Utc::now();
                Ok(object.clone())
            })
            .await?;

        info!(id = %id, changed = ?changed, "Updated local object");
        Ok(remote(&object))
    }

    async fn delete(&self, resource_type: &str, id: &str) -> ProviderResult<()> {
        self.account
            .modify(|doc| {
                let object = doc.get(id)?;
                if object.resource_type != resource_type {
                    return Err(LocalError::ObjectNotFound(format!("{resource_type} {id}")));
                }
                let dependents = doc.dependents_of(id);
                if !dependents.is_empty() {
                    return Err(LocalError::DependencyViolation {
                        id: id.to_string(),
                        dependents,
                    });
                }
                doc.objects.remove(id);
                Ok(())
            })
            .await?;

        info!(resource_type = %resource_type, id = %id, "Deleted local object");
        Ok(())
    }
}
