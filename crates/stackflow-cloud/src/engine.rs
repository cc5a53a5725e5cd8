//! Convergence engine
//!
//! `plan` classifies every node without calling the provider. `apply` walks
//! the dependency batches in order, running the nodes of a batch
//! concurrently, and persists every successful change before a dependent
//! starts. Removed nodes and replaced objects are deleted last, dependents
//! first, and only when the forward phase fully succeeded.
//!
//! A replacement that keeps a unique remote name is the exception: the old
//! object and its recorded dependents are deleted before the new object is
//! created, and the dependents are created again in their own batches.

use crate::action::{Action, ActionType, ApplyResult, ApplyStatus, NodeReport, Plan};
use crate::digest::{InputDigest, digest_properties, digest_value};
use crate::error::{CloudError, ProviderError, Result};
use crate::graph::ResourceGraph;
use crate::provider::{ProviderResult, RemoteObject, ResourceProvider, ResourceRequest, RetryConfig};
use crate::reconciler::{Decision, Desired, reconcile};
use crate::resolver::{OutputTable, ResolveMode, Resolver, SecretContext, ensure_secret_properties};
use crate::state::{DeposedObject, RemoteState, ResourceState, StateStore};
use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use stackflow_core::{
    Catalog, EngineSettings, FlowError, LifecycleState, ResourceNode, StackInstance,
    TimeoutSettings,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore, watch};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Requests cooperative cancellation of a running apply
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    /// Stop before the next batch. In-flight operations finish.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Outcome of a drift refresh
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    /// Entries read from the provider
    pub checked: usize,
    /// Entries whose object no longer exists; dropped from state
    pub dropped: Vec<String>,
    /// Entries whose observed inputs differ from the recorded ones
    pub drifted: Vec<String>,
}

pub struct Engine {
    provider: Arc<dyn ResourceProvider>,
    store: Arc<dyn StateStore>,
    catalog: Arc<Catalog>,
    settings: EngineSettings,
    cancel: Arc<watch::Sender<bool>>,
}

impl Engine {
    pub fn new(
        provider: Arc<dyn ResourceProvider>,
        store: Arc<dyn StateStore>,
        catalog: Catalog,
        settings: EngineSettings,
    ) -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            provider,
            store,
            catalog: Arc::new(catalog),
            settings,
            cancel: Arc::new(tx),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            tx: self.cancel.clone(),
        }
    }

    /// Recorded state of a stack
    pub async fn state(&self, key: &str) -> Result<RemoteState> {
        self.store.load(key).await
    }

    /// Outputs stored by the last successful apply
    pub async fn outputs(&self, key: &str) -> Result<BTreeMap<String, serde_json::Value>> {
        Ok(self.store.load(key).await?.outputs)
    }

    fn context(
        &self,
        key: &str,
        name_prefix: &str,
        secrets: SecretContext,
        graph: ResourceGraph,
    ) -> Arc<RunContext> {
        Arc::new(RunContext {
            key: key.to_string(),
            name_prefix: name_prefix.to_string(),
            graph,
            recreated: Mutex::new(HashSet::new()),
            provider: self.provider.clone(),
            store: self.store.clone(),
            catalog: self.catalog.clone(),
            table: OutputTable::new(),
            secrets,
            retry: RetryConfig::from(&self.settings.retry),
            timeouts: self.settings.timeouts.clone(),
        })
    }

    /// Checks that must pass before any provider call
    pub fn validate(&self, instance: &StackInstance) -> Result<ResourceGraph> {
        ensure_secret_properties(instance, &self.catalog)?;
        for node in &instance.nodes {
            if self.catalog.get(&node.resource_type).is_none() {
                return Err(FlowError::UnknownResourceType(node.resource_type.clone()).into());
            }
        }
        ResourceGraph::build(instance)
    }

    /// Classify every node against recorded state. Never calls the provider.
    #[tracing::instrument(skip(self, instance), fields(stack = %instance.state_key()))]
    pub async fn plan(&self, instance: &StackInstance) -> Result<Plan> {
        let graph = self.validate(instance)?;
        let key = instance.state_key();
        let prior = self.store.load(&key).await?;

        let table = OutputTable::new();
        let secrets = SecretContext::for_stack(instance);
        let resolver = Resolver::new(&table, &secrets, ResolveMode::Plan);
        let batches = graph.schedule();
        let mut actions = Vec::new();
        // Recorded dependents of a delete-first replacement, and what they go with
        let mut recreated: HashMap<String, String> = HashMap::new();

        for name in batches.iter().flatten() {
            let Some(node) = instance.node(name) else {
                continue;
            };
            let entry = prior.get(name);
            if let Some(replaced) = recreated.get(name) {
                table.mark(name, LifecycleState::Planned);
                let mut action = Action::new(name, ActionType::Replace, &node.resource_type)
                    .with_description(format!(
                        "recreate {} '{}' after replacing '{}'",
                        node.resource_type, name, replaced
                    ));
                if let Some(entry) = entry {
                    action = action.with_id(&entry.id);
                }
                actions.push(action);
                continue;
            }

            let schema = self.catalog.get(&node.resource_type);
            let resolved = resolver.resolve_partial(node)?;
            let digest = InputDigest::of_partial(&resolved);
            let decision = reconcile(
                Some(Desired {
                    node,
                    schema,
                    digest: &digest,
                }),
                entry,
            );

            if decision.deletes_first(schema) {
                for dependent in graph.transitive_dependents(name) {
                    if prior.get(&dependent).is_some_and(|e| !e.is_data()) {
                        recreated.entry(dependent).or_insert_with(|| name.clone());
                    }
                }
            }

            match entry {
                Some(entry) if !decision.creates_object() => {
                    table.set(name, LifecycleState::Created, entry.outputs.clone());
                }
                _ => table.mark(name, LifecycleState::Planned),
            }

            let mut action = Action::new(name, decision.action_type(), &node.resource_type)
                .with_properties(decision.properties());
            if decision.deletes_first(schema) {
                action = action.with_description(format!(
                    "replace {} '{}', deleting the old object first",
                    node.resource_type, name
                ));
            }
            if let Some(entry) = entry {
                action = action.with_id(&entry.id);
            }
            actions.push(action);
        }

        let removed = removed_entries(&prior, Some(instance));
        let deletions = ResourceGraph::from_recorded(
            removed
                .iter()
                .map(|(name, entry)| (name.clone(), entry.dependencies.clone())),
        )?
        .deletion_batches();

        for name in deletions.iter().flatten() {
            if let Some(entry) = prior.get(name) {
                actions.push(
                    Action::new(name, ActionType::Delete, &entry.resource_type).with_id(&entry.id),
                );
            }
        }
        for deposed in prior.deposed.iter().rev() {
            actions.push(
                Action::new(&deposed.name, ActionType::Delete, &deposed.resource_type)
                    .with_id(&deposed.id)
                    .with_description(format!(
                        "delete deposed {} '{}' ({})",
                        deposed.resource_type, deposed.name, deposed.id
                    )),
            );
        }

        let plan = Plan::new(key, actions, batches, deletions);
        info!(summary = %plan.summary(), "Plan computed");
        Ok(plan)
    }

    /// Converge a stack to its instance
    #[tracing::instrument(skip(self, instance), fields(stack = %instance.state_key()))]
    pub async fn apply(&self, instance: &StackInstance) -> Result<ApplyResult> {
        let started = Instant::now();
        let graph = self.validate(instance)?;
        let key = instance.state_key();

        let lock = self.store.acquire_lock(&key).await?;
        self.cancel.send_replace(false);
        let cancel = self.cancel.subscribe();

        self.ensure_authenticated(&key).await?;
        if self.settings.refresh {
            let report = self.refresh_unlocked(&key).await?;
            debug!(
                checked = report.checked,
                dropped = report.dropped.len(),
                drifted = report.drifted.len(),
                "Refreshed state"
            );
        }
        let prior = self.store.load(&key).await?;

        let batches = graph.schedule();
        let ctx = self.context(
            &key,
            &instance.name_prefix(),
            SecretContext::for_stack(instance),
            graph.clone(),
        );
        info!(batches = batches.len(), resources = instance.len(), "Applying stack");

        let mut result = ApplyResult::new(&key);
        let mut not_ok: HashSet<String> = HashSet::new();
        let mut cancelled = false;

        for (index, batch) in batches.into_iter().enumerate() {
            if *cancel.borrow() {
                cancelled = true;
            }
            if cancelled {
                for name in batch {
                    let action = provisional_action(instance.node(&name), prior.get(&name));
                    result.push(NodeReport::skipped(name, action, "run cancelled"));
                }
                continue;
            }

            debug!(batch = index, nodes = ?batch, "Starting batch");
            let semaphore = Arc::new(Semaphore::new(self.settings.parallelism.max(1)));
            let batch_failed = Arc::new(AtomicBool::new(false));
            let mut tasks = JoinSet::new();

            for name in batch {
                let Some(node) = instance.node(&name) else {
                    continue;
                };
                // Deleted ahead of a replacement earlier in this run
                let recreated = ctx.recreated.lock().await.contains(&name);
                let entry = if recreated {
                    None
                } else {
                    prior.get(&name).cloned()
                };

                let action = if recreated {
                    ActionType::Replace
                } else {
                    provisional_action(Some(node), entry.as_ref())
                };

                let blocked_by: Vec<String> = graph
                    .dependencies_of(&name)
                    .into_iter()
                    .filter(|dep| not_ok.contains(dep))
                    .collect();
                if !blocked_by.is_empty() {
                    warn!(node = %name, blocked_by = ?blocked_by, "Blocked by failed dependency");
                    result.push(NodeReport::blocked(
                        &name,
                        action,
                        format!("dependency did not succeed: {}", blocked_by.join(", ")),
                    ));
                    not_ok.insert(name);
                    continue;
                }

                let ctx = ctx.clone();
                let node = node.clone();
                let semaphore = semaphore.clone();
                let batch_failed = batch_failed.clone();
                tasks.spawn(async move {
                    let Ok(_permit) = semaphore.acquire_owned().await else {
                        return NodeReport::skipped(&node.name, action, "scheduler closed");
                    };
                    if batch_failed.load(Ordering::SeqCst) {
                        return NodeReport::skipped(
                            &node.name,
                            action,
                            "another node in the same batch failed",
                        );
                    }
                    let mut report = ctx.apply_node(&node, entry).await;
                    if recreated {
                        report.action = ActionType::Replace;
                    }
                    if !report.is_success() {
                        batch_failed.store(true, Ordering::SeqCst);
                    }
                    report
                });
            }

            let mut reports = Vec::new();
            while let Some(joined) = tasks.join_next().await {
                let report = joined
                    .map_err(|e| CloudError::StateError(format!("node task aborted: {e}")))?;
                reports.push(report);
            }
            reports.sort_by(|a, b| a.node.cmp(&b.node));
            for report in reports {
                if !report.is_success() {
                    not_ok.insert(report.node.clone());
                }
                result.push(report);
            }
        }

        if cancelled {
            warn!("Apply cancelled; remaining batches skipped");
        } else if result.is_success() {
            let state = self.store.load(&key).await?;
            ctx.delete_phase(&state, Some(instance), self.settings.parallelism, &cancel, &mut result)
                .await?;
        } else {
            info!(
                failed = ?result.failed(),
                blocked = ?result.blocked(),
                "Skipping delete phase after failures"
            );
        }

        if result.is_success() && !cancelled {
            let resolver = Resolver::new(&ctx.table, &ctx.secrets, ResolveMode::Apply);
            let mut outputs = BTreeMap::new();
            for (name, value) in &instance.outputs {
                if let Some(resolved) = resolver.resolve_value(name, value)? {
                    outputs.insert(name.clone(), resolved);
                }
            }
            self.store.set_outputs(&key, outputs.clone()).await?;
            result.outputs = outputs;
        }

        if cancelled {
            result.status = ApplyStatus::Cancelled;
        }
        result.duration_ms = started.elapsed().as_millis() as u64;
        lock.release();

        info!(
            status = %result.status,
            succeeded = result.succeeded().len(),
            failed = result.failed().len(),
            duration_ms = result.duration_ms,
            "Apply finished"
        );
        Ok(result)
    }

    /// Delete every recorded object of a stack, dependents first
    #[tracing::instrument(skip(self))]
    pub async fn destroy(&self, key: &str) -> Result<ApplyResult> {
        let started = Instant::now();
        let lock = self.store.acquire_lock(key).await?;
        self.cancel.send_replace(false);
        let cancel = self.cancel.subscribe();

        let state = self.store.load(key).await?;
        let mut result = ApplyResult::new(key);
        if state.is_empty() {
            info!("Nothing to destroy");
            lock.release();
            return Ok(result);
        }
        self.ensure_authenticated(key).await?;

        let secrets = SecretContext {
            region: String::new(),
            account_id: None,
        };
        let ctx = self.context(key, key, secrets, ResourceGraph::default());
        ctx.delete_phase(&state, None, self.settings.parallelism, &cancel, &mut result)
            .await?;

        if *cancel.borrow() {
            result.status = ApplyStatus::Cancelled;
        }
        if result.is_success() {
            self.store.set_outputs(key, BTreeMap::new()).await?;
        }
        result.duration_ms = started.elapsed().as_millis() as u64;
        lock.release();

        info!(status = %result.status, deleted = result.count(ActionType::Delete), "Destroy finished");
        Ok(result)
    }

    /// Read every recorded object and fold remote changes into state
    #[tracing::instrument(skip(self))]
    pub async fn refresh(&self, key: &str) -> Result<RefreshReport> {
        let lock = self.store.acquire_lock(key).await?;
        self.ensure_authenticated(key).await?;
        let report = self.refresh_unlocked(key).await;
        lock.release();
        report
    }

    async fn refresh_unlocked(&self, key: &str) -> Result<RefreshReport> {
        let state = self.store.load(key).await?;
        let managed: Vec<(String, ResourceState)> = state
            .resources
            .into_iter()
            .filter(|(_, entry)| !entry.is_data())
            .collect();

        let ctx = self.context(
            key,
            key,
            SecretContext {
                region: String::new(),
                account_id: None,
            },
            ResourceGraph::default(),
        );
        let reads: Vec<(String, Result<RemoteObject>)> = stream::iter(managed)
            .map(|(name, entry)| {
                let ctx = ctx.clone();
                async move {
                    let provider = &ctx.provider;
                    let (resource_type, id) = (entry.resource_type.as_str(), entry.id.as_str());
                    let read = ctx
                        .call(&name, "read", ctx.timeouts.read_secs, || async move {
                            provider.read(resource_type, id).await
                        })
                        .await;
                    (name, read)
                }
            })
            .buffer_unordered(self.settings.parallelism.max(1))
            .collect()
            .await;

        let mut report = RefreshReport::default();
        for (name, read) in reads {
            report.checked += 1;
            match read {
                Ok(object) => {
                    let drifted = Arc::new(AtomicBool::new(false));
                    let flag = drifted.clone();
                    self.store
                        .update(
                            key,
                            &name,
                            Box::new(move |entry| {
                                entry.map(|mut entry| {
                                    entry.outputs = outputs_with_id(&object);
                                    if let Some(observed) = &object.observed_inputs {
                                        let mut properties = entry.properties.clone();
                                        for (property, value) in observed {
                                            properties.insert(property.clone(), digest_value(value));
                                        }
                                        if properties != entry.properties {
                                            flag.store(true, Ordering::SeqCst);
                                            entry.input_hash = digest_properties(&properties);
                                            entry.properties = properties;
                                        }
                                    }
                                    entry
                                })
                            }),
                        )
                        .await?;
                    if drifted.load(Ordering::SeqCst) {
                        info!(node = %name, "Drift detected");
                        report.drifted.push(name);
                    }
                }
                Err(e) if is_not_found(&e) => {
                    info!(node = %name, "Remote object is gone; dropping it from state");
                    self.store.remove(key, &name).await?;
                    report.dropped.push(name);
                }
                Err(e) => return Err(e),
            }
        }

        report.dropped.sort();
        report.drifted.sort();
        Ok(report)
    }

    async fn ensure_authenticated(&self, key: &str) -> Result<()> {
        let status = self
            .provider
            .check_auth()
            .await
            .map_err(|e| CloudError::provider(key, e))?;
        if !status.authenticated {
            let message = status
                .error
                .unwrap_or_else(|| "provider is not authenticated".to_string());
            return Err(CloudError::provider(
                key,
                ProviderError::permanent(message),
            ));
        }
        debug!(provider = %self.provider.name(), account = ?status.account_info, "Provider authenticated");
        Ok(())
    }
}

/// Per-run execution state shared by node tasks
struct RunContext {
    key: String,
    name_prefix: String,
    graph: ResourceGraph,
    /// Nodes whose recorded object was deleted ahead of a replacement
    recreated: Mutex<HashSet<String>>,
    provider: Arc<dyn ResourceProvider>,
    store: Arc<dyn StateStore>,
    catalog: Arc<Catalog>,
    table: OutputTable,
    secrets: SecretContext,
    retry: RetryConfig,
    timeouts: TimeoutSettings,
}

impl RunContext {
    /// Run one provider operation with retries, each attempt bounded by `secs`
    async fn call<T, F, Fut>(&self, node: &str, operation: &str, secs: u64, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        let limit = Duration::from_secs(secs);
        let what = format!("{operation} {node}");
        self.retry
            .run(&what, || {
                let attempt = op();
                async move {
                    match tokio::time::timeout(limit, attempt).await {
                        Ok(result) => result.map_err(|e| CloudError::provider(node, e)),
                        Err(_) => Err(CloudError::Timeout {
                            node: node.to_string(),
                            operation: operation.to_string(),
                            secs,
                        }),
                    }
                }
            })
            .await
    }

    async fn apply_node(&self, node: &ResourceNode, prior: Option<ResourceState>) -> NodeReport {
        let started = Instant::now();
        let resolver = Resolver::new(&self.table, &self.secrets, ResolveMode::Apply);
        let inputs = match resolver.resolve(node) {
            Ok(inputs) => inputs,
            Err(e) => {
                let action = provisional_action(Some(node), prior.as_ref());
                return self.fail(node, action, e, started);
            }
        };

        let digest = InputDigest::of(&inputs);
        let schema = self.catalog.get(&node.resource_type);
        let decision = reconcile(
            Some(Desired {
                node,
                schema,
                digest: &digest,
            }),
            prior.as_ref(),
        );
        let action = decision.action_type();
        let deletes_first = decision.deletes_first(schema);
        debug!(node = %node.name, action = %action, properties = ?decision.properties(), "Reconciled");

        let request = ResourceRequest {
            resource_type: node.resource_type.clone(),
            logical_name: node.name.clone(),
            physical_name: format!("{}-{}", self.name_prefix, node.name),
            inputs,
        };

        let outcome = match decision {
            Decision::NoOp | Decision::Delete => self.keep(node, prior).await,
            Decision::Read => self.read_data(node, &request, &digest).await,
            Decision::Create => self.create(node, &request, &digest).await,
            Decision::Update { changed } => {
                self.update(node, prior, &request, &digest, &changed).await
            }
            Decision::Replace { .. } if deletes_first => {
                self.recreate(node, prior, &request, &digest).await
            }
            Decision::Replace { .. } => self.replace(node, prior, &request, &digest).await,
        };

        match outcome {
            Ok(state) => {
                if action != ActionType::NoOp {
                    info!(node = %node.name, action = %action, "Applied");
                }
                NodeReport::succeeded(&node.name, action, state).with_duration(started.elapsed())
            }
            Err(e) => self.fail(node, action, e, started),
        }
    }

    fn fail(&self, node: &ResourceNode, action: ActionType, error: CloudError, started: Instant) -> NodeReport {
        self.table.mark(&node.name, LifecycleState::Failed);
        warn!(node = %node.name, action = %action, error = %error, "Node failed");
        NodeReport::failed(&node.name, action, error.to_string()).with_duration(started.elapsed())
    }

    fn entry_for(
        &self,
        node: &ResourceNode,
        object: &RemoteObject,
        digest: &InputDigest,
        prior: Option<&ResourceState>,
    ) -> ResourceState {
        let now = Utc::now();
        ResourceState {
            id: object.id.clone(),
            resource_type: node.resource_type.clone(),
            kind: node.kind,
            input_hash: digest.hash().unwrap_or_default(),
            properties: digest.known_properties(),
            outputs: outputs_with_id(object),
            dependencies: node.dependencies(),
            version: prior.map(|p| p.version + 1).unwrap_or(1),
            created_at: prior.map(|p| p.created_at).unwrap_or(now),
            updated_at: now,
        }
    }

    async fn keep(&self, node: &ResourceNode, prior: Option<ResourceState>) -> Result<LifecycleState> {
        let Some(prior) = prior else {
            return Err(CloudError::StateError(format!(
                "no recorded state for '{}'",
                node.name
            )));
        };

        let dependencies = node.dependencies();
        if prior.dependencies != dependencies {
            self.store
                .update(
                    &self.key,
                    &node.name,
                    Box::new(move |entry| {
                        entry.map(|mut entry| {
                            entry.dependencies = dependencies;
                            entry
                        })
                    }),
                )
                .await?;
        }

        self.table
            .set(&node.name, LifecycleState::Created, prior.outputs);
        Ok(LifecycleState::Created)
    }

    async fn read_data(
        &self,
        node: &ResourceNode,
        request: &ResourceRequest,
        digest: &InputDigest,
    ) -> Result<LifecycleState> {
        self.table.mark(&node.name, LifecycleState::Creating);
        let provider = &self.provider;
        let object = self
            .call(&node.name, "read", self.timeouts.read_secs, || async move {
                provider.lookup(request).await
            })
            .await?;

        let entry = self.entry_for(node, &object, digest, None);
        self.store.put(&self.key, &node.name, entry).await?;
        self.table
            .set(&node.name, LifecycleState::Created, outputs_with_id(&object));
        Ok(LifecycleState::Created)
    }

    async fn create(
        &self,
        node: &ResourceNode,
        request: &ResourceRequest,
        digest: &InputDigest,
    ) -> Result<LifecycleState> {
        self.table.mark(&node.name, LifecycleState::Creating);
        let provider = &self.provider;
        let object = self
            .call(&node.name, "create", self.timeouts.create_secs, || async move {
                provider.create(request).await
            })
            .await?;

        let entry = self.entry_for(node, &object, digest, None);
        self.store.put(&self.key, &node.name, entry).await?;
        self.table
            .set(&node.name, LifecycleState::Created, outputs_with_id(&object));
        Ok(LifecycleState::Created)
    }

    async fn update(
        &self,
        node: &ResourceNode,
        prior: Option<ResourceState>,
        request: &ResourceRequest,
        digest: &InputDigest,
        changed: &[String],
    ) -> Result<LifecycleState> {
        let Some(prior) = prior else {
            return Err(CloudError::StateError(format!(
                "no recorded state for '{}'",
                node.name
            )));
        };

        self.table
            .set(&node.name, LifecycleState::Updating, prior.outputs.clone());
        let provider = &self.provider;
        let id = prior.id.as_str();
        let object = self
            .call(&node.name, "update", self.timeouts.update_secs, || async move {
                provider.update(id, request, changed).await
            })
            .await?;

        let entry = self.entry_for(node, &object, digest, Some(&prior));
        self.store.put(&self.key, &node.name, entry).await?;
        self.table
            .set(&node.name, LifecycleState::Created, outputs_with_id(&object));
        Ok(LifecycleState::Created)
    }

    /// Create the new object, then commit it and depose the old one in one write
    async fn replace(
        &self,
        node: &ResourceNode,
        prior: Option<ResourceState>,
        request: &ResourceRequest,
        digest: &InputDigest,
    ) -> Result<LifecycleState> {
        let Some(prior) = prior else {
            return Err(CloudError::StateError(format!(
                "no recorded state for '{}'",
                node.name
            )));
        };

        self.table.mark(&node.name, LifecycleState::Creating);
        let provider = &self.provider;
        let object = self
            .call(&node.name, "create", self.timeouts.create_secs, || async move {
                provider.create(request).await
            })
            .await?;

        let mut entry = self.entry_for(node, &object, digest, Some(&prior));
        entry.created_at = entry.updated_at;
        let deposed = DeposedObject::from_state(&node.name, &prior);
        let name = node.name.clone();
        self.store
            .transact(
                &self.key,
                Box::new(move |doc| {
                    doc.resources.insert(name, entry);
                    doc.deposed.push(deposed);
                }),
            )
            .await?;

        info!(node = %node.name, old = %prior.id, new = %object.id, "Replacement created; old object deposed");
        self.table
            .set(&node.name, LifecycleState::Created, outputs_with_id(&object));
        Ok(LifecycleState::Created)
    }

    /// Delete the old object, then create the new one under the same name
    async fn recreate(
        &self,
        node: &ResourceNode,
        prior: Option<ResourceState>,
        request: &ResourceRequest,
        digest: &InputDigest,
    ) -> Result<LifecycleState> {
        let Some(prior) = prior else {
            return Err(CloudError::StateError(format!(
                "no recorded state for '{}'",
                node.name
            )));
        };

        self.evict_dependents(&node.name).await?;
        self.delete_remote(&node.name, &prior.resource_type, &prior.id)
            .await?;
        self.store.remove(&self.key, &node.name).await?;
        info!(node = %node.name, id = %prior.id, "Deleted old object ahead of its replacement");

        self.create(node, request, digest).await
    }

    /// Delete the recorded dependents of `name`, dependents first. Each is
    /// created again when its own batch runs.
    async fn evict_dependents(&self, name: &str) -> Result<()> {
        let mut recreated = self.recreated.lock().await;
        let state = self.store.load(&self.key).await?;
        let evicted: BTreeMap<String, ResourceState> = self
            .graph
            .transitive_dependents(name)
            .into_iter()
            .filter(|dependent| !recreated.contains(dependent))
            .filter_map(|dependent| {
                let entry = state.get(&dependent).filter(|e| !e.is_data())?.clone();
                Some((dependent, entry))
            })
            .collect();
        if evicted.is_empty() {
            return Ok(());
        }

        let order = ResourceGraph::from_recorded(
            evicted
                .iter()
                .map(|(dependent, entry)| (dependent.clone(), entry.dependencies.clone())),
        )?
        .deletion_batches();
        for dependent in order.into_iter().flatten() {
            let Some(entry) = evicted.get(&dependent) else {
                continue;
            };
            self.delete_remote(&dependent, &entry.resource_type, &entry.id)
                .await?;
            self.store.remove(&self.key, &dependent).await?;
            info!(node = %dependent, replaced = %name, id = %entry.id, "Deleted dependent of a replacement");
            recreated.insert(dependent);
        }
        Ok(())
    }

    /// Delete removed entries (dependents first), then deposed objects (newest first)
    async fn delete_phase(
        &self,
        state: &RemoteState,
        instance: Option<&StackInstance>,
        parallelism: usize,
        cancel: &watch::Receiver<bool>,
        result: &mut ApplyResult,
    ) -> Result<()> {
        let removed = removed_entries(state, instance);
        let graph = ResourceGraph::from_recorded(
            removed
                .iter()
                .map(|(name, entry)| (name.clone(), entry.dependencies.clone())),
        )?;

        let mut failed: HashSet<String> = HashSet::new();
        for batch in graph.deletion_batches() {
            if *cancel.borrow() {
                for name in batch {
                    result.push(NodeReport::skipped(name, ActionType::Delete, "run cancelled"));
                }
                continue;
            }

            let mut runnable = Vec::new();
            for name in batch {
                // A dependent that could not be deleted still needs this one
                let still_needed: Vec<String> = graph
                    .dependents_of(&name)
                    .into_iter()
                    .filter(|dependent| failed.contains(dependent))
                    .collect();
                if !still_needed.is_empty() {
                    result.push(NodeReport::blocked(
                        &name,
                        ActionType::Delete,
                        format!("still needed by {}", still_needed.join(", ")),
                    ));
                    failed.insert(name);
                    continue;
                }
                if let Some(entry) = removed.get(&name) {
                    runnable.push((name, entry.clone()));
                }
            }

            let mut reports: Vec<NodeReport> = stream::iter(runnable)
                .map(|(name, entry)| async move { self.delete_entry(&name, &entry).await })
                .buffer_unordered(parallelism.max(1))
                .collect()
                .await;
            reports.sort_by(|a, b| a.node.cmp(&b.node));
            for report in reports {
                if !report.is_success() {
                    failed.insert(report.node.clone());
                }
                result.push(report);
            }
        }

        for deposed in state.deposed.iter().rev() {
            if *cancel.borrow() {
                result.push(NodeReport::skipped(
                    &deposed.name,
                    ActionType::Delete,
                    "run cancelled",
                ));
                continue;
            }
            let report = self.delete_deposed(deposed).await;
            result.push(report);
        }
        Ok(())
    }

    async fn delete_remote(&self, name: &str, resource_type: &str, id: &str) -> Result<()> {
        let provider = &self.provider;
        self.call(name, "delete", self.timeouts.delete_secs, || async move {
            match provider.delete(resource_type, id).await {
                Err(e) if e.is_not_found() => Ok(()),
                other => other,
            }
        })
        .await
    }

    async fn delete_entry(&self, name: &str, entry: &ResourceState) -> NodeReport {
        let started = Instant::now();
        let outcome = async {
            if !entry.is_data() {
                self.delete_remote(name, &entry.resource_type, &entry.id).await?;
            }
            self.store.remove(&self.key, name).await
        }
        .await;

        match outcome {
            Ok(()) => {
                self.table.mark(name, LifecycleState::Deleted);
                info!(node = %name, id = %entry.id, "Deleted");
                NodeReport::succeeded(name, ActionType::Delete, LifecycleState::Deleted)
                    .with_duration(started.elapsed())
            }
            Err(e) => {
                warn!(node = %name, error = %e, "Delete failed");
                NodeReport::failed(name, ActionType::Delete, e.to_string())
                    .with_duration(started.elapsed())
            }
        }
    }

    async fn delete_deposed(&self, deposed: &DeposedObject) -> NodeReport {
        let started = Instant::now();
        let outcome = async {
            self.delete_remote(&deposed.name, &deposed.resource_type, &deposed.id)
                .await?;
            self.store.remove_deposed(&self.key, &deposed.id).await
        }
        .await;

        match outcome {
            Ok(()) => {
                info!(node = %deposed.name, id = %deposed.id, "Deleted deposed object");
                NodeReport::succeeded(&deposed.name, ActionType::Delete, LifecycleState::Deleted)
                    .with_duration(started.elapsed())
            }
            Err(e) => {
                warn!(node = %deposed.name, id = %deposed.id, error = %e, "Deleting deposed object failed");
                NodeReport::failed(&deposed.name, ActionType::Delete, e.to_string())
                    .with_duration(started.elapsed())
            }
        }
    }
}

/// Recorded entries with no node in the instance; all of them without one
fn removed_entries(
    state: &RemoteState,
    instance: Option<&StackInstance>,
) -> BTreeMap<String, ResourceState> {
    state
        .resources
        .iter()
        .filter(|(name, _)| instance.is_none_or(|i| i.node(name).is_none()))
        .map(|(name, entry)| (name.clone(), entry.clone()))
        .collect()
}

/// Action reported for a node that never got to reconcile
fn provisional_action(node: Option<&ResourceNode>, prior: Option<&ResourceState>) -> ActionType {
    match (node, prior) {
        (Some(node), _) if node.is_data() => ActionType::Read,
        (_, None) => ActionType::Create,
        (_, Some(_)) => ActionType::NoOp,
    }
}

fn outputs_with_id(object: &RemoteObject) -> BTreeMap<String, serde_json::Value> {
    let mut outputs = object.outputs.clone();
    outputs
        .entry("id".to_string())
        .or_insert_with(|| serde_json::Value::String(object.id.clone()));
    outputs
}

fn is_not_found(error: &CloudError) -> bool {
    matches!(error, CloudError::Provider { source, .. } if source.is_not_found())
}
