#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{Value, json};
use stackflow_cloud::{
    AuthStatus, Engine, MemoryStateStore, ProviderError, ProviderResult, RemoteObject,
    ResourceProvider, ResourceRequest,
};
use stackflow_core::{
    Catalog, EngineSettings, InputValue, Mutability, PropertyKind, ResourceNode, ResourceSchema,
    RetrySettings, StackBuilder, StackInstance, StackParameters,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const GENERIC: &str = "test:generic/node";
/// Generic type whose `name` the provider allows only once
pub const NAMED: &str = "test:generic/named";

/// One provider call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Op {
    pub kind: String,
    pub node: String,
    pub id: String,
}

impl Op {
    pub fn is(&self, kind: &str, node: &str) -> bool {
        self.kind == kind && self.node == node
    }
}

#[derive(Debug, Clone)]
struct StoredObject {
    node: String,
    resource_type: String,
    inputs: BTreeMap<String, Value>,
    outputs: BTreeMap<String, Value>,
}

#[derive(Debug, Clone)]
struct Failure {
    error: ProviderError,
    remaining: usize,
}

/// In-memory provider that records every call
#[derive(Default)]
pub struct RecordingProvider {
    ops: Mutex<Vec<Op>>,
    objects: Mutex<HashMap<String, StoredObject>>,
    names: Mutex<HashMap<String, String>>,
    failures: Mutex<HashMap<(String, String), Failure>>,
    delays: Mutex<HashMap<String, Duration>>,
    counter: AtomicU64,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    strict: AtomicBool,
}

impl RecordingProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn ops(&self) -> Vec<Op> {
        self.ops.lock().unwrap().clone()
    }

    /// Calls that change remote objects
    pub fn mutations(&self) -> Vec<Op> {
        self.ops()
            .into_iter()
            .filter(|op| matches!(op.kind.as_str(), "create" | "update" | "delete"))
            .collect()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.ops().iter().filter(|op| op.kind == kind).count()
    }

    pub fn position(&self, kind: &str, node: &str) -> Option<usize> {
        self.ops().iter().position(|op| op.is(kind, node))
    }

    pub fn clear_ops(&self) {
        self.ops.lock().unwrap().clear();
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    /// Refuse duplicate `NAMED` names and deletes of objects still referenced
    pub fn enforce_constraints(&self) {
        self.strict.store(true, Ordering::SeqCst);
    }

    fn check_name_free(&self, request: &ResourceRequest) -> ProviderResult<()> {
        if !self.strict.load(Ordering::SeqCst) || request.resource_type != NAMED {
            return Ok(());
        }
        let Some(name) = request.input_str("name") else {
            return Ok(());
        };
        let objects = self.objects.lock().unwrap();
        if let Some((id, _)) = objects
            .iter()
            .find(|(_, o)| o.resource_type == NAMED && o.inputs.get("name") == Some(&json!(name)))
        {
            return Err(ProviderError::permanent(format!(
                "{NAMED} named '{name}' already exists ({id})"
            )));
        }
        Ok(())
    }

    fn check_unreferenced(&self, id: &str) -> ProviderResult<()> {
        if !self.strict.load(Ordering::SeqCst) {
            return Ok(());
        }
        let needle = json!(id).to_string();
        let objects = self.objects.lock().unwrap();
        let mut users: Vec<&str> = objects
            .iter()
            .filter(|(other, o)| {
                other.as_str() != id && json!(o.inputs).to_string().contains(&needle)
            })
            .map(|(_, o)| o.node.as_str())
            .collect();
        if users.is_empty() {
            return Ok(());
        }
        users.sort();
        Err(ProviderError::permanent(format!(
            "DependencyViolation: {id} is still referenced by {}",
            users.join(", ")
        )))
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Fail `op` on `node` the next `times` calls
    pub fn fail(&self, op: &str, node: &str, error: ProviderError, times: usize) {
        self.failures.lock().unwrap().insert(
            (op.to_string(), node.to_string()),
            Failure {
                error,
                remaining: times,
            },
        );
    }

    pub fn delay(&self, node: &str, delay: Duration) {
        self.delays
            .lock()
            .unwrap()
            .insert(node.to_string(), delay);
    }

    /// Delete an object behind the engine's back
    pub fn remove_out_of_band(&self, node: &str) {
        self.objects.lock().unwrap().retain(|_, o| o.node != node);
    }

    /// Change a stored input behind the engine's back
    pub fn tamper(&self, node: &str, property: &str, value: Value) {
        for object in self.objects.lock().unwrap().values_mut() {
            if object.node == node {
                object.inputs.insert(property.to_string(), value.clone());
            }
        }
    }

    pub fn inputs_of(&self, node: &str) -> Option<BTreeMap<String, Value>> {
        self.objects
            .lock()
            .unwrap()
            .values()
            .find(|o| o.node == node)
            .map(|o| o.inputs.clone())
    }

    fn node_of(&self, id: &str) -> String {
        self.names
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .unwrap_or_else(|| id.to_string())
    }

    async fn enter(&self, kind: &str, node: &str, id: &str) -> ProviderResult<()> {
        self.ops.lock().unwrap().push(Op {
            kind: kind.to_string(),
            node: node.to_string(),
            id: id.to_string(),
        });

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = self.delays.lock().unwrap().get(node).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        } else {
            tokio::task::yield_now().await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let mut failures = self.failures.lock().unwrap();
        if let Some(failure) = failures.get_mut(&(kind.to_string(), node.to_string()))
            && failure.remaining > 0
        {
            failure.remaining -= 1;
            return Err(failure.error.clone());
        }
        Ok(())
    }

    fn next_id(&self, request: &ResourceRequest) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{}-{}", request.logical_name, n)
    }

    fn outputs_for(&self, id: &str, request: &ResourceRequest) -> BTreeMap<String, Value> {
        let n = self.counter.load(Ordering::SeqCst);
        let name = request
            .input_str("name")
            .or_else(|| request.input_str("family"))
            .unwrap_or(&request.physical_name)
            .to_string();
        BTreeMap::from([
            ("id".to_string(), json!(id)),
            ("arn".to_string(), json!(format!("arn:test:{}:{}", request.resource_type, id))),
            ("name".to_string(), json!(name)),
            ("family".to_string(), json!(name)),
            ("revision".to_string(), json!(n)),
            ("public-ip".to_string(), json!(format!("203.0.113.{}", n % 250))),
            ("private-ip".to_string(), json!(format!("10.0.1.{}", n % 250))),
            ("availability-zone".to_string(), json!("ap-south-1a")),
        ])
    }
}

#[async_trait]
impl ResourceProvider for RecordingProvider {
    fn name(&self) -> &str {
        "recording"
    }

    async fn check_auth(&self) -> ProviderResult<AuthStatus> {
        Ok(AuthStatus::ok("test-account"))
    }

    async fn create(&self, request: &ResourceRequest) -> ProviderResult<RemoteObject> {
        self.enter("create", &request.logical_name, "").await?;
        self.check_name_free(request)?;
        let id = self.next_id(request);
        let outputs = self.outputs_for(&id, request);
        self.names
            .lock()
            .unwrap()
            .insert(id.clone(), request.logical_name.clone());
        self.objects.lock().unwrap().insert(
            id.clone(),
            StoredObject {
                node: request.logical_name.clone(),
                resource_type: request.resource_type.clone(),
                inputs: request.inputs.clone(),
                outputs: outputs.clone(),
            },
        );
        if let Some(op) = self.ops.lock().unwrap().last_mut()
            && op.kind == "create"
            && op.node == request.logical_name
            && op.id.is_empty()
        {
            op.id = id.clone();
        }
        Ok(RemoteObject {
            id,
            outputs,
            observed_inputs: None,
        })
    }

    async fn read(&self, resource_type: &str, id: &str) -> ProviderResult<RemoteObject> {
        let node = self.node_of(id);
        self.enter("read", &node, id).await?;
        let objects = self.objects.lock().unwrap();
        match objects.get(id) {
            Some(object) if object.resource_type == resource_type => Ok(RemoteObject {
                id: id.to_string(),
                outputs: object.outputs.clone(),
                observed_inputs: Some(object.inputs.clone()),
            }),
            _ => Err(ProviderError::not_found(format!("{resource_type} {id}"))),
        }
    }

    async fn lookup(&self, request: &ResourceRequest) -> ProviderResult<RemoteObject> {
        self.enter("lookup", &request.logical_name, "").await?;
        Ok(RemoteObject::new(format!("{}-lookup", request.logical_name))
            .with_output("name", json!(format!("{}-image", request.logical_name)))
            .with_output("account-id", json!("123456789012")))
    }

    async fn update(
        &self,
        id: &str,
        request: &ResourceRequest,
        _changed: &[String],
    ) -> ProviderResult<RemoteObject> {
        self.enter("update", &request.logical_name, id).await?;
        let mut objects = self.objects.lock().unwrap();
        let Some(object) = objects.get_mut(id) else {
            return Err(ProviderError::not_found(id.to_string()));
        };
        object.inputs = request.inputs.clone();
        Ok(RemoteObject {
            id: id.to_string(),
            outputs: object.outputs.clone(),
            observed_inputs: None,
        })
    }

    async fn delete(&self, _resource_type: &str, id: &str) -> ProviderResult<()> {
        let node = self.node_of(id);
        self.enter("delete", &node, id).await?;
        self.check_unreferenced(id)?;
        match self.objects.lock().unwrap().remove(id) {
            Some(_) => Ok(()),
            None => Err(ProviderError::not_found(id.to_string())),
        }
    }
}

/// Catalog with two generic managed types: `size` forces a new object, `label` does not
pub fn test_catalog() -> Catalog {
    Catalog::aws()
        .with(
            ResourceSchema::managed(GENERIC)
                .optional("size", PropertyKind::Integer, Mutability::ForceNew)
                .optional("label", PropertyKind::String, Mutability::Mutable)
                .optional("after", PropertyKind::List, Mutability::Mutable)
                .outputs(&["id", "arn", "name"]),
        )
        .with(
            ResourceSchema::managed(NAMED)
                .optional("name", PropertyKind::String, Mutability::ForceNew)
                .optional("size", PropertyKind::Integer, Mutability::ForceNew)
                .optional("after", PropertyKind::List, Mutability::Mutable)
                .named_by("name")
                .unique()
                .outputs(&["id", "arn", "name"]),
        )
}

pub fn generic(name: &str) -> ResourceNode {
    ResourceNode::new(GENERIC, name).with_input("size", InputValue::literal(1))
}

/// Generic node whose `after` list references `id` of each dependency
pub fn generic_after(name: &str, deps: &[&str]) -> ResourceNode {
    generic(name).with_input(
        "after",
        InputValue::List(deps.iter().map(|d| InputValue::reference(*d, "id")).collect()),
    )
}

/// `NAMED` node called `{prefix}-{remote}` in stack `stack`
pub fn named(stack: &str, name: &str, remote: &str) -> ResourceNode {
    ResourceNode::new(NAMED, name)
        .with_input("name", InputValue::literal(format!("shonry27-{stack}-{remote}")))
        .with_input("size", InputValue::literal(1))
}

pub fn build_instance(stack: &str, nodes: Vec<ResourceNode>) -> StackInstance {
    build_instance_with(&test_catalog(), stack, nodes, Vec::new())
}

pub fn build_instance_with(
    catalog: &Catalog,
    stack: &str,
    nodes: Vec<ResourceNode>,
    outputs: Vec<(&str, InputValue)>,
) -> StackInstance {
    let mut params = StackParameters::new("ap-south-1");
    params.account_id = Some("865742897250".to_string());
    params.secret_prefix = Some(format!("/{stack}"));

    let mut builder = StackBuilder::new(catalog, "shonry27", stack, params);
    for node in nodes {
        builder.declare_node(node).unwrap();
    }
    for (name, value) in outputs {
        builder.output(name, value).unwrap();
    }
    builder.build().unwrap()
}

/// Settings for fast, deterministic tests
pub fn test_settings() -> EngineSettings {
    EngineSettings {
        parallelism: 4,
        refresh: false,
        retry: RetrySettings {
            max_attempts: 3,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            backoff_multiplier: 2.0,
        },
        ..EngineSettings::default()
    }
}

pub fn engine(
    provider: Arc<RecordingProvider>,
    store: Arc<MemoryStateStore>,
    settings: EngineSettings,
) -> Engine {
    Engine::new(provider, store, test_catalog(), settings)
}

/// Small deterministic generator for graph shapes
pub struct XorShift(u64);

impl XorShift {
    pub fn new(seed: u64) -> Self {
        Self(seed.max(1))
    }

    pub fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    pub fn below(&mut self, n: u64) -> u64 {
        self.next() % n
    }
}
