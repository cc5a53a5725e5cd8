//! Reference resolution and secret injection
//!
//! Turns `InputValue`s into JSON using the outputs of nodes that already
//! reached a resolvable state in this run. Secret handles become store
//! locators; the engine never holds a secret value.

use crate::error::{CloudError, Result};
use serde_json::{Value, json};
use stackflow_core::{
    Catalog, FlowError, InputValue, LifecycleState, PropertyKind, Reference, ResourceNode,
    SecretHandle, Segment, StackInstance,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

/// Output table entry for one node
#[derive(Debug, Clone, PartialEq)]
pub struct OutputEntry {
    pub state: LifecycleState,
    pub outputs: BTreeMap<String, Value>,
}

/// Lifecycle state and outputs of every node seen in a run, shared between tasks
#[derive(Debug, Default)]
pub struct OutputTable {
    entries: RwLock<HashMap<String, OutputEntry>>,
}

impl OutputTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, node: &str, state: LifecycleState, outputs: BTreeMap<String, Value>) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(node.to_string(), OutputEntry { state, outputs });
    }

    /// Change the state, keeping known outputs
    pub fn mark(&self, node: &str, state: LifecycleState) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries
            .entry(node.to_string())
            .and_modify(|entry| entry.state = state)
            .or_insert_with(|| OutputEntry {
                state,
                outputs: BTreeMap::new(),
            });
    }

    pub fn get(&self, node: &str) -> Option<OutputEntry> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(node).cloned()
    }

    pub fn state(&self, node: &str) -> Option<LifecycleState> {
        self.get(node).map(|entry| entry.state)
    }
}

/// Where secret handles point to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretContext {
    pub region: String,
    pub account_id: Option<String>,
}

impl SecretContext {
    pub fn for_stack(instance: &StackInstance) -> Self {
        Self {
            region: instance.parameters.region.clone(),
            account_id: instance.parameters.account_id.clone(),
        }
    }

    /// Provider-native locator of a handle
    ///
    /// Without an account id the bare path is used, which the parameter
    /// store accepts for parameters in the caller's own account.
    pub fn locator(&self, handle: &SecretHandle) -> String {
        match &self.account_id {
            Some(account) => format!(
                "arn:aws:ssm:{}:{}:parameter{}",
                self.region, account, handle.path
            ),
            None => handle.path.clone(),
        }
    }

    /// `{name, valueFrom}` injection entry
    pub fn inject(&self, handle: &SecretHandle) -> Value {
        json!({
            "name": handle.name,
            "valueFrom": self.locator(handle),
        })
    }
}

/// How unresolvable references are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveMode {
    /// Pending outputs are unknown
    Plan,
    /// Pending outputs are an error
    Apply,
}

pub struct Resolver<'a> {
    table: &'a OutputTable,
    secrets: &'a SecretContext,
    mode: ResolveMode,
}

impl<'a> Resolver<'a> {
    pub fn new(table: &'a OutputTable, secrets: &'a SecretContext, mode: ResolveMode) -> Self {
        Self {
            table,
            secrets,
            mode,
        }
    }

    /// Resolve every input of a node. `None` marks a value unknown at plan time.
    pub fn resolve_partial(&self, node: &ResourceNode) -> Result<BTreeMap<String, Option<Value>>> {
        node.inputs
            .iter()
            .map(|(key, value)| Ok((key.clone(), self.resolve_value(&node.name, value)?)))
            .collect()
    }

    /// Resolve every input of a node; fails on anything unknown
    pub fn resolve(&self, node: &ResourceNode) -> Result<BTreeMap<String, Value>> {
        node.inputs
            .iter()
            .map(|(key, value)| {
                let resolved = self.resolve_value(&node.name, value)?;
                resolved
                    .map(|v| (key.clone(), v))
                    .ok_or_else(|| CloudError::UnresolvedReference {
                        node: node.name.clone(),
                        reference: key.clone(),
                        reason: "value is not known yet".to_string(),
                    })
            })
            .collect()
    }

    pub fn resolve_value(&self, owner: &str, value: &InputValue) -> Result<Option<Value>> {
        match value {
            InputValue::Literal(v) => Ok(Some(v.clone())),
            InputValue::Reference(reference) => self.lookup(owner, reference),
            InputValue::Secret(handle) => Ok(Some(self.secrets.inject(handle))),
            InputValue::List(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    match self.resolve_value(owner, item)? {
                        Some(v) => values.push(v),
                        None => return Ok(None),
                    }
                }
                Ok(Some(Value::Array(values)))
            }
            InputValue::Map(entries) if is_secret_map(entries) => {
                let mut handles: Vec<&SecretHandle> = entries
                    .values()
                    .filter_map(|v| match v {
                        InputValue::Secret(handle) => Some(handle),
                        _ => None,
                    })
                    .collect();
                handles.sort_by(|a, b| a.name.cmp(&b.name));
                Ok(Some(Value::Array(
                    handles.into_iter().map(|h| self.secrets.inject(h)).collect(),
                )))
            }
            InputValue::Map(entries) => {
                let mut map = serde_json::Map::new();
                for (key, item) in entries {
                    match self.resolve_value(owner, item)? {
                        Some(v) => {
                            map.insert(key.clone(), v);
                        }
                        None => return Ok(None),
                    }
                }
                Ok(Some(Value::Object(map)))
            }
            InputValue::Interpolation(segments) => {
                let mut text = String::new();
                for segment in segments {
                    match segment {
                        Segment::Text(t) => text.push_str(t),
                        Segment::Ref(reference) => match self.lookup(owner, reference)? {
                            Some(Value::String(s)) => text.push_str(&s),
                            Some(other) => text.push_str(&other.to_string()),
                            None => return Ok(None),
                        },
                    }
                }
                Ok(Some(Value::String(text)))
            }
        }
    }

    fn lookup(&self, owner: &str, reference: &Reference) -> Result<Option<Value>> {
        let unresolved = |reason: String| CloudError::UnresolvedReference {
            node: owner.to_string(),
            reference: reference.to_string(),
            reason,
        };

        let entry = match self.table.get(&reference.node) {
            Some(entry) if entry.state.is_resolvable() => entry,
            Some(entry) => {
                return match self.mode {
                    ResolveMode::Plan if entry.state != LifecycleState::Failed => Ok(None),
                    _ => Err(unresolved(format!("'{}' is {}", reference.node, entry.state))),
                };
            }
            None => {
                return match self.mode {
                    ResolveMode::Plan => Ok(None),
                    ResolveMode::Apply => {
                        Err(unresolved(format!("'{}' has not been applied", reference.node)))
                    }
                };
            }
        };

        match entry.outputs.get(&reference.attribute) {
            Some(value) => Ok(Some(value.clone())),
            None if self.mode == ResolveMode::Plan => Ok(None),
            None => Err(unresolved(format!(
                "'{}' has no output '{}'",
                reference.node, reference.attribute
            ))),
        }
    }
}

/// A non-empty map of nothing but secret handles
fn is_secret_map(entries: &BTreeMap<String, InputValue>) -> bool {
    !entries.is_empty() && entries.values().all(|v| matches!(v, InputValue::Secret(_)))
}

/// Secret-only properties must hold secret handles and nothing else
///
/// Runs before any provider call. A literal or interpolated string is a
/// secret leak; any other shape is a validation error.
pub fn ensure_secret_properties(instance: &StackInstance, catalog: &Catalog) -> Result<()> {
    for node in &instance.nodes {
        let Some(schema) = catalog.get(&node.resource_type) else {
            continue;
        };
        for (key, value) in &node.inputs {
            let secret_only = schema
                .property(key)
                .is_some_and(|p| p.kind == PropertyKind::Secrets);
            if !secret_only {
                continue;
            }
            check_secret_value(&node.name, key, value)?;
        }
    }
    Ok(())
}

fn check_secret_value(node: &str, property: &str, value: &InputValue) -> Result<()> {
    let leak = || FlowError::SecretLeak {
        node: node.to_string(),
        property: property.to_string(),
    };

    match value {
        InputValue::Secret(_) => Ok(()),
        InputValue::Literal(_) | InputValue::Interpolation(_) => Err(leak().into()),
        InputValue::Map(entries) => {
            for item in entries.values() {
                match item {
                    InputValue::Secret(_) => {}
                    InputValue::Literal(_) | InputValue::Interpolation(_) => {
                        return Err(leak().into());
                    }
                    other => {
                        return Err(FlowError::validation(
                            node,
                            format!("'{property}' may only hold secret handles, found {other:?}"),
                        )
                        .into());
                    }
                }
            }
            Ok(())
        }
        InputValue::List(_) | InputValue::Reference(_) => Err(FlowError::validation(
            node,
            format!("'{property}' must be a map of secret handles"),
        )
        .into()),
    }
}
