//! Resource nodes and the values that feed their inputs

use super::secret::SecretHandle;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

static NODE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_-]*$").expect("valid node name regex"));

static ATTRIBUTE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_-]*$").expect("valid attribute regex"));

/// Whether a logical name is usable as a node identity
pub fn is_valid_node_name(name: &str) -> bool {
    NODE_NAME.is_match(name)
}

/// Managed resources are created and owned by a stack; data nodes are read-only lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    #[default]
    Managed,
    Data,
}

/// Lifecycle of a node within one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    #[default]
    Planned,
    Creating,
    Created,
    Updating,
    Deleted,
    Failed,
}

impl LifecycleState {
    /// References to a node may only resolve once it reached one of these states
    pub fn is_resolvable(&self) -> bool {
        matches!(self, LifecycleState::Created | LifecycleState::Updating)
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Planned => write!(f, "planned"),
            LifecycleState::Creating => write!(f, "creating"),
            LifecycleState::Created => write!(f, "created"),
            LifecycleState::Updating => write!(f, "updating"),
            LifecycleState::Deleted => write!(f, "deleted"),
            LifecycleState::Failed => write!(f, "failed"),
        }
    }
}

/// Pointer from an input property to an output attribute of another node
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Reference {
    pub node: String,
    pub attribute: String,
}

impl Reference {
    pub fn new(node: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            attribute: attribute.into(),
        }
    }

    /// Parse `node.attribute`. Returns `None` when malformed.
    pub fn parse(raw: &str) -> Option<Self> {
        let (node, attribute) = raw.trim().split_once('.')?;
        if !NODE_NAME.is_match(node) || !ATTRIBUTE_NAME.is_match(attribute) {
            return None;
        }
        Some(Self::new(node, attribute))
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.node, self.attribute)
    }
}

/// Piece of an interpolated string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Segment {
    Text(String),
    Ref(Reference),
}

/// Parse `"echo ECS_CLUSTER=${cluster.name}"` into text and reference segments
pub fn parse_interpolation(raw: &str) -> Option<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut rest = raw;

    while let Some(start) = rest.find("${") {
        if start > 0 {
            segments.push(Segment::Text(rest[..start].to_string()));
        }
        let after = &rest[start + 2..];
        let end = after.find('}')?;
        segments.push(Segment::Ref(Reference::parse(&after[..end])?));
        rest = &after[end + 1..];
    }

    if !rest.is_empty() {
        segments.push(Segment::Text(rest.to_string()));
    }
    Some(segments)
}

/// Value assigned to an input property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputValue {
    Literal(serde_json::Value),
    Reference(Reference),
    Secret(SecretHandle),
    List(Vec<InputValue>),
    Map(BTreeMap<String, InputValue>),
    Interpolation(Vec<Segment>),
}

impl InputValue {
    pub fn literal(value: impl Into<serde_json::Value>) -> Self {
        InputValue::Literal(value.into())
    }

    pub fn reference(node: impl Into<String>, attribute: impl Into<String>) -> Self {
        InputValue::Reference(Reference::new(node, attribute))
    }

    /// All references reachable from this value, including nested ones
    pub fn references(&self) -> Vec<&Reference> {
        let mut refs = Vec::new();
        self.collect_references(&mut refs);
        refs
    }

    fn collect_references<'a>(&'a self, refs: &mut Vec<&'a Reference>) {
        match self {
            InputValue::Reference(r) => refs.push(r),
            InputValue::List(items) => items.iter().for_each(|v| v.collect_references(refs)),
            InputValue::Map(entries) => entries.values().for_each(|v| v.collect_references(refs)),
            InputValue::Interpolation(segments) => {
                for segment in segments {
                    if let Segment::Ref(r) = segment {
                        refs.push(r);
                    }
                }
            }
            InputValue::Literal(_) | InputValue::Secret(_) => {}
        }
    }

    /// All secret handles reachable from this value
    pub fn secret_handles(&self) -> Vec<&SecretHandle> {
        match self {
            InputValue::Secret(handle) => vec![handle],
            InputValue::List(items) => items.iter().flat_map(|v| v.secret_handles()).collect(),
            InputValue::Map(entries) => entries.values().flat_map(|v| v.secret_handles()).collect(),
            _ => Vec::new(),
        }
    }

    /// Whether the value contains no references or secret handles
    pub fn is_static(&self) -> bool {
        match self {
            InputValue::Literal(_) => true,
            InputValue::List(items) => items.iter().all(InputValue::is_static),
            InputValue::Map(entries) => entries.values().all(InputValue::is_static),
            InputValue::Interpolation(segments) => {
                segments.iter().all(|s| matches!(s, Segment::Text(_)))
            }
            InputValue::Reference(_) | InputValue::Secret(_) => false,
        }
    }

    /// Literal string content, if this is a plain string literal
    pub fn as_str(&self) -> Option<&str> {
        match self {
            InputValue::Literal(serde_json::Value::String(s)) => Some(s),
            _ => None,
        }
    }
}

/// A desired cloud object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceNode {
    /// Logical name, unique within a stack
    pub name: String,

    /// Type tag, e.g. `aws:ec2/vpc`
    pub resource_type: String,

    #[serde(default)]
    pub kind: NodeKind,

    /// Input properties
    #[serde(default)]
    pub inputs: BTreeMap<String, InputValue>,

    /// Ordering-only dependencies
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Output attributes, populated after a successful apply
    #[serde(default)]
    pub outputs: BTreeMap<String, serde_json::Value>,

    #[serde(default)]
    pub state: LifecycleState,
}

impl ResourceNode {
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resource_type: resource_type.into(),
            kind: NodeKind::Managed,
            inputs: BTreeMap::new(),
            depends_on: Vec::new(),
            outputs: BTreeMap::new(),
            state: LifecycleState::Planned,
        }
    }

    pub fn data(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: NodeKind::Data,
            ..Self::new(resource_type, name)
        }
    }

    pub fn with_input(mut self, key: impl Into<String>, value: InputValue) -> Self {
        self.inputs.insert(key.into(), value);
        self
    }

    pub fn with_dependency(mut self, node: impl Into<String>) -> Self {
        self.depends_on.push(node.into());
        self
    }

    pub fn is_data(&self) -> bool {
        self.kind == NodeKind::Data
    }

    /// References across all inputs
    pub fn references(&self) -> Vec<&Reference> {
        self.inputs.values().flat_map(|v| v.references()).collect()
    }

    /// Names of every node this one must be applied after
    pub fn dependencies(&self) -> BTreeSet<String> {
        self.references()
            .into_iter()
            .map(|r| r.node.clone())
            .chain(self.depends_on.iter().cloned())
            .collect()
    }
}
