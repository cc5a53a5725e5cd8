//! Plan and run report types

use serde::{Deserialize, Serialize};
use stackflow_core::LifecycleState;
use std::collections::BTreeMap;

/// Planned change for one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Logical node name
    pub node: String,

    /// Type of action to perform
    pub action_type: ActionType,

    /// Resource type (e.g., "aws:ec2/vpc")
    pub resource_type: String,

    /// Provider id of the existing object, if any
    pub id: Option<String>,

    /// Changed properties (Update) or properties forcing a new object (Replace)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<String>,

    /// Description of the action
    pub description: String,
}

impl Action {
    pub fn new(
        node: impl Into<String>,
        action_type: ActionType,
        resource_type: impl Into<String>,
    ) -> Self {
        let node = node.into();
        let resource_type = resource_type.into();
        let description = format!("{action_type} {resource_type} '{node}'");
        Self {
            node,
            action_type,
            resource_type,
            id: None,
            properties: Vec::new(),
            description,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_properties(mut self, properties: Vec<String>) -> Self {
        if !properties.is_empty() {
            self.description = format!("{} ({})", self.description, properties.join(", "));
        }
        self.properties = properties;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Type of action to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Create a new object
    Create,
    /// Change mutable properties in place
    Update,
    /// Create a new object, then delete the old one
    Replace,
    /// Delete an object
    Delete,
    /// Look up a data source
    Read,
    /// No changes needed
    NoOp,
}

impl ActionType {
    /// Whether the action changes remote objects
    pub fn is_change(&self) -> bool {
        !matches!(self, ActionType::NoOp | ActionType::Read)
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionType::Create => write!(f, "create"),
            ActionType::Update => write!(f, "update"),
            ActionType::Replace => write!(f, "replace"),
            ActionType::Delete => write!(f, "delete"),
            ActionType::Read => write!(f, "read"),
            ActionType::NoOp => write!(f, "no-op"),
        }
    }
}

/// Plan containing all actions for one stack
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// State key of the stack
    pub key: String,

    /// Forward actions in batch order, then deletions
    pub actions: Vec<Action>,

    /// Forward batches of node names
    pub batches: Vec<Vec<String>>,

    /// Deletion batches, dependents first
    pub deletions: Vec<Vec<String>>,

    /// Whether the plan has any changes
    pub has_changes: bool,
}

impl Plan {
    pub fn new(
        key: impl Into<String>,
        actions: Vec<Action>,
        batches: Vec<Vec<String>>,
        deletions: Vec<Vec<String>>,
    ) -> Self {
        let has_changes = actions.iter().any(|a| a.action_type.is_change());
        Self {
            key: key.into(),
            actions,
            batches,
            deletions,
            has_changes,
        }
    }

    /// Get actions by type
    pub fn actions_by_type(&self, action_type: ActionType) -> Vec<&Action> {
        self.actions
            .iter()
            .filter(|a| a.action_type == action_type)
            .collect()
    }

    pub fn action_for(&self, node: &str) -> Option<&Action> {
        self.actions.iter().find(|a| a.node == node)
    }

    /// Summary of the plan
    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            create: self.actions_by_type(ActionType::Create).len(),
            update: self.actions_by_type(ActionType::Update).len(),
            replace: self.actions_by_type(ActionType::Replace).len(),
            delete: self.actions_by_type(ActionType::Delete).len(),
            read: self.actions_by_type(ActionType::Read).len(),
            no_change: self.actions_by_type(ActionType::NoOp).len(),
        }
    }
}

/// Summary of planned actions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub replace: usize,
    pub delete: usize,
    pub read: usize,
    pub no_change: usize,
}

impl std::fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to replace, {} to delete, {} unchanged",
            self.create, self.update, self.replace, self.delete, self.no_change
        )
    }
}

/// How a node ended up after a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeOutcome {
    Succeeded,
    Failed,
    /// Not started because a sibling in its batch failed, or the run was cancelled
    Skipped,
    /// Not started because a dependency did not succeed
    Blocked,
}

impl std::fmt::Display for NodeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeOutcome::Succeeded => write!(f, "succeeded"),
            NodeOutcome::Failed => write!(f, "failed"),
            NodeOutcome::Skipped => write!(f, "skipped"),
            NodeOutcome::Blocked => write!(f, "blocked"),
        }
    }
}

/// Result of one node within a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeReport {
    pub node: String,
    pub action: ActionType,
    pub outcome: NodeOutcome,
    pub state: LifecycleState,

    /// Error message if failed, or the reason it did not run
    pub error: Option<String>,

    pub duration_ms: u64,
}

impl NodeReport {
    pub fn succeeded(node: impl Into<String>, action: ActionType, state: LifecycleState) -> Self {
        Self {
            node: node.into(),
            action,
            outcome: NodeOutcome::Succeeded,
            state,
            error: None,
            duration_ms: 0,
        }
    }

    pub fn failed(node: impl Into<String>, action: ActionType, error: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            action,
            outcome: NodeOutcome::Failed,
            state: LifecycleState::Failed,
            error: Some(error.into()),
            duration_ms: 0,
        }
    }

    pub fn skipped(node: impl Into<String>, action: ActionType, reason: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            action,
            outcome: NodeOutcome::Skipped,
            state: LifecycleState::Planned,
            error: Some(reason.into()),
            duration_ms: 0,
        }
    }

    pub fn blocked(node: impl Into<String>, action: ActionType, reason: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            action,
            outcome: NodeOutcome::Blocked,
            state: LifecycleState::Planned,
            error: Some(reason.into()),
            duration_ms: 0,
        }
    }

    pub fn with_duration(mut self, duration: std::time::Duration) -> Self {
        self.duration_ms = duration.as_millis() as u64;
        self
    }

    pub fn is_success(&self) -> bool {
        self.outcome == NodeOutcome::Succeeded
    }
}

/// Overall status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyStatus {
    Succeeded,
    Failed,
    Cancelled,
}

impl std::fmt::Display for ApplyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApplyStatus::Succeeded => write!(f, "succeeded"),
            ApplyStatus::Failed => write!(f, "failed"),
            ApplyStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Result of applying a stack
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyResult {
    /// State key of the stack
    pub key: String,

    pub status: ApplyStatus,

    /// Per-node reports in execution order
    pub nodes: Vec<NodeReport>,

    /// Stack outputs, set only when the run succeeded
    pub outputs: BTreeMap<String, serde_json::Value>,

    /// Total execution time in milliseconds
    pub duration_ms: u64,
}

impl ApplyResult {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            status: ApplyStatus::Succeeded,
            nodes: Vec::new(),
            outputs: BTreeMap::new(),
            duration_ms: 0,
        }
    }

    pub fn push(&mut self, report: NodeReport) {
        if !report.is_success() && self.status == ApplyStatus::Succeeded {
            self.status = ApplyStatus::Failed;
        }
        self.nodes.push(report);
    }

    pub fn is_success(&self) -> bool {
        self.status == ApplyStatus::Succeeded
    }

    pub fn report(&self, node: &str) -> Option<&NodeReport> {
        self.nodes.iter().rev().find(|r| r.node == node)
    }

    fn names_with(&self, outcome: NodeOutcome) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|r| r.outcome == outcome)
            .map(|r| r.node.as_str())
            .collect()
    }

    pub fn succeeded(&self) -> Vec<&str> {
        self.names_with(NodeOutcome::Succeeded)
    }

    pub fn failed(&self) -> Vec<&str> {
        self.names_with(NodeOutcome::Failed)
    }

    pub fn skipped(&self) -> Vec<&str> {
        self.names_with(NodeOutcome::Skipped)
    }

    pub fn blocked(&self) -> Vec<&str> {
        self.names_with(NodeOutcome::Blocked)
    }

    /// Successful nodes that performed `action`
    pub fn count(&self, action: ActionType) -> usize {
        self.nodes
            .iter()
            .filter(|r| r.is_success() && r.action == action)
            .count()
    }
}
