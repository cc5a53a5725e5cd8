//! Resource declaration and validation
//!
//! `StackBuilder` is the only way nodes enter a `StackInstance`. Every check
//! here runs in memory before any provider is contacted.

use crate::catalog::{Catalog, PropertyKind, ResourceSchema};
use crate::error::{FlowError, Result};
use crate::model::{
    InputValue, NodeKind, ResourceNode, StackInstance, StackParameters, is_valid_node_name,
};
use crate::secret;
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

pub struct StackBuilder<'c> {
    catalog: &'c Catalog,
    project: String,
    stack: String,
    parameters: StackParameters,
    nodes: Vec<ResourceNode>,
    names: HashSet<String>,
    outputs: BTreeMap<String, InputValue>,
}

impl<'c> StackBuilder<'c> {
    pub fn new(
        catalog: &'c Catalog,
        project: impl Into<String>,
        stack: impl Into<String>,
        parameters: StackParameters,
    ) -> Self {
        Self {
            catalog,
            project: project.into(),
            stack: stack.into(),
            parameters,
            nodes: Vec::new(),
            names: HashSet::new(),
            outputs: BTreeMap::new(),
        }
    }

    fn name_prefix(&self) -> String {
        format!("{}-{}", self.project, self.stack)
    }

    /// Declare a managed resource
    pub fn declare(
        &mut self,
        resource_type: &str,
        name: &str,
        inputs: BTreeMap<String, InputValue>,
    ) -> Result<&ResourceNode> {
        let mut node = ResourceNode::new(resource_type, name);
        node.inputs = inputs;
        self.declare_node(node)
    }

    /// Declare a fully formed node (managed or data)
    pub fn declare_node(&mut self, node: ResourceNode) -> Result<&ResourceNode> {
        if !is_valid_node_name(&node.name) {
            return Err(FlowError::validation(
                &node.name,
                "resource names must start with a letter or '_' and contain only letters, digits, '-' or '_'",
            ));
        }
        if self.names.contains(&node.name) {
            return Err(FlowError::validation(
                &node.name,
                "duplicate resource name in stack",
            ));
        }

        let schema = self
            .catalog
            .get(&node.resource_type)
            .ok_or_else(|| FlowError::UnknownResourceType(node.resource_type.clone()))?;

        if schema.kind != node.kind {
            let expected = match schema.kind {
                NodeKind::Managed => "resource",
                NodeKind::Data => "data",
            };
            return Err(FlowError::validation(
                &node.name,
                format!("'{}' must be declared as {}", node.resource_type, expected),
            ));
        }

        self.check_inputs(&node, schema)?;

        for dependency in &node.depends_on {
            if dependency == &node.name {
                return Err(FlowError::validation(&node.name, "a resource cannot depend on itself"));
            }
            if !is_valid_node_name(dependency) {
                return Err(FlowError::validation(
                    &node.name,
                    format!("malformed depends-on entry '{dependency}'"),
                ));
            }
        }

        debug!(node = %node.name, resource_type = %node.resource_type, "Declared resource");
        self.names.insert(node.name.clone());
        self.nodes.push(node);
        let last = self.nodes.len() - 1;
        Ok(&self.nodes[last])
    }

    /// Declare a stack output
    pub fn output(&mut self, name: &str, value: InputValue) -> Result<()> {
        if self.outputs.contains_key(name) {
            return Err(FlowError::validation(name, "duplicate output name"));
        }
        if !value.secret_handles().is_empty() {
            return Err(FlowError::validation(
                name,
                "outputs cannot expose secret handles",
            ));
        }
        self.outputs.insert(name.to_string(), value);
        Ok(())
    }

    fn check_inputs(&self, node: &ResourceNode, schema: &ResourceSchema) -> Result<()> {
        for (property, value) in &node.inputs {
            let Some(expected) = schema.property(property) else {
                return Err(FlowError::validation(
                    &node.name,
                    format!(
                        "unknown property '{}' for {}",
                        property, node.resource_type
                    ),
                ));
            };
            check_value(&node.name, property, expected.kind, value)?;

            for reference in value.references() {
                if !is_valid_node_name(&reference.node) || reference.attribute.is_empty() {
                    return Err(FlowError::validation(
                        &node.name,
                        format!("malformed reference '{reference}' in '{property}'"),
                    ));
                }
            }

            for handle in value.secret_handles() {
                secret::validate_handle(
                    &node.name,
                    handle,
                    self.parameters.secret_prefix.as_deref(),
                )?;
            }
        }

        for (property, spec) in &schema.properties {
            if spec.required && !node.inputs.contains_key(property) {
                return Err(FlowError::validation(
                    &node.name,
                    format!("missing required property '{property}'"),
                ));
            }
        }

        if let Some(name_property) = &schema.name_property
            && let Some(remote_name) = node.inputs.get(name_property).and_then(|v| v.as_str())
        {
            let prefix = self.name_prefix();
            // Path-style names such as log groups carry it in the last segment
            let leaf = remote_name.rsplit('/').next().unwrap_or(remote_name);
            if leaf != prefix && !leaf.starts_with(&format!("{prefix}-")) {
                return Err(FlowError::validation(
                    &node.name,
                    format!(
                        "remote name '{remote_name}' must carry the stack namespace '{prefix}'"
                    ),
                ));
            }
        }

        Ok(())
    }

    /// Cross-node checks, then the finished instance
    pub fn build(self) -> Result<StackInstance> {
        for node in &self.nodes {
            for reference in node.references() {
                self.check_reference_target(&node.name, &reference.node, &reference.attribute)?;
            }
            for dependency in &node.depends_on {
                if !self.names.contains(dependency) {
                    return Err(FlowError::validation(
                        &node.name,
                        format!("depends-on target '{dependency}' is not declared"),
                    ));
                }
            }
        }

        for (name, value) in &self.outputs {
            for reference in value.references() {
                self.check_reference_target(name, &reference.node, &reference.attribute)?;
            }
        }

        Ok(StackInstance {
            project: self.project,
            stack: self.stack,
            parameters: self.parameters,
            nodes: self.nodes,
            outputs: self.outputs,
        })
    }

    fn check_reference_target(&self, from: &str, target: &str, attribute: &str) -> Result<()> {
        let Some(target_node) = self.nodes.iter().find(|n| n.name == target) else {
            return Err(FlowError::validation(
                from,
                format!("reference to undeclared resource '{target}'"),
            ));
        };
        let declares_output = self
            .catalog
            .get(&target_node.resource_type)
            .is_some_and(|schema| schema.has_output(attribute));
        if !declares_output {
            return Err(FlowError::validation(
                from,
                format!(
                    "'{}' ({}) has no output '{}'",
                    target, target_node.resource_type, attribute
                ),
            ));
        }
        Ok(())
    }
}

fn check_value(node: &str, property: &str, kind: PropertyKind, value: &InputValue) -> Result<()> {
    if kind == PropertyKind::Secrets {
        return check_secrets(node, property, value);
    }

    if !value.secret_handles().is_empty() {
        return Err(FlowError::validation(
            node,
            format!("'{property}' does not accept secret handles"),
        ));
    }

    let accepted = match value {
        InputValue::Literal(literal) => kind.accepts_literal(literal),
        InputValue::Reference(_) => true,
        InputValue::Interpolation(_) => matches!(kind, PropertyKind::String | PropertyKind::Any),
        InputValue::List(_) => matches!(kind, PropertyKind::List | PropertyKind::Any),
        InputValue::Map(_) => matches!(kind, PropertyKind::Map | PropertyKind::Any),
        InputValue::Secret(_) => false,
    };

    if !accepted {
        return Err(FlowError::validation(
            node,
            format!("'{}' expects {}, got {}", property, kind, describe(value)),
        ));
    }
    Ok(())
}

/// Secret properties take a map of handles and nothing else
fn check_secrets(node: &str, property: &str, value: &InputValue) -> Result<()> {
    let leak = || FlowError::SecretLeak {
        node: node.to_string(),
        property: property.to_string(),
    };

    match value {
        InputValue::Map(entries) => {
            for entry in entries.values() {
                match entry {
                    InputValue::Secret(_) => {}
                    InputValue::Literal(_) | InputValue::Interpolation(_) => return Err(leak()),
                    other => {
                        return Err(FlowError::validation(
                            node,
                            format!("'{}' expects secret handles, got {}", property, describe(other)),
                        ));
                    }
                }
            }
            Ok(())
        }
        InputValue::Literal(_) | InputValue::Interpolation(_) => Err(leak()),
        other => Err(FlowError::validation(
            node,
            format!("'{}' expects a map of secret handles, got {}", property, describe(other)),
        )),
    }
}

fn describe(value: &InputValue) -> &'static str {
    match value {
        InputValue::Literal(serde_json::Value::String(_)) => "string",
        InputValue::Literal(serde_json::Value::Number(_)) => "number",
        InputValue::Literal(serde_json::Value::Bool(_)) => "bool",
        InputValue::Literal(serde_json::Value::Array(_)) => "list",
        InputValue::Literal(serde_json::Value::Object(_)) => "map",
        InputValue::Literal(serde_json::Value::Null) => "null",
        InputValue::Reference(_) => "reference",
        InputValue::Secret(_) => "secret handle",
        InputValue::List(_) => "list",
        InputValue::Map(_) => "map",
        InputValue::Interpolation(_) => "interpolated string",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SecretHandle;

    fn params() -> StackParameters {
        let mut params = StackParameters::new("ap-south-1");
        params.secret_prefix = Some("/doublee".to_string());
        params
    }

    fn inputs(pairs: &[(&str, InputValue)]) -> BTreeMap<String, InputValue> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_declare_and_build() {
        let catalog = Catalog::aws();
        let mut builder = StackBuilder::new(&catalog, "doublee", "prod", params());
        builder
            .declare(
                "aws:ec2/vpc",
                "vpc",
                inputs(&[("cidr-block", InputValue::literal("10.0.0.0/16"))]),
            )
            .unwrap();
        builder
            .declare(
                "aws:ec2/subnet",
                "subnet",
                inputs(&[
                    ("vpc-id", InputValue::reference("vpc", "id")),
                    ("cidr-block", InputValue::literal("10.0.1.0/24")),
                ]),
            )
            .unwrap();

        let instance = builder.build().unwrap();
        assert_eq!(instance.len(), 2);
        assert_eq!(instance.state_key(), "doublee-prod");
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let catalog = Catalog::aws();
        let mut builder = StackBuilder::new(&catalog, "doublee", "prod", params());
        let vpc = inputs(&[("cidr-block", InputValue::literal("10.0.0.0/16"))]);
        builder.declare("aws:ec2/vpc", "vpc", vpc.clone()).unwrap();
        let err = builder.declare("aws:ec2/vpc", "vpc", vpc).unwrap_err();
        assert!(matches!(err, FlowError::Validation { .. }));
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_wrong_typed_literal_rejected() {
        let catalog = Catalog::aws();
        let mut builder = StackBuilder::new(&catalog, "doublee", "prod", params());
        let err = builder
            .declare(
                "aws:ec2/vpc",
                "vpc",
                inputs(&[("cidr-block", InputValue::literal(16))]),
            )
            .unwrap_err();
        assert!(err.to_string().contains("expects string"));
    }

    #[test]
    fn test_missing_required_and_unknown_property() {
        let catalog = Catalog::aws();
        let mut builder = StackBuilder::new(&catalog, "doublee", "prod", params());
        let err = builder
            .declare("aws:ec2/vpc", "vpc", BTreeMap::new())
            .unwrap_err();
        assert!(err.to_string().contains("cidr-block"));

        let err = builder
            .declare(
                "aws:ec2/vpc",
                "vpc",
                inputs(&[
                    ("cidr-block", InputValue::literal("10.0.0.0/16")),
                    ("colour", InputValue::literal("blue")),
                ]),
            )
            .unwrap_err();
        assert!(err.to_string().contains("unknown property 'colour'"));
    }

    #[test]
    fn test_reference_to_unknown_output_rejected() {
        let catalog = Catalog::aws();
        let mut builder = StackBuilder::new(&catalog, "doublee", "prod", params());
        builder
            .declare(
                "aws:ec2/vpc",
                "vpc",
                inputs(&[("cidr-block", InputValue::literal("10.0.0.0/16"))]),
            )
            .unwrap();
        builder
            .declare(
                "aws:ec2/subnet",
                "subnet",
                inputs(&[
                    ("vpc-id", InputValue::reference("vpc", "colour")),
                    ("cidr-block", InputValue::literal("10.0.1.0/24")),
                ]),
            )
            .unwrap();
        let err = builder.build().unwrap_err();
        assert!(err.to_string().contains("no output 'colour'"));
    }

    #[test]
    fn test_malformed_reference_rejected() {
        let catalog = Catalog::aws();
        let mut builder = StackBuilder::new(&catalog, "doublee", "prod", params());
        let err = builder
            .declare(
                "aws:ec2/subnet",
                "subnet",
                inputs(&[
                    ("vpc-id", InputValue::reference("", "id")),
                    ("cidr-block", InputValue::literal("10.0.1.0/24")),
                ]),
            )
            .unwrap_err();
        assert!(err.to_string().contains("malformed reference"));
    }

    #[test]
    fn test_literal_secret_is_a_leak() {
        let catalog = Catalog::aws();
        let mut builder = StackBuilder::new(&catalog, "doublee", "prod", params());
        let secrets = InputValue::Map(BTreeMap::from([(
            "OPENAI_API_KEY".to_string(),
            InputValue::literal("sk-live-123"),
        )]));
        let err = builder
            .declare(
                "aws:ecs/taskDefinition",
                "taskDef",
                inputs(&[
                    ("family", InputValue::literal("doublee-prod")),
                    ("secrets", secrets),
                ]),
            )
            .unwrap_err();
        assert!(matches!(err, FlowError::SecretLeak { .. }));
        assert!(err.is_fatal());
        assert!(!err.to_string().contains("sk-live-123"));
    }

    #[test]
    fn test_secret_handle_accepted_in_scope() {
        let catalog = Catalog::aws();
        let mut builder = StackBuilder::new(&catalog, "doublee", "prod", params());
        let secrets = InputValue::Map(BTreeMap::from([(
            "OPENAI_API_KEY".to_string(),
            InputValue::Secret(SecretHandle::new("OPENAI_API_KEY", "/doublee/OPENAI_API_KEY")),
        )]));
        builder
            .declare(
                "aws:ecs/taskDefinition",
                "taskDef",
                inputs(&[
                    ("family", InputValue::literal("doublee-prod")),
                    ("secrets", secrets),
                ]),
            )
            .unwrap();
    }

    #[test]
    fn test_remote_name_must_carry_namespace() {
        let catalog = Catalog::aws();
        let mut builder = StackBuilder::new(&catalog, "doublee", "prod", params());
        let err = builder
            .declare(
                "aws:ecs/cluster",
                "cluster",
                inputs(&[("name", InputValue::literal("shared-cluster"))]),
            )
            .unwrap_err();
        assert!(err.to_string().contains("doublee-prod"));

        // Containing the namespace is not enough; it has to lead
        for outside in ["team-doublee-prod-cluster", "doublee-production-cluster"] {
            assert!(
                builder
                    .declare(
                        "aws:ecs/cluster",
                        "cluster",
                        inputs(&[("name", InputValue::literal(outside))]),
                    )
                    .is_err(),
                "{outside} is outside the namespace"
            );
        }

        builder
            .declare(
                "aws:ecs/cluster",
                "cluster",
                inputs(&[("name", InputValue::literal("doublee-prod-ecs-cluster"))]),
            )
            .unwrap();
        builder
            .declare(
                "aws:cloudwatch/logGroup",
                "logGroup",
                inputs(&[("name", InputValue::literal("/ecs/doublee-prod"))]),
            )
            .unwrap();
    }

    #[test]
    fn test_data_kind_must_match() {
        let catalog = Catalog::aws();
        let mut builder = StackBuilder::new(&catalog, "doublee", "prod", params());
        let err = builder
            .declare("aws:sts/callerIdentity", "caller", BTreeMap::new())
            .unwrap_err();
        assert!(err.to_string().contains("as data"));

        builder
            .declare_node(ResourceNode::data("aws:sts/callerIdentity", "caller"))
            .unwrap();
    }
}
