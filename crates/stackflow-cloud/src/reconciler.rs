//! Desired-vs-recorded classification

use crate::action::ActionType;
use crate::digest::InputDigest;
use crate::state::ResourceState;
use stackflow_core::{Mutability, NodeKind, ResourceNode, ResourceSchema};

/// What has to happen to converge one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Create,
    /// Mutable properties changed; update in place
    Update { changed: Vec<String> },
    /// A ForceNew property changed; a new object takes the place of the old one
    Replace { triggers: Vec<String> },
    Delete,
    /// Data source lookup
    Read,
    NoOp,
}

impl Decision {
    pub fn action_type(&self) -> ActionType {
        match self {
            Decision::Create => ActionType::Create,
            Decision::Update { .. } => ActionType::Update,
            Decision::Replace { .. } => ActionType::Replace,
            Decision::Delete => ActionType::Delete,
            Decision::Read => ActionType::Read,
            Decision::NoOp => ActionType::NoOp,
        }
    }

    /// Changed or triggering properties
    pub fn properties(&self) -> Vec<String> {
        match self {
            Decision::Update { changed } => changed.clone(),
            Decision::Replace { triggers } => triggers.clone(),
            _ => Vec::new(),
        }
    }

    /// Whether a new remote object will exist afterwards, so its outputs are not known yet
    pub fn creates_object(&self) -> bool {
        matches!(self, Decision::Create | Decision::Replace { .. })
    }

    /// A replacement that keeps a unique remote name cannot create the new
    /// object next to the old one. The old object goes first.
    pub fn deletes_first(&self, schema: Option<&ResourceSchema>) -> bool {
        let Decision::Replace { triggers } = self else {
            return false;
        };
        let Some(schema) = schema.filter(|schema| schema.unique_name) else {
            return false;
        };
        if triggers.iter().any(|t| t == "type") {
            return false;
        }
        schema
            .name_property
            .as_ref()
            .is_none_or(|property| !triggers.contains(property))
    }
}

/// A desired node with its schema and input digests
#[derive(Debug, Clone, Copy)]
pub struct Desired<'a> {
    pub node: &'a ResourceNode,
    pub schema: Option<&'a ResourceSchema>,
    pub digest: &'a InputDigest,
}

/// Classify a node against its recorded state
pub fn reconcile(desired: Option<Desired<'_>>, prior: Option<&ResourceState>) -> Decision {
    let (desired, prior) = match (desired, prior) {
        (None, None) => return Decision::NoOp,
        (None, Some(_)) => return Decision::Delete,
        (Some(desired), _) if desired.node.is_data() => return Decision::Read,
        (Some(_), None) => return Decision::Create,
        (Some(desired), Some(prior)) => (desired, prior),
    };

    // A data entry under the same name never owned a remote object
    if prior.kind == NodeKind::Data {
        return Decision::Create;
    }
    if prior.resource_type != desired.node.resource_type {
        return Decision::Replace {
            triggers: vec!["type".to_string()],
        };
    }

    if desired.digest.hash().as_deref() == Some(prior.input_hash.as_str()) {
        return Decision::NoOp;
    }

    let changed = desired.digest.changed_from(&prior.properties);
    if changed.is_empty() {
        return Decision::NoOp;
    }

    let triggers: Vec<String> = changed
        .iter()
        .filter(|property| {
            desired
                .schema
                .map(|schema| schema.mutability(property))
                .unwrap_or(Mutability::ForceNew)
                == Mutability::ForceNew
        })
        .cloned()
        .collect();

    if triggers.is_empty() {
        Decision::Update { changed }
    } else {
        Decision::Replace { triggers }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::PropertyDigest;
    use serde_json::json;
    use stackflow_core::{Catalog, InputValue};
    use std::collections::BTreeMap;

    fn digest(pairs: &[(&str, serde_json::Value)]) -> InputDigest {
        InputDigest::of(
            &pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    }

    fn recorded(resource_type: &str, digest: &InputDigest) -> ResourceState {
        let mut state = ResourceState::new("id-1", resource_type);
        state.properties = digest.known_properties();
        state.input_hash = digest.hash().unwrap();
        state
    }

    #[test]
    fn test_create_delete_noop() {
        let catalog = Catalog::aws();
        let node = ResourceNode::new("aws:ec2/vpc", "vpc")
            .with_input("cidr-block", InputValue::literal("10.0.0.0/16"));
        let d = digest(&[("cidr-block", json!("10.0.0.0/16"))]);
        let desired = Desired {
            node: &node,
            schema: catalog.get("aws:ec2/vpc"),
            digest: &d,
        };
        let prior = recorded("aws:ec2/vpc", &d);

        assert_eq!(reconcile(Some(desired), None), Decision::Create);
        assert_eq!(reconcile(None, Some(&prior)), Decision::Delete);
        assert_eq!(reconcile(Some(desired), Some(&prior)), Decision::NoOp);
        assert_eq!(reconcile(None, None), Decision::NoOp);
    }

    #[test]
    fn test_mutable_change_updates() {
        let catalog = Catalog::aws();
        let node = ResourceNode::new("aws:ecs/service", "appService");
        let before = digest(&[("desired-count", json!(1)), ("cluster", json!("arn:c"))]);
        let after = digest(&[("desired-count", json!(2)), ("cluster", json!("arn:c"))]);
        let desired = Desired {
            node: &node,
            schema: catalog.get("aws:ecs/service"),
            digest: &after,
        };

        assert_eq!(
            reconcile(Some(desired), Some(&recorded("aws:ecs/service", &before))),
            Decision::Update {
                changed: vec!["desired-count".to_string()]
            }
        );
    }

    #[test]
    fn test_force_new_change_replaces() {
        let catalog = Catalog::aws();
        let node = ResourceNode::new("aws:ecs/taskDefinition", "taskDefinition");
        let before = digest(&[("family", json!("a")), ("tags", json!({}))]);
        let after = digest(&[("family", json!("b")), ("tags", json!({"x": "y"}))]);
        let desired = Desired {
            node: &node,
            schema: catalog.get("aws:ecs/taskDefinition"),
            digest: &after,
        };

        assert_eq!(
            reconcile(Some(desired), Some(&recorded("aws:ecs/taskDefinition", &before))),
            Decision::Replace {
                triggers: vec!["family".to_string()]
            }
        );
    }

    #[test]
    fn test_unknown_value_counts_as_change() {
        let catalog = Catalog::aws();
        let node = ResourceNode::new("aws:ec2/subnet", "pubSub1");
        let before = digest(&[("vpc-id", json!("vpc-1"))]);
        let after = InputDigest {
            properties: BTreeMap::from([("vpc-id".to_string(), PropertyDigest::Unknown)]),
        };
        let desired = Desired {
            node: &node,
            schema: catalog.get("aws:ec2/subnet"),
            digest: &after,
        };

        assert_eq!(
            reconcile(Some(desired), Some(&recorded("aws:ec2/subnet", &before))),
            Decision::Replace {
                triggers: vec!["vpc-id".to_string()]
            }
        );
    }

    #[test]
    fn test_type_change_and_data_nodes() {
        let catalog = Catalog::aws();
        let d = digest(&[]);
        let ami = ResourceNode::data("aws:ec2/ami", "ami");
        let desired = Desired {
            node: &ami,
            schema: catalog.get("aws:ec2/ami"),
            digest: &d,
        };
        assert_eq!(reconcile(Some(desired), None), Decision::Read);

        let node = ResourceNode::new("aws:ec2/vpc", "vpc");
        let desired = Desired {
            node: &node,
            schema: catalog.get("aws:ec2/vpc"),
            digest: &d,
        };
        assert!(matches!(
            reconcile(Some(desired), Some(&recorded("aws:ec2/subnet", &d))),
            Decision::Replace { .. }
        ));
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let catalog = Catalog::aws();
        let node = ResourceNode::new("aws:ec2/subnet", "pubSub1");
        let d = digest(&[
            ("vpc-id", json!("vpc-1")),
            ("cidr-block", json!("10.0.1.0/24")),
            ("tags", json!({"Name": "doublee-prod-pubSub1"})),
        ]);
        let desired = Desired {
            node: &node,
            schema: catalog.get("aws:ec2/subnet"),
            digest: &d,
        };
        let prior = recorded("aws:ec2/subnet", &d);
        for _ in 0..3 {
            assert_eq!(reconcile(Some(desired), Some(&prior)), Decision::NoOp);
        }
    }

    #[test]
    fn test_unique_name_replacement_deletes_first() {
        let catalog = Catalog::aws();
        let schema = catalog.get("aws:ec2/securityGroup");

        let description = Decision::Replace {
            triggers: vec!["description".to_string()],
        };
        assert!(description.deletes_first(schema));

        // A new name can live next to the old one
        let renamed = Decision::Replace {
            triggers: vec!["description".to_string(), "name".to_string()],
        };
        assert!(!renamed.deletes_first(schema));

        let vpc = Decision::Replace {
            triggers: vec!["cidr-block".to_string()],
        };
        assert!(!vpc.deletes_first(catalog.get("aws:ec2/vpc")));
        let update = Decision::Update {
            changed: vec!["ingress".to_string()],
        };
        assert!(!update.deletes_first(schema));
    }
}
