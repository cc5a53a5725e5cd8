//! Resource type catalog
//!
//! Each resource type declares its input properties (kind, required flag,
//! mutability) and the output attributes other nodes may reference.

use crate::model::NodeKind;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Expected shape of an input property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyKind {
    String,
    Integer,
    Bool,
    List,
    Map,
    Any,
    /// Map of secret handles; literals are rejected
    Secrets,
}

impl PropertyKind {
    /// Whether a literal JSON value fits this kind
    pub fn accepts_literal(&self, value: &serde_json::Value) -> bool {
        use serde_json::Value;
        match self {
            PropertyKind::String => value.is_string(),
            PropertyKind::Integer => value.is_i64() || value.is_u64(),
            PropertyKind::Bool => value.is_boolean(),
            PropertyKind::List => value.is_array(),
            PropertyKind::Map => value.is_object(),
            PropertyKind::Any => !matches!(value, Value::Null),
            PropertyKind::Secrets => false,
        }
    }
}

impl std::fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PropertyKind::String => "string",
            PropertyKind::Integer => "integer",
            PropertyKind::Bool => "bool",
            PropertyKind::List => "list",
            PropertyKind::Map => "map",
            PropertyKind::Any => "any",
            PropertyKind::Secrets => "secrets",
        };
        write!(f, "{name}")
    }
}

/// How a changed property is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mutability {
    /// Provider can change it in place
    Mutable,
    /// Changing it requires a new remote object
    ForceNew,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertySchema {
    pub kind: PropertyKind,
    pub required: bool,
    pub mutability: Mutability,
}

/// Schema of one resource type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSchema {
    pub resource_type: String,
    pub kind: NodeKind,
    pub properties: BTreeMap<String, PropertySchema>,
    pub outputs: BTreeSet<String>,

    /// Property holding the remote name; must carry the stack namespace
    pub name_property: Option<String>,

    /// The provider refuses a second object under the same name
    pub unique_name: bool,
}

impl ResourceSchema {
    pub fn managed(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            kind: NodeKind::Managed,
            properties: BTreeMap::new(),
            outputs: BTreeSet::new(),
            name_property: None,
            unique_name: false,
        }
    }

    pub fn data(resource_type: impl Into<String>) -> Self {
        Self {
            kind: NodeKind::Data,
            ..Self::managed(resource_type)
        }
    }

    pub fn required(mut self, name: &str, kind: PropertyKind, mutability: Mutability) -> Self {
        self.properties.insert(
            name.to_string(),
            PropertySchema {
                kind,
                required: true,
                mutability,
            },
        );
        self
    }

    pub fn optional(mut self, name: &str, kind: PropertyKind, mutability: Mutability) -> Self {
        self.properties.insert(
            name.to_string(),
            PropertySchema {
                kind,
                required: false,
                mutability,
            },
        );
        self
    }

    /// Mutable `tags` map
    pub fn tagged(self) -> Self {
        self.optional("tags", PropertyKind::Map, Mutability::Mutable)
    }

    pub fn outputs(mut self, outputs: &[&str]) -> Self {
        self.outputs.extend(outputs.iter().map(|o| o.to_string()));
        self
    }

    pub fn named_by(mut self, property: &str) -> Self {
        self.name_property = Some(property.to_string());
        self
    }

    /// Mark the remote name as unique, so a replacement that keeps it has to
    /// delete the old object before creating the new one
    pub fn unique(mut self) -> Self {
        self.unique_name = true;
        self
    }

    pub fn property(&self, name: &str) -> Option<&PropertySchema> {
        self.properties.get(name)
    }

    /// Unknown properties are treated as immutable
    pub fn mutability(&self, name: &str) -> Mutability {
        self.property(name)
            .map(|p| p.mutability)
            .unwrap_or(Mutability::ForceNew)
    }

    pub fn has_output(&self, attribute: &str) -> bool {
        self.outputs.contains(attribute)
    }
}

/// Registry of resource schemas, keyed by type tag
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    schemas: HashMap<String, ResourceSchema>,
}

impl Catalog {
    /// Empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, schema: ResourceSchema) {
        self.schemas.insert(schema.resource_type.clone(), schema);
    }

    pub fn with(mut self, schema: ResourceSchema) -> Self {
        self.register(schema);
        self
    }

    pub fn get(&self, resource_type: &str) -> Option<&ResourceSchema> {
        self.schemas.get(resource_type)
    }

    pub fn resource_types(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(|k| k.as_str())
    }

    /// Network, compute, identity and logging types of an ECS-on-EC2 deployment
    pub fn aws() -> Self {
        use Mutability::{ForceNew, Mutable};
        use PropertyKind::{Any, Bool, Integer, List, Map, Secrets, String};

        Self::new()
            .with(
                ResourceSchema::managed("aws:ec2/vpc")
                    .required("cidr-block", String, ForceNew)
                    .optional("enable-dns-support", Bool, Mutable)
                    .optional("enable-dns-hostnames", Bool, Mutable)
                    .optional("instance-tenancy", String, ForceNew)
                    .tagged()
                    .outputs(&["id", "arn"]),
            )
            .with(
                ResourceSchema::managed("aws:ec2/subnet")
                    .required("vpc-id", String, ForceNew)
                    .required("cidr-block", String, ForceNew)
                    .optional("availability-zone", String, ForceNew)
                    .optional("map-public-ip-on-launch", Bool, Mutable)
                    .tagged()
                    .outputs(&["id", "arn", "availability-zone"]),
            )
            .with(
                ResourceSchema::managed("aws:ec2/internetGateway")
                    .required("vpc-id", String, Mutable)
                    .tagged()
                    .outputs(&["id", "arn"]),
            )
            .with(
                ResourceSchema::managed("aws:ec2/routeTable")
                    .required("vpc-id", String, ForceNew)
                    .optional("routes", List, Mutable)
                    .tagged()
                    .outputs(&["id", "arn"]),
            )
            .with(
                ResourceSchema::managed("aws:ec2/routeTableAssociation")
                    .required("subnet-id", String, ForceNew)
                    .required("route-table-id", String, Mutable)
                    .outputs(&["id"]),
            )
            .with(
                ResourceSchema::managed("aws:ec2/securityGroup")
                    .required("vpc-id", String, ForceNew)
                    .optional("name", String, ForceNew)
                    .optional("description", String, ForceNew)
                    .optional("ingress", List, Mutable)
                    .optional("egress", List, Mutable)
                    .tagged()
                    .named_by("name")
                    .unique()
                    .outputs(&["id", "arn", "name"]),
            )
            .with(
                ResourceSchema::managed("aws:ec2/instance")
                    .required("ami", String, ForceNew)
                    .required("instance-type", String, Mutable)
                    .optional("subnet-id", String, ForceNew)
                    .optional("vpc-security-group-ids", List, Mutable)
                    .optional("associate-public-ip-address", Bool, ForceNew)
                    .optional("iam-instance-profile", String, Mutable)
                    .optional("key-name", String, ForceNew)
                    .optional("user-data", String, ForceNew)
                    .tagged()
                    .outputs(&["id", "arn", "public-ip", "private-ip"]),
            )
            .with(
                ResourceSchema::managed("aws:ecs/cluster")
                    .optional("name", String, ForceNew)
                    .optional("settings", List, Mutable)
                    .tagged()
                    .named_by("name")
                    .unique()
                    .outputs(&["id", "arn", "name"]),
            )
            .with(
                ResourceSchema::managed("aws:ecs/taskDefinition")
                    .required("family", String, ForceNew)
                    .optional("cpu", String, ForceNew)
                    .optional("memory", String, ForceNew)
                    .optional("network-mode", String, ForceNew)
                    .optional("requires-compatibilities", List, ForceNew)
                    .optional("execution-role-arn", String, ForceNew)
                    .optional("task-role-arn", String, ForceNew)
                    .optional("container", Map, ForceNew)
                    .optional("secrets", Secrets, ForceNew)
                    .tagged()
                    .named_by("family")
                    .outputs(&["arn", "family", "revision"]),
            )
            .with(
                ResourceSchema::managed("aws:ecs/service")
                    .optional("name", String, ForceNew)
                    .required("cluster", String, ForceNew)
                    .required("task-definition", String, Mutable)
                    .optional("desired-count", Integer, Mutable)
                    .optional("launch-type", String, ForceNew)
                    .optional("enable-ecs-managed-tags", Bool, Mutable)
                    .optional("network-configuration", Map, Mutable)
                    .tagged()
                    .named_by("name")
                    .unique()
                    .outputs(&["id", "arn", "name"]),
            )
            .with(
                ResourceSchema::managed("aws:iam/role")
                    .optional("name", String, ForceNew)
                    .required("assume-role-policy", Any, Mutable)
                    .optional("description", String, Mutable)
                    .tagged()
                    .named_by("name")
                    .unique()
                    .outputs(&["id", "arn", "name"]),
            )
            .with(
                ResourceSchema::managed("aws:iam/rolePolicy")
                    .optional("name", String, ForceNew)
                    .required("role", String, ForceNew)
                    .required("policy", Any, Mutable)
                    .named_by("name")
                    .unique()
                    .outputs(&["id", "name"]),
            )
            .with(
                ResourceSchema::managed("aws:iam/rolePolicyAttachment")
                    .required("role", String, ForceNew)
                    .required("policy-arn", String, ForceNew)
                    .outputs(&["id"]),
            )
            .with(
                ResourceSchema::managed("aws:iam/instanceProfile")
                    .optional("name", String, ForceNew)
                    .optional("role", String, Mutable)
                    .named_by("name")
                    .unique()
                    .outputs(&["id", "arn", "name"]),
            )
            .with(
                ResourceSchema::managed("aws:cloudwatch/logGroup")
                    .optional("name", String, ForceNew)
                    .optional("retention-in-days", Integer, Mutable)
                    .tagged()
                    .named_by("name")
                    .unique()
                    .outputs(&["id", "arn", "name"]),
            )
            .with(
                ResourceSchema::data("aws:ec2/ami")
                    .optional("most-recent", Bool, Mutable)
                    .optional("owners", List, Mutable)
                    .optional("name-filter", String, Mutable)
                    .outputs(&["id", "name"]),
            )
            .with(
                ResourceSchema::data("aws:sts/callerIdentity").outputs(&["account-id", "arn", "user-id"]),
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aws_catalog_types() {
        let catalog = Catalog::aws();
        for ty in [
            "aws:ec2/vpc",
            "aws:ec2/subnet",
            "aws:ec2/securityGroup",
            "aws:ecs/cluster",
            "aws:ecs/taskDefinition",
            "aws:ecs/service",
            "aws:iam/role",
            "aws:cloudwatch/logGroup",
        ] {
            assert!(catalog.get(ty).is_some(), "missing {ty}");
        }
        assert_eq!(
            catalog.get("aws:sts/callerIdentity").unwrap().kind,
            NodeKind::Data
        );
    }

    #[test]
    fn test_mutability_lookup() {
        let catalog = Catalog::aws();
        let vpc = catalog.get("aws:ec2/vpc").unwrap();
        assert_eq!(vpc.mutability("cidr-block"), Mutability::ForceNew);
        assert_eq!(vpc.mutability("tags"), Mutability::Mutable);
        assert_eq!(vpc.mutability("unknown"), Mutability::ForceNew);
    }

    #[test]
    fn test_unique_names() {
        let catalog = Catalog::aws();
        for ty in ["aws:ec2/securityGroup", "aws:ecs/service", "aws:iam/role", "aws:cloudwatch/logGroup"] {
            assert!(catalog.get(ty).unwrap().unique_name, "{ty} names are unique");
        }
        // Task definitions register a new revision under the same family
        assert!(!catalog.get("aws:ecs/taskDefinition").unwrap().unique_name);
        assert!(!catalog.get("aws:ec2/vpc").unwrap().unique_name);
    }

    #[test]
    fn test_accepts_literal() {
        assert!(PropertyKind::String.accepts_literal(&serde_json::json!("x")));
        assert!(!PropertyKind::String.accepts_literal(&serde_json::json!(1)));
        assert!(PropertyKind::Integer.accepts_literal(&serde_json::json!(2)));
        assert!(!PropertyKind::Integer.accepts_literal(&serde_json::json!(2.5)));
        assert!(!PropertyKind::Secrets.accepts_literal(&serde_json::json!({"A": "b"})));
    }
}
