//! Stack parameters and instantiated stacks

use super::resource::{InputValue, ResourceNode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ingress rule applied to the stack's security group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressRule {
    pub port: u16,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    pub sources: Vec<String>,
}

fn default_protocol() -> String {
    "tcp".to_string()
}

impl IngressRule {
    pub fn tcp(port: u16, source: impl Into<String>) -> Self {
        Self {
            port,
            protocol: default_protocol(),
            sources: vec![source.into()],
        }
    }
}

/// Container image coordinates
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ImageRef {
    /// Registry host. Defaults to the account's ECR registry when omitted.
    #[serde(default)]
    pub registry: Option<String>,
    pub repository: String,
    #[serde(default = "default_tag")]
    pub tag: String,
}

fn default_tag() -> String {
    "latest".to_string()
}

impl ImageRef {
    /// Full image URI for the given region/account
    pub fn uri(&self, region: &str, account_id: Option<&str>) -> String {
        let registry = match (&self.registry, account_id) {
            (Some(registry), _) => Some(registry.clone()),
            (None, Some(account)) => Some(format!("{account}.dkr.ecr.{region}.amazonaws.com")),
            (None, None) => None,
        };
        match registry {
            Some(registry) => format!("{}/{}:{}", registry, self.repository, self.tag),
            None => format!("{}:{}", self.repository, self.tag),
        }
    }
}

/// Parameter set of one named deployment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackParameters {
    /// Overrides the project name for this stack only
    #[serde(default)]
    pub project: Option<String>,

    pub region: String,

    #[serde(default)]
    pub account_id: Option<String>,

    #[serde(default)]
    pub vpc_cidr: Option<String>,

    #[serde(default)]
    pub public_subnet_cidrs: Vec<String>,

    #[serde(default)]
    pub ingress: Vec<IngressRule>,

    #[serde(default)]
    pub image: Option<ImageRef>,

    /// Secret-store namespace this stack may read, e.g. `/doublee`
    #[serde(default)]
    pub secret_prefix: Option<String>,

    /// Secret names under the prefix injected into the service
    #[serde(default)]
    pub secrets: Vec<String>,

    #[serde(default = "default_desired_count")]
    pub desired_count: u32,

    /// Optional template blocks switched on for this stack
    #[serde(default)]
    pub features: Vec<String>,

    #[serde(default)]
    pub tags: BTreeMap<String, String>,

    /// Free-form template variables
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

fn default_desired_count() -> u32 {
    1
}

impl StackParameters {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            project: None,
            region: region.into(),
            account_id: None,
            vpc_cidr: None,
            public_subnet_cidrs: Vec::new(),
            ingress: Vec::new(),
            image: None,
            secret_prefix: None,
            secrets: Vec::new(),
            desired_count: default_desired_count(),
            features: Vec::new(),
            tags: BTreeMap::new(),
            variables: BTreeMap::new(),
        }
    }

    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.iter().any(|f| f == feature)
    }
}

/// A concrete resource graph produced from a template and one parameter set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackInstance {
    pub project: String,
    pub stack: String,
    pub parameters: StackParameters,

    /// Nodes in declaration order
    pub nodes: Vec<ResourceNode>,

    /// Values exposed after a successful run
    #[serde(default)]
    pub outputs: BTreeMap<String, InputValue>,
}

impl StackInstance {
    /// Namespace shared by every remote name in this stack: `{project}-{stack}`
    pub fn name_prefix(&self) -> String {
        format!("{}-{}", self.project, self.stack)
    }

    /// Key under which the stack's state is persisted
    pub fn state_key(&self) -> String {
        self.name_prefix()
    }

    /// Physical name used for a node when the template does not set one
    pub fn physical_name(&self, node: &str) -> String {
        format!("{}-{}", self.name_prefix(), node)
    }

    pub fn node(&self, name: &str) -> Option<&ResourceNode> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn node_names(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|n| n.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns a copy with one node removed, used when a template drops a resource
    pub fn without(&self, name: &str) -> Self {
        let mut copy = self.clone();
        copy.nodes.retain(|n| n.name != name);
        copy.outputs
            .retain(|_, value| value.references().iter().all(|r| r.node != name));
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_uri() {
        let image = ImageRef {
            registry: None,
            repository: "doublee".to_string(),
            tag: "0.02".to_string(),
        };
        assert_eq!(
            image.uri("ap-south-1", Some("865742897250")),
            "865742897250.dkr.ecr.ap-south-1.amazonaws.com/doublee:0.02"
        );
        assert_eq!(image.uri("ap-south-1", None), "doublee:0.02");

        let custom = ImageRef {
            registry: Some("ghcr.io/owner".to_string()),
            ..image
        };
        assert_eq!(custom.uri("ap-south-1", None), "ghcr.io/owner/doublee:0.02");
    }

    #[test]
    fn test_instance_naming() {
        let instance = StackInstance {
            project: "doublee".to_string(),
            stack: "prod".to_string(),
            parameters: StackParameters::new("ap-south-1"),
            nodes: vec![ResourceNode::new("aws:ec2/vpc", "vpc")],
            outputs: BTreeMap::new(),
        };
        assert_eq!(instance.name_prefix(), "doublee-prod");
        assert_eq!(instance.state_key(), "doublee-prod");
        assert_eq!(instance.physical_name("vpc"), "doublee-prod-vpc");
        assert!(instance.node("vpc").is_some());
        assert!(instance.without("vpc").is_empty());
    }
}
