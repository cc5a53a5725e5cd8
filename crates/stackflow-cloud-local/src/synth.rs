//! Identifiers and output attributes of simulated objects
//!
//! Ids follow the shapes of the real service (`vpc-0123...`, ARNs for ECS
//! objects, names for IAM) so templates behave the same against either.

use crate::account::AccountDocument;
use crate::error::{LocalError, Result};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Inputs that must point at an existing object
const REFERENCE_INPUTS: [&str; 6] = [
    "vpc-id",
    "subnet-id",
    "route-table-id",
    "cluster",
    "task-definition",
    "role",
];

/// Where the simulated account lives
#[derive(Debug, Clone)]
pub struct Region<'a> {
    pub region: &'a str,
    pub account_id: &'a str,
}

/// A generated object identity
#[derive(Debug, Clone, PartialEq)]
pub struct Synthesized {
    pub id: String,
    pub outputs: BTreeMap<String, Value>,
}

fn hash_hex(seed: &str) -> String {
    hex::encode(Sha256::digest(seed.as_bytes()))
}

/// `prefix-` followed by 17 hex digits, like EC2 ids
fn ec2_id(prefix: &str, seed: &str) -> String {
    format!("{}-{}", prefix, &hash_hex(seed)[..17])
}

fn octets(seed: &str) -> [u8; 3] {
    let digest = Sha256::digest(seed.as_bytes());
    [digest[0], digest[1], digest[2].max(1)]
}

fn input_str<'i>(inputs: &'i BTreeMap<String, Value>, key: &str) -> Option<&'i str> {
    inputs.get(key).and_then(|v| v.as_str())
}

/// Every reference-style input must name an existing object
pub fn check_references(doc: &AccountDocument, inputs: &BTreeMap<String, Value>) -> Result<()> {
    for property in REFERENCE_INPUTS {
        if let Some(value) = input_str(inputs, property)
            && doc.find_by_handle(value).is_none()
        {
            return Err(LocalError::InvalidReference {
                property: property.to_string(),
                value: value.to_string(),
            });
        }
    }
    Ok(())
}

/// Build id and outputs for a new object, reserving sequence numbers and revisions
pub fn synthesize(
    region: &Region<'_>,
    doc: &mut AccountDocument,
    resource_type: &str,
    physical_name: &str,
    inputs: &BTreeMap<String, Value>,
) -> Result<Synthesized> {
    doc.sequence += 1;
    let seed = format!("{}/{}/{}/{}", region.account_id, resource_type, physical_name, doc.sequence);
    let name = input_str(inputs, "name").unwrap_or(physical_name).to_string();
    let (r, a) = (region.region, region.account_id);

    let ec2 = |prefix: &str, kind: &str| {
        let id = ec2_id(prefix, &seed);
        let arn = format!("arn:aws:ec2:{r}:{a}:{kind}/{id}");
        (id, arn)
    };

    let synthesized = match resource_type {
        "aws:ec2/vpc" => {
            let (id, arn) = ec2("vpc", "vpc");
            Synthesized {
                outputs: outputs([("id", json!(id)), ("arn", json!(arn))]),
                id,
            }
        }
        "aws:ec2/subnet" => {
            let (id, arn) = ec2("subnet", "subnet");
            let zone = input_str(inputs, "availability-zone")
                .map(str::to_string)
                .unwrap_or_else(|| format!("{r}a"));
            Synthesized {
                outputs: outputs([
                    ("id", json!(id)),
                    ("arn", json!(arn)),
                    ("availability-zone", json!(zone)),
                ]),
                id,
            }
        }
        "aws:ec2/internetGateway" => {
            let (id, arn) = ec2("igw", "internet-gateway");
            Synthesized {
                outputs: outputs([("id", json!(id)), ("arn", json!(arn))]),
                id,
            }
        }
        "aws:ec2/routeTable" => {
            let (id, arn) = ec2("rtb", "route-table");
            Synthesized {
                outputs: outputs([("id", json!(id)), ("arn", json!(arn))]),
                id,
            }
        }
        "aws:ec2/routeTableAssociation" => {
            let id = ec2_id("rtbassoc", &seed);
            Synthesized {
                outputs: outputs([("id", json!(id))]),
                id,
            }
        }
        "aws:ec2/securityGroup" => {
            let vpc = input_str(inputs, "vpc-id").unwrap_or_default();
            // Group names are unique per network
            let taken = doc.objects.values().find(|o| {
                o.resource_type == resource_type
                    && input_str(&o.inputs, "vpc-id") == Some(vpc)
                    && o.outputs.get("name").and_then(|v| v.as_str()) == Some(name.as_str())
            });
            if let Some(existing) = taken {
                return Err(LocalError::AlreadyExists {
                    resource_type: resource_type.to_string(),
                    id: existing.id.clone(),
                    name,
                });
            }
            let (id, arn) = ec2("sg", "security-group");
            Synthesized {
                outputs: outputs([("id", json!(id)), ("arn", json!(arn)), ("name", json!(name))]),
                id,
            }
        }
        "aws:ec2/instance" => {
            let (id, arn) = ec2("i", "instance");
            let [x, y, z] = octets(&seed);
            let public = inputs
                .get("associate-public-ip-address")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            let public_ip = if public {
                json!(format!("13.{x}.{y}.{z}"))
            } else {
                Value::Null
            };
            Synthesized {
                outputs: outputs([
                    ("id", json!(id)),
                    ("arn", json!(arn)),
                    ("public-ip", public_ip),
                    ("private-ip", json!(format!("10.0.{y}.{z}"))),
                ]),
                id,
            }
        }
        "aws:ecs/cluster" => {
            let arn = format!("arn:aws:ecs:{r}:{a}:cluster/{name}");
            unique(doc, resource_type, &name, &arn)?;
            Synthesized {
                outputs: outputs([("id", json!(arn)), ("arn", json!(arn)), ("name", json!(name))]),
                id: arn,
            }
        }
        "aws:ecs/taskDefinition" => {
            let family = input_str(inputs, "family")
                .ok_or_else(|| LocalError::MissingInput("family".to_string()))?
                .to_string();
            let revision = doc.revisions.get(&family).copied().unwrap_or(0) + 1;
            doc.revisions.insert(family.clone(), revision);
            let arn = format!("arn:aws:ecs:{r}:{a}:task-definition/{family}:{revision}");
            Synthesized {
                outputs: outputs([
                    ("id", json!(arn)),
                    ("arn", json!(arn)),
                    ("family", json!(family)),
                    ("revision", json!(revision)),
                ]),
                id: arn,
            }
        }
        "aws:ecs/service" => {
            let cluster = input_str(inputs, "cluster")
                .ok_or_else(|| LocalError::MissingInput("cluster".to_string()))?;
            let cluster_name = cluster.rsplit('/').next().unwrap_or(cluster);
            let arn = format!("arn:aws:ecs:{r}:{a}:service/{cluster_name}/{name}");
            unique(doc, resource_type, &name, &arn)?;
            Synthesized {
                outputs: outputs([("id", json!(arn)), ("arn", json!(arn)), ("name", json!(name))]),
                id: arn,
            }
        }
        "aws:iam/role" => {
            unique(doc, resource_type, &name, &name)?;
            Synthesized {
                outputs: outputs([
                    ("id", json!(name)),
                    ("arn", json!(format!("arn:aws:iam::{a}:role/{name}"))),
                    ("name", json!(name)),
                ]),
                id: name,
            }
        }
        "aws:iam/rolePolicy" => {
            let role = input_str(inputs, "role")
                .ok_or_else(|| LocalError::MissingInput("role".to_string()))?;
            let id = format!("{role}:{name}");
            unique(doc, resource_type, &name, &id)?;
            Synthesized {
                outputs: outputs([("id", json!(id)), ("name", json!(name))]),
                id,
            }
        }
        "aws:iam/rolePolicyAttachment" => {
            let role = input_str(inputs, "role")
                .ok_or_else(|| LocalError::MissingInput("role".to_string()))?;
            let id = format!("{}-{}", role, &hash_hex(&seed)[..8]);
            Synthesized {
                outputs: outputs([("id", json!(id))]),
                id,
            }
        }
        "aws:iam/instanceProfile" => {
            unique(doc, resource_type, &name, &name)?;
            Synthesized {
                outputs: outputs([
                    ("id", json!(name)),
                    ("arn", json!(format!("arn:aws:iam::{a}:instance-profile/{name}"))),
                    ("name", json!(name)),
                ]),
                id: name,
            }
        }
        "aws:cloudwatch/logGroup" => {
            unique(doc, resource_type, &name, &name)?;
            Synthesized {
                outputs: outputs([
                    ("id", json!(name)),
                    ("arn", json!(format!("arn:aws:logs:{r}:{a}:log-group:{name}"))),
                    ("name", json!(name)),
                ]),
                id: name,
            }
        }
        other => return Err(LocalError::UnsupportedType(other.to_string())),
    };
    Ok(synthesized)
}

/// Data source results; nothing is stored
pub fn lookup(
    region: &Region<'_>,
    resource_type: &str,
    inputs: &BTreeMap<String, Value>,
) -> Result<Synthesized> {
    let a = region.account_id;
    match resource_type {
        "aws:ec2/ami" => {
            let filter = input_str(inputs, "name-filter").unwrap_or("al2023-ami-ecs-hvm-*");
            let id = ec2_id("ami", &format!("{}/{}", region.region, filter));
            let name = filter.replace('*', "2026.10.0-kernel-6.1-x86_64");
            Ok(Synthesized {
                outputs: outputs([("id", json!(id)), ("name", json!(name))]),
                id,
            })
        }
        "aws:sts/callerIdentity" => {
            let user_id = format!("AIDA{}", hash_hex(a)[..16].to_uppercase());
            Ok(Synthesized {
                outputs: outputs([
                    ("id", json!(a)),
                    ("account-id", json!(a)),
                    ("arn", json!(format!("arn:aws:iam::{a}:user/stackflow"))),
                    ("user-id", json!(user_id)),
                ]),
                id: a.to_string(),
            })
        }
        other => Err(LocalError::UnsupportedType(other.to_string())),
    }
}

fn unique(doc: &AccountDocument, resource_type: &str, name: &str, id: &str) -> Result<()> {
    if doc.objects.contains_key(id) {
        return Err(LocalError::AlreadyExists {
            resource_type: resource_type.to_string(),
            name: name.to_string(),
            id: id.to_string(),
        });
    }
    Ok(())
}

fn outputs<const N: usize>(pairs: [(&str, Value); N]) -> BTreeMap<String, Value> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}
