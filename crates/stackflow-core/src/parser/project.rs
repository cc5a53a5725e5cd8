//! Project file parsing (`stack.kdl`)

use super::value::kdl_value_to_json;
use crate::error::{FlowError, Result};
use crate::model::{
    EngineSettings, ImageRef, IngressRule, Project, RetrySettings, StackParameters,
    TimeoutSettings,
};
use kdl::{KdlDocument, KdlNode};
use std::collections::BTreeMap;
use std::path::PathBuf;

pub fn parse_project(content: &str, default_name: String) -> Result<Project> {
    let doc: KdlDocument = content.parse()?;
    let mut project = Project::new(default_name);

    for node in doc.nodes() {
        match node.name().value() {
            "project" => {
                project.name = first_string(node)
                    .ok_or_else(|| FlowError::InvalidConfig("project requires a name".to_string()))?;
            }
            "template" => {
                let path = first_string(node).ok_or_else(|| {
                    FlowError::InvalidConfig("template requires a path".to_string())
                })?;
                project.template = PathBuf::from(path);
            }
            "settings" => project.settings = parse_settings(node)?,
            "stack" => {
                let (name, parameters) = parse_stack(node)?;
                if project.stacks.insert(name.clone(), parameters).is_some() {
                    return Err(FlowError::InvalidConfig(format!(
                        "stack '{name}' is defined twice"
                    )));
                }
            }
            _ => {
                // Unknown nodes are ignored so newer files still load
            }
        }
    }

    Ok(project)
}

fn first_string(node: &KdlNode) -> Option<String> {
    node.entries()
        .first()
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn first_integer(node: &KdlNode) -> Option<i128> {
    node.entries().first().and_then(|e| e.value().as_integer())
}

fn all_strings(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect()
}

fn named_integer(node: &KdlNode, key: &str) -> Option<i128> {
    node.entries()
        .iter()
        .find(|e| e.name().is_some_and(|n| n.value() == key))
        .and_then(|e| e.value().as_integer())
}

fn named_string(node: &KdlNode, key: &str) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_some_and(|n| n.value() == key))
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn non_negative(value: i128, what: &str) -> Result<u64> {
    u64::try_from(value)
        .map_err(|_| FlowError::InvalidConfig(format!("{what} must be a non-negative integer")))
}

fn parse_settings(node: &KdlNode) -> Result<EngineSettings> {
    let mut settings = EngineSettings::default();
    let Some(children) = node.children() else {
        return Ok(settings);
    };

    for child in children.nodes() {
        match child.name().value() {
            "parallelism" => {
                let value = first_integer(child).ok_or_else(|| {
                    FlowError::InvalidConfig("parallelism requires an integer".to_string())
                })?;
                let value = non_negative(value, "parallelism")? as usize;
                if value == 0 {
                    return Err(FlowError::InvalidConfig(
                        "parallelism must be at least 1".to_string(),
                    ));
                }
                settings.parallelism = value;
            }
            "refresh" => {
                settings.refresh = child
                    .entries()
                    .first()
                    .and_then(|e| e.value().as_bool())
                    .unwrap_or(true);
            }
            "retry" => {
                let defaults = RetrySettings::default();
                settings.retry = RetrySettings {
                    max_attempts: match named_integer(child, "max-attempts") {
                        Some(v) => non_negative(v, "max-attempts")? as u32,
                        None => defaults.max_attempts,
                    },
                    initial_delay_ms: match named_integer(child, "initial-delay-ms") {
                        Some(v) => non_negative(v, "initial-delay-ms")?,
                        None => defaults.initial_delay_ms,
                    },
                    max_delay_ms: match named_integer(child, "max-delay-ms") {
                        Some(v) => non_negative(v, "max-delay-ms")?,
                        None => defaults.max_delay_ms,
                    },
                    backoff_multiplier: defaults.backoff_multiplier,
                };
            }
            "timeouts" => {
                let defaults = TimeoutSettings::default();
                let secs = |key: &str, default: u64| -> Result<u64> {
                    match named_integer(child, key) {
                        Some(v) => non_negative(v, key),
                        None => Ok(default),
                    }
                };
                settings.timeouts = TimeoutSettings {
                    create_secs: secs("create", defaults.create_secs)?,
                    update_secs: secs("update", defaults.update_secs)?,
                    delete_secs: secs("delete", defaults.delete_secs)?,
                    read_secs: secs("read", defaults.read_secs)?,
                };
            }
            _ => {}
        }
    }

    Ok(settings)
}

fn parse_stack(node: &KdlNode) -> Result<(String, StackParameters)> {
    let name = first_string(node)
        .ok_or_else(|| FlowError::InvalidConfig("stack requires a name".to_string()))?;

    let mut region = None;
    let mut parameters = StackParameters::new("");

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "project" => parameters.project = first_string(child),
                "region" => region = first_string(child),
                "account-id" => {
                    // Account ids are often written as bare numbers
                    parameters.account_id = first_string(child)
                        .or_else(|| first_integer(child).map(|i| format!("{i:012}")));
                }
                "vpc-cidr" => parameters.vpc_cidr = first_string(child),
                "public-subnet-cidrs" => parameters.public_subnet_cidrs = all_strings(child),
                "ingress" => parameters.ingress = parse_ingress(&name, child)?,
                "image" => {
                    let repository = named_string(child, "repository")
                        .or_else(|| first_string(child))
                        .ok_or_else(|| {
                            FlowError::InvalidConfig(format!(
                                "stack '{name}': image requires a repository"
                            ))
                        })?;
                    parameters.image = Some(ImageRef {
                        registry: named_string(child, "registry"),
                        repository,
                        tag: named_string(child, "tag").unwrap_or_else(|| "latest".to_string()),
                    });
                }
                "secret-prefix" => parameters.secret_prefix = first_string(child),
                "secrets" => parameters.secrets = all_strings(child),
                "desired-count" => {
                    let count = first_integer(child).ok_or_else(|| {
                        FlowError::InvalidConfig(format!(
                            "stack '{name}': desired-count requires an integer"
                        ))
                    })?;
                    parameters.desired_count = u32::try_from(count).map_err(|_| {
                        FlowError::InvalidConfig(format!(
                            "stack '{name}': desired-count out of range"
                        ))
                    })?;
                }
                "features" => parameters.features = all_strings(child),
                "tags" => parameters.tags = string_map(child),
                "variables" => parameters.variables = string_map(child),
                other => {
                    return Err(FlowError::InvalidConfig(format!(
                        "stack '{name}': unknown parameter '{other}'"
                    )));
                }
            }
        }
    }

    parameters.region = region.ok_or_else(|| {
        FlowError::InvalidConfig(format!("stack '{name}' requires a region"))
    })?;

    Ok((name, parameters))
}

fn parse_ingress(stack: &str, node: &KdlNode) -> Result<Vec<IngressRule>> {
    let mut rules = Vec::new();
    let Some(children) = node.children() else {
        return Ok(rules);
    };

    for rule in children.nodes() {
        let port = named_integer(rule, "port")
            .and_then(|p| u16::try_from(p).ok())
            .filter(|p| *p != 0)
            .ok_or_else(|| {
                FlowError::InvalidConfig(format!(
                    "stack '{stack}': ingress rule requires a port between 1 and 65535"
                ))
            })?;

        let mut sources = all_strings(rule);
        if let Some(source) = named_string(rule, "source") {
            sources.push(source);
        }
        if sources.is_empty() {
            return Err(FlowError::InvalidConfig(format!(
                "stack '{stack}': ingress rule for port {port} has no source"
            )));
        }

        rules.push(IngressRule {
            port,
            protocol: named_string(rule, "protocol").unwrap_or_else(|| "tcp".to_string()),
            sources,
        });
    }

    Ok(rules)
}

fn string_map(node: &KdlNode) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    if let Some(children) = node.children() {
        for child in children.nodes() {
            let value = match child.entries().first().map(|e| kdl_value_to_json(e.value())) {
                Some(serde_json::Value::String(s)) => s,
                Some(other) => other.to_string(),
                None => String::new(),
            };
            map.insert(child.name().value().to_string(), value);
        }
    }
    map
}
