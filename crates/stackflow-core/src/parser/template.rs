//! Resource template parsing
//!
//! Runs on the rendered template (after Tera) and yields resource nodes and
//! stack outputs in declaration order.

use super::value::{parse_entry, parse_property};
use crate::catalog::{Catalog, PropertyKind};
use crate::error::{FlowError, Result};
use crate::model::{InputValue, NodeKind, ResourceNode};
use kdl::{KdlDocument, KdlNode};

/// Parsed template: nodes and outputs in declaration order
#[derive(Debug, Clone, Default)]
pub struct TemplateDocument {
    pub nodes: Vec<ResourceNode>,
    pub outputs: Vec<(String, InputValue)>,
}

pub fn parse_template(content: &str, catalog: &Catalog) -> Result<TemplateDocument> {
    let doc: KdlDocument = content.parse()?;
    let mut template = TemplateDocument::default();

    for node in doc.nodes() {
        match node.name().value() {
            "resource" => template
                .nodes
                .push(parse_resource(node, NodeKind::Managed, catalog)?),
            "data" => template
                .nodes
                .push(parse_resource(node, NodeKind::Data, catalog)?),
            "output" => template.outputs.push(parse_output(node)?),
            other => {
                return Err(FlowError::InvalidConfig(format!(
                    "unexpected top-level node '{other}' in template (expected resource, data or output)"
                )));
            }
        }
    }

    Ok(template)
}

fn positional_string<'a>(node: &'a KdlNode, index: usize, what: &str) -> Result<&'a str> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .nth(index)
        .and_then(|e| e.value().as_string())
        .ok_or_else(|| {
            FlowError::InvalidConfig(format!("{} requires a {}", node.name().value(), what))
        })
}

fn parse_resource(node: &KdlNode, kind: NodeKind, catalog: &Catalog) -> Result<ResourceNode> {
    let resource_type = positional_string(node, 0, "type")?;
    let name = positional_string(node, 1, "name")?;

    let mut resource = match kind {
        NodeKind::Managed => ResourceNode::new(resource_type, name),
        NodeKind::Data => ResourceNode::data(resource_type, name),
    };
    let schema = catalog.get(resource_type);

    if let Some(children) = node.children() {
        for child in children.nodes() {
            let key = child.name().value();
            if key == "depends-on" {
                for entry in child.entries() {
                    let target = entry.value().as_string().ok_or_else(|| {
                        FlowError::validation(name, "depends-on takes resource names")
                    })?;
                    resource.depends_on.push(target.to_string());
                }
                continue;
            }

            let mut value = parse_property(name, child)?;

            // A single value given to a list property is a one-element list
            let wants_list = schema
                .and_then(|s| s.property(key))
                .is_some_and(|p| p.kind == PropertyKind::List);
            if wants_list {
                value = match value {
                    InputValue::Map(map) if map.is_empty() => InputValue::List(Vec::new()),
                    list @ InputValue::List(_) => list,
                    other => InputValue::List(vec![other]),
                };
            }

            if resource.inputs.insert(key.to_string(), value).is_some() {
                return Err(FlowError::validation(
                    name,
                    format!("property '{key}' is set twice"),
                ));
            }
        }
    }

    Ok(resource)
}

fn parse_output(node: &KdlNode) -> Result<(String, InputValue)> {
    let name = positional_string(node, 0, "name")?;
    let entry = node
        .entries()
        .iter()
        .filter(|e| e.name().is_none())
        .nth(1)
        .ok_or_else(|| FlowError::validation(name, "output requires a value"))?;
    Ok((name.to_string(), parse_entry(name, name, entry)?))
}
