//! Property value parsing
//!
//! Maps a KDL property node onto an `InputValue`:
//! one argument is a scalar, several arguments a list, named entries or
//! children a map, and children all named `-` a list of items.
//! Type annotations mark references `(ref)`, secret handles `(secret)` and
//! interpolated strings `(interp)`.

use crate::error::{FlowError, Result};
use crate::model::{InputValue, Reference, SecretHandle, parse_interpolation};
use kdl::{KdlEntry, KdlNode, KdlValue};
use std::collections::BTreeMap;

/// Name of list item nodes
pub const LIST_ITEM: &str = "-";

/// Convert a property node into its value. `owner` names the enclosing resource for errors.
pub fn parse_property(owner: &str, node: &KdlNode) -> Result<InputValue> {
    let key = node.name().value();
    let arguments: Vec<&KdlEntry> = node.entries().iter().filter(|e| e.name().is_none()).collect();
    let named: Vec<&KdlEntry> = node.entries().iter().filter(|e| e.name().is_some()).collect();

    if let Some(children) = node.children()
        && !children.nodes().is_empty()
    {
        let items = children.nodes();
        if items.iter().all(|n| n.name().value() == LIST_ITEM) {
            let values = items
                .iter()
                .map(|item| parse_property(owner, item))
                .collect::<Result<Vec<_>>>()?;
            return Ok(InputValue::List(values));
        }

        let mut map = BTreeMap::new();
        for child in items {
            let value = parse_property(owner, child)?;
            if map.insert(child.name().value().to_string(), value).is_some() {
                return Err(FlowError::validation(
                    owner,
                    format!("'{}' is set twice in '{}'", child.name().value(), key),
                ));
            }
        }
        return Ok(InputValue::Map(map));
    }

    if !named.is_empty() {
        if !arguments.is_empty() {
            return Err(FlowError::validation(
                owner,
                format!("'{key}' mixes positional and named values"),
            ));
        }
        let mut map = BTreeMap::new();
        for entry in named {
            let name = entry.name().map(|n| n.value()).unwrap_or_default();
            map.insert(name.to_string(), parse_entry(owner, name, entry)?);
        }
        return Ok(InputValue::Map(map));
    }

    match arguments.as_slice() {
        // `tags {}`
        [] if node.children().is_some() => Ok(InputValue::Map(BTreeMap::new())),
        [] => Err(FlowError::validation(owner, format!("'{key}' has no value"))),
        [single] => parse_entry(owner, key, single),
        many => many
            .iter()
            .map(|entry| parse_entry(owner, key, entry))
            .collect::<Result<Vec<_>>>()
            .map(InputValue::List),
    }
}

/// Convert one entry, honouring its type annotation. `key` names a secret handle.
pub fn parse_entry(owner: &str, key: &str, entry: &KdlEntry) -> Result<InputValue> {
    let annotation = entry.ty().map(|t| t.value());
    let value = entry.value();

    match annotation {
        None => Ok(InputValue::Literal(kdl_value_to_json(value))),
        Some("ref") => {
            let raw = annotated_string(owner, key, "ref", value)?;
            Reference::parse(raw)
                .map(InputValue::Reference)
                .ok_or_else(|| {
                    FlowError::validation(owner, format!("malformed reference '{raw}' in '{key}'"))
                })
        }
        Some("secret") => {
            let path = annotated_string(owner, key, "secret", value)?;
            Ok(InputValue::Secret(SecretHandle::new(key, path)))
        }
        Some("interp") => {
            let raw = annotated_string(owner, key, "interp", value)?;
            parse_interpolation(raw)
                .map(InputValue::Interpolation)
                .ok_or_else(|| {
                    FlowError::validation(
                        owner,
                        format!("malformed interpolation in '{key}': {raw}"),
                    )
                })
        }
        Some(other) => Err(FlowError::validation(
            owner,
            format!("unknown value annotation ({other}) in '{key}'"),
        )),
    }
}

fn annotated_string<'a>(
    owner: &str,
    key: &str,
    annotation: &str,
    value: &'a KdlValue,
) -> Result<&'a str> {
    value.as_string().ok_or_else(|| {
        FlowError::validation(
            owner,
            format!("({annotation}) in '{key}' must annotate a string"),
        )
    })
}

/// Plain KDL value as JSON
pub fn kdl_value_to_json(value: &KdlValue) -> serde_json::Value {
    if let Some(s) = value.as_string() {
        serde_json::Value::String(s.to_string())
    } else if let Some(i) = value.as_integer() {
        serde_json::Value::Number((i as i64).into())
    } else if let Some(f) = value.as_float() {
        serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)
    } else if let Some(b) = value.as_bool() {
        serde_json::Value::Bool(b)
    } else {
        serde_json::Value::Null
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kdl::KdlDocument;

    fn first(content: &str) -> InputValue {
        let doc: KdlDocument = content.parse().unwrap();
        parse_property("test", &doc.nodes()[0]).unwrap()
    }

    #[test]
    fn test_scalar_and_list() {
        assert_eq!(first(r#"cidr-block "10.0.0.0/16""#), InputValue::literal("10.0.0.0/16"));
        assert_eq!(first("desired-count 2"), InputValue::literal(2));
        assert_eq!(first("enabled #true"), InputValue::literal(true));
        assert_eq!(
            first(r#"owners "amazon" "self""#),
            InputValue::List(vec![InputValue::literal("amazon"), InputValue::literal("self")])
        );
    }

    #[test]
    fn test_annotations() {
        assert_eq!(first(r#"vpc-id (ref)"vpc.id""#), InputValue::reference("vpc", "id"));
        assert_eq!(
            first(r#"API_KEY (secret)"/doublee/API_KEY""#),
            InputValue::Secret(SecretHandle::new("API_KEY", "/doublee/API_KEY"))
        );
        assert!(matches!(
            first(r#"user-data (interp)"echo ${cluster.name}""#),
            InputValue::Interpolation(_)
        ));
    }

    #[test]
    fn test_map_from_children_and_named_entries() {
        let value = first(
            r#"tags {
                Name "doublee-prod-vpc"
                Stack "prod"
            }"#,
        );
        let InputValue::Map(map) = value else {
            panic!("expected map");
        };
        assert_eq!(map.len(), 2);

        let value = first(r#"rule port=22 source="10.0.0.1/32""#);
        let InputValue::Map(map) = value else {
            panic!("expected map");
        };
        assert_eq!(map["port"], InputValue::literal(22));
    }

    #[test]
    fn test_list_of_items() {
        let value = first(
            r#"ingress {
                - protocol="tcp" from-port=22 to-port=22
                - {
                    protocol "tcp"
                    cidr-blocks "10.0.0.1/32" "10.0.0.2/32"
                }
            }"#,
        );
        let InputValue::List(items) = value else {
            panic!("expected list");
        };
        assert_eq!(items.len(), 2);
        assert!(matches!(items[0], InputValue::Map(_)));
        assert!(matches!(items[1], InputValue::Map(_)));
    }

    #[test]
    fn test_errors() {
        let doc: KdlDocument = r#"vpc-id (ref)"vpc""#.parse().unwrap();
        assert!(parse_property("subnet", &doc.nodes()[0]).is_err());

        let doc: KdlDocument = r#"vpc-id (bogus)"vpc.id""#.parse().unwrap();
        let err = parse_property("subnet", &doc.nodes()[0]).unwrap_err();
        assert!(err.to_string().contains("bogus"));

        let doc: KdlDocument = "empty".parse().unwrap();
        assert!(parse_property("subnet", &doc.nodes()[0]).is_err());
    }
}
