//! Input digests
//!
//! State records a SHA-256 digest per input property instead of the value,
//! plus an overall hash derived from the property digests.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Digest of one desired property
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyDigest {
    Known(String),
    /// Depends on an output that does not exist yet
    Unknown,
}

impl PropertyDigest {
    pub fn known(&self) -> Option<&str> {
        match self {
            PropertyDigest::Known(digest) => Some(digest),
            PropertyDigest::Unknown => None,
        }
    }
}

/// Digest of a JSON value. Object keys are sorted, so equal values hash equally.
pub fn digest_value(value: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    write_canonical(&mut hasher, value);
    hex::encode(hasher.finalize())
}

fn write_canonical(hasher: &mut Sha256, value: &serde_json::Value) {
    use serde_json::Value;
    match value {
        Value::Array(items) => {
            hasher.update(b"[");
            for item in items {
                write_canonical(hasher, item);
                hasher.update(b",");
            }
            hasher.update(b"]");
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            hasher.update(b"{");
            for key in keys {
                hasher.update(Value::String(key.clone()).to_string().as_bytes());
                hasher.update(b":");
                write_canonical(hasher, &map[key.as_str()]);
                hasher.update(b",");
            }
            hasher.update(b"}");
        }
        scalar => hasher.update(scalar.to_string().as_bytes()),
    }
}

/// Overall hash from per-property digests
pub fn digest_properties(properties: &BTreeMap<String, String>) -> String {
    let mut hasher = Sha256::new();
    for (key, digest) in properties {
        hasher.update(key.as_bytes());
        hasher.update([0]);
        hasher.update(digest.as_bytes());
        hasher.update([0]);
    }
    hex::encode(hasher.finalize())
}

/// Digests of a node's desired inputs
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InputDigest {
    pub properties: BTreeMap<String, PropertyDigest>,
}

impl InputDigest {
    /// Digest of fully resolved inputs
    pub fn of(inputs: &BTreeMap<String, serde_json::Value>) -> Self {
        Self {
            properties: inputs
                .iter()
                .map(|(key, value)| (key.clone(), PropertyDigest::Known(digest_value(value))))
                .collect(),
        }
    }

    /// Digest of partially resolved inputs; `None` marks an unknown value
    pub fn of_partial(inputs: &BTreeMap<String, Option<serde_json::Value>>) -> Self {
        Self {
            properties: inputs
                .iter()
                .map(|(key, value)| {
                    let digest = match value {
                        Some(value) => PropertyDigest::Known(digest_value(value)),
                        None => PropertyDigest::Unknown,
                    };
                    (key.clone(), digest)
                })
                .collect(),
        }
    }

    pub fn is_known(&self) -> bool {
        self.properties
            .values()
            .all(|d| matches!(d, PropertyDigest::Known(_)))
    }

    /// Known property digests as stored in state
    pub fn known_properties(&self) -> BTreeMap<String, String> {
        self.properties
            .iter()
            .filter_map(|(key, digest)| digest.known().map(|d| (key.clone(), d.to_string())))
            .collect()
    }

    /// Overall hash, only when every property is known
    pub fn hash(&self) -> Option<String> {
        self.is_known()
            .then(|| digest_properties(&self.known_properties()))
    }

    /// Properties that differ from a recorded set, including added and removed ones
    pub fn changed_from(&self, recorded: &BTreeMap<String, String>) -> Vec<String> {
        let mut changed: Vec<String> = self
            .properties
            .iter()
            .filter(|(key, digest)| match (digest, recorded.get(*key)) {
                (PropertyDigest::Known(desired), Some(prior)) => desired != prior,
                _ => true,
            })
            .map(|(key, _)| key.clone())
            .collect();

        changed.extend(
            recorded
                .keys()
                .filter(|key| !self.properties.contains_key(*key))
                .cloned(),
        );
        changed.sort();
        changed
    }
}
