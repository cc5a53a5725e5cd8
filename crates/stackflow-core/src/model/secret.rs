//! Secret handles

use serde::{Deserialize, Serialize};

/// Locator into an external secret store plus the variable name it is injected as.
///
/// The engine only ever carries the locator. The value is resolved by the
/// compute runtime when the container starts.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SecretHandle {
    /// Environment variable name inside the container
    pub name: String,

    /// Path in the secret store, e.g. `/doublee/OPENAI_API_KEY`
    pub path: String,
}

impl SecretHandle {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

impl std::fmt::Display for SecretHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} <- {}", self.name, self.path)
    }
}
