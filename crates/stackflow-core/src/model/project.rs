//! Project definition

use super::stack::StackParameters;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Default template file name, resolved next to the project file
pub const DEFAULT_TEMPLATE: &str = "template.kdl";

/// A project: one template plus the stacks instantiated from it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub name: String,

    /// Template path relative to the project root
    pub template: PathBuf,

    pub stacks: BTreeMap<String, StackParameters>,

    #[serde(default)]
    pub settings: EngineSettings,
}

impl Project {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            template: PathBuf::from(DEFAULT_TEMPLATE),
            stacks: BTreeMap::new(),
            settings: EngineSettings::default(),
        }
    }

    pub fn stack(&self, name: &str) -> Option<&StackParameters> {
        self.stacks.get(name)
    }
}

/// Engine tuning shared by every stack of a project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Maximum number of concurrent provider operations within a batch
    pub parallelism: usize,

    /// Read remote objects before diffing to detect drift
    pub refresh: bool,

    pub retry: RetrySettings,

    pub timeouts: TimeoutSettings,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            parallelism: 4,
            refresh: true,
            retry: RetrySettings::default(),
            timeouts: TimeoutSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

/// Per-operation timeouts in seconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutSettings {
    pub create_secs: u64,
    pub update_secs: u64,
    pub delete_secs: u64,
    pub read_secs: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            create_secs: 600,
            update_secs: 600,
            delete_secs: 600,
            read_secs: 60,
        }
    }
}
