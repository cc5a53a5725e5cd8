//! Resource provider trait definition

use crate::error::ProviderError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stackflow_core::RetrySettings;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Resource provider abstraction
///
/// A provider performs CRUD on remote objects for the resource types it
/// knows. It never sees a secret value: secret inputs arrive as locators.
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    /// Provider name (e.g. "local")
    fn name(&self) -> &str;

    /// Check that the provider is configured and authenticated
    async fn check_auth(&self) -> ProviderResult<AuthStatus>;

    /// Create a remote object
    async fn create(&self, request: &ResourceRequest) -> ProviderResult<RemoteObject>;

    /// Read a remote object by id. `NotFound` when it no longer exists.
    async fn read(&self, resource_type: &str, id: &str) -> ProviderResult<RemoteObject>;

    /// Resolve a data source. Never creates or changes anything.
    async fn lookup(&self, request: &ResourceRequest) -> ProviderResult<RemoteObject>;

    /// Update mutable properties in place
    async fn update(
        &self,
        id: &str,
        request: &ResourceRequest,
        changed: &[String],
    ) -> ProviderResult<RemoteObject>;

    /// Delete a remote object
    async fn delete(&self, resource_type: &str, id: &str) -> ProviderResult<()>;
}

/// Authentication status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthStatus {
    /// Whether authentication is valid
    pub authenticated: bool,

    /// Account/user information if available
    pub account_info: Option<String>,

    /// Error message if not authenticated
    pub error: Option<String>,
}

impl AuthStatus {
    pub fn ok(account_info: impl Into<String>) -> Self {
        Self {
            authenticated: true,
            account_info: Some(account_info.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            authenticated: false,
            account_info: None,
            error: Some(error.into()),
        }
    }
}

/// Fully resolved desired object handed to a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequest {
    /// Resource type (e.g. "aws:ec2/vpc")
    pub resource_type: String,

    /// Logical name within the stack
    pub logical_name: String,

    /// Default remote name, `{project}-{stack}-{logical}`
    pub physical_name: String,

    /// Resolved input properties
    pub inputs: BTreeMap<String, serde_json::Value>,
}

impl ResourceRequest {
    pub fn input(&self, key: &str) -> Option<&serde_json::Value> {
        self.inputs.get(key)
    }

    pub fn input_str(&self, key: &str) -> Option<&str> {
        self.inputs.get(key).and_then(|v| v.as_str())
    }
}

/// What a provider knows about a remote object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteObject {
    /// Provider identifier
    pub id: String,

    /// Output attributes
    pub outputs: BTreeMap<String, serde_json::Value>,

    /// Input properties as currently observed remotely, when the provider can tell
    #[serde(default)]
    pub observed_inputs: Option<BTreeMap<String, serde_json::Value>>,
}

impl RemoteObject {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            outputs: BTreeMap::new(),
            observed_inputs: None,
        }
    }

    pub fn with_output(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.outputs.insert(key.into(), value);
        self
    }

    pub fn with_observed_inputs(mut self, inputs: BTreeMap<String, serde_json::Value>) -> Self {
        self.observed_inputs = Some(inputs);
        self
    }
}

/// Errors that may succeed when the operation is attempted again
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for ProviderError {
    fn is_retryable(&self) -> bool {
        ProviderError::is_retryable(self)
    }
}

/// Retry configuration for provider operations
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,

    /// Initial delay between retries
    pub initial_delay: Duration,

    /// Maximum delay between retries
    pub max_delay: Duration,

    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            backoff_multiplier: settings.backoff_multiplier,
        }
    }
}

impl RetryConfig {
    /// No retries, for tests and one-shot calls
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    /// Delay before the retry following `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        let delay = self.initial_delay.mul_f64(factor.max(0.0));
        delay.min(self.max_delay)
    }

    /// Run `operation` until it succeeds, fails permanently or attempts run out
    pub async fn run<T, E, F, Fut>(&self, what: &str, mut operation: F) -> Result<T, E>
    where
        E: Retryable + Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        operation = %what,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient provider error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
