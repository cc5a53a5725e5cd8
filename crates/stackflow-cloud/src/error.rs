//! Engine error types

use stackflow_core::FlowError;
use thiserror::Error;

/// Kind of a provider failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// Worth retrying (throttling, eventual consistency, network)
    Transient,
    /// Retrying will not help
    Permanent,
    /// The remote object does not exist
    NotFound,
}

impl std::fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderErrorKind::Transient => write!(f, "transient"),
            ProviderErrorKind::Permanent => write!(f, "permanent"),
            ProviderErrorKind::NotFound => write!(f, "not found"),
        }
    }
}

/// Error returned by a `ResourceProvider`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} provider error: {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Permanent,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::NotFound,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == ProviderErrorKind::Transient
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ProviderErrorKind::NotFound
    }
}

/// Engine errors
#[derive(Error, Debug)]
pub enum CloudError {
    /// Validation and secret-leak errors raised while checking the graph
    #[error(transparent)]
    Flow(#[from] FlowError),

    #[error("Cyclic dependency: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),

    #[error("Provider error on {node}: {source}")]
    Provider {
        node: String,
        #[source]
        source: ProviderError,
    },

    #[error("Timeout: {operation} of {node} did not finish within {secs}s")]
    Timeout {
        node: String,
        operation: String,
        secs: u64,
    },

    #[error("Unresolved reference {reference} in {node}: {reason}")]
    UnresolvedReference {
        node: String,
        reference: String,
        reason: String,
    },

    #[error("State file error: {0}")]
    StateError(String),

    #[error("Lock acquisition failed: {0}")]
    LockError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CloudError {
    pub fn provider(node: impl Into<String>, source: ProviderError) -> Self {
        CloudError::Provider {
            node: node.into(),
            source,
        }
    }
}

impl crate::provider::Retryable for CloudError {
    /// Only transient provider failures are retried; timeouts are final
    fn is_retryable(&self) -> bool {
        matches!(self, CloudError::Provider { source, .. } if source.is_retryable())
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;
