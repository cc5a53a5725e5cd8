use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("KDL parse error: {0}")]
    KdlParse(#[from] kdl::KdlError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IO error: {path}\nreason: {message}")]
    IoError { path: PathBuf, message: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Malformed template or parameters, raised before any remote call
    #[error("Validation error in {node}: {message}")]
    Validation { node: String, message: String },

    /// A literal value was supplied where a secret handle is required
    #[error(
        "Secret leak in {node}.{property}: a literal value was supplied where a secret handle is required"
    )]
    SecretLeak { node: String, property: String },

    #[error("Template error: {file}\nreason: {message}")]
    TemplateError { file: PathBuf, message: String },

    #[error("Template render error: {0}")]
    TemplateRenderError(String),

    #[error("Stack not found: {0}")]
    StackNotFound(String),

    #[error("Unknown resource type: {0}")]
    UnknownResourceType(String),
}

impl FlowError {
    pub fn validation(node: impl Into<String>, message: impl Into<String>) -> Self {
        FlowError::Validation {
            node: node.into(),
            message: message.into(),
        }
    }

    /// Whether this error must abort the run immediately
    pub fn is_fatal(&self) -> bool {
        matches!(self, FlowError::SecretLeak { .. })
    }
}

pub type Result<T> = std::result::Result<T, FlowError>;
