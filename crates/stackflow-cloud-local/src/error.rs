//! Local provider error types

use stackflow_cloud::ProviderError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LocalError {
    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    #[error("DependencyViolation: {id} is still referenced by {}", .dependents.join(", "))]
    DependencyViolation { id: String, dependents: Vec<String> },

    #[error("{resource_type} named '{name}' already exists ({id})")]
    AlreadyExists {
        resource_type: String,
        name: String,
        id: String,
    },

    #[error("Invalid {property}: '{value}' does not exist")]
    InvalidReference { property: String, value: String },

    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Unsupported resource type: {0}")]
    UnsupportedType(String),

    #[error("Account file is from a newer version (version {found}, supported {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<LocalError> for ProviderError {
    fn from(error: LocalError) -> Self {
        match error {
            LocalError::ObjectNotFound(_) => ProviderError::not_found(error.to_string()),
            // Disk hiccups are worth another attempt
            LocalError::IoError(_) => ProviderError::transient(error.to_string()),
            _ => ProviderError::permanent(error.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, LocalError>;

#[cfg(test)]
mod tests {
    use super::*;
    use stackflow_cloud::ProviderErrorKind;

    #[test]
    fn test_provider_error_kinds() {
        let not_found: ProviderError = LocalError::ObjectNotFound("vpc-1".into()).into();
        assert_eq!(not_found.kind, ProviderErrorKind::NotFound);

        let io: ProviderError =
            LocalError::IoError(std::io::Error::other("disk full")).into();
        assert!(io.is_retryable());

        let violation: ProviderError = LocalError::DependencyViolation {
            id: "vpc-1".into(),
            dependents: vec!["subnet-1".into(), "sg-1".into()],
        }
        .into();
        assert_eq!(violation.kind, ProviderErrorKind::Permanent);
        assert!(violation.message.contains("subnet-1, sg-1"));
    }
}
