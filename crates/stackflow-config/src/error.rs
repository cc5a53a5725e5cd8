use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config directory not found")]
    ConfigDirNotFound,

    #[error(
        "Project file not found. Looked in:\n\
        - current directory: stack.local.kdl, .stack.local.kdl, stack.kdl, .stack.kdl\n\
        - ./.stackflow/\n\
        - ~/.config/stackflow/stack.kdl\n\
        Set STACKFLOW_CONFIG_PATH to point at a file directly"
    )]
    ProjectFileNotFound,

    #[error("STACKFLOW_CONFIG_PATH points at a missing file: {0}")]
    ConfiguredPathMissing(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
