pub mod error;

pub use error::*;

use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable naming a project file directly
pub const CONFIG_PATH_ENV: &str = "STACKFLOW_CONFIG_PATH";

/// Project file names, highest priority first
pub const PROJECT_FILE_CANDIDATES: [&str; 4] = [
    "stack.local.kdl",
    ".stack.local.kdl",
    "stack.kdl",
    ".stack.kdl",
];

/// Per-project working directory name
pub const PROJECT_DIR: &str = ".stackflow";

/// User config directory (`~/.config/stackflow`), created on first use
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("stackflow");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

/// Locate the project file
///
/// Search order:
/// 1. `STACKFLOW_CONFIG_PATH`
/// 2. current directory: stack.local.kdl, .stack.local.kdl, stack.kdl, .stack.kdl
/// 3. the same names inside `./.stackflow/`
/// 4. `~/.config/stackflow/stack.kdl`
pub fn find_project_file() -> Result<PathBuf> {
    if let Ok(config_path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(&config_path);
        if path.exists() {
            debug!(path = %path.display(), "Using project file from environment");
            return Ok(path);
        }
        return Err(ConfigError::ConfiguredPathMissing(config_path));
    }

    let current_dir = std::env::current_dir()?;
    if let Some(path) = find_in(&current_dir) {
        return Ok(path);
    }

    let project_dir = current_dir.join(PROJECT_DIR);
    if project_dir.is_dir()
        && let Some(path) = find_in(&project_dir)
    {
        return Ok(path);
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global = config_dir.join("stackflow").join("stack.kdl");
        if global.exists() {
            return Ok(global);
        }
    }

    Err(ConfigError::ProjectFileNotFound)
}

fn find_in(dir: &Path) -> Option<PathBuf> {
    PROJECT_FILE_CANDIDATES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.exists())
}

/// Directory holding persisted stack state for a project root
pub fn state_dir(project_root: &Path) -> PathBuf {
    project_root.join(PROJECT_DIR).join("state")
}

/// Directory the local provider keeps its simulated account in
pub fn local_cloud_dir(project_root: &Path) -> PathBuf {
    project_root.join(PROJECT_DIR).join("cloud")
}
