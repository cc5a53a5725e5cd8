//! KDL parsers
//!
//! Project files (`stack.kdl`) and rendered resource templates.

mod project;
mod template;
mod value;

pub use project::parse_project;
pub use template::{TemplateDocument, parse_template};
pub use value::{LIST_ITEM, kdl_value_to_json, parse_entry, parse_property};

use crate::error::{FlowError, Result};
use crate::model::Project;
use std::fs;
use std::path::Path;

/// Read and parse a project file. The project name defaults to the directory name.
pub fn parse_project_file<P: AsRef<Path>>(path: P) -> Result<Project> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|e| FlowError::IoError {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let name = path
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .unwrap_or("unnamed")
        .to_string();
    parse_project(&content, name)
}
