//! Project loader
//!
//! Ties the project file, the template and the catalog together.

use crate::catalog::Catalog;
use crate::error::{FlowError, Result};
use crate::model::{Project, StackInstance};
use crate::params::validate_namespaces;
use crate::parser::parse_project_file;
use crate::template::instantiate_file;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

/// A project file plus the directory its relative paths resolve against
#[derive(Debug, Clone)]
pub struct LoadedProject {
    pub project: Project,
    pub project_file: PathBuf,
    pub root: PathBuf,
}

impl LoadedProject {
    /// Absolute template path
    pub fn template_path(&self) -> PathBuf {
        if self.project.template.is_absolute() {
            self.project.template.clone()
        } else {
            self.root.join(&self.project.template)
        }
    }

    /// Render one stack against the project's template
    #[instrument(skip(self, catalog), fields(project = %self.project.name))]
    pub fn instantiate(&self, stack: &str, catalog: &Catalog) -> Result<StackInstance> {
        let params = self
            .project
            .stack(stack)
            .ok_or_else(|| FlowError::StackNotFound(stack.to_string()))?;
        instantiate_file(
            &self.template_path(),
            &self.project.name,
            stack,
            params,
            catalog,
        )
    }

    /// Every stack, in name order
    pub fn instantiate_all(&self, catalog: &Catalog) -> Result<Vec<StackInstance>> {
        self.project
            .stacks
            .keys()
            .map(|stack| self.instantiate(stack, catalog))
            .collect()
    }
}

/// Project root for a project file. Files inside `.stackflow/` belong to the parent directory.
pub fn project_root_of(project_file: &Path) -> PathBuf {
    let dir = project_file
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    if dir.file_name().is_some_and(|n| n == ".stackflow")
        && let Some(parent) = dir.parent()
    {
        return parent.to_path_buf();
    }
    dir
}

#[instrument(fields(project_file = %project_file.display()))]
pub fn load_project(project_file: &Path) -> Result<LoadedProject> {
    let root = project_root_of(project_file);
    debug!(root = %root.display(), "Loading project file");

    let mut project = parse_project_file(project_file)?;
    if project_file.parent() != Some(root.as_path())
        && let Some(name) = root.file_name().and_then(|n| n.to_str())
        && project.name == ".stackflow"
    {
        project.name = name.to_string();
    }
    validate_namespaces(&project)?;

    info!(
        project = %project.name,
        stacks = project.stacks.len(),
        "Project loaded"
    );

    Ok(LoadedProject {
        project,
        project_file: project_file.to_path_buf(),
        root,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_load_and_instantiate() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("stack.kdl"),
            r#"
project "doublee"
stack "prod" {
    region "ap-south-1"
    vpc-cidr "10.0.0.0/16"
}
"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("template.kdl"),
            r#"
resource "aws:ec2/vpc" "vpc" {
    cidr-block "{{ vpc_cidr }}"
}
output "vpcId" (ref)"vpc.id"
"#,
        )
        .unwrap();

        let loaded = load_project(&dir.path().join("stack.kdl")).unwrap();
        assert_eq!(loaded.template_path(), dir.path().join("template.kdl"));

        let instance = loaded.instantiate("prod", &Catalog::aws()).unwrap();
        assert_eq!(instance.state_key(), "doublee-prod");
        assert_eq!(instance.len(), 1);

        let err = loaded.instantiate("staging", &Catalog::aws()).unwrap_err();
        assert!(matches!(err, FlowError::StackNotFound(_)));
    }

    #[test]
    fn test_hidden_directory_root() {
        let dir = tempfile::tempdir().unwrap();
        let hidden = dir.path().join("myproj").join(".stackflow");
        fs::create_dir_all(&hidden).unwrap();
        fs::write(hidden.join("stack.kdl"), "").unwrap();

        let loaded = load_project(&hidden.join("stack.kdl")).unwrap();
        assert_eq!(loaded.root, dir.path().join("myproj"));
        assert_eq!(loaded.project.name, "myproj");
    }

    #[test]
    fn test_missing_template_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("stack.kdl"),
            "stack \"prod\" {\n    region \"us-east-1\"\n}\n",
        )
        .unwrap();
        let loaded = load_project(&dir.path().join("stack.kdl")).unwrap();
        let err = loaded.instantiate("prod", &Catalog::aws()).unwrap_err();
        assert!(matches!(err, FlowError::IoError { .. }));
    }
}
