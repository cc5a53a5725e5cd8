use assert_cmd::Command;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A throwaway project directory
pub struct TestProject {
    pub root: TempDir,
}

impl TestProject {
    /// Copy of the bundled ECS demo
    pub fn demo() -> Self {
        let project = Self::empty();
        let demo = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../demos/ecs-service");
        for file in ["stack.kdl", "template.kdl"] {
            fs::copy(demo.join(file), project.path().join(file)).unwrap();
        }
        project
    }

    pub fn empty() -> Self {
        Self {
            root: tempfile::tempdir().unwrap(),
        }
    }

    pub fn write(&self, name: &str, content: &str) {
        fs::write(self.path().join(name), content).unwrap();
    }

    pub fn path(&self) -> &Path {
        self.root.path()
    }

    pub fn account_file(&self) -> PathBuf {
        self.path().join(".stackflow/cloud/account.json")
    }

    pub fn state_file(&self, key: &str) -> PathBuf {
        self.path().join(".stackflow/state").join(format!("{key}.json"))
    }

    /// `stack` run inside the project, isolated from the caller's environment
    #[allow(deprecated)]
    pub fn stack(&self) -> Command {
        let mut cmd = Command::cargo_bin("stack").unwrap();
        cmd.current_dir(self.path())
            .env_remove("STACKFLOW_CONFIG_PATH")
            .env_remove("STACKFLOW_STACK")
            .env_remove("RUST_LOG")
            .env("NO_COLOR", "1");
        cmd
    }
}
