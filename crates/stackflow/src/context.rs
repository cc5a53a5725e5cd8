//! Project discovery and engine wiring shared by the commands

use colored::Colorize;
use stackflow_cloud::{CancelHandle, Engine, FileStateStore};
use stackflow_cloud_local::LocalProvider;
use stackflow_core::{Catalog, LoadedProject, StackInstance, StackParameters, load_project};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

pub struct Workspace {
    pub loaded: LoadedProject,
    pub catalog: Catalog,
}

impl Workspace {
    /// Find and load the project file of the current directory
    pub fn discover() -> anyhow::Result<Self> {
        let project_file = stackflow_config::find_project_file()?;
        debug!(path = %project_file.display(), "Found project file");
        let loaded = load_project(&project_file)?;
        Ok(Self {
            loaded,
            catalog: Catalog::aws(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.loaded.root
    }

    /// Resolve the stack to act on. A project with one stack needs no name.
    pub fn stack_name(&self, stack: Option<String>) -> anyhow::Result<String> {
        let stacks = &self.loaded.project.stacks;
        match stack {
            Some(name) if stacks.contains_key(&name) => Ok(name),
            Some(name) => Err(anyhow::anyhow!(
                "Stack '{}' not found\nAvailable stacks: {}",
                name,
                self.available()
            )),
            None if stacks.len() == 1 => Ok(stacks.keys().next().cloned().unwrap_or_default()),
            None => Err(anyhow::anyhow!(
                "Name a stack: stack <command> <stack> or STACKFLOW_STACK=<stack>\nAvailable stacks: {}",
                self.available()
            )),
        }
    }

    fn available(&self) -> String {
        self.loaded
            .project
            .stacks
            .keys()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn parameters(&self, stack: &str) -> anyhow::Result<&StackParameters> {
        self.loaded
            .project
            .stack(stack)
            .ok_or_else(|| anyhow::anyhow!("Stack '{}' not found", stack))
    }

    pub fn instance(&self, stack: &str) -> anyhow::Result<StackInstance> {
        Ok(self.loaded.instantiate(stack, &self.catalog)?)
    }

    /// State key of a stack, without rendering the template
    pub fn state_key(&self, stack: &str) -> anyhow::Result<String> {
        let params = self.parameters(stack)?;
        let project = params
            .project
            .as_deref()
            .unwrap_or(&self.loaded.project.name);
        Ok(format!("{project}-{stack}"))
    }

    /// Engine for one stack, talking to the project's local account
    pub fn engine(&self, stack: &str, parallel: Option<usize>) -> anyhow::Result<Engine> {
        let params = self.parameters(stack)?;

        let mut provider = LocalProvider::new(
            stackflow_config::local_cloud_dir(self.root()),
            params.region.clone(),
        );
        if let Some(account_id) = &params.account_id {
            provider = provider.with_account_id(account_id.clone());
        }
        let store = FileStateStore::new(stackflow_config::state_dir(self.root()));

        let mut settings = self.loaded.project.settings.clone();
        if let Some(parallel) = parallel {
            if parallel == 0 {
                anyhow::bail!("--parallel must be at least 1");
            }
            settings.parallelism = parallel;
        }

        Ok(Engine::new(
            Arc::new(provider),
            Arc::new(store),
            self.catalog.clone(),
            settings,
        ))
    }
}

/// Cancel the run on Ctrl-C. Operations already started finish first.
pub fn cancel_on_interrupt(handle: CancelHandle) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!();
            eprintln!(
                "{}",
                "Interrupted. Waiting for running operations to finish...".yellow()
            );
            handle.cancel();
        }
    })
}
