//! Stack parameterization
//!
//! A template is KDL with Tera placeholders. Rendering it against one stack's
//! parameter set and parsing the result yields a concrete `StackInstance`.

use crate::builder::StackBuilder;
use crate::catalog::Catalog;
use crate::error::{FlowError, Result};
use crate::model::{StackInstance, StackParameters};
use crate::params::validate_parameters;
use crate::parser::parse_template;
use crate::secret;
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use tera::{Context, Tera};
use tracing::{debug, info};

/// Template variables
pub type Variables = HashMap<String, serde_json::Value>;

pub struct TemplateProcessor {
    tera: Tera,
    context: Context,
}

impl TemplateProcessor {
    pub fn new() -> Self {
        Self {
            tera: Tera::default(),
            context: Context::new(),
        }
    }

    pub fn add_variable(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.context.insert(key.into(), &value);
    }

    pub fn add_variables(&mut self, variables: Variables) {
        for (key, value) in variables {
            self.context.insert(key, &value);
        }
    }

    /// Expose environment variables with an allowed prefix as template variables
    ///
    /// Only `STACKFLOW_*` and `CI_*` are visible; everything else in the
    /// environment stays out of the rendered template.
    #[tracing::instrument(skip(self))]
    pub fn add_env_variables(&mut self) {
        const ALLOWED_PREFIXES: &[&str] = &["STACKFLOW_", "CI_"];
        let mut count = 0;

        for (key, value) in std::env::vars() {
            if ALLOWED_PREFIXES
                .iter()
                .any(|prefix| key.starts_with(prefix))
            {
                debug!(key = %key, "Adding environment variable");
                self.context.insert(key, &serde_json::Value::String(value));
                count += 1;
            }
        }

        debug!(env_var_count = count, "Added filtered environment variables");
    }

    pub fn render_str(&mut self, template: &str) -> Result<String> {
        self.tera
            .render_str(template, &self.context)
            .map_err(|e| FlowError::TemplateRenderError(extract_tera_error_detail(&e)))
    }

    pub fn render_file(&mut self, path: &Path) -> Result<String> {
        let content = std::fs::read_to_string(path).map_err(|e| FlowError::IoError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        self.render_str(&content).map_err(|e| match e {
            FlowError::TemplateRenderError(message) => FlowError::TemplateError {
                file: path.to_path_buf(),
                message,
            },
            other => other,
        })
    }
}

impl Default for TemplateProcessor {
    fn default() -> Self {
        Self::new()
    }
}

/// Variables a template sees for one stack
pub fn stack_variables(project: &str, stack: &str, params: &StackParameters) -> Variables {
    let mut vars = Variables::new();
    let prefix = format!("{project}-{stack}");

    vars.insert("project".into(), json!(project));
    vars.insert("stack".into(), json!(stack));
    vars.insert("name_prefix".into(), json!(prefix));
    vars.insert("region".into(), json!(params.region));
    vars.insert("account_id".into(), json!(params.account_id));
    vars.insert("vpc_cidr".into(), json!(params.vpc_cidr));
    vars.insert(
        "public_subnet_cidrs".into(),
        json!(params.public_subnet_cidrs),
    );
    vars.insert("ingress".into(), json!(params.ingress));
    vars.insert("desired_count".into(), json!(params.desired_count));
    vars.insert("features".into(), json!(params.features));
    vars.insert("tags".into(), json!(params.tags));
    vars.insert("variables".into(), json!(params.variables));

    let image = params.image.as_ref().map(|image| {
        json!({
            "registry": image.registry,
            "repository": image.repository,
            "tag": image.tag,
            "uri": image.uri(&params.region, params.account_id.as_deref()),
        })
    });
    vars.insert("image".into(), json!(image));

    let prefix = params.secret_prefix.as_deref().map(secret::normalize_prefix);
    let secrets: Vec<_> = match &prefix {
        Some(prefix) => params
            .secrets
            .iter()
            .map(|name| {
                let handle = secret::handle_for(prefix, name);
                json!({ "name": handle.name, "path": handle.path })
            })
            .collect(),
        None => Vec::new(),
    };
    vars.insert(
        "secret_scope".into(),
        json!(prefix.as_deref().map(secret::scope_pattern)),
    );
    vars.insert("secret_prefix".into(), json!(prefix));
    vars.insert("secrets".into(), json!(secrets));

    vars
}

/// Render and parse `template` for one stack
///
/// `project` is the project name; a stack-level project override wins.
#[tracing::instrument(skip(template, params, catalog))]
pub fn instantiate(
    template: &str,
    project: &str,
    stack: &str,
    params: &StackParameters,
    catalog: &Catalog,
) -> Result<StackInstance> {
    let mut processor = prepare_processor(project, stack, params)?;
    let rendered = processor.render_str(template)?;
    build_instance(&rendered, project, stack, params, catalog)
}

/// Same as [`instantiate`], reading the template from a file
#[tracing::instrument(skip(params, catalog), fields(template = %path.display()))]
pub fn instantiate_file(
    path: &Path,
    project: &str,
    stack: &str,
    params: &StackParameters,
    catalog: &Catalog,
) -> Result<StackInstance> {
    let mut processor = prepare_processor(project, stack, params)?;
    let rendered = processor.render_file(path)?;
    build_instance(&rendered, project, stack, params, catalog)
}

fn prepare_processor(
    project: &str,
    stack: &str,
    params: &StackParameters,
) -> Result<TemplateProcessor> {
    validate_parameters(stack, params)?;
    let project = params.project.as_deref().unwrap_or(project);

    let mut processor = TemplateProcessor::new();
    processor.add_env_variables();
    processor.add_variables(stack_variables(project, stack, params));
    Ok(processor)
}

fn build_instance(
    rendered: &str,
    project: &str,
    stack: &str,
    params: &StackParameters,
    catalog: &Catalog,
) -> Result<StackInstance> {
    let project = params.project.as_deref().unwrap_or(project);
    let document = parse_template(rendered, catalog)?;

    let mut builder = StackBuilder::new(catalog, project, stack, params.clone());
    for node in document.nodes {
        builder.declare_node(node)?;
    }
    for (name, value) in document.outputs {
        builder.output(&name, value)?;
    }
    let instance = builder.build()?;

    info!(
        project = %instance.project,
        stack = %instance.stack,
        resources = instance.len(),
        outputs = instance.outputs.len(),
        "Stack instantiated"
    );
    Ok(instance)
}

fn extract_tera_error_detail(e: &tera::Error) -> String {
    use std::error::Error;

    let mut details = vec![e.to_string()];
    let mut source = e.source();
    while let Some(err) = source {
        details.push(err.to_string());
        source = err.source();
    }
    let full_error = details.join(" | ");

    if full_error.contains("not found in context")
        && let Some(start) = full_error.find("Variable `")
        && let Some(end) = full_error[start..].find("` not found")
    {
        let var_name = &full_error[start + 10..start + end];
        return format!(
            "undefined variable: `{var_name}`\nhint: add it to the stack's variables block"
        );
    }

    full_error
}
