use crate::context::Workspace;
use crate::utils;

pub async fn handle(workspace: &Workspace, stack: Option<String>) -> anyhow::Result<()> {
    let stack = workspace.stack_name(stack)?;
    utils::print_header(workspace, &stack);

    let instance = workspace.instance(&stack)?;
    let engine = workspace.engine(&stack, None)?;
    let plan = engine.plan(&instance).await?;

    utils::print_plan(&plan);
    Ok(())
}
