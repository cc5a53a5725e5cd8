use crate::context::Workspace;
use crate::utils;

pub async fn handle(workspace: &Workspace, stack: Option<String>, json: bool) -> anyhow::Result<()> {
    let stack = workspace.stack_name(stack)?;
    let key = workspace.state_key(&stack)?;
    let outputs = workspace.engine(&stack, None)?.outputs(&key).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outputs)?);
    } else {
        utils::print_outputs(&outputs);
    }
    Ok(())
}
