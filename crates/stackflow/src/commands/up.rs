use crate::context::{self, Workspace};
use crate::utils;
use colored::Colorize;

pub async fn handle(
    workspace: &Workspace,
    stack: Option<String>,
    yes: bool,
    parallel: Option<usize>,
) -> anyhow::Result<()> {
    let stack = workspace.stack_name(stack)?;
    utils::print_header(workspace, &stack);

    let instance = workspace.instance(&stack)?;
    let engine = workspace.engine(&stack, parallel)?;

    let plan = engine.plan(&instance).await?;
    utils::print_plan(&plan);

    // Stop at the plan unless confirmed
    if !yes {
        if plan.has_changes {
            println!();
            println!("Run with {} to apply these changes", "--yes".cyan());
        }
        return Ok(());
    }

    println!();
    println!(
        "{}",
        format!(
            "Converging {} (parallelism {})...",
            stack,
            engine.settings().parallelism
        )
        .blue()
        .bold()
    );

    let interrupt = context::cancel_on_interrupt(engine.cancel_handle());
    let result = engine.apply(&instance).await;
    interrupt.abort();
    let result = result?;

    utils::print_result(&result, "Converged");
    if result.is_success() && !result.outputs.is_empty() {
        println!();
        println!("{}", "Outputs:".bold());
        utils::print_outputs(&result.outputs);
    }
    utils::finish(&result)
}
