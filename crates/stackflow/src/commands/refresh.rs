use crate::context::Workspace;
use crate::utils;
use colored::Colorize;

pub async fn handle(workspace: &Workspace, stack: Option<String>) -> anyhow::Result<()> {
    let stack = workspace.stack_name(stack)?;
    utils::print_header(workspace, &stack);

    let key = workspace.state_key(&stack)?;
    let engine = workspace.engine(&stack, None)?;
    let report = engine.refresh(&key).await?;

    println!();
    println!("Checked {} object(s)", report.checked);
    for name in &report.dropped {
        println!("  {} {} {}", "-".red().bold(), name.bold(), "gone remotely".red());
    }
    for name in &report.drifted {
        println!("  {} {} {}", "~".yellow().bold(), name.bold(), "drifted".yellow());
    }
    if report.dropped.is_empty() && report.drifted.is_empty() {
        println!("{}", "✓ No drift detected".green());
    } else {
        println!();
        println!("Run {} to converge", format!("stack up {} --yes", stack).cyan());
    }
    Ok(())
}
