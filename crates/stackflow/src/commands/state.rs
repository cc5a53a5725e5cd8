use crate::context::Workspace;
use crate::utils;
use colored::Colorize;

pub async fn handle(workspace: &Workspace, stack: Option<String>) -> anyhow::Result<()> {
    let stack = workspace.stack_name(stack)?;
    utils::print_header(workspace, &stack);

    let key = workspace.state_key(&stack)?;
    let state = workspace.engine(&stack, None)?.state(&key).await?;

    println!("State key: {} (serial {})", key.cyan(), state.serial);
    if state.is_empty() {
        println!();
        println!("{}", "No recorded objects".dimmed());
        return Ok(());
    }

    println!();
    for (name, entry) in &state.resources {
        let kind = if entry.is_data() { "data" } else { "managed" };
        println!(
            "  {} {} {} v{}",
            name.bold(),
            entry.resource_type.dimmed(),
            kind.dimmed(),
            entry.version
        );
        println!("      id: {}", entry.id);
        if !entry.dependencies.is_empty() {
            let deps: Vec<&str> = entry.dependencies.iter().map(|d| d.as_str()).collect();
            println!("      depends on: {}", deps.join(", "));
        }
    }
    if !state.deposed.is_empty() {
        println!();
        println!("{}", "Awaiting deletion:".yellow().bold());
        for deposed in &state.deposed {
            println!("  {} {} ({})", deposed.name.bold(), deposed.resource_type.dimmed(), deposed.id);
        }
    }
    if !state.outputs.is_empty() {
        println!();
        println!("{}", "Outputs:".bold());
        utils::print_outputs(&state.outputs);
    }
    Ok(())
}
