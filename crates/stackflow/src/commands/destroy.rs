use crate::context::{self, Workspace};
use crate::utils;
use colored::Colorize;

pub async fn handle(workspace: &Workspace, stack: Option<String>, yes: bool) -> anyhow::Result<()> {
    let stack = workspace.stack_name(stack)?;
    utils::print_header(workspace, &stack);

    let key = workspace.state_key(&stack)?;
    let engine = workspace.engine(&stack, None)?;
    let state = engine.state(&key).await?;

    let managed: Vec<_> = state
        .resources
        .iter()
        .filter(|(_, entry)| !entry.is_data())
        .collect();
    if managed.is_empty() && state.deposed.is_empty() {
        println!("{}", "Nothing to destroy".dimmed());
        return Ok(());
    }

    println!();
    println!("{}", "Objects to delete:".bold());
    for (name, entry) in &managed {
        println!(
            "  {} {} {} {}",
            "-".red().bold(),
            name.bold(),
            entry.resource_type.dimmed(),
            format!("({})", entry.id).dimmed()
        );
    }
    for deposed in &state.deposed {
        println!(
            "  {} {} {} {}",
            "-".red().bold(),
            format!("{} (deposed)", deposed.name).bold(),
            deposed.resource_type.dimmed(),
            format!("({})", deposed.id).dimmed()
        );
    }

    if !yes {
        println!();
        println!("Run with {} to delete these objects", "--yes".cyan());
        return Ok(());
    }

    println!();
    println!("{}", format!("Destroying {}...", stack).red().bold());

    let interrupt = context::cancel_on_interrupt(engine.cancel_handle());
    let result = engine.destroy(&key).await;
    interrupt.abort();
    let result = result?;

    utils::print_result(&result, "Destroyed");
    utils::finish(&result)
}
