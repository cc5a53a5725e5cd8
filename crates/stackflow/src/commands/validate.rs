use crate::context::Workspace;
use colored::Colorize;

/// Render and check one stack, or every stack when none is named
pub fn handle(workspace: &Workspace, stack: Option<String>) -> anyhow::Result<()> {
    println!("{}", "Validating...".blue());
    println!(
        "Project file: {}",
        workspace.loaded.project_file.display().to_string().cyan()
    );
    println!(
        "Template: {}",
        workspace.loaded.template_path().display().to_string().cyan()
    );

    let stacks: Vec<String> = match stack {
        Some(name) => vec![workspace.stack_name(Some(name))?],
        None => workspace.loaded.project.stacks.keys().cloned().collect(),
    };
    if stacks.is_empty() {
        anyhow::bail!("The project declares no stacks");
    }

    let mut failures = 0;
    println!();
    for name in &stacks {
        match check(workspace, name) {
            Ok((nodes, batches)) => {
                println!(
                    "  {} {} ({} nodes, {} batches)",
                    "✓".green(),
                    name.cyan(),
                    nodes,
                    batches
                );
            }
            Err(e) => {
                failures += 1;
                println!("  {} {}", "✗".red().bold(), name.cyan());
                println!("      {}", format!("{:#}", e).red());
            }
        }
    }

    println!();
    if failures > 0 {
        anyhow::bail!("{} of {} stack(s) are invalid", failures, stacks.len());
    }
    println!("{}", "✓ Configuration is valid".green().bold());
    Ok(())
}

fn check(workspace: &Workspace, stack: &str) -> anyhow::Result<(usize, usize)> {
    let instance = workspace.instance(stack)?;
    let graph = workspace.engine(stack, None)?.validate(&instance)?;
    Ok((instance.len(), graph.schedule().len()))
}
