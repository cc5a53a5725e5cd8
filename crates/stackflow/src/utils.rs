use colored::Colorize;
use stackflow_cloud::{Action, ActionType, ApplyResult, ApplyStatus, NodeOutcome, Plan};
use std::collections::BTreeMap;

/// Print the project file and the stack being worked on
pub fn print_header(workspace: &crate::context::Workspace, stack: &str) {
    println!(
        "📄 {} ({})",
        workspace.loaded.project.name.bold(),
        workspace.loaded.project_file.display().to_string().cyan()
    );
    println!("Stack: {}", stack.cyan());
}

fn symbol(action: ActionType) -> colored::ColoredString {
    match action {
        ActionType::Create => "+".green().bold(),
        ActionType::Update => "~".yellow().bold(),
        ActionType::Replace => "-/+".magenta().bold(),
        ActionType::Delete => "-".red().bold(),
        ActionType::Read => "<=".cyan(),
        ActionType::NoOp => " ".normal(),
    }
}

fn print_action(action: &Action) {
    let id = action
        .id
        .as_deref()
        .map(|id| format!(" ({})", id).dimmed().to_string())
        .unwrap_or_default();
    println!(
        "  {} {} {}{}",
        symbol(action.action_type),
        action.node.bold(),
        action.resource_type.dimmed(),
        id
    );
    if !action.properties.is_empty() {
        println!("      changed: {}", action.properties.join(", ").yellow());
    }
}

pub fn print_plan(plan: &Plan) {
    println!();
    if !plan.has_changes {
        println!("{}", "✓ No changes. Remote objects match the template.".green());
        return;
    }

    println!("{}", "Planned actions:".bold());
    for action in plan.actions.iter().filter(|a| a.action_type.is_change()) {
        print_action(action);
    }
    let reads = plan.actions_by_type(ActionType::Read);
    if !reads.is_empty() {
        println!("{}", "Data sources:".bold());
        for action in reads {
            print_action(action);
        }
    }
    println!();
    println!("Plan: {}", plan.summary());
}

fn outcome_label(outcome: NodeOutcome) -> colored::ColoredString {
    match outcome {
        NodeOutcome::Succeeded => "✓".green(),
        NodeOutcome::Failed => "✗".red().bold(),
        NodeOutcome::Skipped => "○".yellow(),
        NodeOutcome::Blocked => "⊘".yellow(),
    }
}

/// `done` labels a successful run, e.g. "Converged"
pub fn print_result(result: &ApplyResult, done: &str) {
    println!();
    for report in &result.nodes {
        if report.is_success() && !report.action.is_change() {
            continue;
        }
        println!(
            "  {} {} {} {}",
            outcome_label(report.outcome),
            report.node.bold(),
            report.action.to_string().dimmed(),
            format!("{}ms", report.duration_ms).dimmed()
        );
        if let Some(error) = &report.error {
            let error = if report.outcome == NodeOutcome::Failed {
                error.red()
            } else {
                error.yellow()
            };
            println!("      {}", error);
        }
    }

    println!();
    let counts = format!(
        "{} created, {} updated, {} replaced, {} deleted",
        result.count(ActionType::Create),
        result.count(ActionType::Update),
        result.count(ActionType::Replace),
        result.count(ActionType::Delete)
    );
    match result.status {
        ApplyStatus::Succeeded => {
            println!("{} {}", format!("✓ {done}:").green().bold(), counts)
        }
        ApplyStatus::Failed => {
            println!(
                "{} {} failed, {} blocked, {} skipped ({})",
                "✗ Run failed:".red().bold(),
                result.failed().len(),
                result.blocked().len(),
                result.skipped().len(),
                counts
            );
        }
        ApplyStatus::Cancelled => println!("{} {}", "⊘ Cancelled:".yellow().bold(), counts),
    }
}

pub fn print_outputs(outputs: &BTreeMap<String, serde_json::Value>) {
    if outputs.is_empty() {
        println!("{}", "No outputs recorded".dimmed());
        return;
    }
    let width = outputs.keys().map(|k| k.len()).max().unwrap_or(0);
    for (name, value) in outputs {
        let value = match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        println!("  {} = {}", format!("{:width$}", name).cyan(), value);
    }
}

/// Turn a finished run into the process result
pub fn finish(result: &ApplyResult) -> anyhow::Result<()> {
    match result.status {
        ApplyStatus::Succeeded => Ok(()),
        ApplyStatus::Failed => Err(anyhow::anyhow!(
            "{} node(s) failed: {}",
            result.failed().len(),
            result.failed().join(", ")
        )),
        ApplyStatus::Cancelled => Err(anyhow::anyhow!("Run cancelled")),
    }
}
