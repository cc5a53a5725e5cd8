use crate::context::Workspace;
use colored::Colorize;

pub async fn handle(workspace: &Workspace) -> anyhow::Result<()> {
    println!(
        "📄 {} ({})",
        workspace.loaded.project.name.bold(),
        workspace.loaded.project_file.display().to_string().cyan()
    );
    println!();

    for (name, params) in &workspace.loaded.project.stacks {
        let key = workspace.state_key(name)?;
        let state = workspace.engine(name, None)?.state(&key).await?;
        let deployed = if state.is_empty() {
            "not deployed".dimmed().to_string()
        } else {
            format!("{} objects, serial {}", state.resources.len(), state.serial)
                .green()
                .to_string()
        };
        let account = params.account_id.as_deref().unwrap_or("-");
        println!(
            "  {} {} {} {}",
            name.cyan().bold(),
            params.region,
            account.dimmed(),
            deployed
        );
    }
    Ok(())
}
