mod commands;
mod context;
mod utils;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stack")]
#[command(about = "One template, many stacks. Converge cloud resources from KDL.", long_about = None)]
struct Cli {
    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the project file and template without touching the provider
    Validate {
        /// Stack name (all stacks when omitted)
        stack: Option<String>,
        /// Stack name (-s/--stack flag, STACKFLOW_STACK environment variable)
        #[arg(
            short = 's',
            long = "stack",
            env = "STACKFLOW_STACK",
            conflicts_with = "stack",
            hide = true
        )]
        stack_flag: Option<String>,
    },
    /// Show what `up` would change
    Plan {
        /// Stack name
        stack: Option<String>,
        /// Stack name (-s/--stack flag, STACKFLOW_STACK environment variable)
        #[arg(
            short = 's',
            long = "stack",
            env = "STACKFLOW_STACK",
            conflicts_with = "stack",
            hide = true
        )]
        stack_flag: Option<String>,
    },
    /// Converge a stack
    Up {
        /// Stack name
        stack: Option<String>,
        /// Stack name (-s/--stack flag, STACKFLOW_STACK environment variable)
        #[arg(
            short = 's',
            long = "stack",
            env = "STACKFLOW_STACK",
            conflicts_with = "stack",
            hide = true
        )]
        stack_flag: Option<String>,
        /// Apply without stopping at the plan
        #[arg(short, long)]
        yes: bool,
        /// Maximum concurrent provider operations
        #[arg(short, long)]
        parallel: Option<usize>,
    },
    /// Delete every object recorded for a stack
    Destroy {
        /// Stack name
        stack: Option<String>,
        /// Stack name (-s/--stack flag, STACKFLOW_STACK environment variable)
        #[arg(
            short = 's',
            long = "stack",
            env = "STACKFLOW_STACK",
            conflicts_with = "stack",
            hide = true
        )]
        stack_flag: Option<String>,
        /// Delete without stopping at the listing
        #[arg(short, long)]
        yes: bool,
    },
    /// Read recorded objects back and record drift
    Refresh {
        /// Stack name
        stack: Option<String>,
        /// Stack name (-s/--stack flag, STACKFLOW_STACK environment variable)
        #[arg(
            short = 's',
            long = "stack",
            env = "STACKFLOW_STACK",
            conflicts_with = "stack",
            hide = true
        )]
        stack_flag: Option<String>,
    },
    /// Print the outputs of the last successful run
    Outputs {
        /// Stack name
        stack: Option<String>,
        /// Stack name (-s/--stack flag, STACKFLOW_STACK environment variable)
        #[arg(
            short = 's',
            long = "stack",
            env = "STACKFLOW_STACK",
            conflicts_with = "stack",
            hide = true
        )]
        stack_flag: Option<String>,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the recorded state of a stack
    State {
        /// Stack name
        stack: Option<String>,
        /// Stack name (-s/--stack flag, STACKFLOW_STACK environment variable)
        #[arg(
            short = 's',
            long = "stack",
            env = "STACKFLOW_STACK",
            conflicts_with = "stack",
            hide = true
        )]
        stack_flag: Option<String>,
    },
    /// List the stacks of the project
    Stacks,
    /// Show version information
    Version,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let workspace = context::Workspace::discover;

    match cli.command {
        // Needs no project file
        Commands::Version => {
            println!("stackflow {}", env!("CARGO_PKG_VERSION"));
        }
        Commands::Validate { stack, stack_flag } => {
            commands::validate::handle(&workspace()?, stack.or(stack_flag))?;
        }
        Commands::Plan { stack, stack_flag } => {
            commands::plan::handle(&workspace()?, stack.or(stack_flag)).await?;
        }
        Commands::Up {
            stack,
            stack_flag,
            yes,
            parallel,
        } => {
            commands::up::handle(&workspace()?, stack.or(stack_flag), yes, parallel).await?;
        }
        Commands::Destroy {
            stack,
            stack_flag,
            yes,
        } => {
            commands::destroy::handle(&workspace()?, stack.or(stack_flag), yes).await?;
        }
        Commands::Refresh { stack, stack_flag } => {
            commands::refresh::handle(&workspace()?, stack.or(stack_flag)).await?;
        }
        Commands::Outputs {
            stack,
            stack_flag,
            json,
        } => {
            commands::outputs::handle(&workspace()?, stack.or(stack_flag), json).await?;
        }
        Commands::State { stack, stack_flag } => {
            commands::state::handle(&workspace()?, stack.or(stack_flag)).await?;
        }
        Commands::Stacks => {
            commands::stacks::handle(&workspace()?).await?;
        }
    }

    Ok(())
}
