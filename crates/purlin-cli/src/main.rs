mod cmd;
mod llm;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{checklist::ChecklistSubcommand, config::ConfigSubcommand, critic::CriticArgs};
use std::path::PathBuf;

/// Exit code for failures that prevented a verdict.
const EXIT_RUNTIME_ERROR: i32 = 3;

#[derive(Parser)]
#[command(
    name = "purlin",
    about = "Purlin critic quality gate: evaluate feature specs against their tests and code",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .purlin/ or .git/)
    #[arg(long, global = true, env = "PURLIN_PROJECT_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the Spec Gate and Implementation Gate over every feature
    Critic(CriticArgs),

    /// Resolve release/handoff checklists
    Checklist {
        #[command(subcommand)]
        subcommand: ChecklistSubcommand,
    },

    /// Inspect and validate .purlin/config.json
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Critic(args) => cmd::critic::run(&root, args, cli.json),
        Commands::Checklist { subcommand } => cmd::checklist::run(&root, subcommand, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json).map(|()| 0),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            // Print the full error chain (anyhow's alternate Display)
            eprintln!("error: {e:#}");
            std::process::exit(EXIT_RUNTIME_ERROR);
        }
    }
}
