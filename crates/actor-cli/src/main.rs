use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "actor-cli", version, about = "Actor developer CLI")]
struct Cli {
    /// Configuration directory (defaults to ~/.config/actor)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration inspection
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
    /// Rule validation and plugin listing
    Rules {
        #[command(subcommand)]
        action: commands::rules::RulesAction,
    },
    /// Flow planning
    Flow {
        #[command(subcommand)]
        action: commands::flow::FlowAction,
    },
    /// Run the tick loop against the built-in plugins
    Run(commands::run::RunArgs),
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("ACTOR_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    init_logging();

    let cli = Cli::parse();
    let dir = cli.config_dir.as_deref();
    let result = match cli.command {
        Commands::Config { action } => commands::config::run(dir, action),
        Commands::Rules { action } => commands::rules::run(dir, action),
        Commands::Flow { action } => commands::flow::run(dir, action),
        Commands::Run(args) => commands::run::run(dir, args),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
