//! `sbx` — command-line utilities for managing staging sandboxes: isolated,
//! prefix-namespaced copies of platform data plus the deployments that serve
//! them.

mod aws;
mod commands;
mod github;
mod manifest;
mod term;

use std::path::PathBuf;
use std::process::exit;

use clap::{Parser, Subcommand};

use commands::experiment::ExperimentCommands;
use commands::rds::RdsCommands;
use commands::rotate_ci::RotateCiArgs;
use commands::stage::StageArgs;
use commands::unstage::UnstageArgs;

#[derive(Parser)]
#[command(
    name = "sbx",
    about = "Your one-stop shop for managing staging sandboxes",
    long_about = "Utilities for deploying isolated staging environments, copying \
                  experiment data into them, and tearing them down again."
)]
struct Cli {
    /// Path to the resource-mapping configuration file
    #[arg(long, env = "SBX_CONFIG", default_value = "config.yaml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Deploy a custom staging environment
    Stage(StageArgs),
    /// Remove a custom staging environment
    Unstage(UnstageArgs),
    /// Manage experiment data
    #[command(subcommand)]
    Experiment(ExperimentCommands),
    /// Relational database helpers
    #[command(subcommand)]
    Rds(RdsCommands),
    /// Rotate and update repository CI credentials
    RotateCi(RotateCiArgs),
}

fn main() {
    let cli = Cli::parse();

    if let Err(message) = run(cli) {
        eprintln!("✖️ {message}");
        exit(1);
    }
}

fn run(cli: Cli) -> Result<(), String> {
    let runtime = tokio::runtime::Runtime::new()
        .map_err(|error| format!("failed to start async runtime: {error}"))?;
    let handle = runtime.handle();

    match cli.command {
        Commands::Stage(args) => commands::stage::run(args, &cli.config, handle),
        Commands::Unstage(args) => commands::unstage::run(args, &cli.config, handle),
        Commands::Experiment(command) => commands::experiment::run(command, &cli.config, handle),
        Commands::Rds(command) => commands::rds::run(command),
        Commands::RotateCi(args) => commands::rotate_ci::run(args, &cli.config, handle),
    }
}
