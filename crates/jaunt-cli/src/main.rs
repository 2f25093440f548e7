//! Jaunt CLI - inspect and maintain the travel journal from a terminal.

mod cli;
mod commands;
mod error;

use clap::{CommandFactory, Parser};
use clap_complete::{generate, shells};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands, CompletionShell};
use crate::commands::common::{resolve_db_path, resolve_device};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        match *shell {
            CompletionShell::Bash => generate(shells::Bash, &mut cmd, "jaunt", &mut std::io::stdout()),
            CompletionShell::Zsh => generate(shells::Zsh, &mut cmd, "jaunt", &mut std::io::stdout()),
            CompletionShell::Fish => generate(shells::Fish, &mut cmd, "jaunt", &mut std::io::stdout()),
        }
        return Ok(());
    }

    let db_path = resolve_db_path(cli.db_path)?;
    let device = resolve_device(cli.device);

    match cli.command {
        Commands::Ingest { file } => commands::ingest::run_ingest(&file, &db_path, &device).await,
        Commands::Visits { days, limit, json } => {
            commands::list::run_visits(days, limit, json, &db_path, &device)
        }
        Commands::Trips { days, json } => commands::list::run_trips(days, json, &db_path, &device),
        Commands::Detect { days } => commands::list::run_detect(days, &db_path, &device),
        Commands::Summary {
            granularity,
            date,
            json,
        } => commands::list::run_summary(granularity, date.as_deref(), json, &db_path, &device),
        Commands::Label { id, label } => commands::edit::run_label(&id, &label, &db_path, &device),
        Commands::Favorite { id, off } => {
            commands::edit::run_favorite(&id, off, &db_path, &device)
        }
        Commands::Sync { endpoint } => commands::sync::run_sync(endpoint, &db_path, &device).await,
        Commands::Conflicts { json } => commands::sync::run_conflicts(json, &db_path, &device),
        Commands::Resolve { id, op } => commands::sync::run_resolve(&id, op, &db_path, &device),
        Commands::Completions { .. } => Ok(()),
    }
}
