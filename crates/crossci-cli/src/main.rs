//! crossci CLI entrypoint.

use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod handlers;

use commands::{Commands, ConfigCommands};
use config::CliConfig;

#[derive(Parser)]
#[command(name = "crossci")]
#[command(author, version, about = "Cross-platform CI matrix orchestrator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let loaded = CliConfig::load();

    let log_level = match &loaded {
        Ok(config) => config.log_level.clone(),
        Err(_) => CliConfig::default().log_level,
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    let config = CliConfig::or_default(loaded);

    let success = match cli.command {
        Commands::Init { force } => {
            handlers::init(force).await?;
            true
        }
        Commands::Validate { path } => handlers::validate(&config, path.as_deref()).await?,
        Commands::Plan { path, event } => {
            handlers::plan_workflow(&config, path.as_deref(), event).await?;
            true
        }
        Commands::Run {
            path,
            event,
            platforms,
            format,
            workspace,
        } => {
            handlers::run_workflow(&config, path.as_deref(), event, &platforms, format, workspace)
                .await?
        }
        Commands::Schema => {
            handlers::schema()?;
            true
        }
        Commands::Config { command } => {
            match command {
                ConfigCommands::Show => handlers::show_config(&config)?,
                ConfigCommands::Set { key, value } => handlers::set_config(&key, &value)?,
            }
            true
        }
    };

    Ok(if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
