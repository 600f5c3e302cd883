mod cli;
mod commands;
mod config;
mod input;
mod output;

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use octofhir_bundle::observability;

use cli::{Cli, Commands, ConfigCommands};
use output::{print_error, print_success};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    if let Err(e) = run().await {
        print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let format = cli.format.unwrap_or_default();
    let mut config = config::load(cli.config.as_deref())?;
    observability::init_tracing(&config.logging);
    if let Some(level) = cli.log_level.as_deref() {
        config::override_log_level(&mut config, level)?;
        observability::apply_logging_level(level);
    }

    match &cli.command {
        Commands::Process(args) => {
            commands::process::run(args, config, format).await?;
        }
        Commands::Validate(args) => {
            commands::validate::run(args, format)?;
        }
        Commands::Config(args) => match &args.command {
            ConfigCommands::Show => {
                print!("{}", config::to_toml(&config)?);
            }
            ConfigCommands::Check => {
                println!("{}: {}", "Base URL".cyan(), config.base_url());
                println!(
                    "{}: {}",
                    "Update as create".cyan(),
                    config.processing.allow_update_create
                );
                println!("{}: {}", "Delete".cyan(), config.processing.allow_delete);
                println!(
                    "{}: {}",
                    "Conditional delete limit".cyan(),
                    config.processing.conditional_delete_max_number
                );
                println!("{}: {}", "Return".cyan(), config.processing.prefer_return);
                print_success("Configuration is valid");
            }
        },
    }

    Ok(())
}
