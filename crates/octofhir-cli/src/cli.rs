use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use octofhir_bundle::PreferReturn;

#[derive(Parser)]
#[command(name = "octofhir-bundle")]
#[command(about = "Process FHIR batch and transaction bundles against an in-memory store")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (defaults to ./octofhir-bundle.toml when present)
    #[arg(short, long, global = true, env = "OCTOFHIR_CONFIG")]
    pub config: Option<String>,

    /// Log level (overrides logging.level from the configuration)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Output format
    #[arg(short, long, global = true)]
    pub format: Option<OutputFormat>,
}

#[derive(Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Json,
    Yaml,
    Table,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Process a request bundle and print the response bundle
    Process(ProcessArgs),
    /// Validate a request bundle without executing it
    Validate(ValidateArgs),
    /// Inspect the effective configuration
    Config(ConfigArgs),
}

#[derive(clap::Args)]
pub struct ProcessArgs {
    /// Path to the bundle JSON (reads from stdin if omitted)
    pub file: Option<PathBuf>,
    /// Resources to store before processing: a resource, an array of
    /// resources or a Bundle. May be repeated.
    #[arg(long)]
    pub seed: Vec<PathBuf>,
    /// Body of successful writes: minimal, representation or OperationOutcome
    #[arg(long)]
    pub prefer: Option<PreferReturn>,
    /// Treat the store as non-transactional
    #[arg(long)]
    pub no_transactions: bool,
}

#[derive(clap::Args)]
pub struct ValidateArgs {
    /// Path to the bundle JSON (reads from stdin if omitted)
    pub file: Option<PathBuf>,
}

#[derive(clap::Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the effective configuration as TOML
    Show,
    /// Check the configuration and report problems
    Check,
}
