use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use snowberg_config::RuntimeConfig;
use std::future::Future;
use std::path::PathBuf;

mod commands;
mod init;
mod names;
mod progress;

/// Provision S3 storage and a Snowflake external volume for Iceberg tables
#[derive(Parser)]
#[command(name = "snowberg")]
#[command(version)]
#[command(
    about = "Provision S3 storage and a Snowflake external volume for Iceberg tables",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level: trace, debug, info, warn, error
    #[arg(short = 'v', long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    /// Connection name in connections.toml (overrides config file)
    #[arg(long, value_name = "NAME", global = true)]
    connection: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the bucket, IAM policy and role, and the external volume
    #[command(alias = "setup")]
    Provision(commands::provision::ProvisionArgs),
    /// Create a Snowflake-managed Iceberg table on an external volume
    CreateTable(commands::table::TableArgs),
    /// Show the IAM identity Snowflake uses for an external volume
    InspectVolume(commands::inspect::InspectArgs),
    /// List the connections in connections.toml
    Connections,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = init::load_config(cli.config.as_deref())?;
    apply_cli_overrides(&mut config, &cli);
    init::init_tracing(&config);

    match cli.command {
        Commands::Provision(args) => block_on(commands::provision::run(config, args)),
        Commands::CreateTable(args) => block_on(commands::table::run(config, args)),
        Commands::InspectVolume(args) => block_on(commands::inspect::run(config, args)),
        Commands::Connections => commands::connections::run(&config),
    }
}

fn apply_cli_overrides(config: &mut RuntimeConfig, cli: &Cli) {
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    if let Some(connection) = &cli.connection {
        config.snowflake.connection = connection.clone();
    }
}

// Every command is a short sequence of control-plane calls
fn block_on<F: Future<Output = Result<()>>>(future: F) -> Result<()> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?
        .block_on(future)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "snowberg",
            "connections",
            "--connection",
            "prod",
            "-v",
            "debug",
        ])
        .unwrap();
        let mut config = RuntimeConfig::default();
        apply_cli_overrides(&mut config, &cli);
        assert_eq!(config.snowflake.connection, "prod");
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_setup_alias() {
        let cli = Cli::try_parse_from(["snowberg", "setup", "--bucket", "my-bucket"]).unwrap();
        assert!(matches!(cli.command, Commands::Provision(_)));
    }
}
