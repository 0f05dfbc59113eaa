// Startup plumbing shared by the subcommands
//
// Configuration loading, logging, and construction of the AWS and Snowflake
// clients from the resolved configuration.

use anyhow::{Context, Result};
use snowberg_config::{ConnectionsFile, LogFormat, RuntimeConfig, SnowflakeConnection};
use snowberg_core::cloud::sdk::AwsSdkControlPlane;
use snowberg_core::warehouse::snowflake::SnowflakeSqlClient;
use std::path::Path;
use tracing::{debug, info};

/// Overrides the token from connections.toml
const TOKEN_ENV: &str = "SNOWFLAKE_TOKEN";

/// Load configuration from `--config` or the default sources
pub(crate) fn load_config(path: Option<&Path>) -> Result<RuntimeConfig> {
    match path {
        Some(path) => RuntimeConfig::load_from_path(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => RuntimeConfig::load().context("Failed to load configuration"),
    }
}

/// Initialize tracing subscriber with config-based log level and format.
/// Logs go to stderr; stdout carries command output.
pub(crate) fn init_tracing(config: &RuntimeConfig) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    // Ignore the error if a subscriber is already installed
    let _ = match config.logging.format {
        LogFormat::Json => tracing::subscriber::set_global_default(
            registry.with(fmt::layer().json().with_writer(std::io::stderr)),
        ),
        LogFormat::Text => tracing::subscriber::set_global_default(
            registry.with(fmt::layer().with_writer(std::io::stderr)),
        ),
    };
}

pub(crate) fn connections_file(config: &RuntimeConfig) -> Result<ConnectionsFile> {
    let path = config.connections_path().context(
        "Cannot locate connections.toml: set snowflake.connections_file, SNOWFLAKE_HOME or HOME",
    )?;
    Ok(ConnectionsFile::load(path)?)
}

/// The configured connection, with `SNOWFLAKE_TOKEN` applied
pub(crate) fn snowflake_connection(config: &RuntimeConfig) -> Result<SnowflakeConnection> {
    let file = connections_file(config)?;
    let mut connection = file.get(&config.snowflake.connection)?;

    if let Ok(token) = std::env::var(TOKEN_ENV) {
        if !token.trim().is_empty() {
            debug!("Using Snowflake token from {}", TOKEN_ENV);
            connection.token = Some(token);
        }
    }

    info!(
        connection = %config.snowflake.connection,
        account = %connection.account,
        "Using Snowflake connection"
    );
    Ok(connection)
}

pub(crate) fn warehouse_client(config: &RuntimeConfig) -> Result<SnowflakeSqlClient> {
    let connection = snowflake_connection(config)?;
    SnowflakeSqlClient::from_connection(&connection, config.snowflake.statement_timeout())
        .context("Failed to set up the Snowflake SQL API client")
}

pub(crate) async fn aws_control_plane(config: &RuntimeConfig) -> AwsSdkControlPlane {
    info!(region = %config.aws.region, profile = ?config.aws.profile, "Loading AWS credentials");
    AwsSdkControlPlane::from_env(config.aws.region, config.aws.profile.as_deref()).await
}
