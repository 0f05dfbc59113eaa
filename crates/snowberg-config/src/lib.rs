// snowberg-config - Configuration for the provisioning workflow and CLI
//
// Supports configuration from multiple sources:
// 1. CLI flags (applied by the binary, highest priority)
// 2. Environment variables (SNOWBERG_* prefix)
// 3. Config file path from SNOWBERG_CONFIG env var
// 4. Config file contents from SNOWBERG_CONFIG_CONTENT env var
// 5. Default config file locations (./snowberg.toml, ./.snowberg.toml)
// 6. Built-in defaults (lowest priority)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

mod connections;
mod env_overrides;
mod region;
mod sources;
mod validation;

pub use connections::{
    default_connections_path, ConnectionsError, ConnectionsFile, SnowflakeConnection,
};
pub use env_overrides::{apply_env_overrides, EnvSource, MapEnvSource, ENV_PREFIX};
pub use region::AwsRegion;
pub use validation::{is_identifier, validate_bucket_name};

/// Main runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub aws: AwsConfig,

    #[serde(default)]
    pub snowflake: SnowflakeConfig,

    #[serde(default)]
    pub extraction: ExtractionConfig,

    #[serde(default)]
    pub policy: PolicyConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// AWS side of the setup: where the bucket lives and what the IAM objects are called
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsConfig {
    #[serde(default)]
    pub region: AwsRegion,

    /// Bucket name; globally unique, so there is no useful default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,

    #[serde(default = "default_policy_name")]
    pub policy_name: String,

    #[serde(default = "default_role_name")]
    pub role_name: String,

    /// Named profile from ~/.aws/credentials (SDK default chain when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
}

fn default_policy_name() -> String {
    "snowflake-iceberg-s3-access-policy".to_string()
}

fn default_role_name() -> String {
    "snowflake-iceberg-s3-access-role".to_string()
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            region: AwsRegion::default(),
            bucket: None,
            policy_name: default_policy_name(),
            role_name: default_role_name(),
            profile: None,
        }
    }
}

/// Snowflake side of the setup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnowflakeConfig {
    /// Connection name inside connections.toml
    #[serde(default = "default_connection_name")]
    pub connection: String,

    /// Explicit connections.toml path (defaults to $SNOWFLAKE_HOME or ~/.snowflake)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connections_file: Option<PathBuf>,

    #[serde(default = "default_volume_name")]
    pub volume_name: String,

    #[serde(default = "default_true")]
    pub allow_writes: bool,

    #[serde(default = "default_statement_timeout_secs")]
    pub statement_timeout_secs: u64,
}

fn default_connection_name() -> String {
    "default".to_string()
}

fn default_volume_name() -> String {
    "ICEBERG_EXTERNAL_VOLUME".to_string()
}

fn default_true() -> bool {
    true
}

fn default_statement_timeout_secs() -> u64 {
    60
}

impl SnowflakeConfig {
    pub fn statement_timeout(&self) -> Duration {
        Duration::from_secs(self.statement_timeout_secs)
    }
}

impl Default for SnowflakeConfig {
    fn default() -> Self {
        Self {
            connection: default_connection_name(),
            connections_file: None,
            volume_name: default_volume_name(),
            allow_writes: true,
            statement_timeout_secs: default_statement_timeout_secs(),
        }
    }
}

/// Bounded backoff for reading the volume's storage location after creation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl ExtractionConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 500,
            max_delay_ms: 5_000,
        }
    }
}

/// What to do when a reused access policy points at a different bucket
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeDrift {
    #[default]
    Fail,
    Warn,
}

impl std::fmt::Display for ScopeDrift {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScopeDrift::Fail => write!(f, "fail"),
            ScopeDrift::Warn => write!(f, "warn"),
        }
    }
}

impl std::str::FromStr for ScopeDrift {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "fail" | "strict" => Ok(ScopeDrift::Fail),
            "warn" => Ok(ScopeDrift::Warn),
            _ => anyhow::bail!("Unsupported scope drift mode: {}. Supported: fail, warn", s),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub on_scope_drift: ScopeDrift,

    /// Read the trust document back after reconciling it
    #[serde(default = "default_true")]
    pub verify_trust: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            on_scope_drift: ScopeDrift::Fail,
            verify_trust: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl RuntimeConfig {
    /// Load configuration from file and environment sources
    pub fn load() -> Result<Self> {
        sources::load_config()
    }

    /// Load configuration from an explicit file (CLI --config flag)
    pub fn load_from_path(path: impl AsRef<std::path::Path>) -> Result<Self> {
        sources::load_from_file_path(path)
    }

    /// Parse a TOML document on top of the built-in defaults
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        validation::validate_config(self)
    }

    /// Resolve the connections.toml path from config or the Snowflake defaults
    pub fn connections_path(&self) -> Option<PathBuf> {
        self.snowflake
            .connections_file
            .clone()
            .or_else(default_connections_path)
    }
}
