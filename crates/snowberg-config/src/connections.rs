// Snowflake connections.toml lookup
//
// Accepts both layouts found in the wild:
//   [connections.NAME]   (current snowflake-cli / connector layout)
//   [NAME]               (legacy top-level tables carrying an `account` key)

use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConnectionsError {
    #[error("Snowflake connections file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Failed to read Snowflake connections file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse Snowflake connections file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Connection '{name}' not found in {path}{}", available_hint(.available))]
    UnknownConnection {
        name: String,
        path: PathBuf,
        available: Vec<String>,
    },

    #[error("Connection '{name}' in {path} is invalid: {reason}")]
    InvalidConnection {
        name: String,
        path: PathBuf,
        reason: String,
    },
}

fn available_hint(available: &[String]) -> String {
    if available.is_empty() {
        String::new()
    } else {
        format!(" (available connections: {})", available.join(", "))
    }
}

/// Parameters for one named Snowflake connection
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SnowflakeConnection {
    pub account: String,
    #[serde(default)]
    pub user: Option<String>,
    /// Overrides `<account>.snowflakecomputing.com`
    #[serde(default)]
    pub host: Option<String>,
    /// OAuth, programmatic access or pre-minted key-pair token for the SQL API
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub authenticator: Option<String>,
    /// Unencrypted PKCS#8 PEM; a key-pair JWT is minted from it per run
    #[serde(default, alias = "private_key_path")]
    pub private_key_file: Option<PathBuf>,
    /// PEM public key registered on the user, for the JWT issuer fingerprint
    #[serde(default)]
    pub public_key_file: Option<PathBuf>,
    /// `SHA256:...` as shown by DESC USER, instead of `public_key_file`
    #[serde(default)]
    pub public_key_fp: Option<String>,
    /// Only read to explain that the SQL API cannot use it
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub warehouse: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

/// A parsed connections.toml
#[derive(Debug, Clone)]
pub struct ConnectionsFile {
    path: PathBuf,
    table: toml::Table,
}

impl ConnectionsFile {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConnectionsError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(ConnectionsError::FileNotFound { path });
        }
        let content = std::fs::read_to_string(&path).map_err(|source| ConnectionsError::Io {
            path: path.clone(),
            source,
        })?;
        Self::parse(path, &content)
    }

    pub fn parse(path: impl Into<PathBuf>, content: &str) -> Result<Self, ConnectionsError> {
        let path = path.into();
        let table = content
            .parse::<toml::Table>()
            .map_err(|source| ConnectionsError::Parse {
                path: path.clone(),
                source,
            })?;
        Ok(Self { path, table })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Connection names, nested layout first
    pub fn names(&self) -> Vec<String> {
        let mut names = Vec::new();
        if let Some(toml::Value::Table(nested)) = self.table.get("connections") {
            names.extend(
                nested
                    .iter()
                    .filter(|(_, value)| value.is_table())
                    .map(|(name, _)| name.clone()),
            );
        }
        for (name, value) in &self.table {
            if name == "connections" {
                continue;
            }
            let is_connection = value
                .as_table()
                .is_some_and(|table| table.contains_key("account"));
            if is_connection && !names.contains(name) {
                names.push(name.clone());
            }
        }
        names
    }

    pub fn get(&self, name: &str) -> Result<SnowflakeConnection, ConnectionsError> {
        let nested = self
            .table
            .get("connections")
            .and_then(|value| value.as_table())
            .and_then(|table| table.get(name));
        let value = nested
            .or_else(|| self.table.get(name))
            .filter(|value| value.is_table())
            .ok_or_else(|| ConnectionsError::UnknownConnection {
                name: name.to_string(),
                path: self.path.clone(),
                available: self.names(),
            })?;

        let connection: SnowflakeConnection =
            value
                .clone()
                .try_into()
                .map_err(|e: toml::de::Error| ConnectionsError::InvalidConnection {
                    name: name.to_string(),
                    path: self.path.clone(),
                    reason: e.message().to_string(),
                })?;

        if connection.account.trim().is_empty() {
            return Err(ConnectionsError::InvalidConnection {
                name: name.to_string(),
                path: self.path.clone(),
                reason: "account must not be empty".to_string(),
            });
        }

        Ok(connection)
    }
}

/// `$SNOWFLAKE_HOME/connections.toml`, else `~/.snowflake/connections.toml`
pub fn default_connections_path() -> Option<PathBuf> {
    if let Ok(home) = env::var("SNOWFLAKE_HOME") {
        return Some(PathBuf::from(home).join("connections.toml"));
    }
    env::var("HOME")
        .ok()
        .map(|home| PathBuf::from(home).join(".snowflake").join("connections.toml"))
}
