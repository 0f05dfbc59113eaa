// Configuration source loading.
//
// Priority order:
// 1. Environment variables (SNOWBERG_* prefix)
// 2. Config file path from SNOWBERG_CONFIG
// 3. Inline config content from SNOWBERG_CONFIG_CONTENT
// 4. Default config files (./snowberg.toml, ./.snowberg.toml)
// 5. Built-in defaults

use crate::env_overrides::{self, EnvSource, ENV_PREFIX};
use crate::RuntimeConfig;
use anyhow::{Context, Result};
use std::env;
use std::path::Path;

const DEFAULT_PATHS: &[&str] = &["./snowberg.toml", "./.snowberg.toml"];

/// Load configuration using native environment/file access.
pub fn load_config() -> Result<RuntimeConfig> {
    let mut config = load_from_file()?.unwrap_or_default();

    env_overrides::apply_env_overrides(&mut config, &StdEnvSource)?;
    config.validate()?;
    Ok(config)
}

fn load_from_file() -> Result<Option<RuntimeConfig>> {
    if let Ok(path) = env::var("SNOWBERG_CONFIG") {
        return read_config_file(Path::new(&path)).map(Some);
    }

    if let Ok(content) = env::var("SNOWBERG_CONFIG_CONTENT") {
        let config: RuntimeConfig = toml::from_str(&content)
            .context("Failed to parse inline config from SNOWBERG_CONFIG_CONTENT")?;
        return Ok(Some(config));
    }

    for path in DEFAULT_PATHS {
        let path = Path::new(path);
        if path.exists() {
            return read_config_file(path).map(Some);
        }
    }

    Ok(None)
}

/// Load configuration from a specific file path (for CLI --config flag).
/// Returns error if file doesn't exist or can't be parsed.
pub fn load_from_file_path(path: impl AsRef<Path>) -> Result<RuntimeConfig> {
    let mut config = read_config_file(path.as_ref())?;

    env_overrides::apply_env_overrides(&mut config, &StdEnvSource)?;

    config.validate()?;
    Ok(config)
}

fn read_config_file(path: &Path) -> Result<RuntimeConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

struct StdEnvSource;

impl EnvSource for StdEnvSource {
    fn get(&self, key: &str) -> Option<String> {
        env::var(format!("{}{}", ENV_PREFIX, key)).ok()
    }

    fn get_raw(&self, key: &str) -> Option<String> {
        env::var(key).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn reads_explicit_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [aws]
            region = "us-east-1"
            bucket = "file-bucket"
            policy_name = "file-policy"

            [extraction]
            max_attempts = 5
            initial_delay_ms = 100
            max_delay_ms = 1000
            "#
        )
        .unwrap();

        let config = read_config_file(file.path()).unwrap();
        assert_eq!(config.aws.bucket.as_deref(), Some("file-bucket"));
        assert_eq!(config.aws.policy_name, "file-policy");
        assert_eq!(config.extraction.max_attempts, 5);
    }

    #[test]
    fn reports_path_of_unparseable_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[aws\nregion = ").unwrap();

        let err = read_config_file(file.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse config file"));
    }
}
