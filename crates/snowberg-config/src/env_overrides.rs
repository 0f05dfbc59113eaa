use super::{AwsRegion, LogFormat, RuntimeConfig, ScopeDrift};
use anyhow::{anyhow, Context, Result};
use std::collections::HashMap;
use std::path::PathBuf;

pub const ENV_PREFIX: &str = "SNOWBERG_";

/// Abstraction over environment-variable lookups so tests can supply
/// their own source of overrides.
pub trait EnvSource {
    fn get(&self, key: &str) -> Option<String>;

    /// Get an environment variable WITHOUT the SNOWBERG_ prefix
    /// Used for the standard AWS_PROFILE / AWS_REGION variables
    fn get_raw(&self, key: &str) -> Option<String>;
}

/// In-memory environment, keyed by the full variable name
#[derive(Debug, Clone, Default)]
pub struct MapEnvSource {
    vars: HashMap<String, String>,
}

impl MapEnvSource {
    pub fn new<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: vars
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl EnvSource for MapEnvSource {
    fn get(&self, key: &str) -> Option<String> {
        self.vars.get(&format!("{}{}", ENV_PREFIX, key)).cloned()
    }

    fn get_raw(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }
}

/// Apply environment-variable overrides (above files, below CLI flags).
pub fn apply_env_overrides<E: EnvSource>(config: &mut RuntimeConfig, env: &E) -> Result<()> {
    // AWS
    if let Some(region) = get_env_string(env, "AWS_REGION") {
        config.aws.region = region
            .parse::<AwsRegion>()
            .context("Invalid SNOWBERG_AWS_REGION value")?;
    }
    if let Some(bucket) = get_env_string(env, "BUCKET") {
        config.aws.bucket = Some(bucket);
    }
    if let Some(policy_name) = get_env_string(env, "POLICY_NAME") {
        config.aws.policy_name = policy_name;
    }
    if let Some(role_name) = get_env_string(env, "ROLE_NAME") {
        config.aws.role_name = role_name;
    }
    // Standard AWS_PROFILE only fills the gap; SNOWBERG_AWS_PROFILE wins
    if let Some(profile) = get_env_string(env, "AWS_PROFILE") {
        config.aws.profile = Some(profile);
    } else if config.aws.profile.is_none() {
        config.aws.profile = env.get_raw("AWS_PROFILE");
    }

    // Snowflake
    if let Some(connection) = get_env_string(env, "SNOWFLAKE_CONNECTION") {
        config.snowflake.connection = connection;
    }
    if let Some(path) = get_env_string(env, "SNOWFLAKE_CONNECTIONS_FILE") {
        config.snowflake.connections_file = Some(PathBuf::from(path));
    }
    if let Some(volume_name) = get_env_string(env, "VOLUME_NAME") {
        config.snowflake.volume_name = volume_name;
    }
    if let Some(val) = get_env_bool(env, "ALLOW_WRITES")? {
        config.snowflake.allow_writes = val;
    }
    if let Some(val) = get_env_u64(env, "STATEMENT_TIMEOUT_SECS")? {
        config.snowflake.statement_timeout_secs = val;
    }

    // Credential extraction backoff
    if let Some(val) = get_env_u64(env, "EXTRACTION_MAX_ATTEMPTS")? {
        config.extraction.max_attempts = u32::try_from(val)
            .map_err(|_| anyhow!("{}EXTRACTION_MAX_ATTEMPTS is too large", ENV_PREFIX))?;
    }
    if let Some(val) = get_env_u64(env, "EXTRACTION_INITIAL_DELAY_MS")? {
        config.extraction.initial_delay_ms = val;
    }
    if let Some(val) = get_env_u64(env, "EXTRACTION_MAX_DELAY_MS")? {
        config.extraction.max_delay_ms = val;
    }

    // Policy handling
    if let Some(mode) = get_env_string(env, "ON_SCOPE_DRIFT") {
        config.policy.on_scope_drift = mode
            .parse::<ScopeDrift>()
            .context("Invalid SNOWBERG_ON_SCOPE_DRIFT value")?;
    }
    if let Some(val) = get_env_bool(env, "VERIFY_TRUST")? {
        config.policy.verify_trust = val;
    }

    // Logging
    if let Some(level) = get_env_string(env, "LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(format) = get_env_string(env, "LOG_FORMAT") {
        config.logging.format = match format.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Text,
        };
    }

    Ok(())
}

fn get_env_string<E: EnvSource>(env: &E, key: &str) -> Option<String> {
    env.get(key).filter(|val| !val.trim().is_empty())
}

fn get_env_u64<E: EnvSource>(env: &E, key: &str) -> Result<Option<u64>> {
    match get_env_string(env, key) {
        Some(val) => {
            let parsed = val
                .trim()
                .parse::<u64>()
                .map_err(|e| anyhow!("Failed to parse {}{}: {}", ENV_PREFIX, key, e))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

fn get_env_bool<E: EnvSource>(env: &E, key: &str) -> Result<Option<bool>> {
    match get_env_string(env, key) {
        Some(val) => {
            let parsed = match val.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                other => {
                    return Err(anyhow!(
                        "Failed to parse {}{} (expected bool): {}",
                        ENV_PREFIX,
                        key,
                        other
                    ))
                }
            };
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_overrides_apply_on_top_of_defaults() {
        let env = MapEnvSource::new([
            ("SNOWBERG_AWS_REGION", "eu-central-1"),
            ("SNOWBERG_BUCKET", "env-bucket"),
            ("SNOWBERG_VOLUME_NAME", "ENV_VOLUME"),
            ("SNOWBERG_ALLOW_WRITES", "false"),
            ("SNOWBERG_EXTRACTION_MAX_ATTEMPTS", "7"),
            ("SNOWBERG_ON_SCOPE_DRIFT", "warn"),
            ("SNOWBERG_LOG_FORMAT", "json"),
        ]);
        let mut config = RuntimeConfig::default();
        apply_env_overrides(&mut config, &env).unwrap();

        assert_eq!(config.aws.region, AwsRegion::EuCentral1);
        assert_eq!(config.aws.bucket.as_deref(), Some("env-bucket"));
        assert_eq!(config.snowflake.volume_name, "ENV_VOLUME");
        assert!(!config.snowflake.allow_writes);
        assert_eq!(config.extraction.max_attempts, 7);
        assert_eq!(config.policy.on_scope_drift, ScopeDrift::Warn);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_raw_aws_profile_used_only_as_fallback() {
        let env = MapEnvSource::new([("AWS_PROFILE", "sandbox")]);
        let mut config = RuntimeConfig::default();
        apply_env_overrides(&mut config, &env).unwrap();
        assert_eq!(config.aws.profile.as_deref(), Some("sandbox"));

        let env = MapEnvSource::new([
            ("AWS_PROFILE", "sandbox"),
            ("SNOWBERG_AWS_PROFILE", "provisioner"),
        ]);
        let mut config = RuntimeConfig::default();
        apply_env_overrides(&mut config, &env).unwrap();
        assert_eq!(config.aws.profile.as_deref(), Some("provisioner"));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let env = MapEnvSource::new([("SNOWBERG_ALLOW_WRITES", "maybe")]);
        let mut config = RuntimeConfig::default();
        assert!(apply_env_overrides(&mut config, &env).is_err());

        let env = MapEnvSource::new([("SNOWBERG_AWS_REGION", "moon-1")]);
        let mut config = RuntimeConfig::default();
        assert!(apply_env_overrides(&mut config, &env).is_err());
    }
}
