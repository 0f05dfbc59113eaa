// Configuration validation
//
// Validates that names are well-formed for the control plane that owns them
// and that retry bounds are sensible

use crate::*;
use anyhow::{bail, Result};
use tracing::warn;

pub fn validate_config(config: &RuntimeConfig) -> Result<()> {
    validate_aws_config(&config.aws)?;
    validate_snowflake_config(&config.snowflake)?;
    validate_extraction_config(&config.extraction)?;
    Ok(())
}

fn validate_aws_config(config: &AwsConfig) -> Result<()> {
    // The bucket may still be supplied by a CLI flag or prompt
    if let Some(bucket) = &config.bucket {
        validate_bucket_name(bucket)
            .map_err(|e| anyhow::anyhow!("aws.bucket is invalid: {}", e))?;
    }

    validate_iam_name("aws.policy_name", &config.policy_name, 128)?;
    validate_iam_name("aws.role_name", &config.role_name, 64)?;
    Ok(())
}

fn validate_snowflake_config(config: &SnowflakeConfig) -> Result<()> {
    if config.connection.trim().is_empty() {
        bail!("snowflake.connection must not be empty");
    }

    if !is_identifier(&config.volume_name) {
        bail!(
            "snowflake.volume_name '{}' must start with a letter or underscore and contain only letters, numbers, underscores",
            config.volume_name
        );
    }

    if config.statement_timeout_secs == 0 {
        bail!("snowflake.statement_timeout_secs must be greater than 0");
    }

    Ok(())
}

fn validate_extraction_config(config: &ExtractionConfig) -> Result<()> {
    if config.max_attempts == 0 {
        bail!("extraction.max_attempts must be greater than 0");
    }

    if config.max_delay_ms < config.initial_delay_ms {
        bail!(
            "extraction.max_delay_ms ({}) must not be smaller than extraction.initial_delay_ms ({})",
            config.max_delay_ms,
            config.initial_delay_ms
        );
    }

    if config.max_attempts > 20 {
        warn!(
            max_attempts = config.max_attempts,
            "extraction.max_attempts is very large; a missing storage location usually means the volume was not created"
        );
    }

    Ok(())
}

fn validate_iam_name(field: &str, name: &str, max_len: usize) -> Result<()> {
    if name.is_empty() {
        bail!("{} must not be empty", field);
    }
    if name.len() > max_len {
        bail!("{} must be at most {} characters", field, max_len);
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "+=,.@_-".contains(c))
    {
        bail!(
            "{} '{}' may only contain letters, numbers and +=,.@_-",
            field,
            name
        );
    }
    Ok(())
}

/// S3 general purpose bucket naming rules
pub fn validate_bucket_name(input: &str) -> Result<(), String> {
    if input.is_empty() {
        return Err("Bucket name cannot be empty".to_string());
    }
    if input.len() < 3 || input.len() > 63 {
        return Err("Bucket name must be 3-63 characters".to_string());
    }
    if !input
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
    {
        return Err(
            "Bucket name must contain only lowercase letters, numbers, dots, and hyphens"
                .to_string(),
        );
    }
    let first_last_ok = |c: Option<char>| c.is_some_and(|c| c.is_ascii_alphanumeric());
    if !first_last_ok(input.chars().next()) || !first_last_ok(input.chars().last()) {
        return Err("Bucket name must start and end with a letter or number".to_string());
    }
    if input.contains("..") {
        return Err("Bucket name cannot contain consecutive dots".to_string());
    }
    if input.parse::<std::net::Ipv4Addr>().is_ok() {
        return Err("Bucket name cannot be formatted as an IP address".to_string());
    }
    if input.starts_with("xn--") || input.ends_with("-s3alias") {
        return Err("Bucket name uses a prefix or suffix reserved by S3".to_string());
    }
    Ok(())
}

/// Unquoted SQL identifier: starts with a letter or underscore, then
/// letters, digits and underscores
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
