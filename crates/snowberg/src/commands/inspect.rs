//! `snowberg inspect-volume`

use anyhow::Result;
use clap::Args;
use snowberg_config::RuntimeConfig;
use snowberg_core::provision::extract_credentials;
use snowberg_core::{redact_secret, RetryPolicy};

use crate::init;

#[derive(Args, Debug, Default)]
pub struct InspectArgs {
    /// External volume name (defaults to snowflake.volume_name)
    #[arg(long, value_name = "NAME")]
    pub volume: Option<String>,

    /// Print the external id in full
    #[arg(long)]
    pub show_secret: bool,
}

pub async fn run(config: RuntimeConfig, args: InspectArgs) -> Result<()> {
    let volume = args
        .volume
        .unwrap_or_else(|| config.snowflake.volume_name.clone());
    let warehouse = init::warehouse_client(&config)?;

    let credentials = extract_credentials(&warehouse, &volume, &RetryPolicy::none()).await?;

    let external_id = if args.show_secret {
        credentials.external_id.clone()
    } else {
        redact_secret(&credentials.external_id)
    };

    println!("External volume: {}", volume);
    println!("  STORAGE_AWS_IAM_USER_ARN: {}", credentials.iam_user_arn);
    println!("  STORAGE_AWS_EXTERNAL_ID:  {}", external_id);
    Ok(())
}
