//! `snowberg provision`: the end-to-end setup

use anyhow::Result;
use clap::Args;
use dialoguer::{Confirm, Input, Select};
use snowberg_config::{validate_bucket_name, AwsRegion, RuntimeConfig, ScopeDrift};
use snowberg_core::{
    redact_secret, BucketStatus, VolumeStatus, Workflow, WorkflowOptions, WorkflowReport,
    WorkflowRequest,
};
use tracing::info;

use super::is_interactive;
use crate::{init, names, progress::ConsoleProgress};

#[derive(Args, Debug, Default)]
pub struct ProvisionArgs {
    /// S3 bucket name for table data (prompted when omitted)
    #[arg(long)]
    pub bucket: Option<String>,

    /// AWS region for the bucket
    #[arg(long, value_name = "REGION")]
    pub region: Option<AwsRegion>,

    /// IAM policy name
    #[arg(long)]
    pub policy_name: Option<String>,

    /// IAM role name
    #[arg(long)]
    pub role_name: Option<String>,

    /// Snowflake external volume name
    #[arg(long, value_name = "NAME")]
    pub volume: Option<String>,

    /// Named AWS profile
    #[arg(long)]
    pub profile: Option<String>,

    /// Create the volume without write access
    #[arg(long)]
    pub read_only: bool,

    /// What to do when an existing policy covers a different bucket: fail or warn
    #[arg(long, value_name = "MODE")]
    pub on_scope_drift: Option<ScopeDrift>,

    /// Skip reading the trust policy back after updating it
    #[arg(long)]
    pub skip_trust_check: bool,

    /// Do not ask for confirmation
    #[arg(short, long)]
    pub yes: bool,
}

pub async fn run(mut config: RuntimeConfig, args: ProvisionArgs) -> Result<()> {
    let interactive = is_interactive() && !args.yes;

    println!();
    println!("snowberg provision - S3 + IAM + Snowflake external volume");
    println!();

    apply_args(&mut config, &args);

    let bucket = match args.bucket.clone().or_else(|| config.aws.bucket.clone()) {
        Some(bucket) => Some(bucket),
        None if interactive => {
            config.aws.region = prompt_region(config.aws.region)?;
            Some(
                Input::new()
                    .with_prompt("S3 bucket name for table data")
                    .default(names::generate_bucket_name())
                    .validate_with(|input: &String| validate_bucket_name(input))
                    .interact_text()?,
            )
        }
        None => None,
    };

    let request = WorkflowRequest::from_config(&config, bucket)?;
    let options = WorkflowOptions::from_config(&config);

    print_plan(&config, &request);

    if interactive {
        let proceed = Confirm::new()
            .with_prompt("Create or reuse these resources?")
            .default(true)
            .interact()?;
        if !proceed {
            println!("Aborted.");
            return Ok(());
        }
    }

    let warehouse = init::warehouse_client(&config)?;
    let cloud = init::aws_control_plane(&config).await;
    let observer = ConsoleProgress;

    println!();
    let outcome = Workflow::new(&cloud, &warehouse)
        .with_options(options)
        .with_observer(&observer)
        .run(&request)
        .await;

    match outcome {
        Ok(report) => {
            info!(
                bucket = %report.bucket.name,
                volume = %report.volume.name,
                "Provisioning complete"
            );
            print_report(&report);
            Ok(())
        }
        Err(failure) => {
            println!();
            println!("Stopped at: {}", failure.stage);
            println!("Reached:    {}", failure.reached);
            println!("Re-running `snowberg provision` with the same names reuses what exists.");
            println!();
            Err(failure.into())
        }
    }
}

fn apply_args(config: &mut RuntimeConfig, args: &ProvisionArgs) {
    if let Some(region) = args.region {
        config.aws.region = region;
    }
    if let Some(policy_name) = &args.policy_name {
        config.aws.policy_name = policy_name.clone();
    }
    if let Some(role_name) = &args.role_name {
        config.aws.role_name = role_name.clone();
    }
    if let Some(volume) = &args.volume {
        config.snowflake.volume_name = volume.clone();
    }
    if let Some(profile) = &args.profile {
        config.aws.profile = Some(profile.clone());
    }
    if args.read_only {
        config.snowflake.allow_writes = false;
    }
    if let Some(mode) = args.on_scope_drift {
        config.policy.on_scope_drift = mode;
    }
    if args.skip_trust_check {
        config.policy.verify_trust = false;
    }
}

fn prompt_region(current: AwsRegion) -> Result<AwsRegion> {
    let items: Vec<&str> = AwsRegion::ALL.iter().map(|r| r.as_str()).collect();
    let default = AwsRegion::ALL
        .iter()
        .position(|r| *r == current)
        .unwrap_or(0);
    let selection = Select::new()
        .with_prompt("AWS region for the bucket")
        .items(&items)
        .default(default)
        .interact()?;
    Ok(AwsRegion::ALL[selection])
}

fn print_plan(config: &RuntimeConfig, request: &WorkflowRequest) {
    println!("Plan:");
    println!("  Bucket:          {} ({})", request.bucket.url(), request.bucket.region);
    println!("  IAM policy:      {}", request.policy_name);
    println!("  IAM role:        {}", request.role_name);
    println!("  External volume: {}", request.volume_name);
    println!(
        "  Writes:          {}",
        if request.allow_writes { "allowed" } else { "read-only" }
    );
    println!("  Connection:      {}", config.snowflake.connection);
    println!();
}

fn print_report(report: &WorkflowReport) {
    let bucket = match report.bucket_status {
        BucketStatus::Created => "created",
        BucketStatus::AlreadyOwned => "already owned",
    };
    let volume = match report.volume_status {
        VolumeStatus::Created => "created",
        VolumeStatus::Replaced => "replaced",
    };

    println!();
    println!("Setup complete ({})", report.state);
    println!();
    println!("  Account:         {}", report.identity.account_id);
    println!("  Bucket:          {} ({})", report.bucket.url(), bucket);
    println!("  Policy:          {} ({})", report.policy.arn, report.policy.outcome);
    println!("  Role:            {} ({})", report.role.arn, report.role.outcome);
    println!("  External volume: {} ({})", report.volume.name, volume);
    println!("  Snowflake user:  {}", report.credentials.iam_user_arn);
    println!(
        "  External id:     {}",
        redact_secret(&report.credentials.external_id)
    );
    if report.reused_everything() {
        println!();
        println!("All AWS resources already existed; only the trust policy was refreshed.");
    }
    println!();
    println!("Next steps:");
    println!(
        "  snowberg create-table --volume {} --table <NAME> --column ID:INTEGER",
        report.volume.name
    );
    println!();
}
