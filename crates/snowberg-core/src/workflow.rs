//! The provisioning pipeline
//!
//! `Workflow::run` drives the stages strictly in order and stops at the first
//! failure. Nothing is rolled back: every stage is idempotent, so running the
//! same request again resumes where the last run stopped.

use snowberg_config::{is_identifier, validate_bucket_name, RuntimeConfig, ScopeDrift};
use std::fmt;
use std::future::Future;
use thiserror::Error;
use tracing::{error, info};

use crate::cloud::AwsControlPlane;
use crate::error::{ProvisionError, Result};
use crate::provision;
use crate::retry::RetryPolicy;
use crate::types::{
    BucketDescriptor, BucketStatus, CloudIdentity, ExternalVolumeDescriptor, ExtractedCredentials,
    ProvisionedPolicy, ProvisionedRole, ResourceOutcome, VolumeStatus,
};
use crate::warehouse::WarehouseClient;

/// Everything the operator chose, fixed for the whole run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowRequest {
    pub bucket: BucketDescriptor,
    pub policy_name: String,
    pub role_name: String,
    pub volume_name: String,
    pub allow_writes: bool,
}

impl WorkflowRequest {
    /// Build a request from configuration. `bucket` overrides `aws.bucket`.
    pub fn from_config(config: &RuntimeConfig, bucket: Option<String>) -> Result<Self> {
        let bucket = bucket
            .or_else(|| config.aws.bucket.clone())
            .ok_or_else(|| {
                ProvisionError::invalid_request(
                    "no bucket name given (set aws.bucket or pass --bucket)",
                )
            })?;

        let request = Self {
            bucket: BucketDescriptor::new(bucket, config.aws.region),
            policy_name: config.aws.policy_name.clone(),
            role_name: config.aws.role_name.clone(),
            volume_name: config.snowflake.volume_name.clone(),
            allow_writes: config.snowflake.allow_writes,
        };
        request.validate()?;
        Ok(request)
    }

    pub fn validate(&self) -> Result<()> {
        validate_bucket_name(&self.bucket.name).map_err(ProvisionError::invalid_request)?;
        if self.policy_name.trim().is_empty() {
            return Err(ProvisionError::invalid_request("policy name must not be empty"));
        }
        if self.role_name.trim().is_empty() {
            return Err(ProvisionError::invalid_request("role name must not be empty"));
        }
        if !is_identifier(&self.volume_name) {
            return Err(ProvisionError::invalid_request(format!(
                "external volume name '{}' is not a valid identifier",
                self.volume_name
            )));
        }
        Ok(())
    }
}

/// Tunables that do not identify resources
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkflowOptions {
    pub extraction: RetryPolicy,
    pub on_scope_drift: ScopeDrift,
    /// Read the trust document back after rewriting it
    pub verify_trust: bool,
}

impl WorkflowOptions {
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self {
            extraction: RetryPolicy::from(&config.extraction),
            on_scope_drift: config.policy.on_scope_drift,
            verify_trust: config.policy.verify_trust,
        }
    }
}

impl Default for WorkflowOptions {
    fn default() -> Self {
        Self::from_config(&RuntimeConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum WorkflowState {
    NotStarted,
    BucketReady,
    PolicyReady,
    /// Role exists and trusts the caller's own account
    RoleReady,
    VolumeReady,
    CredentialsExtracted,
    /// Role trusts the warehouse; the setup is complete
    TrustReconciled,
}

impl WorkflowState {
    pub fn is_complete(&self) -> bool {
        *self == WorkflowState::TrustReconciled
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkflowState::NotStarted => "not started",
            WorkflowState::BucketReady => "bucket ready",
            WorkflowState::PolicyReady => "policy ready",
            WorkflowState::RoleReady => "role ready (placeholder trust)",
            WorkflowState::VolumeReady => "external volume ready",
            WorkflowState::CredentialsExtracted => "credentials extracted",
            WorkflowState::TrustReconciled => "complete",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validation,
    Identity,
    Bucket,
    Policy,
    Role,
    Volume,
    Credentials,
    Trust,
}

impl Stage {
    pub const ALL: [Stage; 8] = [
        Stage::Validation,
        Stage::Identity,
        Stage::Bucket,
        Stage::Policy,
        Stage::Role,
        Stage::Volume,
        Stage::Credentials,
        Stage::Trust,
    ];

    /// State the workflow is in once this stage succeeds
    pub fn reaches(&self) -> WorkflowState {
        match self {
            Stage::Validation | Stage::Identity => WorkflowState::NotStarted,
            Stage::Bucket => WorkflowState::BucketReady,
            Stage::Policy => WorkflowState::PolicyReady,
            Stage::Role => WorkflowState::RoleReady,
            Stage::Volume => WorkflowState::VolumeReady,
            Stage::Credentials => WorkflowState::CredentialsExtracted,
            Stage::Trust => WorkflowState::TrustReconciled,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Validation => "Validate request",
            Stage::Identity => "Resolve AWS identity",
            Stage::Bucket => "Ensure S3 bucket",
            Stage::Policy => "Ensure IAM access policy",
            Stage::Role => "Ensure IAM role",
            Stage::Volume => "Create external volume",
            Stage::Credentials => "Extract Snowflake credentials",
            Stage::Trust => "Update role trust policy",
        };
        f.write_str(name)
    }
}

/// Progress callbacks for whoever is displaying the run
pub trait StageObserver: Send + Sync {
    fn stage_started(&self, _stage: Stage) {}
    fn stage_completed(&self, _stage: Stage, _detail: &str) {}
    fn stage_failed(&self, _stage: Stage, _error: &ProvisionError) {}
}

/// Observer that ignores everything
pub struct NoopObserver;

impl StageObserver for NoopObserver {}

/// What a completed run produced or reused
#[derive(Debug, Clone)]
pub struct WorkflowReport {
    pub identity: CloudIdentity,
    pub bucket: BucketDescriptor,
    pub bucket_status: BucketStatus,
    pub policy: ProvisionedPolicy,
    pub role: ProvisionedRole,
    pub volume: ExternalVolumeDescriptor,
    pub volume_status: VolumeStatus,
    pub credentials: ExtractedCredentials,
    pub state: WorkflowState,
}

impl WorkflowReport {
    /// True when no AWS resource was created or attached by this run
    pub fn reused_everything(&self) -> bool {
        self.bucket_status == BucketStatus::AlreadyOwned
            && self.policy.outcome == ResourceOutcome::Reused
            && self.role.outcome == ResourceOutcome::Reused
            && !self.role.newly_attached
    }
}

/// A halted run: the stage that failed, the last state reached before it
#[derive(Debug, Error)]
#[error("{stage} failed (reached: {reached}): {error}")]
pub struct WorkflowFailure {
    pub reached: WorkflowState,
    pub stage: Stage,
    #[source]
    pub error: ProvisionError,
}

pub struct Workflow<'a> {
    cloud: &'a dyn AwsControlPlane,
    warehouse: &'a dyn WarehouseClient,
    options: WorkflowOptions,
    observer: &'a dyn StageObserver,
}

impl<'a> Workflow<'a> {
    pub fn new(cloud: &'a dyn AwsControlPlane, warehouse: &'a dyn WarehouseClient) -> Self {
        Self {
            cloud,
            warehouse,
            options: WorkflowOptions::default(),
            observer: &NoopObserver,
        }
    }

    pub fn with_options(mut self, options: WorkflowOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_observer(mut self, observer: &'a dyn StageObserver) -> Self {
        self.observer = observer;
        self
    }

    pub async fn run(
        &self,
        request: &WorkflowRequest,
    ) -> std::result::Result<WorkflowReport, WorkflowFailure> {
        let cloud = self.cloud;
        let warehouse = self.warehouse;
        let mut reached = WorkflowState::NotStarted;

        self.step(Stage::Validation, &mut reached, async { request.validate() }, |_| {
            format!("bucket {} in {}", request.bucket.name, request.bucket.region)
        })
        .await?;

        let identity = self
            .step(Stage::Identity, &mut reached, provision::resolve_identity(cloud), |id| {
                format!("account {}", id.account_id)
            })
            .await?;

        let bucket_status = self
            .step(
                Stage::Bucket,
                &mut reached,
                provision::ensure_bucket(cloud, &identity, &request.bucket),
                |status| match status {
                    BucketStatus::Created => format!("created {}", request.bucket.url()),
                    BucketStatus::AlreadyOwned => format!("reusing {}", request.bucket.url()),
                },
            )
            .await?;

        let policy = self
            .step(
                Stage::Policy,
                &mut reached,
                provision::ensure_policy(
                    cloud,
                    &identity,
                    &request.bucket.name,
                    &request.policy_name,
                    self.options.on_scope_drift,
                ),
                |policy| format!("{} {}", policy.outcome, policy.arn),
            )
            .await?;

        let role = self
            .step(
                Stage::Role,
                &mut reached,
                provision::ensure_role(cloud, &identity, &request.role_name, &policy.arn),
                |role| {
                    let attach = if role.newly_attached {
                        "policy attached"
                    } else {
                        "policy already attached"
                    };
                    format!("{} {}, {}", role.outcome, role.arn, attach)
                },
            )
            .await?;

        let volume = ExternalVolumeDescriptor {
            name: request.volume_name.clone(),
            bucket_url: request.bucket.url(),
            role_arn: role.arn.clone(),
            allow_writes: request.allow_writes,
        };
        let volume_status = self
            .step(
                Stage::Volume,
                &mut reached,
                provision::ensure_external_volume(warehouse, &volume),
                |status| match status {
                    VolumeStatus::Created => format!("created {}", volume.name),
                    VolumeStatus::Replaced => format!("replaced {}", volume.name),
                },
            )
            .await?;

        let credentials = self
            .step(
                Stage::Credentials,
                &mut reached,
                provision::extract_credentials(warehouse, &volume.name, &self.options.extraction),
                |creds| format!("IAM user {}", creds.iam_user_arn),
            )
            .await?;

        let verify = self.options.verify_trust;
        self.step(
            Stage::Trust,
            &mut reached,
            async {
                provision::reconcile_trust(
                    cloud,
                    &request.role_name,
                    &credentials.iam_user_arn,
                    &credentials.external_id,
                )
                .await?;
                if verify {
                    provision::verify_trust(
                        cloud,
                        &request.role_name,
                        &credentials.iam_user_arn,
                        &credentials.external_id,
                    )
                    .await?;
                }
                Ok(())
            },
            |_| {
                if verify {
                    "trust policy updated and verified".to_string()
                } else {
                    "trust policy updated".to_string()
                }
            },
        )
        .await?;

        info!(
            bucket = %request.bucket.name,
            role_arn = %role.arn,
            volume = %volume.name,
            "Provisioning complete"
        );

        Ok(WorkflowReport {
            identity,
            bucket: request.bucket.clone(),
            bucket_status,
            policy,
            role,
            volume,
            volume_status,
            credentials,
            state: reached,
        })
    }

    /// Run one stage, notify the observer and advance `reached` on success
    async fn step<T, F, D>(
        &self,
        stage: Stage,
        reached: &mut WorkflowState,
        work: F,
        describe: D,
    ) -> std::result::Result<T, WorkflowFailure>
    where
        F: Future<Output = Result<T>>,
        D: FnOnce(&T) -> String,
    {
        info!(%stage, "Stage started");
        self.observer.stage_started(stage);

        match work.await {
            Ok(value) => {
                *reached = stage.reaches();
                let detail = describe(&value);
                info!(%stage, %detail, state = %reached, "Stage completed");
                self.observer.stage_completed(stage, &detail);
                Ok(value)
            }
            Err(err) => {
                error!(%stage, reached = %reached, code = %err.code(), "Stage failed");
                self.observer.stage_failed(stage, &err);
                Err(WorkflowFailure {
                    reached: *reached,
                    stage,
                    error: err,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snowberg_config::AwsRegion;

    fn request() -> WorkflowRequest {
        WorkflowRequest {
            bucket: BucketDescriptor::new("demo-bkt", AwsRegion::UsWest2),
            policy_name: "p".into(),
            role_name: "r".into(),
            volume_name: "ICEBERG_VOL".into(),
            allow_writes: true,
        }
    }

    #[test]
    fn test_request_validation() {
        assert!(request().validate().is_ok());

        let bad_bucket = WorkflowRequest {
            bucket: BucketDescriptor::new("Demo_Bkt", AwsRegion::UsWest2),
            ..request()
        };
        assert!(bad_bucket.validate().is_err());

        let bad_volume = WorkflowRequest {
            volume_name: "vol; DROP".into(),
            ..request()
        };
        assert!(bad_volume.validate().is_err());
    }

    #[test]
    fn test_from_config_requires_bucket() {
        let config = RuntimeConfig::default();
        assert!(WorkflowRequest::from_config(&config, None).is_err());

        let request = WorkflowRequest::from_config(&config, Some("demo-bkt".into())).unwrap();
        assert_eq!(request.bucket.region, AwsRegion::UsWest2);
        assert_eq!(request.volume_name, config.snowflake.volume_name);
    }

    #[test]
    fn test_states_are_ordered() {
        let reached: Vec<WorkflowState> = Stage::ALL.iter().map(Stage::reaches).collect();
        assert!(reached.windows(2).all(|pair| pair[0] <= pair[1]));
        assert!(Stage::Trust.reaches().is_complete());
    }
}
