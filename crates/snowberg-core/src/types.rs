//! Values passed between provisioning stages

use snowberg_config::AwsRegion;
use std::fmt;

/// The caller's AWS identity, resolved once per run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudIdentity {
    pub account_id: String,
    /// ARN of the calling user or assumed role
    pub caller_arn: String,
    /// ARN partition (`aws`, `aws-cn`, `aws-us-gov`)
    pub partition: String,
}

impl CloudIdentity {
    /// Account root principal, used as the placeholder trust principal
    pub fn root_principal(&self) -> String {
        format!("arn:{}:iam::{}:root", self.partition, self.account_id)
    }

    pub fn policy_arn(&self, policy_name: &str) -> String {
        format!(
            "arn:{}:iam::{}:policy/{}",
            self.partition, self.account_id, policy_name
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketDescriptor {
    pub name: String,
    pub region: AwsRegion,
}

impl BucketDescriptor {
    pub fn new(name: impl Into<String>, region: AwsRegion) -> Self {
        Self {
            name: name.into(),
            region,
        }
    }

    /// Base URL Snowflake stores in the external volume
    pub fn url(&self) -> String {
        format!("s3://{}/", self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketStatus {
    Created,
    AlreadyOwned,
}

/// Whether a named IAM object was made by this run or found from an earlier one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceOutcome {
    Created,
    Reused,
}

impl fmt::Display for ResourceOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceOutcome::Created => write!(f, "created"),
            ResourceOutcome::Reused => write!(f, "reused"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedPolicy {
    pub arn: String,
    pub outcome: ResourceOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedRole {
    pub arn: String,
    pub outcome: ResourceOutcome,
    /// False when the policy was already attached
    pub newly_attached: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalVolumeDescriptor {
    pub name: String,
    pub bucket_url: String,
    pub role_arn: String,
    pub allow_writes: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeStatus {
    Created,
    Replaced,
}

/// Snowflake's side of the trust relationship, read from DESC EXTERNAL VOLUME
#[derive(Clone, PartialEq, Eq)]
pub struct ExtractedCredentials {
    pub iam_user_arn: String,
    pub external_id: String,
}

impl fmt::Debug for ExtractedCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractedCredentials")
            .field("iam_user_arn", &self.iam_user_arn)
            .field("external_id", &crate::redact_secret(&self.external_id))
            .finish()
    }
}

/// One object in a bucket listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: i64,
}
