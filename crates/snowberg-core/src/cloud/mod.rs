//! AWS control-plane seam
//!
//! The workflow only talks to S3, IAM and STS through [`AwsControlPlane`].
//! [`sdk::AwsSdkControlPlane`] is the production implementation;
//! [`crate::memory::MemoryCloud`] backs the tests.

pub mod sdk;

use async_trait::async_trait;
use thiserror::Error;

use crate::error::{Provider, ProvisionError};
use crate::types::ObjectSummary;

/// How a control-plane call failed, as far as the workflow cares
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloudErrorKind {
    /// Missing, invalid or expired credentials
    Authentication,
    /// Credentials are valid but not allowed to do this
    AccessDenied,
    /// The name is taken (by anyone, for IAM; by another account, for S3)
    AlreadyExists,
    /// S3 only: the caller already owns the bucket
    AlreadyOwnedByCaller,
    NotFound,
    /// S3 only: the bucket lives in another region and the redirect did not
    /// say which
    WrongRegion,
    /// Throttling, 5xx, network
    Transient,
}

#[derive(Debug, Clone, Error)]
#[error("{operation}: {message}")]
pub struct CloudError {
    pub kind: CloudErrorKind,
    pub operation: &'static str,
    /// Provider error code when one was returned (`EntityAlreadyExists`, ...)
    pub code: Option<String>,
    pub message: String,
}

impl CloudError {
    pub fn new(kind: CloudErrorKind, operation: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            operation,
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn is(&self, kind: CloudErrorKind) -> bool {
        self.kind == kind
    }
}

/// Default mapping onto the workflow taxonomy. Stages that give a kind a
/// special meaning (conflicts, reuse) match on it before falling back here.
impl From<CloudError> for ProvisionError {
    fn from(err: CloudError) -> Self {
        match err.kind {
            CloudErrorKind::Authentication => {
                ProvisionError::authentication(Provider::Aws, err.to_string())
            }
            CloudErrorKind::AccessDenied => {
                ProvisionError::permission_denied(err.operation, err.message)
            }
            _ => ProvisionError::provisioning(err.operation, err.message),
        }
    }
}

pub type CloudResult<T> = std::result::Result<T, CloudError>;

/// Result of STS GetCallerIdentity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub account: String,
    pub arn: String,
}

/// The parts of an IAM role the workflow reads back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleInfo {
    pub arn: String,
    /// Trust policy JSON, already URL-decoded
    pub trust_document: String,
}

/// S3, IAM and STS operations used by the provisioning stages.
///
/// Policy and trust documents cross this boundary as JSON strings; decoding
/// IAM's URL-encoded responses is the implementation's job.
#[async_trait]
pub trait AwsControlPlane: Send + Sync {
    async fn caller_identity(&self) -> CloudResult<CallerIdentity>;

    /// Succeeds only when the bucket exists and `expected_owner` owns it.
    /// A bucket owned by someone else surfaces as `AccessDenied`. Buckets in
    /// another region are checked there; `WrongRegion` means that region is
    /// unknown.
    async fn head_bucket(&self, bucket: &str, expected_owner: &str) -> CloudResult<()>;

    async fn create_bucket(
        &self,
        bucket: &str,
        location_constraint: Option<&str>,
    ) -> CloudResult<()>;

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        max_keys: i32,
    ) -> CloudResult<Vec<ObjectSummary>>;

    /// Returns the new policy's ARN
    async fn create_policy(&self, name: &str, document: &str) -> CloudResult<String>;

    /// Document of the policy's default version
    async fn policy_document(&self, policy_arn: &str) -> CloudResult<String>;

    /// Returns the new role's ARN
    async fn create_role(
        &self,
        name: &str,
        trust_document: &str,
        description: &str,
    ) -> CloudResult<String>;

    async fn get_role(&self, name: &str) -> CloudResult<RoleInfo>;

    /// ARNs of the managed policies attached to the role
    async fn attached_role_policies(&self, role: &str) -> CloudResult<Vec<String>>;

    async fn attach_role_policy(&self, role: &str, policy_arn: &str) -> CloudResult<()>;

    async fn update_assume_role_policy(&self, role: &str, document: &str) -> CloudResult<()>;
}

/// Partition segment of an ARN (`arn:<partition>:...`), `aws` if unparseable
pub fn partition_of(arn: &str) -> &str {
    let mut parts = arn.split(':');
    match (parts.next(), parts.next()) {
        (Some("arn"), Some(partition)) if !partition.is_empty() => partition,
        _ => "aws",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_partition_of() {
        assert_eq!(partition_of("arn:aws:iam::1:user/x"), "aws");
        assert_eq!(partition_of("arn:aws-cn:sts::1:assumed-role/r/s"), "aws-cn");
        assert_eq!(partition_of("not-an-arn"), "aws");
    }

    #[test]
    fn test_default_error_mapping() {
        let auth: ProvisionError =
            CloudError::new(CloudErrorKind::Authentication, "GetCallerIdentity", "expired").into();
        assert_eq!(auth.code(), ErrorCode::E101Authentication);

        let transient: ProvisionError =
            CloudError::new(CloudErrorKind::Transient, "CreateBucket", "timeout").into();
        assert_eq!(transient.code(), ErrorCode::E103Provisioning);
        assert!(transient.is_retryable());
    }

    #[test]
    fn test_access_denied_names_the_operation() {
        let denied: ProvisionError = CloudError::new(
            CloudErrorKind::AccessDenied,
            "CreatePolicy",
            "User is not authorized to perform: iam:CreatePolicy",
        )
        .into();
        assert_eq!(denied.code(), ErrorCode::E109PermissionDenied);
        assert!(!denied.is_retryable());
        let message = denied.to_string();
        assert!(message.starts_with("[E109] CreatePolicy was denied"));
        assert!(!message.contains("authentication"));
    }
}
