//! Provisioning workflow for Snowflake Iceberg external volumes on S3
//!
//! Creates the S3 bucket, IAM access policy and role, defines the Snowflake
//! external volume, then closes the loop by rewriting the role's trust policy
//! with the identity Snowflake reports for the volume.

#![allow(clippy::result_large_err)]

pub mod cloud;
pub mod documents;
mod error;
pub mod memory;
pub mod provision;
mod retry;
pub mod table;
mod types;
pub mod warehouse;
mod workflow;

pub use cloud::{AwsControlPlane, CloudError, CloudErrorKind};
pub use error::{redact_secret, ErrorCode, ExtractionFailure, Provider, ProvisionError, Result};
pub use retry::RetryPolicy;
pub use types::{
    BucketDescriptor, BucketStatus, CloudIdentity, ExternalVolumeDescriptor, ExtractedCredentials,
    ObjectSummary, ProvisionedPolicy, ProvisionedRole, ResourceOutcome, VolumeStatus,
};
pub use warehouse::{ResultSet, WarehouseClient, WarehouseError};
pub use workflow::{
    NoopObserver, Stage, StageObserver, Workflow, WorkflowFailure, WorkflowOptions,
    WorkflowReport, WorkflowRequest, WorkflowState,
};

pub use snowberg_config::{AwsRegion, ScopeDrift};
