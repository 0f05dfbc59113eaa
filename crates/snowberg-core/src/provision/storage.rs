use tracing::{info, warn};

use crate::cloud::{AwsControlPlane, CloudErrorKind};
use crate::error::{ProvisionError, Result};
use crate::types::{BucketDescriptor, BucketStatus, CloudIdentity};

/// Make sure `bucket` exists and belongs to the caller's account.
///
/// Ownership is checked first with an expected-owner HEAD. A bucket held by
/// another account is a [`ProvisionError::ResourceConflict`]; there is no
/// status for it because the workflow cannot continue past it.
pub async fn ensure_bucket(
    cloud: &dyn AwsControlPlane,
    identity: &CloudIdentity,
    bucket: &BucketDescriptor,
) -> Result<BucketStatus> {
    match cloud.head_bucket(&bucket.name, &identity.account_id).await {
        Ok(()) => {
            info!(bucket = %bucket.name, "Bucket already exists in this account, reusing");
            return Ok(BucketStatus::AlreadyOwned);
        }
        Err(err) if err.is(CloudErrorKind::NotFound) => {}
        // Create answers for the bucket wherever it lives
        Err(err) if err.is(CloudErrorKind::WrongRegion) => {
            warn!(
                bucket = %bucket.name,
                requested = %bucket.region,
                "Bucket exists in another region, checking ownership through create"
            );
        }
        Err(err) if err.is(CloudErrorKind::AccessDenied) => {
            return Err(ProvisionError::resource_conflict(
                "Bucket",
                &bucket.name,
                format!(
                    "HEAD with expected owner {} was denied ({})",
                    identity.account_id, err.message
                ),
            ));
        }
        Err(err) => return Err(err.into()),
    }

    // S3 rejects an explicit constraint for its default region
    let constraint = bucket.region.location_constraint();
    match cloud.create_bucket(&bucket.name, constraint).await {
        Ok(()) => {
            info!(bucket = %bucket.name, region = %bucket.region, "Created bucket");
            Ok(BucketStatus::Created)
        }
        Err(err) if err.is(CloudErrorKind::AlreadyOwnedByCaller) => {
            warn!(bucket = %bucket.name, "Bucket appeared between HEAD and create, reusing");
            Ok(BucketStatus::AlreadyOwned)
        }
        Err(err) if err.is(CloudErrorKind::AlreadyExists) => Err(
            ProvisionError::resource_conflict("Bucket", &bucket.name, err.message),
        ),
        Err(err) => Err(err.into()),
    }
}
