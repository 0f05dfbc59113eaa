use tracing::{debug, info};

use crate::cloud::{partition_of, AwsControlPlane};
use crate::error::{Provider, ProvisionError, Result};
use crate::types::CloudIdentity;

/// Ask STS who the caller is. The account id feeds every ARN the workflow
/// builds, so it is never taken from configuration.
pub async fn resolve_identity(cloud: &dyn AwsControlPlane) -> Result<CloudIdentity> {
    let caller = cloud.caller_identity().await?;

    if caller.account.trim().is_empty() {
        return Err(ProvisionError::authentication(
            Provider::Aws,
            "GetCallerIdentity returned an empty account id",
        ));
    }

    let identity = CloudIdentity {
        partition: partition_of(&caller.arn).to_string(),
        account_id: caller.account,
        caller_arn: caller.arn,
    };
    debug!(caller = %identity.caller_arn, partition = %identity.partition, "Resolved caller");
    info!(account_id = %identity.account_id, "Resolved AWS identity");
    Ok(identity)
}
