use tracing::{debug, info};

use crate::cloud::{AwsControlPlane, CloudErrorKind};
use crate::documents::placeholder_trust;
use crate::error::{ProvisionError, Result};
use crate::types::{CloudIdentity, ProvisionedRole, ResourceOutcome};

pub const ROLE_DESCRIPTION: &str =
    "Assumed by Snowflake to reach the Iceberg external volume bucket";

/// Create the role with the placeholder trust document (or reuse it), then
/// make sure `policy_arn` is attached.
///
/// A reused role keeps whatever trust document it has; the trust stage
/// rewrites it at the end of every run.
pub async fn ensure_role(
    cloud: &dyn AwsControlPlane,
    identity: &CloudIdentity,
    role_name: &str,
    policy_arn: &str,
) -> Result<ProvisionedRole> {
    let trust = placeholder_trust(&identity.root_principal())
        .to_json()
        .map_err(|e| ProvisionError::provisioning("CreateRole", e.to_string()))?;

    let (arn, outcome) = match cloud.create_role(role_name, &trust, ROLE_DESCRIPTION).await {
        Ok(arn) => {
            info!(role_arn = %arn, "Created role with placeholder trust");
            (arn, ResourceOutcome::Created)
        }
        Err(err) if err.is(CloudErrorKind::AlreadyExists) => {
            let role = cloud.get_role(role_name).await?;
            info!(role_arn = %role.arn, "Role already exists, reusing");
            (role.arn, ResourceOutcome::Reused)
        }
        Err(err) => return Err(err.into()),
    };

    let attached = cloud.attached_role_policies(role_name).await?;
    let newly_attached = if attached.iter().any(|a| a == policy_arn) {
        debug!(role = role_name, policy_arn, "Policy already attached");
        false
    } else {
        cloud.attach_role_policy(role_name, policy_arn).await?;
        info!(role = role_name, policy_arn, "Attached access policy");
        true
    };

    Ok(ProvisionedRole {
        arn,
        outcome,
        newly_attached,
    })
}
