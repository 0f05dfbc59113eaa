use tracing::{info, warn};

use crate::cloud::AwsControlPlane;
use crate::documents::{warehouse_trust, PolicyDocument};
use crate::error::{ProvisionError, Result};

/// Replace the role's trust document with one that trusts only the
/// warehouse's IAM user under `external_id`.
///
/// Any failure leaves the role on its placeholder trust and is reported as
/// [`ProvisionError::SetupIncomplete`].
pub async fn reconcile_trust(
    cloud: &dyn AwsControlPlane,
    role_name: &str,
    iam_user_arn: &str,
    external_id: &str,
) -> Result<()> {
    let document = warehouse_trust(iam_user_arn, external_id)
        .to_json()
        .map_err(|e| ProvisionError::setup_incomplete(role_name, e.to_string()))?;

    cloud
        .update_assume_role_policy(role_name, &document)
        .await
        .map_err(|e| ProvisionError::setup_incomplete(role_name, e.to_string()))?;

    info!(
        role = role_name,
        principal = iam_user_arn,
        "Trust policy now names the Snowflake IAM user"
    );
    Ok(())
}

/// Read the trust document back and check it is exactly the final generation
pub async fn verify_trust(
    cloud: &dyn AwsControlPlane,
    role_name: &str,
    iam_user_arn: &str,
    external_id: &str,
) -> Result<()> {
    let role = cloud
        .get_role(role_name)
        .await
        .map_err(|e| {
            ProvisionError::setup_incomplete(role_name, format!("read-back failed: {}", e))
        })?;
    let document = PolicyDocument::from_json(&role.trust_document).map_err(|e| {
        ProvisionError::setup_incomplete(role_name, format!("unreadable trust document: {}", e))
    })?;

    if !document.trusts_exactly(iam_user_arn, external_id) {
        warn!(role = role_name, "Trust document read back does not match what was written");
        return Err(ProvisionError::setup_incomplete(
            role_name,
            "trust document read back does not name the Snowflake IAM user and external id",
        ));
    }
    Ok(())
}
