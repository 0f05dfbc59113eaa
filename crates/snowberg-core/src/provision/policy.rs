use snowberg_config::ScopeDrift;
use std::collections::BTreeSet;
use tracing::{info, warn};

use crate::cloud::{AwsControlPlane, CloudErrorKind};
use crate::documents::{access_policy, PolicyDocument};
use crate::error::{ProvisionError, Result};
use crate::types::{CloudIdentity, ProvisionedPolicy, ResourceOutcome};

/// Create the bucket access policy, or reuse a policy of the same name.
///
/// A reused policy's resources are compared against the document built for
/// `bucket`; a mismatch means it was made for another bucket.
pub async fn ensure_policy(
    cloud: &dyn AwsControlPlane,
    identity: &CloudIdentity,
    bucket: &str,
    policy_name: &str,
    on_drift: ScopeDrift,
) -> Result<ProvisionedPolicy> {
    let document = access_policy(&identity.partition, bucket);
    let json = document
        .to_json()
        .map_err(|e| ProvisionError::provisioning("CreatePolicy", e.to_string()))?;

    match cloud.create_policy(policy_name, &json).await {
        Ok(arn) => {
            info!(policy_arn = %arn, "Created access policy");
            return Ok(ProvisionedPolicy {
                arn,
                outcome: ResourceOutcome::Created,
            });
        }
        Err(err) if err.is(CloudErrorKind::AlreadyExists) => {}
        Err(err) => return Err(err.into()),
    }

    let arn = identity.policy_arn(policy_name);
    let existing = cloud.policy_document(&arn).await?;

    // A document we cannot read is treated like one scoped elsewhere
    let expected = document.resources();
    let found = match PolicyDocument::from_json(&existing) {
        Ok(existing) => existing.resources(),
        Err(e) => BTreeSet::from([format!("<unreadable document: {}>", e)]),
    };
    if expected != found {
        let expected: Vec<String> = expected.into_iter().collect();
        let found: Vec<String> = found.into_iter().collect();
        match on_drift {
            ScopeDrift::Fail => return Err(ProvisionError::policy_conflict(arn, expected, found)),
            ScopeDrift::Warn => {
                warn!(
                    policy_arn = %arn,
                    ?expected,
                    ?found,
                    "Existing policy is scoped to other resources, reusing anyway"
                );
            }
        }
    }

    info!(policy_arn = %arn, "Access policy already exists, reusing");
    Ok(ProvisionedPolicy {
        arn,
        outcome: ResourceOutcome::Reused,
    })
}
