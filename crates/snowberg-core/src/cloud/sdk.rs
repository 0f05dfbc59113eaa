//! AWS SDK implementation of [`AwsControlPlane`]

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use snowberg_config::AwsRegion;
use tracing::debug;

use super::{AwsControlPlane, CallerIdentity, CloudError, CloudErrorKind, CloudResult, RoleInfo};
use crate::types::ObjectSummary;

const AUTH_CODES: &[&str] = &[
    "InvalidClientTokenId",
    "InvalidAccessKeyId",
    "ExpiredToken",
    "ExpiredTokenException",
    "SignatureDoesNotMatch",
    "UnrecognizedClientException",
    "AuthFailure",
    "InvalidToken",
];

const BUCKET_REGION_HEADER: &str = "x-amz-bucket-region";

pub struct AwsSdkControlPlane {
    s3: aws_sdk_s3::Client,
    iam: aws_sdk_iam::Client,
    sts: aws_sdk_sts::Client,
}

impl AwsSdkControlPlane {
    /// Loads credentials from the default provider chain (environment,
    /// shared config/credentials files, SSO, instance metadata)
    pub async fn from_env(region: AwsRegion, profile: Option<&str>) -> Self {
        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(region.as_str()));
        if let Some(profile) = profile {
            debug!(profile, "Using AWS profile");
            loader = loader.profile_name(profile);
        }
        let config = loader.load().await;

        Self {
            s3: aws_sdk_s3::Client::new(&config),
            iam: aws_sdk_iam::Client::new(&config),
            sts: aws_sdk_sts::Client::new(&config),
        }
    }
}

/// Map an SDK failure onto [`CloudErrorKind`]
fn classify<E>(operation: &'static str, err: SdkError<E, HttpResponse>) -> CloudError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let code = err.code().map(str::to_string);
    let status = err.raw_response().map(|r| r.status().as_u16());
    let message = err
        .message()
        .map(str::to_string)
        .unwrap_or_else(|| DisplayErrorContext(&err).to_string());

    let kind = kind_for(code.as_deref(), status, &message);
    let mut cloud_error = CloudError::new(kind, operation, message);
    cloud_error.code = code;
    cloud_error
}

/// The service error code decides first, then the HTTP status (HEAD
/// responses carry no body, so no code)
fn kind_for(code: Option<&str>, status: Option<u16>, message: &str) -> CloudErrorKind {
    match code {
        Some(c) if AUTH_CODES.contains(&c) => CloudErrorKind::Authentication,
        Some("AccessDenied" | "AccessDeniedException") => CloudErrorKind::AccessDenied,
        Some("EntityAlreadyExists" | "BucketAlreadyExists") => CloudErrorKind::AlreadyExists,
        Some("BucketAlreadyOwnedByYou") => CloudErrorKind::AlreadyOwnedByCaller,
        Some("NoSuchEntity" | "NoSuchBucket" | "NotFound") => CloudErrorKind::NotFound,
        Some("PermanentRedirect") => CloudErrorKind::WrongRegion,
        _ => match status {
            Some(301) => CloudErrorKind::WrongRegion,
            Some(401) => CloudErrorKind::Authentication,
            Some(403) => CloudErrorKind::AccessDenied,
            Some(404) => CloudErrorKind::NotFound,
            // No response at all: credential resolution or the network failed
            None if message.to_lowercase().contains("credentials") => {
                CloudErrorKind::Authentication
            }
            _ => CloudErrorKind::Transient,
        },
    }
}

/// Region S3 names in a wrong-region redirect, if it sent one
fn redirect_region<E>(err: &SdkError<E, HttpResponse>) -> Option<String> {
    let response = err.raw_response()?;
    region_from_redirect(
        response.status().as_u16(),
        response.headers().get(BUCKET_REGION_HEADER),
    )
}

/// S3 also sends the header on a 400 for SigV4 region mismatches
fn region_from_redirect(status: u16, region_header: Option<&str>) -> Option<String> {
    match (status, region_header) {
        (301 | 400, Some(region)) if !region.is_empty() => Some(region.to_string()),
        _ => None,
    }
}

/// Per-request override sending one call to the bucket's own region
fn in_region(region: String) -> aws_sdk_s3::config::Builder {
    aws_sdk_s3::config::Builder::default().region(Region::new(region))
}

fn decode_document(operation: &'static str, encoded: &str) -> CloudResult<String> {
    urlencoding::decode(encoded)
        .map(|doc| doc.into_owned())
        .map_err(|e| {
            CloudError::new(
                CloudErrorKind::Transient,
                operation,
                format!("policy document is not valid URL-encoded UTF-8: {}", e),
            )
        })
}

fn missing(operation: &'static str, field: &str) -> CloudError {
    CloudError::new(
        CloudErrorKind::Transient,
        operation,
        format!("response is missing {}", field),
    )
}

#[async_trait]
impl AwsControlPlane for AwsSdkControlPlane {
    async fn caller_identity(&self) -> CloudResult<CallerIdentity> {
        const OP: &str = "GetCallerIdentity";
        let out = self
            .sts
            .get_caller_identity()
            .send()
            .await
            .map_err(|e| classify(OP, e))?;

        Ok(CallerIdentity {
            account: out
                .account()
                .map(str::to_string)
                .ok_or_else(|| missing(OP, "Account"))?,
            arn: out
                .arn()
                .map(str::to_string)
                .ok_or_else(|| missing(OP, "Arn"))?,
        })
    }

    async fn head_bucket(&self, bucket: &str, expected_owner: &str) -> CloudResult<()> {
        const OP: &str = "HeadBucket";
        let request = self
            .s3
            .head_bucket()
            .bucket(bucket)
            .expected_bucket_owner(expected_owner);

        let err = match request.clone().send().await {
            Ok(_) => return Ok(()),
            Err(err) => err,
        };
        let Some(region) = redirect_region(&err) else {
            return Err(classify(OP, err));
        };

        debug!(bucket, %region, "Bucket is in another region, checking there");
        request
            .customize()
            .config_override(in_region(region))
            .send()
            .await
            .map_err(|e| classify(OP, e))?;
        Ok(())
    }

    async fn create_bucket(
        &self,
        bucket: &str,
        location_constraint: Option<&str>,
    ) -> CloudResult<()> {
        let mut request = self.s3.create_bucket().bucket(bucket);
        if let Some(constraint) = location_constraint {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(constraint))
                    .build(),
            );
        }
        request
            .send()
            .await
            .map_err(|e| classify("CreateBucket", e))?;
        Ok(())
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        max_keys: i32,
    ) -> CloudResult<Vec<ObjectSummary>> {
        const OP: &str = "ListObjectsV2";
        let request = self
            .s3
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .max_keys(max_keys);

        let out = match request.clone().send().await {
            Ok(out) => out,
            Err(err) => match redirect_region(&err) {
                Some(region) => {
                    debug!(bucket, %region, "Bucket is in another region, listing there");
                    request
                        .customize()
                        .config_override(in_region(region))
                        .send()
                        .await
                        .map_err(|e| classify(OP, e))?
                }
                None => return Err(classify(OP, err)),
            },
        };

        Ok(out
            .contents()
            .iter()
            .map(|object| ObjectSummary {
                key: object.key().unwrap_or_default().to_string(),
                size: object.size().unwrap_or_default(),
            })
            .collect())
    }

    async fn create_policy(&self, name: &str, document: &str) -> CloudResult<String> {
        const OP: &str = "CreatePolicy";
        let out = self
            .iam
            .create_policy()
            .policy_name(name)
            .policy_document(document)
            .description("Snowflake external volume access to one S3 bucket")
            .send()
            .await
            .map_err(|e| classify(OP, e))?;

        out.policy()
            .and_then(|policy| policy.arn())
            .map(str::to_string)
            .ok_or_else(|| missing(OP, "Policy.Arn"))
    }

    async fn policy_document(&self, policy_arn: &str) -> CloudResult<String> {
        const OP: &str = "GetPolicyVersion";
        let policy = self
            .iam
            .get_policy()
            .policy_arn(policy_arn)
            .send()
            .await
            .map_err(|e| classify("GetPolicy", e))?;
        let version_id = policy
            .policy()
            .and_then(|p| p.default_version_id())
            .ok_or_else(|| missing("GetPolicy", "Policy.DefaultVersionId"))?;

        let version = self
            .iam
            .get_policy_version()
            .policy_arn(policy_arn)
            .version_id(version_id)
            .send()
            .await
            .map_err(|e| classify(OP, e))?;
        let encoded = version
            .policy_version()
            .and_then(|v| v.document())
            .ok_or_else(|| missing(OP, "PolicyVersion.Document"))?;

        decode_document(OP, encoded)
    }

    async fn create_role(
        &self,
        name: &str,
        trust_document: &str,
        description: &str,
    ) -> CloudResult<String> {
        const OP: &str = "CreateRole";
        let out = self
            .iam
            .create_role()
            .role_name(name)
            .assume_role_policy_document(trust_document)
            .description(description)
            .send()
            .await
            .map_err(|e| classify(OP, e))?;

        out.role()
            .map(|role| role.arn().to_string())
            .ok_or_else(|| missing(OP, "Role"))
    }

    async fn get_role(&self, name: &str) -> CloudResult<RoleInfo> {
        const OP: &str = "GetRole";
        let out = self
            .iam
            .get_role()
            .role_name(name)
            .send()
            .await
            .map_err(|e| classify(OP, e))?;
        let role = out.role().ok_or_else(|| missing(OP, "Role"))?;
        let trust_document = match role.assume_role_policy_document() {
            Some(encoded) => decode_document(OP, encoded)?,
            None => return Err(missing(OP, "Role.AssumeRolePolicyDocument")),
        };

        Ok(RoleInfo {
            arn: role.arn().to_string(),
            trust_document,
        })
    }

    async fn attached_role_policies(&self, role: &str) -> CloudResult<Vec<String>> {
        let mut arns = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let out = self
                .iam
                .list_attached_role_policies()
                .role_name(role)
                .set_marker(marker.take())
                .send()
                .await
                .map_err(|e| classify("ListAttachedRolePolicies", e))?;

            arns.extend(
                out.attached_policies()
                    .iter()
                    .filter_map(|p| p.policy_arn())
                    .map(str::to_string),
            );

            match (out.is_truncated(), out.marker()) {
                (true, Some(next)) => marker = Some(next.to_string()),
                _ => break,
            }
        }

        Ok(arns)
    }

    async fn attach_role_policy(&self, role: &str, policy_arn: &str) -> CloudResult<()> {
        self.iam
            .attach_role_policy()
            .role_name(role)
            .policy_arn(policy_arn)
            .send()
            .await
            .map_err(|e| classify("AttachRolePolicy", e))?;
        Ok(())
    }

    async fn update_assume_role_policy(&self, role: &str, document: &str) -> CloudResult<()> {
        self.iam
            .update_assume_role_policy()
            .role_name(role)
            .policy_document(document)
            .send()
            .await
            .map_err(|e| classify("UpdateAssumeRolePolicy", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_document() {
        let decoded = decode_document(
            "GetRole",
            "%7B%22Version%22%3A%222012-10-17%22%2C%22Statement%22%3A%5B%5D%7D",
        )
        .unwrap();
        assert_eq!(decoded, r#"{"Version":"2012-10-17","Statement":[]}"#);
    }

    #[test]
    fn test_error_codes_win_over_status() {
        assert_eq!(
            kind_for(Some("ExpiredToken"), Some(403), ""),
            CloudErrorKind::Authentication
        );
        assert_eq!(
            kind_for(Some("AccessDenied"), Some(403), ""),
            CloudErrorKind::AccessDenied
        );
        assert_eq!(
            kind_for(Some("BucketAlreadyOwnedByYou"), Some(409), ""),
            CloudErrorKind::AlreadyOwnedByCaller
        );
    }

    #[test]
    fn test_redirects_are_wrong_region() {
        assert_eq!(kind_for(None, Some(301), ""), CloudErrorKind::WrongRegion);
        assert_eq!(
            kind_for(Some("PermanentRedirect"), Some(301), ""),
            CloudErrorKind::WrongRegion
        );
    }

    #[test]
    fn test_redirect_region_header() {
        assert_eq!(
            region_from_redirect(301, Some("eu-west-1")).as_deref(),
            Some("eu-west-1")
        );
        assert_eq!(
            region_from_redirect(400, Some("ap-southeast-2")).as_deref(),
            Some("ap-southeast-2")
        );
        assert_eq!(region_from_redirect(301, None), None);
        assert_eq!(region_from_redirect(301, Some("")), None);
        assert_eq!(region_from_redirect(403, Some("eu-west-1")), None);
    }

    #[test]
    fn test_bodiless_statuses() {
        assert_eq!(kind_for(None, Some(403), ""), CloudErrorKind::AccessDenied);
        assert_eq!(kind_for(None, Some(404), ""), CloudErrorKind::NotFound);
        assert_eq!(kind_for(None, Some(503), ""), CloudErrorKind::Transient);
        assert_eq!(
            kind_for(None, None, "failed to load credentials from the chain"),
            CloudErrorKind::Authentication
        );
        assert_eq!(kind_for(None, None, "dispatch failure"), CloudErrorKind::Transient);
    }
}
