//! End-to-end provisioning runs against the in-memory control planes

use snowberg_core::documents::{access_policy, PolicyDocument};
use snowberg_core::memory::{
    CloudCall, DescribeShape, MemoryCloud, MemoryWarehouse, MEMORY_ACCOUNT_ID,
};
use snowberg_core::provision::{
    ensure_bucket, ensure_policy, ensure_role, reconcile_trust, resolve_identity,
};
use snowberg_core::{
    AwsRegion, BucketDescriptor, BucketStatus, CloudErrorKind, ErrorCode, ProvisionError,
    ResourceOutcome, RetryPolicy, ScopeDrift, Stage, StageObserver, VolumeStatus,
    WarehouseError, Workflow, WorkflowOptions, WorkflowRequest, WorkflowState,
};
use std::sync::Mutex;
use std::time::Duration;

fn request(bucket: &str) -> WorkflowRequest {
    WorkflowRequest {
        bucket: BucketDescriptor::new(bucket, AwsRegion::UsWest2),
        policy_name: "snowflake-iceberg-s3-access-policy".into(),
        role_name: "snowflake-iceberg-s3-access-role".into(),
        volume_name: "ICEBERG_EXTERNAL_VOLUME".into(),
        allow_writes: true,
    }
}

fn fast_options() -> WorkflowOptions {
    WorkflowOptions {
        extraction: RetryPolicy::new(3, Duration::ZERO, Duration::ZERO),
        ..WorkflowOptions::default()
    }
}

fn trust_of(cloud: &MemoryCloud, role: &str) -> PolicyDocument {
    let role = cloud.role(role).expect("role exists");
    PolicyDocument::from_json(&role.trust_document).expect("valid trust document")
}

fn placeholder_principal() -> String {
    format!("arn:aws:iam::{}:root", MEMORY_ACCOUNT_ID)
}

#[tokio::test]
async fn test_full_run_reconciles_trust() {
    let cloud = MemoryCloud::new();
    let warehouse = MemoryWarehouse::default();
    let request = request("demo-bkt");

    let report = Workflow::new(&cloud, &warehouse)
        .with_options(fast_options())
        .run(&request)
        .await
        .expect("workflow completes");

    assert_eq!(report.state, WorkflowState::TrustReconciled);
    assert_eq!(report.bucket_status, BucketStatus::Created);
    assert_eq!(report.policy.outcome, ResourceOutcome::Created);
    assert_eq!(report.role.outcome, ResourceOutcome::Created);
    assert!(report.role.newly_attached);
    assert_eq!(report.volume_status, VolumeStatus::Created);
    assert_eq!(report.credentials.iam_user_arn, warehouse.iam_user_arn());
    assert_eq!(report.credentials.external_id, warehouse.external_id());

    let trust = trust_of(&cloud, &request.role_name);
    assert!(trust.trusts_exactly(warehouse.iam_user_arn(), warehouse.external_id()));

    let volume = warehouse.volume(&request.volume_name).expect("volume defined");
    assert_eq!(volume.base_url, "s3://demo-bkt/");
    assert_eq!(volume.role_arn, report.role.arn);
    assert!(volume.allow_writes);

    let role = cloud.role(&request.role_name).unwrap();
    assert_eq!(role.attached, vec![report.policy.arn.clone()]);
}

#[tokio::test]
async fn test_second_run_creates_nothing() {
    let cloud = MemoryCloud::new();
    let warehouse = MemoryWarehouse::default();
    let request = request("demo-bkt");
    let workflow = Workflow::new(&cloud, &warehouse).with_options(fast_options());

    workflow.run(&request).await.expect("first run");
    cloud.clear_calls();

    let report = workflow.run(&request).await.expect("second run");
    assert_eq!(report.state, WorkflowState::TrustReconciled);
    assert!(report.reused_everything());
    assert_eq!(report.volume_status, VolumeStatus::Replaced);
    assert_eq!(
        cloud.calls(),
        vec![CloudCall::UpdateAssumeRolePolicy {
            role: request.role_name.clone()
        }]
    );
    assert_eq!(cloud.policy_count(), 1);
}

#[tokio::test]
async fn test_bucket_owned_by_caller_is_reused() {
    let cloud = MemoryCloud::new();
    cloud.add_bucket("demo-bkt", MEMORY_ACCOUNT_ID);
    let identity = resolve_identity(&cloud).await.unwrap();

    let bucket = BucketDescriptor::new("demo-bkt", AwsRegion::UsWest2);

    let status = ensure_bucket(&cloud, &identity, &bucket)
        .await
        .expect("owned bucket is fine");

    assert_eq!(status, BucketStatus::AlreadyOwned);
    assert!(cloud.calls().is_empty());
}

#[tokio::test]
async fn test_bucket_owned_by_another_account_is_conflict() {
    let cloud = MemoryCloud::new();
    cloud.add_bucket("demo-bkt", "210987654321");
    let warehouse = MemoryWarehouse::default();

    let failure = Workflow::new(&cloud, &warehouse)
        .run(&request("demo-bkt"))
        .await
        .expect_err("foreign bucket must halt the run");

    assert_eq!(failure.stage, Stage::Bucket);
    assert_eq!(failure.reached, WorkflowState::NotStarted);
    assert!(matches!(failure.error, ProvisionError::ResourceConflict { .. }));
    assert_eq!(failure.error.code(), ErrorCode::E102ResourceConflict);
    assert_eq!(cloud.bucket_owner("demo-bkt").as_deref(), Some("210987654321"));
    assert!(warehouse.statements().is_empty());
}

#[tokio::test]
async fn test_own_bucket_in_another_region_is_reused() {
    let cloud = MemoryCloud::new();
    cloud.add_bucket_elsewhere("demo-bkt", MEMORY_ACCOUNT_ID);
    let warehouse = MemoryWarehouse::default();

    let report = Workflow::new(&cloud, &warehouse)
        .with_options(fast_options())
        .run(&request("demo-bkt"))
        .await
        .expect("redirected HEAD is not fatal");

    assert_eq!(report.bucket_status, BucketStatus::AlreadyOwned);
    assert_eq!(report.state, WorkflowState::TrustReconciled);
    assert_eq!(cloud.bucket_owner("demo-bkt").as_deref(), Some(MEMORY_ACCOUNT_ID));
}

#[tokio::test]
async fn test_foreign_bucket_in_another_region_is_conflict() {
    let cloud = MemoryCloud::new();
    cloud.add_bucket_elsewhere("demo-bkt", "210987654321");
    let identity = resolve_identity(&cloud).await.unwrap();
    let bucket = BucketDescriptor::new("demo-bkt", AwsRegion::UsWest2);

    let err = ensure_bucket(&cloud, &identity, &bucket)
        .await
        .expect_err("someone else's bucket");

    assert_eq!(err.code(), ErrorCode::E102ResourceConflict);
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_location_constraint_only_outside_default_region() {
    for region in AwsRegion::ALL {
        let cloud = MemoryCloud::new();
        let identity = resolve_identity(&cloud).await.unwrap();
        let bucket = BucketDescriptor::new("region-check-bkt", region);

        let status = ensure_bucket(&cloud, &identity, &bucket).await.unwrap();
        assert_eq!(status, BucketStatus::Created);

        let expected = if region == AwsRegion::UsEast1 {
            None
        } else {
            Some(region.as_str().to_string())
        };
        assert_eq!(
            cloud.calls(),
            vec![CloudCall::CreateBucket {
                bucket: "region-check-bkt".into(),
                location_constraint: expected,
            }],
            "region {}",
            region
        );
    }
}

#[tokio::test]
async fn test_flat_and_indexed_describe_layouts_agree() {
    let mut extracted = Vec::new();
    for shape in [DescribeShape::Indexed, DescribeShape::Flat] {
        let cloud = MemoryCloud::new();
        let warehouse =
            MemoryWarehouse::new("arn:aws:iam::1:user/sf", "EXT123").with_describe_shape(shape);

        let report = Workflow::new(&cloud, &warehouse)
            .with_options(fast_options())
            .run(&request("demo-bkt"))
            .await
            .expect("both layouts are understood");
        extracted.push(report.credentials);
    }

    assert_eq!(extracted[0], extracted[1]);
    assert_eq!(extracted[0].iam_user_arn, "arn:aws:iam::1:user/sf");
    assert_eq!(extracted[0].external_id, "EXT123");
}

#[tokio::test]
async fn test_missing_location_skips_trust_update() {
    let cloud = MemoryCloud::new();
    let warehouse = MemoryWarehouse::default().with_describe_shape(DescribeShape::Missing);
    let request = request("demo-bkt");

    let failure = Workflow::new(&cloud, &warehouse)
        .with_options(fast_options())
        .run(&request)
        .await
        .expect_err("no location means no credentials");

    assert_eq!(failure.stage, Stage::Credentials);
    assert_eq!(failure.reached, WorkflowState::VolumeReady);
    assert_eq!(failure.error.code(), ErrorCode::E106CredentialExtraction);

    assert!(!cloud
        .calls()
        .iter()
        .any(|call| matches!(call, CloudCall::UpdateAssumeRolePolicy { .. })));
    let trust = trust_of(&cloud, &request.role_name);
    assert_eq!(
        trust.statement[0].principal.as_ref().unwrap().aws_values(),
        vec![placeholder_principal().as_str()]
    );

    let describes = warehouse
        .statements()
        .iter()
        .filter(|s| s.starts_with("DESC EXTERNAL VOLUME"))
        .count();
    assert_eq!(describes, 3);
}

#[tokio::test]
async fn test_trust_round_trip() {
    let cloud = MemoryCloud::new();
    let identity = resolve_identity(&cloud).await.unwrap();
    let policy_arn = cloud.add_policy("p1", &access_policy("aws", "demo-bkt").to_json().unwrap());
    ensure_role(&cloud, &identity, "role1", &policy_arn).await.unwrap();

    reconcile_trust(&cloud, "role1", "arn:aws:iam::1:user/sf", "EXT123")
        .await
        .unwrap();

    let trust = trust_of(&cloud, "role1");
    assert_eq!(trust.statement.len(), 1);
    assert!(trust.trusts_exactly("arn:aws:iam::1:user/sf", "EXT123"));
    let raw = cloud.role("role1").unwrap().trust_document;
    assert!(!raw.contains(&placeholder_principal()));
}

#[tokio::test]
async fn test_policy_for_another_bucket() {
    let cloud = MemoryCloud::new();
    let warehouse = MemoryWarehouse::default();
    let request = request("demo-bkt");
    cloud.add_policy(
        &request.policy_name,
        &access_policy("aws", "stale-bkt").to_json().unwrap(),
    );

    let failure = Workflow::new(&cloud, &warehouse)
        .with_options(fast_options())
        .run(&request)
        .await
        .expect_err("stale policy scope is rejected by default");
    assert_eq!(failure.stage, Stage::Policy);
    assert_eq!(failure.reached, WorkflowState::BucketReady);
    match &failure.error {
        ProvisionError::PolicyConflict { expected, found, .. } => {
            assert!(expected.contains(&"arn:aws:s3:::demo-bkt".to_string()));
            assert!(found.contains(&"arn:aws:s3:::stale-bkt".to_string()));
        }
        other => panic!("unexpected error: {other}"),
    }

    let lenient = WorkflowOptions {
        on_scope_drift: ScopeDrift::Warn,
        ..fast_options()
    };
    let report = Workflow::new(&cloud, &warehouse)
        .with_options(lenient)
        .run(&request)
        .await
        .expect("warn mode reuses the policy");
    assert_eq!(report.policy.outcome, ResourceOutcome::Reused);
}

#[tokio::test]
async fn test_single_statement_policy_without_version_is_reused() {
    let cloud = MemoryCloud::new();
    let identity = resolve_identity(&cloud).await.unwrap();
    cloud.add_policy(
        "hand-written",
        r#"{"Statement": {"Effect": "Allow", "Action": "s3:*",
            "Resource": ["arn:aws:s3:::demo-bkt", "arn:aws:s3:::demo-bkt/*"]}}"#,
    );

    let policy = ensure_policy(&cloud, &identity, "demo-bkt", "hand-written", ScopeDrift::Fail)
        .await
        .expect("same scope, different shape");

    assert_eq!(policy.outcome, ResourceOutcome::Reused);
}

#[tokio::test]
async fn test_narrower_hand_written_policy_is_drift() {
    let cloud = MemoryCloud::new();
    let identity = resolve_identity(&cloud).await.unwrap();
    cloud.add_policy(
        "hand-written",
        r#"{"Statement": {"Effect": "Allow", "Action": "s3:ListBucket",
            "Resource": "arn:aws:s3:::demo-bkt"}}"#,
    );

    let err = ensure_policy(&cloud, &identity, "demo-bkt", "hand-written", ScopeDrift::Fail)
        .await
        .expect_err("object ARN missing");
    assert_eq!(err.code(), ErrorCode::E104PolicyConflict);

    let policy = ensure_policy(&cloud, &identity, "demo-bkt", "hand-written", ScopeDrift::Warn)
        .await
        .expect("warn mode reuses it");
    assert_eq!(policy.outcome, ResourceOutcome::Reused);
}

#[tokio::test]
async fn test_unreadable_policy_is_drift() {
    let cloud = MemoryCloud::new();
    let identity = resolve_identity(&cloud).await.unwrap();
    cloud.add_policy("hand-written", "not json at all");

    let err = ensure_policy(&cloud, &identity, "demo-bkt", "hand-written", ScopeDrift::Fail)
        .await
        .expect_err("cannot confirm scope");
    match &err {
        ProvisionError::PolicyConflict { found, .. } => {
            assert!(found[0].starts_with("<unreadable document"));
        }
        other => panic!("unexpected error: {other}"),
    }

    let policy = ensure_policy(&cloud, &identity, "demo-bkt", "hand-written", ScopeDrift::Warn)
        .await
        .expect("warn mode reuses it");
    assert_eq!(policy.outcome, ResourceOutcome::Reused);
}

#[tokio::test]
async fn test_extraction_waits_for_propagation() {
    let cloud = MemoryCloud::new();
    let warehouse = MemoryWarehouse::default().with_propagation_delay(2);

    let report = Workflow::new(&cloud, &warehouse)
        .with_options(fast_options())
        .run(&request("demo-bkt"))
        .await
        .expect("location surfaces on the third describe");
    assert!(report.state.is_complete());

    let warehouse = MemoryWarehouse::default().with_propagation_delay(3);
    let failure = Workflow::new(&MemoryCloud::new(), &warehouse)
        .with_options(fast_options())
        .run(&request("demo-bkt"))
        .await
        .expect_err("retry budget is bounded");
    assert_eq!(failure.error.code(), ErrorCode::E106CredentialExtraction);
}

#[tokio::test]
async fn test_failed_trust_update_is_setup_incomplete() {
    let cloud = MemoryCloud::new();
    cloud.fail_on("UpdateAssumeRolePolicy", CloudErrorKind::Transient);
    let warehouse = MemoryWarehouse::default();

    let failure = Workflow::new(&cloud, &warehouse)
        .with_options(fast_options())
        .run(&request("demo-bkt"))
        .await
        .expect_err("trust update failure must not look like success");

    assert_eq!(failure.stage, Stage::Trust);
    assert_eq!(failure.reached, WorkflowState::CredentialsExtracted);
    assert_eq!(failure.error.code(), ErrorCode::E107SetupIncomplete);
    assert!(failure.error.to_string().contains("snowflake-iceberg-s3-access-role"));
}

#[tokio::test]
async fn test_rejected_volume_statement_is_verbatim() {
    let cloud = MemoryCloud::new();
    let warehouse = MemoryWarehouse::default();
    let engine_message =
        "SQL access control error:\nInsufficient privileges to operate on account 'XY12345'";
    warehouse.fail_on(
        "CREATE OR REPLACE EXTERNAL VOLUME",
        WarehouseError::Statement {
            code: Some("003001".into()),
            sql_state: Some("42501".into()),
            message: engine_message.into(),
        },
    );

    let failure = Workflow::new(&cloud, &warehouse)
        .run(&request("demo-bkt"))
        .await
        .expect_err("rejected statement halts the run");

    assert_eq!(failure.stage, Stage::Volume);
    assert_eq!(failure.reached, WorkflowState::RoleReady);
    assert_eq!(failure.error.code(), ErrorCode::E105WarehouseProvisioning);
    assert!(failure.error.to_string().contains(engine_message));
}

#[tokio::test]
async fn test_missing_credentials_fail_before_any_change() {
    let cloud = MemoryCloud::anonymous();
    let warehouse = MemoryWarehouse::default();

    let failure = Workflow::new(&cloud, &warehouse)
        .run(&request("demo-bkt"))
        .await
        .expect_err("no credentials");

    assert_eq!(failure.stage, Stage::Identity);
    assert_eq!(failure.error.code(), ErrorCode::E101Authentication);
    assert!(cloud.calls().is_empty());
}

#[tokio::test]
async fn test_invalid_request_is_rejected_up_front() {
    let cloud = MemoryCloud::new();
    let warehouse = MemoryWarehouse::default();

    let failure = Workflow::new(&cloud, &warehouse)
        .run(&request("Not_A_Bucket"))
        .await
        .expect_err("invalid bucket name");

    assert_eq!(failure.stage, Stage::Validation);
    assert_eq!(failure.error.code(), ErrorCode::E108InvalidRequest);
    assert!(cloud.calls().is_empty());
}

#[derive(Default)]
struct RecordingObserver {
    events: Mutex<Vec<String>>,
}

impl StageObserver for RecordingObserver {
    fn stage_started(&self, stage: Stage) {
        self.events.lock().unwrap().push(format!("start {:?}", stage));
    }

    fn stage_completed(&self, stage: Stage, _detail: &str) {
        self.events.lock().unwrap().push(format!("done {:?}", stage));
    }

    fn stage_failed(&self, stage: Stage, _error: &ProvisionError) {
        self.events.lock().unwrap().push(format!("fail {:?}", stage));
    }
}

#[tokio::test]
async fn test_observer_sees_stages_in_order() {
    let cloud = MemoryCloud::new();
    let warehouse = MemoryWarehouse::default();
    let observer = RecordingObserver::default();

    Workflow::new(&cloud, &warehouse)
        .with_observer(&observer)
        .run(&request("demo-bkt"))
        .await
        .unwrap();

    let expected: Vec<String> = Stage::ALL
        .iter()
        .flat_map(|stage| [format!("start {:?}", stage), format!("done {:?}", stage)])
        .collect();
    assert_eq!(*observer.events.lock().unwrap(), expected);
}
