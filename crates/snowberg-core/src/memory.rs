//! In-memory control planes
//!
//! [`MemoryCloud`] and [`MemoryWarehouse`] keep just enough state to behave
//! like S3/IAM and Snowflake for the calls the workflow makes, including the
//! error codes the real services return for name collisions. Both record
//! what they were asked to do so tests can assert on it.

use async_trait::async_trait;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::cloud::{
    AwsControlPlane, CallerIdentity, CloudError, CloudErrorKind, CloudResult, RoleInfo,
};
use crate::documents::PolicyDocument;
use crate::types::ObjectSummary;
use crate::warehouse::{ResultSet, WarehouseClient, WarehouseError};

pub const MEMORY_ACCOUNT_ID: &str = "123456789012";
pub const MEMORY_IAM_USER_ARN: &str = "arn:aws:iam::999999999999:user/sf-abc1-s";
pub const MEMORY_EXTERNAL_ID: &str = "AB12345_SFCRole=2_aBcDeFgHiJkLmNoP=";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A mutating call made against [`MemoryCloud`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloudCall {
    CreateBucket {
        bucket: String,
        location_constraint: Option<String>,
    },
    CreatePolicy {
        name: String,
    },
    CreateRole {
        name: String,
    },
    AttachRolePolicy {
        role: String,
        policy_arn: String,
    },
    UpdateAssumeRolePolicy {
        role: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryRole {
    pub arn: String,
    pub trust_document: String,
    pub attached: Vec<String>,
}

#[derive(Default)]
struct CloudState {
    /// bucket -> owning account
    buckets: BTreeMap<String, String>,
    /// buckets whose HEAD answers with a region-less redirect
    elsewhere: BTreeSet<String>,
    objects: BTreeMap<String, Vec<ObjectSummary>>,
    /// policy ARN -> document
    policies: BTreeMap<String, String>,
    roles: BTreeMap<String, MemoryRole>,
    calls: Vec<CloudCall>,
    /// operation name -> error returned by every call to it
    failures: BTreeMap<&'static str, CloudError>,
}

/// S3, IAM and STS for one AWS account
pub struct MemoryCloud {
    account_id: String,
    authenticated: bool,
    state: Mutex<CloudState>,
}

impl Default for MemoryCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCloud {
    pub fn new() -> Self {
        Self::with_account(MEMORY_ACCOUNT_ID)
    }

    pub fn with_account(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            authenticated: true,
            state: Mutex::default(),
        }
    }

    /// Every call fails as if no credentials were configured
    pub fn anonymous() -> Self {
        Self {
            authenticated: false,
            ..Self::new()
        }
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn add_bucket(&self, bucket: &str, owner: &str) {
        lock(&self.state)
            .buckets
            .insert(bucket.to_string(), owner.to_string());
    }

    /// A bucket in a region HEAD cannot reach; create still answers for it
    pub fn add_bucket_elsewhere(&self, bucket: &str, owner: &str) {
        let mut state = lock(&self.state);
        state.buckets.insert(bucket.to_string(), owner.to_string());
        state.elsewhere.insert(bucket.to_string());
    }

    pub fn add_object(&self, bucket: &str, key: &str, size: i64) {
        lock(&self.state)
            .objects
            .entry(bucket.to_string())
            .or_default()
            .push(ObjectSummary {
                key: key.to_string(),
                size,
            });
    }

    /// Pre-create a policy; returns its ARN
    pub fn add_policy(&self, name: &str, document: &str) -> String {
        let arn = self.policy_arn(name);
        lock(&self.state)
            .policies
            .insert(arn.clone(), document.to_string());
        arn
    }

    /// Make every call to `operation` (e.g. `"UpdateAssumeRolePolicy"`) fail
    pub fn fail_on(&self, operation: &'static str, kind: CloudErrorKind) {
        lock(&self.state).failures.insert(
            operation,
            CloudError::new(kind, operation, "injected failure"),
        );
    }

    pub fn bucket_owner(&self, bucket: &str) -> Option<String> {
        lock(&self.state).buckets.get(bucket).cloned()
    }

    pub fn role(&self, name: &str) -> Option<MemoryRole> {
        lock(&self.state).roles.get(name).cloned()
    }

    pub fn policy_count(&self) -> usize {
        lock(&self.state).policies.len()
    }

    pub fn calls(&self) -> Vec<CloudCall> {
        lock(&self.state).calls.clone()
    }

    pub fn clear_calls(&self) {
        lock(&self.state).calls.clear();
    }

    fn policy_arn(&self, name: &str) -> String {
        format!("arn:aws:iam::{}:policy/{}", self.account_id, name)
    }

    /// Credentials and injected failures are checked before any state is touched
    fn enter(&self, operation: &'static str) -> CloudResult<MutexGuard<'_, CloudState>> {
        if !self.authenticated {
            return Err(CloudError::new(
                CloudErrorKind::Authentication,
                operation,
                "Unable to locate credentials",
            )
            .with_code("InvalidClientTokenId"));
        }
        let state = lock(&self.state);
        if let Some(err) = state.failures.get(operation) {
            return Err(err.clone());
        }
        Ok(state)
    }
}

fn not_found(operation: &'static str, what: &str) -> CloudError {
    CloudError::new(
        CloudErrorKind::NotFound,
        operation,
        format!("{} cannot be found", what),
    )
    .with_code("NoSuchEntity")
}

fn check_document(operation: &'static str, document: &str) -> CloudResult<()> {
    PolicyDocument::from_json(document).map(|_| ()).map_err(|e| {
        CloudError::new(CloudErrorKind::Transient, operation, e.to_string())
            .with_code("MalformedPolicyDocument")
    })
}

#[async_trait]
impl AwsControlPlane for MemoryCloud {
    async fn caller_identity(&self) -> CloudResult<CallerIdentity> {
        self.enter("GetCallerIdentity")?;
        Ok(CallerIdentity {
            account: self.account_id.clone(),
            arn: format!("arn:aws:iam::{}:user/provisioner", self.account_id),
        })
    }

    async fn head_bucket(&self, bucket: &str, expected_owner: &str) -> CloudResult<()> {
        const OP: &str = "HeadBucket";
        let state = self.enter(OP)?;
        if state.elsewhere.contains(bucket) {
            return Err(CloudError::new(
                CloudErrorKind::WrongRegion,
                OP,
                "Moved Permanently",
            ));
        }
        match state.buckets.get(bucket) {
            None => Err(CloudError::new(CloudErrorKind::NotFound, OP, "Not Found")),
            Some(owner) if owner != expected_owner => {
                Err(CloudError::new(CloudErrorKind::AccessDenied, OP, "Forbidden"))
            }
            Some(_) => Ok(()),
        }
    }

    async fn create_bucket(
        &self,
        bucket: &str,
        location_constraint: Option<&str>,
    ) -> CloudResult<()> {
        const OP: &str = "CreateBucket";
        let mut state = self.enter(OP)?;
        state.calls.push(CloudCall::CreateBucket {
            bucket: bucket.to_string(),
            location_constraint: location_constraint.map(str::to_string),
        });

        if location_constraint == Some("us-east-1") {
            return Err(CloudError::new(
                CloudErrorKind::Transient,
                OP,
                "The specified location-constraint is not valid",
            )
            .with_code("InvalidLocationConstraint"));
        }

        match state.buckets.get(bucket) {
            Some(owner) if *owner == self.account_id => Err(CloudError::new(
                CloudErrorKind::AlreadyOwnedByCaller,
                OP,
                "Your previous request to create the named bucket succeeded and you already own it.",
            )
            .with_code("BucketAlreadyOwnedByYou")),
            Some(_) => Err(CloudError::new(
                CloudErrorKind::AlreadyExists,
                OP,
                "The requested bucket name is not available.",
            )
            .with_code("BucketAlreadyExists")),
            None => {
                state
                    .buckets
                    .insert(bucket.to_string(), self.account_id.clone());
                Ok(())
            }
        }
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        max_keys: i32,
    ) -> CloudResult<Vec<ObjectSummary>> {
        const OP: &str = "ListObjectsV2";
        let state = self.enter(OP)?;
        if !state.buckets.contains_key(bucket) {
            return Err(CloudError::new(
                CloudErrorKind::NotFound,
                OP,
                "The specified bucket does not exist",
            )
            .with_code("NoSuchBucket"));
        }
        Ok(state
            .objects
            .get(bucket)
            .into_iter()
            .flatten()
            .filter(|object| object.key.starts_with(prefix))
            .take(usize::try_from(max_keys).unwrap_or(0))
            .cloned()
            .collect())
    }

    async fn create_policy(&self, name: &str, document: &str) -> CloudResult<String> {
        const OP: &str = "CreatePolicy";
        let arn = self.policy_arn(name);
        let mut state = self.enter(OP)?;
        if state.policies.contains_key(&arn) {
            return Err(CloudError::new(
                CloudErrorKind::AlreadyExists,
                OP,
                format!("A policy called {} already exists.", name),
            )
            .with_code("EntityAlreadyExists"));
        }
        check_document(OP, document)?;
        state.calls.push(CloudCall::CreatePolicy {
            name: name.to_string(),
        });
        state.policies.insert(arn.clone(), document.to_string());
        Ok(arn)
    }

    async fn policy_document(&self, policy_arn: &str) -> CloudResult<String> {
        const OP: &str = "GetPolicyVersion";
        let state = self.enter(OP)?;
        state
            .policies
            .get(policy_arn)
            .cloned()
            .ok_or_else(|| not_found(OP, policy_arn))
    }

    async fn create_role(
        &self,
        name: &str,
        trust_document: &str,
        _description: &str,
    ) -> CloudResult<String> {
        const OP: &str = "CreateRole";
        let mut state = self.enter(OP)?;
        if state.roles.contains_key(name) {
            return Err(CloudError::new(
                CloudErrorKind::AlreadyExists,
                OP,
                format!("Role with name {} already exists.", name),
            )
            .with_code("EntityAlreadyExists"));
        }
        check_document(OP, trust_document)?;

        let arn = format!("arn:aws:iam::{}:role/{}", self.account_id, name);
        state.calls.push(CloudCall::CreateRole {
            name: name.to_string(),
        });
        state.roles.insert(
            name.to_string(),
            MemoryRole {
                arn: arn.clone(),
                trust_document: trust_document.to_string(),
                attached: Vec::new(),
            },
        );
        Ok(arn)
    }

    async fn get_role(&self, name: &str) -> CloudResult<RoleInfo> {
        const OP: &str = "GetRole";
        let state = self.enter(OP)?;
        let role = state
            .roles
            .get(name)
            .ok_or_else(|| not_found(OP, &format!("The role with name {}", name)))?;
        Ok(RoleInfo {
            arn: role.arn.clone(),
            trust_document: role.trust_document.clone(),
        })
    }

    async fn attached_role_policies(&self, role: &str) -> CloudResult<Vec<String>> {
        const OP: &str = "ListAttachedRolePolicies";
        let state = self.enter(OP)?;
        state
            .roles
            .get(role)
            .map(|r| r.attached.clone())
            .ok_or_else(|| not_found(OP, &format!("The role with name {}", role)))
    }

    async fn attach_role_policy(&self, role: &str, policy_arn: &str) -> CloudResult<()> {
        const OP: &str = "AttachRolePolicy";
        let mut state = self.enter(OP)?;
        if !state.policies.contains_key(policy_arn) {
            return Err(not_found(OP, &format!("Policy {}", policy_arn)));
        }
        state.calls.push(CloudCall::AttachRolePolicy {
            role: role.to_string(),
            policy_arn: policy_arn.to_string(),
        });
        let entry = state
            .roles
            .get_mut(role)
            .ok_or_else(|| not_found(OP, &format!("The role with name {}", role)))?;
        // IAM treats a repeated attach as a no-op
        if !entry.attached.iter().any(|a| a == policy_arn) {
            entry.attached.push(policy_arn.to_string());
        }
        Ok(())
    }

    async fn update_assume_role_policy(&self, role: &str, document: &str) -> CloudResult<()> {
        const OP: &str = "UpdateAssumeRolePolicy";
        let mut state = self.enter(OP)?;
        check_document(OP, document)?;
        state.calls.push(CloudCall::UpdateAssumeRolePolicy {
            role: role.to_string(),
        });
        let entry = state
            .roles
            .get_mut(role)
            .ok_or_else(|| not_found(OP, &format!("The role with name {}", role)))?;
        entry.trust_document = document.to_string();
        Ok(())
    }
}

/// How DESC EXTERNAL VOLUME reports the storage location
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DescribeShape {
    /// `STORAGE_LOCATION_1` holding one JSON object
    #[default]
    Indexed,
    /// `STORAGE_LOCATIONS` holding a JSON array
    Flat,
    /// No location property at all
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryVolume {
    pub name: String,
    pub base_url: String,
    pub role_arn: String,
    pub allow_writes: bool,
}

#[derive(Default)]
struct WarehouseState {
    volumes: BTreeMap<String, MemoryVolume>,
    tables: BTreeSet<String>,
    statements: Vec<String>,
    shape: DescribeShape,
    /// DESC calls left that answer without the location property
    hidden_describes: u32,
    /// statement prefix -> error
    failures: Vec<(String, WarehouseError)>,
}

/// A Snowflake account that understands the statements snowberg issues
pub struct MemoryWarehouse {
    iam_user_arn: String,
    external_id: String,
    state: Mutex<WarehouseState>,
}

impl Default for MemoryWarehouse {
    fn default() -> Self {
        Self::new(MEMORY_IAM_USER_ARN, MEMORY_EXTERNAL_ID)
    }
}

impl MemoryWarehouse {
    /// `iam_user_arn` and `external_id` are what DESC reports for every volume
    pub fn new(iam_user_arn: impl Into<String>, external_id: impl Into<String>) -> Self {
        Self {
            iam_user_arn: iam_user_arn.into(),
            external_id: external_id.into(),
            state: Mutex::default(),
        }
    }

    pub fn with_describe_shape(self, shape: DescribeShape) -> Self {
        lock(&self.state).shape = shape;
        self
    }

    /// The first `describes` DESC calls after creation omit the location
    pub fn with_propagation_delay(self, describes: u32) -> Self {
        lock(&self.state).hidden_describes = describes;
        self
    }

    /// Statements starting with `prefix` fail with `error`
    pub fn fail_on(&self, prefix: &str, error: WarehouseError) {
        lock(&self.state)
            .failures
            .push((prefix.to_string(), error));
    }

    pub fn iam_user_arn(&self) -> &str {
        &self.iam_user_arn
    }

    pub fn external_id(&self) -> &str {
        &self.external_id
    }

    pub fn statements(&self) -> Vec<String> {
        lock(&self.state).statements.clone()
    }

    pub fn volume(&self, name: &str) -> Option<MemoryVolume> {
        lock(&self.state)
            .volumes
            .get(&name.to_uppercase())
            .cloned()
    }

    pub fn tables(&self) -> Vec<String> {
        lock(&self.state).tables.iter().cloned().collect()
    }

    fn describe(
        &self,
        state: &mut WarehouseState,
        name: &str,
    ) -> Result<ResultSet, WarehouseError> {
        let volume = state.volumes.get(&name.to_uppercase()).cloned().ok_or_else(|| {
            WarehouseError::Statement {
                code: Some("002003".to_string()),
                sql_state: Some("02000".to_string()),
                message: format!(
                    "SQL compilation error:\nExternal volume '{}' does not exist or not authorized.",
                    name.to_uppercase()
                ),
            }
        })?;

        let mut rows = vec![row(
            "",
            "ALLOW_WRITES",
            "Boolean",
            &volume.allow_writes.to_string(),
        )];

        let shape = if state.hidden_describes > 0 {
            state.hidden_describes -= 1;
            DescribeShape::Missing
        } else {
            state.shape
        };

        let location = json!({
            "NAME": volume.name,
            "STORAGE_PROVIDER": "S3",
            "STORAGE_BASE_URL": volume.base_url,
            "STORAGE_ALLOWED_LOCATIONS": [format!("{}*", volume.base_url)],
            "STORAGE_AWS_ROLE_ARN": volume.role_arn,
            "STORAGE_AWS_IAM_USER_ARN": self.iam_user_arn,
            "STORAGE_AWS_EXTERNAL_ID": self.external_id,
            "ENCRYPTION_TYPE": "NONE",
        });
        match shape {
            DescribeShape::Indexed => rows.push(row(
                "STORAGE_LOCATIONS",
                "STORAGE_LOCATION_1",
                "String",
                &location.to_string(),
            )),
            DescribeShape::Flat => rows.push(row(
                "",
                "STORAGE_LOCATIONS",
                "List",
                &json!([location]).to_string(),
            )),
            DescribeShape::Missing => {}
        }
        rows.push(row("", "ACTIVE", "String", ""));

        Ok(ResultSet::new(
            ["parent_property", "property", "property_type", "property_value", "property_default"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            rows,
        ))
    }
}

fn row(parent: &str, property: &str, kind: &str, value: &str) -> Vec<Option<String>> {
    vec![
        Some(parent.to_string()),
        Some(property.to_string()),
        Some(kind.to_string()),
        Some(value.to_string()),
        Some(String::new()),
    ]
}

/// Identifier following `prefix` in `sql`
fn name_after<'a>(sql: &'a str, prefix: &str) -> Option<&'a str> {
    sql.get(prefix.len()..)?
        .split(|c: char| c.is_whitespace() || c == ';' || c == '(')
        .find(|token| !token.is_empty())
}

/// Single-quoted literal following `key =` in `sql`
fn literal_after(sql: &str, key: &str) -> Option<String> {
    let start = sql.find(key)? + key.len();
    let rest = sql[start..].trim_start().strip_prefix('=')?.trim_start();
    let rest = rest.strip_prefix('\'')?;
    let end = rest.find('\'')?;
    Some(rest[..end].to_string())
}

#[async_trait]
impl WarehouseClient for MemoryWarehouse {
    async fn execute(&self, sql: &str) -> Result<ResultSet, WarehouseError> {
        let mut state = lock(&self.state);
        state.statements.push(sql.to_string());

        let normalized = sql.trim();
        let upper = normalized.to_uppercase();
        if let Some((_, err)) = state
            .failures
            .iter()
            .find(|(prefix, _)| upper.starts_with(&prefix.to_uppercase()))
        {
            return Err(err.clone());
        }

        const CREATE_VOLUME: &str = "CREATE OR REPLACE EXTERNAL VOLUME ";
        const DESC_VOLUME: &str = "DESC EXTERNAL VOLUME ";
        const SHOW_VOLUMES: &str = "SHOW EXTERNAL VOLUMES LIKE ";
        const CREATE_TABLE: &str = "CREATE OR REPLACE ICEBERG TABLE ";

        if upper.starts_with(CREATE_VOLUME) {
            let name = name_after(normalized, CREATE_VOLUME)
                .ok_or_else(|| WarehouseError::Protocol("volume name missing".to_string()))?;
            let volume = MemoryVolume {
                name: name.to_uppercase(),
                base_url: literal_after(normalized, "STORAGE_BASE_URL").unwrap_or_default(),
                role_arn: literal_after(normalized, "STORAGE_AWS_ROLE_ARN").unwrap_or_default(),
                allow_writes: upper.contains("ALLOW_WRITES = TRUE"),
            };
            state.volumes.insert(volume.name.clone(), volume);
            return Ok(status_row(&format!(
                "External volume {} successfully created.",
                name.to_uppercase()
            )));
        }

        if upper.starts_with(DESC_VOLUME) {
            let name = name_after(normalized, DESC_VOLUME)
                .ok_or_else(|| WarehouseError::Protocol("volume name missing".to_string()))?
                .to_string();
            return self.describe(&mut state, &name);
        }

        if upper.starts_with(SHOW_VOLUMES) {
            let pattern = normalized[SHOW_VOLUMES.len()..]
                .trim_end_matches(';')
                .trim()
                .trim_matches('\'')
                .to_uppercase();
            let rows = state
                .volumes
                .values()
                .filter(|v| v.name == pattern)
                .map(|v| {
                    vec![
                        Some(v.name.clone()),
                        Some(v.allow_writes.to_string()),
                        None,
                    ]
                })
                .collect();
            return Ok(ResultSet::new(
                vec!["name".into(), "allow_writes".into(), "comment".into()],
                rows,
            ));
        }

        if upper.starts_with(CREATE_TABLE) {
            let table = name_after(normalized, CREATE_TABLE)
                .ok_or_else(|| WarehouseError::Protocol("table name missing".to_string()))?
                .to_uppercase();
            let volume = literal_after(normalized, "EXTERNAL_VOLUME").unwrap_or_default();
            if !state.volumes.contains_key(&volume.to_uppercase()) {
                return Err(WarehouseError::Statement {
                    code: Some("002003".to_string()),
                    sql_state: Some("02000".to_string()),
                    message: format!(
                        "SQL compilation error:\nExternal volume '{}' does not exist or not authorized.",
                        volume.to_uppercase()
                    ),
                });
            }
            state.tables.insert(table.clone());
            return Ok(status_row(&format!("Table {} successfully created.", table)));
        }

        Ok(ResultSet::default())
    }
}

fn status_row(message: &str) -> ResultSet {
    ResultSet::new(vec!["status".into()], vec![vec![Some(message.to_string())]])
}
