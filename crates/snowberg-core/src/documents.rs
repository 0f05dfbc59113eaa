//! IAM policy documents: the bucket access policy and both generations of the
//! role trust policy

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub const POLICY_VERSION: &str = "2012-10-17";
pub const ASSUME_ROLE_ACTION: &str = "sts:AssumeRole";
pub const EXTERNAL_ID_CONDITION_KEY: &str = "sts:ExternalId";

const OBJECT_ACTIONS: [&str; 5] = [
    "s3:PutObject",
    "s3:GetObject",
    "s3:GetObjectVersion",
    "s3:DeleteObject",
    "s3:DeleteObjectVersion",
];

const BUCKET_ACTIONS: [&str; 2] = ["s3:ListBucket", "s3:GetBucketLocation"];

/// A string or a list of strings; IAM accepts both wherever a list is allowed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn values(&self) -> Vec<&str> {
        match self {
            OneOrMany::One(value) => vec![value.as_str()],
            OneOrMany::Many(values) => values.iter().map(String::as_str).collect(),
        }
    }

    fn many(values: &[&str]) -> Self {
        OneOrMany::Many(values.iter().map(|v| v.to_string()).collect())
    }
}

/// `"*"` or a map such as `{"AWS": "arn:..."}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Principal {
    Any(String),
    Map(BTreeMap<String, OneOrMany>),
}

impl Principal {
    fn aws(arn: impl Into<String>) -> Self {
        Principal::Map(BTreeMap::from([(
            "AWS".to_string(),
            OneOrMany::One(arn.into()),
        )]))
    }

    pub fn aws_values(&self) -> Vec<&str> {
        match self {
            Principal::Any(value) => vec![value.as_str()],
            Principal::Map(map) => map.get("AWS").map(OneOrMany::values).unwrap_or_default(),
        }
    }
}

/// Condition operator -> condition key -> values
pub type Condition = BTreeMap<String, BTreeMap<String, OneOrMany>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Statement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    pub effect: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<Principal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<OneOrMany>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_action: Option<OneOrMany>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<OneOrMany>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_resource: Option<OneOrMany>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    /// Optional in IAM; documents we write always carry it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(deserialize_with = "one_or_many_statements")]
    pub statement: Vec<Statement>,
}

/// IAM accepts a lone statement object in place of a list
fn one_or_many_statements<'de, D>(deserializer: D) -> Result<Vec<Statement>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Statements {
        One(Box<Statement>),
        Many(Vec<Statement>),
    }

    Ok(match Statements::deserialize(deserializer)? {
        Statements::One(statement) => vec![*statement],
        Statements::Many(statements) => statements,
    })
}

impl PolicyDocument {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Every resource ARN the document names. `NotResource` entries are
    /// kept with a `!` prefix so they never match a plain resource.
    pub fn resources(&self) -> BTreeSet<String> {
        let resources = self
            .statement
            .iter()
            .filter_map(|s| s.resource.as_ref())
            .flat_map(|r| r.values())
            .map(str::to_string);
        let excluded = self
            .statement
            .iter()
            .filter_map(|s| s.not_resource.as_ref())
            .flat_map(|r| r.values())
            .map(|r| format!("!{}", r));
        resources.chain(excluded).collect()
    }

    /// True when the document is a final-generation trust policy: exactly one
    /// statement letting `principal_arn` assume the role with `external_id`
    pub fn trusts_exactly(&self, principal_arn: &str, external_id: &str) -> bool {
        let [statement] = self.statement.as_slice() else {
            return false;
        };
        let principal_ok = statement
            .principal
            .as_ref()
            .is_some_and(|p| p.aws_values() == [principal_arn]);
        let external_id_ok = statement
            .condition
            .as_ref()
            .and_then(|c| c.get("StringEquals"))
            .and_then(|keys| keys.get(EXTERNAL_ID_CONDITION_KEY))
            .is_some_and(|values| values.values() == [external_id]);

        statement.effect == "Allow"
            && statement
                .action
                .as_ref()
                .is_some_and(|a| a.values() == [ASSUME_ROLE_ACTION])
            && principal_ok
            && external_id_ok
    }
}

pub fn bucket_arn(partition: &str, bucket: &str) -> String {
    format!("arn:{}:s3:::{}", partition, bucket)
}

/// Read/write access to one bucket: object actions on `bucket/*`, list and
/// location on the bucket itself
pub fn access_policy(partition: &str, bucket: &str) -> PolicyDocument {
    let bucket_arn = bucket_arn(partition, bucket);
    let prefix_condition = Condition::from([(
        "StringLike".to_string(),
        BTreeMap::from([("s3:prefix".to_string(), OneOrMany::many(&["*"]))]),
    )]);

    PolicyDocument {
        version: Some(POLICY_VERSION.to_string()),
        statement: vec![
            Statement {
                sid: None,
                effect: "Allow".to_string(),
                principal: None,
                action: Some(OneOrMany::many(&OBJECT_ACTIONS)),
                not_action: None,
                resource: Some(OneOrMany::One(format!("{}/*", bucket_arn))),
                not_resource: None,
                condition: None,
            },
            Statement {
                sid: None,
                effect: "Allow".to_string(),
                principal: None,
                action: Some(OneOrMany::many(&BUCKET_ACTIONS)),
                not_action: None,
                resource: Some(OneOrMany::One(bucket_arn)),
                not_resource: None,
                condition: Some(prefix_condition),
            },
        ],
    }
}

/// Generation 1: the role trusts the caller's own account. IAM rejects a role
/// without a valid principal, and Snowflake's identity does not exist yet.
pub fn placeholder_trust(root_principal: &str) -> PolicyDocument {
    PolicyDocument {
        version: Some(POLICY_VERSION.to_string()),
        statement: vec![Statement {
            sid: None,
            effect: "Allow".to_string(),
            principal: Some(Principal::aws(root_principal)),
            action: Some(OneOrMany::One(ASSUME_ROLE_ACTION.to_string())),
            not_action: None,
            resource: None,
            not_resource: None,
            condition: None,
        }],
    }
}

/// Generation 2: only Snowflake's IAM user, and only with the external id
pub fn warehouse_trust(iam_user_arn: &str, external_id: &str) -> PolicyDocument {
    let condition = Condition::from([(
        "StringEquals".to_string(),
        BTreeMap::from([(
            EXTERNAL_ID_CONDITION_KEY.to_string(),
            OneOrMany::One(external_id.to_string()),
        )]),
    )]);

    PolicyDocument {
        version: Some(POLICY_VERSION.to_string()),
        statement: vec![Statement {
            sid: None,
            effect: "Allow".to_string(),
            principal: Some(Principal::aws(iam_user_arn)),
            action: Some(OneOrMany::One(ASSUME_ROLE_ACTION.to_string())),
            not_action: None,
            resource: None,
            not_resource: None,
            condition: Some(condition),
        }],
    }
}
