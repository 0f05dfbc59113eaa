use serde_json::Value;
use snowberg_config::is_identifier;
use tracing::{debug, info, warn};

use crate::error::{ExtractionFailure, ProvisionError, Result};
use crate::redact_secret;
use crate::retry::RetryPolicy;
use crate::types::ExtractedCredentials;
use crate::warehouse::{sql, ResultSet, WarehouseClient};

pub const IAM_USER_ARN_FIELD: &str = "STORAGE_AWS_IAM_USER_ARN";
pub const EXTERNAL_ID_FIELD: &str = "STORAGE_AWS_EXTERNAL_ID";

const NAME_COLUMNS: &[&str] = &["property", "property_name"];
const VALUE_COLUMNS: &[&str] = &["property_value"];
// Positions in the documented DESC layout, used when the columns are unnamed
const NAME_POSITION: usize = 1;
const VALUE_POSITION: usize = 3;

/// A property-name shape that can carry the storage location
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationKey {
    Exact(&'static str),
    /// `<prefix><n>`; the lowest `n` present wins
    Indexed(&'static str),
}

impl LocationKey {
    fn find<'a>(
        &self,
        properties: &[(&'a str, Option<&'a str>)],
    ) -> Option<(&'a str, Option<&'a str>)> {
        match self {
            LocationKey::Exact(key) => properties.iter().copied().find(|(name, _)| name == key),
            LocationKey::Indexed(prefix) => properties
                .iter()
                .copied()
                .filter_map(|(name, value)| {
                    let index: u32 = name.strip_prefix(prefix)?.parse().ok()?;
                    Some((index, (name, value)))
                })
                .min_by_key(|(index, _)| *index)
                .map(|(_, property)| property),
        }
    }
}

/// Shapes tried in order. New layouts go here.
pub const LOCATION_KEYS: &[LocationKey] = &[
    LocationKey::Exact("STORAGE_LOCATION_1"),
    LocationKey::Exact("STORAGE_LOCATIONS"),
    LocationKey::Indexed("STORAGE_LOCATION_"),
];

/// Pull the warehouse identity out of DESC EXTERNAL VOLUME rows
pub fn parse_credentials(
    rows: &ResultSet,
) -> std::result::Result<ExtractedCredentials, ExtractionFailure> {
    let name_idx = rows.column_index(NAME_COLUMNS).unwrap_or(NAME_POSITION);
    let value_idx = rows.column_index(VALUE_COLUMNS).unwrap_or(VALUE_POSITION);

    let properties: Vec<(&str, Option<&str>)> = rows
        .rows
        .iter()
        .filter_map(|row| {
            let name = row.get(name_idx)?.as_deref()?;
            let value = row.get(value_idx).and_then(|cell| cell.as_deref());
            Some((name, value))
        })
        .collect();

    let (property, value) = LOCATION_KEYS
        .iter()
        .find_map(|key| key.find(&properties))
        .ok_or_else(|| ExtractionFailure::PropertyMissing {
            seen: properties.iter().map(|(name, _)| name.to_string()).collect(),
        })?;

    let malformed = |reason: String| ExtractionFailure::MalformedValue {
        property: property.to_string(),
        reason,
    };
    let raw = value.ok_or_else(|| malformed("value is NULL".to_string()))?;
    let parsed: Value = serde_json::from_str(raw).map_err(|e| malformed(e.to_string()))?;

    let location = match parsed {
        Value::Object(location) => location,
        Value::Array(entries) => match entries.into_iter().next() {
            Some(Value::Object(location)) => location,
            Some(other) => return Err(malformed(format!("first location is {}", kind_of(&other)))),
            None => {
                return Err(ExtractionFailure::NoLocations {
                    property: property.to_string(),
                })
            }
        },
        other => return Err(malformed(format!("value is {}", kind_of(&other)))),
    };

    let field = |name: &str| {
        location
            .get(name)
            .and_then(Value::as_str)
            .filter(|v| !v.trim().is_empty())
            .map(str::to_string)
            .ok_or_else(|| ExtractionFailure::FieldMissing {
                property: property.to_string(),
                field: name.to_string(),
            })
    };

    Ok(ExtractedCredentials {
        iam_user_arn: field(IAM_USER_ARN_FIELD)?,
        external_id: field(EXTERNAL_ID_FIELD)?,
    })
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// DESC the volume and parse its storage location. A missing property is
/// retried under `retry` in case the location has not surfaced yet; every
/// other failure is returned at once.
pub async fn extract_credentials(
    warehouse: &dyn WarehouseClient,
    volume_name: &str,
    retry: &RetryPolicy,
) -> Result<ExtractedCredentials> {
    if !is_identifier(volume_name) {
        return Err(ProvisionError::invalid_request(format!(
            "external volume name '{}' is not a valid identifier",
            volume_name
        )));
    }
    let statement = sql::describe_external_volume(volume_name);
    let mut attempt = 1;

    loop {
        let rows = warehouse
            .execute(&statement)
            .await
            .map_err(|e| e.into_provision(&format!("DESC EXTERNAL VOLUME {}", volume_name)))?;

        match parse_credentials(&rows) {
            Ok(credentials) => {
                info!(
                    volume = volume_name,
                    iam_user_arn = %credentials.iam_user_arn,
                    external_id = %redact_secret(&credentials.external_id),
                    "Extracted storage credentials"
                );
                return Ok(credentials);
            }
            Err(failure) if failure.is_transient() && attempt < retry.max_attempts => {
                let delay = retry.delay_after(attempt);
                warn!(
                    volume = volume_name,
                    attempt,
                    ?delay,
                    %failure,
                    "Storage location not visible yet, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(failure) => {
                debug!(volume = volume_name, attempt, "Giving up on credential extraction");
                return Err(ProvisionError::credential_extraction(volume_name, failure));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCATION: &str =
        r#"{"NAME":"vol","STORAGE_PROVIDER":"S3","STORAGE_AWS_IAM_USER_ARN":"X","STORAGE_AWS_EXTERNAL_ID":"Y"}"#;

    fn desc(rows: &[(&str, Option<&str>)]) -> ResultSet {
        ResultSet::new(
            vec![
                "parent_property".into(),
                "property".into(),
                "property_type".into(),
                "property_value".into(),
                "property_default".into(),
            ],
            rows.iter()
                .map(|(name, value)| {
                    vec![
                        Some(String::new()),
                        Some(name.to_string()),
                        Some("String".into()),
                        value.map(str::to_string),
                        None,
                    ]
                })
                .collect(),
        )
    }

    fn expected() -> ExtractedCredentials {
        ExtractedCredentials {
            iam_user_arn: "X".into(),
            external_id: "Y".into(),
        }
    }

    #[test]
    fn test_flat_key_with_array_value() {
        let array = format!("[{}]", LOCATION);
        let rows = desc(&[
            ("ALLOW_WRITES", Some("true")),
            ("STORAGE_LOCATIONS", Some(array.as_str())),
        ]);
        assert_eq!(parse_credentials(&rows).unwrap(), expected());
    }

    #[test]
    fn test_indexed_key_with_object_value() {
        let rows = desc(&[("STORAGE_LOCATION_1", Some(LOCATION)), ("ACTIVE", Some(""))]);
        assert_eq!(parse_credentials(&rows).unwrap(), expected());
    }

    #[test]
    fn test_lowest_unknown_index_wins() {
        let other = LOCATION.replace("\"X\"", "\"Z\"");
        let rows = desc(&[
            ("STORAGE_LOCATION_3", Some(other.as_str())),
            ("STORAGE_LOCATION_2", Some(LOCATION)),
        ]);
        assert_eq!(parse_credentials(&rows).unwrap(), expected());
    }

    #[test]
    fn test_exact_key_outranks_flat_key() {
        let decoy = format!("[{}]", LOCATION.replace("\"Y\"", "\"decoy\""));
        let rows = desc(&[
            ("STORAGE_LOCATIONS", Some(decoy.as_str())),
            ("STORAGE_LOCATION_1", Some(LOCATION)),
        ]);
        assert_eq!(parse_credentials(&rows).unwrap(), expected());
    }

    #[test]
    fn test_columns_found_by_name() {
        let rows = ResultSet::new(
            vec!["property_value".into(), "property_name".into()],
            vec![vec![Some(LOCATION.into()), Some("STORAGE_LOCATION_1".into())]],
        );
        assert_eq!(parse_credentials(&rows).unwrap(), expected());
    }

    #[test]
    fn test_missing_property_lists_what_was_seen() {
        let rows = desc(&[("ALLOW_WRITES", Some("true")), ("COMMENT", None)]);
        let failure = parse_credentials(&rows).unwrap_err();
        assert_eq!(
            failure,
            ExtractionFailure::PropertyMissing {
                seen: vec!["ALLOW_WRITES".into(), "COMMENT".into()]
            }
        );
        assert!(failure.is_transient());
    }

    #[test]
    fn test_distinguishable_failures() {
        let rows = desc(&[("STORAGE_LOCATION_1", Some("not json"))]);
        assert!(matches!(
            parse_credentials(&rows),
            Err(ExtractionFailure::MalformedValue { .. })
        ));

        let rows = desc(&[("STORAGE_LOCATIONS", Some("[]"))]);
        assert!(matches!(
            parse_credentials(&rows),
            Err(ExtractionFailure::NoLocations { .. })
        ));

        let rows = desc(&[("STORAGE_LOCATION_1", Some(r#"{"STORAGE_AWS_IAM_USER_ARN":"X"}"#))]);
        assert_eq!(
            parse_credentials(&rows).unwrap_err(),
            ExtractionFailure::FieldMissing {
                property: "STORAGE_LOCATION_1".into(),
                field: EXTERNAL_ID_FIELD.into(),
            }
        );

        let rows = desc(&[("STORAGE_LOCATION_1", None)]);
        assert!(!parse_credentials(&rows).unwrap_err().is_transient());
    }

    #[tokio::test]
    async fn test_volume_name_checked_before_describe() {
        let warehouse = crate::memory::MemoryWarehouse::default();
        let retry = RetryPolicy::new(1, std::time::Duration::ZERO, std::time::Duration::ZERO);

        let err = extract_credentials(&warehouse, "V; DROP DATABASE PROD", &retry)
            .await
            .expect_err("not an identifier");

        assert_eq!(err.code(), crate::error::ErrorCode::E108InvalidRequest);
        assert!(warehouse.statements().is_empty());
    }
}
