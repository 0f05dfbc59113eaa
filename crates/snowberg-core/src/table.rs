//! Snowflake-managed Iceberg tables on a provisioned external volume

use snowberg_config::is_identifier;
use std::fmt;
use std::str::FromStr;
use tracing::{info, warn};

use crate::cloud::AwsControlPlane;
use crate::error::{ProvisionError, Result};
use crate::types::ObjectSummary;
use crate::warehouse::{sql::string_literal, WarehouseClient};

/// Column types offered for Iceberg tables. Parameterised forms such as
/// `DECIMAL(10,2)` are accepted by their base name.
pub const SUPPORTED_TYPES: &[&str] = &[
    "VARCHAR",
    "STRING",
    "TEXT",
    "INTEGER",
    "BIGINT",
    "SMALLINT",
    "TINYINT",
    "DECIMAL",
    "NUMERIC",
    "DOUBLE",
    "FLOAT",
    "REAL",
    "BOOLEAN",
    "DATE",
    "TIME",
    "DATETIME",
    "TIMESTAMP",
    "TIMESTAMP_LTZ",
    "TIMESTAMP_NTZ",
    "TIMESTAMP_TZ",
    "BINARY",
    "VARBINARY",
    "VARIANT",
    "OBJECT",
    "ARRAY",
];

/// Objects listed when checking a new table's storage
pub const VERIFY_MAX_KEYS: i32 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    /// Upper-cased
    pub name: String,
    pub data_type: String,
}

impl ColumnDef {
    pub fn new(name: &str, data_type: &str) -> Result<Self> {
        let name = name.trim().to_uppercase();
        if !is_identifier(&name) {
            return Err(ProvisionError::invalid_request(format!(
                "column name '{}' is not a valid identifier",
                name
            )));
        }

        let data_type = data_type.trim().to_uppercase();
        let (base, params) = match data_type.split_once('(') {
            Some((base, rest)) => (base.trim(), Some(rest)),
            None => (data_type.as_str(), None),
        };
        if !SUPPORTED_TYPES.contains(&base) {
            return Err(ProvisionError::invalid_request(format!(
                "column {} has unsupported type '{}' (supported: {})",
                name,
                data_type,
                SUPPORTED_TYPES.join(", ")
            )));
        }

        let data_type = match params {
            None => base.to_string(),
            Some(rest) => {
                let params = type_parameters(rest).ok_or_else(|| {
                    ProvisionError::invalid_request(format!(
                        "column {} has malformed type '{}': expected {}(N) or {}(N,M)",
                        name, data_type, base, base
                    ))
                })?;
                format!("{}({})", base, params)
            }
        };

        Ok(Self { name, data_type })
    }
}

/// `rest` is everything after the opening parenthesis. Only one or two
/// unsigned integers and the closing parenthesis may follow.
fn type_parameters(rest: &str) -> Option<String> {
    let inner = rest.trim_end().strip_suffix(')')?;
    let numbers: Vec<&str> = inner.split(',').map(str::trim).collect();
    if numbers.len() > 2
        || numbers
            .iter()
            .any(|n| n.is_empty() || !n.bytes().all(|b| b.is_ascii_digit()))
    {
        return None;
    }
    Some(numbers.join(","))
}

/// Parses `NAME:TYPE`
impl FromStr for ColumnDef {
    type Err = ProvisionError;

    fn from_str(input: &str) -> Result<Self> {
        let (name, data_type) = input.split_once(':').ok_or_else(|| {
            ProvisionError::invalid_request(format!("column '{}' must be written NAME:TYPE", input))
        })?;
        Self::new(name, data_type)
    }
}

impl fmt::Display for ColumnDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.data_type)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IcebergTableRequest {
    pub database: String,
    pub schema: String,
    pub table: String,
    pub columns: Vec<ColumnDef>,
    pub external_volume: String,
}

impl IcebergTableRequest {
    pub fn validate(&self) -> Result<()> {
        for (what, name) in [
            ("database", &self.database),
            ("schema", &self.schema),
            ("table", &self.table),
            ("external volume", &self.external_volume),
        ] {
            if !is_identifier(name) {
                return Err(ProvisionError::invalid_request(format!(
                    "{} name '{}' is not a valid identifier",
                    what, name
                )));
            }
        }
        if self.columns.is_empty() {
            return Err(ProvisionError::invalid_request("a table needs at least one column"));
        }
        Ok(())
    }

    /// `DATABASE.SCHEMA.TABLE`; statements run without a session, so names
    /// are always qualified
    pub fn qualified_name(&self) -> String {
        format!("{}.{}.{}", self.database, self.schema, self.table)
    }

    /// Path of the table's data under the volume's base URL
    pub fn base_location(&self) -> String {
        self.qualified_name().to_lowercase()
    }

    pub fn create_statement(&self) -> String {
        let columns = self
            .columns
            .iter()
            .map(|c| format!("    {}", c))
            .collect::<Vec<_>>()
            .join(",\n");
        format!(
            "CREATE OR REPLACE ICEBERG TABLE {}\n(\n{}\n)\nCATALOG = 'SNOWFLAKE'\nEXTERNAL_VOLUME = {}\nBASE_LOCATION = {};",
            self.qualified_name(),
            columns,
            string_literal(&self.external_volume),
            string_literal(&self.base_location()),
        )
    }
}

pub async fn create_iceberg_table(
    warehouse: &dyn WarehouseClient,
    request: &IcebergTableRequest,
) -> Result<()> {
    request.validate()?;
    let statement = request.create_statement();
    warehouse
        .execute(&statement)
        .await
        .map_err(|e| {
            e.into_provision(&format!("CREATE ICEBERG TABLE {}", request.qualified_name()))
        })?;
    info!(
        table = %request.qualified_name(),
        base_location = %request.base_location(),
        "Created Iceberg table"
    );
    Ok(())
}

/// List up to [`VERIFY_MAX_KEYS`] objects under the table's base location.
/// An empty listing is normal right after creation and only logged.
pub async fn verify_table_storage(
    cloud: &dyn AwsControlPlane,
    bucket: &str,
    request: &IcebergTableRequest,
) -> Result<Vec<ObjectSummary>> {
    let prefix = request.base_location();
    let objects = cloud.list_objects(bucket, &prefix, VERIFY_MAX_KEYS).await?;
    if objects.is_empty() {
        warn!(bucket, %prefix, "No objects under the table location yet");
    } else {
        info!(bucket, %prefix, count = objects.len(), "Found table objects");
    }
    Ok(objects)
}
