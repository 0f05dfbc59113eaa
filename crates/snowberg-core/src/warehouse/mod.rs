//! Snowflake SQL control-plane seam

pub mod http;
pub mod keypair;
pub mod snowflake;
pub mod sql;

use async_trait::async_trait;
use thiserror::Error;

use crate::error::{Provider, ProvisionError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WarehouseError {
    #[error("{0}")]
    Authentication(String),

    /// The engine rejected the statement (compilation, privileges, ...)
    #[error("{message}")]
    Statement {
        code: Option<String>,
        sql_state: Option<String>,
        message: String,
    },

    #[error("transport error: {0}")]
    Transport(String),

    /// The response did not have the shape we expect
    #[error("unexpected response: {0}")]
    Protocol(String),
}

impl WarehouseError {
    /// Map onto the workflow taxonomy; `statement` names what was being run
    pub fn into_provision(self, statement: &str) -> ProvisionError {
        match self {
            WarehouseError::Authentication(message) => {
                ProvisionError::authentication(Provider::Snowflake, message)
            }
            WarehouseError::Statement {
                sql_state, message, ..
            } => ProvisionError::warehouse(statement, sql_state, message),
            WarehouseError::Transport(message) | WarehouseError::Protocol(message) => {
                ProvisionError::provisioning(statement, message)
            }
        }
    }
}

/// Rows returned by a statement; every cell is text or NULL
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl ResultSet {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Option<String>>>) -> Self {
        Self { columns, rows }
    }

    /// Index of the first column whose name matches one of `names`
    /// (case-insensitive, in the order given)
    pub fn column_index(&self, names: &[&str]) -> Option<usize> {
        names.iter().find_map(|wanted| {
            self.columns
                .iter()
                .position(|column| column.eq_ignore_ascii_case(wanted))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[async_trait]
pub trait WarehouseClient: Send + Sync {
    /// Run one statement and return its full result
    async fn execute(&self, sql: &str) -> Result<ResultSet, WarehouseError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_column_lookup_is_case_insensitive() {
        let rs = ResultSet::new(
            vec!["parent_property".into(), "PROPERTY".into(), "property_value".into()],
            vec![],
        );
        assert_eq!(rs.column_index(&["property_name", "property"]), Some(1));
        assert_eq!(rs.column_index(&["PROPERTY_VALUE"]), Some(2));
        assert_eq!(rs.column_index(&["missing"]), None);
    }

    #[test]
    fn test_statement_error_keeps_engine_message() {
        let err = WarehouseError::Statement {
            code: Some("003001".into()),
            sql_state: Some("42501".into()),
            message: "Insufficient privileges".into(),
        }
        .into_provision("CREATE EXTERNAL VOLUME V");
        assert_eq!(err.code(), ErrorCode::E105WarehouseProvisioning);
        assert!(err.to_string().contains("Insufficient privileges"));
    }
}
