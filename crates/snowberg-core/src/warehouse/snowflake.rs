//! Snowflake SQL API client
//!
//! Statements are submitted to `POST /api/v2/statements` with a bearer token:
//! a key-pair JWT minted from `private_key_file`, or a configured OAuth,
//! programmatic access or pre-minted JWT token. The SQL API has no password
//! login. Long-running statements answer 202
//! and are polled on their status URL until they finish or the statement
//! timeout elapses. Each request is sessionless, so callers fully qualify
//! object names.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use snowberg_config::SnowflakeConnection;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

use super::http::{ApiRequest, HttpClient, HttpResponse, ReqwestHttpClient};
use super::keypair;
use super::{ResultSet, WarehouseClient, WarehouseError};

const STATEMENTS_PATH: &str = "/api/v2/statements";
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Serialize)]
struct StatementRequest<'a> {
    statement: &'a str,
    timeout: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    warehouse: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    database: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    schema: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatementResponse {
    code: Option<String>,
    message: Option<String>,
    sql_state: Option<String>,
    statement_handle: Option<String>,
    statement_status_url: Option<String>,
    result_set_meta_data: Option<ResultSetMetaData>,
    #[serde(default)]
    data: Vec<Vec<Option<String>>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultSetMetaData {
    #[serde(default)]
    row_type: Vec<RowType>,
}

#[derive(Debug, Deserialize)]
struct RowType {
    name: String,
}

pub struct SnowflakeSqlClient {
    http: Arc<dyn HttpClient>,
    base_url: String,
    token: String,
    token_type: &'static str,
    connection: SnowflakeConnection,
    statement_timeout: Duration,
    poll_interval: Duration,
}

impl SnowflakeSqlClient {
    /// Build a client for `connection` over a reqwest transport
    pub fn from_connection(
        connection: &SnowflakeConnection,
        statement_timeout: Duration,
    ) -> Result<Self, WarehouseError> {
        let http = ReqwestHttpClient::new(statement_timeout + Duration::from_secs(30))
            .map_err(|e| WarehouseError::Transport(format!("{:#}", e)))?;
        Self::with_http(Arc::new(http), connection, statement_timeout)
    }

    pub fn with_http(
        http: Arc<dyn HttpClient>,
        connection: &SnowflakeConnection,
        statement_timeout: Duration,
    ) -> Result<Self, WarehouseError> {
        let (token, token_type) = credentials(connection)?;

        Ok(Self {
            http,
            base_url: base_url(connection)?,
            token,
            token_type,
            connection: connection.clone(),
            statement_timeout,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn headers(&self) -> Vec<(String, String)> {
        vec![
            ("Authorization".to_string(), format!("Bearer {}", self.token)),
            (
                "X-Snowflake-Authorization-Token-Type".to_string(),
                self.token_type.to_string(),
            ),
            ("Content-Type".to_string(), "application/json".to_string()),
            ("Accept".to_string(), "application/json".to_string()),
        ]
    }

    async fn submit(&self, sql: &str) -> Result<HttpResponse, WarehouseError> {
        let request = StatementRequest {
            statement: sql,
            timeout: self.statement_timeout.as_secs(),
            warehouse: self.connection.warehouse.as_deref(),
            database: self.connection.database.as_deref(),
            schema: self.connection.schema.as_deref(),
            role: self.connection.role.as_deref(),
        };
        let body = serde_json::to_vec(&request)
            .map_err(|e| WarehouseError::Protocol(format!("encoding request: {}", e)))?;
        let url = format!("{}{}", self.base_url, STATEMENTS_PATH);

        self.http
            .send(ApiRequest::post_json(url, self.headers(), body))
            .await
            .map_err(|e| WarehouseError::Transport(format!("{:#}", e)))
    }

    async fn poll(&self, status_url: &str) -> Result<HttpResponse, WarehouseError> {
        let url = if status_url.starts_with("http") {
            status_url.to_string()
        } else {
            format!("{}{}", self.base_url, status_url)
        };
        self.http
            .send(ApiRequest::get(url, self.headers()))
            .await
            .map_err(|e| WarehouseError::Transport(format!("{:#}", e)))
    }
}

#[async_trait]
impl WarehouseClient for SnowflakeSqlClient {
    #[instrument(skip(self, sql), fields(account = %self.connection.account))]
    async fn execute(&self, sql: &str) -> Result<ResultSet, WarehouseError> {
        debug!(statement = %first_line(sql), "Submitting statement");
        let started = Instant::now();
        let mut response = self.submit(sql).await?;

        loop {
            match response.status {
                200 => {
                    let parsed = parse_body(&response)?;
                    return Ok(into_result_set(parsed));
                }
                202 => {
                    let parsed = parse_body(&response)?;
                    let status_url = parsed
                        .statement_status_url
                        .or_else(|| {
                            parsed
                                .statement_handle
                                .map(|handle| format!("{}/{}", STATEMENTS_PATH, handle))
                        })
                        .ok_or_else(|| {
                            WarehouseError::Protocol(
                                "202 response without statementStatusUrl".to_string(),
                            )
                        })?;
                    if started.elapsed() >= self.statement_timeout {
                        return Err(WarehouseError::Transport(format!(
                            "statement still running after {}s",
                            self.statement_timeout.as_secs()
                        )));
                    }
                    debug!(%status_url, "Statement still running, polling");
                    tokio::time::sleep(self.poll_interval).await;
                    response = self.poll(&status_url).await?;
                }
                _ => return Err(status_error(&response)),
            }
        }
    }
}

fn parse_body(response: &HttpResponse) -> Result<StatementResponse, WarehouseError> {
    response
        .json::<StatementResponse>()
        .map_err(|e| WarehouseError::Protocol(format!("{:#}", e)))
}

fn into_result_set(response: StatementResponse) -> ResultSet {
    let columns = response
        .result_set_meta_data
        .map(|meta| meta.row_type.into_iter().map(|column| column.name).collect())
        .unwrap_or_default();
    ResultSet::new(columns, response.data)
}

fn status_error(response: &HttpResponse) -> WarehouseError {
    let parsed: StatementResponse = response.json().unwrap_or_default();
    let message = parsed
        .message
        .clone()
        .unwrap_or_else(|| format!("HTTP {}: {}", response.status, response.body_string()));

    match response.status {
        401 | 403 => WarehouseError::Authentication(message),
        422 => WarehouseError::Statement {
            code: parsed.code,
            sql_state: parsed.sql_state,
            message,
        },
        408 | 429 | 500..=599 => WarehouseError::Transport(message),
        _ => WarehouseError::Protocol(message),
    }
}

/// `https://<host>` when a host is configured, else the account URL
fn base_url(connection: &SnowflakeConnection) -> Result<String, WarehouseError> {
    let raw = match connection.host.as_deref().map(str::trim) {
        Some(host) if host.starts_with("http://") || host.starts_with("https://") => {
            host.trim_end_matches('/').to_string()
        }
        Some(host) if !host.is_empty() => format!("https://{}", host.trim_end_matches('/')),
        _ => format!(
            "https://{}.snowflakecomputing.com",
            connection.account.trim().to_lowercase().replace('_', "-")
        ),
    };

    url::Url::parse(&raw)
        .map_err(|e| WarehouseError::Protocol(format!("invalid Snowflake URL {}: {}", raw, e)))?;
    Ok(raw)
}

const KEYPAIR_JWT: &str = "KEYPAIR_JWT";

/// Bearer token and its `X-Snowflake-Authorization-Token-Type`
fn credentials(
    connection: &SnowflakeConnection,
) -> Result<(String, &'static str), WarehouseError> {
    if connection.private_key_file.is_some() {
        debug!(account = %connection.account, "Minting key-pair JWT");
        return Ok((keypair::mint_for(connection)?, KEYPAIR_JWT));
    }

    let authenticator = connection
        .authenticator
        .as_deref()
        .map(str::to_ascii_lowercase);
    let token = connection
        .token
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty());
    let Some(token) = token else {
        let reason = if authenticator.as_deref() == Some("snowflake_jwt") {
            "authenticator is SNOWFLAKE_JWT but no private_key_file is configured"
        } else if connection.password.is_some() {
            "password login is not available over the SQL API"
        } else {
            "no credentials configured"
        };
        return Err(WarehouseError::Authentication(format!(
            "{} for account {}; set `private_key_file` for key-pair authentication, or an \
             OAuth or programmatic access token (`token` in connections.toml or SNOWFLAKE_TOKEN)",
            reason, connection.account
        )));
    };

    let token_type = match authenticator.as_deref() {
        Some("oauth") => "OAUTH",
        Some("snowflake_jwt") if looks_like_jwt(token) => KEYPAIR_JWT,
        Some("snowflake_jwt") => {
            warn!("Token is not a JWT, sending it as a programmatic access token");
            "PROGRAMMATIC_ACCESS_TOKEN"
        }
        _ => "PROGRAMMATIC_ACCESS_TOKEN",
    };
    Ok((token.to_string(), token_type))
}

/// Three dot-separated segments, the first being a JSON header
fn looks_like_jwt(token: &str) -> bool {
    let segments: Vec<&str> = token.split('.').collect();
    segments.len() == 3
        && segments.iter().all(|s| !s.is_empty())
        && segments[0].starts_with("eyJ")
}

fn first_line(sql: &str) -> &str {
    sql.lines().next().unwrap_or(sql)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned responses and records every request
    #[derive(Default)]
    struct ScriptedHttp {
        responses: Mutex<VecDeque<HttpResponse>>,
        requests: Mutex<Vec<(String, String, Option<Vec<u8>>)>>,
    }

    impl ScriptedHttp {
        fn new(responses: Vec<(u16, &str)>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(
                    responses
                        .into_iter()
                        .map(|(status, body)| HttpResponse {
                            status,
                            body: body.as_bytes().to_vec(),
                        })
                        .collect(),
                ),
                requests: Mutex::default(),
            })
        }
    }

    #[async_trait]
    impl HttpClient for ScriptedHttp {
        async fn send(&self, request: ApiRequest) -> anyhow::Result<HttpResponse> {
            self.requests.lock().unwrap().push((
                request.method.to_string(),
                request.url,
                request.body,
            ));
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| anyhow::anyhow!("script exhausted"))
        }
    }

    fn connection() -> SnowflakeConnection {
        SnowflakeConnection {
            account: "XY_12345".into(),
            token: Some("tok".into()),
            role: Some("ACCOUNTADMIN".into()),
            ..Default::default()
        }
    }

    fn client(http: Arc<ScriptedHttp>) -> SnowflakeSqlClient {
        SnowflakeSqlClient::with_http(http, &connection(), Duration::from_secs(60))
            .unwrap()
            .with_poll_interval(Duration::ZERO)
    }

    const DESC_BODY: &str = r#"{
        "resultSetMetaData": {"rowType": [
            {"name": "parent_property"}, {"name": "property"},
            {"name": "property_type"}, {"name": "property_value"}
        ]},
        "data": [["", "ALLOW_WRITES", "Boolean", "true"], ["", "COMMENT", "String", null]],
        "code": "090001",
        "statementHandle": "h-1"
    }"#;

    #[test]
    fn test_base_url_from_account_or_host() {
        assert_eq!(
            base_url(&connection()).unwrap(),
            "https://xy-12345.snowflakecomputing.com"
        );
        let with_host = SnowflakeConnection {
            host: Some("org-acct.privatelink.snowflakecomputing.com/".into()),
            ..connection()
        };
        assert_eq!(
            base_url(&with_host).unwrap(),
            "https://org-acct.privatelink.snowflakecomputing.com"
        );
    }

    #[test]
    fn test_token_type_follows_authenticator() {
        let (_, kind) = credentials(&connection()).unwrap();
        assert_eq!(kind, "PROGRAMMATIC_ACCESS_TOKEN");

        let oauth = SnowflakeConnection {
            authenticator: Some("OAUTH".into()),
            ..connection()
        };
        assert_eq!(credentials(&oauth).unwrap().1, "OAUTH");

        let jwt = SnowflakeConnection {
            authenticator: Some("SNOWFLAKE_JWT".into()),
            token: Some("eyJhbGciOiJSUzI1NiJ9.eyJzdWIiOiJYIn0.c2ln".into()),
            ..connection()
        };
        assert_eq!(credentials(&jwt).unwrap().1, KEYPAIR_JWT);

        // A PAT exported next to a key-pair connection is not a JWT
        let pat = SnowflakeConnection {
            authenticator: Some("snowflake_jwt".into()),
            ..connection()
        };
        assert_eq!(credentials(&pat).unwrap().1, "PROGRAMMATIC_ACCESS_TOKEN");
    }

    #[test]
    fn test_key_pair_without_key_file_names_it() {
        let conn = SnowflakeConnection {
            token: None,
            authenticator: Some("SNOWFLAKE_JWT".into()),
            ..connection()
        };
        let err = credentials(&conn).unwrap_err();
        assert!(matches!(err, WarehouseError::Authentication(_)));
        assert!(err.to_string().contains("private_key_file"));
    }

    #[test]
    fn test_password_only_connection_is_explained() {
        let conn = SnowflakeConnection {
            token: None,
            password: Some("hunter2".into()),
            ..connection()
        };
        let err = credentials(&conn).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("password login is not available"));
        assert!(!message.contains("hunter2"));
    }

    #[test]
    fn test_private_key_file_wins_over_token() {
        let dir = tempfile::tempdir().unwrap();
        let private = dir.path().join("rsa_key.p8");
        std::fs::write(&private, include_str!("../../tests/fixtures/rsa_key.p8")).unwrap();
        let conn = SnowflakeConnection {
            user: Some("provisioner".into()),
            private_key_file: Some(private),
            public_key_fp: Some("SHA256:abc=".into()),
            ..connection()
        };

        let (token, kind) = credentials(&conn).unwrap();
        assert_eq!(kind, KEYPAIR_JWT);
        assert_ne!(token, "tok");
        assert!(looks_like_jwt(&token));
    }

    #[test]
    fn test_missing_token_is_authentication_error() {
        let conn = SnowflakeConnection {
            token: None,
            ..connection()
        };
        let result =
            SnowflakeSqlClient::with_http(ScriptedHttp::new(vec![]), &conn, Duration::from_secs(5));
        assert!(matches!(result, Err(WarehouseError::Authentication(_))));
    }

    #[tokio::test]
    async fn test_execute_parses_rows() {
        let http = ScriptedHttp::new(vec![(200, DESC_BODY)]);
        let rs = client(http.clone()).execute("DESC EXTERNAL VOLUME V;").await.unwrap();

        assert_eq!(rs.columns[1], "property");
        assert_eq!(rs.rows.len(), 2);
        assert_eq!(rs.rows[0][3].as_deref(), Some("true"));
        assert_eq!(rs.rows[1][3], None);

        let requests = http.requests.lock().unwrap();
        assert_eq!(requests[0].0, "POST");
        assert_eq!(
            requests[0].1,
            "https://xy-12345.snowflakecomputing.com/api/v2/statements"
        );
        let body: serde_json::Value =
            serde_json::from_slice(requests[0].2.as_ref().unwrap()).unwrap();
        assert_eq!(body["statement"], "DESC EXTERNAL VOLUME V;");
        assert_eq!(body["role"], "ACCOUNTADMIN");
        assert!(body.get("warehouse").is_none());
    }

    #[tokio::test]
    async fn test_execute_polls_running_statement() {
        let http = ScriptedHttp::new(vec![
            (
                202,
                r#"{"statementHandle":"h-2","statementStatusUrl":"/api/v2/statements/h-2"}"#,
            ),
            (200, DESC_BODY),
        ]);
        let rs = client(http.clone()).execute("SHOW TABLES;").await.unwrap();
        assert_eq!(rs.rows.len(), 2);

        let requests = http.requests.lock().unwrap();
        assert_eq!(requests[1].0, "GET");
        assert!(requests[1].1.ends_with("/api/v2/statements/h-2"));
    }

    #[tokio::test]
    async fn test_rejected_statement_keeps_engine_message() {
        let http = ScriptedHttp::new(vec![(
            422,
            r#"{"code":"003001","sqlState":"42501","message":"SQL access control error:\nInsufficient privileges"}"#,
        )]);
        let err = client(http).execute("CREATE OR REPLACE EXTERNAL VOLUME V;").await.unwrap_err();
        assert_eq!(
            err,
            WarehouseError::Statement {
                code: Some("003001".into()),
                sql_state: Some("42501".into()),
                message: "SQL access control error:\nInsufficient privileges".into(),
            }
        );
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let http = ScriptedHttp::new(vec![
            (401, r#"{"message":"token expired"}"#),
            (503, "unavailable"),
        ]);
        let client = client(http);
        assert_eq!(
            client.execute("SELECT 1").await.unwrap_err(),
            WarehouseError::Authentication("token expired".into())
        );
        assert!(matches!(
            client.execute("SELECT 1").await.unwrap_err(),
            WarehouseError::Transport(_)
        ));
    }
}
