//! Error types for the provisioning workflow

use thiserror::Error;

/// Error codes for programmatic handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// E101: Missing, invalid or expired credentials for AWS or Snowflake
    E101Authentication,
    /// E102: Resource name owned by another principal
    E102ResourceConflict,
    /// E103: Transient provider-side failure
    E103Provisioning,
    /// E104: Existing access policy scoped to a different bucket
    E104PolicyConflict,
    /// E105: Snowflake rejected a statement
    E105WarehouseProvisioning,
    /// E106: Storage location credentials missing from DESC output
    E106CredentialExtraction,
    /// E107: Role still trusts only the placeholder principal
    E107SetupIncomplete,
    /// E108: Request failed validation before any call was made
    E108InvalidRequest,
    /// E109: Valid credentials lacking a permission the setup needs
    E109PermissionDenied,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::E101Authentication => "E101",
            Self::E102ResourceConflict => "E102",
            Self::E103Provisioning => "E103",
            Self::E104PolicyConflict => "E104",
            Self::E105WarehouseProvisioning => "E105",
            Self::E106CredentialExtraction => "E106",
            Self::E107SetupIncomplete => "E107",
            Self::E108InvalidRequest => "E108",
            Self::E109PermissionDenied => "E109",
        }
    }

    pub fn hint(&self) -> &'static str {
        match self {
            Self::E101Authentication => {
                "Check ~/.aws/credentials (or AWS_PROFILE) and the credentials in ~/.snowflake/connections.toml"
            }
            Self::E102ResourceConflict => {
                "Choose a different name; this one belongs to another account"
            }
            Self::E103Provisioning => "Re-run the setup; completed steps are detected and skipped",
            Self::E104PolicyConflict => {
                "Use a different policy name or delete the stale policy (or set policy.on_scope_drift = \"warn\")"
            }
            Self::E105WarehouseProvisioning => {
                "Check the Snowflake role has CREATE EXTERNAL VOLUME on the account"
            }
            Self::E106CredentialExtraction => {
                "Run `snowberg inspect-volume` to see the DESC EXTERNAL VOLUME output"
            }
            Self::E107SetupIncomplete => {
                "Re-run the setup; the role must trust the Snowflake IAM user before tables can be created"
            }
            Self::E108InvalidRequest => "Fix the input and re-run",
            Self::E109PermissionDenied => {
                "Grant the AWS identity the denied action (s3:CreateBucket, iam:CreatePolicy, iam:CreateRole, ...) and re-run"
            }
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which control plane an error came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Aws,
    Snowflake,
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provider::Aws => write!(f, "AWS"),
            Provider::Snowflake => write!(f, "Snowflake"),
        }
    }
}

/// Why the storage location credentials could not be read
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionFailure {
    /// No row matched any known storage-location key. Either the volume has
    /// no location yet or the DESC output uses a layout we do not know.
    #[error("no storage location property in DESC output (properties seen: {})", seen_list(.seen))]
    PropertyMissing { seen: Vec<String> },

    #[error("property {property} is not a JSON object or array: {reason}")]
    MalformedValue { property: String, reason: String },

    #[error("property {property} lists no storage locations")]
    NoLocations { property: String },

    #[error("property {property} has no {field} field")]
    FieldMissing { property: String, field: String },
}

fn seen_list(seen: &[String]) -> String {
    if seen.is_empty() {
        "none".to_string()
    } else {
        seen.join(", ")
    }
}

impl ExtractionFailure {
    /// Only a missing property can be explained by propagation delay
    pub fn is_transient(&self) -> bool {
        matches!(self, ExtractionFailure::PropertyMissing { .. })
    }
}

/// Errors that halt the provisioning workflow
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("[{code}] {provider} authentication failed: {message}\n\nHint: {hint}")]
    Authentication {
        code: ErrorCode,
        provider: Provider,
        message: String,
        hint: &'static str,
    },

    #[error("[{code}] {resource} '{name}' already exists and is owned by another account: {message}\n\nHint: {hint}")]
    ResourceConflict {
        code: ErrorCode,
        resource: &'static str,
        name: String,
        message: String,
        hint: &'static str,
    },

    #[error("[{code}] {operation} failed: {message}\n\nHint: {hint}")]
    Provisioning {
        code: ErrorCode,
        operation: String,
        message: String,
        hint: &'static str,
    },

    #[error("[{code}] Policy {policy_arn} grants access to {found:?}, expected {expected:?}\n\nHint: {hint}")]
    PolicyConflict {
        code: ErrorCode,
        policy_arn: String,
        expected: Vec<String>,
        found: Vec<String>,
        hint: &'static str,
    },

    /// The engine message is kept verbatim for the operator
    #[error("[{code}] Snowflake rejected {statement}: {message}\n\nHint: {hint}")]
    WarehouseProvisioning {
        code: ErrorCode,
        statement: String,
        sql_state: Option<String>,
        message: String,
        hint: &'static str,
    },

    #[error("[{code}] Could not read credentials for external volume {volume}: {cause}\n\nHint: {hint}")]
    CredentialExtraction {
        code: ErrorCode,
        volume: String,
        cause: ExtractionFailure,
        hint: &'static str,
    },

    #[error("[{code}] Setup incomplete: role {role} still trusts only the placeholder principal: {reason}\n\nHint: {hint}")]
    SetupIncomplete {
        code: ErrorCode,
        role: String,
        reason: String,
        hint: &'static str,
    },

    #[error("[{code}] {operation} was denied: {message}\n\nHint: {hint}")]
    PermissionDenied {
        code: ErrorCode,
        operation: String,
        message: String,
        hint: &'static str,
    },

    #[error("[{code}] Invalid request: {message}")]
    InvalidRequest { code: ErrorCode, message: String },
}

impl ProvisionError {
    pub fn authentication(provider: Provider, message: impl Into<String>) -> Self {
        let code = ErrorCode::E101Authentication;
        Self::Authentication {
            code,
            provider,
            message: message.into(),
            hint: code.hint(),
        }
    }

    pub fn resource_conflict(
        resource: &'static str,
        name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let code = ErrorCode::E102ResourceConflict;
        Self::ResourceConflict {
            code,
            resource,
            name: name.into(),
            message: message.into(),
            hint: code.hint(),
        }
    }

    pub fn provisioning(operation: impl Into<String>, message: impl Into<String>) -> Self {
        let code = ErrorCode::E103Provisioning;
        Self::Provisioning {
            code,
            operation: operation.into(),
            message: message.into(),
            hint: code.hint(),
        }
    }

    pub fn policy_conflict(
        policy_arn: impl Into<String>,
        expected: Vec<String>,
        found: Vec<String>,
    ) -> Self {
        let code = ErrorCode::E104PolicyConflict;
        Self::PolicyConflict {
            code,
            policy_arn: policy_arn.into(),
            expected,
            found,
            hint: code.hint(),
        }
    }

    pub fn warehouse(
        statement: impl Into<String>,
        sql_state: Option<String>,
        message: impl Into<String>,
    ) -> Self {
        let code = ErrorCode::E105WarehouseProvisioning;
        Self::WarehouseProvisioning {
            code,
            statement: statement.into(),
            sql_state,
            message: message.into(),
            hint: code.hint(),
        }
    }

    pub fn credential_extraction(volume: impl Into<String>, cause: ExtractionFailure) -> Self {
        let code = ErrorCode::E106CredentialExtraction;
        Self::CredentialExtraction {
            code,
            volume: volume.into(),
            cause,
            hint: code.hint(),
        }
    }

    pub fn setup_incomplete(role: impl Into<String>, reason: impl Into<String>) -> Self {
        let code = ErrorCode::E107SetupIncomplete;
        Self::SetupIncomplete {
            code,
            role: role.into(),
            reason: reason.into(),
            hint: code.hint(),
        }
    }

    pub fn permission_denied(operation: impl Into<String>, message: impl Into<String>) -> Self {
        let code = ErrorCode::E109PermissionDenied;
        Self::PermissionDenied {
            code,
            operation: operation.into(),
            message: message.into(),
            hint: code.hint(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            code: ErrorCode::E108InvalidRequest,
            message: message.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Authentication { code, .. }
            | Self::ResourceConflict { code, .. }
            | Self::Provisioning { code, .. }
            | Self::PolicyConflict { code, .. }
            | Self::WarehouseProvisioning { code, .. }
            | Self::CredentialExtraction { code, .. }
            | Self::SetupIncomplete { code, .. }
            | Self::PermissionDenied { code, .. }
            | Self::InvalidRequest { code, .. } => *code,
        }
    }

    /// Whether re-running the whole workflow can be expected to get further
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Provisioning { .. } | Self::SetupIncomplete { .. }
        )
    }
}

/// Result type alias for ProvisionError
pub type Result<T> = std::result::Result<T, ProvisionError>;

/// Redact a secret for logging (shows first 4 chars only)
pub fn redact_secret(secret: &str) -> String {
    let visible: String = secret.chars().take(4).collect();
    if secret.chars().count() <= 4 {
        "****".to_string()
    } else {
        format!("{}****", visible)
    }
}
