//! Error types for field groups, sanitization, and remote search

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Result type for crate-level operations
pub type Result<T> = std::result::Result<T, FieldsError>;

/// Errors that can occur while loading, registering, or using field groups
#[derive(Debug, Error)]
pub enum FieldsError {
    /// A field-group configuration was rejected
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// No field group registered under this id
    #[error("field group not found: {id}")]
    GroupNotFound { id: String },

    /// Definitions directory does not exist
    #[error("definitions directory not found: {path}")]
    NotInitialized { path: PathBuf },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    /// JSON deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Layered settings could not be extracted
    #[error("settings error: {0}")]
    Settings(#[from] Box<figment::Error>),
}

impl From<figment::Error> for FieldsError {
    fn from(error: figment::Error) -> Self {
        FieldsError::Settings(Box::new(error))
    }
}

/// A malformed field-group configuration. Fatal at registration time.
///
/// `path` is the dotted location of the offending field (`dimensions.width`).
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("field group has no id")]
    MissingId,

    #[error("field group '{group}' declares no fields")]
    MissingFields { group: String },

    #[error("field '{path}' is missing a type")]
    MissingType { path: String },

    #[error("field '{path}' has unsupported type '{type_name}'")]
    UnknownType { path: String, type_name: String },

    #[error("{kind} field '{path}' has no children")]
    MissingChildren { path: String, kind: &'static str },

    #[error("duplicate field key '{path}'")]
    DuplicateKey { path: String },

    #[error("field '{path}' has non-positive max_items {value}")]
    InvalidMaxItems { path: String, value: i64 },

    #[error("field '{path}' has an invalid visibility rule: {message}")]
    InvalidVisibility { path: String, message: String },

    #[error("field '{path}' uses unknown visibility operator '{operator}'")]
    UnknownOperator { path: String, operator: String },

    #[error("field '{path}' references unknown {kind} callback '{name}'")]
    UnknownCallback {
        path: String,
        kind: &'static str,
        name: String,
    },

    #[error("invalid value for '{path}': {message}")]
    InvalidValue { path: String, message: String },
}

/// A submitted value that failed coercion or constraints.
///
/// Non-fatal: collected per field while siblings continue to sanitize.
#[derive(Debug, Clone, Error, PartialEq, Serialize)]
#[error("validation error on field '{path}': {message}")]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// A capability check that failed for a field or group.
///
/// Treated as "not visible / not savable"; recorded, never raised.
#[derive(Debug, Clone, Error, PartialEq, Serialize)]
#[error("capability '{capability}' required for '{path}'")]
pub struct PermissionDenied {
    pub path: String,
    pub capability: String,
}

/// Persistence adapter failure
#[derive(Debug, Clone, Error, PartialEq)]
#[error("failed to write meta '{key}' for content {content_id}: {message}")]
pub struct StoreError {
    pub content_id: u64,
    pub key: String,
    pub message: String,
}

/// Failures of the remote-search endpoint, each with a wire code and status.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SearchError {
    /// Group or field could not be resolved
    #[error("invalid field '{field_key}' in group '{group_id}'")]
    InvalidField { group_id: String, field_key: String },

    /// Field exists but is not an async field
    #[error("field '{field_key}' is a {kind} field, not async")]
    InvalidFieldType {
        field_key: String,
        kind: &'static str,
    },

    /// Async field has no search callback configured
    #[error("field '{field_key}' has no search callback")]
    InvalidCallback { field_key: String },

    /// Search callback failed
    #[error("search callback for '{field_key}' failed: {message}")]
    CallbackError { field_key: String, message: String },
}

impl SearchError {
    /// Wire code returned to the client.
    pub fn code(&self) -> &'static str {
        match self {
            SearchError::InvalidField { .. } => "invalid_field",
            SearchError::InvalidFieldType { .. } => "invalid_field_type",
            SearchError::InvalidCallback { .. } => "invalid_callback",
            SearchError::CallbackError { .. } => "callback_error",
        }
    }

    /// HTTP-style status: 400 for bad client input, 500 for server-side failure.
    pub fn status(&self) -> u16 {
        if self.is_client_error() {
            400
        } else {
            500
        }
    }

    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            SearchError::InvalidField { .. } | SearchError::InvalidFieldType { .. }
        )
    }

    /// Serializable body for the wire response.
    pub fn to_body(&self) -> SearchErrorBody {
        SearchErrorBody {
            code: self.code(),
            message: self.to_string(),
            status: self.status(),
        }
    }
}

/// Wire shape of a search error
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SearchErrorBody {
    pub code: &'static str,
    pub message: String,
    pub status: u16,
}
