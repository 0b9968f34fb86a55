//! Error types for tenant database provisioning.
//!
//! Errors are grouped by category the same way callers are expected to react
//! to them: configuration mistakes ([`TemplateError`], [`UnsupportedAdapterError`]),
//! rejected input ([`BadTenantNameError`]) and backend failures ([`BackendError`]).

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// The primary error type for all tenancy operations.
#[derive(Error, Debug)]
pub enum TenancyError {
    /// The configured backend kind has no adapter.
    #[error(transparent)]
    UnsupportedAdapter(#[from] UnsupportedAdapterError),

    /// A tenant identifier (or the name composed from it) was rejected.
    #[error(transparent)]
    BadTenantName(#[from] BadTenantNameError),

    /// The configuration template is malformed.
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// The storage backend failed.
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Raised when a configuration names a backend kind missing from the registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unsupported database adapter '{kind}' (supported: {})", .supported.join(", "))]
pub struct UnsupportedAdapterError {
    /// The backend kind that was requested.
    pub kind: String,
    /// Every kind the registry knows about, in table order.
    pub supported: Vec<String>,
}

/// Raised when a tenant identifier fails backend-specific validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid tenant name {value:?}: {rule}")]
pub struct BadTenantNameError {
    /// The offending value (the raw tenant id, or the composed database name).
    pub value: String,
    /// The rule that was violated.
    pub rule: NameRule,
}

impl BadTenantNameError {
    pub(crate) fn new(value: impl Into<String>, rule: NameRule) -> Self {
        Self {
            value: value.into(),
            rule,
        }
    }
}

/// The specific naming rule a tenant identifier violated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameRule {
    /// The tenant identifier is empty.
    Empty,
    /// A character that must never appear in a file path component.
    ForbiddenCharacter(char),
    /// The composed name is longer than the backend allows.
    TooLong { length: usize, max: usize },
    /// A character outside the backend's identifier alphabet.
    InvalidCharacter(char),
    /// The composed name begins with a digit.
    LeadingDigit,
    /// The composed name is a reserved word.
    ReservedWord(String),
    /// The composed path would end like a lock or journal file.
    ReservedSuffix(String),
}

impl fmt::Display for NameRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NameRule::Empty => write!(f, "tenant name cannot be empty"),
            NameRule::ForbiddenCharacter(c) => {
                write!(f, "tenant name contains an invalid character {c:?}")
            }
            NameRule::TooLong { length, max } => {
                write!(f, "database name too long ({length} bytes, max {max})")
            }
            NameRule::InvalidCharacter(c) => write!(
                f,
                "database name contains {c:?}; only letters, digits, '_', '$' and '-' are allowed"
            ),
            NameRule::LeadingDigit => write!(f, "database name cannot start with a number"),
            NameRule::ReservedWord(word) => {
                write!(f, "database name is the reserved word '{word}'")
            }
            NameRule::ReservedSuffix(suffix) => {
                write!(f, "database path cannot end in '{suffix}'")
            }
        }
    }
}

/// Errors in the configuration template.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    /// The template has no `{tenant}` placeholder.
    #[error("database template '{template}' has no {{tenant}} placeholder")]
    MissingPlaceholder { template: String },

    /// The template has more than one `{tenant}` placeholder.
    #[error("database template '{template}' has {count} {{tenant}} placeholders, expected one")]
    MultiplePlaceholders { template: String, count: usize },

    /// A setting holds an unusable value.
    #[error("invalid setting '{setting}': {message}")]
    InvalidSetting { setting: String, message: String },
}

/// Errors originating from the storage backend.
#[derive(Error, Debug)]
pub enum BackendError {
    /// The server reports that the database (or the server itself) does not exist.
    #[error("no such database: {database}")]
    NoSuchDatabase { database: String },

    /// The administrative connection could not be established.
    #[error("connection failed to {backend_name}: {message}")]
    ConnectionFailed {
        backend_name: String,
        message: String,
    },

    /// An administrative statement failed.
    #[error("query execution failed: {message}")]
    QueryFailed { message: String },

    /// A server-backed adapter was requested but no connector was supplied.
    #[error("no administrative connector configured for adapter '{kind}'")]
    ConnectorMissing { kind: String },

    /// Filesystem access failed.
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// SQLite refused to open or create a database file.
    #[cfg(feature = "sqlite")]
    #[error("sqlite error on {}: {source}", .path.display())]
    Sqlite {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },
}

impl BackendError {
    /// Wraps an I/O error with the path it occurred on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BackendError::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns `true` for the "no such server / no such database" class of
    /// failure that read-only operations recover from.
    pub fn is_missing_database(&self) -> bool {
        matches!(
            self,
            BackendError::NoSuchDatabase { .. } | BackendError::ConnectionFailed { .. }
        )
    }
}

impl TenancyError {
    /// Returns `true` if this is a backend failure of the missing-database class.
    pub fn is_missing_database(&self) -> bool {
        matches!(self, TenancyError::Backend(e) if e.is_missing_database())
    }
}

/// Result type alias for tenancy operations.
pub type TenancyResult<T> = Result<T, TenancyError>;

impl From<serde_json::Error> for TemplateError {
    fn from(err: serde_json::Error) -> Self {
        TemplateError::InvalidSetting {
            setting: "<document>".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for TenancyError {
    fn from(err: serde_json::Error) -> Self {
        TenancyError::Template(err.into())
    }
}
