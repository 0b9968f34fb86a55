//! Database configuration templates.
//!
//! A [`DatabaseTemplate`] is the logical configuration shared by every tenant:
//! the backend kind, the `{tenant}` template for the database, and the
//! auxiliary settings forwarded to the backend. A [`TenantConfig`] is what a
//! template becomes once a validated tenant has been substituted in.
//!
//! # Example
//!
//! ```
//! use helios_tenancy::config::DatabaseTemplate;
//!
//! let template = DatabaseTemplate::new("mysql", "app_{tenant}")
//!     .with_charset("utf8mb4")
//!     .with_collation("utf8mb4_unicode_ci")
//!     .with_host("db.internal");
//!
//! assert!(template.validate().is_ok());
//! assert_eq!(template.settings.charset.as_deref(), Some("utf8mb4"));
//! ```
//!
//! Templates can also be loaded from JSON:
//!
//! ```
//! use helios_tenancy::config::DatabaseTemplate;
//!
//! let template = DatabaseTemplate::from_json_str(
//!     r#"{"adapter": "sqlite", "database": "tenants/{tenant}.sqlite3"}"#,
//! ).unwrap();
//! assert_eq!(template.settings.max_connection_pools, 50);
//! ```

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::TemplateError;
use crate::pattern::TenantPattern;
use crate::tenant::TenantId;
use crate::validation::validate_sql_keyword_setting;

/// The logical, tenant-independent configuration of a tenanted database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseTemplate {
    /// Name of this configuration (e.g. `primary`).
    #[serde(default = "default_name")]
    pub name: String,

    /// Environment the configuration belongs to (e.g. `production`).
    #[serde(default = "default_env_name")]
    pub env_name: String,

    /// Backend kind, looked up in the adapter registry.
    #[serde(default = "default_adapter")]
    pub adapter: String,

    /// Database template containing a single `{tenant}` placeholder.
    ///
    /// For file backends this is a path (optionally a `file:` URI); for
    /// server backends it is a database name.
    #[serde(default = "default_database")]
    pub database: String,

    /// Auxiliary settings forwarded to the backend.
    #[serde(default)]
    pub settings: DatabaseSettings,

    /// Physical database names that match the template but do not belong to
    /// a tenant. Enumeration skips them.
    #[serde(default)]
    pub non_tenant_databases: BTreeSet<String>,
}

/// Auxiliary settings for a database template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Character set for newly created server databases.
    #[serde(default)]
    pub charset: Option<String>,

    /// Collation for newly created server databases.
    #[serde(default)]
    pub collation: Option<String>,

    /// Maximum number of tenant connection pools the caller keeps open.
    #[serde(default = "default_max_connection_pools")]
    pub max_connection_pools: u32,

    /// Server host. May contain `{tenant}` to place tenants on different hosts.
    #[serde(default)]
    pub host: Option<String>,

    /// Server port.
    #[serde(default)]
    pub port: Option<u16>,

    /// Administrative user.
    #[serde(default)]
    pub username: Option<String>,

    /// Administrative password.
    #[serde(default)]
    pub password: Option<String>,

    /// Identifier of the parallel test worker, if running under one.
    #[serde(default)]
    pub test_worker_id: Option<String>,
}

fn default_name() -> String {
    "primary".to_string()
}

fn default_env_name() -> String {
    "development".to_string()
}

fn default_adapter() -> String {
    "sqlite".to_string()
}

fn default_database() -> String {
    "storage/tenants/{tenant}/main.sqlite3".to_string()
}

fn default_max_connection_pools() -> u32 {
    50
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            charset: None,
            collation: None,
            max_connection_pools: default_max_connection_pools(),
            host: None,
            port: None,
            username: None,
            password: None,
            test_worker_id: None,
        }
    }
}

impl Default for DatabaseTemplate {
    fn default() -> Self {
        Self {
            name: default_name(),
            env_name: default_env_name(),
            adapter: default_adapter(),
            database: default_database(),
            settings: DatabaseSettings::default(),
            non_tenant_databases: BTreeSet::new(),
        }
    }
}

impl DatabaseTemplate {
    /// Creates a template for the given backend kind and database template.
    pub fn new(adapter: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            adapter: adapter.into(),
            database: database.into(),
            ..Default::default()
        }
    }

    /// Parses a template from a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, TemplateError> {
        let template: Self = serde_json::from_str(json)?;
        template.validate()?;
        Ok(template)
    }

    /// Sets the configuration name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the environment name.
    pub fn with_env_name(mut self, env_name: impl Into<String>) -> Self {
        self.env_name = env_name.into();
        self
    }

    /// Sets the character set used when creating server databases.
    pub fn with_charset(mut self, charset: impl Into<String>) -> Self {
        self.settings.charset = Some(charset.into());
        self
    }

    /// Sets the collation used when creating server databases.
    pub fn with_collation(mut self, collation: impl Into<String>) -> Self {
        self.settings.collation = Some(collation.into());
        self
    }

    /// Sets the server host (may contain `{tenant}`).
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.settings.host = Some(host.into());
        self
    }

    /// Sets the server port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.settings.port = Some(port);
        self
    }

    /// Sets the administrative credentials.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.settings.username = Some(username.into());
        self.settings.password = Some(password.into());
        self
    }

    /// Sets the maximum number of tenant connection pools.
    pub fn with_max_connection_pools(mut self, max: u32) -> Self {
        self.settings.max_connection_pools = max;
        self
    }

    /// Sets the parallel test worker id.
    pub fn with_test_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.settings.test_worker_id = Some(worker_id.into());
        self
    }

    /// Marks a physical database name as not belonging to any tenant.
    pub fn with_non_tenant_database(mut self, name: impl Into<String>) -> Self {
        self.non_tenant_databases.insert(name.into());
        self
    }

    /// Parses the database template.
    pub fn pattern(&self) -> Result<TenantPattern, TemplateError> {
        TenantPattern::parse(self.database.as_str())
    }

    /// Returns `true` if `name` is a known non-tenant database.
    pub fn is_non_tenant_database(&self, name: &str) -> bool {
        self.non_tenant_databases.contains(name)
    }

    /// Checks the template for configuration mistakes.
    pub fn validate(&self) -> Result<(), TemplateError> {
        let pattern = self.pattern()?;
        if !pattern.has_placeholder() {
            return Err(TemplateError::MissingPlaceholder {
                template: self.database.clone(),
            });
        }
        if let Some(host) = &self.settings.host {
            TenantPattern::parse(host.as_str())?;
        }
        if self.settings.max_connection_pools == 0 {
            return Err(TemplateError::InvalidSetting {
                setting: "max_connection_pools".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.adapter.trim().is_empty() {
            return Err(TemplateError::InvalidSetting {
                setting: "adapter".to_string(),
                message: "must name a database adapter".to_string(),
            });
        }
        if let Some(charset) = &self.settings.charset {
            validate_sql_keyword_setting("charset", charset)?;
        }
        if let Some(collation) = &self.settings.collation {
            validate_sql_keyword_setting("collation", collation)?;
        }
        Ok(())
    }
}

/// A template resolved for one tenant.
///
/// Only the adapters construct this type, after the tenant has passed their
/// naming rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantConfig {
    tenant: TenantId,
    database: String,
    host: Option<String>,
    template: DatabaseTemplate,
}

impl TenantConfig {
    pub(crate) fn new(
        tenant: TenantId,
        database: String,
        host: Option<String>,
        template: DatabaseTemplate,
    ) -> Self {
        Self {
            tenant,
            database,
            host,
            template,
        }
    }

    /// The tenant this configuration belongs to.
    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    /// The resolved database (file path or database name).
    pub fn database(&self) -> &str {
        &self.database
    }

    /// The resolved host, if the template has one.
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// The template this configuration was derived from.
    pub fn template(&self) -> &DatabaseTemplate {
        &self.template
    }

    /// The backend kind.
    pub fn adapter(&self) -> &str {
        &self.template.adapter
    }
}
