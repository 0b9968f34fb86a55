//! Server-backed tenant databases (MySQL, MariaDB).
//!
//! Each tenant gets its own database on a shared server, named by the
//! template (e.g. `app_{tenant}`). The adapter never speaks a wire protocol
//! itself: every server-level statement runs on a short-lived administrative
//! connection obtained from an [`AdminConnector`] supplied by the caller.
//!
//! # Connection lifecycle
//!
//! Each operation connects, runs its statements, and calls
//! [`AdminConnection::close`] whether or not the statements succeeded.
//! Connections are never shared between operations.

use std::borrow::Cow;
use std::collections::BTreeSet;
use std::fmt;

use tracing::{debug, info, warn};

use crate::config::{DatabaseTemplate, TenantConfig};
use crate::error::{BadTenantNameError, NameRule, TemplateError, TenancyResult};
use crate::pattern::{TenantPattern, has_unresolved_placeholder};
use crate::tenant::TenantId;
use crate::validation::{validate_server_database_name, validate_sql_keyword_setting};

use super::{
    AdapterFamily, ResolvedTarget, StorageAdapter, append_worker_suffix, resolve_host,
};

/// One result row; `None` is SQL `NULL`.
pub type Row = Vec<Option<String>>;

/// Options applied when creating a database.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceOptions {
    /// Default character set.
    pub charset: Option<String>,
    /// Default collation.
    pub collation: Option<String>,
}

impl NamespaceOptions {
    /// Rejects character set and collation names that are not plain words.
    pub fn validate(&self) -> Result<(), TemplateError> {
        if let Some(charset) = &self.charset {
            validate_sql_keyword_setting("charset", charset)?;
        }
        if let Some(collation) = &self.collation {
            validate_sql_keyword_setting("collation", collation)?;
        }
        Ok(())
    }
}

/// Parameters for opening an administrative connection.
///
/// `database` is always `None` for the connections this crate opens, so that
/// the connection does not depend on the tenant database existing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdminConnectOptions {
    /// Backend kind from the template (e.g. `mysql`).
    pub adapter: String,
    /// Server host.
    pub host: Option<String>,
    /// Server port.
    pub port: Option<u16>,
    /// Administrative user.
    pub username: Option<String>,
    /// Administrative password.
    pub password: Option<String>,
    /// Database to select on connect.
    pub database: Option<String>,
}

/// An open administrative connection.
pub trait AdminConnection {
    /// Executes `sql` and returns the rows it produced.
    fn execute(&mut self, sql: &str) -> TenancyResult<Vec<Row>>;

    /// Creates the database `name` if it does not exist.
    fn create_namespace(&mut self, name: &str, options: &NamespaceOptions) -> TenancyResult<()> {
        self.execute(&create_database_sql(name, options)?)?;
        Ok(())
    }

    /// Drops the database `name` if it exists.
    fn drop_namespace(&mut self, name: &str) -> TenancyResult<()> {
        self.execute(&format!("DROP DATABASE IF EXISTS {}", quote_identifier(name)))?;
        Ok(())
    }

    /// Releases the connection.
    fn close(&mut self) -> TenancyResult<()> {
        Ok(())
    }
}

/// Opens administrative connections to a database server.
pub trait AdminConnector: Send + Sync + fmt::Debug {
    /// Opens a new connection.
    fn connect(&self, options: &AdminConnectOptions) -> TenancyResult<Box<dyn AdminConnection>>;
}

/// Quotes an identifier with backticks.
pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Quotes a string literal, escaping backslashes and single quotes.
pub fn quote_string(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
}

/// Escapes the `LIKE` metacharacters `\`, `%` and `_`.
pub fn escape_like(segment: &str) -> Cow<'_, str> {
    if !segment.contains(['\\', '%', '_']) {
        return Cow::Borrowed(segment);
    }
    let mut escaped = String::with_capacity(segment.len() + 4);
    for c in segment.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    Cow::Owned(escaped)
}

/// Builds the `CREATE DATABASE` statement for `name`.
///
/// Fails if the character set or collation is not a plain word.
pub fn create_database_sql(
    name: &str,
    options: &NamespaceOptions,
) -> Result<String, TemplateError> {
    options.validate()?;
    let mut sql = format!("CREATE DATABASE IF NOT EXISTS {}", quote_identifier(name));
    if let Some(charset) = &options.charset {
        sql.push_str(" CHARACTER SET ");
        sql.push_str(charset);
    }
    if let Some(collation) = &options.collation {
        sql.push_str(" COLLATE ");
        sql.push_str(collation);
    }
    Ok(sql)
}

/// Adapter for server-backed tenant databases.
#[derive(Clone)]
pub struct ServerAdapter<'a> {
    template: &'a DatabaseTemplate,
    pattern: TenantPattern,
    connector: &'a dyn AdminConnector,
}

impl fmt::Debug for ServerAdapter<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerAdapter")
            .field("adapter", &self.template.adapter)
            .field("database", &self.template.database)
            .field("connector", &self.connector)
            .finish()
    }
}

impl<'a> ServerAdapter<'a> {
    /// Creates an adapter for `template` using `connector` for admin access.
    pub fn new(
        template: &'a DatabaseTemplate,
        connector: &'a dyn AdminConnector,
    ) -> TenancyResult<Self> {
        Ok(Self {
            template,
            pattern: template.pattern()?,
            connector,
        })
    }

    /// Runs `block` without any locking.
    ///
    /// The server serializes `CREATE DATABASE IF NOT EXISTS` itself.
    pub fn acquire_lock<T, F>(&self, lock_id: &str, block: F) -> TenancyResult<T>
    where
        F: FnOnce() -> TenancyResult<T>,
    {
        debug!(lock = %lock_id, "Server adapter runs locked block without a lock");
        block()
    }

    /// Connection options for `host`, with the database cleared.
    pub fn connect_options(&self, host: Option<&str>) -> AdminConnectOptions {
        let settings = &self.template.settings;
        AdminConnectOptions {
            adapter: self.template.adapter.clone(),
            host: host.map(str::to_string),
            port: settings.port,
            username: settings.username.clone(),
            password: settings.password.clone(),
            database: None,
        }
    }

    /// Host for operations not tied to one tenant.
    ///
    /// A templated host cannot be resolved without a tenant, so enumeration
    /// falls back to the connector's default host.
    fn admin_host(&self) -> Option<&str> {
        self.template
            .settings
            .host
            .as_deref()
            .filter(|host| !has_unresolved_placeholder(host))
    }

    /// Opens an administrative connection, runs `f` on it and closes it.
    pub fn with_admin_connection<T, F>(&self, host: Option<&str>, f: F) -> TenancyResult<T>
    where
        F: FnOnce(&mut dyn AdminConnection) -> TenancyResult<T>,
    {
        let options = self.connect_options(host);
        let mut conn = self.connector.connect(&options)?;
        let result = f(conn.as_mut());
        if let Err(e) = conn.close() {
            warn!(host = ?options.host, error = %e, "Failed to close administrative connection");
        }
        result
    }

    fn namespace_options(&self) -> Result<NamespaceOptions, TemplateError> {
        let options = NamespaceOptions {
            charset: self.template.settings.charset.clone(),
            collation: self.template.settings.collation.clone(),
        };
        options.validate()?;
        Ok(options)
    }

    fn show_databases_like(&self, host: Option<&str>, like: &str) -> TenancyResult<Vec<Row>> {
        let sql = format!("SHOW DATABASES LIKE {}", quote_string(like));
        self.with_admin_connection(host, |conn| conn.execute(&sql))
    }
}

fn first_column(row: Row) -> Option<String> {
    row.into_iter().next().flatten()
}

impl StorageAdapter for ServerAdapter<'_> {
    fn family(&self) -> AdapterFamily {
        AdapterFamily::Server
    }

    fn template(&self) -> &DatabaseTemplate {
        self.template
    }

    fn validate_tenant_name(&self, tenant: &TenantId) -> TenancyResult<()> {
        if tenant.is_empty() {
            return Err(BadTenantNameError::new(tenant.as_str(), NameRule::Empty).into());
        }
        // A tenant that itself looks like a placeholder would make the
        // composed name skip validation.
        if has_unresolved_placeholder(tenant.as_str()) {
            let rule = NameRule::InvalidCharacter('{');
            return Err(BadTenantNameError::new(tenant.as_str(), rule).into());
        }
        let composed = self.pattern.target_for(tenant.as_str())?;
        validate_server_database_name(&composed)?;
        Ok(())
    }

    fn target_for(&self, tenant: &TenantId) -> TenancyResult<ResolvedTarget> {
        self.validate_tenant_name(tenant)?;
        Ok(ResolvedTarget::Namespace(
            self.pattern.target_for(tenant.as_str())?,
        ))
    }

    fn new_tenant_config(&self, tenant: &TenantId) -> TenancyResult<TenantConfig> {
        self.validate_tenant_name(tenant)?;
        let database = self.pattern.target_for(tenant.as_str())?;
        let host = resolve_host(self.template, tenant)?;
        Ok(TenantConfig::new(
            tenant.clone(),
            database,
            host,
            self.template.clone(),
        ))
    }

    fn create_database(&self, config: &TenantConfig) -> TenancyResult<()> {
        let options = self.namespace_options()?;
        self.with_admin_connection(config.host(), |conn| {
            conn.create_namespace(config.database(), &options)
        })?;
        info!(tenant = %config.tenant(), database = %config.database(), "Created tenant database");
        Ok(())
    }

    fn drop_database(&self, config: &TenantConfig) -> TenancyResult<()> {
        self.with_admin_connection(config.host(), |conn| conn.drop_namespace(config.database()))?;
        info!(tenant = %config.tenant(), database = %config.database(), "Dropped tenant database");
        Ok(())
    }

    fn database_exists(&self, config: &TenantConfig) -> TenancyResult<bool> {
        match self.show_databases_like(config.host(), &escape_like(config.database())) {
            Ok(rows) => Ok(!rows.is_empty()),
            Err(e) if e.is_missing_database() => {
                debug!(
                    database = %config.database(),
                    error = %e,
                    "Treating unreachable database as absent"
                );
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn database_ready(&self, config: &TenantConfig) -> TenancyResult<bool> {
        self.database_exists(config)
    }

    fn tenant_databases(&self) -> TenancyResult<BTreeSet<TenantId>> {
        let like = self.pattern.wildcard_pattern("%", escape_like)?;
        let capture = self.pattern.capture_pattern()?;

        let rows = match self.show_databases_like(self.admin_host(), &like) {
            Ok(rows) => rows,
            Err(e) if e.is_missing_database() => {
                warn!(pattern = %like, error = %e, "Could not list tenant databases");
                return Ok(BTreeSet::new());
            }
            Err(e) => return Err(e),
        };

        let mut tenants = BTreeSet::new();
        for name in rows.into_iter().filter_map(first_column) {
            if self.template.is_non_tenant_database(&name) {
                continue;
            }
            match capture.capture(&name) {
                Some(tenant) => {
                    tenants.insert(TenantId::new(tenant));
                }
                None => warn!(
                    database = %name,
                    template = %self.template.database,
                    "Skipping database that does not match the tenant template"
                ),
            }
        }
        Ok(tenants)
    }

    fn test_workerize(&self, database: &str, worker_id: &str) -> String {
        append_worker_suffix(database, worker_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("app_acme"), "`app_acme`");
        assert_eq!(quote_identifier("we`ird"), "`we``ird`");
    }

    #[test]
    fn test_quote_string() {
        assert_eq!(quote_string("app_%"), "'app_%'");
        assert_eq!(quote_string("o'neil"), "'o''neil'");
        assert_eq!(quote_string(r"app\_%"), r"'app\\_%'");
    }

    #[test]
    fn test_escape_like() {
        assert!(matches!(escape_like("plain"), Cow::Borrowed("plain")));
        assert_eq!(escape_like("app_"), r"app\_");
        assert_eq!(escape_like(r"50%\off"), r"50\%\\off");
    }

    #[test]
    fn test_like_pattern_for_template() {
        let pattern = TenantPattern::parse("app_{tenant}_db").unwrap();
        let like = pattern.wildcard_pattern("%", escape_like).unwrap();
        assert_eq!(like, r"app\_%\_db");
        assert_eq!(quote_string(&like), r"'app\\_%\\_db'");
    }

    #[test]
    fn test_create_database_sql() {
        assert_eq!(
            create_database_sql("app_acme", &NamespaceOptions::default()).unwrap(),
            "CREATE DATABASE IF NOT EXISTS `app_acme`"
        );
        let options = NamespaceOptions {
            charset: Some("utf8mb4".to_string()),
            collation: Some("utf8mb4_unicode_ci".to_string()),
        };
        assert_eq!(
            create_database_sql("app_acme", &options).unwrap(),
            "CREATE DATABASE IF NOT EXISTS `app_acme` \
             CHARACTER SET utf8mb4 COLLATE utf8mb4_unicode_ci"
        );
    }

    #[test]
    fn test_create_database_sql_rejects_injected_settings() {
        let options = NamespaceOptions {
            charset: Some("utf8mb4; DROP DATABASE mysql; --".to_string()),
            collation: None,
        };
        assert!(matches!(
            create_database_sql("app_acme", &options),
            Err(TemplateError::InvalidSetting { setting, .. }) if setting == "charset"
        ));

        let options = NamespaceOptions {
            charset: None,
            collation: Some("utf8mb4_bin COLLATE x".to_string()),
        };
        assert!(create_database_sql("app_acme", &options).is_err());
    }

    #[test]
    fn test_first_column() {
        assert_eq!(first_column(vec![Some("a".into()), None]), Some("a".to_string()));
        assert_eq!(first_column(vec![None]), None);
        assert_eq!(first_column(Vec::new()), None);
    }
}
