//! Storage adapters.
//!
//! An adapter knows how one backend family names, creates, drops, discovers
//! and locks tenant databases. Two families exist:
//!
//! | Family | Adapter | Target | Locking |
//! |--------|---------|--------|---------|
//! | File | [`FileAdapter`] | Filesystem path | Advisory lock file next to the database |
//! | Server | [`ServerAdapter`] | Database name on a server | None |
//!
//! Server adapters need no lock of their own because the server serializes
//! `CREATE DATABASE`.
//!
//! Both implement [`StorageAdapter`]. [`Adapter`] is the tagged variant the
//! registry hands out; it forwards to whichever family it holds and adds the
//! family-aware [`Adapter::acquire_lock`].

pub mod file;
pub mod server;

pub use file::{FileAdapter, coerce_path};
pub use server::{
    AdminConnectOptions, AdminConnection, AdminConnector, NamespaceOptions, Row, ServerAdapter,
};

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::{DatabaseTemplate, TenantConfig};
use crate::error::TenancyResult;
use crate::pattern::TenantPattern;
use crate::tenant::TenantId;

/// The backend family an adapter belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterFamily {
    /// File-based single-writer engine (SQLite).
    File,
    /// Networked server engine hosting many databases (MySQL, MariaDB).
    Server,
}

impl fmt::Display for AdapterFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdapterFamily::File => write!(f, "file"),
            AdapterFamily::Server => write!(f, "server"),
        }
    }
}

/// The concrete location of one tenant's database.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResolvedTarget {
    /// A database file.
    Path(PathBuf),
    /// A database on a server.
    Namespace(String),
}

impl ResolvedTarget {
    /// Returns the path for file targets.
    pub fn as_path(&self) -> Option<&Path> {
        match self {
            ResolvedTarget::Path(path) => Some(path),
            ResolvedTarget::Namespace(_) => None,
        }
    }

    /// Returns the database name for server targets.
    pub fn as_namespace(&self) -> Option<&str> {
        match self {
            ResolvedTarget::Path(_) => None,
            ResolvedTarget::Namespace(name) => Some(name),
        }
    }
}

impl fmt::Display for ResolvedTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolvedTarget::Path(path) => write!(f, "{}", path.display()),
            ResolvedTarget::Namespace(name) => write!(f, "{}", name),
        }
    }
}

/// Operations every backend family provides.
pub trait StorageAdapter {
    /// The backend family.
    fn family(&self) -> AdapterFamily;

    /// The template this adapter was built for.
    fn template(&self) -> &DatabaseTemplate;

    /// Fails with [`crate::error::BadTenantNameError`] if `tenant` may not be used.
    fn validate_tenant_name(&self, tenant: &TenantId) -> TenancyResult<()>;

    /// Validates `tenant` and resolves its database location.
    fn target_for(&self, tenant: &TenantId) -> TenancyResult<ResolvedTarget>;

    /// Validates `tenant` and derives its configuration from the template.
    fn new_tenant_config(&self, tenant: &TenantId) -> TenancyResult<TenantConfig>;

    /// Creates the tenant's database if it does not exist yet.
    fn create_database(&self, config: &TenantConfig) -> TenancyResult<()>;

    /// Removes the tenant's database. Missing databases are not an error.
    fn drop_database(&self, config: &TenantConfig) -> TenancyResult<()>;

    /// Returns `true` if the tenant's database exists.
    ///
    /// A negative answer is not stable while another caller may be creating
    /// the database.
    fn database_exists(&self, config: &TenantConfig) -> TenancyResult<bool>;

    /// Returns `true` if the database exists and nobody is still populating it.
    fn database_ready(&self, config: &TenantConfig) -> TenancyResult<bool>;

    /// Lists the tenants that currently have a database.
    fn tenant_databases(&self) -> TenancyResult<BTreeSet<TenantId>>;

    /// Rewrites `database` so that each parallel test worker gets its own copy.
    fn test_workerize(&self, database: &str, worker_id: &str) -> String;
}

/// Resolves the host setting for `tenant`, substituting `{tenant}` if present.
pub(crate) fn resolve_host(
    template: &DatabaseTemplate,
    tenant: &TenantId,
) -> TenancyResult<Option<String>> {
    let Some(host) = &template.settings.host else {
        return Ok(None);
    };
    let pattern = TenantPattern::parse(host.as_str())?;
    if pattern.has_placeholder() {
        Ok(Some(pattern.target_for(tenant.as_str())?))
    } else {
        Ok(Some(host.clone()))
    }
}

/// Appends `_<worker_id>` to `name` unless it is already there.
pub(crate) fn append_worker_suffix(name: &str, worker_id: &str) -> String {
    let suffix = format!("_{worker_id}");
    if name.ends_with(&suffix) {
        name.to_string()
    } else {
        format!("{name}{suffix}")
    }
}

/// An adapter of either family, borrowed from its template.
#[derive(Debug)]
pub enum Adapter<'a> {
    /// File-backed databases.
    File(FileAdapter<'a>),
    /// Server-backed databases.
    Server(ServerAdapter<'a>),
}

impl<'a> Adapter<'a> {
    fn inner(&self) -> &(dyn StorageAdapter + 'a) {
        match self {
            Adapter::File(adapter) => adapter,
            Adapter::Server(adapter) => adapter,
        }
    }

    /// Runs `block` under the lock guarding `config`'s database.
    ///
    /// File adapters lock `lock_name` if given, otherwise the database path.
    /// Server adapters run `block` immediately.
    pub fn acquire_lock<T, F>(
        &self,
        config: &TenantConfig,
        lock_name: Option<&str>,
        block: F,
    ) -> TenancyResult<T>
    where
        F: FnOnce() -> TenancyResult<T>,
    {
        match self {
            Adapter::File(adapter) => {
                let lock_id = match lock_name {
                    Some(name) => PathBuf::from(name),
                    None => adapter.database_path(config)?,
                };
                adapter.acquire_lock(lock_id, block)
            }
            Adapter::Server(adapter) => {
                adapter.acquire_lock(lock_name.unwrap_or(config.database()), block)
            }
        }
    }
}

impl StorageAdapter for Adapter<'_> {
    fn family(&self) -> AdapterFamily {
        self.inner().family()
    }

    fn template(&self) -> &DatabaseTemplate {
        self.inner().template()
    }

    fn validate_tenant_name(&self, tenant: &TenantId) -> TenancyResult<()> {
        self.inner().validate_tenant_name(tenant)
    }

    fn target_for(&self, tenant: &TenantId) -> TenancyResult<ResolvedTarget> {
        self.inner().target_for(tenant)
    }

    fn new_tenant_config(&self, tenant: &TenantId) -> TenancyResult<TenantConfig> {
        self.inner().new_tenant_config(tenant)
    }

    fn create_database(&self, config: &TenantConfig) -> TenancyResult<()> {
        self.inner().create_database(config)
    }

    fn drop_database(&self, config: &TenantConfig) -> TenancyResult<()> {
        self.inner().drop_database(config)
    }

    fn database_exists(&self, config: &TenantConfig) -> TenancyResult<bool> {
        self.inner().database_exists(config)
    }

    fn database_ready(&self, config: &TenantConfig) -> TenancyResult<bool> {
        self.inner().database_ready(config)
    }

    fn tenant_databases(&self) -> TenancyResult<BTreeSet<TenantId>> {
        self.inner().tenant_databases()
    }

    fn test_workerize(&self, database: &str, worker_id: &str) -> String {
        self.inner().test_workerize(database, worker_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_family_display() {
        assert_eq!(AdapterFamily::File.to_string(), "file");
        assert_eq!(AdapterFamily::Server.to_string(), "server");
    }

    #[test]
    fn test_resolved_target_accessors() {
        let path = ResolvedTarget::Path(PathBuf::from("tenants/acme.sqlite3"));
        assert_eq!(path.as_path(), Some(Path::new("tenants/acme.sqlite3")));
        assert_eq!(path.as_namespace(), None);
        assert_eq!(path.to_string(), "tenants/acme.sqlite3");

        let namespace = ResolvedTarget::Namespace("app_acme".to_string());
        assert_eq!(namespace.as_namespace(), Some("app_acme"));
        assert_eq!(namespace.as_path(), None);
        assert_eq!(namespace.to_string(), "app_acme");
    }

    #[test]
    fn test_resolve_host() {
        let tenant = TenantId::new("acme");

        let none = DatabaseTemplate::new("mysql", "app_{tenant}");
        assert_eq!(resolve_host(&none, &tenant).unwrap(), None);

        let fixed = none.clone().with_host("db.internal");
        assert_eq!(
            resolve_host(&fixed, &tenant).unwrap().as_deref(),
            Some("db.internal")
        );

        let templated = none.with_host("{tenant}.db.internal");
        assert_eq!(
            resolve_host(&templated, &tenant).unwrap().as_deref(),
            Some("acme.db.internal")
        );
    }

    #[test]
    fn test_append_worker_suffix_is_idempotent() {
        assert_eq!(append_worker_suffix("app_{tenant}", "2"), "app_{tenant}_2");
        assert_eq!(append_worker_suffix("app_{tenant}_2", "2"), "app_{tenant}_2");
    }
}
