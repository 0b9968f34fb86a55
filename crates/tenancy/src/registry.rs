//! Adapter registry and dispatcher.
//!
//! [`AdapterRegistry`] maps backend kinds (the `adapter` field of a
//! [`DatabaseTemplate`]) to adapter families and forwards tenant operations to
//! the matching adapter. It is built once at startup and shared by
//! reference; there is no global registry.
//!
//! # Example
//!
//! ```
//! use helios_tenancy::config::DatabaseTemplate;
//! use helios_tenancy::registry::AdapterRegistry;
//! use helios_tenancy::tenant::TenantId;
//!
//! let registry = AdapterRegistry::file_only();
//! let template = DatabaseTemplate::new("sqlite", "tenants/{tenant}.sqlite3");
//!
//! let config = registry.new_tenant_config(&template, &TenantId::new("acme")).unwrap();
//! assert_eq!(config.database(), "tenants/acme.sqlite3");
//!
//! let err = registry
//!     .new_tenant_config(&DatabaseTemplate::new("mongodb", "{tenant}"), &TenantId::new("acme"))
//!     .unwrap_err();
//! assert_eq!(
//!     err.to_string(),
//!     "unsupported database adapter 'mongodb' (supported: sqlite, mysql, mariadb)"
//! );
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::adapter::{
    Adapter, AdapterFamily, AdminConnector, FileAdapter, ServerAdapter, StorageAdapter,
};
use crate::config::{DatabaseTemplate, TenantConfig};
use crate::error::{BackendError, TenancyResult, UnsupportedAdapterError};
use crate::tenant::TenantId;

/// Backend kinds known to every registry, in lookup order.
pub const DEFAULT_KINDS: [(&str, AdapterFamily); 3] = [
    ("sqlite", AdapterFamily::File),
    ("mysql", AdapterFamily::Server),
    ("mariadb", AdapterFamily::Server),
];

/// Maps backend kinds to adapters.
#[derive(Clone)]
pub struct AdapterRegistry {
    table: Vec<(String, AdapterFamily)>,
    connector: Option<Arc<dyn AdminConnector>>,
}

impl fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("table", &self.table)
            .field("connector", &self.connector.is_some())
            .finish()
    }
}

impl AdapterRegistry {
    /// Creates a registry whose server adapters use `connector`.
    pub fn new(connector: Arc<dyn AdminConnector>) -> Self {
        Self {
            table: Self::default_table(),
            connector: Some(connector),
        }
    }

    /// Creates a registry without administrative access.
    ///
    /// Server kinds are still recognized, but using them fails with
    /// [`BackendError::ConnectorMissing`].
    pub fn file_only() -> Self {
        Self {
            table: Self::default_table(),
            connector: None,
        }
    }

    fn default_table() -> Vec<(String, AdapterFamily)> {
        DEFAULT_KINDS
            .iter()
            .map(|(kind, family)| (kind.to_string(), *family))
            .collect()
    }

    /// Registers an additional backend kind, or remaps an existing one.
    pub fn with_kind(mut self, kind: impl Into<String>, family: AdapterFamily) -> Self {
        let kind = kind.into();
        match self.table.iter_mut().find(|(known, _)| *known == kind) {
            Some(entry) => entry.1 = family,
            None => self.table.push((kind, family)),
        }
        self
    }

    /// Every registered backend kind, in lookup order.
    pub fn supported_kinds(&self) -> Vec<&str> {
        self.table.iter().map(|(kind, _)| kind.as_str()).collect()
    }

    /// Looks up the family for `kind`.
    pub fn family_for(&self, kind: &str) -> Result<AdapterFamily, UnsupportedAdapterError> {
        self.table
            .iter()
            .find(|(known, _)| known == kind)
            .map(|(_, family)| *family)
            .ok_or_else(|| UnsupportedAdapterError {
                kind: kind.to_string(),
                supported: self.table.iter().map(|(kind, _)| kind.clone()).collect(),
            })
    }

    /// Builds the adapter for `template`.
    pub fn adapter_for<'a>(&'a self, template: &'a DatabaseTemplate) -> TenancyResult<Adapter<'a>> {
        match self.family_for(&template.adapter)? {
            AdapterFamily::File => Ok(Adapter::File(FileAdapter::new(template)?)),
            AdapterFamily::Server => {
                let connector = self.connector.as_deref().ok_or_else(|| {
                    BackendError::ConnectorMissing {
                        kind: template.adapter.clone(),
                    }
                })?;
                Ok(Adapter::Server(ServerAdapter::new(template, connector)?))
            }
        }
    }

    /// Validates `tenant` against the rules of the template's backend.
    pub fn validate_tenant_name(
        &self,
        template: &DatabaseTemplate,
        tenant: &TenantId,
    ) -> TenancyResult<()> {
        self.adapter_for(template)?.validate_tenant_name(tenant)
    }

    /// Validates `tenant` and derives its configuration.
    pub fn new_tenant_config(
        &self,
        template: &DatabaseTemplate,
        tenant: &TenantId,
    ) -> TenancyResult<TenantConfig> {
        self.adapter_for(template)?.new_tenant_config(tenant)
    }

    /// Creates the database described by `config`.
    pub fn create_database(&self, config: &TenantConfig) -> TenancyResult<()> {
        self.adapter_for(config.template())?.create_database(config)
    }

    /// Drops the database described by `config`.
    pub fn drop_database(&self, config: &TenantConfig) -> TenancyResult<()> {
        self.adapter_for(config.template())?.drop_database(config)
    }

    /// Returns `true` if the database described by `config` exists.
    pub fn database_exists(&self, config: &TenantConfig) -> TenancyResult<bool> {
        self.adapter_for(config.template())?.database_exists(config)
    }

    /// Returns `true` if the database exists and is fully populated.
    pub fn database_ready(&self, config: &TenantConfig) -> TenancyResult<bool> {
        self.adapter_for(config.template())?.database_ready(config)
    }

    /// Lists tenants with an existing database for `template`.
    pub fn tenant_databases(
        &self,
        template: &DatabaseTemplate,
    ) -> TenancyResult<BTreeSet<TenantId>> {
        self.adapter_for(template)?.tenant_databases()
    }

    /// Runs `block` under the creation lock for `config`.
    ///
    /// File backends lock `lock_name`, or the database path when `None`.
    /// Server backends run `block` immediately.
    pub fn acquire_lock<T, F>(
        &self,
        config: &TenantConfig,
        lock_name: Option<&str>,
        block: F,
    ) -> TenancyResult<T>
    where
        F: FnOnce() -> TenancyResult<T>,
    {
        self.adapter_for(config.template())?
            .acquire_lock(config, lock_name, block)
    }

    /// Returns `template` rewritten for its test worker, if it has one.
    pub fn workerized(&self, template: &DatabaseTemplate) -> TenancyResult<DatabaseTemplate> {
        let Some(worker_id) = template.settings.test_worker_id.as_deref() else {
            return Ok(template.clone());
        };
        let database = self
            .adapter_for(template)?
            .test_workerize(&template.database, worker_id);
        debug!(template = %template.database, workerized = %database, "Applied test worker suffix");

        let mut workerized = template.clone();
        workerized.database = database;
        Ok(workerized)
    }
}
