//! Helios Tenant Database Provisioning
//!
//! This crate gives every tenant its own physical database and keeps the
//! mapping between tenant identifiers and databases consistent in both
//! directions. It is the database-per-tenant layer underneath connection
//! handling: it names, creates, drops, discovers and locks tenant databases,
//! but never holds connections to them.
//!
//! # Features
//!
//! - **Two backend families**: file databases (SQLite) and server databases
//!   (MySQL, MariaDB) behind one [`StorageAdapter`] contract
//! - **Bidirectional templates**: `{tenant}` templates resolve tenant → database
//!   and recover database → tenant for enumeration
//! - **Backend-specific validation**: tenant names are checked before they
//!   touch a path or a SQL statement
//! - **Creation locking**: cross-process advisory file locks for file
//!   databases; server databases rely on the server
//!
//! Available features:
//! - `sqlite` (default) - create file databases through SQLite
//!
//! # Architecture
//!
//! - [`tenant`] - Tenant identifiers
//! - [`config`] - Database templates and resolved per-tenant configuration
//! - [`pattern`] - `{tenant}` template parsing, wildcards and reverse matching
//! - [`validation`] - Tenant name rules per backend family
//! - [`adapter`] - File and server storage adapters
//! - [`lock`] - Advisory file locks and ready markers
//! - [`registry`] - Backend kind lookup and dispatch
//! - [`error`] - Error types for all operations
//!
//! # Quick Start
//!
//! ```
//! use helios_tenancy::{AdapterRegistry, DatabaseTemplate, TenantId};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let template = DatabaseTemplate::new(
//!     "sqlite",
//!     format!("{}/tenants/{{tenant}}/main.sqlite3", dir.path().display()),
//! );
//! let registry = AdapterRegistry::file_only();
//!
//! let config = registry.new_tenant_config(&template, &TenantId::new("acme")).unwrap();
//! registry
//!     .acquire_lock(&config, None, || {
//!         if !registry.database_exists(&config)? {
//!             registry.create_database(&config)?;
//!         }
//!         Ok(())
//!     })
//!     .unwrap();
//!
//! let tenants = registry.tenant_databases(&template).unwrap();
//! assert!(tenants.contains(&TenantId::new("acme")));
//! ```
//!
//! Invalid tenant names are rejected before anything is resolved:
//!
//! ```
//! use helios_tenancy::{AdapterRegistry, DatabaseTemplate, TenancyError, TenantId};
//!
//! let registry = AdapterRegistry::file_only();
//! let template = DatabaseTemplate::new("sqlite", "tenants/{tenant}.sqlite3");
//!
//! let err = registry
//!     .new_tenant_config(&template, &TenantId::new("../etc/passwd"))
//!     .unwrap_err();
//! assert!(matches!(err, TenancyError::BadTenantName(_)));
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod adapter;
pub mod config;
pub mod error;
pub mod lock;
pub mod pattern;
pub mod registry;
pub mod tenant;
pub mod validation;

// Re-export commonly used types at crate root
pub use config::{DatabaseSettings, DatabaseTemplate, TenantConfig};
pub use error::{
    BackendError, BadTenantNameError, NameRule, TemplateError, TenancyError, TenancyResult,
    UnsupportedAdapterError,
};
pub use tenant::TenantId;

// Re-export adapter contract
pub use adapter::{
    Adapter, AdapterFamily, AdminConnectOptions, AdminConnection, AdminConnector, FileAdapter,
    NamespaceOptions, ResolvedTarget, Row, ServerAdapter, StorageAdapter,
};
pub use lock::{FileLock, FileLockGuard, ReadyMarker, with_file_lock};
pub use registry::AdapterRegistry;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
