//! File-backed tenant databases (SQLite).
//!
//! Each tenant's database is a file whose path comes from the template, e.g.
//! `storage/tenants/{tenant}/main.sqlite3`. Templates may also be written as
//! `file:` URIs; they are coerced to plain paths for every filesystem
//! operation while the URI form is kept in [`TenantConfig::database`] for the
//! connection layer.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::{DatabaseTemplate, TenantConfig};
use crate::error::{BackendError, BadTenantNameError, NameRule, TenancyResult};
use crate::lock::{LOCK_SUFFIX, READY_SUFFIX, ReadyMarker, with_file_lock};
use crate::pattern::{TenantPattern, has_unresolved_placeholder, verbatim};
use crate::tenant::TenantId;
use crate::validation::validate_file_tenant_name;

use super::{
    AdapterFamily, ResolvedTarget, StorageAdapter, append_worker_suffix, resolve_host,
};

const URI_SCHEME: &str = "file:";

/// Companion files SQLite keeps next to a database.
const COMPANION_SUFFIXES: [&str; 3] = ["-wal", "-shm", "-journal"];

/// Returns the suffix if `name` ends like a lock, marker or companion file.
fn sidecar_suffix(name: &str) -> Option<&'static str> {
    COMPANION_SUFFIXES
        .into_iter()
        .chain([LOCK_SUFFIX, READY_SUFFIX])
        .find(|suffix| name.ends_with(suffix))
}

/// Strips the `file:` scheme, authority and query from a URI, leaving the path.
fn strip_file_uri(database: &str) -> &str {
    let Some(rest) = database.strip_prefix(URI_SCHEME) else {
        return database;
    };
    let rest = rest.split(['?', '#']).next().unwrap_or(rest);
    match rest.strip_prefix("//") {
        // file://host/path and file:///path both keep only the path part.
        Some(authority_and_path) => authority_and_path
            .find('/')
            .map_or("", |at| &authority_and_path[at..]),
        None => rest,
    }
}

/// Coerces a database setting to a filesystem path.
///
/// `file:` URIs are reduced to their path. A string that still contains an
/// unresolved placeholder is returned as-is; it is coerced once the tenant
/// has been substituted.
///
/// ```
/// use std::path::PathBuf;
/// use helios_tenancy::adapter::coerce_path;
///
/// let path = coerce_path("file:tenants/acme.sqlite3?mode=rwc");
/// assert_eq!(path, PathBuf::from("tenants/acme.sqlite3"));
///
/// let path = coerce_path("file:///var/db/acme.sqlite3");
/// assert_eq!(path, PathBuf::from("/var/db/acme.sqlite3"));
///
/// let path = coerce_path("file:{tenant}.sqlite3");
/// assert_eq!(path, PathBuf::from("file:{tenant}.sqlite3"));
/// ```
pub fn coerce_path(database: &str) -> PathBuf {
    if has_unresolved_placeholder(database) {
        return PathBuf::from(database);
    }
    PathBuf::from(strip_file_uri(database))
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn remove_if_present(path: &Path) -> Result<bool, BackendError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(BackendError::io(path, e)),
    }
}

fn create_database_file(path: &Path) -> Result<(), BackendError> {
    match fs::OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(_) => {}
        // Lost a race with another creator; the file is there either way.
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
        Err(e) => return Err(BackendError::io(path, e)),
    }
    check_database_file(path)
}

/// Opens the new file with SQLite to make sure it is a usable database.
#[cfg(feature = "sqlite")]
fn check_database_file(path: &Path) -> Result<(), BackendError> {
    let sqlite_error = |source: rusqlite::Error| BackendError::Sqlite {
        path: path.to_path_buf(),
        source,
    };
    let conn = rusqlite::Connection::open(path).map_err(sqlite_error)?;
    conn.pragma_query_value(None, "schema_version", |row| row.get::<_, i64>(0))
        .map_err(sqlite_error)?;
    conn.close().map_err(|(_, e)| sqlite_error(e))
}

#[cfg(not(feature = "sqlite"))]
fn check_database_file(_path: &Path) -> Result<(), BackendError> {
    Ok(())
}

/// Adapter for file-backed tenant databases.
#[derive(Debug, Clone)]
pub struct FileAdapter<'a> {
    template: &'a DatabaseTemplate,
    /// The template with any `file:` URI syntax stripped.
    path_pattern: TenantPattern,
}

impl<'a> FileAdapter<'a> {
    /// Creates an adapter for `template`.
    pub fn new(template: &'a DatabaseTemplate) -> TenancyResult<Self> {
        let path_pattern = TenantPattern::parse(strip_file_uri(&template.database))?;
        Ok(Self {
            template,
            path_pattern,
        })
    }

    /// Returns the filesystem path of `config`'s database.
    ///
    /// The path is rebuilt from the tenant and the template's path, so URI
    /// query characters inside the tenant name stay part of the file name.
    pub fn database_path(&self, config: &TenantConfig) -> TenancyResult<PathBuf> {
        let path = self.path_pattern.target_for(config.tenant().as_str())?;
        Ok(PathBuf::from(path))
    }

    /// Runs `block` while holding the advisory lock for `lock_id`.
    ///
    /// Blocks until the lock is free. The lock file is `<lock_id>.lock`.
    pub fn acquire_lock<T, F>(&self, lock_id: impl AsRef<Path>, block: F) -> TenancyResult<T>
    where
        F: FnOnce() -> TenancyResult<T>,
    {
        with_file_lock(lock_id, block)
    }

    /// Runs `block` with the database marked as not ready.
    ///
    /// Use this while loading schema into a freshly created database so that
    /// [`StorageAdapter::database_ready`] reports `false` in other processes.
    pub fn mark_not_ready<T, F>(&self, config: &TenantConfig, block: F) -> TenancyResult<T>
    where
        F: FnOnce() -> TenancyResult<T>,
    {
        let _marker = ReadyMarker::hold(self.database_path(config)?)?;
        block()
    }

    /// Lists the paths that match the template with any tenant substituted.
    ///
    /// Only the path component holding the placeholder is listed; the
    /// components after it are literal and just checked for existence.
    fn expand_tenant_paths(&self) -> TenancyResult<Vec<String>> {
        let (prefix, suffix) = self.path_pattern.segments()?;
        let dir_end = prefix.rfind('/').map_or(0, |at| at + 1);
        let component_end = suffix.find('/').unwrap_or(suffix.len());

        let dir = &prefix[..dir_end];
        let component_prefix = &prefix[dir_end..];
        let component_suffix = &suffix[..component_end];
        let rest = &suffix[component_end..];

        let listing = if dir.is_empty() { Path::new(".") } else { Path::new(dir) };
        let entries = match fs::read_dir(listing) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(directory = %listing.display(), "Tenant directory does not exist yet");
                return Ok(Vec::new());
            }
            Err(e) => {
                warn!(
                    directory = %listing.display(),
                    error = %e,
                    "Failed to list tenant directory"
                );
                return Ok(Vec::new());
            }
        };

        let mut matches = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(
                        directory = %listing.display(),
                        error = %e,
                        "Failed to read directory entry"
                    );
                    continue;
                }
            };
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                warn!(entry = ?file_name, "Skipping non UTF-8 directory entry");
                continue;
            };
            if name.len() <= component_prefix.len() + component_suffix.len()
                || !name.starts_with(component_prefix)
                || !name.ends_with(component_suffix)
            {
                continue;
            }
            if rest.is_empty()
                && let Some(sidecar) = sidecar_suffix(name)
                && !component_suffix.ends_with(sidecar)
            {
                continue;
            }
            let candidate = format!("{dir}{name}{rest}");
            if Path::new(&candidate).exists() {
                matches.push(candidate);
            }
        }
        Ok(matches)
    }
}

impl StorageAdapter for FileAdapter<'_> {
    fn family(&self) -> AdapterFamily {
        AdapterFamily::File
    }

    fn template(&self) -> &DatabaseTemplate {
        self.template
    }

    fn validate_tenant_name(&self, tenant: &TenantId) -> TenancyResult<()> {
        validate_file_tenant_name(tenant.as_str())?;

        // Names that turn the database file into a lock or journal lookalike
        // would be hidden from enumeration.
        if let Ok((_, suffix)) = self.path_pattern.segments()
            && let Some(sidecar) = sidecar_suffix(&format!("{tenant}{suffix}"))
            && !suffix.ends_with(sidecar)
        {
            return Err(BadTenantNameError::new(
                tenant.as_str(),
                NameRule::ReservedSuffix(sidecar.to_string()),
            )
            .into());
        }
        Ok(())
    }

    fn target_for(&self, tenant: &TenantId) -> TenancyResult<ResolvedTarget> {
        self.validate_tenant_name(tenant)?;
        let path = self.path_pattern.target_for(tenant.as_str())?;
        Ok(ResolvedTarget::Path(PathBuf::from(path)))
    }

    fn new_tenant_config(&self, tenant: &TenantId) -> TenancyResult<TenantConfig> {
        self.validate_tenant_name(tenant)?;
        let database = self.template.pattern()?.target_for(tenant.as_str())?;
        let host = resolve_host(self.template, tenant)?;
        Ok(TenantConfig::new(
            tenant.clone(),
            database,
            host,
            self.template.clone(),
        ))
    }

    fn create_database(&self, config: &TenantConfig) -> TenancyResult<()> {
        let path = self.database_path(config)?;

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| BackendError::io(parent, e))?;
        }

        if path.exists() {
            debug!(
                tenant = %config.tenant(),
                database = %path.display(),
                "Tenant database already exists"
            );
            return Ok(());
        }

        create_database_file(&path)?;
        info!(tenant = %config.tenant(), database = %path.display(), "Created tenant database");
        Ok(())
    }

    fn drop_database(&self, config: &TenantConfig) -> TenancyResult<()> {
        let path = self.database_path(config)?;

        let mut removed = remove_if_present(&path)?;
        for suffix in COMPANION_SUFFIXES {
            removed |= remove_if_present(&with_suffix(&path, suffix))?;
        }

        if removed {
            info!(tenant = %config.tenant(), database = %path.display(), "Dropped tenant database");
        } else {
            debug!(
                tenant = %config.tenant(),
                database = %path.display(),
                "Tenant database already absent"
            );
        }
        Ok(())
    }

    fn database_exists(&self, config: &TenantConfig) -> TenancyResult<bool> {
        Ok(self.database_path(config)?.exists())
    }

    fn database_ready(&self, config: &TenantConfig) -> TenancyResult<bool> {
        let path = self.database_path(config)?;
        if !path.exists() {
            return Ok(false);
        }
        Ok(!ReadyMarker::is_held(&path)?)
    }

    fn tenant_databases(&self) -> TenancyResult<BTreeSet<TenantId>> {
        let glob = self.path_pattern.wildcard_pattern("*", verbatim)?;
        let capture = self.path_pattern.capture_pattern()?.forbidding('/');
        debug!(pattern = %glob, "Listing tenant databases");

        let mut tenants = BTreeSet::new();
        for path in self.expand_tenant_paths()? {
            if self.template.is_non_tenant_database(&path) {
                continue;
            }
            match capture.capture(&path) {
                Some(tenant) => {
                    tenants.insert(TenantId::new(tenant));
                }
                None => warn!(
                    path = %path,
                    template = %self.template.database,
                    "Skipping file that does not match the tenant template"
                ),
            }
        }
        Ok(tenants)
    }

    fn test_workerize(&self, database: &str, worker_id: &str) -> String {
        if database.starts_with(URI_SCHEME)
            && let Some(query_at) = database.find('?')
        {
            let (path, query) = database.split_at(query_at);
            return format!("{}{}", append_worker_suffix(path, worker_id), query);
        }
        append_worker_suffix(database, worker_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_file_uri() {
        assert_eq!(strip_file_uri("tenants/acme.db"), "tenants/acme.db");
        assert_eq!(strip_file_uri("file:tenants/acme.db"), "tenants/acme.db");
        assert_eq!(strip_file_uri("file:tenants/acme.db?mode=rwc"), "tenants/acme.db");
        assert_eq!(strip_file_uri("file:/abs/acme.db#frag"), "/abs/acme.db");
        assert_eq!(strip_file_uri("file:///abs/acme.db"), "/abs/acme.db");
        assert_eq!(strip_file_uri("file://localhost/abs/acme.db"), "/abs/acme.db");
    }

    #[test]
    fn test_sidecar_suffix() {
        assert_eq!(sidecar_suffix("acme.sqlite3.lock"), Some(".lock"));
        assert_eq!(sidecar_suffix("acme.ready-lock"), Some(".ready-lock"));
        assert_eq!(sidecar_suffix("acme-shm"), Some("-shm"));
        assert_eq!(sidecar_suffix("acme.sqlite3"), None);
        assert_eq!(sidecar_suffix("padlock"), None);
    }

    #[test]
    fn test_coerce_path_defers_unresolved_templates() {
        assert_eq!(
            coerce_path("file:tenants/{tenant}.db?mode=rwc"),
            PathBuf::from("file:tenants/{tenant}.db?mode=rwc")
        );
        assert_eq!(
            coerce_path("file:tenants/acme.db?mode=rwc"),
            PathBuf::from("tenants/acme.db")
        );
    }

    #[test]
    fn test_target_for_uses_coerced_path() {
        let template = DatabaseTemplate::new("sqlite", "file:tenants/{tenant}.db?mode=rwc");
        let adapter = FileAdapter::new(&template).unwrap();

        let target = adapter.target_for(&TenantId::new("acme")).unwrap();
        assert_eq!(target, ResolvedTarget::Path(PathBuf::from("tenants/acme.db")));

        let config = adapter.new_tenant_config(&TenantId::new("acme")).unwrap();
        assert_eq!(config.database(), "file:tenants/acme.db?mode=rwc");
        assert_eq!(
            adapter.database_path(&config).unwrap(),
            PathBuf::from("tenants/acme.db")
        );
    }

    #[test]
    fn test_target_for_validates_first() {
        let template = DatabaseTemplate::new("sqlite", "tenants/{tenant}.db");
        let adapter = FileAdapter::new(&template).unwrap();

        assert!(adapter.target_for(&TenantId::new("../etc")).is_err());
        assert!(adapter.new_tenant_config(&TenantId::new("a'b")).is_err());
    }

    #[test]
    fn test_test_workerize() {
        let template = DatabaseTemplate::new("sqlite", "tenants/{tenant}.db");
        let adapter = FileAdapter::new(&template).unwrap();

        assert_eq!(
            adapter.test_workerize("tenants/{tenant}.db", "3"),
            "tenants/{tenant}.db_3"
        );
        assert_eq!(
            adapter.test_workerize("tenants/{tenant}.db_3", "3"),
            "tenants/{tenant}.db_3"
        );
        assert_eq!(
            adapter.test_workerize("file:tenants/{tenant}.db?mode=rwc", "3"),
            "file:tenants/{tenant}.db_3?mode=rwc"
        );
        assert_eq!(
            adapter.test_workerize("file:tenants/{tenant}.db_3?mode=rwc", "3"),
            "file:tenants/{tenant}.db_3?mode=rwc"
        );
    }
}
