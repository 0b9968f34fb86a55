//! Creation lock tests.
//!
//! These tests check that the registry's `acquire_lock` gives at most one
//! concurrent creator per file database, and that server databases are not
//! locked at all.

mod common;

use std::sync::Barrier;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use helios_tenancy::lock::lock_file_path;
use helios_tenancy::{AdapterRegistry, TenancyError, TenantId};

use common::{FakeServer, file_template, server_template};

const THREADS: usize = 8;

/// Test that contending creators never overlap and only one creates.
#[test]
fn test_single_creator_under_contention() {
    let dir = tempfile::tempdir().unwrap();
    let template = file_template(dir.path(), "tenants/{tenant}/main.sqlite3");
    let registry = AdapterRegistry::file_only();
    let config = registry
        .new_tenant_config(&template, &TenantId::new("acme"))
        .unwrap();

    let inside = AtomicUsize::new(0);
    let max_inside = AtomicUsize::new(0);
    let created = AtomicUsize::new(0);
    let barrier = Barrier::new(THREADS);

    thread::scope(|scope| {
        for _ in 0..THREADS {
            scope.spawn(|| {
                barrier.wait();
                registry
                    .acquire_lock(&config, None, || {
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_inside.fetch_max(now, Ordering::SeqCst);

                        if !registry.database_exists(&config)? {
                            thread::sleep(Duration::from_millis(20));
                            registry.create_database(&config)?;
                            created.fetch_add(1, Ordering::SeqCst);
                        }

                        inside.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .unwrap();
            });
        }
    });

    assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    assert_eq!(created.load(Ordering::SeqCst), 1);
    assert!(registry.database_exists(&config).unwrap());
    assert!(lock_file_path(config.database()).exists());
}

/// Test that different tenants do not wait for each other.
#[test]
fn test_different_targets_are_independent() {
    let dir = tempfile::tempdir().unwrap();
    let template = file_template(dir.path(), "{tenant}.sqlite3");
    let registry = AdapterRegistry::file_only();
    let acme = registry
        .new_tenant_config(&template, &TenantId::new("acme"))
        .unwrap();
    let globex = registry
        .new_tenant_config(&template, &TenantId::new("globex"))
        .unwrap();

    // Taking globex's lock while holding acme's would deadlock if they shared one.
    let value = registry
        .acquire_lock(&acme, None, || {
            registry.acquire_lock(&globex, None, || Ok(7))
        })
        .unwrap();
    assert_eq!(value, 7);
}

/// Test that an explicit lock name replaces the database path.
#[test]
fn test_explicit_lock_name() {
    let dir = tempfile::tempdir().unwrap();
    let template = file_template(dir.path(), "{tenant}.sqlite3");
    let registry = AdapterRegistry::file_only();
    let config = registry
        .new_tenant_config(&template, &TenantId::new("acme"))
        .unwrap();

    let lock_name = dir.path().join("locks/schema-load").display().to_string();
    registry
        .acquire_lock(&config, Some(lock_name.as_str()), || Ok(()))
        .unwrap();

    assert!(lock_file_path(&lock_name).exists());
    assert!(!lock_file_path(config.database()).exists());
}

/// Test that errors from the block come back unchanged and release the lock.
#[test]
fn test_block_error_propagates() {
    let dir = tempfile::tempdir().unwrap();
    let template = file_template(dir.path(), "{tenant}.sqlite3");
    let registry = AdapterRegistry::file_only();
    let config = registry
        .new_tenant_config(&template, &TenantId::new("acme"))
        .unwrap();

    let err = registry
        .acquire_lock(&config, None, || -> Result<(), TenancyError> {
            registry.new_tenant_config(&template, &TenantId::new("a/b"))?;
            Ok(())
        })
        .unwrap_err();
    assert!(matches!(err, TenancyError::BadTenantName(_)));

    // The lock is free again.
    registry.acquire_lock(&config, None, || Ok(())).unwrap();
}

/// Test that server databases run the block without any lock file.
#[test]
fn test_server_lock_is_pass_through() {
    let dir = tempfile::tempdir().unwrap();
    let server = FakeServer::new();
    let registry = AdapterRegistry::new(server.connector());
    let template = server_template("app_{tenant}");
    let config = registry
        .new_tenant_config(&template, &TenantId::new("acme"))
        .unwrap();

    let lock_name = dir.path().join("never").display().to_string();
    let value = registry
        .acquire_lock(&config, Some(lock_name.as_str()), || {
            // Nested acquisition would block forever on a real lock.
            registry.acquire_lock(&config, Some(lock_name.as_str()), || Ok("ran"))
        })
        .unwrap();

    assert_eq!(value, "ran");
    assert!(!lock_file_path(&lock_name).exists());
    assert_eq!(server.connection_count(), 0);
}
