//! Tenant identity.
//!
//! Tenants are identified by an opaque [`TenantId`]. Whether an identifier is
//! acceptable depends on the storage backend; see [`crate::validation`].

mod id;

pub use id::TenantId;
