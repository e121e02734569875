//! Relational registry of provisioned tenants.
//!
//! One row per tenant; the unique key on `name` is the single serialization point for
//! concurrent first-time provisioning.

mod postgres;

use crate::resilience::Transient;
use crate::tenant::TenantName;
use async_trait::async_trait;
use thiserror::Error;

pub use postgres::PgTenantRegistry;

/// Errors raised by registry backends.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Database driver reported a failure.
    #[error("Registry query failed: {0}")]
    Database(#[from] sqlx::Error),
    /// Query did not finish within the store deadline.
    #[error("Registry query timed out")]
    Timeout,
    /// Backend could not be reached (used by non-SQL backends and tests).
    #[error("Registry unavailable: {0}")]
    Unavailable(String),
}

impl Transient for RegistryError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::Unavailable(_) => true,
            Self::Database(error) => matches!(
                error,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::Tls(_)
            ),
        }
    }
}

impl From<tokio::time::error::Elapsed> for RegistryError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::Timeout
    }
}

/// Existing registry row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    /// Tenant name as stored.
    pub name: String,
}

/// Result of attempting to insert a registry row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// This caller's insert created the row.
    Inserted,
    /// The uniqueness constraint rejected the insert; another caller owns the row.
    Conflict,
}

/// Check-or-create store of tenant existence records.
#[async_trait]
pub trait TenantRegistry: Send + Sync {
    /// Look up the row for `tenant`.
    async fn find(&self, tenant: &TenantName) -> Result<Option<RegistryEntry>, RegistryError>;

    /// Insert a row for `tenant`, reporting a uniqueness conflict as [`InsertOutcome::Conflict`].
    async fn insert(&self, tenant: &TenantName) -> Result<InsertOutcome, RegistryError>;

    /// Delete the row for `tenant`; returns whether a row was removed.
    async fn remove(&self, tenant: &TenantName) -> Result<bool, RegistryError>;

    /// Cheap reachability probe.
    async fn ping(&self) -> Result<(), RegistryError>;
}
