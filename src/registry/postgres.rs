//! Postgres-backed tenant registry.

use super::{InsertOutcome, RegistryEntry, RegistryError, TenantRegistry};
use crate::resilience::bounded;
use crate::tenant::TenantName;
use async_trait::async_trait;
use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS tenant_info (
    name TEXT PRIMARY KEY,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

/// Tenant registry stored in the `tenant_info` table.
#[derive(Clone)]
pub struct PgTenantRegistry {
    pool: PgPool,
    timeout: Duration,
}

impl PgTenantRegistry {
    /// Open a connection pool and verify connectivity.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        timeout: Duration,
    ) -> Result<Self, RegistryError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(timeout)
            .connect(database_url)
            .await?;
        let registry = Self::from_pool(pool, timeout);
        registry.ping().await?;
        tracing::debug!(max_connections, "Registry pool connected");
        Ok(registry)
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    /// Create the registry table when missing.
    pub async fn ensure_schema(&self) -> Result<(), RegistryError> {
        bounded(self.timeout, async {
            sqlx::query(CREATE_TABLE).execute(&self.pool).await?;
            Ok::<_, RegistryError>(())
        })
        .await
    }

    /// Number of rows stored for `tenant` (zero or one while the key holds).
    pub async fn count(&self, tenant: &TenantName) -> Result<i64, RegistryError> {
        bounded(self.timeout, async {
            let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tenant_info WHERE name = $1")
                .bind(tenant.as_str())
                .fetch_one(&self.pool)
                .await?;
            Ok::<_, RegistryError>(count)
        })
        .await
    }
}

#[async_trait]
impl TenantRegistry for PgTenantRegistry {
    async fn find(&self, tenant: &TenantName) -> Result<Option<RegistryEntry>, RegistryError> {
        bounded(self.timeout, async {
            let name: Option<String> =
                sqlx::query_scalar("SELECT name FROM tenant_info WHERE name = $1")
                    .bind(tenant.as_str())
                    .fetch_optional(&self.pool)
                    .await?;
            Ok::<_, RegistryError>(name.map(|name| RegistryEntry { name }))
        })
        .await
    }

    async fn insert(&self, tenant: &TenantName) -> Result<InsertOutcome, RegistryError> {
        bounded(self.timeout, async {
            let result = sqlx::query("INSERT INTO tenant_info (name) VALUES ($1)")
                .bind(tenant.as_str())
                .execute(&self.pool)
                .await;
            match result {
                Ok(_) => Ok(InsertOutcome::Inserted),
                Err(sqlx::Error::Database(error)) if error.is_unique_violation() => {
                    Ok(InsertOutcome::Conflict)
                }
                Err(error) => Err(RegistryError::from(error)),
            }
        })
        .await
    }

    async fn remove(&self, tenant: &TenantName) -> Result<bool, RegistryError> {
        bounded(self.timeout, async {
            let result = sqlx::query("DELETE FROM tenant_info WHERE name = $1")
                .bind(tenant.as_str())
                .execute(&self.pool)
                .await?;
            Ok::<_, RegistryError>(result.rows_affected() > 0)
        })
        .await
    }

    async fn ping(&self) -> Result<(), RegistryError> {
        bounded(self.timeout, async {
            sqlx::query("SELECT 1").execute(&self.pool).await?;
            Ok::<_, RegistryError>(())
        })
        .await
    }
}
