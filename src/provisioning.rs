//! Exactly-once tenant provisioning across the registry and the workspace store.
//!
//! The registry insert is the only serialization point: whoever wins it creates the workspace,
//! everybody else waits for that workspace to appear. A workspace that cannot be created is
//! compensated by deleting the registry row and then any workspace a waiter healed meanwhile.
//! A waiter that heals a workspace re-reads the row afterwards and discards its workspace if the
//! row is gone, so no workspace outlives its registry entry.

use crate::config::Config;
use crate::registry::{InsertOutcome, RegistryEntry, RegistryError, TenantRegistry};
use crate::resilience::{RetryPolicy, Transient, bounded};
use crate::tenant::TenantName;
use crate::workspace::{WorkspaceCreation, WorkspaceError, WorkspaceStore};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Result of [`TenantProvisioner::ensure_tenant`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// Registry entry and workspace were already in place.
    AlreadyExisted,
    /// This call created the registry entry and the workspace.
    Created,
}

/// Errors raised while provisioning a tenant.
#[derive(Debug, Error)]
pub enum ProvisioningError {
    /// Registry could not be queried or written.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
    /// Workspace store could not be queried.
    #[error("workspace store error: {0}")]
    Workspace(#[from] WorkspaceError),
    /// Workspace creation failed and the registry entry was removed again.
    #[error("workspace creation for tenant '{tenant}' failed; registry entry rolled back: {source}")]
    RolledBack {
        /// Tenant whose provisioning was undone.
        tenant: String,
        /// Final workspace creation failure.
        #[source]
        source: WorkspaceError,
    },
    /// Workspace creation and the compensating registry delete both failed.
    #[error(
        "tenant '{tenant}' is inconsistent: workspace creation failed ({workspace_error}) and registry rollback failed ({rollback_error})"
    )]
    Inconsistent {
        /// Tenant left with a registry entry but no workspace.
        tenant: String,
        /// Workspace creation failure.
        workspace_error: WorkspaceError,
        /// Registry delete failure.
        rollback_error: RegistryError,
    },
    /// A concurrent provisioner never produced the workspace and its registry entry vanished.
    #[error("workspace for tenant '{tenant}' did not become available")]
    WorkspaceUnavailable {
        /// Tenant being waited on.
        tenant: String,
    },
    /// The provisioning task stopped before reporting an outcome.
    #[error("provisioning task aborted: {0}")]
    Aborted(String),
}

impl Transient for ProvisioningError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Registry(error) => error.is_transient(),
            Self::Workspace(error) => error.is_transient(),
            Self::RolledBack { source, .. } => source.is_transient(),
            Self::WorkspaceUnavailable { .. } => true,
            Self::Inconsistent { .. } | Self::Aborted(_) => false,
        }
    }
}

/// Timing knobs for provisioning.
#[derive(Debug, Clone, Copy)]
pub struct ProvisioningSettings {
    /// Deadline applied to each registry and workspace call.
    pub call_timeout: Duration,
    /// Attempts and backoff for workspace creation before rolling back.
    pub create_retry: RetryPolicy,
    /// Polls and backoff while waiting for another provisioner's workspace.
    pub ready_poll: RetryPolicy,
}

impl ProvisioningSettings {
    /// Derive settings from the loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        let base_delay = Duration::from_millis(config.retry_base_delay_ms);
        Self {
            call_timeout: config.store_timeout(),
            create_retry: RetryPolicy::new(config.workspace_create_attempts, base_delay),
            ready_poll: RetryPolicy::new(config.workspace_ready_attempts, base_delay),
        }
    }
}

/// Coordinates the registry and the workspace store for one tenant at a time.
pub struct TenantProvisioner {
    registry: Arc<dyn TenantRegistry>,
    workspaces: Arc<dyn WorkspaceStore>,
    settings: ProvisioningSettings,
}

impl TenantProvisioner {
    /// Build a provisioner over the given stores.
    pub fn new(
        registry: Arc<dyn TenantRegistry>,
        workspaces: Arc<dyn WorkspaceStore>,
        settings: ProvisioningSettings,
    ) -> Self {
        Self {
            registry,
            workspaces,
            settings,
        }
    }

    /// Make sure `tenant` has exactly one registry entry and one workspace.
    pub async fn ensure_tenant(
        &self,
        tenant: &TenantName,
    ) -> Result<ProvisionOutcome, ProvisioningError> {
        let workspace = tenant.workspace_name();

        if self.find(tenant).await?.is_some() {
            self.await_workspace(tenant, &workspace).await?;
            tracing::debug!(tenant = %tenant, "Tenant already provisioned");
            return Ok(ProvisionOutcome::AlreadyExisted);
        }

        let inserted =
            bounded(self.settings.call_timeout, self.registry.insert(tenant)).await?;
        if inserted == InsertOutcome::Conflict {
            tracing::debug!(tenant = %tenant, "Registry insert lost to a concurrent upload");
            self.await_workspace(tenant, &workspace).await?;
            return Ok(ProvisionOutcome::AlreadyExisted);
        }

        match self.create_workspace(&workspace).await {
            Ok(creation) => {
                tracing::info!(
                    tenant = %tenant,
                    workspace = %workspace,
                    creation = ?creation,
                    "Tenant provisioned"
                );
                Ok(ProvisionOutcome::Created)
            }
            Err(error) => Err(self.roll_back(tenant, &workspace, error).await),
        }
    }

    async fn find(&self, tenant: &TenantName) -> Result<Option<RegistryEntry>, RegistryError> {
        bounded(self.settings.call_timeout, self.registry.find(tenant)).await
    }

    async fn create_workspace(&self, workspace: &str) -> Result<WorkspaceCreation, WorkspaceError> {
        let workspaces = &self.workspaces;
        let timeout = self.settings.call_timeout;
        self.settings
            .create_retry
            .run("workspace.create", move || {
                bounded(timeout, workspaces.create(workspace))
            })
            .await
    }

    async fn roll_back(
        &self,
        tenant: &TenantName,
        workspace: &str,
        workspace_error: WorkspaceError,
    ) -> ProvisioningError {
        tracing::warn!(
            tenant = %tenant,
            error = %workspace_error,
            "Workspace creation failed; removing registry entry"
        );

        let registry = &self.registry;
        let timeout = self.settings.call_timeout;
        let removal = self
            .settings
            .create_retry
            .run("registry.remove", move || bounded(timeout, registry.remove(tenant)))
            .await;

        match removal {
            Ok(_) => {
                // Row goes first; a healer re-reads it after creating.
                self.discard_workspace(tenant, workspace).await;
                ProvisioningError::RolledBack {
                    tenant: tenant.to_string(),
                    source: workspace_error,
                }
            }
            Err(rollback_error) => {
                tracing::error!(
                    tenant = %tenant,
                    workspace_error = %workspace_error,
                    rollback_error = %rollback_error,
                    "Registry entry left without a workspace"
                );
                ProvisioningError::Inconsistent {
                    tenant: tenant.to_string(),
                    workspace_error,
                    rollback_error,
                }
            }
        }
    }

    /// Wait for the workspace another provisioner is creating; heal it if that provisioner died.
    async fn await_workspace(
        &self,
        tenant: &TenantName,
        workspace: &str,
    ) -> Result<(), ProvisioningError> {
        let polls = self.settings.ready_poll.max_attempts.max(1);
        for poll in 1..=polls {
            if bounded(self.settings.call_timeout, self.workspaces.exists(workspace)).await? {
                return Ok(());
            }
            if poll < polls {
                tokio::time::sleep(self.settings.ready_poll.delay_after(poll)).await;
            }
        }

        if self.find(tenant).await?.is_none() {
            return Err(ProvisioningError::WorkspaceUnavailable {
                tenant: tenant.to_string(),
            });
        }

        tracing::warn!(
            tenant = %tenant,
            workspace,
            "Registry entry has no workspace; creating it"
        );
        self.create_workspace(workspace).await?;

        if self.find(tenant).await?.is_none() {
            // The owner rolled back while this call was healing.
            self.discard_workspace(tenant, workspace).await;
            return Err(ProvisioningError::WorkspaceUnavailable {
                tenant: tenant.to_string(),
            });
        }
        Ok(())
    }

    /// Best-effort delete of a workspace whose registry row is gone.
    async fn discard_workspace(&self, tenant: &TenantName, workspace: &str) {
        let workspaces = &self.workspaces;
        let timeout = self.settings.call_timeout;
        let removal = self
            .settings
            .create_retry
            .run("workspace.remove", move || {
                bounded(timeout, workspaces.remove(workspace))
            })
            .await;

        match removal {
            Ok(true) => {
                tracing::warn!(
                    tenant = %tenant,
                    workspace,
                    "Removed workspace without registry entry"
                );
            }
            Ok(false) => {}
            Err(error) => {
                tracing::error!(
                    tenant = %tenant,
                    workspace,
                    error = %error,
                    "Workspace left without a registry entry"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::DocumentRecord;
    use async_trait::async_trait;
    use reqwest::StatusCode;
    use std::collections::BTreeSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

    #[derive(Default)]
    struct MemoryRegistry {
        rows: Mutex<BTreeSet<String>>,
        fail_remove: AtomicBool,
    }

    impl MemoryRegistry {
        fn with_row(name: &str) -> Self {
            let registry = Self::default();
            registry.rows.lock().unwrap().insert(name.to_string());
            registry
        }

        fn rows(&self) -> Vec<String> {
            self.rows.lock().unwrap().iter().cloned().collect()
        }
    }

    #[async_trait]
    impl TenantRegistry for MemoryRegistry {
        async fn find(&self, tenant: &TenantName) -> Result<Option<RegistryEntry>, RegistryError> {
            tokio::task::yield_now().await;
            let rows = self.rows.lock().unwrap();
            Ok(rows.get(tenant.as_str()).map(|name| RegistryEntry { name: name.clone() }))
        }

        async fn insert(&self, tenant: &TenantName) -> Result<InsertOutcome, RegistryError> {
            tokio::task::yield_now().await;
            if self.rows.lock().unwrap().insert(tenant.to_string()) {
                Ok(InsertOutcome::Inserted)
            } else {
                Ok(InsertOutcome::Conflict)
            }
        }

        async fn remove(&self, tenant: &TenantName) -> Result<bool, RegistryError> {
            if self.fail_remove.load(Ordering::SeqCst) {
                return Err(RegistryError::Unavailable("connection reset".into()));
            }
            Ok(self.rows.lock().unwrap().remove(tenant.as_str()))
        }

        async fn ping(&self) -> Result<(), RegistryError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemoryWorkspaces {
        names: Mutex<BTreeSet<String>>,
        create_calls: AtomicUsize,
        failures_left: AtomicU32,
        permanent_failure: AtomicBool,
        /// Registry whose `acme` row disappears as soon as a workspace is created.
        rollback_on_create: Mutex<Option<Arc<MemoryRegistry>>>,
    }

    impl MemoryWorkspaces {
        fn names(&self) -> Vec<String> {
            self.names.lock().unwrap().iter().cloned().collect()
        }

        fn insert(&self, name: &str) {
            self.names.lock().unwrap().insert(name.to_string());
        }
    }

    #[async_trait]
    impl WorkspaceStore for MemoryWorkspaces {
        async fn exists(&self, workspace: &str) -> Result<bool, WorkspaceError> {
            Ok(self.names.lock().unwrap().contains(workspace))
        }

        async fn create(&self, workspace: &str) -> Result<WorkspaceCreation, WorkspaceError> {
            self.create_calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            if self.permanent_failure.load(Ordering::SeqCst) {
                return Err(WorkspaceError::UnexpectedStatus {
                    status: StatusCode::BAD_REQUEST,
                    body: "invalid collection config".into(),
                });
            }
            let remaining = self.failures_left.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures_left.store(remaining - 1, Ordering::SeqCst);
                return Err(WorkspaceError::UnexpectedStatus {
                    status: StatusCode::SERVICE_UNAVAILABLE,
                    body: "overloaded".into(),
                });
            }
            let created = self.names.lock().unwrap().insert(workspace.to_string());
            if let Some(registry) = self.rollback_on_create.lock().unwrap().as_ref() {
                registry.rows.lock().unwrap().remove("acme");
            }
            if created {
                Ok(WorkspaceCreation::Created)
            } else {
                Ok(WorkspaceCreation::AlreadyPresent)
            }
        }

        async fn remove(&self, workspace: &str) -> Result<bool, WorkspaceError> {
            Ok(self.names.lock().unwrap().remove(workspace))
        }

        async fn append(
            &self,
            _workspace: &str,
            _record: &DocumentRecord,
        ) -> Result<(), WorkspaceError> {
            Ok(())
        }

        async fn ping(&self) -> Result<(), WorkspaceError> {
            Ok(())
        }
    }

    fn settings() -> ProvisioningSettings {
        ProvisioningSettings {
            call_timeout: Duration::from_secs(1),
            create_retry: RetryPolicy::new(3, Duration::from_millis(1)),
            ready_poll: RetryPolicy::new(4, Duration::from_millis(10)),
        }
    }

    fn provisioner(
        registry: &Arc<MemoryRegistry>,
        workspaces: &Arc<MemoryWorkspaces>,
    ) -> TenantProvisioner {
        TenantProvisioner::new(registry.clone(), workspaces.clone(), settings())
    }

    fn acme() -> TenantName {
        TenantName::parse("acme").expect("tenant")
    }

    #[tokio::test]
    async fn creates_entry_and_workspace_for_new_tenant() {
        let registry = Arc::new(MemoryRegistry::default());
        let workspaces = Arc::new(MemoryWorkspaces::default());

        let outcome = provisioner(&registry, &workspaces)
            .ensure_tenant(&acme())
            .await
            .expect("provisioned");

        assert_eq!(outcome, ProvisionOutcome::Created);
        assert_eq!(registry.rows(), vec!["acme".to_string()]);
        assert_eq!(workspaces.names(), vec!["tenant_acme".to_string()]);
    }

    #[tokio::test]
    async fn existing_tenant_is_confirmed_without_writes() {
        let registry = Arc::new(MemoryRegistry::with_row("acme"));
        let workspaces = Arc::new(MemoryWorkspaces::default());
        workspaces.insert("tenant_acme");

        let outcome = provisioner(&registry, &workspaces)
            .ensure_tenant(&acme())
            .await
            .expect("confirmed");

        assert_eq!(outcome, ProvisionOutcome::AlreadyExisted);
        assert_eq!(workspaces.create_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn transient_workspace_failure_is_retried() {
        let registry = Arc::new(MemoryRegistry::default());
        let workspaces = Arc::new(MemoryWorkspaces::default());
        workspaces.failures_left.store(2, Ordering::SeqCst);

        let outcome = provisioner(&registry, &workspaces)
            .ensure_tenant(&acme())
            .await
            .expect("provisioned after retries");

        assert_eq!(outcome, ProvisionOutcome::Created);
        assert_eq!(workspaces.create_calls.load(Ordering::SeqCst), 3);
        assert_eq!(workspaces.names(), vec!["tenant_acme".to_string()]);
    }

    #[tokio::test]
    async fn failed_workspace_rolls_back_registry_entry() {
        let registry = Arc::new(MemoryRegistry::default());
        let workspaces = Arc::new(MemoryWorkspaces::default());
        workspaces.permanent_failure.store(true, Ordering::SeqCst);

        let error = provisioner(&registry, &workspaces)
            .ensure_tenant(&acme())
            .await
            .expect_err("rolled back");

        assert!(matches!(error, ProvisioningError::RolledBack { ref tenant, .. } if tenant == "acme"));
        assert!(!error.is_transient());
        assert!(registry.rows().is_empty());
        assert!(workspaces.names().is_empty());
        assert_eq!(workspaces.create_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_rollback_reports_inconsistency() {
        let registry = Arc::new(MemoryRegistry::default());
        registry.fail_remove.store(true, Ordering::SeqCst);
        let workspaces = Arc::new(MemoryWorkspaces::default());
        workspaces.permanent_failure.store(true, Ordering::SeqCst);

        let error = provisioner(&registry, &workspaces)
            .ensure_tenant(&acme())
            .await
            .expect_err("inconsistent");

        assert!(matches!(error, ProvisioningError::Inconsistent { .. }));
        assert!(!error.is_transient());
    }

    #[tokio::test]
    async fn waits_for_workspace_created_by_race_winner() {
        let registry = Arc::new(MemoryRegistry::with_row("acme"));
        let workspaces = Arc::new(MemoryWorkspaces::default());

        let winner = workspaces.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(15)).await;
            winner.insert("tenant_acme");
        });

        let outcome = provisioner(&registry, &workspaces)
            .ensure_tenant(&acme())
            .await
            .expect("confirmed");

        assert_eq!(outcome, ProvisionOutcome::AlreadyExisted);
        assert_eq!(workspaces.create_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn heals_registry_entry_without_workspace() {
        let registry = Arc::new(MemoryRegistry::with_row("acme"));
        let workspaces = Arc::new(MemoryWorkspaces::default());

        let outcome = provisioner(&registry, &workspaces)
            .ensure_tenant(&acme())
            .await
            .expect("healed");

        assert_eq!(outcome, ProvisionOutcome::AlreadyExisted);
        assert_eq!(workspaces.names(), vec!["tenant_acme".to_string()]);
        assert_eq!(registry.rows(), vec!["acme".to_string()]);
    }

    #[tokio::test]
    async fn vanished_entry_reports_unavailable_workspace() {
        let registry = Arc::new(MemoryRegistry::with_row("acme"));
        let workspaces = Arc::new(MemoryWorkspaces::default());

        let owner = registry.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(15)).await;
            owner.rows.lock().unwrap().remove("acme");
        });

        let error = provisioner(&registry, &workspaces)
            .ensure_tenant(&acme())
            .await
            .expect_err("owner rolled back");

        assert!(
            matches!(error, ProvisioningError::WorkspaceUnavailable { ref tenant } if tenant == "acme")
        );
        assert!(error.is_transient());
        assert_eq!(workspaces.create_calls.load(Ordering::SeqCst), 0);
        assert!(workspaces.names().is_empty());
    }

    #[tokio::test]
    async fn rollback_removes_workspace_healed_by_a_waiter() {
        let registry = Arc::new(MemoryRegistry::default());
        let workspaces = Arc::new(MemoryWorkspaces::default());
        workspaces.permanent_failure.store(true, Ordering::SeqCst);
        workspaces.insert("tenant_acme");

        let error = provisioner(&registry, &workspaces)
            .ensure_tenant(&acme())
            .await
            .expect_err("rolled back");

        assert!(matches!(error, ProvisioningError::RolledBack { .. }));
        assert!(registry.rows().is_empty());
        assert!(workspaces.names().is_empty());
    }

    #[tokio::test]
    async fn healing_discards_workspace_when_entry_is_rolled_back() {
        let registry = Arc::new(MemoryRegistry::with_row("acme"));
        let workspaces = Arc::new(MemoryWorkspaces::default());
        *workspaces.rollback_on_create.lock().unwrap() = Some(registry.clone());

        let error = provisioner(&registry, &workspaces)
            .ensure_tenant(&acme())
            .await
            .expect_err("owner rolled back during heal");

        assert!(matches!(error, ProvisioningError::WorkspaceUnavailable { .. }));
        assert!(error.is_transient());
        assert_eq!(workspaces.create_calls.load(Ordering::SeqCst), 1);
        assert!(registry.rows().is_empty());
        assert!(workspaces.names().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_uploads_provision_once() {
        let registry = Arc::new(MemoryRegistry::default());
        let workspaces = Arc::new(MemoryWorkspaces::default());
        let provisioner = Arc::new(provisioner(&registry, &workspaces));

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..16 {
            let provisioner = provisioner.clone();
            tasks.spawn(async move { provisioner.ensure_tenant(&acme()).await });
        }

        let mut created = 0;
        while let Some(joined) = tasks.join_next().await {
            let outcome = joined.expect("task").expect("provisioned");
            if outcome == ProvisionOutcome::Created {
                created += 1;
            }
        }

        assert_eq!(created, 1);
        assert_eq!(registry.rows(), vec!["acme".to_string()]);
        assert_eq!(workspaces.names(), vec!["tenant_acme".to_string()]);
    }
}
