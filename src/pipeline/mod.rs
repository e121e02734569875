//! Upload orchestration: intake, extraction, summarization, provisioning, recording.
//!
//! Stages run strictly in order and every one is bounded by what is left of the request
//! budget. The first failure ends the run; stages that already committed are left as they are.
//! Provisioning runs on its own task so a dropped request cannot interrupt it half-way.

mod intake;
mod types;

pub use intake::{Upload, UploadForm, ValidationError};
pub use types::{IngestReceipt, PipelineError, PipelineSettings, Stage};

use crate::config::TextRetention;
use crate::extraction::{TextExtractor, join_pages};
use crate::metrics::{IngestMetrics, MetricsSnapshot};
use crate::provisioning::{ProvisionOutcome, ProvisioningError, TenantProvisioner};
use crate::recording::{DocumentRecorder, NewDocument, content_digest};
use crate::registry::TenantRegistry;
use crate::resilience::bounded;
use crate::storage::FileStore;
use crate::summarization::{SummarizationClient, Summary, normalize_whitespace};
use crate::tenant::TenantName;
use crate::workspace::WorkspaceStore;
use async_trait::async_trait;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;

/// Abstraction over the pipeline used by the HTTP surface.
#[async_trait]
pub trait IngestApi: Send + Sync {
    /// Run one validated upload through every stage.
    async fn ingest(&self, upload: Upload) -> Result<IngestReceipt, PipelineError>;

    /// Reachability of the backing stores.
    async fn health(&self) -> HealthReport;

    /// Retrieve the current metrics snapshot for diagnostics.
    fn metrics_snapshot(&self) -> MetricsSnapshot;

    /// Largest accepted upload, in bytes.
    fn upload_limit(&self) -> usize;
}

/// Reachability of the registry and the workspace store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    /// Registry answered a ping.
    pub registry: bool,
    /// Workspace store answered a ping.
    pub workspace_store: bool,
}

impl HealthReport {
    /// Whether every dependency is reachable.
    pub fn is_healthy(&self) -> bool {
        self.registry && self.workspace_store
    }
}

/// Collaborators a pipeline is assembled from.
pub struct PipelineComponents {
    /// Destination for uploaded bytes.
    pub files: Arc<dyn FileStore>,
    /// Text extractor run on the blocking pool.
    pub extractor: Arc<dyn TextExtractor>,
    /// Summarization backend.
    pub summarizer: Arc<dyn SummarizationClient>,
    /// Tenant registry.
    pub registry: Arc<dyn TenantRegistry>,
    /// Workspace store.
    pub workspaces: Arc<dyn WorkspaceStore>,
}

/// Coordinates one upload from bytes to stored record.
///
/// Construct once at startup and share through an `Arc`; all state besides the metrics
/// counters lives in the backing stores.
pub struct IngestionPipeline {
    files: Arc<dyn FileStore>,
    extractor: Arc<dyn TextExtractor>,
    summarizer: Arc<dyn SummarizationClient>,
    registry: Arc<dyn TenantRegistry>,
    workspaces: Arc<dyn WorkspaceStore>,
    provisioner: Arc<TenantProvisioner>,
    recorder: DocumentRecorder,
    metrics: IngestMetrics,
    settings: PipelineSettings,
}

impl IngestionPipeline {
    /// Assemble a pipeline from its collaborators.
    pub fn new(components: PipelineComponents, settings: PipelineSettings) -> Self {
        let PipelineComponents {
            files,
            extractor,
            summarizer,
            registry,
            workspaces,
        } = components;

        let provisioner = Arc::new(TenantProvisioner::new(
            registry.clone(),
            workspaces.clone(),
            settings.provisioning,
        ));
        let recorder =
            DocumentRecorder::new(workspaces.clone(), settings.retry, settings.store_timeout);

        Self {
            files,
            extractor,
            summarizer,
            registry,
            workspaces,
            provisioner,
            recorder,
            metrics: IngestMetrics::new(),
            settings,
        }
    }

    /// Run `upload` through every stage.
    pub async fn process(&self, upload: Upload) -> Result<IngestReceipt, PipelineError> {
        let deadline = Instant::now() + self.settings.request_timeout;
        let tenant = upload.tenant.clone();
        self.metrics.record_upload();

        let result = self.run(upload, deadline).await;
        match &result {
            Ok(receipt) => self.metrics.record_document(receipt.tenant_created),
            Err(error) => {
                self.metrics.record_failure(error.stage());
                tracing::error!(
                    tenant = %tenant,
                    stage = %error.stage(),
                    error = %error,
                    "Upload failed"
                );
            }
        }
        result
    }

    async fn run(
        &self,
        upload: Upload,
        deadline: Instant,
    ) -> Result<IngestReceipt, PipelineError> {
        let Upload {
            tenant,
            file_name,
            bytes,
        } = upload;
        tracing::info!(tenant = %tenant, file_name, bytes = bytes.len(), "Upload received");

        let stored = {
            let (files, tenant) = (&self.files, &tenant);
            let (file_name, bytes) = (file_name.as_str(), bytes.as_slice());
            within(
                deadline,
                Stage::Intake,
                self.settings
                    .retry
                    .run("upload.persist", move || files.persist(tenant, file_name, bytes)),
            )
            .await?
        };
        stage_done(&tenant, Stage::Intake);

        let content_sha256 = content_digest(&bytes);
        let pages = self.extract(bytes, deadline).await?;
        let text = join_pages(&pages);
        stage_done(&tenant, Stage::Extraction);

        let Summary {
            cleaned_text,
            summary,
            truncated,
        } = {
            let (summarizer, text) = (&self.summarizer, text.as_str());
            let call_timeout = self.settings.summarizer_timeout;
            within(
                deadline,
                Stage::Summarization,
                self.settings.retry.run("summarizer.summarize", move || {
                    bounded(call_timeout, summarizer.summarize(text))
                }),
            )
            .await?
        };
        stage_done(&tenant, Stage::Summarization);

        let outcome = self.provision(&tenant, deadline).await?;
        stage_done(&tenant, Stage::Provisioning);

        let persisted_text = match self.settings.text_retention {
            TextRetention::Truncated => cleaned_text,
            TextRetention::Full => normalize_whitespace(&text),
        };
        let document = NewDocument {
            text: persisted_text,
            summary: summary.clone(),
            file_path: stored.path.clone(),
            truncated,
            content_sha256,
        };
        let record_id = within(
            deadline,
            Stage::Recording,
            self.recorder.record(&tenant, document),
        )
        .await?;
        stage_done(&tenant, Stage::Recording);

        Ok(IngestReceipt {
            tenant: tenant.to_string(),
            tenant_created: outcome == ProvisionOutcome::Created,
            record_id: record_id.to_string(),
            file_path: stored.path,
            summary,
            truncated,
        })
    }

    async fn extract(
        &self,
        bytes: Vec<u8>,
        deadline: Instant,
    ) -> Result<Vec<String>, PipelineError> {
        let extractor = self.extractor.clone();
        let worker = tokio::task::spawn_blocking(move || extractor.extract(&bytes));
        match tokio::time::timeout_at(deadline, worker).await {
            Ok(Ok(pages)) => Ok(pages?),
            Ok(Err(join_error)) => Err(PipelineError::Worker {
                stage: Stage::Extraction,
                message: join_error.to_string(),
            }),
            Err(_) => Err(PipelineError::DeadlineExceeded {
                stage: Stage::Extraction,
            }),
        }
    }

    async fn provision(
        &self,
        tenant: &TenantName,
        deadline: Instant,
    ) -> Result<ProvisionOutcome, PipelineError> {
        let provisioner = self.provisioner.clone();
        let retry = self.settings.retry;
        let tenant = tenant.clone();
        // Detached: once the registry row is inserted, the workspace must follow.
        let task = tokio::spawn(async move {
            let (provisioner, tenant) = (&provisioner, &tenant);
            retry
                .run("tenant.provision", move || provisioner.ensure_tenant(tenant))
                .await
        });

        match tokio::time::timeout_at(deadline, task).await {
            Ok(Ok(outcome)) => Ok(outcome?),
            Ok(Err(join_error)) => Err(ProvisioningError::Aborted(join_error.to_string()).into()),
            Err(_) => Err(PipelineError::DeadlineExceeded {
                stage: Stage::Provisioning,
            }),
        }
    }

    /// Reachability of the registry and the workspace store.
    pub async fn check_health(&self) -> HealthReport {
        let timeout = self.settings.store_timeout;
        let (registry, workspaces) = tokio::join!(
            bounded(timeout, self.registry.ping()),
            bounded(timeout, self.workspaces.ping()),
        );
        if let Err(error) = &registry {
            tracing::warn!(error = %error, "Registry health check failed");
        }
        if let Err(error) = &workspaces {
            tracing::warn!(error = %error, "Workspace store health check failed");
        }
        HealthReport {
            registry: registry.is_ok(),
            workspace_store: workspaces.is_ok(),
        }
    }
}

#[async_trait]
impl IngestApi for IngestionPipeline {
    async fn ingest(&self, upload: Upload) -> Result<IngestReceipt, PipelineError> {
        self.process(upload).await
    }

    async fn health(&self) -> HealthReport {
        self.check_health().await
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    fn upload_limit(&self) -> usize {
        self.settings.max_upload_bytes
    }
}

fn stage_done(tenant: &TenantName, stage: Stage) {
    tracing::info!(tenant = %tenant, stage = %stage, "Stage completed");
}

/// Await a stage future against the request deadline.
async fn within<T, E, Fut>(
    deadline: Instant,
    stage: Stage,
    future: Fut,
) -> Result<T, PipelineError>
where
    Fut: Future<Output = Result<T, E>>,
    PipelineError: From<E>,
{
    match tokio::time::timeout_at(deadline, future).await {
        Ok(result) => result.map_err(PipelineError::from),
        Err(_) => Err(PipelineError::DeadlineExceeded { stage }),
    }
}
