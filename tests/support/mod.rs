#![allow(dead_code)]

use async_trait::async_trait;
use reqwest::StatusCode;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use summary_ingest::config::TextRetention;
use summary_ingest::extraction::{ExtractionError, TextExtractor};
use summary_ingest::pipeline::{IngestionPipeline, PipelineComponents, PipelineSettings, Upload};
use summary_ingest::provisioning::ProvisioningSettings;
use summary_ingest::registry::{InsertOutcome, RegistryEntry, RegistryError, TenantRegistry};
use summary_ingest::resilience::RetryPolicy;
use summary_ingest::storage::LocalFileStore;
use summary_ingest::summarization::{
    MAX_SUMMARY_INPUT_CHARS, SummarizationClient, SummarizationError, Summary, prepare_input,
};
use summary_ingest::tenant::TenantName;
use summary_ingest::workspace::{DocumentRecord, WorkspaceCreation, WorkspaceError, WorkspaceStore};
use tempfile::TempDir;

/// Registry keeping rows in memory; the set insert plays the primary key.
#[derive(Default)]
pub struct MemoryRegistry {
    rows: Mutex<BTreeSet<String>>,
}

impl MemoryRegistry {
    pub fn rows(&self) -> Vec<String> {
        self.rows.lock().unwrap().iter().cloned().collect()
    }

    /// Plant a row as if another upload had just won the insert.
    pub fn plant(&self, name: &str) {
        self.rows.lock().unwrap().insert(name.to_string());
    }

    pub fn drop_row(&self, name: &str) {
        self.rows.lock().unwrap().remove(name);
    }
}

#[async_trait]
impl TenantRegistry for MemoryRegistry {
    async fn find(&self, tenant: &TenantName) -> Result<Option<RegistryEntry>, RegistryError> {
        tokio::task::yield_now().await;
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .get(tenant.as_str())
            .map(|name| RegistryEntry { name: name.clone() }))
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
        Ok(self.rows.lock().unwrap().remove(tenant.as_str()))
    }

    async fn ping(&self) -> Result<(), RegistryError> {
        Ok(())
    }
}

/// Workspace store keeping records per workspace in memory.
#[derive(Default)]
pub struct MemoryWorkspaces {
    workspaces: Mutex<BTreeMap<String, Vec<DocumentRecord>>>,
    pub reject_creates: AtomicBool,
    pub creates: AtomicUsize,
}

impl MemoryWorkspaces {
    pub fn names(&self) -> Vec<String> {
        self.workspaces.lock().unwrap().keys().cloned().collect()
    }

    pub fn records(&self, workspace: &str) -> Vec<DocumentRecord> {
        self.workspaces
            .lock()
            .unwrap()
            .get(workspace)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl WorkspaceStore for MemoryWorkspaces {
    async fn exists(&self, workspace: &str) -> Result<bool, WorkspaceError> {
        Ok(self.workspaces.lock().unwrap().contains_key(workspace))
    }

    async fn create(&self, workspace: &str) -> Result<WorkspaceCreation, WorkspaceError> {
        tokio::task::yield_now().await;
        self.creates.fetch_add(1, Ordering::SeqCst);
        if self.reject_creates.load(Ordering::SeqCst) {
            return Err(WorkspaceError::UnexpectedStatus {
                status: StatusCode::FORBIDDEN,
                body: "collection quota exceeded".into(),
            });
        }
        let mut workspaces = self.workspaces.lock().unwrap();
        if workspaces.contains_key(workspace) {
            return Ok(WorkspaceCreation::AlreadyPresent);
        }
        workspaces.insert(workspace.to_string(), Vec::new());
        Ok(WorkspaceCreation::Created)
    }

    async fn remove(&self, workspace: &str) -> Result<bool, WorkspaceError> {
        Ok(self.workspaces.lock().unwrap().remove(workspace).is_some())
    }

    async fn append(
        &self,
        workspace: &str,
        record: &DocumentRecord,
    ) -> Result<(), WorkspaceError> {
        let mut workspaces = self.workspaces.lock().unwrap();
        let Some(records) = workspaces.get_mut(workspace) else {
            return Err(WorkspaceError::UnexpectedStatus {
                status: StatusCode::NOT_FOUND,
                body: format!("Collection `{workspace}` doesn't exist"),
            });
        };
        match records.iter_mut().find(|existing| existing.id == record.id) {
            Some(existing) => *existing = record.clone(),
            None => records.push(record.clone()),
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), WorkspaceError> {
        Ok(())
    }
}

/// Summarizer that normalizes like the real client and answers with the first words.
#[derive(Default)]
pub struct EchoSummarizer {
    inputs: Mutex<Vec<String>>,
    pub fail: AtomicBool,
}

impl EchoSummarizer {
    pub fn inputs(&self) -> Vec<String> {
        self.inputs.lock().unwrap().clone()
    }
}

#[async_trait]
impl SummarizationClient for EchoSummarizer {
    async fn summarize(&self, text: &str) -> Result<Summary, SummarizationError> {
        let prepared = prepare_input(text, MAX_SUMMARY_INPUT_CHARS);
        if prepared.text.is_empty() {
            return Err(SummarizationError::EmptyInput);
        }
        self.inputs.lock().unwrap().push(prepared.text.clone());
        if self.fail.load(Ordering::SeqCst) {
            return Err(SummarizationError::Api {
                status: StatusCode::BAD_REQUEST,
                message: "Input is too long for this model".into(),
            });
        }
        let summary = prepared
            .text
            .split_whitespace()
            .take(6)
            .collect::<Vec<_>>()
            .join(" ");
        Ok(Summary {
            cleaned_text: prepared.text,
            summary,
            truncated: prepared.truncated,
        })
    }
}

/// Extractor reading UTF-8 bytes, one page per form feed.
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<Vec<String>, ExtractionError> {
        let text = std::str::from_utf8(bytes).map_err(|_| ExtractionError::Unsupported)?;
        let pages: Vec<String> = text.split('\u{c}').map(str::to_string).collect();
        if pages.iter().all(|page| page.trim().is_empty()) {
            return Err(ExtractionError::NoText);
        }
        Ok(pages)
    }
}

pub struct Harness {
    pub pipeline: Arc<IngestionPipeline>,
    pub registry: Arc<MemoryRegistry>,
    pub workspaces: Arc<MemoryWorkspaces>,
    pub summarizer: Arc<EchoSummarizer>,
    pub upload_dir: TempDir,
}

impl Harness {
    pub fn new(retention: TextRetention) -> Self {
        Self::with_summarizer(retention, None)
    }

    pub fn with_summarizer(
        retention: TextRetention,
        summarizer: Option<Arc<dyn SummarizationClient>>,
    ) -> Self {
        Self::build(settings(retention), summarizer)
    }

    /// Assemble a pipeline; `summarizer` replaces the in-memory echo summarizer.
    pub fn build(
        settings: PipelineSettings,
        summarizer: Option<Arc<dyn SummarizationClient>>,
    ) -> Self {
        let upload_dir = tempfile::tempdir().expect("tempdir");
        let registry = Arc::new(MemoryRegistry::default());
        let workspaces = Arc::new(MemoryWorkspaces::default());
        let echo = Arc::new(EchoSummarizer::default());

        let pipeline = IngestionPipeline::new(
            PipelineComponents {
                files: Arc::new(LocalFileStore::new(upload_dir.path(), Duration::from_secs(2))),
                extractor: Arc::new(PlainTextExtractor),
                summarizer: summarizer
                    .unwrap_or_else(|| echo.clone() as Arc<dyn SummarizationClient>),
                registry: registry.clone(),
                workspaces: workspaces.clone(),
            },
            settings,
        );

        Self {
            pipeline: Arc::new(pipeline),
            registry,
            workspaces,
            summarizer: echo,
            upload_dir,
        }
    }
}

pub fn settings(retention: TextRetention) -> PipelineSettings {
    let retry = RetryPolicy::new(3, Duration::from_millis(1));
    PipelineSettings {
        request_timeout: Duration::from_secs(10),
        store_timeout: Duration::from_secs(1),
        summarizer_timeout: Duration::from_secs(2),
        retry,
        provisioning: ProvisioningSettings {
            call_timeout: Duration::from_secs(1),
            create_retry: retry,
            ready_poll: RetryPolicy::new(5, Duration::from_millis(10)),
        },
        text_retention: retention,
        max_upload_bytes: 1 << 20,
    }
}

pub fn upload(tenant: &str, file_name: &str, text: &str) -> Upload {
    Upload {
        tenant: TenantName::parse(tenant).expect("tenant"),
        file_name: file_name.to_string(),
        bytes: text.as_bytes().to_vec(),
    }
}
