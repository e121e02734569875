//! Appends one content + summary record per upload to the tenant's workspace.

use crate::resilience::{RetryPolicy, Transient, bounded};
use crate::tenant::TenantName;
use crate::workspace::{DocumentRecord, WorkspaceError, WorkspaceStore};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

/// Identifier assigned to a stored record.
pub type RecordId = Uuid;

/// Errors raised while writing a document record.
#[derive(Debug, Error)]
pub enum RecordingError {
    /// Workspace store rejected or failed the write.
    #[error("failed to write document record: {0}")]
    Workspace(#[from] WorkspaceError),
    /// Creation timestamp could not be rendered.
    #[error("failed to format record timestamp: {0}")]
    Timestamp(#[from] time::error::Format),
}

impl Transient for RecordingError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Workspace(error) => error.is_transient(),
            Self::Timestamp(_) => false,
        }
    }
}

/// Fields of a record supplied by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDocument {
    /// Text persisted with the record.
    pub text: String,
    /// Summary of the text.
    pub summary: String,
    /// Location of the stored source file.
    pub file_path: String,
    /// Whether the summarizer saw only a prefix.
    pub truncated: bool,
    /// Hex SHA-256 of the uploaded bytes.
    pub content_sha256: String,
}

/// Writes document records into tenant workspaces.
pub struct DocumentRecorder {
    workspaces: Arc<dyn WorkspaceStore>,
    retry: RetryPolicy,
    call_timeout: Duration,
}

impl DocumentRecorder {
    /// Build a recorder retrying transient write failures under `retry`.
    pub fn new(
        workspaces: Arc<dyn WorkspaceStore>,
        retry: RetryPolicy,
        call_timeout: Duration,
    ) -> Self {
        Self {
            workspaces,
            retry,
            call_timeout,
        }
    }

    /// Append one record to the tenant's workspace, which must already exist.
    ///
    /// The record id and timestamp are fixed before the first attempt, so a retried write
    /// lands on the same record.
    pub async fn record(
        &self,
        tenant: &TenantName,
        document: NewDocument,
    ) -> Result<RecordId, RecordingError> {
        let id = Uuid::new_v4();
        let record = DocumentRecord {
            id: id.to_string(),
            tenant_name: tenant.to_string(),
            text: document.text,
            summary: document.summary,
            created_at: OffsetDateTime::now_utc().format(&Rfc3339)?,
            file_path: document.file_path,
            truncated: document.truncated,
            content_sha256: document.content_sha256,
        };
        let workspace = tenant.workspace_name();

        let workspaces = &self.workspaces;
        let timeout = self.call_timeout;
        let (workspace_ref, record_ref) = (workspace.as_str(), &record);
        self.retry
            .run("workspace.append", move || {
                bounded(timeout, workspaces.append(workspace_ref, record_ref))
            })
            .await?;

        tracing::info!(
            tenant = %tenant,
            workspace = %workspace,
            record_id = %id,
            truncated = record.truncated,
            "Document recorded"
        );
        Ok(id)
    }
}

/// Hex SHA-256 digest of uploaded bytes.
pub fn content_digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
