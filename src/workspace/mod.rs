//! Per-tenant document workspaces.
//!
//! Each tenant owns one container in the document store, named by
//! [`TenantName::workspace_name`](crate::tenant::TenantName::workspace_name). Records are
//! appended, never updated.

mod encoder;
mod qdrant;

use crate::resilience::Transient;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use thiserror::Error;

pub use encoder::SummaryEncoder;
pub use qdrant::QdrantWorkspaceStore;

/// Errors returned while interacting with the document store.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// Base URL failed to parse or normalize.
    #[error("Invalid document store URL: {0}")]
    InvalidUrl(String),
    /// HTTP layer failed before receiving a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Store responded with an unexpected status code.
    #[error("Unexpected document store response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned by the store.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
    /// Call did not finish within the store deadline.
    #[error("Document store request timed out")]
    Timeout,
}

impl Transient for WorkspaceError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Timeout => true,
            Self::Http(error) => error.is_timeout() || error.is_connect(),
            Self::UnexpectedStatus { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Self::InvalidUrl(_) => false,
        }
    }
}

impl From<tokio::time::error::Elapsed> for WorkspaceError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::Timeout
    }
}

/// Result of a workspace creation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceCreation {
    /// The container was created by this call.
    Created,
    /// The container already existed.
    AlreadyPresent,
}

/// One uploaded document's stored record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentRecord {
    /// Identifier fixed before the first write attempt, so retries overwrite rather than duplicate.
    #[serde(skip)]
    pub id: String,
    /// Owning tenant.
    pub tenant_name: String,
    /// Persisted extracted text (see [`TextRetention`](crate::config::TextRetention)).
    pub text: String,
    /// Summary derived from the text.
    pub summary: String,
    /// RFC3339 creation timestamp, set once.
    #[serde(rename = "createdAt")]
    pub created_at: String,
    /// Handle to the stored source file.
    #[serde(rename = "filePath")]
    pub file_path: String,
    /// Whether the summarizer saw only a prefix of the text.
    pub truncated: bool,
    /// Hex SHA-256 of the uploaded bytes.
    #[serde(rename = "contentSha256")]
    pub content_sha256: String,
}

/// Document store holding one workspace per tenant.
#[async_trait]
pub trait WorkspaceStore: Send + Sync {
    /// Whether the named workspace exists.
    async fn exists(&self, workspace: &str) -> Result<bool, WorkspaceError>;

    /// Create the named workspace; an existing workspace is reported, not treated as failure.
    async fn create(&self, workspace: &str) -> Result<WorkspaceCreation, WorkspaceError>;

    /// Delete the named workspace; `false` when there was nothing to delete.
    async fn remove(&self, workspace: &str) -> Result<bool, WorkspaceError>;

    /// Write `record` into the workspace, keyed by `record.id`.
    async fn append(&self, workspace: &str, record: &DocumentRecord)
    -> Result<(), WorkspaceError>;

    /// Cheap reachability probe.
    async fn ping(&self) -> Result<(), WorkspaceError>;
}
