//! Qdrant-backed workspace store: one collection per tenant, one point per document.

use super::{DocumentRecord, SummaryEncoder, WorkspaceCreation, WorkspaceError, WorkspaceStore};
use crate::config::Config;
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// Lightweight HTTP client for Qdrant collections and points.
pub struct QdrantWorkspaceStore {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    encoder: SummaryEncoder,
}

impl QdrantWorkspaceStore {
    /// Construct a store for `base_url`, bounding each request by `timeout`.
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        vector_size: u64,
        timeout: Duration,
    ) -> Result<Self, WorkspaceError> {
        let client = Client::builder()
            .user_agent("summary-ingest/0.1")
            .timeout(timeout)
            .build()?;
        let base_url = normalize_base_url(base_url).map_err(WorkspaceError::InvalidUrl)?;
        tracing::debug!(
            url = %base_url,
            has_api_key = api_key.as_deref().is_some_and(|value| !value.is_empty()),
            vector_size,
            "Initialized Qdrant workspace store"
        );

        Ok(Self {
            client,
            base_url,
            api_key,
            encoder: SummaryEncoder::new(vector_size as usize),
        })
    }

    /// Construct a store from the loaded configuration.
    pub fn from_config(config: &Config) -> Result<Self, WorkspaceError> {
        Self::new(
            &config.qdrant_url,
            config.qdrant_api_key.clone(),
            config.workspace_vector_size,
            config.store_timeout(),
        )
    }

    /// Exact number of records stored in a workspace.
    pub async fn count_documents(&self, workspace: &str) -> Result<u64, WorkspaceError> {
        let response = self
            .request(
                Method::POST,
                &format!("collections/{workspace}/points/count"),
            )
            .json(&json!({ "exact": true }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(unexpected(response).await);
        }

        let CountResponse { result } = response.json().await?;
        Ok(result.count)
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format_endpoint(&self.base_url, path);
        let mut req = self.client.request(method, url);
        if let Some(api_key) = &self.api_key
            && !api_key.is_empty()
        {
            req = req.header("api-key", api_key);
        }
        req
    }
}

#[async_trait]
impl WorkspaceStore for QdrantWorkspaceStore {
    async fn exists(&self, workspace: &str) -> Result<bool, WorkspaceError> {
        let response = self
            .request(Method::GET, &format!("collections/{workspace}"))
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => {
                let error = unexpected(response).await;
                tracing::error!(workspace, error = %error, "Workspace existence check failed");
                Err(error)
            }
        }
    }

    async fn create(&self, workspace: &str) -> Result<WorkspaceCreation, WorkspaceError> {
        let body = json!({
            "vectors": {
                "size": self.encoder.dimension(),
                "distance": "Cosine"
            }
        });

        let response = self
            .request(Method::PUT, &format!("collections/{workspace}"))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(workspace, "Workspace collection created");
            return Ok(WorkspaceCreation::Created);
        }

        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::CONFLICT
            || (status == StatusCode::BAD_REQUEST && body.contains("already exists"))
        {
            tracing::debug!(workspace, "Workspace collection already exists");
            return Ok(WorkspaceCreation::AlreadyPresent);
        }

        let error = WorkspaceError::UnexpectedStatus { status, body };
        tracing::error!(workspace, error = %error, "Workspace creation failed");
        Err(error)
    }

    async fn remove(&self, workspace: &str) -> Result<bool, WorkspaceError> {
        let response = self
            .request(Method::DELETE, &format!("collections/{workspace}"))
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => {
                let DeleteResponse { result } = response.json().await?;
                tracing::debug!(workspace, removed = result, "Workspace collection deleted");
                Ok(result)
            }
            _ => {
                let error = unexpected(response).await;
                tracing::error!(workspace, error = %error, "Workspace deletion failed");
                Err(error)
            }
        }
    }

    async fn append(
        &self,
        workspace: &str,
        record: &DocumentRecord,
    ) -> Result<(), WorkspaceError> {
        let point = json!({
            "id": record.id,
            "vector": self.encoder.encode(&record.summary),
            "payload": record,
        });

        let response = self
            .request(Method::PUT, &format!("collections/{workspace}/points"))
            .query(&[("wait", true)])
            .json(&json!({ "points": [point] }))
            .send()
            .await?;

        if response.status().is_success() {
            tracing::debug!(workspace, record_id = %record.id, "Document record stored");
            Ok(())
        } else {
            let error = unexpected(response).await;
            tracing::error!(workspace, error = %error, "Document record write failed");
            Err(error)
        }
    }

    async fn ping(&self) -> Result<(), WorkspaceError> {
        let response = self.request(Method::GET, "collections").send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(unexpected(response).await)
        }
    }
}

async fn unexpected(response: reqwest::Response) -> WorkspaceError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    WorkspaceError::UnexpectedStatus { status, body }
}

fn normalize_base_url(url: &str) -> Result<String, String> {
    let mut parsed = reqwest::Url::parse(url).map_err(|err| err.to_string())?;
    let path = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&path);
    Ok(parsed.to_string())
}

fn format_endpoint(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

#[derive(Deserialize)]
struct DeleteResponse {
    result: bool,
}

#[derive(Deserialize)]
struct CountResponse {
    result: CountResult,
}

#[derive(Deserialize)]
struct CountResult {
    count: u64,
}
